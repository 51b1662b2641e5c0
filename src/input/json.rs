use std::io::{self, BufRead, Read};

use serde_json::Value as Json;

use super::TableReader;
use crate::dataset::{Cell, Column, Dataset};

/// JSON table reader.
///
/// Accepts either JSON Lines (one object per line) or a single top-level
/// array of objects. Columns are the union of keys in first-seen order;
/// nested values are kept as their JSON text.
pub struct JsonReader;

impl TableReader for JsonReader {
    fn read_table(&mut self, reader: &mut dyn BufRead) -> io::Result<Dataset> {
        let mut src = String::new();
        reader.read_to_string(&mut src)?;

        let objects: Vec<Json> = if src.trim_start().starts_with('[') {
            match serde_json::from_str(&src)? {
                Json::Array(items) => items,
                other => vec![other],
            }
        } else {
            src.lines()
                .filter(|l| !l.trim().is_empty())
                .map(serde_json::from_str)
                .collect::<Result<_, _>>()?
        };

        let mut names: Vec<String> = Vec::new();
        for obj in &objects {
            let Json::Object(map) = obj else {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "expected a JSON object per record"));
            };
            for key in map.keys() {
                if !names.iter().any(|n| n == key) {
                    names.push(key.clone());
                }
            }
        }

        let columns: Vec<Column> = names
            .iter()
            .map(|name| {
                let mut col = Column::new(
                    name.clone(),
                    objects.iter().map(|obj| json_cell(obj.get(name))).collect(),
                );
                col.coerce_numeric();
                col
            })
            .collect();

        if columns.is_empty() {
            return Ok(Dataset::with_height(objects.len()));
        }
        Dataset::new(columns).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

fn json_cell(value: Option<&Json>) -> Cell {
    match value {
        None | Some(Json::Null) => Cell::Null,
        Some(Json::Bool(b)) => Cell::Bool(*b),
        Some(Json::Number(n)) => n.as_f64().map_or(Cell::Null, Cell::Number),
        Some(Json::String(s)) => Cell::from_raw(s),
        Some(other) => Cell::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(src: &str) -> Dataset {
        JsonReader.read_table(&mut src.as_bytes()).unwrap()
    }

    #[test]
    fn json_lines_keep_key_order() {
        let ds = read("{\"name\":\"Alice\",\"age\":30}\n{\"name\":\"Bob\",\"age\":41}\n");
        assert_eq!(ds.column_names(), vec!["name", "age"]);
        assert_eq!(ds.columns()[1].values, vec![Cell::Number(30.0), Cell::Number(41.0)]);
    }

    #[test]
    fn array_of_objects_with_missing_keys() {
        let ds = read(r#"[{"a":1},{"a":2,"b":"x"}]"#);
        assert_eq!(ds.column_names(), vec!["a", "b"]);
        assert_eq!(ds.columns()[1].values, vec![Cell::Null, Cell::Text("x".into())]);
    }

    #[test]
    fn nested_value_preserved_as_text() {
        let ds = read(r#"{"a":"x","b":{"c":1}}"#);
        assert_eq!(ds.columns()[1].values, vec![Cell::Text(r#"{"c":1}"#.into())]);
    }

    #[test]
    fn non_object_record_is_rejected() {
        let err = JsonReader.read_table(&mut "[1, 2]".as_bytes()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
