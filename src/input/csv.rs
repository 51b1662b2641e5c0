use std::io::{self, BufRead};

use super::TableReader;
use crate::dataset::Dataset;

/// RFC 4180 CSV table reader. The first record is the header.
///
/// Handles:
/// - Comma-separated fields (configurable delimiter)
/// - Double-quoted fields (embedded commas, newlines, escaped `""`)
/// - CRLF and LF line endings
pub struct CsvReader {
    delimiter: u8,
}

impl CsvReader {
    pub fn new(delimiter: u8) -> Self {
        CsvReader { delimiter }
    }

    /// Convenience constructor for standard CSV (comma-delimited).
    pub fn comma() -> Self {
        Self::new(b',')
    }

    /// Convenience constructor for TSV (tab-delimited).
    pub fn tab() -> Self {
        Self::new(b'\t')
    }

    fn next_record(&self, reader: &mut dyn BufRead) -> io::Result<Option<Vec<String>>> {
        let mut raw = String::new();
        let bytes = reader.read_line(&mut raw)?;
        if bytes == 0 {
            return Ok(None);
        }

        // A record with an odd number of unescaped quotes spans multiple lines.
        while !quotes_balanced(&raw) {
            let mut cont = String::new();
            let n = reader.read_line(&mut cont)?;
            if n == 0 {
                break;
            }
            raw.push_str(&cont);
        }

        if raw.ends_with('\n') {
            raw.pop();
            if raw.ends_with('\r') {
                raw.pop();
            }
        }

        Ok(Some(parse_fields(&raw, self.delimiter)))
    }
}

impl TableReader for CsvReader {
    fn read_table(&mut self, reader: &mut dyn BufRead) -> io::Result<Dataset> {
        let header = match self.next_record(reader)? {
            Some(h) => h,
            None => return Ok(Dataset::default()),
        };
        let header: Vec<String> = header
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let name = name.trim_start_matches('\u{feff}').trim().to_string();
                if name.is_empty() { format!("Unnamed: {}", i) } else { name }
            })
            .collect();

        let mut rows = Vec::new();
        while let Some(fields) = self.next_record(reader)? {
            if fields.len() == 1 && fields[0].is_empty() {
                continue;
            }
            if fields.len() > header.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "expected {} fields in line {}, saw {}",
                        header.len(),
                        rows.len() + 2,
                        fields.len()
                    ),
                ));
            }
            rows.push(fields);
        }
        Ok(Dataset::from_rows(header, rows))
    }
}

/// Check if all double-quotes are balanced (even count outside of escaped pairs).
fn quotes_balanced(s: &str) -> bool {
    let mut in_quotes = false;
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '"' {
            if in_quotes {
                if i + 1 < chars.len() && chars[i + 1] == '"' {
                    i += 2;
                    continue;
                }
                in_quotes = false;
            } else {
                in_quotes = true;
            }
        }
        i += 1;
    }
    !in_quotes
}

/// Parse a single CSV/TSV record into fields.
fn parse_fields(line: &str, delimiter: u8) -> Vec<String> {
    let delim = delimiter as char;
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            c if c == delim && !in_quotes => fields.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }
    fields.push(field);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Cell;

    fn read(src: &str) -> Dataset {
        CsvReader::comma().read_table(&mut src.as_bytes()).unwrap()
    }

    #[test]
    fn simple_csv() {
        assert_eq!(parse_fields("a,b,c", b','), vec!["a", "b", "c"]);
    }

    #[test]
    fn quoted_field_with_comma() {
        assert_eq!(parse_fields("a,\"b,c\",d", b','), vec!["a", "b,c", "d"]);
    }

    #[test]
    fn escaped_quotes() {
        assert_eq!(
            parse_fields("a,\"he said \"\"hi\"\"\",c", b','),
            vec!["a", "he said \"hi\"", "c"]
        );
    }

    #[test]
    fn tab_delimited() {
        assert_eq!(parse_fields("x\ty\tz", b'\t'), vec!["x", "y", "z"]);
    }

    #[test]
    fn empty_fields_csv() {
        assert_eq!(parse_fields("a,,c", b','), vec!["a", "", "c"]);
    }

    #[test]
    fn multiline_record() {
        assert!(!quotes_balanced("\"hello"));
        assert!(quotes_balanced("\"hello\""));
        let ds = read("note,n\n\"two\nlines\",1\n");
        assert_eq!(ds.columns()[0].values, vec![Cell::Text("two\nlines".into())]);
    }

    #[test]
    fn header_and_typed_columns() {
        let ds = read("State,Sales\r\nCA,10\r\nNY,2.5\r\n");
        assert_eq!(ds.column_names(), vec!["State", "Sales"]);
        assert_eq!(ds.columns()[1].values, vec![Cell::Number(10.0), Cell::Number(2.5)]);
    }

    #[test]
    fn blank_header_names_are_filled() {
        let ds = read(",x\n1,2\n");
        assert_eq!(ds.column_names(), vec!["Unnamed: 0", "x"]);
    }

    #[test]
    fn too_many_fields_is_an_error() {
        let err = CsvReader::comma().read_table(&mut "a\n1,2\n".as_bytes()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn empty_input_gives_empty_table() {
        assert_eq!(read("").width(), 0);
    }
}
