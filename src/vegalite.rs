//! Vega-Lite rendering of chart specs.
//!
//! A [`ChartSpec`] becomes a standalone Vega-Lite document with its rows
//! inlined, so the file can be opened with any Vega-Lite viewer.

use serde_json::{Map, Value, json};

use crate::chart::{ChartKind, ChartSpec};
use crate::dataset::{Cell, Dataset};

pub const SCHEMA_URL: &str = "https://vega.github.io/schema/vega-lite/v6.json";

/// Render `spec` as a Vega-Lite document.
pub fn to_vega_lite(spec: &ChartSpec) -> Value {
    let mut doc = json!({
        "$schema": SCHEMA_URL,
        "data": { "values": rows(&spec.data) },
    });
    if let Some(title) = &spec.title {
        doc["title"] = json!(title);
    }

    let y = spec.y.as_deref().unwrap_or_default();
    let (mark, encoding) = match spec.kind {
        ChartKind::Bar => {
            let mut enc = json!({
                "x": nominal(&spec.x),
                "y": quantitative(y),
            });
            if let Some(color) = &spec.color {
                enc["color"] = quantitative(color);
            }
            (json!("bar"), enc)
        }
        ChartKind::Line => (
            json!({ "type": "line", "point": spec.markers }),
            json!({ "x": nominal(&spec.x), "y": quantitative(y) }),
        ),
        ChartKind::Pie => (
            json!("arc"),
            json!({
                "theta": quantitative(y),
                "color": { "field": spec.x, "type": "nominal", "sort": null },
            }),
        ),
        ChartKind::Histogram => {
            let mut x = quantitative(&spec.x);
            x["bin"] = match spec.bins {
                Some(n) => json!({ "maxbins": n }),
                None => json!(true),
            };
            (json!("bar"), json!({ "x": x, "y": { "aggregate": "count", "type": "quantitative" } }))
        }
        ChartKind::Scatter => {
            (json!("point"), json!({ "x": quantitative(&spec.x), "y": quantitative(y) }))
        }
    };
    doc["mark"] = mark;
    doc["encoding"] = encoding;
    doc
}

/// Categorical axis that keeps the table's row order.
fn nominal(field: &str) -> Value {
    json!({ "field": field, "type": "nominal", "sort": null })
}

fn quantitative(field: &str) -> Value {
    json!({ "field": field, "type": "quantitative" })
}

fn rows(data: &Dataset) -> Vec<Value> {
    (0..data.height())
        .map(|i| {
            let mut row = Map::new();
            for col in data.columns() {
                row.insert(col.name.clone(), cell_value(&col.values[i]));
            }
            Value::Object(row)
        })
        .collect()
}

fn cell_value(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        // NaN and infinities have no JSON form
        Cell::Number(n) => serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
        Cell::Text(s) => json!(s),
        Cell::Bool(b) => json!(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{ChartRequest, infer};
    use crate::dataset::Column;

    fn table() -> Dataset {
        Dataset::new(vec![
            Column::new("State", vec![Cell::Text("CA".into()), Cell::Text("TX".into())]),
            Column::new("Sales", vec![Cell::Number(9.5), Cell::Number(f64::NAN)]),
        ])
        .unwrap()
    }

    #[test]
    fn bar_document() {
        let spec = infer(&table(), ChartRequest::Auto).unwrap();
        let doc = to_vega_lite(&spec);
        assert_eq!(doc["$schema"], SCHEMA_URL);
        assert_eq!(doc["mark"], "bar");
        assert_eq!(doc["title"], "Top 10 State by Sales");
        assert_eq!(doc["encoding"]["x"]["field"], "State");
        assert_eq!(doc["encoding"]["color"]["field"], "Sales");
        assert_eq!(doc["data"]["values"][0], json!({ "State": "CA", "Sales": 9.5 }));
        assert_eq!(doc["data"]["values"][1]["Sales"], Value::Null);
    }

    #[test]
    fn pie_uses_arc_and_theta() {
        let spec = infer(&table(), ChartRequest::parse("pie").unwrap()).unwrap();
        let doc = to_vega_lite(&spec);
        assert_eq!(doc["mark"], "arc");
        assert_eq!(doc["encoding"]["theta"]["field"], "count");
        assert_eq!(doc["encoding"]["color"]["field"], "State");
        assert!(doc.get("title").is_none());
    }

    #[test]
    fn histogram_bins_and_line_points() {
        let hist = to_vega_lite(&infer(&table(), ChartRequest::parse("hist").unwrap()).unwrap());
        assert_eq!(hist["encoding"]["x"]["bin"]["maxbins"], 30);
        assert_eq!(hist["encoding"]["y"]["aggregate"], "count");

        let line = to_vega_lite(&infer(&table(), ChartRequest::parse("line").unwrap()).unwrap());
        assert_eq!(line["mark"]["type"], "line");
        assert_eq!(line["mark"]["point"], true);
    }
}
