//! Chart inference: pick a chart type and its fields from the shape of a
//! result table. Pure and total; a table that cannot be charted yields no
//! spec rather than an error.

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::dataset::{Cell, CellKey, Column, Dataset};
use crate::schema::{ColumnKind, Schema, classify};

/// Rows plotted by bar and line charts, and slices of a pie.
pub const ROW_CAP: usize = 10;

/// Histogram bin count.
pub const HISTOGRAM_BINS: u32 = 30;

/// Name of the value column of a pie's count table. Counting a column
/// that already has this name gives `count_1`.
pub const COUNT_COLUMN: &str = "count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Histogram,
    Scatter,
}

impl ChartKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Pie => "pie",
            ChartKind::Histogram => "histogram",
            ChartKind::Scatter => "scatter",
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the caller asked for: let the engine choose, or a specific kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChartRequest {
    #[default]
    Auto,
    Kind(ChartKind),
}

impl ChartRequest {
    pub fn parse(s: &str) -> Option<ChartRequest> {
        Some(match s.trim().to_ascii_lowercase().as_str() {
            "auto" => ChartRequest::Auto,
            "bar" => ChartRequest::Kind(ChartKind::Bar),
            "line" => ChartRequest::Kind(ChartKind::Line),
            "pie" => ChartRequest::Kind(ChartKind::Pie),
            "hist" | "histogram" => ChartRequest::Kind(ChartKind::Histogram),
            "scatter" => ChartRequest::Kind(ChartKind::Scatter),
            _ => return None,
        })
    }
}

impl FromStr for ChartRequest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChartRequest::parse(s).ok_or_else(|| {
            format!("unknown chart type '{}' (expected auto, bar, line, pie, hist or scatter)", s)
        })
    }
}

impl fmt::Display for ChartRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartRequest::Auto => f.write_str("auto"),
            ChartRequest::Kind(kind) => kind.fmt(f),
        }
    }
}

/// A chart to draw: its kind, the fields it encodes and the exact rows to plot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub x: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bins: Option<u32>,
    /// Draw point markers on a line.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub markers: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip)]
    pub data: Dataset,
}

impl ChartSpec {
    fn new(kind: ChartKind, x: &str, data: Dataset) -> Self {
        ChartSpec {
            kind,
            x: x.to_string(),
            y: None,
            color: None,
            bins: None,
            markers: false,
            title: None,
            data,
        }
    }
}

/// Choose a chart for `table`.
pub fn infer(table: &Dataset, request: ChartRequest) -> Option<ChartSpec> {
    choose(table, request, None)
}

/// Choose a chart for a table derived from a dataset with schema `source`.
/// A column without values (every cell missing, or no rows at all) takes
/// the kind of the same-named source column.
pub fn infer_with_schema(table: &Dataset, request: ChartRequest, source: &Schema) -> Option<ChartSpec> {
    choose(table, request, Some(source))
}

fn kind_of(col: &Column, source: Option<&Schema>) -> ColumnKind {
    let hinted = source
        .filter(|_| col.values.iter().all(Cell::is_null))
        .and_then(|schema| schema.kind_of(&col.name));
    hinted.unwrap_or_else(|| classify(col))
}

fn choose(table: &Dataset, request: ChartRequest, source: Option<&Schema>) -> Option<ChartSpec> {
    let mut numeric = Vec::new();
    let mut categorical = Vec::new();
    for col in table.columns() {
        match kind_of(col, source) {
            ColumnKind::Numeric => numeric.push(col.name.as_str()),
            ColumnKind::Categorical => categorical.push(col.name.as_str()),
        }
    }

    let spec = match request {
        ChartRequest::Auto => {
            if let (Some(&x), Some(&y)) = (categorical.first(), numeric.first()) {
                let mut spec = bar(table, x, y);
                spec.title = Some(format!("Top {} {} by {}", ROW_CAP, x, y));
                spec
            } else if let Some(&x) = numeric.first() {
                let mut spec = histogram(table, x);
                spec.title = Some(format!("Distribution of {}", x));
                spec
            } else if let Some(&x) = categorical.first() {
                let mut spec = pie(table, x)?;
                spec.title = Some(format!("Top {} share", x));
                spec
            } else {
                return None;
            }
        }
        ChartRequest::Kind(ChartKind::Bar) => bar(table, categorical.first()?, numeric.first()?),
        ChartRequest::Kind(ChartKind::Line) => {
            let (x, y) = (categorical.first()?, numeric.first()?);
            let mut spec = ChartSpec::new(ChartKind::Line, x, table.head(ROW_CAP));
            spec.y = Some(y.to_string());
            spec.markers = true;
            spec
        }
        ChartRequest::Kind(ChartKind::Pie) => pie(table, categorical.first()?)?,
        ChartRequest::Kind(ChartKind::Histogram) => histogram(table, numeric.first()?),
        ChartRequest::Kind(ChartKind::Scatter) => {
            let [x, y, ..] = numeric.as_slice() else { return None };
            let mut spec = ChartSpec::new(ChartKind::Scatter, x, table.clone());
            spec.y = Some(y.to_string());
            spec
        }
    };
    tracing::debug!(kind = %spec.kind, x = %spec.x, rows = spec.data.height(), "inferred chart");
    Some(spec)
}

fn bar(table: &Dataset, x: &str, y: &str) -> ChartSpec {
    let mut spec = ChartSpec::new(ChartKind::Bar, x, table.head(ROW_CAP));
    spec.y = Some(y.to_string());
    spec.color = Some(y.to_string());
    spec
}

fn histogram(table: &Dataset, x: &str) -> ChartSpec {
    let mut spec = ChartSpec::new(ChartKind::Histogram, x, table.clone());
    spec.bins = Some(HISTOGRAM_BINS);
    spec
}

fn pie(table: &Dataset, names: &str) -> Option<ChartSpec> {
    let counts = top_counts(table.column(names)?, ROW_CAP)?;
    let mut spec = ChartSpec::new(ChartKind::Pie, names, counts);
    spec.y = Some(count_column_for(names));
    Some(spec)
}

fn count_column_for(values: &str) -> String {
    if values == COUNT_COLUMN { format!("{}_1", COUNT_COLUMN) } else { COUNT_COLUMN.to_string() }
}

/// The `limit` most frequent values of a column with their counts, most
/// frequent first, ties in order of first appearance. Missing values are
/// not counted.
pub fn top_counts(column: &Column, limit: usize) -> Option<Dataset> {
    let mut slots: FxHashMap<CellKey, usize> = FxHashMap::default();
    let mut values: Vec<Cell> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    for cell in &column.values {
        let Some(key) = cell.key() else { continue };
        let slot = *slots.entry(key).or_insert_with(|| {
            values.push(cell.clone());
            counts.push(0);
            counts.len() - 1
        });
        counts[slot] += 1;
    }

    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|&a, &b| counts[b].cmp(&counts[a]));
    order.truncate(limit);

    let names = Column::new(column.name.clone(), order.iter().map(|&i| values[i].clone()).collect());
    let totals = Column::new(
        count_column_for(&column.name),
        order.iter().map(|&i| Cell::Number(counts[i] as f64)).collect(),
    );
    Dataset::new(vec![names, totals]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(values: &[&str]) -> Vec<Cell> {
        values.iter().map(|s| Cell::Text(s.to_string())).collect()
    }

    fn nums(values: &[f64]) -> Vec<Cell> {
        values.iter().map(|n| Cell::Number(*n)).collect()
    }

    fn states(rows: usize) -> Dataset {
        Dataset::new(vec![
            Column::new("State", (0..rows).map(|i| Cell::Text(format!("S{}", i))).collect()),
            Column::new("Sales", (0..rows).map(|i| Cell::Number(i as f64)).collect()),
        ])
        .unwrap()
    }

    #[test]
    fn parses_requests() {
        assert_eq!(ChartRequest::parse("hist"), Some(ChartRequest::Kind(ChartKind::Histogram)));
        assert_eq!(ChartRequest::parse("Auto"), Some(ChartRequest::Auto));
        assert!("donut".parse::<ChartRequest>().is_err());
    }

    #[test]
    fn auto_bar_for_mixed_tables() {
        let spec = infer(&states(25), ChartRequest::Auto).unwrap();
        assert_eq!(spec.kind, ChartKind::Bar);
        assert_eq!(spec.x, "State");
        assert_eq!(spec.y.as_deref(), Some("Sales"));
        assert_eq!(spec.color.as_deref(), Some("Sales"));
        assert_eq!(spec.title.as_deref(), Some("Top 10 State by Sales"));
        assert_eq!(spec.data.height(), 10);
    }

    #[test]
    fn auto_histogram_for_numeric_tables() {
        let ds = Dataset::new(vec![Column::new("Age", nums(&[1.0, 2.0, 3.0]))]).unwrap();
        let spec = infer(&ds, ChartRequest::Auto).unwrap();
        assert_eq!(spec.kind, ChartKind::Histogram);
        assert_eq!(spec.bins, Some(30));
        assert_eq!(spec.title.as_deref(), Some("Distribution of Age"));
        assert_eq!(spec.data.height(), 3);
    }

    #[test]
    fn auto_pie_for_categorical_tables() {
        let ds = Dataset::new(vec![Column::new("Color", text(&["red", "blue", "red", "green", "red", "blue"]))])
            .unwrap();
        let spec = infer(&ds, ChartRequest::Auto).unwrap();
        assert_eq!(spec.kind, ChartKind::Pie);
        assert_eq!(spec.title.as_deref(), Some("Top Color share"));
        assert_eq!(spec.data.column_names(), vec!["Color", "count"]);
        assert_eq!(spec.data.column("Color").unwrap().values, text(&["red", "blue", "green"]));
        assert_eq!(spec.data.column("count").unwrap().values, nums(&[3.0, 2.0, 1.0]));
    }

    #[test]
    fn pie_counts_never_exceed_rows() {
        let values: Vec<Cell> = (0..40).map(|i| Cell::Text(format!("v{}", i % 13))).collect();
        let ds = Dataset::new(vec![Column::new("k", values)]).unwrap();
        let spec = infer(&ds, ChartRequest::Kind(ChartKind::Pie)).unwrap();
        assert_eq!(spec.data.height(), 10);
        let total: f64 = spec.data.column("count").unwrap().values.iter().filter_map(Cell::as_number).sum();
        assert!(total <= 40.0);
    }

    #[test]
    fn no_columns_no_chart() {
        assert!(infer(&Dataset::default(), ChartRequest::Auto).is_none());
    }

    #[test]
    fn explicit_kinds_are_untitled() {
        let spec = infer(&states(3), ChartRequest::Kind(ChartKind::Line)).unwrap();
        assert_eq!(spec.kind, ChartKind::Line);
        assert!(spec.markers);
        assert!(spec.title.is_none());
        assert!(spec.color.is_none());
    }

    #[test]
    fn unmet_requirements_yield_none() {
        let numeric_only = Dataset::new(vec![Column::new("a", nums(&[1.0]))]).unwrap();
        assert!(infer(&numeric_only, ChartRequest::Kind(ChartKind::Bar)).is_none());
        assert!(infer(&numeric_only, ChartRequest::Kind(ChartKind::Scatter)).is_none());
        assert!(infer(&numeric_only, ChartRequest::Kind(ChartKind::Pie)).is_none());
        let two = Dataset::new(vec![Column::new("a", nums(&[1.0])), Column::new("b", nums(&[2.0]))]).unwrap();
        let spec = infer(&two, ChartRequest::Kind(ChartKind::Scatter)).unwrap();
        assert_eq!((spec.x.as_str(), spec.y.as_deref()), ("a", Some("b")));
    }

    #[test]
    fn inference_is_pure() {
        let table = states(12);
        assert_eq!(infer(&table, ChartRequest::Auto), infer(&table, ChartRequest::Auto));
    }

    #[test]
    fn counting_a_column_named_count() {
        let ds = Dataset::new(vec![Column::new("count", text(&["a", "b", "a"]))]).unwrap();
        let spec = infer(&ds, ChartRequest::Kind(ChartKind::Pie)).unwrap();
        assert_eq!(spec.x, "count");
        assert_eq!(spec.y.as_deref(), Some("count_1"));
        assert_eq!(spec.data.column("count").unwrap().values, text(&["a", "b"]));
        assert_eq!(spec.data.column("count_1").unwrap().values, nums(&[2.0, 1.0]));
    }

    #[test]
    fn empty_columns_keep_their_source_kind() {
        let source = crate::schema::introspect(&states(4)).unwrap();
        let empty = states(0);
        assert_eq!(infer(&empty, ChartRequest::Auto).unwrap().kind, ChartKind::Histogram);

        let spec = infer_with_schema(&empty, ChartRequest::Auto, &source).unwrap();
        assert_eq!(spec.kind, ChartKind::Bar);
        assert_eq!((spec.x.as_str(), spec.y.as_deref()), ("State", Some("Sales")));
        assert_eq!(spec.data.height(), 0);

        let missing = Dataset::new(vec![
            Column::new("State", vec![Cell::Null, Cell::Null]),
            Column::new("Sales", nums(&[1.0, 2.0])),
        ])
        .unwrap();
        assert_eq!(infer_with_schema(&missing, ChartRequest::Auto, &source).unwrap().x, "State");
    }

    #[test]
    fn booleans_are_categorical() {
        let ds = Dataset::new(vec![
            Column::new("Active", vec![Cell::Bool(true), Cell::Bool(false)]),
            Column::new("n", nums(&[1.0, 2.0])),
        ])
        .unwrap();
        assert_eq!(infer(&ds, ChartRequest::Auto).unwrap().x, "Active");
    }
}
