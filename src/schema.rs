//! Schema introspection: column names, a numeric/categorical kind per
//! column, and the table shape. Also renders the schema for `--describe`.

use serde::Serialize;

use crate::dataset::{Cell, Column, Dataset};
use crate::error::PipelineError;

/// Inferred column kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

impl ColumnKind {
    pub fn label(&self) -> &'static str {
        match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Categorical => "categorical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
}

/// Column names and kinds of a dataset, plus its row count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schema {
    pub columns: Vec<ColumnInfo>,
    pub rows: usize,
}

impl Schema {
    pub fn kind_of(&self, name: &str) -> Option<ColumnKind> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.kind)
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn numeric_columns(&self) -> Vec<&str> {
        self.of_kind(ColumnKind::Numeric)
    }

    pub fn categorical_columns(&self) -> Vec<&str> {
        self.of_kind(ColumnKind::Categorical)
    }

    fn of_kind(&self, kind: ColumnKind) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// A column is numeric when every non-missing value is a number (or text
/// that parses as one). Everything else, booleans and dates included, is
/// categorical.
pub fn classify(column: &Column) -> ColumnKind {
    let numeric = column.values.iter().all(|cell| match cell {
        Cell::Bool(_) => false,
        Cell::Null => true,
        other => other.is_null() || other.as_number().is_some(),
    });
    if numeric { ColumnKind::Numeric } else { ColumnKind::Categorical }
}

/// Derive the schema of a dataset. Fails only when it has no columns.
pub fn introspect(dataset: &Dataset) -> Result<Schema, PipelineError> {
    if dataset.width() == 0 {
        return Err(PipelineError::EmptyDataset);
    }
    Ok(Schema {
        columns: dataset
            .columns()
            .iter()
            .map(|c| ColumnInfo { name: c.name.clone(), kind: classify(c) })
            .collect(),
        rows: dataset.height(),
    })
}

/// Render the schema description: one line per column with its kind and a
/// few sample values.
pub fn describe(dataset: &Dataset, schema: &Schema, color: bool) -> String {
    let (bold, dim, yellow, cyan, reset) = if color {
        ("\x1b[1m", "\x1b[90m", "\x1b[33m", "\x1b[36m", "\x1b[0m")
    } else {
        ("", "", "", "", "")
    };

    let mut out = String::new();
    out.push('\n');
    out.push_str(&format!(
        "  {b}columns:{r} {}  {b}rows:{r} {}\n\n",
        schema.columns.len(),
        schema.rows,
        b = bold,
        r = reset
    ));

    let max_name_len = schema.columns.iter().map(|c| c.name.len()).max().unwrap_or(4).max(6);
    out.push_str(&format!(
        "  {d}{:<4}  {:<width$}  {:<11}  sample{r}\n",
        "#",
        "column",
        "kind",
        width = max_name_len,
        d = dim,
        r = reset
    ));
    out.push_str(&format!(
        "  {d}{}  {}  {}  {}{r}\n",
        "─".repeat(4),
        "─".repeat(max_name_len),
        "─".repeat(11),
        "─".repeat(30),
        d = dim,
        r = reset
    ));

    for (i, info) in schema.columns.iter().enumerate() {
        let sample = dataset
            .column(&info.name)
            .map(|c| {
                c.values
                    .iter()
                    .filter(|v| !v.is_null())
                    .take(3)
                    .map(|v| truncate(&v.to_string(), 20))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        let kind_color = match info.kind {
            ColumnKind::Numeric => yellow,
            ColumnKind::Categorical => cyan,
        };
        out.push_str(&format!(
            "  {:<4}  {:<width$}  {}{:<11}{r}  {d}{}{r}\n",
            i + 1,
            info.name,
            kind_color,
            info.kind.label(),
            sample,
            width = max_name_len,
            d = dim,
            r = reset
        ));
    }
    out.push('\n');
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{}…", cut)
    }
}
