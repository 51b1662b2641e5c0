//! In-memory tables: the loaded dataset, the sandbox's frames, and the
//! result table handed back to the shell all share this representation.

use std::cmp::Ordering;
use std::fmt;
use std::io::{self, Write};

/// A single value. Missing values are `Null`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Null,
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Cell {
    /// Parse a raw field the way a CSV loader would see it: empty is missing,
    /// anything else stays text until the column is typed.
    pub fn from_raw(raw: &str) -> Cell {
        if raw.is_empty() { Cell::Null } else { Cell::Text(raw.to_string()) }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    /// Numeric view: numbers, booleans, and text that parses as a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) if !n.is_nan() => Some(*n),
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Cell::Text(s) => parse_number(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Null => "NoneType",
            Cell::Number(_) => "float",
            Cell::Text(_) => "str",
            Cell::Bool(_) => "bool",
        }
    }

    /// Python-style truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Cell::Null => false,
            Cell::Number(n) => *n != 0.0 && !n.is_nan(),
            Cell::Text(s) => !s.is_empty(),
            Cell::Bool(b) => *b,
        }
    }

    /// Hashable grouping key. Missing values have no key.
    pub fn key(&self) -> Option<CellKey> {
        match self {
            Cell::Null => None,
            Cell::Number(n) if n.is_nan() => None,
            Cell::Number(n) => Some(CellKey::Number((*n + 0.0).to_bits())),
            Cell::Text(s) => Some(CellKey::Text(s.clone())),
            Cell::Bool(b) => Some(CellKey::Bool(*b)),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Number(n) => f.write_str(&format_number(*n)),
            Cell::Text(s) => f.write_str(s),
            Cell::Bool(b) => f.write_str(if *b { "True" } else { "False" }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CellKey {
    Number(u64),
    Text(String),
    Bool(bool),
}

/// Order used by sorting: numbers numerically, text lexicographically, numbers
/// before text. Missing values are handled by callers (they always sort last).
pub fn compare_cells(a: &Cell, b: &Cell) -> Ordering {
    match (a, b) {
        (Cell::Text(x), Cell::Text(y)) => x.cmp(y),
        (Cell::Bool(x), Cell::Bool(y)) => x.cmp(y),
        _ => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.to_string().cmp(&b.to_string()),
        },
    }
}

/// Parse a number the way a dataframe loader would: surrounding whitespace is
/// allowed, `inf`/`nan` spellings are not treated as data.
pub fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    let first = t.as_bytes()[0];
    if !(first.is_ascii_digit() || first == b'-' || first == b'+' || first == b'.') {
        return None;
    }
    t.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Format a number for output (integer form when exact, otherwise up to 6 decimals).
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return String::new();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let s = format!("{:.6}", n);
        let s = s.trim_end_matches('0');
        let s = s.trim_end_matches('.');
        s.to_string()
    }
}

/// A named column of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Cell>) -> Self {
        Column { name: name.into(), values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Rebuild this column from a set of row positions.
    pub fn take(&self, rows: &[usize]) -> Column {
        Column {
            name: self.name.clone(),
            values: rows.iter().map(|&i| self.values[i].clone()).collect(),
        }
    }

    /// Convert text that parses as numbers into number cells, if every
    /// non-missing value does. Returns true when the column was converted.
    pub fn coerce_numeric(&mut self) -> bool {
        let all_numeric = self.values.iter().all(|c| match c {
            Cell::Null => true,
            Cell::Number(_) => true,
            Cell::Text(s) => parse_number(s).is_some(),
            Cell::Bool(_) => false,
        });
        if !all_numeric {
            return false;
        }
        for cell in &mut self.values {
            if let Cell::Text(s) = cell {
                *cell = parse_number(s).map_or(Cell::Null, Cell::Number);
            }
        }
        true
    }
}

/// An ordered, named set of equal-length columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    columns: Vec<Column>,
    height: usize,
}

impl Dataset {
    /// Build a table, checking that every column has the same length.
    pub fn new(columns: Vec<Column>) -> Result<Self, String> {
        let height = columns.first().map_or(0, Column::len);
        if let Some(bad) = columns.iter().find(|c| c.len() != height) {
            return Err(format!(
                "column '{}' has {} rows, expected {}",
                bad.name,
                bad.len(),
                height
            ));
        }
        Ok(Dataset { columns, height })
    }

    /// An empty table with `height` rows and no columns yet.
    pub fn with_height(height: usize) -> Self {
        Dataset { columns: Vec::new(), height }
    }

    /// Build a typed table from a header and raw string rows: short rows are
    /// padded with missing values, numeric columns become number cells.
    pub fn from_rows(header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let mut columns: Vec<Column> = header
            .into_iter()
            .map(|name| Column::new(name, Vec::with_capacity(rows.len())))
            .collect();
        for row in &rows {
            for (i, col) in columns.iter_mut().enumerate() {
                col.values.push(row.get(i).map_or(Cell::Null, |s| Cell::from_raw(s)));
            }
        }
        for col in &mut columns {
            col.coerce_numeric();
        }
        Dataset { height: rows.len(), columns }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn cell_count(&self) -> usize {
        self.width() * self.height
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Insert or replace a column. The column must match the table height
    /// unless the table has no columns yet.
    pub fn set_column(&mut self, column: Column) -> Result<(), String> {
        if self.columns.is_empty() && self.height == 0 {
            self.height = column.len();
        } else if column.len() != self.height {
            return Err(format!(
                "length of values ({}) does not match length of index ({})",
                column.len(),
                self.height
            ));
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    /// Select rows by position, keeping every column.
    pub fn take_rows(&self, rows: &[usize]) -> Dataset {
        Dataset {
            columns: self.columns.iter().map(|c| c.take(rows)).collect(),
            height: rows.len(),
        }
    }

    pub fn head(&self, n: usize) -> Dataset {
        let rows: Vec<usize> = (0..self.height.min(n)).collect();
        self.take_rows(&rows)
    }

    pub fn row(&self, idx: usize) -> Vec<&Cell> {
        self.columns.iter().map(|c| &c.values[idx]).collect()
    }

    /// Write the table as RFC 4180 CSV with a header row.
    pub fn write_csv(&self, out: &mut dyn Write) -> io::Result<()> {
        let header: Vec<String> = self.columns.iter().map(|c| csv_quote(&c.name)).collect();
        writeln!(out, "{}", header.join(","))?;
        for r in 0..self.height {
            let fields: Vec<String> = self
                .columns
                .iter()
                .map(|c| csv_quote(&c.values[r].to_string()))
                .collect();
            writeln!(out, "{}", fields.join(","))?;
        }
        Ok(())
    }

    pub fn to_csv_string(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_csv(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Render the first `limit` rows as an aligned text table.
    pub fn preview(&self, limit: usize) -> String {
        let shown = self.height.min(limit);
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.name.chars().count()).collect();
        let cells: Vec<Vec<String>> = (0..shown)
            .map(|r| {
                self.columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| {
                        let s = truncate(&c.values[r].to_string(), 30);
                        widths[i] = widths[i].max(s.chars().count());
                        s
                    })
                    .collect()
            })
            .collect();

        let mut out = String::new();
        let header: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<w$}", c.name, w = widths[i]))
            .collect();
        out.push_str(header.join("  ").trim_end());
        out.push('\n');
        let rule: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
        out.push_str(&rule.join("  "));
        out.push('\n');
        for row in &cells {
            let line: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(i, s)| format!("{:<w$}", s, w = widths[i]))
                .collect();
            out.push_str(line.join("  ").trim_end());
            out.push('\n');
        }
        if self.height > shown {
            out.push_str(&format!("… {} more rows\n", self.height - shown));
        }
        out
    }
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    #[test]
    fn from_rows_types_numeric_columns() {
        let ds = Dataset::from_rows(
            vec!["State".into(), "Sales".into()],
            vec![vec!["CA".into(), "10.5".into()], vec!["NY".into(), "".into()]],
        );
        assert_eq!(ds.height(), 2);
        assert_eq!(ds.columns()[0].values, vec![text("CA"), text("NY")]);
        assert_eq!(ds.columns()[1].values, vec![Cell::Number(10.5), Cell::Null]);
    }

    #[test]
    fn from_rows_pads_short_rows() {
        let ds = Dataset::from_rows(vec!["a".into(), "b".into()], vec![vec!["x".into()]]);
        assert_eq!(ds.columns()[1].values, vec![Cell::Null]);
    }

    #[test]
    fn new_rejects_ragged_columns() {
        let err = Dataset::new(vec![
            Column::new("a", vec![Cell::Null]),
            Column::new("b", vec![]),
        ])
        .unwrap_err();
        assert!(err.contains("'b'"));
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(1.0 / 3.0), "0.333333");
        assert_eq!(format_number(f64::INFINITY), "inf");
    }

    #[test]
    fn parse_number_rejects_words() {
        assert_eq!(parse_number(" 42 "), Some(42.0));
        assert_eq!(parse_number("nan"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("2024-01-05"), None);
    }

    #[test]
    fn csv_output_quotes_when_needed() {
        let ds = Dataset::new(vec![
            Column::new("name", vec![text("a,b"), text("say \"hi\"")]),
            Column::new("n", vec![Cell::Number(1.0), Cell::Null]),
        ])
        .unwrap();
        assert_eq!(ds.to_csv_string(), "name,n\n\"a,b\",1\n\"say \"\"hi\"\"\",\n");
    }

    #[test]
    fn compare_orders_numbers_before_text() {
        assert_eq!(compare_cells(&Cell::Number(2.0), &Cell::Number(10.0)), Ordering::Less);
        assert_eq!(compare_cells(&text("b"), &text("a")), Ordering::Greater);
        assert_eq!(compare_cells(&Cell::Number(1.0), &text("a")), Ordering::Less);
    }

    #[test]
    fn preview_truncates_rows() {
        let ds = Dataset::new(vec![Column::new("x", (0..8).map(|i| Cell::Number(i as f64)).collect())])
            .unwrap();
        let out = ds.preview(5);
        assert!(out.starts_with("x\n"));
        assert!(out.ends_with("… 3 more rows\n"));
    }
}
