use crate::dataset::{Cell, Column, Dataset};
use crate::error::ExecFault;

pub(crate) type Eval<T> = Result<T, ExecFault>;

/// A one-dimensional labelled column. Positions drive arithmetic; the
/// optional index (from grouping or value counts) only travels along.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: Option<String>,
    pub values: Vec<Cell>,
    pub index: Option<Vec<Column>>,
}

impl Series {
    pub fn new(name: Option<String>, values: Vec<Cell>) -> Self {
        Series { name, values, index: None }
    }

    pub fn from_column(column: &Column) -> Self {
        Series::new(Some(column.name.clone()), column.values.clone())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Same name and index, new values.
    pub fn with_values(&self, values: Vec<Cell>) -> Series {
        Series { name: self.name.clone(), values, index: self.index.clone() }
    }

    /// Select positions, carrying the index along.
    pub fn take(&self, rows: &[usize]) -> Series {
        Series {
            name: self.name.clone(),
            values: rows.iter().map(|&i| self.values[i].clone()).collect(),
            index: self.index.as_ref().map(|cols| cols.iter().map(|c| c.take(rows)).collect()),
        }
    }

    /// Index labels (first index level), or positions when there is no index.
    pub fn labels(&self) -> Vec<Cell> {
        match self.index.as_ref().and_then(|cols| cols.first()) {
            Some(col) => col.values.clone(),
            None => (0..self.len()).map(|i| Cell::Number(i as f64)).collect(),
        }
    }

    /// Position of the first element whose label equals `key`.
    pub fn label_position(&self, key: &Cell) -> Option<usize> {
        match &self.index {
            Some(cols) => cols.first()?.values.iter().position(|c| c == key),
            None => {
                let n = key.as_number()?;
                (n >= 0.0 && n.fract() == 0.0 && (n as usize) < self.len()).then_some(n as usize)
            }
        }
    }

    /// Turn into a table: index levels become leading columns, values the last.
    pub fn into_frame(self, name: Option<String>) -> Eval<Dataset> {
        let value_name = name.or(self.name).unwrap_or_else(|| "0".to_string());
        let mut columns = self.index.unwrap_or_default();
        if columns.iter().any(|c| c.name == value_name) {
            return Err(ExecFault::runtime(format!(
                "ValueError: cannot insert {}, already exists",
                value_name
            )));
        }
        columns.push(Column::new(value_name, self.values));
        Dataset::new(columns).map_err(ExecFault::runtime)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    All,
    One(String),
    Many(Vec<String>),
}

/// A pending `df.groupby(...)`, resolved when an aggregation is called.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    pub frame: Dataset,
    pub keys: Vec<String>,
    pub selection: Selection,
    pub as_index: bool,
    pub sort: bool,
    pub dropna: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indexer {
    Loc,
    Iloc,
}

/// Every value a candidate program can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Cell),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Frame(Dataset),
    Series(Series),
    GroupBy(Box<GroupBy>),
    StrAccessor(Series),
    Indexer(Indexer, Box<Value>),
    /// The pandas capability bound to `pd`.
    Module,
    Builtin(&'static str),
    /// A method looked up but not yet called.
    Method(Box<Value>, String),
}

impl Value {
    pub fn none() -> Value {
        Value::Scalar(Cell::Null)
    }

    pub fn number(n: f64) -> Value {
        Value::Scalar(num(n))
    }

    pub fn text(s: impl Into<String>) -> Value {
        Value::Scalar(Cell::Text(s.into()))
    }

    pub fn bool(b: bool) -> Value {
        Value::Scalar(Cell::Bool(b))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::Scalar(Cell::Null))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Scalar(Cell::Number(n)) if n.fract() == 0.0 => "int",
            Value::Scalar(c) => c.type_name(),
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Frame(_) => "DataFrame",
            Value::Series(_) => "Series",
            Value::GroupBy(g) if matches!(g.selection, Selection::One(_)) => "SeriesGroupBy",
            Value::GroupBy(_) => "DataFrameGroupBy",
            Value::StrAccessor(_) => "StringMethods",
            Value::Indexer(Indexer::Loc, _) => "_LocIndexer",
            Value::Indexer(Indexer::Iloc, _) => "_iLocIndexer",
            Value::Module => "module",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(..) => "method",
        }
    }

    /// Python truth testing. Tables and columns have no single truth value.
    pub fn truthy(&self) -> Eval<bool> {
        match self {
            Value::Scalar(c) => Ok(c.is_truthy()),
            Value::List(items) | Value::Tuple(items) => Ok(!items.is_empty()),
            Value::Dict(pairs) => Ok(!pairs.is_empty()),
            Value::Frame(_) | Value::Series(_) => Err(ExecFault::runtime(format!(
                "ValueError: The truth value of a {} is ambiguous. Use a.empty, a.bool(), a.item(), a.any() or a.all().",
                self.type_name()
            ))),
            _ => Ok(true),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(Cell::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Scalar(c @ (Cell::Number(_) | Cell::Bool(_))) => c.as_number(),
            _ => None,
        }
    }

    /// An integral number, as used for counts, positions and slice bounds.
    pub fn as_int(&self) -> Option<i64> {
        self.as_number().filter(|n| n.fract() == 0.0).map(|n| n as i64)
    }

    /// Elements of a list-like value.
    pub fn items(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items.clone()),
            Value::Series(s) => Some(s.values.iter().cloned().map(Value::Scalar).collect()),
            Value::Dict(pairs) => Some(pairs.iter().map(|(k, _)| k.clone()).collect()),
            _ => None,
        }
    }

    /// A column selector: one name or a list of names.
    pub fn names(&self, what: &str) -> Eval<Vec<String>> {
        if let Some(s) = self.as_str() {
            return Ok(vec![s.to_string()]);
        }
        let items = self.items().ok_or_else(|| {
            ExecFault::runtime(format!("TypeError: {} must be a label or list of labels", what))
        })?;
        items
            .iter()
            .map(|v| match v {
                Value::Scalar(c) if !c.is_null() => Ok(c.to_string()),
                other => Err(ExecFault::runtime(format!(
                    "TypeError: {} must contain labels, not {}",
                    what,
                    other.type_name()
                ))),
            })
            .collect()
    }

    /// Python `str()` of a value.
    pub fn to_display(&self) -> String {
        match self {
            Value::Scalar(Cell::Null) => "None".to_string(),
            Value::Scalar(c) => c.to_string(),
            Value::List(items) => format!("[{}]", join_reprs(items)),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!("({})", join_reprs(items)),
            Value::Dict(pairs) => {
                let body: Vec<String> =
                    pairs.iter().map(|(k, v)| format!("{}: {}", k.repr(), v.repr())).collect();
                format!("{{{}}}", body.join(", "))
            }
            Value::Frame(ds) => ds.preview(10),
            Value::Series(s) => s.values.iter().map(Cell::to_string).collect::<Vec<_>>().join("\n"),
            Value::Module => "<module 'pandas'>".to_string(),
            Value::Builtin(name) => format!("<built-in function {}>", name),
            Value::Method(_, name) => format!("<bound method {}>", name),
            other => format!("<{} object>", other.type_name()),
        }
    }

    /// Python `repr()`: strings are quoted.
    pub fn repr(&self) -> String {
        match self {
            Value::Scalar(Cell::Text(s)) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => other.to_display(),
        }
    }
}

fn join_reprs(items: &[Value]) -> String {
    items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
}

/// Wrap a float result, mapping NaN to a missing value.
pub(crate) fn num(n: f64) -> Cell {
    if n.is_nan() { Cell::Null } else { Cell::Number(n) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_truth_value_is_ambiguous() {
        let s = Value::Series(Series::new(None, vec![Cell::Bool(true)]));
        assert!(s.truthy().unwrap_err().message.contains("ambiguous"));
        assert!(!Value::List(vec![]).truthy().unwrap());
        assert!(Value::text("x").truthy().unwrap());
    }

    #[test]
    fn series_into_frame_with_index() {
        let s = Series {
            name: Some("Sales".into()),
            values: vec![Cell::Number(3.0)],
            index: Some(vec![Column::new("State", vec![Cell::Text("CA".into())])]),
        };
        let frame = s.into_frame(None).unwrap();
        assert_eq!(frame.column_names(), vec!["State", "Sales"]);
    }

    #[test]
    fn label_lookup() {
        let s = Series {
            name: None,
            values: vec![Cell::Number(1.0), Cell::Number(2.0)],
            index: Some(vec![Column::new("k", vec![Cell::Text("a".into()), Cell::Text("b".into())])]),
        };
        assert_eq!(s.label_position(&Cell::Text("b".into())), Some(1));
        let plain = Series::new(None, vec![Cell::Null; 3]);
        assert_eq!(plain.label_position(&Cell::Number(2.0)), Some(2));
        assert_eq!(plain.label_position(&Cell::Number(3.0)), None);
    }

    #[test]
    fn names_from_selector() {
        assert_eq!(Value::text("a").names("by").unwrap(), vec!["a"]);
        let list = Value::List(vec![Value::text("a"), Value::text("b")]);
        assert_eq!(list.names("by").unwrap(), vec!["a", "b"]);
        assert!(Value::number(1.0).names("by").is_err());
    }

    #[test]
    fn reprs() {
        let v = Value::List(vec![Value::text("a"), Value::number(1.5), Value::none()]);
        assert_eq!(v.to_display(), "['a', 1.5, None]");
        assert_eq!(Value::Tuple(vec![Value::number(2.0)]).to_display(), "(2,)");
    }
}
