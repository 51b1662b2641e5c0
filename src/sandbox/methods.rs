//! Builtins, Series methods, the `str` accessor and the `pd` functions.

use std::cmp::Ordering;

use regex::Regex;
use rustc_hash::FxHashMap;

use crate::analyze;
use crate::dataset::{Cell, CellKey, Column, Dataset, compare_cells, parse_number};
use crate::error::{ExecFault, Resource};

use super::eval::{no_attribute, values_equal};
use super::value::{Eval, Series, Value, num};
use super::{Executor, cell_weight, series_weight, weight};

pub(crate) const SERIES_METHODS: &[&str] = &[
    "sum", "mean", "median", "min", "max", "count", "nunique", "std", "any", "all", "head",
    "tail", "sort_values", "nlargest", "nsmallest", "value_counts", "unique", "reset_index",
    "to_frame", "isin", "between", "isna", "isnull", "notna", "notnull", "fillna", "dropna",
    "astype", "round", "abs", "cumsum", "tolist", "to_list", "copy", "rename", "idxmax", "idxmin",
];

pub(crate) const STR_METHODS: &[&str] = &[
    "contains", "startswith", "endswith", "lower", "upper", "strip", "lstrip", "rstrip", "title",
    "len", "replace",
];

/// Methods on plain Python strings.
pub(crate) const TEXT_METHODS: &[&str] = &[
    "startswith", "endswith", "lower", "upper", "strip", "lstrip", "rstrip", "title", "replace",
];

pub(crate) const GROUPBY_METHODS: &[&str] = &[
    "sum", "mean", "median", "min", "max", "count", "nunique", "size", "std", "first", "last",
    "agg", "aggregate",
];

pub(crate) const PD_FUNCTIONS: &[&str] = &[
    "to_numeric", "DataFrame", "Series", "concat", "isna", "isnull", "notna", "notnull",
];

pub(crate) const CONTAINER_METHODS: &[&str] = &["tolist", "copy", "index", "count", "get", "keys", "values", "items"];

// ── Argument binding ────────────────────────────────────────────

/// Evaluated call arguments, consumed as a method binds its parameters.
#[derive(Debug)]
pub(crate) struct Args {
    func: String,
    positional: Vec<Option<Value>>,
    kwargs: Vec<(String, Value)>,
}

impl Args {
    pub(crate) fn new(func: &str, positional: Vec<Value>, kwargs: Vec<(String, Value)>) -> Self {
        Args {
            func: func.to_string(),
            positional: positional.into_iter().map(Some).collect(),
            kwargs,
        }
    }

    pub(crate) fn take_kwarg(&mut self, name: &str) -> Option<Value> {
        let pos = self.kwargs.iter().position(|(k, _)| k == name)?;
        Some(self.kwargs.remove(pos).1)
    }

    /// Parameter `name` at position `pos`, passed either way. `None` counts as absent.
    pub(crate) fn get(&mut self, pos: usize, name: &str) -> Option<Value> {
        let value = match self.positional.get_mut(pos).and_then(Option::take) {
            Some(v) => Some(v),
            None => self.take_kwarg(name),
        };
        value.filter(|v| !v.is_none())
    }

    pub(crate) fn require(&mut self, pos: usize, name: &str) -> Eval<Value> {
        self.get(pos, name).ok_or_else(|| {
            ExecFault::runtime(format!(
                "TypeError: {}() missing required argument: '{}'",
                self.func, name
            ))
        })
    }

    pub(crate) fn int_or(&mut self, pos: usize, name: &str, default: i64) -> Eval<i64> {
        match self.get(pos, name) {
            None => Ok(default),
            Some(v) => v.as_int().ok_or_else(|| self.type_error(name, "an integer", &v)),
        }
    }

    pub(crate) fn bool_or(&mut self, pos: usize, name: &str, default: bool) -> Eval<bool> {
        match self.get(pos, name) {
            None => Ok(default),
            Some(v) => v.truthy(),
        }
    }

    pub(crate) fn str_opt(&mut self, pos: usize, name: &str) -> Eval<Option<String>> {
        match self.get(pos, name) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(|s| Some(s.to_string()))
                .ok_or_else(|| self.type_error(name, "a string", &v)),
        }
    }

    pub(crate) fn names_opt(&mut self, pos: usize, name: &str) -> Eval<Option<Vec<String>>> {
        self.get(pos, name).map(|v| v.names(name)).transpose()
    }

    /// Accept and drop keyword arguments that do not change the result here.
    pub(crate) fn ignore(&mut self, names: &[&str]) {
        self.kwargs.retain(|(k, _)| !names.contains(&k.as_str()));
    }

    /// Remaining positional arguments, in order.
    pub(crate) fn rest(&mut self) -> Vec<Value> {
        self.positional.iter_mut().filter_map(Option::take).collect()
    }

    pub(crate) fn kwargs(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.kwargs)
    }

    /// Fail on anything the method did not bind.
    pub(crate) fn finish(self) -> Eval<()> {
        if self.positional.iter().any(Option::is_some) {
            return Err(ExecFault::runtime(format!(
                "TypeError: {}() takes {} positional arguments but {} were given",
                self.func,
                self.positional.iter().filter(|p| p.is_none()).count(),
                self.positional.len()
            )));
        }
        if let Some((k, _)) = self.kwargs.first() {
            return Err(ExecFault::runtime(format!(
                "TypeError: {}() got an unexpected keyword argument '{}'",
                self.func, k
            )));
        }
        Ok(())
    }

    fn type_error(&self, name: &str, expected: &str, got: &Value) -> ExecFault {
        ExecFault::runtime(format!(
            "TypeError: {}() argument '{}' must be {}, not {}",
            self.func,
            name,
            expected,
            got.type_name()
        ))
    }
}

// ── Aggregation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AggFunc {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Count,
    Nunique,
    Std,
    First,
    Last,
    Size,
}

impl AggFunc {
    pub(crate) fn parse(name: &str) -> Option<AggFunc> {
        Some(match name {
            "sum" => AggFunc::Sum,
            "mean" => AggFunc::Mean,
            "median" => AggFunc::Median,
            "min" => AggFunc::Min,
            "max" => AggFunc::Max,
            "count" => AggFunc::Count,
            "nunique" => AggFunc::Nunique,
            "std" => AggFunc::Std,
            "first" => AggFunc::First,
            "last" => AggFunc::Last,
            "size" => AggFunc::Size,
            _ => return None,
        })
    }

    /// Aggregations that only make sense over numbers. Frame-wide calls skip
    /// the columns they cannot handle.
    pub(crate) fn is_numeric(self) -> bool {
        matches!(self, AggFunc::Mean | AggFunc::Median | AggFunc::Std | AggFunc::Sum)
    }
}

/// True when every present value is a number or boolean.
pub(crate) fn is_numeric_cells(cells: &[Cell]) -> bool {
    cells.iter().all(|c| !matches!(c, Cell::Text(_)))
}

fn numbers(cells: &[Cell], what: &str) -> Eval<Vec<f64>> {
    let mut out = Vec::with_capacity(cells.len());
    for c in cells {
        match c {
            Cell::Text(s) => {
                return Err(ExecFault::runtime(format!(
                    "TypeError: Could not convert '{}' to numeric for {}",
                    s, what
                )));
            }
            other => {
                if let Some(n) = other.as_number() {
                    out.push(n);
                }
            }
        }
    }
    Ok(out)
}

pub(crate) fn aggregate(func: AggFunc, cells: &[Cell]) -> Eval<Cell> {
    let present = || cells.iter().filter(|c| !c.is_null());
    Ok(match func {
        AggFunc::Size => Cell::Number(cells.len() as f64),
        AggFunc::Count => Cell::Number(present().count() as f64),
        AggFunc::Nunique => {
            let mut seen: FxHashMap<CellKey, ()> = FxHashMap::default();
            for c in present() {
                if let Some(k) = c.key() {
                    seen.insert(k, ());
                }
            }
            Cell::Number(seen.len() as f64)
        }
        AggFunc::First => present().next().cloned().unwrap_or_default(),
        AggFunc::Last => present().last().cloned().unwrap_or_default(),
        AggFunc::Min | AggFunc::Max => {
            let mut best: Option<&Cell> = None;
            for c in present() {
                best = Some(match best {
                    None => c,
                    Some(b) => {
                        let ord = ordered(b, c)?;
                        let take_new = if func == AggFunc::Min { ord == Ordering::Greater } else { ord == Ordering::Less };
                        if take_new { c } else { b }
                    }
                });
            }
            best.cloned().unwrap_or_default()
        }
        AggFunc::Sum => {
            if present().next().is_some() && present().all(|c| matches!(c, Cell::Text(_))) {
                Cell::Text(present().map(Cell::to_string).collect())
            } else {
                Cell::Number(numbers(cells, "sum")?.iter().sum())
            }
        }
        AggFunc::Mean => {
            let xs = numbers(cells, "mean")?;
            if xs.is_empty() { Cell::Null } else { num(xs.iter().sum::<f64>() / xs.len() as f64) }
        }
        AggFunc::Median => {
            let mut xs = numbers(cells, "median")?;
            if xs.is_empty() {
                Cell::Null
            } else {
                xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
                let mid = xs.len() / 2;
                num(if xs.len() % 2 == 0 { (xs[mid - 1] + xs[mid]) / 2.0 } else { xs[mid] })
            }
        }
        AggFunc::Std => {
            let xs = numbers(cells, "std")?;
            if xs.len() < 2 {
                Cell::Null
            } else {
                let mean = xs.iter().sum::<f64>() / xs.len() as f64;
                let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
                num(var.sqrt())
            }
        }
    })
}

/// Order two present values; numbers and text do not mix.
pub(crate) fn ordered(a: &Cell, b: &Cell) -> Eval<Ordering> {
    let comparable = matches!(
        (a, b),
        (Cell::Text(_), Cell::Text(_))
            | (Cell::Number(_) | Cell::Bool(_), Cell::Number(_) | Cell::Bool(_))
    );
    if !comparable {
        return Err(ExecFault::runtime(format!(
            "TypeError: '<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        )));
    }
    Ok(compare_cells(a, b))
}

/// Stable row order by several keys; missing values sort last unless `na_first`.
pub(crate) fn sort_order(keys: &[&[Cell]], ascending: &[bool], na_first: bool, len: usize) -> Eval<Vec<usize>> {
    for key in keys {
        let mut kinds = key.iter().filter(|c| !c.is_null());
        if let Some(first) = kinds.next() {
            for c in kinds {
                ordered(first, c)?;
            }
        }
    }
    let mut rows: Vec<usize> = (0..len).collect();
    rows.sort_by(|&a, &b| {
        for (key, asc) in keys.iter().zip(ascending) {
            let (x, y) = (&key[a], &key[b]);
            let ord = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => if na_first { Ordering::Less } else { Ordering::Greater },
                (false, true) => if na_first { Ordering::Greater } else { Ordering::Less },
                (false, false) => {
                    let o = compare_cells(x, y);
                    if *asc { o } else { o.reverse() }
                }
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(rows)
}

/// Positions of the `n` largest (or smallest) present numeric values, ties
/// kept in original order.
pub(crate) fn top_n(cells: &[Cell], n: i64, largest: bool, method: &str) -> Eval<Vec<usize>> {
    if !is_numeric_cells(cells) {
        return Err(ExecFault::runtime(format!(
            "TypeError: Cannot use method '{}' with dtype object",
            method
        )));
    }
    let order = sort_order(&[cells], &[!largest], false, cells.len())?;
    Ok(order
        .into_iter()
        .filter(|&i| !cells[i].is_null())
        .take(n.max(0) as usize)
        .collect())
}

/// Round half to even, as both Python and pandas do.
pub(crate) fn round_half_even(x: f64, decimals: i32) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let m = 10f64.powi(decimals);
    let y = x * m;
    let r = y.round();
    let r = if (y - y.trunc()).abs() == 0.5 { 2.0 * (y / 2.0).round() } else { r };
    r / m
}

/// Broadcast a value to a column of `len` cells.
pub(crate) fn to_cells(value: Value, len: usize) -> Eval<Vec<Cell>> {
    let mismatch = |got: usize| {
        ExecFault::runtime(format!(
            "ValueError: Length of values ({}) does not match length of index ({})",
            got, len
        ))
    };
    match value {
        Value::Scalar(c) => Ok(vec![c; len]),
        Value::Series(s) => {
            if s.len() != len {
                return Err(mismatch(s.len()));
            }
            Ok(s.values)
        }
        Value::List(items) | Value::Tuple(items) => {
            if items.len() != len {
                return Err(mismatch(items.len()));
            }
            items.into_iter().map(scalar_cell).collect()
        }
        other => Err(ExecFault::runtime(format!(
            "TypeError: cannot use a {} as column values",
            other.type_name()
        ))),
    }
}

pub(crate) fn scalar_cell(value: Value) -> Eval<Cell> {
    match value {
        Value::Scalar(c) => Ok(c),
        other => Err(ExecFault::runtime(format!(
            "TypeError: expected a scalar value, got {}",
            other.type_name()
        ))),
    }
}

// ── String operations ───────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Side {
    Both,
    Left,
    Right,
}

/// One string transformation, bound once and applied per value.
enum StrOp {
    Contains { re: Option<Regex>, needle: String, case: bool },
    StartsWith(Vec<String>),
    EndsWith(Vec<String>),
    Lower,
    Upper,
    Title,
    Strip(Option<String>, Side),
    Len,
    Replace { re: Option<Regex>, pat: String, repl: String, count: Option<usize> },
}

impl StrOp {
    fn apply(&self, s: &str) -> Cell {
        match self {
            StrOp::Contains { re: Some(re), .. } => Cell::Bool(re.is_match(s)),
            StrOp::Contains { re: None, needle, case } => Cell::Bool(if *case {
                s.contains(needle.as_str())
            } else {
                s.to_lowercase().contains(&needle.to_lowercase())
            }),
            StrOp::StartsWith(prefixes) => Cell::Bool(prefixes.iter().any(|p| s.starts_with(p.as_str()))),
            StrOp::EndsWith(suffixes) => Cell::Bool(suffixes.iter().any(|p| s.ends_with(p.as_str()))),
            StrOp::Lower => Cell::Text(s.to_lowercase()),
            StrOp::Upper => Cell::Text(s.to_uppercase()),
            StrOp::Title => Cell::Text(title_case(s)),
            StrOp::Strip(chars, side) => {
                let is_strip = |c: char| match chars {
                    Some(set) => set.contains(c),
                    None => c.is_whitespace(),
                };
                Cell::Text(match side {
                    Side::Both => s.trim_matches(is_strip),
                    Side::Left => s.trim_start_matches(is_strip),
                    Side::Right => s.trim_end_matches(is_strip),
                }
                .to_string())
            }
            StrOp::Len => Cell::Number(s.chars().count() as f64),
            StrOp::Replace { re: Some(re), repl, count, .. } => {
                Cell::Text(re.replacen(s, count.unwrap_or(0), repl.as_str()).into_owned())
            }
            StrOp::Replace { re: None, pat, repl, count } => Cell::Text(match count {
                Some(n) => s.replacen(pat.as_str(), repl, *n),
                None => s.replace(pat.as_str(), repl),
            }),
        }
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

/// Python replacement templates (`\1`, `\g<name>`) in regex-crate syntax.
fn regex_template(repl: &str) -> String {
    let mut out = String::with_capacity(repl.len());
    let mut chars = repl.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' if chars.peek().is_some_and(char::is_ascii_digit) => {
                let mut group = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    group.push(d);
                    chars.next();
                }
                out.push_str(&format!("${{{}}}", group));
            }
            '\\' if chars.peek() == Some(&'g') => {
                chars.next();
                if chars.peek() == Some(&'<') {
                    chars.next();
                    let group: String = chars.by_ref().take_while(|&c| c != '>').collect();
                    out.push_str(&format!("${{{}}}", group));
                } else {
                    out.push_str("\\g");
                }
            }
            other => out.push(other),
        }
    }
    out
}

impl<'a> Executor<'a> {
    pub(crate) fn call_method(&mut self, receiver: Value, name: &str, args: Args) -> Eval<Value> {
        if analyze::is_forbidden_attr(name) {
            return Err(ExecFault::containment(format!("access to attribute '{}' is not allowed", name)));
        }
        match receiver {
            Value::Frame(ds) => self.frame_method(ds, name, args),
            Value::Series(s) => self.series_method(s, name, args),
            Value::GroupBy(g) => self.groupby_method(*g, name, args),
            Value::StrAccessor(s) => self.str_method(s, name, args),
            Value::Module => self.pd_function(name, args),
            Value::Scalar(Cell::Text(text)) => self.text_method(&text, name, args),
            Value::List(items) => list_method(items, name, args),
            Value::Dict(pairs) => dict_method(pairs, name, args),
            other => Err(no_attribute(other.type_name(), name)),
        }
    }

    // ── Builtins ────────────────────────────────────────────────

    pub(crate) fn call_builtin(&mut self, name: &str, mut args: Args) -> Eval<Value> {
        match name {
            "len" => {
                let value = args.require(0, "obj")?;
                args.finish()?;
                let n = match &value {
                    Value::Scalar(Cell::Text(s)) => s.chars().count(),
                    Value::List(items) | Value::Tuple(items) => items.len(),
                    Value::Dict(pairs) => pairs.len(),
                    Value::Frame(ds) => ds.height(),
                    Value::Series(s) => s.len(),
                    other => {
                        return Err(ExecFault::runtime(format!(
                            "TypeError: object of type '{}' has no len()",
                            other.type_name()
                        )));
                    }
                };
                Ok(Value::number(n as f64))
            }
            "abs" => {
                let value = args.require(0, "x")?;
                args.finish()?;
                match value {
                    Value::Series(s) => self.series_method(s, "abs", Args::new("abs", vec![], vec![])),
                    Value::Scalar(c @ (Cell::Number(_) | Cell::Bool(_))) => {
                        Ok(Value::number(c.as_number().unwrap_or(f64::NAN).abs()))
                    }
                    other => Err(ExecFault::runtime(format!(
                        "TypeError: bad operand type for abs(): '{}'",
                        other.type_name()
                    ))),
                }
            }
            "round" => {
                let value = args.require(0, "number")?;
                let digits = args.int_or(1, "ndigits", 0)?;
                args.finish()?;
                match value {
                    Value::Series(s) => {
                        let values = s.values.iter().map(|c| round_cell(c, digits as i32)).collect();
                        Ok(Value::Series(s.with_values(values)))
                    }
                    Value::Scalar(c @ (Cell::Number(_) | Cell::Bool(_))) => {
                        Ok(Value::Scalar(round_cell(&c, digits as i32)))
                    }
                    other => Err(ExecFault::runtime(format!(
                        "TypeError: type {} doesn't define __round__ method",
                        other.type_name()
                    ))),
                }
            }
            "min" | "max" => {
                let mut items = args.rest();
                args.ignore(&["key"]);
                let default = args.take_kwarg("default");
                args.finish()?;
                if items.len() == 1 {
                    let only = items.remove(0);
                    items = only.items().ok_or_else(|| {
                        ExecFault::runtime(format!("TypeError: '{}' object is not iterable", only.type_name()))
                    })?;
                }
                let mut best: Option<Cell> = None;
                for item in items {
                    let c = scalar_cell(item)?;
                    best = Some(match best {
                        None => c,
                        Some(b) => {
                            let ord = ordered(&b, &c)?;
                            let take = if name == "min" { ord == Ordering::Greater } else { ord == Ordering::Less };
                            if take { c } else { b }
                        }
                    });
                }
                match (best, default) {
                    (Some(c), _) => Ok(Value::Scalar(c)),
                    (None, Some(d)) => Ok(d),
                    (None, None) => Err(ExecFault::runtime(format!("ValueError: {}() arg is an empty sequence", name))),
                }
            }
            "sum" => {
                let iterable = args.require(0, "iterable")?;
                let start = args.get(1, "start").and_then(|v| v.as_number()).unwrap_or(0.0);
                args.finish()?;
                let items = iterable.items().ok_or_else(|| {
                    ExecFault::runtime(format!("TypeError: '{}' object is not iterable", iterable.type_name()))
                })?;
                let mut total = start;
                for item in items {
                    total += item.as_number().ok_or_else(|| {
                        ExecFault::runtime(format!(
                            "TypeError: unsupported operand type(s) for +: 'int' and '{}'",
                            item.type_name()
                        ))
                    })?;
                }
                Ok(Value::number(total))
            }
            "int" | "float" => {
                let value = args.get(0, "x");
                args.finish()?;
                let Some(value) = value else { return Ok(Value::number(0.0)) };
                let n = match &value {
                    Value::Scalar(Cell::Number(n)) => *n,
                    Value::Scalar(Cell::Bool(b)) => f64::from(u8::from(*b)),
                    Value::Scalar(Cell::Text(s)) => parse_python_number(s, name == "int").ok_or_else(|| {
                        ExecFault::runtime(if name == "int" {
                            format!("ValueError: invalid literal for int() with base 10: {}", value.repr())
                        } else {
                            format!("ValueError: could not convert string to float: {}", value.repr())
                        })
                    })?,
                    other => {
                        return Err(ExecFault::runtime(format!(
                            "TypeError: {}() argument must be a string or a number, not '{}'",
                            name,
                            other.type_name()
                        )));
                    }
                };
                Ok(Value::number(if name == "int" { n.trunc() } else { n }))
            }
            "str" => {
                let value = args.get(0, "object");
                args.finish()?;
                Ok(Value::text(value.map_or_else(String::new, |v| v.to_display())))
            }
            "bool" => {
                let value = args.get(0, "x");
                args.finish()?;
                Ok(Value::bool(match value {
                    Some(v) => v.truthy()?,
                    None => false,
                }))
            }
            "list" => {
                let value = args.get(0, "iterable");
                args.finish()?;
                let Some(value) = value else { return Ok(Value::List(Vec::new())) };
                Ok(Value::List(iterate(&value)?))
            }
            "sorted" => {
                let value = args.require(0, "iterable")?;
                let reverse = args.bool_or(1, "reverse", false)?;
                args.finish()?;
                let mut cells = iterate(&value)?.into_iter().map(scalar_cell).collect::<Eval<Vec<_>>>()?;
                let order = sort_order(&[cells.as_slice()], &[!reverse], false, cells.len())?;
                cells = order.into_iter().map(|i| cells[i].clone()).collect();
                Ok(Value::List(cells.into_iter().map(Value::Scalar).collect()))
            }
            other => Err(ExecFault::runtime(format!("NameError: name '{}' is not defined", other))),
        }
    }

    // ── Series ──────────────────────────────────────────────────

    pub(crate) fn series_method(&mut self, s: Series, name: &str, mut args: Args) -> Eval<Value> {
        if let Some(func) = AggFunc::parse(name).filter(|f| *f != AggFunc::Size) {
            args.ignore(&["skipna", "numeric_only", "ddof", "dropna"]);
            args.finish()?;
            return aggregate(func, &s.values).map(Value::Scalar);
        }
        match name {
            "any" | "all" => {
                args.ignore(&["skipna"]);
                args.finish()?;
                let mut present = s.values.iter().filter(|c| !c.is_null());
                Ok(Value::bool(if name == "any" {
                    present.any(Cell::is_truthy)
                } else {
                    present.all(Cell::is_truthy)
                }))
            }
            "head" | "tail" => {
                let n = args.int_or(0, "n", 5)?;
                args.finish()?;
                Ok(Value::Series(s.take(&head_tail(s.len(), n, name == "head"))))
            }
            "sort_values" => {
                let ascending = args.bool_or(0, "ascending", true)?;
                let na_first = args.str_opt(99, "na_position")?.as_deref() == Some("first");
                args.ignore(&["kind", "ignore_index", "axis"]);
                args.finish()?;
                let order = sort_order(&[s.values.as_slice()], &[ascending], na_first, s.len())?;
                Ok(Value::Series(s.take(&order)))
            }
            "nlargest" | "nsmallest" => {
                let n = args.int_or(0, "n", 5)?;
                args.ignore(&["keep"]);
                args.finish()?;
                let rows = top_n(&s.values, n, name == "nlargest", name)?;
                Ok(Value::Series(s.take(&rows)))
            }
            "value_counts" => {
                let normalize = args.bool_or(0, "normalize", false)?;
                let sort = args.bool_or(1, "sort", true)?;
                let ascending = args.bool_or(2, "ascending", false)?;
                let dropna = args.bool_or(4, "dropna", true)?;
                args.finish()?;
                Ok(Value::Series(value_counts(&s, normalize, sort, ascending, dropna)))
            }
            "unique" => {
                args.finish()?;
                let mut seen: FxHashMap<Option<CellKey>, ()> = FxHashMap::default();
                let mut out = Vec::new();
                for c in &s.values {
                    if seen.insert(c.key(), ()).is_none() {
                        out.push(Value::Scalar(c.clone()));
                    }
                }
                Ok(Value::List(out))
            }
            "reset_index" => {
                let drop = args.bool_or(99, "drop", false)?;
                let value_name = args.str_opt(99, "name")?;
                args.finish()?;
                if drop {
                    return Ok(Value::Series(Series::new(s.name, s.values)));
                }
                let mut s = s;
                if s.index.is_none() {
                    let positions = (0..s.len()).map(|i| Cell::Number(i as f64)).collect();
                    s.index = Some(vec![Column::new("index", positions)]);
                }
                Ok(Value::Frame(s.into_frame(value_name)?))
            }
            "to_frame" => {
                let value_name = args.str_opt(0, "name")?;
                args.finish()?;
                Ok(Value::Frame(s.into_frame(value_name)?))
            }
            "isin" => {
                let values = args.require(0, "values")?;
                args.finish()?;
                let pool = values.items().ok_or_else(|| {
                    ExecFault::runtime(format!(
                        "TypeError: only list-like objects are allowed to be passed to isin(), you passed a '{}'",
                        values.type_name()
                    ))
                })?;
                let out = s
                    .values
                    .iter()
                    .map(|c| Cell::Bool(!c.is_null() && pool.iter().any(|v| values_equal(v, &Value::Scalar(c.clone())))))
                    .collect();
                Ok(Value::Series(s.with_values(out)))
            }
            "between" => {
                let left = scalar_cell(args.require(0, "left")?)?;
                let right = scalar_cell(args.require(1, "right")?)?;
                let inclusive = args.str_opt(2, "inclusive")?.unwrap_or_else(|| "both".to_string());
                args.finish()?;
                let (lo_closed, hi_closed) = match inclusive.as_str() {
                    "both" => (true, true),
                    "neither" => (false, false),
                    "left" => (true, false),
                    "right" => (false, true),
                    other => {
                        return Err(ExecFault::runtime(format!(
                            "ValueError: Inclusive has to be either string of 'both','left', 'right', or 'neither', got {}",
                            other
                        )));
                    }
                };
                let mut out = Vec::with_capacity(s.len());
                for c in &s.values {
                    if c.is_null() {
                        out.push(Cell::Bool(false));
                        continue;
                    }
                    let lo = ordered(&left, c)?;
                    let hi = ordered(c, &right)?;
                    let above = lo == Ordering::Less || (lo_closed && lo == Ordering::Equal);
                    let below = hi == Ordering::Less || (hi_closed && hi == Ordering::Equal);
                    out.push(Cell::Bool(above && below));
                }
                Ok(Value::Series(s.with_values(out)))
            }
            "isna" | "isnull" | "notna" | "notnull" => {
                args.finish()?;
                let want_null = name.starts_with("is");
                let out = s.values.iter().map(|c| Cell::Bool(c.is_null() == want_null)).collect();
                Ok(Value::Series(s.with_values(out)))
            }
            "fillna" => {
                let fill = scalar_cell(args.require(0, "value")?)?;
                args.finish()?;
                let nulls = s.values.iter().filter(|c| c.is_null()).count();
                self.check_cells(series_weight(&s).saturating_add(nulls.saturating_mul(cell_weight(&fill))))?;
                let out = s.values.iter().map(|c| if c.is_null() { fill.clone() } else { c.clone() }).collect();
                Ok(Value::Series(s.with_values(out)))
            }
            "dropna" => {
                args.finish()?;
                let rows: Vec<usize> = (0..s.len()).filter(|&i| !s.values[i].is_null()).collect();
                Ok(Value::Series(s.take(&rows)))
            }
            "astype" => {
                let dtype = args.require(0, "dtype")?;
                args.ignore(&["errors", "copy"]);
                args.finish()?;
                let dtype = match &dtype {
                    Value::Builtin(b) => b.to_string(),
                    other => other.as_str().map(str::to_string).ok_or_else(|| {
                        ExecFault::runtime(format!("TypeError: data type '{}' not understood", other.to_display()))
                    })?,
                };
                let out = s.values.iter().map(|c| cast(c, &dtype)).collect::<Eval<Vec<_>>>()?;
                Ok(Value::Series(s.with_values(out)))
            }
            "round" => {
                let digits = args.int_or(0, "decimals", 0)?;
                args.finish()?;
                let out = s.values.iter().map(|c| round_cell(c, digits as i32)).collect();
                Ok(Value::Series(s.with_values(out)))
            }
            "abs" => {
                args.finish()?;
                let out = s
                    .values
                    .iter()
                    .map(|c| match c {
                        Cell::Null => Ok(Cell::Null),
                        Cell::Number(_) | Cell::Bool(_) => Ok(num(c.as_number().unwrap_or(f64::NAN).abs())),
                        Cell::Text(_) => Err(ExecFault::runtime("TypeError: bad operand type for abs(): 'str'")),
                    })
                    .collect::<Eval<Vec<_>>>()?;
                Ok(Value::Series(s.with_values(out)))
            }
            "cumsum" => {
                args.ignore(&["skipna"]);
                args.finish()?;
                numbers(&s.values, "cumsum")?;
                let mut total = 0.0;
                let out = s
                    .values
                    .iter()
                    .map(|c| match c.as_number() {
                        Some(n) => {
                            total += n;
                            Cell::Number(total)
                        }
                        None => Cell::Null,
                    })
                    .collect();
                Ok(Value::Series(s.with_values(out)))
            }
            "tolist" | "to_list" => {
                args.finish()?;
                Ok(Value::List(s.values.into_iter().map(Value::Scalar).collect()))
            }
            "copy" => {
                args.ignore(&["deep"]);
                args.finish()?;
                Ok(Value::Series(s))
            }
            "rename" => {
                let new_name = args.get(0, "index");
                args.finish()?;
                let mut s = s;
                s.name = match new_name {
                    None => None,
                    Some(Value::Scalar(c)) => Some(c.to_string()),
                    Some(other) => {
                        return Err(ExecFault::runtime(format!(
                            "TypeError: Series.rename() expects a scalar name, got {}",
                            other.type_name()
                        )));
                    }
                };
                Ok(Value::Series(s))
            }
            "idxmax" | "idxmin" => {
                args.ignore(&["skipna"]);
                args.finish()?;
                let rows = top_n(&s.values, 1, name == "idxmax", name)?;
                let pos = rows.first().copied().ok_or_else(|| {
                    ExecFault::runtime(format!("ValueError: attempt to get {} of an empty sequence", &name[3..]))
                })?;
                Ok(Value::Scalar(s.labels()[pos].clone()))
            }
            _ => Err(no_attribute("Series", name)),
        }
    }

    // ── str accessor ────────────────────────────────────────────

    fn str_op(&mut self, name: &str, args: &mut Args, regex_default: bool) -> Eval<StrOp> {
        Ok(match name {
            "contains" => {
                let pat = args.str_opt(0, "pat")?.unwrap_or_default();
                let case = args.bool_or(1, "case", true)?;
                args.ignore(&["flags"]);
                let regex = args.bool_or(4, "regex", true)?;
                let re = if regex {
                    let pattern = if case { pat.clone() } else { format!("(?i){}", pat) };
                    Some(self.regex(&pattern)?.clone())
                } else {
                    None
                };
                StrOp::Contains { re, needle: pat, case }
            }
            "startswith" | "endswith" => {
                let pat = args.require(0, "pat")?;
                let pats = match &pat {
                    Value::Tuple(_) | Value::List(_) => pat.names("pat")?,
                    other => vec![other.as_str().map(str::to_string).ok_or_else(|| {
                        ExecFault::runtime(format!(
                            "TypeError: expected a string or tuple, not {}",
                            other.type_name()
                        ))
                    })?],
                };
                if name == "startswith" { StrOp::StartsWith(pats) } else { StrOp::EndsWith(pats) }
            }
            "lower" => StrOp::Lower,
            "upper" => StrOp::Upper,
            "title" => StrOp::Title,
            "len" => StrOp::Len,
            "strip" | "lstrip" | "rstrip" => {
                let chars = args.str_opt(0, "to_strip")?;
                let side = match name {
                    "lstrip" => Side::Left,
                    "rstrip" => Side::Right,
                    _ => Side::Both,
                };
                StrOp::Strip(chars, side)
            }
            "replace" => {
                let pat = args.str_opt(0, "pat")?.unwrap_or_default();
                let repl = args.str_opt(1, "repl")?.unwrap_or_default();
                let n = args.int_or(2, "n", -1)?;
                let count = (n >= 0).then_some(n as usize);
                let case = args.bool_or(3, "case", true)?;
                args.ignore(&["flags"]);
                let regex = args.bool_or(5, "regex", regex_default)?;
                if regex {
                    let pattern = if case { pat.clone() } else { format!("(?i){}", pat) };
                    let re = self.regex(&pattern)?.clone();
                    StrOp::Replace { re: Some(re), pat, repl: regex_template(&repl), count }
                } else {
                    StrOp::Replace { re: None, pat, repl, count }
                }
            }
            other => return Err(no_attribute("StringMethods", other)),
        })
    }

    fn str_method(&mut self, s: Series, name: &str, mut args: Args) -> Eval<Value> {
        let op = self.str_op(name, &mut args, false)?;
        let na = args.take_kwarg("na").map(scalar_cell).transpose()?;
        args.finish()?;
        let out = s
            .values
            .iter()
            .map(|c| match c {
                Cell::Text(text) => op.apply(text),
                _ => na.clone().unwrap_or_default(),
            })
            .collect();
        Ok(Value::Series(s.with_values(out)))
    }

    fn text_method(&mut self, text: &str, name: &str, mut args: Args) -> Eval<Value> {
        if !TEXT_METHODS.contains(&name) {
            return Err(no_attribute("str", name));
        }
        let op = self.str_op(name, &mut args, false)?;
        args.finish()?;
        Ok(Value::Scalar(op.apply(text)))
    }

    // ── pd ──────────────────────────────────────────────────────

    fn pd_function(&mut self, name: &str, mut args: Args) -> Eval<Value> {
        match name {
            "to_numeric" => {
                let arg = args.require(0, "arg")?;
                let errors = args.str_opt(1, "errors")?.unwrap_or_else(|| "raise".to_string());
                args.ignore(&["downcast"]);
                args.finish()?;
                if errors == "ignore" {
                    return Ok(arg);
                }
                let coerce = errors == "coerce";
                match arg {
                    Value::Series(s) => {
                        let out = s.values.iter().map(|c| to_number(c, coerce)).collect::<Eval<Vec<_>>>()?;
                        Ok(Value::Series(s.with_values(out)))
                    }
                    Value::Scalar(c) => to_number(&c, coerce).map(Value::Scalar),
                    Value::List(items) | Value::Tuple(items) => {
                        let out = items
                            .into_iter()
                            .map(|v| scalar_cell(v).and_then(|c| to_number(&c, coerce)))
                            .collect::<Eval<Vec<_>>>()?;
                        Ok(Value::List(out.into_iter().map(Value::Scalar).collect()))
                    }
                    other => Err(ExecFault::runtime(format!(
                        "TypeError: arg must be a list, tuple, 1-d array, or Series, not {}",
                        other.type_name()
                    ))),
                }
            }
            "isna" | "isnull" | "notna" | "notnull" => {
                let value = args.require(0, "obj");
                args.finish()?;
                let want_null = name.starts_with("is");
                match value {
                    Err(_) => Ok(Value::bool(want_null)),
                    Ok(Value::Series(s)) => self.series_method(s, name, Args::new(name, vec![], vec![])),
                    Ok(Value::Scalar(c)) => Ok(Value::bool(c.is_null() == want_null)),
                    Ok(other) => Err(ExecFault::runtime(format!(
                        "TypeError: {}() does not support {}",
                        name,
                        other.type_name()
                    ))),
                }
            }
            "DataFrame" => {
                let data = args.get(0, "data");
                let columns = args.names_opt(2, "columns")?;
                args.ignore(&["index", "dtype", "copy"]);
                args.finish()?;
                let frame = build_frame(data, self.limits.max_cells)?;
                let frame = match columns {
                    None => frame,
                    Some(names) => {
                        let height = frame.height();
                        let cols = names
                            .into_iter()
                            .map(|n| match frame.column(&n) {
                                Some(c) => c.clone(),
                                None => Column::new(n, vec![Cell::Null; height]),
                            })
                            .collect();
                        Dataset::new(cols).map_err(ExecFault::runtime)?
                    }
                };
                Ok(Value::Frame(frame))
            }
            "Series" => {
                let data = args.get(0, "data");
                let index = args.get(1, "index");
                let series_name = args.get(3, "name").map(|v| v.to_display());
                args.ignore(&["dtype", "copy"]);
                args.finish()?;
                let mut series = match data {
                    None => Series::new(None, Vec::new()),
                    Some(Value::Series(s)) => s,
                    Some(Value::Dict(pairs)) => {
                        let (keys, values): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
                        let keys = keys.into_iter().map(scalar_cell).collect::<Eval<Vec<_>>>()?;
                        let values = values.into_iter().map(scalar_cell).collect::<Eval<Vec<_>>>()?;
                        Series { name: None, values, index: Some(vec![Column::new("index", keys)]) }
                    }
                    Some(Value::Scalar(c)) => Series::new(None, vec![c]),
                    Some(other) => {
                        let items = other.items().ok_or_else(|| {
                            ExecFault::runtime(format!("TypeError: cannot build a Series from {}", other.type_name()))
                        })?;
                        Series::new(None, items.into_iter().map(scalar_cell).collect::<Eval<Vec<_>>>()?)
                    }
                };
                if let Some(index) = index {
                    let labels = to_cells(index, series.len())?;
                    series.index = Some(vec![Column::new("index", labels)]);
                }
                if series_name.is_some() {
                    series.name = series_name;
                }
                Ok(Value::Series(series))
            }
            "concat" => {
                let objs = args.require(0, "objs")?;
                let axis = match args.get(1, "axis") {
                    None => 0,
                    Some(v) if v.as_str() == Some("columns") => 1,
                    Some(v) if v.as_str() == Some("index") => 0,
                    Some(v) => v.as_int().unwrap_or(0),
                };
                args.ignore(&["ignore_index", "join", "sort", "keys"]);
                args.finish()?;
                let items = objs.items().ok_or_else(|| {
                    ExecFault::runtime("TypeError: first argument must be an iterable of pandas objects")
                })?;
                if items.is_empty() {
                    return Err(ExecFault::runtime("ValueError: No objects to concatenate"));
                }
                self.concat(items, axis == 1)
            }
            other => Err(ExecFault::runtime(format!(
                "AttributeError: module 'pandas' has no attribute '{}'",
                other
            ))),
        }
    }

    fn concat(&mut self, items: Vec<Value>, side_by_side: bool) -> Eval<Value> {
        let total = items.iter().fold(0usize, |acc, v| acc.saturating_add(weight(v)));
        self.check_cells(total)?;

        if items.iter().all(|v| matches!(v, Value::Series(_))) && !side_by_side {
            let mut out: Option<Series> = None;
            for item in items {
                let Value::Series(s) = item else { continue };
                out = Some(match out {
                    None => s,
                    Some(mut acc) => {
                        if acc.name != s.name {
                            acc.name = None;
                        }
                        acc.index = None;
                        acc.values.extend(s.values);
                        acc
                    }
                });
            }
            return Ok(Value::Series(out.unwrap_or_else(|| Series::new(None, Vec::new()))));
        }

        let mut frames = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            frames.push(match item {
                Value::Frame(ds) => ds,
                Value::Series(s) => {
                    let name = s.name.clone().unwrap_or_else(|| i.to_string());
                    Dataset::new(vec![Column::new(name, s.values)]).map_err(ExecFault::runtime)?
                }
                other => {
                    return Err(ExecFault::runtime(format!(
                        "TypeError: cannot concatenate object of type '{}'; only Series and DataFrame objs are valid",
                        other.type_name()
                    )));
                }
            });
        }

        if side_by_side {
            let height = frames.iter().map(Dataset::height).max().unwrap_or(0);
            let mut columns = Vec::new();
            for frame in frames {
                for mut col in frame.into_columns() {
                    col.values.resize(height, Cell::Null);
                    columns.push(col);
                }
            }
            return Dataset::new(columns).map(Value::Frame).map_err(ExecFault::runtime);
        }

        let mut names: Vec<String> = Vec::new();
        for frame in &frames {
            for name in frame.column_names() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        let mut columns: Vec<Column> = names.iter().map(|n| Column::new(n.clone(), Vec::new())).collect();
        for frame in &frames {
            for col in &mut columns {
                match frame.column(&col.name) {
                    Some(src) => col.values.extend(src.values.iter().cloned()),
                    None => col.values.extend(std::iter::repeat_n(Cell::Null, frame.height())),
                }
            }
        }
        Dataset::new(columns).map(Value::Frame).map_err(ExecFault::runtime)
    }
}

/// Rows kept by `head(n)` / `tail(n)`; negative `n` counts from the other end.
pub(crate) fn head_tail(len: usize, n: i64, head: bool) -> Vec<usize> {
    let keep = if n >= 0 { (n as usize).min(len) } else { len.saturating_sub(n.unsigned_abs() as usize) };
    if head { (0..keep).collect() } else { (len - keep..len).collect() }
}

/// Counts of distinct values, most frequent first, ties by first appearance.
pub(crate) fn value_counts(s: &Series, normalize: bool, sort: bool, ascending: bool, dropna: bool) -> Series {
    let mut slots: FxHashMap<Option<CellKey>, usize> = FxHashMap::default();
    let mut labels: Vec<Cell> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    for c in &s.values {
        if dropna && c.is_null() {
            continue;
        }
        let slot = *slots.entry(c.key()).or_insert_with(|| {
            labels.push(if c.is_null() { Cell::Null } else { c.clone() });
            counts.push(0);
            counts.len() - 1
        });
        counts[slot] += 1;
    }
    let mut order: Vec<usize> = (0..counts.len()).collect();
    if sort {
        if ascending {
            order.sort_by_key(|&i| counts[i]);
        } else {
            order.sort_by(|&a, &b| counts[b].cmp(&counts[a]));
        }
    }
    let total: usize = counts.iter().sum();
    let values = order
        .iter()
        .map(|&i| {
            if normalize {
                num(counts[i] as f64 / total as f64)
            } else {
                Cell::Number(counts[i] as f64)
            }
        })
        .collect();
    let index_name = s.name.clone().unwrap_or_else(|| "index".to_string());
    Series {
        name: Some(if normalize { "proportion" } else { "count" }.to_string()),
        values,
        index: Some(vec![Column::new(index_name, order.iter().map(|&i| labels[i].clone()).collect())]),
    }
}

fn round_cell(c: &Cell, digits: i32) -> Cell {
    match c {
        Cell::Number(n) => Cell::Number(round_half_even(*n, digits)),
        Cell::Bool(b) => Cell::Number(f64::from(u8::from(*b))),
        other => other.clone(),
    }
}

fn to_number(c: &Cell, coerce: bool) -> Eval<Cell> {
    match c {
        Cell::Null | Cell::Number(_) => Ok(c.clone()),
        Cell::Bool(b) => Ok(Cell::Number(f64::from(u8::from(*b)))),
        Cell::Text(s) => match parse_number(s) {
            Some(n) => Ok(Cell::Number(n)),
            None if coerce => Ok(Cell::Null),
            None => Err(ExecFault::runtime(format!("ValueError: Unable to parse string \"{}\"", s))),
        },
    }
}

fn parse_python_number(s: &str, integer: bool) -> Option<f64> {
    let t = s.trim().replace('_', "");
    if integer {
        return t.parse::<i64>().ok().map(|n| n as f64);
    }
    match t.to_ascii_lowercase().as_str() {
        "nan" => Some(f64::NAN),
        "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        _ => t.parse::<f64>().ok(),
    }
}

/// `Series.astype` for one value.
fn cast(c: &Cell, dtype: &str) -> Eval<Cell> {
    if c.is_null() {
        return Ok(Cell::Null);
    }
    match dtype {
        "int" | "int64" | "int32" | "Int64" | "Int32" => {
            let n = match c {
                Cell::Text(s) => parse_python_number(s, true),
                other => other.as_number(),
            };
            n.map(|n| Cell::Number(n.trunc())).ok_or_else(|| {
                ExecFault::runtime(format!("ValueError: invalid literal for int() with base 10: '{}'", c))
            })
        }
        "float" | "float64" | "float32" | "Float64" => match c {
            Cell::Text(s) => parse_python_number(s, false)
                .map(num)
                .ok_or_else(|| ExecFault::runtime(format!("ValueError: could not convert string to float: '{}'", s))),
            other => Ok(num(other.as_number().unwrap_or(f64::NAN))),
        },
        "str" | "string" | "object" => Ok(Cell::Text(c.to_string())),
        "bool" | "boolean" => Ok(Cell::Bool(c.is_truthy())),
        "category" => Ok(c.clone()),
        other => Err(ExecFault::runtime(format!("TypeError: data type '{}' not understood", other))),
    }
}

/// Python iteration over a value.
fn iterate(value: &Value) -> Eval<Vec<Value>> {
    match value {
        Value::Scalar(Cell::Text(s)) => Ok(s.chars().map(|c| Value::text(c.to_string())).collect()),
        Value::Frame(ds) => Ok(ds.column_names().into_iter().map(Value::text).collect()),
        other => other.items().ok_or_else(|| {
            ExecFault::runtime(format!("TypeError: '{}' object is not iterable", other.type_name()))
        }),
    }
}

fn build_frame(data: Option<Value>, max_cells: usize) -> Eval<Dataset> {
    match data {
        None => Ok(Dataset::default()),
        Some(Value::Frame(ds)) => Ok(ds),
        Some(Value::Series(s)) => s.into_frame(None),
        Some(Value::Dict(pairs)) => {
            let height = pairs
                .iter()
                .filter_map(|(_, v)| match v {
                    Value::Series(s) => Some(s.len()),
                    Value::List(items) | Value::Tuple(items) => Some(items.len()),
                    _ => None,
                })
                .max();
            let Some(height) = height else {
                return Err(ExecFault::runtime(
                    "ValueError: If using all scalar values, you must pass an index",
                ));
            };
            let broadcast = pairs.iter().fold(0usize, |acc, (_, v)| match v {
                Value::Scalar(c) => acc.saturating_add(height.saturating_mul(cell_weight(c))),
                other => acc.saturating_add(weight(other)),
            });
            if broadcast > max_cells {
                return Err(ExecFault::exhausted(Resource::Memory));
            }
            let columns = pairs
                .into_iter()
                .map(|(k, v)| Ok(Column::new(k.to_display(), to_cells(v, height)?)))
                .collect::<Eval<Vec<_>>>()?;
            Dataset::new(columns).map_err(ExecFault::runtime)
        }
        Some(Value::List(rows)) => {
            let mut names: Vec<String> = Vec::new();
            for row in &rows {
                let Value::Dict(pairs) = row else {
                    return Err(ExecFault::runtime("TypeError: DataFrame rows must be dicts"));
                };
                for (k, _) in pairs {
                    let name = k.to_display();
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
            let mut columns: Vec<Column> = names.iter().map(|n| Column::new(n.clone(), Vec::new())).collect();
            for row in rows {
                let Value::Dict(pairs) = row else { continue };
                for col in &mut columns {
                    let cell = pairs
                        .iter()
                        .find(|(k, _)| k.to_display() == col.name)
                        .map(|(_, v)| scalar_cell(v.clone()))
                        .transpose()?
                        .unwrap_or_default();
                    col.values.push(cell);
                }
            }
            Dataset::new(columns).map_err(ExecFault::runtime)
        }
        Some(other) => Err(ExecFault::runtime(format!(
            "ValueError: DataFrame constructor not properly called with {}",
            other.type_name()
        ))),
    }
}

fn list_method(items: Vec<Value>, name: &str, mut args: Args) -> Eval<Value> {
    match name {
        "tolist" | "copy" => {
            args.finish()?;
            Ok(Value::List(items))
        }
        "index" | "count" => {
            let needle = args.require(0, "value")?;
            args.finish()?;
            let mut hits = items.iter().enumerate().filter(|(_, v)| values_equal(v, &needle));
            if name == "count" {
                return Ok(Value::number(hits.count() as f64));
            }
            hits.next()
                .map(|(i, _)| Value::number(i as f64))
                .ok_or_else(|| ExecFault::runtime(format!("ValueError: {} is not in list", needle.repr())))
        }
        _ => Err(no_attribute("list", name)),
    }
}

fn dict_method(pairs: Vec<(Value, Value)>, name: &str, mut args: Args) -> Eval<Value> {
    match name {
        "get" => {
            let key = args.require(0, "key")?;
            let default = args.get(1, "default").unwrap_or_else(Value::none);
            args.finish()?;
            Ok(pairs
                .into_iter()
                .find(|(k, _)| values_equal(k, &key))
                .map_or(default, |(_, v)| v))
        }
        "keys" | "values" | "items" => {
            args.finish()?;
            Ok(Value::List(
                pairs
                    .into_iter()
                    .map(|(k, v)| match name {
                        "keys" => k,
                        "values" => v,
                        _ => Value::Tuple(vec![k, v]),
                    })
                    .collect(),
            ))
        }
        "copy" => {
            args.finish()?;
            Ok(Value::Dict(pairs))
        }
        _ => Err(no_attribute("dict", name)),
    }
}
