//! DataFrame methods, indexing and group-by.

use rustc_hash::FxHashMap;

use crate::analyze;
use crate::dataset::{Cell, CellKey, Column, Dataset};
use crate::error::{ExecFault, Span};
use crate::parser::{self, Program, Stmt, StmtKind};

use super::eval::{Key, no_attribute, python_index, slice_positions};
use super::methods::{
    AggFunc, Args, aggregate, head_tail, is_numeric_cells, round_half_even, scalar_cell, sort_order,
};
use super::value::{Eval, GroupBy, Indexer, Selection, Series, Value};
use super::{Executor, cell_weight, frame_weight};

pub(crate) const FRAME_METHODS: &[&str] = &[
    "head", "tail", "sort_values", "nlargest", "nsmallest", "groupby", "reset_index", "rename",
    "drop", "dropna", "drop_duplicates", "fillna", "copy", "assign", "query", "round", "sum",
    "mean", "median", "min", "max", "count", "nunique", "std",
];

pub(crate) fn column<'d>(ds: &'d Dataset, name: &str) -> Eval<&'d Column> {
    ds.column(name).ok_or_else(|| ExecFault::runtime(format!("KeyError: '{}'", name)))
}

fn require_columns(ds: &Dataset, names: &[String]) -> Eval<()> {
    let missing: Vec<String> = names
        .iter()
        .filter(|n| ds.column(n).is_none())
        .map(|n| format!("'{}'", n))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(ExecFault::runtime(format!("KeyError: \"[{}] not in index\"", missing.join(", "))))
}

fn project(ds: &Dataset, names: &[String]) -> Eval<Dataset> {
    require_columns(ds, names)?;
    let columns = names.iter().filter_map(|n| ds.column(n).cloned()).collect();
    let mut out = Dataset::new(columns).map_err(ExecFault::runtime)?;
    if names.is_empty() {
        out = Dataset::with_height(ds.height());
    }
    Ok(out)
}

/// Read a boolean mask; missing entries count as false.
fn as_mask(values: &[Cell]) -> Option<Vec<bool>> {
    values
        .iter()
        .map(|c| match c {
            Cell::Bool(b) => Some(*b),
            c if c.is_null() => Some(false),
            _ => None,
        })
        .collect()
}

fn mask_rows(mask: &[bool], height: usize) -> Eval<Vec<usize>> {
    if mask.len() != height {
        return Err(ExecFault::runtime(format!(
            "ValueError: Item wrong length {} instead of {}.",
            mask.len(),
            height
        )));
    }
    Ok((0..height).filter(|&i| mask[i]).collect())
}

/// Cells of a list-like key, if it is one.
fn key_cells(value: &Value) -> Option<Vec<Cell>> {
    match value {
        Value::Series(s) => Some(s.values.clone()),
        Value::List(items) | Value::Tuple(items) => items
            .iter()
            .map(|v| match v {
                Value::Scalar(c) => Some(c.clone()),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

/// Rows or columns chosen by one axis of an indexer.
enum Pick {
    One(usize),
    Many(Vec<usize>),
}

impl Pick {
    fn positions(&self) -> Vec<usize> {
        match self {
            Pick::One(i) => vec![*i],
            Pick::Many(v) => v.clone(),
        }
    }
}

fn position(len: usize, value: &Value, positional: bool) -> Eval<usize> {
    let i = value.as_int().ok_or_else(|| {
        ExecFault::runtime(format!("TypeError: cannot index by {}", value.repr()))
    })?;
    if positional {
        return python_index(len, i).map_err(|_| ExecFault::runtime("IndexError: single positional indexer is out-of-bounds"));
    }
    if i < 0 || i as usize >= len {
        return Err(ExecFault::runtime(format!("KeyError: {}", i)));
    }
    Ok(i as usize)
}

/// Row selection for `loc` (labels are positions, slices inclusive) or `iloc`.
fn pick_rows(height: usize, key: Key, kind: Indexer) -> Eval<Pick> {
    let positional = kind == Indexer::Iloc;
    match key {
        Key::Slice(a, b, c) => {
            if positional {
                return slice_positions(height, a, b, c).map(Pick::Many);
            }
            let stop = b.map(|b| if b < 0 { b } else { b.saturating_add(1) });
            slice_positions(height, a, stop, c).map(Pick::Many)
        }
        Key::Value(v) => {
            if let Some(cells) = key_cells(&v) {
                if let Some(mask) = as_mask(&cells).filter(|_| cells.iter().any(|c| matches!(c, Cell::Bool(_)))) {
                    return mask_rows(&mask, height).map(Pick::Many);
                }
                let rows = cells
                    .into_iter()
                    .map(|c| position(height, &Value::Scalar(c), positional))
                    .collect::<Eval<Vec<_>>>()?;
                return Ok(Pick::Many(rows));
            }
            position(height, &v, positional).map(Pick::One)
        }
        Key::Tuple(_) => Err(ExecFault::runtime("IndexingError: Too many indexers")),
    }
}

fn pick_columns(ds: &Dataset, key: Key, kind: Indexer) -> Eval<Pick> {
    let names = ds.column_names();
    let find = |name: &str| {
        names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| ExecFault::runtime(format!("KeyError: '{}'", name)))
    };
    match (kind, key) {
        (Indexer::Iloc, Key::Slice(a, b, c)) => slice_positions(names.len(), a, b, c).map(Pick::Many),
        (Indexer::Loc, Key::Slice(a, b, c)) => {
            if a.is_some() || b.is_some() || c.is_some() {
                return Err(ExecFault::runtime("TypeError: column slices must use labels"));
            }
            Ok(Pick::Many((0..names.len()).collect()))
        }
        (Indexer::Iloc, Key::Value(v)) => match key_cells(&v) {
            Some(cells) => cells
                .into_iter()
                .map(|c| position(names.len(), &Value::Scalar(c), true))
                .collect::<Eval<Vec<_>>>()
                .map(Pick::Many),
            None => position(names.len(), &v, true).map(Pick::One),
        },
        (Indexer::Loc, Key::Value(v)) => match key_cells(&v) {
            Some(cells) => {
                if let Some(mask) = as_mask(&cells) {
                    return mask_rows(&mask, names.len()).map(Pick::Many);
                }
                cells.iter().map(|c| find(&c.to_string())).collect::<Eval<Vec<_>>>().map(Pick::Many)
            }
            None => {
                let name = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_display());
                find(&name).map(Pick::One)
            }
        },
        (_, Key::Tuple(_)) => Err(ExecFault::runtime("IndexingError: Too many indexers")),
    }
}

/// Resolve `frame.loc[...]`/`frame.iloc[...]` row and column keys.
fn split_key(key: Key) -> Eval<(Key, Key)> {
    match key {
        Key::Tuple(mut parts) if parts.len() == 2 => {
            let cols = parts.pop().unwrap_or(Key::Slice(None, None, None));
            let rows = parts.pop().unwrap_or(Key::Slice(None, None, None));
            Ok((rows, cols))
        }
        Key::Tuple(_) => Err(ExecFault::runtime("IndexingError: Too many indexers")),
        other => Ok((other, Key::Slice(None, None, None))),
    }
}

/// Groups of row positions sharing the same key values.
pub(crate) struct Groups {
    pub(crate) keys: Vec<Column>,
    pub(crate) rows: Vec<Vec<usize>>,
}

pub(crate) fn group_rows(frame: &Dataset, keys: &[String], sort: bool, dropna: bool) -> Eval<Groups> {
    let key_cols = keys.iter().map(|k| column(frame, k)).collect::<Eval<Vec<_>>>()?;
    let mut slots: FxHashMap<Vec<Option<CellKey>>, usize> = FxHashMap::default();
    let mut firsts: Vec<usize> = Vec::new();
    let mut rows: Vec<Vec<usize>> = Vec::new();
    for r in 0..frame.height() {
        if dropna && key_cols.iter().any(|c| c.values[r].is_null()) {
            continue;
        }
        let key: Vec<Option<CellKey>> = key_cols.iter().map(|c| c.values[r].key()).collect();
        let slot = *slots.entry(key).or_insert_with(|| {
            firsts.push(r);
            rows.push(Vec::new());
            rows.len() - 1
        });
        rows[slot].push(r);
    }

    let mut order: Vec<usize> = (0..rows.len()).collect();
    if sort {
        let firsts_by_key: Vec<Vec<Cell>> = key_cols
            .iter()
            .map(|c| firsts.iter().map(|&r| c.values[r].clone()).collect())
            .collect();
        let slices: Vec<&[Cell]> = firsts_by_key.iter().map(Vec::as_slice).collect();
        order = sort_order(&slices, &vec![true; slices.len()], false, rows.len())?;
    }

    let keys = key_cols
        .iter()
        .map(|c| Column::new(c.name.clone(), order.iter().map(|&g| c.values[firsts[g]].clone()).collect()))
        .collect();
    let rows = order.iter().map(|&g| std::mem::take(&mut rows[g])).collect();
    Ok(Groups { keys, rows })
}

fn gather(col: &Column, rows: &[usize]) -> Vec<Cell> {
    rows.iter().map(|&r| col.values[r].clone()).collect()
}

/// One output column of a group-by aggregation.
struct Output {
    name: String,
    source: String,
    func: AggFunc,
}

fn parse_func(value: &Value) -> Eval<AggFunc> {
    let name = value.as_str().ok_or_else(|| {
        ExecFault::runtime(format!(
            "TypeError: aggregation must be given by name, not {}",
            value.type_name()
        ))
    })?;
    AggFunc::parse(name)
        .ok_or_else(|| ExecFault::runtime(format!("AttributeError: '{}' is not a valid function for aggregation", name)))
}

fn grouped_frame(g: &GroupBy, groups: &Groups, outputs: &[Output]) -> Eval<Dataset> {
    let mut columns = groups.keys.clone();
    for out in outputs {
        let source = column(&g.frame, &out.source)?;
        let values = groups
            .rows
            .iter()
            .map(|rows| aggregate(out.func, &gather(source, rows)))
            .collect::<Eval<Vec<_>>>()?;
        columns.retain(|c| c.name != out.name);
        columns.push(Column::new(out.name.clone(), values));
    }
    Dataset::new(columns).map_err(ExecFault::runtime)
}

/// Columns aggregated when no selection was made.
fn value_columns(g: &GroupBy) -> Vec<String> {
    match &g.selection {
        Selection::One(c) => vec![c.clone()],
        Selection::Many(cs) => cs.clone(),
        Selection::All => g
            .frame
            .column_names()
            .into_iter()
            .filter(|n| !g.keys.contains(n))
            .collect(),
    }
}

impl<'a> Executor<'a> {
    // ── Subscripts ──────────────────────────────────────────────

    pub(crate) fn frame_getitem(&mut self, ds: Dataset, key: Key) -> Eval<Value> {
        match key {
            Key::Slice(a, b, c) => {
                let rows = slice_positions(ds.height(), a, b, c)?;
                Ok(Value::Frame(ds.take_rows(&rows)))
            }
            Key::Value(Value::Scalar(Cell::Text(name))) => {
                column(&ds, &name).map(|col| Value::Series(Series::from_column(col)))
            }
            Key::Value(v) => {
                let Some(cells) = key_cells(&v) else {
                    return Err(ExecFault::runtime(format!("KeyError: {}", v.repr())));
                };
                if matches!(v, Value::Series(_))
                    && let Some(mask) = as_mask(&cells)
                {
                    let rows = mask_rows(&mask, ds.height())?;
                    return Ok(Value::Frame(ds.take_rows(&rows)));
                }
                if !cells.is_empty()
                    && cells.iter().all(|c| matches!(c, Cell::Bool(_)))
                {
                    let mask: Vec<bool> = cells.iter().map(|c| c.is_truthy()).collect();
                    let rows = mask_rows(&mask, ds.height())?;
                    return Ok(Value::Frame(ds.take_rows(&rows)));
                }
                let names: Vec<String> = cells.iter().map(Cell::to_string).collect();
                project(&ds, &names).map(Value::Frame)
            }
            Key::Tuple(_) => Err(ExecFault::runtime("KeyError: tuple keys select nothing on a DataFrame")),
        }
    }

    pub(crate) fn series_getitem(&mut self, s: Series, key: Key) -> Eval<Value> {
        match key {
            Key::Slice(a, b, c) => {
                let rows = slice_positions(s.len(), a, b, c)?;
                Ok(Value::Series(s.take(&rows)))
            }
            Key::Value(Value::Scalar(label)) => match s.label_position(&label) {
                Some(i) => Ok(Value::Scalar(s.values[i].clone())),
                None => Err(ExecFault::runtime(format!("KeyError: {}", Value::Scalar(label).repr()))),
            },
            Key::Value(v) => {
                let Some(cells) = key_cells(&v) else {
                    return Err(ExecFault::runtime(format!("KeyError: {}", v.repr())));
                };
                if let Some(mask) = as_mask(&cells).filter(|_| cells.iter().any(|c| matches!(c, Cell::Bool(_)))) {
                    let rows = mask_rows(&mask, s.len())?;
                    return Ok(Value::Series(s.take(&rows)));
                }
                let rows = cells
                    .iter()
                    .map(|c| {
                        s.label_position(c)
                            .ok_or_else(|| ExecFault::runtime(format!("KeyError: {}", Value::Scalar(c.clone()).repr())))
                    })
                    .collect::<Eval<Vec<_>>>()?;
                Ok(Value::Series(s.take(&rows)))
            }
            Key::Tuple(_) => Err(ExecFault::runtime("KeyError: tuple keys select nothing on a Series")),
        }
    }

    pub(crate) fn indexer_getitem(&mut self, kind: Indexer, inner: Value, key: Key) -> Eval<Value> {
        match inner {
            Value::Frame(ds) => {
                let (row_key, col_key) = split_key(key)?;
                let rows = pick_rows(ds.height(), row_key, kind)?;
                let cols = pick_columns(&ds, col_key, kind)?;
                let columns = ds.columns();
                match (rows, cols) {
                    (Pick::One(r), Pick::One(c)) => Ok(Value::Scalar(columns[c].values[r].clone())),
                    (Pick::One(r), Pick::Many(cs)) => Ok(Value::Series(Series {
                        name: Some(r.to_string()),
                        values: cs.iter().map(|&c| columns[c].values[r].clone()).collect(),
                        index: Some(vec![Column::new(
                            "index",
                            cs.iter().map(|&c| Cell::Text(columns[c].name.clone())).collect(),
                        )]),
                    })),
                    (Pick::Many(rs), Pick::One(c)) => Ok(Value::Series(Series::from_column(&columns[c].take(&rs)))),
                    (Pick::Many(rs), cols @ Pick::Many(_)) => {
                        let picked = cols.positions().into_iter().map(|c| columns[c].take(&rs)).collect();
                        Dataset::new(picked).map(Value::Frame).map_err(ExecFault::runtime)
                    }
                }
            }
            Value::Series(s) => {
                if kind == Indexer::Iloc || s.index.is_none() {
                    return match pick_rows(s.len(), key, kind)? {
                        Pick::One(i) => Ok(Value::Scalar(s.values[i].clone())),
                        Pick::Many(rows) => Ok(Value::Series(s.take(&rows))),
                    };
                }
                self.series_getitem(s, key)
            }
            other => Err(ExecFault::runtime(format!(
                "TypeError: '{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    // ── DataFrame methods ───────────────────────────────────────

    pub(crate) fn frame_method(&mut self, ds: Dataset, name: &str, mut args: Args) -> Eval<Value> {
        if let Some(func) = AggFunc::parse(name).filter(|f| *f != AggFunc::Size && FRAME_METHODS.contains(&name)) {
            let numeric_only = args.bool_or(99, "numeric_only", false)?;
            args.ignore(&["axis", "skipna", "ddof"]);
            args.finish()?;
            let mut labels = Vec::new();
            let mut values = Vec::new();
            for col in ds.columns() {
                let numeric = is_numeric_cells(&col.values);
                if (func.is_numeric() || numeric_only) && !numeric {
                    continue;
                }
                labels.push(Cell::Text(col.name.clone()));
                values.push(aggregate(func, &col.values)?);
            }
            return Ok(Value::Series(Series {
                name: None,
                values,
                index: Some(vec![Column::new("index", labels)]),
            }));
        }
        match name {
            "head" | "tail" => {
                let n = args.int_or(0, "n", 5)?;
                args.finish()?;
                Ok(Value::Frame(ds.take_rows(&head_tail(ds.height(), n, name == "head"))))
            }
            "sort_values" => {
                let by = args.require(0, "by")?.names("by")?;
                let ascending = match args.get(2, "ascending") {
                    None => vec![true; by.len()],
                    Some(Value::List(flags)) | Some(Value::Tuple(flags)) => {
                        if flags.len() != by.len() {
                            return Err(ExecFault::runtime(format!(
                                "ValueError: Length of ascending ({}) != length of by ({})",
                                flags.len(),
                                by.len()
                            )));
                        }
                        flags.iter().map(Value::truthy).collect::<Eval<Vec<_>>>()?
                    }
                    Some(flag) => vec![flag.truthy()?; by.len()],
                };
                let na_first = args.str_opt(99, "na_position")?.as_deref() == Some("first");
                args.ignore(&["axis", "kind", "ignore_index"]);
                args.finish()?;
                let keys = by.iter().map(|b| column(&ds, b).map(|c| c.values.as_slice())).collect::<Eval<Vec<_>>>()?;
                let order = sort_order(&keys, &ascending, na_first, ds.height())?;
                Ok(Value::Frame(ds.take_rows(&order)))
            }
            "nlargest" | "nsmallest" => {
                let n = args.int_or(0, "n", 5)?;
                let by = args.require(1, "columns")?.names("columns")?;
                args.ignore(&["keep"]);
                args.finish()?;
                let keys = by.iter().map(|b| column(&ds, b).map(|c| c.values.as_slice())).collect::<Eval<Vec<_>>>()?;
                if let Some(bad) = by.iter().zip(&keys).find(|(_, k)| !is_numeric_cells(k)) {
                    return Err(ExecFault::runtime(format!(
                        "TypeError: Column '{}' has dtype object, cannot use method '{}' with this dtype",
                        bad.0, name
                    )));
                }
                let largest = name == "nlargest";
                let order = sort_order(&keys, &vec![!largest; keys.len()], false, ds.height())?;
                let rows: Vec<usize> = order
                    .into_iter()
                    .filter(|&r| !keys[0][r].is_null())
                    .take(n.max(0) as usize)
                    .collect();
                Ok(Value::Frame(ds.take_rows(&rows)))
            }
            "groupby" => {
                let keys = args.require(0, "by")?.names("by")?;
                let as_index = args.bool_or(99, "as_index", true)?;
                let sort = args.bool_or(99, "sort", true)?;
                let dropna = args.bool_or(99, "dropna", true)?;
                args.ignore(&["observed", "group_keys"]);
                args.finish()?;
                if let Some(missing) = keys.iter().find(|k| ds.column(k).is_none()) {
                    return Err(ExecFault::runtime(format!("KeyError: '{}'", missing)));
                }
                Ok(Value::GroupBy(Box::new(GroupBy {
                    frame: ds,
                    keys,
                    selection: Selection::All,
                    as_index,
                    sort,
                    dropna,
                })))
            }
            "reset_index" => {
                args.ignore(&["drop", "name", "level"]);
                args.finish()?;
                Ok(Value::Frame(ds))
            }
            "rename" => {
                let mapper = args.get(0, "mapper");
                let columns = args.get(99, "columns");
                let axis = args.get(99, "axis");
                args.ignore(&["index", "errors", "copy"]);
                args.finish()?;
                let by_columns = axis.is_some_and(|a| a.as_int() == Some(1) || a.as_str() == Some("columns"));
                let mapping = match (columns, mapper) {
                    (Some(m), _) => m,
                    (None, Some(m)) if by_columns => m,
                    _ => return Ok(Value::Frame(ds)),
                };
                let Value::Dict(pairs) = mapping else {
                    return Err(ExecFault::runtime("TypeError: rename expects a dict of column names"));
                };
                let renamed = ds
                    .into_columns()
                    .into_iter()
                    .map(|mut col| {
                        if let Some((_, new)) = pairs.iter().find(|(k, _)| k.as_str() == Some(col.name.as_str())) {
                            col.name = new.to_display();
                        }
                        col
                    })
                    .collect();
                Dataset::new(renamed).map(Value::Frame).map_err(ExecFault::runtime)
            }
            "drop" => {
                let labels = args.get(0, "labels");
                let axis = args.get(1, "axis");
                let columns = args.get(99, "columns");
                let index = args.get(99, "index");
                let lenient = args.str_opt(99, "errors")?.as_deref() == Some("ignore");
                args.ignore(&["level"]);
                args.finish()?;
                let by_columns = axis.is_some_and(|a| a.as_int() == Some(1) || a.as_str() == Some("columns"));
                let (drop_cols, drop_rows) = match labels {
                    Some(l) if by_columns => (Some(l), index),
                    Some(l) => (columns, Some(l)),
                    None => (columns, index),
                };
                let mut out = ds;
                if let Some(rows) = drop_rows {
                    let positions = key_cells(&rows)
                        .unwrap_or_else(|| vec![scalar_cell(rows.clone()).unwrap_or_default()])
                        .into_iter()
                        .filter_map(|c| match position(out.height(), &Value::Scalar(c), false) {
                            Ok(p) => Some(Ok(p)),
                            Err(_) if lenient => None,
                            Err(e) => Some(Err(e)),
                        })
                        .collect::<Eval<Vec<_>>>()?;
                    let keep: Vec<usize> = (0..out.height()).filter(|r| !positions.contains(r)).collect();
                    out = out.take_rows(&keep);
                }
                if let Some(cols) = drop_cols {
                    let names = cols.names("columns")?;
                    if !lenient {
                        let missing: Vec<String> =
                            names.iter().filter(|n| out.column(n).is_none()).map(|n| format!("'{}'", n)).collect();
                        if !missing.is_empty() {
                            return Err(ExecFault::runtime(format!(
                                "KeyError: \"[{}] not found in axis\"",
                                missing.join(", ")
                            )));
                        }
                    }
                    let height = out.height();
                    let kept: Vec<Column> = out.into_columns().into_iter().filter(|c| !names.contains(&c.name)).collect();
                    out = if kept.is_empty() { Dataset::with_height(height) } else { Dataset::new(kept).map_err(ExecFault::runtime)? };
                }
                Ok(Value::Frame(out))
            }
            "dropna" => {
                args.ignore(&["axis", "ignore_index"]);
                let how = args.str_opt(1, "how")?.unwrap_or_else(|| "any".to_string());
                let thresh = args.get(2, "thresh").and_then(|v| v.as_int());
                let subset = args.names_opt(3, "subset")?;
                args.finish()?;
                let subset = subset.unwrap_or_else(|| ds.column_names());
                let cols = subset.iter().map(|n| column(&ds, n)).collect::<Eval<Vec<_>>>()?;
                let keep: Vec<usize> = (0..ds.height())
                    .filter(|&r| {
                        let present = cols.iter().filter(|c| !c.values[r].is_null()).count();
                        match (thresh, how.as_str()) {
                            (Some(t), _) => present as i64 >= t,
                            (None, "all") => present > 0 || cols.is_empty(),
                            _ => present == cols.len(),
                        }
                    })
                    .collect();
                Ok(Value::Frame(ds.take_rows(&keep)))
            }
            "drop_duplicates" => {
                let subset = args.names_opt(0, "subset")?;
                let keep = args.get(1, "keep");
                args.ignore(&["ignore_index"]);
                args.finish()?;
                let keep = match keep {
                    None => Some(true),
                    Some(Value::Scalar(Cell::Bool(false))) => None,
                    Some(v) if v.as_str() == Some("last") => Some(false),
                    Some(_) => Some(true),
                };
                let subset = subset.unwrap_or_else(|| ds.column_names());
                let cols = subset.iter().map(|n| column(&ds, n)).collect::<Eval<Vec<_>>>()?;
                let mut counts: FxHashMap<Vec<Option<CellKey>>, (usize, usize)> = FxHashMap::default();
                let row_keys: Vec<Vec<Option<CellKey>>> =
                    (0..ds.height()).map(|r| cols.iter().map(|c| c.values[r].key()).collect()).collect();
                for (r, key) in row_keys.iter().enumerate() {
                    let entry = counts.entry(key.clone()).or_insert((r, 0));
                    if keep == Some(false) {
                        entry.0 = r;
                    }
                    entry.1 += 1;
                }
                let rows: Vec<usize> = row_keys
                    .iter()
                    .enumerate()
                    .filter(|(r, key)| {
                        let (chosen, seen) = counts[*key];
                        match keep {
                            Some(_) => chosen == *r,
                            None => seen == 1,
                        }
                    })
                    .map(|(r, _)| r)
                    .collect();
                Ok(Value::Frame(ds.take_rows(&rows)))
            }
            "fillna" => {
                let value = args.require(0, "value")?;
                args.ignore(&["axis", "limit", "downcast"]);
                args.finish()?;
                let fills: Vec<(String, Cell)> = match value {
                    Value::Dict(pairs) => pairs
                        .into_iter()
                        .map(|(k, v)| Ok((k.to_display(), scalar_cell(v)?)))
                        .collect::<Eval<_>>()?,
                    other => {
                        let cell = scalar_cell(other)?;
                        ds.column_names().into_iter().map(|n| (n, cell.clone())).collect()
                    }
                };
                let added = fills.iter().fold(0usize, |acc, (name, fill)| {
                    let nulls = ds.column(name).map_or(0, |c| c.values.iter().filter(|v| v.is_null()).count());
                    acc.saturating_add(nulls.saturating_mul(cell_weight(fill)))
                });
                self.check_cells(frame_weight(&ds).saturating_add(added))?;
                let columns = ds
                    .into_columns()
                    .into_iter()
                    .map(|mut col| {
                        if let Some((_, fill)) = fills.iter().find(|(n, _)| *n == col.name) {
                            for c in &mut col.values {
                                if c.is_null() {
                                    *c = fill.clone();
                                }
                            }
                        }
                        col
                    })
                    .collect();
                Dataset::new(columns).map(Value::Frame).map_err(ExecFault::runtime)
            }
            "copy" => {
                args.ignore(&["deep"]);
                args.finish()?;
                Ok(Value::Frame(ds))
            }
            "assign" => {
                let new_columns = args.kwargs();
                args.finish()?;
                let mut out = ds;
                for (name, value) in new_columns {
                    let cells = self.broadcast(value, out.height())?;
                    out.set_column(Column::new(name, cells)).map_err(ExecFault::runtime)?;
                }
                self.check_cells(frame_weight(&out))?;
                Ok(Value::Frame(out))
            }
            "round" => {
                let decimals = args.int_or(0, "decimals", 0)?;
                args.finish()?;
                let columns = ds
                    .into_columns()
                    .into_iter()
                    .map(|mut col| {
                        for c in &mut col.values {
                            if let Cell::Number(n) = c {
                                *n = round_half_even(*n, decimals as i32);
                            }
                        }
                        col
                    })
                    .collect();
                Dataset::new(columns).map(Value::Frame).map_err(ExecFault::runtime)
            }
            "query" => {
                let expr = args.require(0, "expr")?;
                args.finish()?;
                let text = expr.as_str().ok_or_else(|| {
                    ExecFault::runtime(format!("ValueError: expr must be a string to be evaluated, {} given", expr.type_name()))
                })?;
                self.query(ds, text)
            }
            _ => Err(no_attribute("DataFrame", name)),
        }
    }

    /// `DataFrame.query`: evaluate a filter expression with columns in scope.
    fn query(&mut self, ds: Dataset, text: &str) -> Eval<Value> {
        let rewritten = rewrite_query(text);
        let mut view = ds.clone();
        if !rewritten.quoted.is_empty() {
            let columns = view
                .into_columns()
                .into_iter()
                .map(|mut col| {
                    if let Some((_, alias)) = rewritten.quoted.iter().find(|(name, _)| *name == col.name) {
                        col.name = alias.clone();
                    }
                    col
                })
                .collect();
            view = Dataset::new(columns).map_err(ExecFault::runtime)?;
        }

        let expr = parser::parse_expression(&rewritten.text)
            .map_err(|e| ExecFault::runtime(format!("SyntaxError: {} in query expression", e.message)))?;
        let check = Program {
            statements: vec![Stmt { kind: StmtKind::Expr(expr.clone()), span: Span::new(1, 1) }],
        };
        analyze::analyze(&check)?;

        let mut bound = Vec::new();
        for name in &rewritten.locals {
            let value = self.scope.get(name).cloned().ok_or_else(|| {
                ExecFault::runtime(format!("UndefinedVariableError: local variable '{}' is not defined", name))
            })?;
            bound.push(local_alias(name));
            self.scope.insert(local_alias(name), value);
        }

        let previous = self.query_frame.replace(view);
        let result = self.eval_expr(&expr);
        self.query_frame = previous;
        for alias in bound {
            self.scope.remove(&alias);
        }

        match result? {
            Value::Series(s) => {
                let mask = as_mask(&s.values)
                    .ok_or_else(|| ExecFault::runtime("ValueError: query expression must produce a boolean mask"))?;
                let rows = mask_rows(&mask, ds.height())?;
                Ok(Value::Frame(ds.take_rows(&rows)))
            }
            Value::Scalar(Cell::Bool(keep)) => {
                let rows: Vec<usize> = if keep { (0..ds.height()).collect() } else { Vec::new() };
                Ok(Value::Frame(ds.take_rows(&rows)))
            }
            other => Err(ExecFault::runtime(format!(
                "ValueError: query expression must produce a boolean mask, not {}",
                other.type_name()
            ))),
        }
    }

    // ── GroupBy ─────────────────────────────────────────────────

    pub(crate) fn groupby_method(&mut self, g: GroupBy, name: &str, mut args: Args) -> Eval<Value> {
        let groups = group_rows(&g.frame, &g.keys, g.sort, g.dropna)?;
        match name {
            "size" => {
                args.finish()?;
                let values = groups.rows.iter().map(|r| Cell::Number(r.len() as f64)).collect();
                let series = Series { name: Some("size".to_string()), values, index: Some(groups.keys) };
                if g.as_index {
                    Ok(Value::Series(series))
                } else {
                    series.into_frame(None).map(Value::Frame)
                }
            }
            "agg" | "aggregate" => {
                let spec = args.get(0, "func");
                let named = args.kwargs();
                args.finish()?;
                self.groupby_agg(g, groups, spec, named)
            }
            _ => {
                let func = AggFunc::parse(name).ok_or_else(|| no_attribute(Value::GroupBy(Box::new(g.clone())).type_name(), name))?;
                let numeric_only = args.bool_or(99, "numeric_only", false)?;
                args.ignore(&["skipna", "ddof", "min_count"]);
                args.finish()?;
                let skip_text = (func.is_numeric() || numeric_only) && g.selection == Selection::All;
                let outputs: Vec<Output> = value_columns(&g)
                    .into_iter()
                    .filter(|c| !skip_text || g.frame.column(c).is_some_and(|col| is_numeric_cells(&col.values)))
                    .map(|c| Output { name: c.clone(), source: c, func })
                    .collect();
                self.finish_groupby(&g, &groups, &outputs)
            }
        }
    }

    /// A single selected column with an index-style result stays a Series.
    fn finish_groupby(&mut self, g: &GroupBy, groups: &Groups, outputs: &[Output]) -> Eval<Value> {
        let frame = grouped_frame(g, groups, outputs)?;
        if g.as_index
            && let Selection::One(col) = &g.selection
            && let [only] = outputs
        {
            let values = column(&frame, &only.name)?.values.clone();
            return Ok(Value::Series(Series {
                name: Some(col.clone()),
                values,
                index: Some(groups.keys.clone()),
            }));
        }
        Ok(Value::Frame(frame))
    }

    fn groupby_agg(
        &mut self,
        g: GroupBy,
        groups: Groups,
        spec: Option<Value>,
        named: Vec<(String, Value)>,
    ) -> Eval<Value> {
        let mut outputs = Vec::new();
        match spec {
            None if named.is_empty() => {
                return Err(ExecFault::runtime("TypeError: Must provide 'func' or tuples of '(column, aggfunc)'."));
            }
            None => {
                for (out, value) in named {
                    let (source, func) = match value {
                        Value::Tuple(parts) if parts.len() == 2 => {
                            let source = parts[0].to_display();
                            (source, parse_func(&parts[1])?)
                        }
                        func @ Value::Scalar(_) => match &g.selection {
                            Selection::One(c) => (c.clone(), parse_func(&func)?),
                            _ => return Err(ExecFault::runtime("TypeError: named aggregation needs (column, aggfunc) tuples")),
                        },
                        other => {
                            return Err(ExecFault::runtime(format!(
                                "TypeError: named aggregation needs (column, aggfunc) tuples, not {}",
                                other.type_name()
                            )));
                        }
                    };
                    outputs.push(Output { name: out, source, func });
                }
                let frame = grouped_frame(&g, &groups, &outputs)?;
                return Ok(Value::Frame(frame));
            }
            Some(func @ Value::Scalar(_)) => {
                let func = parse_func(&func)?;
                let skip_text = func.is_numeric() && g.selection == Selection::All;
                for c in value_columns(&g) {
                    if skip_text && !g.frame.column(&c).is_some_and(|col| is_numeric_cells(&col.values)) {
                        continue;
                    }
                    outputs.push(Output { name: c.clone(), source: c, func });
                }
                return self.finish_groupby(&g, &groups, &outputs);
            }
            Some(Value::List(funcs)) | Some(Value::Tuple(funcs)) => {
                let funcs = funcs.iter().map(parse_func).collect::<Eval<Vec<_>>>()?;
                let single = matches!(g.selection, Selection::One(_));
                for c in value_columns(&g) {
                    for func in &funcs {
                        let fname = func_name(*func);
                        let name = if single { fname.to_string() } else { format!("{}_{}", c, fname) };
                        outputs.push(Output { name, source: c.clone(), func: *func });
                    }
                }
            }
            Some(Value::Dict(pairs)) => {
                for (col, funcs) in pairs {
                    let col = col.to_display();
                    match funcs {
                        Value::List(list) | Value::Tuple(list) => {
                            for func in list.iter().map(parse_func).collect::<Eval<Vec<_>>>()? {
                                outputs.push(Output {
                                    name: format!("{}_{}", col, func_name(func)),
                                    source: col.clone(),
                                    func,
                                });
                            }
                        }
                        func => outputs.push(Output { name: col.clone(), source: col, func: parse_func(&func)? }),
                    }
                }
            }
            Some(other) => {
                return Err(ExecFault::runtime(format!(
                    "TypeError: unsupported aggregation spec of type {}",
                    other.type_name()
                )));
            }
        }
        grouped_frame(&g, &groups, &outputs).map(Value::Frame)
    }
}

fn func_name(func: AggFunc) -> &'static str {
    match func {
        AggFunc::Sum => "sum",
        AggFunc::Mean => "mean",
        AggFunc::Median => "median",
        AggFunc::Min => "min",
        AggFunc::Max => "max",
        AggFunc::Count => "count",
        AggFunc::Nunique => "nunique",
        AggFunc::Std => "std",
        AggFunc::First => "first",
        AggFunc::Last => "last",
        AggFunc::Size => "size",
    }
}

/// A query string with backtick-quoted columns and `@` references replaced
/// by plain identifiers.
struct QueryText {
    text: String,
    /// (column name, alias) for each backtick-quoted column.
    quoted: Vec<(String, String)>,
    /// Names referenced with `@`.
    locals: Vec<String>,
}

fn local_alias(name: &str) -> String {
    format!("_at_{}", name)
}

fn rewrite_query(src: &str) -> QueryText {
    let mut out = QueryText { text: String::with_capacity(src.len()), quoted: Vec::new(), locals: Vec::new() };
    let mut chars = src.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                out.text.push(c);
                while let Some(d) = chars.next() {
                    out.text.push(d);
                    if d == '\\' {
                        if let Some(e) = chars.next() {
                            out.text.push(e);
                        }
                    } else if d == c {
                        break;
                    }
                }
            }
            '`' => {
                let name: String = chars.by_ref().take_while(|&d| d != '`').collect();
                let alias = match out.quoted.iter().find(|(n, _)| *n == name) {
                    Some((_, alias)) => alias.clone(),
                    None => {
                        let alias = format!("_bt{}", out.quoted.len());
                        out.quoted.push((name, alias.clone()));
                        alias
                    }
                };
                out.text.push_str(&alias);
            }
            '@' => {
                let mut name = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        name.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.text.push_str(&local_alias(&name));
                if !out.locals.contains(&name) {
                    out.locals.push(name);
                }
            }
            other => out.text.push(other),
        }
    }
    out
}

/// Row positions a `loc` row key selects, for conditional assignment.
pub(crate) fn loc_rows(height: usize, key: Key) -> Eval<Vec<usize>> {
    Ok(pick_rows(height, key, Indexer::Loc)?.positions())
}

pub(crate) fn loc_split(key: Key) -> Eval<(Key, Key)> {
    split_key(key)
}
