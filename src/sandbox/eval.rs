use std::cmp::Ordering;

use crate::analyze;
use crate::dataset::Cell;
use crate::error::ExecFault;
use crate::parser::{BinOp, CmpOp, Expr, UnaryOp};

use super::frame::FRAME_METHODS;
use super::methods::{
    Args, CONTAINER_METHODS, GROUPBY_METHODS, PD_FUNCTIONS, SERIES_METHODS, STR_METHODS, TEXT_METHODS,
};
use super::value::{Eval, Indexer, Selection, Series, Value, num};
use super::{BUILTINS, Executor, cell_weight, items_weight, series_weight};

/// An evaluated subscript.
#[derive(Debug, Clone)]
pub(crate) enum Key {
    Value(Value),
    Slice(Option<i64>, Option<i64>, Option<i64>),
    Tuple(Vec<Key>),
}

impl<'a> Executor<'a> {
    pub(crate) fn eval_expr(&mut self, expr: &Expr) -> Eval<Value> {
        self.checkpoint()?;
        let value = self.eval_inner(expr)?;
        self.check_size(&value)?;
        Ok(value)
    }

    fn eval_inner(&mut self, expr: &Expr) -> Eval<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::number(*n)),
            Expr::Str(s) => Ok(Value::text(s.clone())),
            Expr::Bool(b) => Ok(Value::bool(*b)),
            Expr::None => Ok(Value::none()),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => Ok(Value::List(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(items)?)),
            Expr::Dict(pairs) => {
                let mut out: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = self.eval_expr(k)?;
                    if !matches!(key, Value::Scalar(_) | Value::Tuple(_)) {
                        return Err(ExecFault::runtime(format!(
                            "TypeError: unhashable type: '{}'",
                            key.type_name()
                        )));
                    }
                    let value = self.eval_expr(v)?;
                    match out.iter_mut().find(|(existing, _)| values_equal(existing, &key)) {
                        Some(slot) => slot.1 = value,
                        None => out.push((key, value)),
                    }
                }
                Ok(Value::Dict(out))
            }
            Expr::Attr(obj, name) => {
                let target = self.eval_expr(obj)?;
                self.get_attr(target, name)
            }
            Expr::Call { func, args, kwargs } => self.eval_call(func, args, kwargs),
            Expr::Subscript(obj, index) => {
                let target = self.eval_expr(obj)?;
                let key = self.eval_key(index)?;
                self.subscript(target, key)
            }
            Expr::Slice(..) => Err(ExecFault::runtime("SyntaxError: slice outside of a subscript")),
            Expr::BinOp(l, op, r) => {
                let left = self.eval_expr(l)?;
                let right = self.eval_expr(r)?;
                self.binary(left, *op, right)
            }
            Expr::Unary(op, inner) => {
                let value = self.eval_expr(inner)?;
                self.unary(*op, value)
            }
            Expr::Compare(first, chain) => self.eval_compare(first, chain),
            Expr::And(l, r) => {
                let left = self.eval_expr(l)?;
                if self.query_frame.is_some() && matches!(left, Value::Series(_)) {
                    let right = self.eval_expr(r)?;
                    return self.binary(left, BinOp::BitAnd, right);
                }
                if !left.truthy()? {
                    return Ok(left);
                }
                self.eval_expr(r)
            }
            Expr::Or(l, r) => {
                let left = self.eval_expr(l)?;
                if self.query_frame.is_some() && matches!(left, Value::Series(_)) {
                    let right = self.eval_expr(r)?;
                    return self.binary(left, BinOp::BitOr, right);
                }
                if left.truthy()? {
                    return Ok(left);
                }
                self.eval_expr(r)
            }
            Expr::IfElse { cond, then, otherwise } => {
                if self.eval_expr(cond)?.truthy()? {
                    self.eval_expr(then)
                } else {
                    self.eval_expr(otherwise)
                }
            }
        }
    }

    pub(crate) fn eval_all(&mut self, exprs: &[Expr]) -> Eval<Vec<Value>> {
        exprs.iter().map(|e| self.eval_expr(e)).collect()
    }

    fn lookup(&mut self, name: &str) -> Eval<Value> {
        if let Some(frame) = &self.query_frame
            && let Some(col) = frame.column(name)
        {
            return Ok(Value::Series(Series::from_column(col)));
        }
        if let Some(value) = self.scope.get(name) {
            return Ok(value.clone());
        }
        if let Some(builtin) = BUILTINS.iter().find(|b| **b == name).copied() {
            return Ok(Value::Builtin(builtin));
        }
        if analyze::is_forbidden_name(name) {
            return Err(ExecFault::containment(format!("use of '{}' is not allowed", name)));
        }
        Err(ExecFault::runtime(format!("NameError: name '{}' is not defined", name)))
    }

    // ── Attributes and calls ────────────────────────────────────

    pub(crate) fn get_attr(&mut self, target: Value, name: &str) -> Eval<Value> {
        if analyze::is_forbidden_attr(name) {
            return Err(ExecFault::containment(format!("access to attribute '{}' is not allowed", name)));
        }
        let method = |target: Value| -> Eval<Value> { Ok(Value::Method(Box::new(target), name.to_string())) };
        match target {
            Value::Frame(ds) => match name {
                "columns" => Ok(Value::List(ds.column_names().into_iter().map(Value::text).collect())),
                "shape" => Ok(Value::Tuple(vec![
                    Value::number(ds.height() as f64),
                    Value::number(ds.width() as f64),
                ])),
                "empty" => Ok(Value::bool(ds.height() == 0 || ds.width() == 0)),
                "size" => Ok(Value::number(ds.cell_count() as f64)),
                "index" => Ok(Value::List((0..ds.height()).map(|i| Value::number(i as f64)).collect())),
                "loc" => Ok(Value::Indexer(Indexer::Loc, Box::new(Value::Frame(ds)))),
                "iloc" => Ok(Value::Indexer(Indexer::Iloc, Box::new(Value::Frame(ds)))),
                _ if FRAME_METHODS.contains(&name) => method(Value::Frame(ds)),
                _ => match ds.column(name) {
                    Some(col) => Ok(Value::Series(Series::from_column(col))),
                    None => Err(no_attribute("DataFrame", name)),
                },
            },
            Value::Series(s) => match name {
                "name" => Ok(s.name.map_or_else(Value::none, Value::text)),
                "size" => Ok(Value::number(s.len() as f64)),
                "shape" => Ok(Value::Tuple(vec![Value::number(s.len() as f64)])),
                "empty" => Ok(Value::bool(s.is_empty())),
                "str" => Ok(Value::StrAccessor(s)),
                "values" => Ok(Value::List(s.values.into_iter().map(Value::Scalar).collect())),
                "index" => Ok(Value::List(s.labels().into_iter().map(Value::Scalar).collect())),
                "loc" => Ok(Value::Indexer(Indexer::Loc, Box::new(Value::Series(s)))),
                "iloc" => Ok(Value::Indexer(Indexer::Iloc, Box::new(Value::Series(s)))),
                _ if SERIES_METHODS.contains(&name) => method(Value::Series(s)),
                _ => Err(no_attribute("Series", name)),
            },
            Value::GroupBy(g) => {
                if GROUPBY_METHODS.contains(&name) {
                    return method(Value::GroupBy(g));
                }
                if g.frame.column(name).is_some() && !g.keys.iter().any(|k| k == name) {
                    let mut g = g;
                    g.selection = Selection::One(name.to_string());
                    return Ok(Value::GroupBy(g));
                }
                Err(no_attribute(Value::GroupBy(g).type_name(), name))
            }
            Value::StrAccessor(s) if STR_METHODS.contains(&name) => method(Value::StrAccessor(s)),
            Value::Scalar(Cell::Text(s)) if TEXT_METHODS.contains(&name) => method(Value::text(s)),
            Value::List(items) if CONTAINER_METHODS.contains(&name) => method(Value::List(items)),
            Value::Dict(pairs) if CONTAINER_METHODS.contains(&name) => method(Value::Dict(pairs)),
            Value::Module => match name {
                "NA" | "NaT" => Ok(Value::none()),
                _ if PD_FUNCTIONS.contains(&name) => method(Value::Module),
                _ => Err(ExecFault::runtime(format!(
                    "AttributeError: module 'pandas' has no attribute '{}'",
                    name
                ))),
            },
            other => Err(no_attribute(other.type_name(), name)),
        }
    }

    fn eval_call(&mut self, func: &Expr, args: &[Expr], kwargs: &[(String, Expr)]) -> Eval<Value> {
        let inplace = kwargs.iter().any(|(k, _)| k == "inplace");

        if inplace && let Expr::Attr(receiver, method) = func {
            let target = self.eval_expr(receiver)?;
            let mut call = self.eval_args(method, args, kwargs)?;
            let inplace = call.take_kwarg("inplace").map(|v| v.truthy()).transpose()?.unwrap_or(false);
            if !analyze::is_forbidden_attr(method) && inplace {
                let result = self.call_method(target, method, call)?;
                self.assign_target(receiver, result)?;
                return Ok(Value::none());
            }
            let callee = self.get_attr(target, method)?;
            return self.call_value(callee, call);
        }

        let callee = self.eval_expr(func)?;
        let name = match &callee {
            Value::Builtin(name) => name.to_string(),
            Value::Method(_, name) => name.clone(),
            other => other.type_name().to_string(),
        };
        let mut call = self.eval_args(&name, args, kwargs)?;
        call.take_kwarg("inplace");
        self.call_value(callee, call)
    }

    fn eval_args(&mut self, name: &str, args: &[Expr], kwargs: &[(String, Expr)]) -> Eval<Args> {
        let positional = self.eval_all(args)?;
        let mut named = Vec::with_capacity(kwargs.len());
        for (key, expr) in kwargs {
            named.push((key.clone(), self.eval_expr(expr)?));
        }
        Ok(Args::new(name, positional, named))
    }

    pub(crate) fn call_value(&mut self, callee: Value, args: Args) -> Eval<Value> {
        match callee {
            Value::Builtin(name) => self.call_builtin(name, args),
            Value::Method(receiver, name) => self.call_method(*receiver, &name, args),
            other => Err(ExecFault::runtime(format!(
                "TypeError: '{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    // ── Subscripts ──────────────────────────────────────────────

    pub(crate) fn eval_key(&mut self, expr: &Expr) -> Eval<Key> {
        match expr {
            Expr::Slice(start, stop, step) => Ok(Key::Slice(
                self.slice_bound(start.as_deref())?,
                self.slice_bound(stop.as_deref())?,
                self.slice_bound(step.as_deref())?,
            )),
            Expr::Tuple(items) => Ok(Key::Tuple(
                items.iter().map(|e| self.eval_key(e)).collect::<Eval<Vec<_>>>()?,
            )),
            other => Ok(Key::Value(self.eval_expr(other)?)),
        }
    }

    fn slice_bound(&mut self, expr: Option<&Expr>) -> Eval<Option<i64>> {
        let Some(expr) = expr else { return Ok(None) };
        let value = self.eval_expr(expr)?;
        if value.is_none() {
            return Ok(None);
        }
        value.as_int().map(Some).ok_or_else(|| {
            ExecFault::runtime("TypeError: slice indices must be integers or None")
        })
    }

    pub(crate) fn subscript(&mut self, target: Value, key: Key) -> Eval<Value> {
        match target {
            Value::Frame(ds) => self.frame_getitem(ds, key),
            Value::Series(s) => self.series_getitem(s, key),
            Value::Indexer(kind, inner) => self.indexer_getitem(kind, *inner, key),
            Value::GroupBy(mut g) => {
                let Key::Value(selector) = key else {
                    return Err(ExecFault::runtime("TypeError: invalid group selection"));
                };
                let names = selector.names("column selection")?;
                if let Some(missing) = names.iter().find(|n| g.frame.column(n).is_none()) {
                    return Err(ExecFault::runtime(format!("KeyError: 'Column not found: {}'", missing)));
                }
                g.selection = match selector {
                    Value::Scalar(_) => Selection::One(names.into_iter().next().unwrap_or_default()),
                    _ => Selection::Many(names),
                };
                Ok(Value::GroupBy(g))
            }
            Value::List(items) | Value::Tuple(items) => match key {
                Key::Value(v) => {
                    let i = v.as_int().ok_or_else(|| {
                        ExecFault::runtime("TypeError: list indices must be integers or slices")
                    })?;
                    let pos = python_index(items.len(), i)?;
                    Ok(items[pos].clone())
                }
                Key::Slice(a, b, c) => {
                    let rows = slice_positions(items.len(), a, b, c)?;
                    Ok(Value::List(rows.into_iter().map(|i| items[i].clone()).collect()))
                }
                Key::Tuple(_) => Err(ExecFault::runtime("TypeError: list indices must be integers or slices, not tuple")),
            },
            Value::Scalar(Cell::Text(s)) => {
                let chars: Vec<char> = s.chars().collect();
                match key {
                    Key::Value(v) => {
                        let i = v.as_int().ok_or_else(|| {
                            ExecFault::runtime("TypeError: string indices must be integers")
                        })?;
                        Ok(Value::text(chars[python_index(chars.len(), i)?].to_string()))
                    }
                    Key::Slice(a, b, c) => {
                        let rows = slice_positions(chars.len(), a, b, c)?;
                        Ok(Value::text(rows.into_iter().map(|i| chars[i]).collect::<String>()))
                    }
                    Key::Tuple(_) => Err(ExecFault::runtime("TypeError: string indices must be integers")),
                }
            }
            Value::Dict(pairs) => {
                let key = match key {
                    Key::Value(v) => v,
                    Key::Tuple(keys) => Value::Tuple(keys.into_iter().map(key_value).collect::<Eval<_>>()?),
                    Key::Slice(..) => return Err(ExecFault::runtime("TypeError: unhashable type: 'slice'")),
                };
                pairs
                    .into_iter()
                    .find(|(k, _)| values_equal(k, &key))
                    .map(|(_, v)| v)
                    .ok_or_else(|| ExecFault::runtime(format!("KeyError: {}", key.repr())))
            }
            other => Err(ExecFault::runtime(format!(
                "TypeError: '{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    // ── Operators ───────────────────────────────────────────────

    pub(crate) fn binary(&mut self, left: Value, op: BinOp, right: Value) -> Eval<Value> {
        match (left, right) {
            (Value::Series(a), Value::Series(b)) => {
                if a.len() != b.len() {
                    return Err(ExecFault::runtime(format!(
                        "ValueError: operands could not be broadcast together with shapes ({},) ({},)",
                        a.len(),
                        b.len()
                    )));
                }
                if op == BinOp::Add {
                    self.check_cells(series_weight(&a).saturating_add(series_weight(&b)))?;
                }
                let values = a
                    .values
                    .iter()
                    .zip(&b.values)
                    .map(|(x, y)| elem_binop(x, op, y))
                    .collect::<Eval<Vec<_>>>()?;
                let name = if a.name == b.name { a.name.clone() } else { None };
                Ok(Value::Series(Series { name, values, index: a.index }))
            }
            (Value::Series(a), Value::Scalar(b)) => {
                self.check_text_broadcast(&a, op, &b)?;
                let values = a.values.iter().map(|x| elem_binop(x, op, &b)).collect::<Eval<Vec<_>>>()?;
                Ok(Value::Series(a.with_values(values)))
            }
            (Value::Scalar(a), Value::Series(b)) => {
                self.check_text_broadcast(&b, op, &a)?;
                let values = b.values.iter().map(|y| elem_binop(&a, op, y)).collect::<Eval<Vec<_>>>()?;
                Ok(Value::Series(b.with_values(values)))
            }
            (Value::Scalar(a), Value::Scalar(b)) => self.scalar_binop(&a, op, &b).map(Value::Scalar),
            (Value::List(mut a), Value::List(b)) if op == BinOp::Add => {
                self.check_cells(items_weight(&a).saturating_add(items_weight(&b)))?;
                a.extend(b);
                Ok(Value::List(a))
            }
            (Value::Tuple(mut a), Value::Tuple(b)) if op == BinOp::Add => {
                self.check_cells(items_weight(&a).saturating_add(items_weight(&b)))?;
                a.extend(b);
                Ok(Value::Tuple(a))
            }
            (Value::List(items), Value::Scalar(n)) | (Value::Scalar(n), Value::List(items))
                if op == BinOp::Mul =>
            {
                let times = Value::Scalar(n).as_int().ok_or_else(|| {
                    ExecFault::runtime("TypeError: can't multiply sequence by non-int")
                })?;
                let times = if items.is_empty() { 0 } else { times.max(0) as usize };
                self.check_cells(items_weight(&items).saturating_mul(times))?;
                let mut out = Vec::with_capacity(items.len() * times);
                for _ in 0..times {
                    out.extend(items.iter().cloned());
                }
                Ok(Value::List(out))
            }
            (l, r) => Err(ExecFault::runtime(format!(
                "TypeError: unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                l.type_name(),
                r.type_name()
            ))),
        }
    }

    /// Appending text to every element of a Series copies it once per row.
    fn check_text_broadcast(&self, series: &Series, op: BinOp, scalar: &Cell) -> Eval<()> {
        if op == BinOp::Add && matches!(scalar, Cell::Text(_)) {
            let copies = series.len().saturating_mul(cell_weight(scalar));
            self.check_cells(series_weight(series).saturating_add(copies))?;
        }
        Ok(())
    }

    /// Python semantics for two scalars: division by zero raises.
    fn scalar_binop(&self, a: &Cell, op: BinOp, b: &Cell) -> Eval<Cell> {
        let unsupported = || {
            ExecFault::runtime(format!(
                "TypeError: unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                a.type_name(),
                b.type_name()
            ))
        };
        match (a, b) {
            (Cell::Text(x), Cell::Text(y)) if op == BinOp::Add => {
                self.check_cells((x.len() + y.len()) / 8)?;
                Ok(Cell::Text(format!("{}{}", x, y)))
            }
            (Cell::Text(s), n @ (Cell::Number(_) | Cell::Bool(_)))
            | (n @ (Cell::Number(_) | Cell::Bool(_)), Cell::Text(s))
                if op == BinOp::Mul =>
            {
                let times = n
                    .as_number()
                    .filter(|t| t.fract() == 0.0)
                    .ok_or_else(|| ExecFault::runtime("TypeError: can't multiply sequence by non-int"))?;
                let times = times.max(0.0) as usize;
                self.check_cells(s.len().saturating_mul(times) / 8)?;
                Ok(Cell::Text(s.repeat(times)))
            }
            (Cell::Bool(x), Cell::Bool(y)) if is_bitwise(op) => Ok(Cell::Bool(match op {
                BinOp::BitAnd => *x && *y,
                BinOp::BitOr => *x || *y,
                _ => x != y,
            })),
            (Cell::Number(_) | Cell::Bool(_), Cell::Number(_) | Cell::Bool(_)) => {
                let (x, y) = (a.as_number().ok_or_else(unsupported)?, b.as_number().ok_or_else(unsupported)?);
                if is_bitwise(op) {
                    return int_bitwise(x, op, y).ok_or_else(unsupported);
                }
                arith(x, op, y, true).map(num)
            }
            _ => Err(unsupported()),
        }
    }

    pub(crate) fn unary(&mut self, op: UnaryOp, value: Value) -> Eval<Value> {
        if op == UnaryOp::Not {
            if self.query_frame.is_some()
                && let Value::Series(s) = &value
            {
                let values = s.values.iter().map(|c| Cell::Bool(!c.is_truthy())).collect();
                return Ok(Value::Series(s.with_values(values)));
            }
            return Ok(Value::bool(!value.truthy()?));
        }
        match value {
            Value::Series(s) => {
                let values = s.values.iter().map(|c| elem_unary(op, c)).collect::<Eval<Vec<_>>>()?;
                Ok(Value::Series(s.with_values(values)))
            }
            Value::Scalar(Cell::Bool(b)) if op == UnaryOp::Invert => {
                Ok(Value::number(-(b as i64 as f64) - 1.0))
            }
            Value::Scalar(c) if !c.is_null() => elem_unary(op, &c).map(Value::Scalar),
            other => Err(ExecFault::runtime(format!(
                "TypeError: bad operand type for unary {}: '{}'",
                unary_symbol(op),
                other.type_name()
            ))),
        }
    }

    fn eval_compare(&mut self, first: &Expr, chain: &[(CmpOp, Expr)]) -> Eval<Value> {
        let mut left = self.eval_expr(first)?;
        let mut outcome = Value::bool(true);
        for (op, rhs) in chain {
            let right = self.eval_expr(rhs)?;
            outcome = match (&left, op) {
                // `col in [..]` inside a query string tests each row.
                (Value::Series(s), CmpOp::In | CmpOp::NotIn) if self.query_frame.is_some() => {
                    let negate = *op == CmpOp::NotIn;
                    let values = s
                        .values
                        .iter()
                        .map(|c| contains(&right, &Value::Scalar(c.clone())).map(|found| Cell::Bool(found != negate)))
                        .collect::<Eval<Vec<_>>>()?;
                    Value::Series(s.with_values(values))
                }
                _ => compare(&left, *op, &right)?,
            };
            if chain.len() == 1 || !outcome.truthy()? {
                return Ok(outcome);
            }
            left = right;
        }
        Ok(outcome)
    }
}

/// Compare two values. Series compare element-wise; scalars follow Python.
pub(crate) fn compare(left: &Value, op: CmpOp, right: &Value) -> Eval<Value> {
    match op {
        CmpOp::In | CmpOp::NotIn => {
            let found = contains(right, left)?;
            return Ok(Value::bool(found != (op == CmpOp::NotIn)));
        }
        CmpOp::Is | CmpOp::IsNot => {
            return Ok(Value::bool(identical(left, right) != (op == CmpOp::IsNot)));
        }
        _ => {}
    }
    match (left, right) {
        (Value::Series(a), Value::Series(b)) => {
            if a.len() != b.len() {
                return Err(ExecFault::runtime("ValueError: Can only compare identically-labeled Series objects"));
            }
            let values = a
                .values
                .iter()
                .zip(&b.values)
                .map(|(x, y)| elem_compare(x, op, y))
                .collect::<Eval<Vec<_>>>()?;
            Ok(Value::Series(a.with_values(values)))
        }
        (Value::Series(a), Value::Scalar(b)) => {
            let values = a.values.iter().map(|x| elem_compare(x, op, b)).collect::<Eval<Vec<_>>>()?;
            Ok(Value::Series(a.with_values(values)))
        }
        (Value::Scalar(a), Value::Series(b)) => {
            let values = b.values.iter().map(|y| elem_compare(a, op, y)).collect::<Eval<Vec<_>>>()?;
            Ok(Value::Series(b.with_values(values)))
        }
        (Value::Scalar(a), Value::Scalar(b)) => {
            if a.is_null() || b.is_null() {
                return match op {
                    CmpOp::Eq => Ok(Value::bool(a.is_null() && b.is_null())),
                    CmpOp::Ne => Ok(Value::bool(!(a.is_null() && b.is_null()))),
                    _ => Err(not_supported(op, a, b)),
                };
            }
            elem_compare(a, op, b).map(Value::Scalar)
        }
        (l, r) => match op {
            CmpOp::Eq => Ok(Value::bool(values_equal(l, r))),
            CmpOp::Ne => Ok(Value::bool(!values_equal(l, r))),
            _ => Err(ExecFault::runtime(format!(
                "TypeError: '{}' not supported between instances of '{}' and '{}'",
                op.symbol(),
                l.type_name(),
                r.type_name()
            ))),
        },
    }
}

/// Element-wise comparison: missing values compare unequal to everything.
fn elem_compare(a: &Cell, op: CmpOp, b: &Cell) -> Eval<Cell> {
    if a.is_null() || b.is_null() {
        return Ok(Cell::Bool(op == CmpOp::Ne));
    }
    let ordering = match (a, b) {
        (Cell::Text(x), Cell::Text(y)) => Some(x.cmp(y)),
        (Cell::Number(_) | Cell::Bool(_), Cell::Number(_) | Cell::Bool(_)) => {
            a.as_number().zip(b.as_number()).and_then(|(x, y)| x.partial_cmp(&y))
        }
        _ => None,
    };
    let result = match (op, ordering) {
        (CmpOp::Eq, ord) => ord == Some(Ordering::Equal),
        (CmpOp::Ne, ord) => ord != Some(Ordering::Equal),
        (_, None) => return Err(not_supported(op, a, b)),
        (CmpOp::Lt, Some(o)) => o == Ordering::Less,
        (CmpOp::Le, Some(o)) => o != Ordering::Greater,
        (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
        (CmpOp::Ge, Some(o)) => o != Ordering::Less,
        _ => false,
    };
    Ok(Cell::Bool(result))
}

fn not_supported(op: CmpOp, a: &Cell, b: &Cell) -> ExecFault {
    ExecFault::runtime(format!(
        "TypeError: '{}' not supported between instances of '{}' and '{}'",
        op.symbol(),
        a.type_name(),
        b.type_name()
    ))
}

/// Element-wise arithmetic: missing values propagate and division by zero
/// yields infinity or a missing value instead of raising.
pub(crate) fn elem_binop(a: &Cell, op: BinOp, b: &Cell) -> Eval<Cell> {
    if is_bitwise(op) {
        if let (Some(x), Some(y)) = (mask_bool(a), mask_bool(b)) {
            return Ok(Cell::Bool(match op {
                BinOp::BitAnd => x && y,
                BinOp::BitOr => x || y,
                _ => x != y,
            }));
        }
    }
    if a.is_null() || b.is_null() {
        return Ok(Cell::Null);
    }
    match (a, b) {
        (Cell::Text(x), Cell::Text(y)) if op == BinOp::Add => Ok(Cell::Text(format!("{}{}", x, y))),
        (Cell::Text(_), _) | (_, Cell::Text(_)) => Err(ExecFault::runtime(format!(
            "TypeError: unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ))),
        _ => {
            let (x, y) = (a.as_number().unwrap_or(f64::NAN), b.as_number().unwrap_or(f64::NAN));
            if is_bitwise(op) {
                return int_bitwise(x, op, y).ok_or_else(|| {
                    ExecFault::runtime(format!("TypeError: unsupported operand type(s) for {}: 'float' and 'float'", op.symbol()))
                });
            }
            arith(x, op, y, false).map(num)
        }
    }
}

fn mask_bool(c: &Cell) -> Option<bool> {
    match c {
        Cell::Bool(b) => Some(*b),
        Cell::Null => Some(false),
        _ => None,
    }
}

fn is_bitwise(op: BinOp) -> bool {
    matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor)
}

fn int_bitwise(x: f64, op: BinOp, y: f64) -> Option<Cell> {
    if x.fract() != 0.0 || y.fract() != 0.0 || !x.is_finite() || !y.is_finite() {
        return None;
    }
    let (x, y) = (x as i64, y as i64);
    let r = match op {
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        _ => x ^ y,
    };
    Some(Cell::Number(r as f64))
}

/// Numeric arithmetic. `strict` raises on division by zero the way
/// Python scalars do; otherwise IEEE results are returned.
fn arith(x: f64, op: BinOp, y: f64, strict: bool) -> Eval<f64> {
    let zero = y == 0.0 && matches!(op, BinOp::Div | BinOp::FloorDiv | BinOp::Mod);
    if zero && strict {
        let message = match op {
            BinOp::Div => "ZeroDivisionError: division by zero",
            _ => "ZeroDivisionError: integer division or modulo by zero",
        };
        return Err(ExecFault::runtime(message));
    }
    Ok(match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::FloorDiv => (x / y).floor(),
        BinOp::Mod => {
            if zero {
                f64::NAN
            } else {
                let r = x % y;
                if r != 0.0 && (r < 0.0) != (y < 0.0) { r + y } else { r }
            }
        }
        BinOp::Pow => x.powf(y),
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => f64::NAN,
    })
}

fn elem_unary(op: UnaryOp, c: &Cell) -> Eval<Cell> {
    match (op, c) {
        (_, Cell::Null) => Ok(Cell::Null),
        (UnaryOp::Invert, Cell::Bool(b)) => Ok(Cell::Bool(!b)),
        (UnaryOp::Invert, Cell::Number(n)) if n.fract() == 0.0 => Ok(Cell::Number(-n - 1.0)),
        (UnaryOp::Neg, Cell::Number(_) | Cell::Bool(_)) => Ok(num(-c.as_number().unwrap_or(f64::NAN))),
        (UnaryOp::Pos, Cell::Number(_) | Cell::Bool(_)) => Ok(num(c.as_number().unwrap_or(f64::NAN))),
        _ => Err(ExecFault::runtime(format!(
            "TypeError: bad operand type for unary {}: '{}'",
            unary_symbol(op),
            c.type_name()
        ))),
    }
}

fn unary_symbol(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "-",
        UnaryOp::Pos => "+",
        UnaryOp::Invert => "~",
        UnaryOp::Not => "not",
    }
}

/// Value equality as Python `==` sees it for scalars and containers.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Scalar(x), Value::Scalar(y)) => cells_equal(x, y),
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q))
        }
        _ => a == b,
    }
}

pub(crate) fn cells_equal(a: &Cell, b: &Cell) -> bool {
    match (a, b) {
        (Cell::Null, Cell::Null) => true,
        (Cell::Text(x), Cell::Text(y)) => x == y,
        (Cell::Number(_) | Cell::Bool(_), Cell::Number(_) | Cell::Bool(_)) => a.as_number() == b.as_number(),
        _ => false,
    }
}

fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Scalar(x), Value::Scalar(y)) => match (x, y) {
            (Cell::Null, Cell::Null) => true,
            (Cell::Bool(p), Cell::Bool(q)) => p == q,
            (Cell::Number(p), Cell::Number(q)) => p == q,
            (Cell::Text(p), Cell::Text(q)) => p == q,
            _ => false,
        },
        (Value::Module, Value::Module) => true,
        _ => false,
    }
}

/// Python `item in container`.
fn contains(container: &Value, item: &Value) -> Eval<bool> {
    match container {
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Dict(pairs) => Ok(pairs.iter().any(|(k, _)| values_equal(k, item))),
        Value::Scalar(Cell::Text(haystack)) => match item.as_str() {
            Some(needle) => Ok(haystack.contains(needle)),
            None => Err(ExecFault::runtime(format!(
                "TypeError: 'in <string>' requires string as left operand, not {}",
                item.type_name()
            ))),
        },
        Value::Frame(ds) => Ok(item.as_str().is_some_and(|name| ds.column(name).is_some())),
        Value::Series(s) => match item {
            Value::Scalar(c) => Ok(s.labels().iter().any(|l| cells_equal(l, c))),
            _ => Ok(false),
        },
        other => Err(ExecFault::runtime(format!(
            "TypeError: argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn key_value(key: Key) -> Eval<Value> {
    match key {
        Key::Value(v) => Ok(v),
        Key::Tuple(keys) => Ok(Value::Tuple(keys.into_iter().map(key_value).collect::<Eval<_>>()?)),
        Key::Slice(..) => Err(ExecFault::runtime("TypeError: unhashable type: 'slice'")),
    }
}

pub(crate) fn no_attribute(type_name: &str, name: &str) -> ExecFault {
    ExecFault::runtime(format!("AttributeError: '{}' object has no attribute '{}'", type_name, name))
}

/// Resolve a possibly negative Python index.
pub(crate) fn python_index(len: usize, i: i64) -> Eval<usize> {
    let idx = if i < 0 { i + len as i64 } else { i };
    if idx < 0 || idx >= len as i64 {
        return Err(ExecFault::runtime("IndexError: index out of range"));
    }
    Ok(idx as usize)
}

/// Positions selected by a Python slice over `len` items.
pub(crate) fn slice_positions(
    len: usize,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> Eval<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(ExecFault::runtime("ValueError: slice step cannot be zero"));
    }
    let len = len as i64;
    let bound = |v: Option<i64>, default: i64, lo: i64, hi: i64| match v {
        None => default,
        Some(i) => (if i < 0 { i + len } else { i }).clamp(lo, hi),
    };
    let mut out = Vec::new();
    if step > 0 {
        let (s, e) = (bound(start, 0, 0, len), bound(stop, len, 0, len));
        let mut i = Some(s);
        while let Some(at) = i.filter(|&at| at < e) {
            out.push(at as usize);
            i = at.checked_add(step);
        }
    } else {
        let (s, e) = (bound(start, len - 1, -1, len - 1), bound(stop, -1, -1, len - 1));
        let mut i = Some(s);
        while let Some(at) = i.filter(|&at| at > e) {
            out.push(at as usize);
            i = at.checked_add(step);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_follow_python() {
        assert_eq!(slice_positions(5, Some(1), Some(3), None).unwrap(), vec![1, 2]);
        assert_eq!(slice_positions(5, None, Some(-2), None).unwrap(), vec![0, 1, 2]);
        assert_eq!(slice_positions(5, None, None, Some(-2)).unwrap(), vec![4, 2, 0]);
        assert_eq!(slice_positions(3, Some(10), None, None).unwrap(), Vec::<usize>::new());
        assert!(slice_positions(3, None, None, Some(0)).is_err());
    }

    #[test]
    fn huge_steps_and_bounds_do_not_overflow() {
        assert_eq!(slice_positions(5, Some(1), None, Some(i64::MAX)).unwrap(), vec![1]);
        assert_eq!(slice_positions(5, None, None, Some(i64::MIN)).unwrap(), vec![4]);
        assert_eq!(slice_positions(5, Some(i64::MIN), Some(i64::MAX), None).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(slice_positions(5, Some(i64::MAX), Some(i64::MIN), Some(-1)).unwrap(), vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn negative_indexes() {
        assert_eq!(python_index(3, -1).unwrap(), 2);
        assert!(python_index(3, 3).is_err());
    }

    #[test]
    fn element_division_by_zero_is_not_an_error() {
        let n = |x: f64| Cell::Number(x);
        assert_eq!(elem_binop(&n(1.0), BinOp::Div, &n(0.0)).unwrap(), Cell::Number(f64::INFINITY));
        assert_eq!(elem_binop(&n(0.0), BinOp::Div, &n(0.0)).unwrap(), Cell::Null);
        assert_eq!(elem_binop(&n(5.0), BinOp::Mod, &n(0.0)).unwrap(), Cell::Null);
    }

    #[test]
    fn python_modulo_sign() {
        assert_eq!(arith(-7.0, BinOp::Mod, 3.0, true).unwrap(), 2.0);
        assert_eq!(arith(7.0, BinOp::FloorDiv, -2.0, true).unwrap(), -4.0);
        assert!(arith(1.0, BinOp::Div, 0.0, true).is_err());
    }

    #[test]
    fn missing_values_in_masks() {
        let t = Cell::Bool(true);
        assert_eq!(elem_binop(&t, BinOp::BitAnd, &Cell::Null).unwrap(), Cell::Bool(false));
        assert_eq!(elem_compare(&Cell::Null, CmpOp::Ne, &t).unwrap(), Cell::Bool(true));
        assert_eq!(elem_compare(&Cell::Null, CmpOp::Gt, &Cell::Number(1.0)).unwrap(), Cell::Bool(false));
    }

    #[test]
    fn mixed_ordering_is_a_type_error() {
        let err = elem_compare(&Cell::Text("a".into()), CmpOp::Gt, &Cell::Number(1.0)).unwrap_err();
        assert!(err.message.starts_with("TypeError"));
    }

    #[test]
    fn membership() {
        let list = Value::List(vec![Value::text("a"), Value::number(2.0)]);
        assert!(contains(&list, &Value::number(2.0)).unwrap());
        assert!(!contains(&list, &Value::text("b")).unwrap());
        assert!(contains(&Value::text("hello"), &Value::text("ell")).unwrap());
        assert!(contains(&Value::number(1.0), &Value::number(1.0)).is_err());
    }
}
