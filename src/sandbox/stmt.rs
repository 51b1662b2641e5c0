use crate::dataset::{Cell, Column};
use crate::error::ExecFault;
use crate::parser::{Expr, Stmt, StmtKind};

use super::eval::{Key, python_index, values_equal};
use super::frame::{loc_rows, loc_split};
use super::methods::{scalar_cell, to_cells};
use super::value::{Eval, Value};
use super::{Executor, cell_weight, frame_weight};

impl<'a> Executor<'a> {
    pub(crate) fn exec_stmt(&mut self, stmt: &Stmt) -> Eval<()> {
        self.checkpoint()?;
        match &stmt.kind {
            StmtKind::Assign(target, value) => {
                let value = self.eval_expr(value)?;
                self.assign_target(target, value)
            }
            StmtKind::AugAssign(target, op, value) => {
                let current = self.eval_expr(target)?;
                let rhs = self.eval_expr(value)?;
                let updated = self.binary(current, *op, rhs)?;
                self.assign_target(target, updated)
            }
            StmtKind::Expr(expr) => self.eval_expr(expr).map(drop),
            StmtKind::Pass => Ok(()),
            StmtKind::Import { module, alias } => {
                let name = alias.clone().unwrap_or_else(|| module.clone());
                self.scope.insert(name, Value::Module);
                Ok(())
            }
            StmtKind::FromImport { names, .. } => {
                for (name, alias) in names {
                    let value = self.get_attr(Value::Module, name)?;
                    self.scope.insert(alias.clone().unwrap_or_else(|| name.clone()), value);
                }
                Ok(())
            }
        }
    }

    /// Bind `value` to an assignment target: a name, `name[key]`, or
    /// `name.loc[rows, cols]`.
    pub(crate) fn assign_target(&mut self, target: &Expr, value: Value) -> Eval<()> {
        match target {
            Expr::Name(name) => {
                self.scope.insert(name.clone(), value);
                Ok(())
            }
            Expr::Subscript(obj, key) => {
                if let Expr::Attr(inner, attr) = obj.as_ref()
                    && attr == "loc"
                    && let Expr::Name(name) = inner.as_ref()
                {
                    let key = self.eval_key(key)?;
                    return self.assign_loc(name, key, value);
                }
                let Expr::Name(name) = obj.as_ref() else {
                    return Err(ExecFault::runtime("TypeError: only named containers support item assignment"));
                };
                let key = self.eval_key(key)?;
                self.assign_item(name, key, value)
            }
            _ => Err(ExecFault::runtime("SyntaxError: cannot assign to expression")),
        }
    }

    fn take_binding(&mut self, name: &str) -> Eval<Value> {
        self.scope
            .remove(name)
            .ok_or_else(|| ExecFault::runtime(format!("NameError: name '{}' is not defined", name)))
    }

    fn assign_item(&mut self, name: &str, key: Key, value: Value) -> Eval<()> {
        let container = self.take_binding(name)?;
        let updated = match (container, key) {
            (Value::Frame(mut ds), Key::Value(Value::Scalar(Cell::Text(col)))) => {
                let cells = if ds.width() == 0 && ds.height() == 0 {
                    match value {
                        Value::Series(s) => s.values,
                        Value::List(items) => items.into_iter().map(scalar_cell).collect::<Eval<Vec<_>>>()?,
                        other => to_cells(other, 0)?,
                    }
                } else {
                    self.broadcast(value, ds.height())?
                };
                ds.set_column(Column::new(col, cells)).map_err(|e| ExecFault::runtime(format!("ValueError: {}", e)))?;
                self.check_cells(frame_weight(&ds))?;
                Value::Frame(ds)
            }
            (Value::Dict(mut pairs), Key::Value(k)) => {
                match pairs.iter_mut().find(|(existing, _)| values_equal(existing, &k)) {
                    Some(slot) => slot.1 = value,
                    None => pairs.push((k, value)),
                }
                Value::Dict(pairs)
            }
            (Value::List(mut items), Key::Value(i)) => {
                let i = i.as_int().ok_or_else(|| {
                    ExecFault::runtime("TypeError: list indices must be integers or slices")
                })?;
                let pos = python_index(items.len(), i)
                    .map_err(|_| ExecFault::runtime("IndexError: list assignment index out of range"))?;
                items[pos] = value;
                Value::List(items)
            }
            (Value::Frame(_), _) => {
                return Err(ExecFault::runtime("TypeError: column assignment needs a single column name"));
            }
            (other, _) => {
                return Err(ExecFault::runtime(format!(
                    "TypeError: '{}' object does not support item assignment",
                    other.type_name()
                )));
            }
        };
        self.scope.insert(name.to_string(), updated);
        Ok(())
    }

    /// `df.loc[rows, col] = value`: update selected rows, creating the
    /// column (missing elsewhere) when it does not exist yet.
    fn assign_loc(&mut self, name: &str, key: Key, value: Value) -> Eval<()> {
        let Value::Frame(mut ds) = self.take_binding(name)? else {
            return Err(ExecFault::runtime("TypeError: .loc assignment needs a DataFrame"));
        };
        let (row_key, col_key) = loc_split(key)?;
        let rows = loc_rows(ds.height(), row_key)?;
        let names = match col_key {
            Key::Value(v) => v.names("columns")?,
            Key::Slice(None, None, None) => ds.column_names(),
            _ => return Err(ExecFault::runtime("TypeError: unsupported .loc column selection")),
        };

        let fill: Vec<Cell> = match value {
            Value::Scalar(c) => {
                self.check_cells(rows.len().saturating_mul(cell_weight(&c)))?;
                vec![c; rows.len()]
            }
            Value::Series(s) if s.len() == ds.height() && s.len() != rows.len() => {
                rows.iter().map(|&r| s.values[r].clone()).collect()
            }
            other => to_cells(other, rows.len())?,
        };

        for col_name in names {
            let mut col = ds
                .column(&col_name)
                .cloned()
                .unwrap_or_else(|| Column::new(col_name.clone(), vec![Cell::Null; ds.height()]));
            for (&r, cell) in rows.iter().zip(&fill) {
                col.values[r] = cell.clone();
            }
            ds.set_column(col).map_err(ExecFault::runtime)?;
        }
        self.check_cells(frame_weight(&ds))?;
        self.scope.insert(name.to_string(), Value::Frame(ds));
        Ok(())
    }
}
