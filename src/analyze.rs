//! Static pass over a parsed candidate program.
//!
//! Runs before any evaluation: rejects programs that reach outside the
//! sandbox and collects facts the executor uses up front.

use crate::error::{ExecFault, Span};
use crate::parser::*;

/// Names a program may never mention, whether or not they are bound.
pub const FORBIDDEN_NAMES: &[&str] = &[
    "open", "eval", "exec", "compile", "__import__", "globals", "locals", "vars",
    "getattr", "setattr", "delattr", "input", "breakpoint", "exit", "quit", "help",
    "os", "sys", "subprocess", "socket", "shutil", "pathlib", "requests", "urllib",
    "http", "builtins", "importlib", "pickle", "io", "ctypes",
];

/// DataFrame/Series writers that would touch the filesystem, clipboard or network.
const IO_METHODS: &[&str] = &[
    "to_csv", "to_excel", "to_json", "to_pickle", "to_sql", "to_parquet",
    "to_clipboard", "to_html", "to_feather", "to_hdf", "to_latex", "to_markdown",
    "to_string",
];

/// The only module a program may import.
pub const ALLOWED_MODULE: &str = "pandas";

pub fn is_forbidden_name(name: &str) -> bool {
    FORBIDDEN_NAMES.contains(&name) || is_dunder(name)
}

/// Attribute names the evaluator refuses to resolve on any value.
pub fn is_forbidden_attr(name: &str) -> bool {
    is_dunder(name) || name.starts_with("read_") || IO_METHODS.contains(&name)
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// Facts gathered from a program that passed the containment check.
#[derive(Debug, Default)]
pub struct ProgramInfo {
    pub statements: usize,
    /// Some statement assigns the name `filtered_df`.
    pub binds_output: bool,
    /// String literals passed as regex patterns (`str.contains`, `str.replace`),
    /// suitable for pre-compilation into the regex cache.
    pub regex_literals: Vec<String>,
}

/// Walk the whole program, failing on the first containment violation.
pub fn analyze(program: &Program) -> Result<ProgramInfo, ExecFault> {
    let mut info = ProgramInfo { statements: program.statements.len(), ..ProgramInfo::default() };
    for stmt in &program.statements {
        walk_stmt(stmt, &mut info).map_err(|fault| fault.at(stmt.span))?;
    }
    Ok(info)
}

fn walk_stmt(stmt: &Stmt, info: &mut ProgramInfo) -> Result<(), ExecFault> {
    match &stmt.kind {
        StmtKind::Assign(target, value) | StmtKind::AugAssign(target, _, value) => {
            if let Expr::Name(name) = target
                && name == "filtered_df"
            {
                info.binds_output = true;
            }
            walk_expr(target, info)?;
            walk_expr(value, info)
        }
        StmtKind::Expr(e) => walk_expr(e, info),
        StmtKind::Pass => Ok(()),
        StmtKind::Import { module, alias } => {
            check_import(module, Some(stmt.span))?;
            if let Some(alias) = alias {
                check_name(alias)?;
            }
            Ok(())
        }
        StmtKind::FromImport { module, names } => {
            check_import(module, Some(stmt.span))?;
            for (name, alias) in names {
                check_attr(name)?;
                check_name(alias.as_deref().unwrap_or(name))?;
            }
            Ok(())
        }
    }
}

fn check_import(module: &str, span: Option<Span>) -> Result<(), ExecFault> {
    if module == ALLOWED_MODULE {
        return Ok(());
    }
    let mut fault = ExecFault::containment(format!("import of module '{}' is not allowed", module));
    fault.span = span;
    Err(fault)
}

fn check_name(name: &str) -> Result<(), ExecFault> {
    if is_forbidden_name(name) {
        return Err(ExecFault::containment(format!("use of '{}' is not allowed", name)));
    }
    Ok(())
}

fn check_attr(name: &str) -> Result<(), ExecFault> {
    if is_forbidden_attr(name) {
        return Err(ExecFault::containment(format!("access to attribute '{}' is not allowed", name)));
    }
    Ok(())
}

fn walk_expr(expr: &Expr, info: &mut ProgramInfo) -> Result<(), ExecFault> {
    match expr {
        Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::None => Ok(()),
        Expr::Name(name) => check_name(name),
        Expr::List(items) | Expr::Tuple(items) => items.iter().try_for_each(|e| walk_expr(e, info)),
        Expr::Dict(pairs) => pairs.iter().try_for_each(|(k, v)| {
            walk_expr(k, info)?;
            walk_expr(v, info)
        }),
        Expr::Attr(obj, name) => {
            check_attr(name)?;
            walk_expr(obj, info)
        }
        Expr::Call { func, args, kwargs } => {
            if let Expr::Attr(_, method) = func.as_ref()
                && matches!(method.as_str(), "contains" | "replace" | "match")
                && let Some(Expr::Str(pattern)) = args.first()
                && !kwargs.iter().any(|(k, v)| k == "regex" && *v == Expr::Bool(false))
            {
                info.regex_literals.push(pattern.clone());
            }
            walk_expr(func, info)?;
            args.iter().try_for_each(|e| walk_expr(e, info))?;
            kwargs.iter().try_for_each(|(_, e)| walk_expr(e, info))
        }
        Expr::Subscript(obj, index) => {
            walk_expr(obj, info)?;
            walk_expr(index, info)
        }
        Expr::Slice(a, b, c) => [a, b, c]
            .into_iter()
            .flatten()
            .try_for_each(|e| walk_expr(e, info)),
        Expr::BinOp(l, _, r) | Expr::And(l, r) | Expr::Or(l, r) => {
            walk_expr(l, info)?;
            walk_expr(r, info)
        }
        Expr::Unary(_, e) => walk_expr(e, info),
        Expr::Compare(first, chain) => {
            walk_expr(first, info)?;
            chain.iter().try_for_each(|(_, e)| walk_expr(e, info))
        }
        Expr::IfElse { cond, then, otherwise } => {
            walk_expr(cond, info)?;
            walk_expr(then, info)?;
            walk_expr(otherwise, info)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaultKind;

    fn analyze_src(src: &str) -> Result<ProgramInfo, ExecFault> {
        analyze(&parse_program(src).unwrap())
    }

    fn rejected(src: &str) -> ExecFault {
        let fault = analyze_src(src).unwrap_err();
        assert_eq!(fault.kind, FaultKind::Containment, "{}", src);
        fault
    }

    #[test]
    fn ordinary_program_passes() {
        let info = analyze_src(
            "import pandas as pd\nfiltered_df = df.sort_values('Sales', ascending=False).head(5)",
        )
        .unwrap();
        assert_eq!(info.statements, 2);
        assert!(info.binds_output);
    }

    #[test]
    fn missing_output_binding_is_noted() {
        assert!(!analyze_src("result = df.head()").unwrap().binds_output);
    }

    #[test]
    fn foreign_imports_are_rejected() {
        rejected("import os");
        rejected("import numpy as np");
        rejected("from subprocess import run");
        let fault = rejected("x = 1\nimport socket");
        assert_eq!(fault.span.map(|s| s.line), Some(2));
    }

    #[test]
    fn pandas_from_import_is_allowed() {
        assert!(analyze_src("from pandas import DataFrame").is_ok());
        rejected("from pandas import read_csv");
    }

    #[test]
    fn forbidden_names_are_rejected() {
        rejected("x = open('/etc/passwd')");
        rejected("exec('print(1)')");
        rejected("filtered_df = __import__('os')");
        rejected("f = getattr(df, 'to_csv')");
    }

    #[test]
    fn io_methods_are_rejected() {
        rejected("filtered_df = pd.read_csv('/tmp/x.csv')");
        rejected("df.to_csv('/tmp/out.csv')");
        rejected("pd.read_html('http://example.com')");
        rejected("s = df.to_string()");
    }

    #[test]
    fn dunder_attributes_are_rejected() {
        rejected("x = df.__class__");
        rejected("x = ().__class__.__bases__[0].__subclasses__()");
    }

    #[test]
    fn nested_violations_are_found() {
        rejected("filtered_df = df[df['a'].isin([open('x')])]");
        rejected("filtered_df = df if True else os");
    }

    #[test]
    fn regex_literals_collected() {
        let info = analyze_src(
            "a = df['n'].str.contains('^A')\nb = df['n'].str.contains('x', regex=False)",
        )
        .unwrap();
        assert_eq!(info.regex_literals, vec!["^A".to_string()]);
    }
}
