//! The sandboxed executor for candidate programs.
//!
//! Programs are interpreted, never compiled or handed to a host runtime.
//! The interpreter has no file, network, process or clock primitives, so
//! the only things a program can reach are the bindings placed in its
//! scope: a copy of the dataset as `df`, the tabular capability as `pd`,
//! and a handful of pure builtins.

mod eval;
mod frame;
mod methods;
mod stmt;
mod value;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use regex::{Regex, RegexBuilder};
use rustc_hash::FxHashMap;

use crate::analyze;
use crate::dataset::{Cell, Dataset};
use crate::error::{ExecFault, PipelineError, Resource, Stage};
use crate::parser;

pub use value::{GroupBy, Indexer, Selection, Series, Value};
pub(crate) use value::Eval;

/// The name a program must bind its result table to.
pub const OUTPUT_BINDING: &str = "filtered_df";

/// Builtins visible to every program.
pub(crate) const BUILTINS: &[&str] = &[
    "len", "abs", "round", "min", "max", "sum", "int", "float", "str", "bool", "list", "sorted",
];

/// A cooperative cancellation flag shared between a request and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Resource ceilings for one execution.
#[derive(Debug, Clone)]
pub struct Limits {
    pub wall_clock: Duration,
    /// Ceiling on the size of any intermediate value, in cells. Text
    /// weighs one extra cell per 8 bytes.
    pub max_cells: usize,
    pub max_program_bytes: usize,
    pub max_statements: usize,
    /// Compiled-size ceiling for each regular expression.
    pub regex_size_limit: usize,
    pub cancel: Option<CancelToken>,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            wall_clock: Duration::from_secs(2),
            max_cells: 5_000_000,
            max_program_bytes: 64 * 1024,
            max_statements: 256,
            regex_size_limit: 1 << 20,
            cancel: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("{0}")]
    Fault(ExecFault),

    /// The program ran but did not leave a table in `filtered_df`.
    #[error("{0}")]
    Contract(String),

    #[error("execution cancelled")]
    Cancelled,
}

impl SandboxError {
    pub fn into_pipeline(self, program: &str) -> PipelineError {
        match self {
            SandboxError::Fault(fault) => PipelineError::ProgramExecution { program: program.to_string(), fault },
            SandboxError::Contract(reason) => {
                PipelineError::OutputContractViolation { program: program.to_string(), reason }
            }
            SandboxError::Cancelled => PipelineError::Cancelled { stage: Stage::Execute },
        }
    }
}

impl From<ExecFault> for SandboxError {
    fn from(fault: ExecFault) -> Self {
        SandboxError::Fault(fault)
    }
}

/// Run `program` against a private copy of `dataset` and return the table
/// it bound to `filtered_df`.
pub fn execute(program: &str, dataset: &Dataset, limits: &Limits) -> Result<Dataset, SandboxError> {
    if program.len() > limits.max_program_bytes {
        return Err(ExecFault::exhausted(Resource::ProgramSize).into());
    }

    let parsed = parser::parse_program(program).map_err(ExecFault::from)?;
    if parsed.statements.len() > limits.max_statements {
        return Err(ExecFault::exhausted(Resource::Statements).into());
    }

    let info = analyze::analyze(&parsed)?;
    if !info.binds_output {
        return Err(SandboxError::Contract(format!("program never assigns `{}`", OUTPUT_BINDING)));
    }

    let mut exec = Executor::new(dataset, limits);
    for pattern in &info.regex_literals {
        // Invalid patterns are reported when (and if) they are used.
        let _ = exec.regex(pattern);
    }

    tracing::debug!(statements = info.statements, "executing candidate program");
    for stmt in &parsed.statements {
        if let Err(fault) = exec.exec_stmt(stmt) {
            if exec.cancelled {
                return Err(SandboxError::Cancelled);
            }
            return Err(fault.at(stmt.span).into());
        }
    }

    match exec.scope.remove(OUTPUT_BINDING) {
        Some(Value::Frame(table)) => Ok(table),
        Some(other) => Err(SandboxError::Contract(format!(
            "`{}` is a {}, not a DataFrame",
            OUTPUT_BINDING,
            other.type_name()
        ))),
        None => Err(SandboxError::Contract(format!("`{}` was never assigned", OUTPUT_BINDING))),
    }
}

pub(crate) struct Executor<'a> {
    pub(crate) scope: FxHashMap<String, Value>,
    pub(crate) limits: &'a Limits,
    pub(crate) deadline: Instant,
    pub(crate) regex_cache: FxHashMap<String, Regex>,
    pub(crate) cancelled: bool,
    /// While evaluating a `DataFrame.query` string: bare names resolve to
    /// this frame's columns and `and`/`or`/`not` apply element-wise.
    pub(crate) query_frame: Option<Dataset>,
}

impl<'a> Executor<'a> {
    pub(crate) fn new(dataset: &Dataset, limits: &'a Limits) -> Self {
        let mut scope = FxHashMap::default();
        scope.insert("df".to_string(), Value::Frame(dataset.clone()));
        scope.insert("pd".to_string(), Value::Module);
        Executor {
            scope,
            limits,
            deadline: Instant::now() + limits.wall_clock,
            regex_cache: FxHashMap::default(),
            cancelled: false,
            query_frame: None,
        }
    }

    /// Poll the deadline and the cancellation token.
    pub(crate) fn checkpoint(&mut self) -> Eval<()> {
        if self.limits.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            self.cancelled = true;
            return Err(ExecFault::runtime("cancelled"));
        }
        if Instant::now() >= self.deadline {
            return Err(ExecFault::exhausted(Resource::WallClock));
        }
        Ok(())
    }

    /// Refuse values larger than the cell ceiling.
    pub(crate) fn check_size(&self, value: &Value) -> Eval<()> {
        self.check_cells(weight(value))
    }

    /// Broadcast `value` to a column of `len` cells, refusing a scalar
    /// whose copies would exceed the ceiling.
    pub(crate) fn broadcast(&self, value: Value, len: usize) -> Eval<Vec<Cell>> {
        if let Value::Scalar(c) = &value {
            self.check_cells(len.saturating_mul(cell_weight(c)))?;
        }
        methods::to_cells(value, len)
    }

    pub(crate) fn check_cells(&self, cells: usize) -> Eval<()> {
        if cells > self.limits.max_cells {
            return Err(ExecFault::exhausted(Resource::Memory));
        }
        Ok(())
    }

    /// Compile (or fetch) a regex under the size ceiling.
    pub(crate) fn regex(&mut self, pattern: &str) -> Eval<&Regex> {
        if !self.regex_cache.contains_key(pattern) {
            let re = RegexBuilder::new(pattern)
                .size_limit(self.limits.regex_size_limit)
                .build()
                .map_err(|e| match e {
                    regex::Error::CompiledTooBig(_) => ExecFault::exhausted(Resource::Memory),
                    other => ExecFault::runtime(format!("re.error: {}", other)),
                })?;
            self.regex_cache.insert(pattern.to_string(), re);
        }
        self.regex_cache
            .get(pattern)
            .ok_or_else(|| ExecFault::runtime("regex cache miss"))
    }
}

/// Size of one cell against the memory ceiling.
pub(crate) fn cell_weight(cell: &Cell) -> usize {
    match cell {
        Cell::Text(s) => 1 + s.len() / 8,
        _ => 1,
    }
}

pub(crate) fn cells_weight<'c>(cells: impl IntoIterator<Item = &'c Cell>) -> usize {
    cells.into_iter().fold(0, |acc, c| acc.saturating_add(cell_weight(c)))
}

pub(crate) fn frame_weight(ds: &Dataset) -> usize {
    ds.columns().iter().fold(0, |acc, c| acc.saturating_add(cells_weight(&c.values)))
}

pub(crate) fn series_weight(s: &Series) -> usize {
    let index = s.index.iter().flatten().fold(0, |acc: usize, c| acc.saturating_add(cells_weight(&c.values)));
    cells_weight(&s.values).saturating_add(index)
}

/// Every item of a list or tuple weighs at least one cell.
pub(crate) fn items_weight(items: &[Value]) -> usize {
    items.iter().fold(0, |acc, v| acc.saturating_add(1 + weight(v)))
}

/// Size of a value against the memory ceiling, contents included.
pub(crate) fn weight(value: &Value) -> usize {
    match value {
        Value::Frame(ds) => frame_weight(ds),
        Value::Series(s) | Value::StrAccessor(s) => series_weight(s),
        Value::List(items) | Value::Tuple(items) => items_weight(items),
        Value::Dict(pairs) => pairs
            .iter()
            .fold(0, |acc, (k, v)| acc.saturating_add(2 + weight(k)).saturating_add(weight(v))),
        Value::Scalar(Cell::Text(s)) => s.len() / 8,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Cell, Column};
    use crate::error::FaultKind;

    fn sales() -> Dataset {
        Dataset::new(vec![
            Column::new(
                "State",
                ["CA", "NY", "TX", "CA", "WA"].iter().map(|s| Cell::Text(s.to_string())).collect(),
            ),
            Column::new(
                "Sales",
                [10.0, 40.0, 25.0, 5.0, 30.0].iter().map(|n| Cell::Number(*n)).collect(),
            ),
        ])
        .unwrap()
    }

    fn run(src: &str) -> Result<Dataset, SandboxError> {
        execute(src, &sales(), &Limits::default())
    }

    fn fault(src: &str) -> ExecFault {
        match run(src) {
            Err(SandboxError::Fault(f)) => f,
            other => panic!("expected fault for {:?}, got {:?}", src, other),
        }
    }

    #[test]
    fn returns_bound_table() {
        let table = run("filtered_df = df.head(2)").unwrap();
        assert_eq!(table.height(), 2);
    }

    #[test]
    fn caller_dataset_is_untouched() {
        let data = sales();
        execute("df['Sales'] = 0\nfiltered_df = df", &data, &Limits::default()).unwrap();
        assert_eq!(data, sales());
    }

    #[test]
    fn missing_output_is_a_contract_violation() {
        assert!(matches!(run("result = df"), Err(SandboxError::Contract(_))));
    }

    #[test]
    fn non_frame_output_is_a_contract_violation() {
        let Err(SandboxError::Contract(reason)) = run("filtered_df = df['Sales']") else {
            panic!("expected contract violation");
        };
        assert!(reason.contains("Series"));
        assert!(matches!(run("filtered_df = 3"), Err(SandboxError::Contract(_))));
    }

    #[test]
    fn syntax_errors_are_located() {
        let f = fault("filtered_df = df[");
        assert_eq!(f.kind, FaultKind::Syntax);
        assert!(f.span.is_some());
    }

    #[test]
    fn runtime_faults_carry_statement_location() {
        let f = fault("x = 1\nfiltered_df = df['Nope']");
        assert_eq!(f.kind, FaultKind::Runtime);
        assert_eq!(f.span.map(|s| s.line), Some(2));
        assert!(f.message.contains("KeyError"));
    }

    #[test]
    fn program_size_limit() {
        let limits = Limits { max_program_bytes: 10, ..Limits::default() };
        let Err(SandboxError::Fault(f)) = execute("filtered_df = df", &sales(), &limits) else {
            panic!("expected fault");
        };
        assert_eq!(f.kind, FaultKind::ResourceExhausted(Resource::ProgramSize));
    }

    #[test]
    fn statement_limit() {
        let limits = Limits { max_statements: 2, ..Limits::default() };
        let src = "a = 1\nb = 2\nfiltered_df = df";
        let Err(SandboxError::Fault(f)) = execute(src, &sales(), &limits) else {
            panic!("expected fault");
        };
        assert_eq!(f.kind, FaultKind::ResourceExhausted(Resource::Statements));
    }

    #[test]
    fn wall_clock_limit() {
        let limits = Limits { wall_clock: Duration::ZERO, ..Limits::default() };
        let Err(SandboxError::Fault(f)) = execute("filtered_df = df", &sales(), &limits) else {
            panic!("expected fault");
        };
        assert_eq!(f.kind, FaultKind::ResourceExhausted(Resource::WallClock));
    }

    #[test]
    fn memory_limit() {
        let limits = Limits { max_cells: 1_000, ..Limits::default() };
        let Err(SandboxError::Fault(f)) =
            execute("x = [0] * 5000\nfiltered_df = df", &sales(), &limits)
        else {
            panic!("expected fault");
        };
        assert_eq!(f.kind, FaultKind::ResourceExhausted(Resource::Memory));
    }

    #[test]
    fn memory_limit_counts_text_bytes() {
        let limits = Limits { max_cells: 1_000, ..Limits::default() };
        let memory = |src: &str| match execute(src, &sales(), &limits) {
            Err(SandboxError::Fault(f)) => f.kind == FaultKind::ResourceExhausted(Resource::Memory),
            _ => false,
        };

        let doubling = format!("x = df['State']\n{}filtered_df = df", "x = x + x\n".repeat(16));
        assert!(memory(&doubling));
        assert!(memory("x = [('a' * 8000)] * 1000\nfiltered_df = df"));
        assert!(memory("x = 'a' * 4000\ny = x + x + x\nfiltered_df = df"));
        assert!(memory("x = df['State'] + ('a' * 7000)\nfiltered_df = df"));
        assert!(memory("x = 'a' * 7000\ny = [x] + [x]\nfiltered_df = df"));
        assert!(memory("df['Big'] = 'a' * 2000\nfiltered_df = df"));

        assert!(execute("x = df['State'] + '!'\nfiltered_df = df", &sales(), &limits).is_ok());
    }

    #[test]
    fn huge_slice_steps_select_one_row() {
        assert_eq!(run("filtered_df = df.iloc[1::10**19]").unwrap().height(), 1);
        assert_eq!(run("filtered_df = df.iloc[::-10**19]").unwrap().height(), 1);
        assert_eq!(run("filtered_df = df.loc[2:10**19]").unwrap().height(), 3);
        assert_eq!(run("x = [] * 10**19\nfiltered_df = df").unwrap().height(), 5);
    }

    #[test]
    fn deep_nesting_is_a_syntax_fault() {
        let src = format!("x = {}1{}\nfiltered_df = df", "(".repeat(20_000), ")".repeat(20_000));
        assert!(src.len() < Limits::default().max_program_bytes);
        assert_eq!(fault(&src).kind, FaultKind::Syntax);
    }

    #[test]
    fn cancellation() {
        let token = CancelToken::new();
        token.cancel();
        let limits = Limits { cancel: Some(token), ..Limits::default() };
        assert!(matches!(execute("filtered_df = df", &sales(), &limits), Err(SandboxError::Cancelled)));
    }

    #[test]
    fn containment_faults() {
        assert!(fault("import os\nfiltered_df = df").is_containment());
        assert!(fault("filtered_df = pd.read_csv('/etc/passwd')").is_containment());
        assert!(fault("df.to_csv('/tmp/x')\nfiltered_df = df").is_containment());
    }

    #[test]
    fn into_pipeline_keeps_program() {
        let err = SandboxError::Contract("missing".into()).into_pipeline("x = 1");
        assert_eq!(err.program(), Some("x = 1"));
        assert_eq!(err.stage(), Stage::Execute);
        assert!(matches!(
            SandboxError::Cancelled.into_pipeline("x"),
            PipelineError::Cancelled { stage: Stage::Execute }
        ));
    }
}
