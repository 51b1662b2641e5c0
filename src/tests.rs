use std::collections::VecDeque;
use std::sync::Mutex;

use crate::chart::{ChartKind, ChartRequest};
use crate::dataset::{Cell, Column, Dataset};
use crate::error::{FaultKind, PipelineError, Resource, Stage};
use crate::model::{CompletionRequest, CompletionService, ModelError};
use crate::pipeline::{Narrative, Pipeline, PipelineOptions};
use crate::sandbox::Limits;
use crate::{input, schema};

/// Completion service that plays back canned replies in order and records
/// every prompt it was sent.
struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, ModelError>>>,
    prompts: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Result<String, ModelError>>) -> Self {
        ScriptedModel { replies: Mutex::new(replies.into()), prompts: Mutex::new(Vec::new()) }
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl CompletionService for ScriptedModel {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        self.prompts.lock().unwrap().push(request.clone());
        self.replies.lock().unwrap().pop_front().unwrap_or(Err(ModelError::EmptyCompletion))
    }
}

fn ok(s: &str) -> Result<String, ModelError> {
    Ok(s.to_string())
}

/// 50 states with distinct sales figures and a region.
fn sales() -> Dataset {
    let regions = ["West", "South", "East", "Midwest"];
    Dataset::new(vec![
        Column::new("State", (0..50).map(|i| Cell::Text(format!("State{:02}", i))).collect()),
        Column::new("Region", (0..50).map(|i| Cell::Text(regions[i % 4].to_string())).collect()),
        Column::new("Sales", (0..50).map(|i| Cell::Number(((i * 37) % 50) as f64 * 10.0)).collect()),
    ])
    .unwrap()
}

fn pipeline(replies: Vec<Result<String, ModelError>>) -> Pipeline<ScriptedModel> {
    Pipeline::new(ScriptedModel::new(replies), PipelineOptions::default())
}

fn numbers(ds: &Dataset, col: &str) -> Vec<f64> {
    ds.column(col).unwrap().values.iter().filter_map(Cell::as_number).collect()
}

// ── Full requests ───────────────────────────────────────────────

#[test]
fn top_five_states_by_sales() {
    let p = pipeline(vec![
        ok("```python\nfiltered_df = df.sort_values('Sales', ascending=False).head(5)\n```"),
        ok("California leads."),
    ]);
    let analysis = p.run(&sales(), "Top 5 states by Sales", ChartRequest::Auto).unwrap();

    assert_eq!(analysis.table.height(), 5);
    assert_eq!(numbers(&analysis.table, "Sales"), vec![490.0, 480.0, 470.0, 460.0, 450.0]);

    let chart = analysis.chart.unwrap();
    assert_eq!(chart.kind, ChartKind::Bar);
    assert_eq!(chart.x, "State");
    assert_eq!(chart.y.as_deref(), Some("Sales"));
    assert_eq!(chart.data, analysis.table);

    assert_eq!(analysis.narrative, Narrative::Text("California leads.".into()));
    assert_eq!(analysis.schema.rows, 50);
}

#[test]
fn both_prompts_are_sent() {
    let p = pipeline(vec![ok("filtered_df = df.head(3)"), ok("ok")]);
    p.run(&sales(), "first three", ChartRequest::Auto).unwrap();

    let prompts = p.service().prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].prompt.contains("Dataset columns: ['State', 'Region', 'Sales']"));
    assert!(prompts[0].prompt.contains("User query: first three"));
    assert_eq!(prompts[0].temperature, Some(1.0));
    assert!(prompts[1].prompt.contains("The filtered dataset has 3 rows and columns: ['State', 'Region', 'Sales']."));
    assert_eq!(prompts[1].temperature, None);
}

#[test]
fn a_filter_matching_nothing_still_charts_as_bar() {
    let p = pipeline(vec![ok("filtered_df = df[df['Sales'] > 100000]"), ok("Nothing matched.")]);
    let analysis = p.run(&sales(), "states above 100k", ChartRequest::Auto).unwrap();
    assert_eq!(analysis.table.height(), 0);

    let chart = analysis.chart.unwrap();
    assert_eq!(chart.kind, ChartKind::Bar);
    assert_eq!(chart.x, "State");
    assert_eq!(chart.y.as_deref(), Some("Sales"));
}

#[test]
fn boxed_services_drive_the_pipeline() {
    let service: Box<dyn CompletionService> =
        Box::new(ScriptedModel::new(vec![ok("filtered_df = df.head(2)"), ok("Two rows.")]));
    let p = Pipeline::new(service, PipelineOptions::default());
    let analysis = p.run(&sales(), "two", ChartRequest::Auto).unwrap();
    assert_eq!(analysis.table.height(), 2);
    assert_eq!(analysis.narrative.text(), Some("Two rows."));
}

#[test]
fn grouped_totals_chart_as_bar() {
    let p = pipeline(vec![
        ok("filtered_df = df.groupby('Region')['Sales'].sum().reset_index().sort_values('Sales', ascending=False)"),
        ok("Regions differ."),
    ]);
    let analysis = p.run(&sales(), "Sales by region", ChartRequest::Auto).unwrap();
    assert_eq!(analysis.table.column_names(), vec!["Region", "Sales"]);
    assert_eq!(analysis.table.height(), 4);
    let totals = numbers(&analysis.table, "Sales");
    assert_eq!(totals.iter().sum::<f64>(), numbers(&sales(), "Sales").iter().sum::<f64>());
    assert!(totals.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(analysis.chart.unwrap().kind, ChartKind::Bar);
}

#[test]
fn categorical_only_result_is_a_pie() {
    let p = pipeline(vec![ok("filtered_df = df[['Region']]"), ok("Four regions.")]);
    let analysis = p.run(&sales(), "Which regions appear?", ChartRequest::Auto).unwrap();
    let chart = analysis.chart.unwrap();
    assert_eq!(chart.kind, ChartKind::Pie);
    assert_eq!(chart.data.height(), 4);
    let total: f64 = numbers(&chart.data, "count").iter().sum();
    assert!(total <= analysis.table.height() as f64);
}

#[test]
fn explicit_chart_request_is_honoured() {
    let p = pipeline(vec![ok("filtered_df = df[['Sales']]"), ok("Spread out.")]);
    let analysis = p.run(&sales(), "Sales", ChartRequest::Kind(ChartKind::Bar)).unwrap();
    // no categorical column to put on the axis
    assert!(analysis.chart.is_none());
    assert_eq!(analysis.table.height(), 50);
}

#[test]
fn summary_failure_is_not_fatal() {
    let p = pipeline(vec![ok("filtered_df = df.nlargest(3, 'Sales')"), Err(ModelError::Timeout)]);
    let analysis = p.run(&sales(), "Top 3", ChartRequest::Auto).unwrap();
    assert_eq!(analysis.table.height(), 3);
    assert!(analysis.chart.is_some());
    assert_eq!(analysis.narrative, Narrative::Unavailable(ModelError::Timeout));
}

#[test]
fn skipped_summary_sends_one_request() {
    let options = PipelineOptions { skip_summary: true, ..PipelineOptions::default() };
    let p = Pipeline::new(ScriptedModel::new(vec![ok("filtered_df = df")]), options);
    let analysis = p.run(&sales(), "everything", ChartRequest::Auto).unwrap();
    assert_eq!(analysis.narrative, Narrative::Skipped);
    assert_eq!(p.service().calls(), 1);
}

// ── Failures ────────────────────────────────────────────────────

#[test]
fn compile_timeout_stops_everything() {
    let p = pipeline(vec![Err(ModelError::Timeout)]);
    let err = p.run(&sales(), "Top 5 states by Sales", ChartRequest::Auto).unwrap_err();
    assert!(matches!(err, PipelineError::CompilationService(ModelError::Timeout)));
    assert_eq!(err.stage(), Stage::Compile);
    assert!(err.program().is_none());
    assert!(err.is_retryable());
    assert_eq!(p.service().calls(), 1);
}

#[test]
fn empty_dataset_is_refused_before_compiling() {
    let p = pipeline(vec![ok("filtered_df = df")]);
    let err = p.run(&Dataset::default(), "anything", ChartRequest::Auto).unwrap_err();
    assert!(matches!(err, PipelineError::EmptyDataset));
    assert_eq!(p.service().calls(), 0);
}

#[test]
fn blank_completion_is_compilation_empty() {
    let p = pipeline(vec![ok("```\n```")]);
    let err = p.run(&sales(), "anything", ChartRequest::Auto).unwrap_err();
    assert!(matches!(err, PipelineError::CompilationEmpty { .. }));
}

#[test]
fn division_by_zero_carries_the_program() {
    let program = "x = 1 / 0\nfiltered_df = df";
    let p = pipeline(vec![ok(program)]);
    let err = p.run(&sales(), "divide", ChartRequest::Auto).unwrap_err();
    let PipelineError::ProgramExecution { program: text, fault } = &err else {
        panic!("expected execution error, got {:?}", err);
    };
    assert_eq!(text, program);
    assert_eq!(fault.kind, FaultKind::Runtime);
    assert!(fault.message.starts_with("ZeroDivisionError"));
    assert_eq!(fault.span.map(|s| s.line), Some(1));
    assert_eq!(err.program(), Some(program));
    // summary is never requested after a failed execution
    assert_eq!(p.service().calls(), 1);
}

#[test]
fn missing_output_binding_is_a_contract_violation() {
    let p = pipeline(vec![ok("result = df.head(5)")]);
    let err = p.run(&sales(), "top", ChartRequest::Auto).unwrap_err();
    assert!(matches!(err, PipelineError::OutputContractViolation { .. }));
    assert_eq!(err.program(), Some("result = df.head(5)"));
}

#[test]
fn non_frame_output_is_a_contract_violation() {
    let p = pipeline(vec![ok("filtered_df = df['Sales'].sum()")]);
    let err = p.run(&sales(), "total", ChartRequest::Auto).unwrap_err();
    assert!(matches!(err, PipelineError::OutputContractViolation { .. }));
}

#[test]
fn filesystem_and_network_access_is_contained() {
    for program in [
        "import os\nfiltered_df = df",
        "filtered_df = pd.read_csv('/etc/passwd')",
        "open('/tmp/x', 'w')\nfiltered_df = df",
        "df.to_csv('/tmp/out.csv')\nfiltered_df = df",
        "import socket\nfiltered_df = df",
        "filtered_df = df.__class__",
    ] {
        let p = pipeline(vec![ok(program)]);
        let err = p.run(&sales(), "q", ChartRequest::Auto).unwrap_err();
        let PipelineError::ProgramExecution { fault, .. } = &err else {
            panic!("{}: expected execution error, got {:?}", program, err);
        };
        assert_eq!(fault.kind, FaultKind::Containment, "{}", program);
    }
}

#[test]
fn intermediate_tables_are_capped() {
    let options = PipelineOptions {
        limits: Limits { max_cells: 200, ..Limits::default() },
        ..PipelineOptions::default()
    };
    let p = Pipeline::new(ScriptedModel::new(vec![ok("filtered_df = pd.concat([df, df, df])")]), options);
    let err = p.run(&sales(), "triple", ChartRequest::Auto).unwrap_err();
    let PipelineError::ProgramExecution { fault, .. } = err else { panic!("expected execution error") };
    assert_eq!(fault.kind, FaultKind::ResourceExhausted(Resource::Memory));
}

#[test]
fn the_callers_dataset_is_untouched() {
    let data = sales();
    let p = pipeline(vec![ok("df['Sales'] = 0\ndf.drop(columns=['Region'], inplace=True)\nfiltered_df = df"), ok("x")]);
    let analysis = p.run(&data, "zero out", ChartRequest::Auto).unwrap();
    assert_eq!(analysis.table.width(), 2);
    assert_eq!(data, sales());
}

// ── Loading to answering ────────────────────────────────────────

#[test]
fn csv_file_through_the_pipeline() {
    use std::io::Write;

    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "City,Temp,Country").unwrap();
    writeln!(file, "Oslo,4,NO").unwrap();
    writeln!(file, "Lima,19,PE").unwrap();
    writeln!(file, "Pune,31,IN").unwrap();
    writeln!(file, "Bergen,,NO").unwrap();

    let data = input::load_path(file.path(), None).unwrap();
    let schema = schema::introspect(&data).unwrap();
    assert_eq!(schema.numeric_columns(), vec!["Temp"]);
    assert_eq!(schema.categorical_columns(), vec!["City", "Country"]);

    let p = pipeline(vec![ok("filtered_df = df[df['Temp'] > 10][['City', 'Temp']]"), ok("Warm places.")]);
    let analysis = p.run(&data, "Where is it warm?", ChartRequest::Auto).unwrap();
    assert_eq!(analysis.table.to_csv_string(), "City,Temp\nLima,19\nPune,31\n");
}
