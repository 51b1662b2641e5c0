//! The `nlq` shell: argument parsing, dataset loading, and rendering of
//! analyses and failures. All terminal and file I/O lives here and in
//! [`crate::repl`].

use std::fs::File;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::Parser;

use crate::chart::ChartRequest;
use crate::compiler::CompileOptions;
use crate::config::{Config, ConfigError};
use crate::dataset::Dataset;
use crate::error::PipelineError;
use crate::input::{self, InputFormat};
use crate::model::{ModelError, OpenAiClient};
use crate::pipeline::{Analysis, Narrative, Pipeline, PipelineOptions};
use crate::schema;
use crate::vegalite;

/// Rows of the result table printed to the terminal.
const PREVIEW_ROWS: usize = 20;

#[derive(Parser, Debug)]
#[command(name = "nlq", version)]
#[command(about = "Ask a tabular dataset questions in plain language")]
pub struct Args {
    /// Dataset file (csv, tsv, json/jsonl, parquet)
    pub file: PathBuf,

    /// Question to answer; without it an interactive session starts
    #[arg(short, long)]
    pub query: Option<String>,

    /// Chart type: auto, bar, line, pie, hist or scatter
    #[arg(short, long, default_value = "auto")]
    pub chart: ChartRequest,

    /// Write the result table as CSV
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write the chart as a Vega-Lite document
    #[arg(long)]
    pub chart_out: Option<PathBuf>,

    /// Print the dataset schema and exit
    #[arg(short, long)]
    pub describe: bool,

    /// Configuration file (default: ./nlq.toml if present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Model name, overriding the configuration
    #[arg(short, long)]
    pub model: Option<String>,

    /// Input format, overriding the file extension
    #[arg(short = 'i', long, value_parser = parse_format)]
    pub input_format: Option<InputFormat>,

    /// Skip the summary request
    #[arg(long)]
    pub no_summary: bool,
}

fn parse_format(s: &str) -> Result<InputFormat, String> {
    InputFormat::parse(s).ok_or_else(|| format!("unknown input format '{}' (expected csv, tsv, json or parquet)", s))
}

/// Failures of the shell itself, as opposed to a failed request.
/// Loader errors already carry the `nlq: path:` prefix.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("nlq: {0}")]
    Config(#[from] ConfigError),

    #[error("nlq: cannot create model client: {0}")]
    Client(#[from] ModelError),

    #[error("nlq: cannot write chart: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where results are written besides the terminal.
#[derive(Debug, Clone, Default)]
pub struct Outputs {
    pub table: Option<PathBuf>,
    pub chart: Option<PathBuf>,
}

/// Run the shell. Returns the process exit code: 0 on success, 1 when the
/// request failed.
pub fn run(args: Args) -> Result<i32, ShellError> {
    let dataset = input::load_path(&args.file, args.input_format)?;
    let color = io::stdout().is_terminal();

    if args.describe {
        let schema = match schema::introspect(&dataset) {
            Ok(schema) => schema,
            Err(e) => {
                report_error(&e, color);
                return Ok(1);
            }
        };
        print!("{}", schema::describe(&dataset, &schema, color));
        return Ok(0);
    }

    let config = Config::load(args.config.as_deref())?;
    let model_name = args.model.clone().unwrap_or_else(|| config.model.name.clone());
    let api_key = config.model.api_key()?;
    let client = OpenAiClient::new(api_key, model_name, &config.model.base_url, config.model.timeout())?;

    let options = PipelineOptions {
        compile: CompileOptions { temperature: config.model.temperature },
        limits: config.sandbox.limits(),
        skip_summary: args.no_summary,
        ..PipelineOptions::default()
    };
    let pipeline = Pipeline::new(client, options);
    let outputs = Outputs { table: args.output, chart: args.chart_out };
    tracing::info!(file = %args.file.display(), rows = dataset.height(), "dataset loaded");

    match args.query {
        Some(query) => answer(&pipeline, &dataset, &query, args.chart, &outputs, color),
        None => {
            crate::repl::run(&pipeline, &dataset, args.chart, &outputs, color)?;
            Ok(0)
        }
    }
}

/// Run one question and render its outcome.
pub fn answer<S: crate::model::CompletionService>(
    pipeline: &Pipeline<S>,
    dataset: &Dataset,
    query: &str,
    chart: ChartRequest,
    outputs: &Outputs,
    color: bool,
) -> Result<i32, ShellError> {
    match pipeline.run(dataset, query, chart) {
        Ok(analysis) => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            render(&analysis, &mut out, color)?;
            write_outputs(&analysis, outputs)?;
            Ok(0)
        }
        Err(e) => {
            report_error(&e, color);
            Ok(1)
        }
    }
}

pub fn render(analysis: &Analysis, out: &mut dyn Write, color: bool) -> io::Result<()> {
    let (bold, dim, reset) = if color { ("\x1b[1m", "\x1b[90m", "\x1b[0m") } else { ("", "", "") };

    writeln!(out, "{}program:{}", bold, reset)?;
    for line in analysis.program.lines() {
        writeln!(out, "  {}{}{}", dim, line, reset)?;
    }
    writeln!(out)?;

    writeln!(
        out,
        "{}result:{} {} rows × {} columns",
        bold,
        reset,
        analysis.table.height(),
        analysis.table.width()
    )?;
    write!(out, "{}", analysis.table.preview(PREVIEW_ROWS))?;
    if analysis.table.height() > PREVIEW_ROWS {
        writeln!(out, "{}… {} more rows{}", dim, analysis.table.height() - PREVIEW_ROWS, reset)?;
    }
    writeln!(out)?;

    match &analysis.chart {
        Some(chart) => {
            write!(out, "{}chart:{} {} x={}", bold, reset, chart.kind, chart.x)?;
            if let Some(y) = &chart.y {
                write!(out, " y={}", y)?;
            }
            if let Some(title) = &chart.title {
                write!(out, " \"{}\"", title)?;
            }
            writeln!(out, " ({} rows)", chart.data.height())?;
        }
        None => writeln!(out, "{}chart:{} none", bold, reset)?,
    }
    writeln!(out)?;

    match &analysis.narrative {
        Narrative::Text(text) => {
            writeln!(out, "{}summary:{}", bold, reset)?;
            writeln!(out, "{}", text)?;
        }
        Narrative::Unavailable(e) => writeln!(out, "{}summary unavailable:{} {}", bold, reset, e)?,
        Narrative::Skipped => {}
    }
    Ok(())
}

/// Print which stage failed and why, with the program when there is one.
pub fn report_error(err: &PipelineError, color: bool) {
    let (red, dim, reset) = if color { ("\x1b[31m", "\x1b[90m", "\x1b[0m") } else { ("", "", "") };
    eprintln!("{}nlq: {} failed:{} {}", red, err.stage(), reset, err);
    if let Some(program) = err.program() {
        eprintln!("{}program:", dim);
        for line in program.lines() {
            eprintln!("  {}", line);
        }
        eprint!("{}", reset);
    }
    if err.is_retryable() {
        eprintln!("nlq: the model service may succeed if the question is asked again");
    }
}

fn write_outputs(analysis: &Analysis, outputs: &Outputs) -> Result<(), ShellError> {
    if let Some(path) = &outputs.table {
        let mut out = create(path)?;
        analysis.table.write_csv(&mut out)?;
        out.flush()?;
        tracing::info!(path = %path.display(), "wrote result table");
    }
    if let Some(path) = &outputs.chart {
        match &analysis.chart {
            Some(chart) => {
                let mut out = create(path)?;
                serde_json::to_writer_pretty(&mut out, &vegalite::to_vega_lite(chart))?;
                writeln!(out)?;
                out.flush()?;
                tracing::info!(path = %path.display(), "wrote chart");
            }
            None => tracing::warn!(path = %path.display(), "no chart to write"),
        }
    }
    Ok(())
}

fn create(path: &Path) -> io::Result<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| io::Error::new(e.kind(), format!("nlq: {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::ChartKind;
    use crate::dataset::{Cell, Column};
    use crate::schema::introspect;

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from(["nlq", "sales.csv", "-q", "top 5", "--chart", "hist", "-i", "tsv"]).unwrap();
        assert_eq!(args.file, PathBuf::from("sales.csv"));
        assert_eq!(args.query.as_deref(), Some("top 5"));
        assert_eq!(args.chart, ChartRequest::Kind(ChartKind::Histogram));
        assert_eq!(args.input_format, Some(InputFormat::Tsv));
    }

    #[test]
    fn rejects_unknown_chart() {
        assert!(Args::try_parse_from(["nlq", "a.csv", "--chart", "donut"]).is_err());
    }

    #[test]
    fn renders_analysis() {
        let table = Dataset::new(vec![
            Column::new("State", vec![Cell::Text("CA".into())]),
            Column::new("Sales", vec![Cell::Number(3.0)]),
        ])
        .unwrap();
        let analysis = Analysis {
            schema: introspect(&table).unwrap(),
            program: "filtered_df = df".into(),
            chart: crate::chart::infer(&table, ChartRequest::Auto),
            narrative: Narrative::Unavailable(ModelError::Timeout),
            table,
        };
        let mut out = Vec::new();
        render(&analysis, &mut out, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("  filtered_df = df\n"));
        assert!(text.contains("result: 1 rows × 2 columns"));
        assert!(text.contains("chart: bar x=State y=Sales \"Top 10 State by Sales\" (1 rows)"));
        assert!(text.contains("summary unavailable: request timed out"));
    }

    #[test]
    fn writes_table_and_chart_files() {
        let dir = tempfile::tempdir().unwrap();
        let table = Dataset::new(vec![Column::new("n", vec![Cell::Number(1.0), Cell::Number(2.0)])]).unwrap();
        let analysis = Analysis {
            schema: introspect(&table).unwrap(),
            program: "filtered_df = df".into(),
            chart: crate::chart::infer(&table, ChartRequest::Auto),
            narrative: Narrative::Skipped,
            table,
        };
        let outputs = Outputs { table: Some(dir.path().join("out.csv")), chart: Some(dir.path().join("c.vl.json")) };
        write_outputs(&analysis, &outputs).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("out.csv")).unwrap(), "n\n1\n2\n");
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("c.vl.json")).unwrap()).unwrap();
        assert_eq!(doc["mark"], "bar");
        assert_eq!(doc["encoding"]["x"]["bin"]["maxbins"], 30);
    }
}
