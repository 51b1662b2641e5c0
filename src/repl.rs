use std::io::{self, BufRead, Write};

use crate::chart::ChartRequest;
use crate::cli::{self, Outputs, ShellError};
use crate::dataset::Dataset;
use crate::model::CompletionService;
use crate::pipeline::Pipeline;
use crate::schema;

/// What a line typed at the prompt asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Quit,
    Schema,
    Help,
    /// `:chart <kind>`; `None` when the kind was not recognized.
    Chart(Option<ChartRequest>),
    Unknown(String),
    Ask(String),
    Blank,
}

pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Blank;
    }
    let Some(rest) = trimmed.strip_prefix(':') else {
        return Command::Ask(trimmed.to_string());
    };
    let (name, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    match name {
        "q" | "quit" => Command::Quit,
        "schema" => Command::Schema,
        "help" | "h" => Command::Help,
        "chart" => Command::Chart(ChartRequest::parse(arg)),
        other => Command::Unknown(other.to_string()),
    }
}

/// Run an interactive question loop over one dataset.
///
/// Every question is an independent request; only the chart preference
/// carries over between lines.
///
/// Commands:
///   :schema        show the dataset's columns
///   :chart <kind>  chart type for later questions (auto bar line pie hist scatter)
///   :q / :quit     exit
pub fn run<S: CompletionService>(
    pipeline: &Pipeline<S>,
    dataset: &Dataset,
    chart: ChartRequest,
    outputs: &Outputs,
    color: bool,
) -> Result<(), ShellError> {
    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let mut chart = chart;

    loop {
        print!("ask> ");
        io::stdout().flush()?;

        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("nlq: read error: {}", e);
                break;
            }
        }

        match parse_command(&line) {
            Command::Blank => {}
            Command::Quit => break,
            Command::Help => print_help(),
            Command::Schema => match schema::introspect(dataset) {
                Ok(s) => print!("{}", schema::describe(dataset, &s, color)),
                Err(e) => cli::report_error(&e, color),
            },
            Command::Chart(Some(request)) => {
                chart = request;
                println!("(chart: {})", chart);
            }
            Command::Chart(None) => {
                eprintln!("nlq: expected one of auto, bar, line, pie, hist, scatter");
            }
            Command::Unknown(name) => eprintln!("nlq: unknown command :{} (try :help)", name),
            Command::Ask(query) => {
                cli::answer(pipeline, dataset, &query, chart, outputs, color)?;
                println!();
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!("  :schema        show the dataset's columns");
    println!("  :chart <kind>  auto, bar, line, pie, hist or scatter");
    println!("  :q             quit");
    println!("  anything else is asked as a question");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::ChartKind;

    #[test]
    fn commands() {
        assert_eq!(parse_command("  \n"), Command::Blank);
        assert_eq!(parse_command(":q\n"), Command::Quit);
        assert_eq!(parse_command(":schema"), Command::Schema);
        assert_eq!(parse_command(":chart pie"), Command::Chart(Some(ChartRequest::Kind(ChartKind::Pie))));
        assert_eq!(parse_command(":chart donut"), Command::Chart(None));
        assert_eq!(parse_command(":frobnicate"), Command::Unknown("frobnicate".into()));
        assert_eq!(parse_command("top 5 states\n"), Command::Ask("top 5 states".into()));
    }
}
