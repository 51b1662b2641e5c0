//! Query compilation: turn a natural-language question into a candidate
//! program by asking the model service, then pull the program text out of
//! the completion.

use crate::error::PipelineError;
use crate::model::{CompletionRequest, CompletionService};
use crate::schema::Schema;

const FENCE: &str = "```";

/// Language tags a model may leave on a line of their own.
const LANGUAGE_TAGS: &[&str] = &["python", "python3", "py", "pandas"];

/// Sampling options for the compile request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    pub temperature: f64,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { temperature: 1.0 }
    }
}

/// A program extracted from a completion, with the prompt that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateProgram {
    pub text: String,
    pub prompt: String,
}

/// Render the compile prompt for `query` against `schema`.
pub fn build_prompt(schema: &Schema, query: &str) -> String {
    format!(
        "
You are a Python data analyst. Based on this user query, write a Pandas filtering or aggregation operation.
The variable 'df' contains the dataset.
Return ONLY a Python snippet that produces a new DataFrame called 'filtered_df'.
Dataset columns: {}
User query: {}

Requirements:
- If top/bottom N requested, ensure numeric sorting
- filtered_df must contain ONLY the rows requested
- Do not include explanations, only code
",
        py_list_repr(&schema.names()),
        query
    )
}

/// Python `repr()` of a list of strings: `['a', "b's"]`.
pub fn py_list_repr(items: &[&str]) -> String {
    let parts: Vec<String> = items.iter().map(|s| py_str_repr(s)).collect();
    format!("[{}]", parts.join(", "))
}

fn py_str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Ask the model for a program answering `query`. Blank queries are refused
/// before any request is made.
pub fn compile(
    service: &dyn CompletionService,
    schema: &Schema,
    query: &str,
    options: &CompileOptions,
) -> Result<CandidateProgram, PipelineError> {
    if query.trim().is_empty() {
        return Err(PipelineError::EmptyQuery);
    }

    let prompt = build_prompt(schema, query);
    let request = CompletionRequest::new(prompt.clone()).with_temperature(Some(options.temperature));
    tracing::info!(columns = schema.columns.len(), "compiling query");
    let completion = service.complete(&request).map_err(|e| {
        tracing::warn!(error = %e, "compile request failed");
        PipelineError::CompilationService(e)
    })?;

    let text = extract_program(&completion)?;
    tracing::debug!(program = %text, "extracted candidate program");
    Ok(CandidateProgram { text, prompt })
}

/// Pull the program out of a completion.
///
/// A single fenced block wins; several blocks are ambiguous. Without a
/// complete block the whole completion is used, minus stray fences and a
/// lone language tag.
pub fn extract_program(completion: &str) -> Result<String, PipelineError> {
    let mut blocks: Vec<Vec<&str>> = Vec::new();
    let mut open: Option<Vec<&str>> = None;

    for line in completion.lines() {
        let trimmed = line.trim();
        match open.as_mut() {
            None => {
                if let Some(rest) = trimmed.strip_prefix(FENCE) {
                    // ```code``` on one line
                    if let Some(inline) = rest.strip_suffix(FENCE) {
                        blocks.push(vec![inline]);
                    } else {
                        open = Some(Vec::new());
                    }
                }
            }
            Some(body) => {
                if let Some(code) = line.trim_end().strip_suffix(FENCE) {
                    if !code.trim().is_empty() {
                        body.push(code);
                    }
                    blocks.extend(open.take());
                } else {
                    body.push(line);
                }
            }
        }
    }

    let program = match blocks.len() {
        0 => strip_stray(completion),
        1 => dedent(&blocks[0]),
        n => {
            return Err(PipelineError::CompilationEmpty {
                reason: format!("completion contains {} code blocks", n),
            });
        }
    };

    if program.trim().is_empty() {
        return Err(PipelineError::CompilationEmpty { reason: "completion contains no code".to_string() });
    }
    Ok(program)
}

/// Drop fence lines and surrounding backticks, then a leading language tag.
fn strip_stray(completion: &str) -> String {
    let lines: Vec<&str> = completion
        .trim()
        .trim_matches('`')
        .lines()
        .filter(|l| !l.trim_start().starts_with(FENCE))
        .collect();
    let mut lines: &[&str] = &lines;
    while let Some((first, rest)) = lines.split_first() {
        let tag = first.trim().to_ascii_lowercase();
        if tag.is_empty() || LANGUAGE_TAGS.contains(&tag.as_str()) {
            lines = rest;
        } else {
            break;
        }
    }
    dedent(lines)
}

/// Remove indentation shared by every non-blank line.
fn dedent(lines: &[&str]) -> String {
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let body: Vec<&str> = lines
        .iter()
        .map(|l| if l.len() >= indent && l.is_char_boundary(indent) { &l[indent..] } else { l.trim_start() })
        .collect();
    body.join("\n").trim_matches('\n').trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::model::ModelError;
    use crate::schema::{ColumnInfo, ColumnKind};

    fn schema() -> Schema {
        Schema {
            columns: vec![
                ColumnInfo { name: "State".into(), kind: ColumnKind::Categorical },
                ColumnInfo { name: "Sales".into(), kind: ColumnKind::Numeric },
            ],
            rows: 50,
        }
    }

    struct Recorder {
        reply: Result<String, ModelError>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl CompletionService for Recorder {
        fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply.clone()
        }
    }

    fn recorder(reply: Result<String, ModelError>) -> Recorder {
        Recorder { reply, seen: Mutex::new(Vec::new()) }
    }

    #[test]
    fn prompt_lists_columns_as_python() {
        let prompt = build_prompt(&schema(), "Top 5 states by Sales");
        assert!(prompt.starts_with("\nYou are a Python data analyst."));
        assert!(prompt.contains("Dataset columns: ['State', 'Sales']\n"));
        assert!(prompt.contains("User query: Top 5 states by Sales\n"));
        assert!(prompt.ends_with("- Do not include explanations, only code\n"));
    }

    #[test]
    fn python_string_reprs() {
        assert_eq!(py_list_repr(&["it's", "a\\b"]), r#"["it's", 'a\\b']"#);
        assert_eq!(py_list_repr(&[]), "[]");
    }

    #[test]
    fn single_fenced_block() {
        let text = "Here you go:\n```python\nfiltered_df = df.head(5)\n```\nEnjoy.";
        assert_eq!(extract_program(text).unwrap(), "filtered_df = df.head(5)");
    }

    #[test]
    fn unfenced_completion_is_used_whole() {
        let text = "filtered_df = df[df['Sales'] > 3]\n";
        assert_eq!(extract_program(text).unwrap(), "filtered_df = df[df['Sales'] > 3]");
    }

    #[test]
    fn stray_fences_and_language_tag() {
        assert_eq!(extract_program("python\nfiltered_df = df").unwrap(), "filtered_df = df");
        assert_eq!(extract_program("```python\nfiltered_df = df").unwrap(), "filtered_df = df");
        assert_eq!(extract_program("`filtered_df = df`").unwrap(), "filtered_df = df");
    }

    #[test]
    fn indented_block_is_dedented() {
        let text = "```\n    x = 1\n    filtered_df = df\n```";
        assert_eq!(extract_program(text).unwrap(), "x = 1\nfiltered_df = df");
    }

    #[test]
    fn several_blocks_are_ambiguous() {
        let text = "```\na = 1\n```\nor\n```\nb = 2\n```";
        assert!(matches!(extract_program(text), Err(PipelineError::CompilationEmpty { .. })));
    }

    #[test]
    fn empty_completion_rejected() {
        assert!(matches!(extract_program("  \n"), Err(PipelineError::CompilationEmpty { .. })));
        assert!(matches!(extract_program("```python\n```"), Err(PipelineError::CompilationEmpty { .. })));
    }

    #[test]
    fn compile_sends_one_request_with_temperature() {
        let service = recorder(Ok("filtered_df = df".into()));
        let program = compile(&service, &schema(), "all rows", &CompileOptions::default()).unwrap();
        assert_eq!(program.text, "filtered_df = df");
        let seen = service.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].temperature, Some(1.0));
        assert_eq!(seen[0].prompt, program.prompt);
    }

    #[test]
    fn blank_query_never_reaches_the_service() {
        let service = recorder(Ok("filtered_df = df".into()));
        assert!(matches!(compile(&service, &schema(), "   ", &CompileOptions::default()), Err(PipelineError::EmptyQuery)));
        assert!(service.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn service_failure_is_reported() {
        let service = recorder(Err(ModelError::Timeout));
        let err = compile(&service, &schema(), "q", &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::CompilationService(ModelError::Timeout)));
    }
}
