//! Insight Summarizer: a second model call that narrates a result table.

use crate::compiler::py_list_repr;
use crate::dataset::Dataset;
use crate::model::{CompletionRequest, CompletionService, ModelError};

/// Sampling options for the summary request. The default leaves the
/// temperature to the service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryOptions {
    pub temperature: Option<f64>,
}

pub fn build_prompt(table: &Dataset) -> String {
    let names = table.column_names();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    format!(
        "
You are a Senior Business Consultant. The filtered dataset has {} rows and columns: {}.
Provide a detailed analysis in two sections:
1. What the data is telling us (key insights, trends, extremes)
2. Recommended actions / next steps
",
        table.height(),
        py_list_repr(&names)
    )
}

/// Ask the model to describe `table`.
pub fn summarize(
    service: &dyn CompletionService,
    table: &Dataset,
    options: &SummaryOptions,
) -> Result<String, ModelError> {
    let request = CompletionRequest::new(build_prompt(table)).with_temperature(options.temperature);
    tracing::info!(rows = table.height(), "requesting summary");
    let text = service.complete(&request)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ModelError::EmptyCompletion);
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Cell, Column};

    struct Fixed(&'static str);

    impl CompletionService for Fixed {
        fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
            assert_eq!(request.temperature, None);
            Ok(self.0.to_string())
        }
    }

    fn table() -> Dataset {
        Dataset::new(vec![
            Column::new("State", vec![Cell::Text("CA".into())]),
            Column::new("Sales", vec![Cell::Number(1.0)]),
        ])
        .unwrap()
    }

    #[test]
    fn prompt_names_rows_and_columns() {
        let prompt = build_prompt(&table());
        assert!(prompt.contains("The filtered dataset has 1 rows and columns: ['State', 'Sales'].\n"));
        assert!(prompt.ends_with("2. Recommended actions / next steps\n"));
    }

    #[test]
    fn narrative_is_trimmed() {
        let text = summarize(&Fixed("  Sales are high.\n"), &table(), &SummaryOptions::default()).unwrap();
        assert_eq!(text, "Sales are high.");
    }

    #[test]
    fn blank_narrative_is_an_error() {
        let err = summarize(&Fixed(" \n"), &table(), &SummaryOptions::default()).unwrap_err();
        assert_eq!(err, ModelError::EmptyCompletion);
    }
}
