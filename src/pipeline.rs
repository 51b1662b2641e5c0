//! Request orchestration: introspect, compile, execute, then chart the
//! result while the summary request is in flight.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

use crate::chart::{self, ChartRequest, ChartSpec};
use crate::compiler::{self, CompileOptions};
use crate::dataset::Dataset;
use crate::error::{PipelineError, Stage};
use crate::model::{CompletionService, ModelError};
use crate::sandbox::{self, CancelToken, Limits};
use crate::schema::{self, Schema};
use crate::summary::{self, SummaryOptions};

/// The narrative half of an analysis. A failed summary does not fail the
/// request.
#[derive(Debug, Clone, PartialEq)]
pub enum Narrative {
    Text(String),
    Unavailable(ModelError),
    /// No summary was requested.
    Skipped,
}

impl Narrative {
    pub fn text(&self) -> Option<&str> {
        match self {
            Narrative::Text(text) => Some(text),
            Narrative::Unavailable(_) | Narrative::Skipped => None,
        }
    }
}

/// A completed request.
#[derive(Debug)]
pub struct Analysis {
    pub schema: Schema,
    pub program: String,
    pub table: Dataset,
    pub chart: Option<ChartSpec>,
    pub narrative: Narrative,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub compile: CompileOptions,
    pub summary: SummaryOptions,
    pub limits: Limits,
    /// Skip the summary request entirely.
    pub skip_summary: bool,
}

pub struct Pipeline<S> {
    service: S,
    options: PipelineOptions,
}

impl<S: CompletionService> Pipeline<S> {
    pub fn new(service: S, options: PipelineOptions) -> Self {
        Pipeline { service, options }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn run(&self, dataset: &Dataset, query: &str, request: ChartRequest) -> Result<Analysis, PipelineError> {
        self.run_with_cancel(dataset, query, request, &CancelToken::new())
    }

    /// Run one request. `cancel` is polled between stages and inside the
    /// sandbox; a model call already in flight runs to its own timeout.
    pub fn run_with_cancel(
        &self,
        dataset: &Dataset,
        query: &str,
        request: ChartRequest,
        cancel: &CancelToken,
    ) -> Result<Analysis, PipelineError> {
        let started = Instant::now();

        let schema = schema::introspect(dataset)?;
        tracing::info!(columns = schema.columns.len(), rows = schema.rows, "introspected dataset");
        checkpoint(cancel, Stage::Compile)?;

        let candidate =
            guarded(Stage::Compile, || Ok(compiler::compile(&self.service, &schema, query, &self.options.compile)?))?;
        checkpoint(cancel, Stage::Execute)?;

        let limits = Limits { cancel: Some(cancel.clone()), ..self.options.limits.clone() };
        let table = guarded(Stage::Execute, || {
            sandbox::execute(&candidate.text, dataset, &limits).map_err(|e| {
                let err = e.into_pipeline(&candidate.text);
                tracing::warn!(error = %err, "candidate program failed");
                err
            })
        })?;
        tracing::info!(rows = table.height(), columns = table.width(), "program produced result table");
        checkpoint(cancel, Stage::Chart)?;

        let (chart, narrative) = thread::scope(|s| {
            let worker = (!self.options.skip_summary)
                .then(|| s.spawn(|| summary::summarize(&self.service, &table, &self.options.summary)));
            let chart = guarded(Stage::Chart, || Ok(chart::infer_with_schema(&table, request, &schema)));
            let narrative = match worker {
                None => Narrative::Skipped,
                Some(handle) => match handle.join() {
                    Ok(Ok(text)) => Narrative::Text(text),
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "summary unavailable");
                        Narrative::Unavailable(e)
                    }
                    Err(payload) => {
                        return Err(PipelineError::Unexpected {
                            stage: Stage::Summarize,
                            message: panic_message(payload.as_ref()),
                        });
                    }
                },
            };
            Ok((chart?, narrative))
        })?;
        checkpoint(cancel, Stage::Summarize)?;

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            chart = chart.as_ref().map(|c| c.kind.name()).unwrap_or("none"),
            "request complete"
        );
        Ok(Analysis { schema, program: candidate.text, table, chart, narrative })
    }
}

fn checkpoint(cancel: &CancelToken, stage: Stage) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        tracing::info!(%stage, "request cancelled");
        return Err(PipelineError::Cancelled { stage });
    }
    Ok(())
}

/// Run one stage, turning a panic into [`PipelineError::Unexpected`].
fn guarded<T>(stage: Stage, f: impl FnOnce() -> Result<T, PipelineError>) -> Result<T, PipelineError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(%stage, %message, "stage panicked");
        Err(PipelineError::Unexpected { stage, message })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CompletionRequest;

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }

    #[test]
    fn stage_panics_become_unexpected_errors() {
        let err = guarded::<()>(Stage::Execute, || panic!("index out of bounds")).unwrap_err();
        let PipelineError::Unexpected { stage, message } = err else { panic!("expected unexpected error") };
        assert_eq!(stage, Stage::Execute);
        assert_eq!(message, "index out of bounds");

        assert_eq!(guarded(Stage::Execute, || Ok(7)).unwrap(), 7);
        assert!(matches!(
            guarded::<()>(Stage::Execute, || Err(PipelineError::EmptyQuery)),
            Err(PipelineError::EmptyQuery)
        ));
    }

    struct Panicking;

    impl CompletionService for Panicking {
        fn complete(&self, _: &CompletionRequest) -> Result<String, ModelError> {
            panic!("service bug")
        }
    }

    #[test]
    fn a_panicking_stage_does_not_unwind_the_caller() {
        let pipeline = Pipeline::new(Panicking, PipelineOptions::default());
        let ds = Dataset::new(vec![crate::dataset::Column::new("a", vec![crate::dataset::Cell::Number(1.0)])]).unwrap();
        let err = pipeline.run(&ds, "everything", ChartRequest::Auto).unwrap_err();
        assert!(matches!(err, PipelineError::Unexpected { stage: Stage::Compile, .. }));
    }

    struct Cancelling(CancelToken);

    impl CompletionService for Cancelling {
        fn complete(&self, _: &CompletionRequest) -> Result<String, ModelError> {
            self.0.cancel();
            Ok("filtered_df = df".into())
        }
    }

    #[test]
    fn cancellation_between_stages() {
        let token = CancelToken::new();
        let pipeline = Pipeline::new(Cancelling(token.clone()), PipelineOptions::default());
        let ds = Dataset::new(vec![crate::dataset::Column::new("a", vec![crate::dataset::Cell::Number(1.0)])]).unwrap();
        let err = pipeline.run_with_cancel(&ds, "everything", ChartRequest::Auto, &token).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { stage: Stage::Execute }));
    }
}
