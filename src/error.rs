use std::fmt;

use crate::model::ModelError;

/// Source location: line and column (both 1-indexed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

impl Span {
    #[must_use]
    pub fn new(line: usize, col: usize) -> Self {
        Span { line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Lexer or parser error with source location.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub span: Span,
    pub message: String,
}

impl SyntaxError {
    #[must_use]
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        SyntaxError { span, message: message.into() }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.span, self.message)
    }
}

impl std::error::Error for SyntaxError {}

/// Pipeline stage, used to report where a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Introspect,
    Compile,
    Execute,
    Chart,
    Summarize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Introspect => "schema introspection",
            Stage::Compile => "query compilation",
            Stage::Execute => "program execution",
            Stage::Chart => "chart inference",
            Stage::Summarize => "summarization",
        };
        f.write_str(name)
    }
}

/// Which ceiling a program ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    WallClock,
    Memory,
    ProgramSize,
    Statements,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::WallClock => "wall-clock limit",
            Resource::Memory => "memory limit",
            Resource::ProgramSize => "program size limit",
            Resource::Statements => "statement limit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Syntax,
    Runtime,
    Containment,
    ResourceExhausted(Resource),
}

/// A failure raised while running a candidate program.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecFault {
    pub kind: FaultKind,
    pub message: String,
    pub span: Option<Span>,
}

impl ExecFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        ExecFault { kind, message: message.into(), span: None }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Runtime, message)
    }

    pub fn containment(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Containment, message)
    }

    pub fn exhausted(resource: Resource) -> Self {
        Self::new(FaultKind::ResourceExhausted(resource), format!("{} exceeded", resource))
    }

    /// Attach a location if none is recorded yet.
    #[must_use]
    pub fn at(mut self, span: Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    pub fn is_containment(&self) -> bool {
        self.kind == FaultKind::Containment
    }
}

impl From<SyntaxError> for ExecFault {
    fn from(e: SyntaxError) -> Self {
        ExecFault { kind: FaultKind::Syntax, message: e.message, span: Some(e.span) }
    }
}

impl fmt::Display for ExecFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            FaultKind::Syntax => "syntax error",
            FaultKind::Runtime => "runtime error",
            FaultKind::Containment => "containment violation",
            FaultKind::ResourceExhausted(_) => "resource exhausted",
        };
        match self.span {
            Some(span) => write!(f, "{} at {}: {}", label, span, self.message),
            None => write!(f, "{}: {}", label, self.message),
        }
    }
}

/// Everything that can end a request. Each variant is terminal.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("dataset has no columns")]
    EmptyDataset,

    #[error("query is empty")]
    EmptyQuery,

    #[error("model service failed during compilation: {0}")]
    CompilationService(#[source] ModelError),

    #[error("model returned no usable program: {reason}")]
    CompilationEmpty { reason: String },

    #[error("program did not produce a valid `filtered_df`: {reason}")]
    OutputContractViolation { program: String, reason: String },

    #[error("{fault}")]
    ProgramExecution { program: String, fault: ExecFault },

    #[error("request cancelled during {stage}")]
    Cancelled { stage: Stage },

    #[error("unexpected failure during {stage}: {message}")]
    Unexpected { stage: Stage, message: String },
}

impl PipelineError {
    /// The stage the request failed in.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::EmptyDataset => Stage::Introspect,
            PipelineError::EmptyQuery
            | PipelineError::CompilationService(_)
            | PipelineError::CompilationEmpty { .. } => Stage::Compile,
            PipelineError::OutputContractViolation { .. }
            | PipelineError::ProgramExecution { .. } => Stage::Execute,
            PipelineError::Cancelled { stage } | PipelineError::Unexpected { stage, .. } => *stage,
        }
    }

    /// The offending program text, for execution-stage failures.
    pub fn program(&self) -> Option<&str> {
        match self {
            PipelineError::OutputContractViolation { program, .. }
            | PipelineError::ProgramExecution { program, .. } => Some(program),
            _ => None,
        }
    }

    /// True when the failure came from the model service and a resubmission may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::CompilationService(_))
    }
}
