pub mod analyze;
pub mod chart;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod dataset;
pub mod error;
pub mod input;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod repl;
pub mod sandbox;
pub mod schema;
pub mod summary;
pub mod vegalite;

pub use chart::{ChartKind, ChartRequest, ChartSpec};
pub use dataset::{Cell, Column, Dataset};
pub use error::PipelineError;
pub use pipeline::{Analysis, Narrative, Pipeline, PipelineOptions};

#[cfg(test)]
mod tests;
