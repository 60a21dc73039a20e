//! Conversion error kinds
//!
//! Four distinguished failure classes flow through a conversion, plus the
//! captured-panic case. Recovery tasks inspect the most recent entry of a
//! request's error history, so the variants keep their payloads.

use thiserror::Error;

/// Errors produced while converting a deployment package
#[derive(Debug, Clone, Error)]
pub enum ConversionError {
    /// The build command sequence failed; carries the captured build output
    /// so a recovery branch can feed it back to an LLM
    #[error("build failed: {output}")]
    Compilation { output: String },

    /// One or more test fixtures failed
    #[error("{count} tests failed")]
    Testing { count: usize },

    /// The LLM returned an empty response, missed its deadline, or the
    /// response could not be decoded into a package
    #[error("llm conversion failed: {0}")]
    Llm(String),

    /// A task precondition rejected the current working state; fatal for
    /// the pipeline run
    #[error("task {task} precondition failed - {reason}")]
    Precondition { task: String, reason: String },

    /// A panic captured at the pipeline boundary
    #[error("pipeline panic: {0}")]
    Panic(String),
}

impl ConversionError {
    /// True for the contract-violation case that aborts the whole pipeline
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConversionError::Precondition { .. })
    }
}
