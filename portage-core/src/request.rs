//! Conversion request lifecycle
//!
//! A request is created on upload, owned by one pipeline execution at a
//! time, and retained until its result is fetched.

use crate::error::ConversionError;
use crate::metrics::RunMetrics;
use crate::package::DeploymentPackage;
use uuid::Uuid;

/// One conversion job flowing through the pipeline.
///
/// `source` is immutable for the lifetime of the request; tasks mutate
/// `working`, which starts as a copy of `source`. The error history is
/// append-only; recovery prompts read the most recent entry.
#[derive(Debug)]
pub struct ConversionRequest {
    pub id: Uuid,
    pub source: DeploymentPackage,
    pub working: Option<DeploymentPackage>,
    pub errors: Vec<ConversionError>,
    pub metrics: RunMetrics,
    pub completed: bool,
}

impl ConversionRequest {
    /// Creates a request with a fresh id; the working package starts as a
    /// copy of the source.
    pub fn new(source: DeploymentPackage) -> Self {
        let working = source.clone();
        Self {
            id: Uuid::new_v4(),
            source,
            working: Some(working),
            errors: Vec::new(),
            metrics: RunMetrics::default(),
            completed: false,
        }
    }

    /// Records a failure in the error history and mirrors its message into
    /// the metrics issue list.
    pub fn push_error(&mut self, err: ConversionError) {
        self.metrics.issues.push(err.to_string());
        self.errors.push(err);
    }

    /// Message of the most recent error, empty when the history is clean
    pub fn last_issue(&self) -> String {
        self.errors
            .last()
            .map(|err| err.to_string())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_copies_source() {
        let mut source = DeploymentPackage::new("py");
        source.root_file = "print(1)".to_string();

        let request = ConversionRequest::new(source);
        assert_eq!(request.working.as_ref().unwrap().root_file, "print(1)");
        assert!(!request.completed);
        assert!(request.errors.is_empty());
        assert_eq!(request.last_issue(), "");
    }

    #[test]
    fn test_push_error_appends_history_and_issues() {
        let mut request = ConversionRequest::new(DeploymentPackage::new("py"));
        request.push_error(ConversionError::Testing { count: 2 });
        request.push_error(ConversionError::Llm("empty response".to_string()));

        assert_eq!(request.errors.len(), 2);
        assert_eq!(request.metrics.issues.len(), 2);
        assert_eq!(request.last_issue(), "llm conversion failed: empty response");
    }
}
