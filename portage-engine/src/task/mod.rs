//! Conversion tasks
//!
//! Each graph node body is a [`TaskAction`]: the executors that mutate the
//! working package, the precondition checks that gate them, and the
//! validators that judge the result all share the one narrow capability.

pub mod builder;
pub mod checks;
pub mod convert;
pub mod tester;

pub use builder::GoPackageBuilder;
pub use checks::{CanCompile, Noop};
pub use convert::LlmConverter;
pub use tester::GoPackageTester;

use crate::runner::PipelineRunner;
use async_trait::async_trait;
use portage_core::{ConversionError, ConversionRequest};

/// One action applied to a conversion request
#[async_trait]
pub trait TaskAction: Send + Sync {
    async fn apply(
        &self,
        runner: &PipelineRunner,
        request: &mut ConversionRequest,
    ) -> Result<(), ConversionError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use portage_llm::{
        ConfigError, GoReader, InvocationMetrics, JsonMap, LlmClient, LlmError,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Client stub that replays a canned response
    #[derive(Default)]
    pub struct StubClient {
        pub response: String,
        pub fail: bool,
    }

    #[async_trait]
    impl LlmClient for StubClient {
        fn configure(&mut self, _args: &JsonMap) -> Result<(), ConfigError> {
            Ok(())
        }

        fn prepare(&mut self, _args: &JsonMap) -> Result<(), ConfigError> {
            Ok(())
        }

        async fn invoke(&self, _prompt: &str) -> Result<(String, InvocationMetrics), LlmError> {
            if self.fail {
                return Err(LlmError::EmptyResponse {
                    reason: "stub".to_string(),
                });
            }
            Ok((
                self.response.clone(),
                InvocationMetrics {
                    prompt_tokens: 7,
                    eval_tokens: 11,
                    ..InvocationMetrics::default()
                },
            ))
        }

        fn model_name(&self) -> &str {
            "stub"
        }

        fn log_exchange(&self, _src: &str, _response: &str, _query: &str) {}
    }

    pub fn stub_runner() -> PipelineRunner {
        PipelineRunner::new(Box::new(StubClient::default()), Box::new(GoReader)).unwrap()
    }

    pub fn stub_runner_with(response: &str, fail: bool) -> PipelineRunner {
        let client = StubClient {
            response: response.to_string(),
            fail,
        };
        PipelineRunner::new(Box::new(client), Box::new(GoReader)).unwrap()
    }

    /// Action that counts invocations and fails the first `fail_first` times
    pub struct FlakyAction {
        pub calls: Arc<AtomicUsize>,
        pub fail_first: usize,
    }

    #[async_trait]
    impl TaskAction for FlakyAction {
        async fn apply(
            &self,
            _runner: &PipelineRunner,
            _request: &mut ConversionRequest,
        ) -> Result<(), ConversionError> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(ConversionError::Testing { count: 1 });
            }
            Ok(())
        }
    }
}
