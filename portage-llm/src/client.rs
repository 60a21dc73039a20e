//! LLM client contract
//!
//! All backends implement the same narrow surface: one-time `configure`,
//! per-invocation `prepare`, and a synchronous-from-the-caller `invoke`
//! that enforces a hard upper-bound deadline regardless of the caller's
//! own context.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Argument map shared by `configure` and `prepare`
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Upper bound on a single LLM invocation, applied regardless of the
/// caller context
pub const INVOKE_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Configuration errors raised by `configure` / `prepare`
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} could not be found in args")]
    MissingArgument(&'static str),
    #[error("{0} must be a string")]
    InvalidArgument(&'static str),
}

/// Invocation errors raised by `invoke`
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("response is empty - {reason}")]
    EmptyResponse { reason: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("llm call exceeded the {0:?} deadline")]
    Deadline(Duration),
    #[error("llm client not initialized")]
    NotConfigured,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Transport(err.to_string())
    }
}

/// Timing and token counts reported by one invocation
#[derive(Debug, Clone, Copy, Default)]
pub struct InvocationMetrics {
    pub total: Duration,
    pub prompt: Duration,
    pub eval: Duration,
    pub prompt_tokens: u64,
    pub eval_tokens: u64,
}

/// Uniform contract over heterogeneous model backends
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One-time setup: endpoint URL / API key, reusable connection.
    /// Fails when a required key is absent from `args`.
    fn configure(&mut self, args: &JsonMap) -> Result<(), ConfigError>;

    /// Per-invocation parameter refresh. The union of the provided args
    /// and the backend's built-in defaults becomes the invocation options.
    fn prepare(&mut self, args: &JsonMap) -> Result<(), ConfigError>;

    /// Performs one call. Returns the raw response text together with the
    /// backend-reported metrics, or fails on empty response, transport
    /// error, or deadline.
    async fn invoke(&self, prompt: &str) -> Result<(String, InvocationMetrics), LlmError>;

    /// The model the next invocation will address
    fn model_name(&self) -> &str;

    /// Appends the exchange to the chat-log directory. Best-effort: a
    /// logging failure never fails the call.
    fn log_exchange(&self, src_code: &str, response: &str, query: &str) {
        crate::chatlog::append(self.model_name(), src_code, query, response);
    }
}

/// Runs the network side on its own task and awaits its single-shot
/// completion signal under [`INVOKE_DEADLINE`]. On deadline the network
/// task is aborted so the connection is released.
pub(crate) async fn call_with_deadline<F, T>(fut: F) -> Result<T, LlmError>
where
    F: Future<Output = Result<T, LlmError>> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let _ = tx.send(fut.await);
    });

    match tokio::time::timeout(INVOKE_DEADLINE, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(LlmError::Transport("network task dropped".to_string())),
        Err(_) => {
            handle.abort();
            Err(LlmError::Deadline(INVOKE_DEADLINE))
        }
    }
}

/// Reads a required string argument out of a `configure`/`prepare` map
pub(crate) fn required_str<'a>(
    args: &'a JsonMap,
    key: &'static str,
) -> Result<&'a str, ConfigError> {
    args.get(key)
        .ok_or(ConfigError::MissingArgument(key))?
        .as_str()
        .ok_or(ConfigError::InvalidArgument(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_with_deadline_passes_result_through() {
        let result = call_with_deadline(async { Ok::<_, LlmError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_call_with_deadline_propagates_errors() {
        let result = call_with_deadline(async {
            Err::<(), _>(LlmError::EmptyResponse {
                reason: "stop".to_string(),
            })
        })
        .await;
        assert!(matches!(result, Err(LlmError::EmptyResponse { .. })));
    }

    #[test]
    fn test_required_str() {
        let mut args = JsonMap::new();
        args.insert("model_name".to_string(), "qwen".into());

        assert_eq!(required_str(&args, "model_name").unwrap(), "qwen");
        assert!(matches!(
            required_str(&args, "missing"),
            Err(ConfigError::MissingArgument("missing"))
        ));

        args.insert("bad".to_string(), 7.into());
        assert!(matches!(
            required_str(&args, "bad"),
            Err(ConfigError::InvalidArgument("bad"))
        ));
    }
}
