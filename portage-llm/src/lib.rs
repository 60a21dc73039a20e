//! Portage LLM layer
//!
//! A uniform invocation contract over heterogeneous model backends, plus
//! the response readers that decode each backend's response flavour into a
//! deployment package.
//!
//! Clients are configuration-only state: `configure` builds the reusable
//! connection once, `prepare` refreshes per-invocation parameters, and
//! `invoke` performs one bounded-deadline call with token-accounted
//! metrics. Every exchange can be appended to the chat-log directory for
//! offline inspection.

pub mod chatlog;
pub mod client;
pub mod deepseek;
pub mod gemini;
pub mod ollama;
pub mod reader;

pub use client::{ConfigError, InvocationMetrics, JsonMap, LlmClient, LlmError};
pub use deepseek::DeepSeekClient;
pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use reader::{BasicReader, GoReader, ReasoningReader, ResponseParseError, ResponseReader};
