//! Service configuration
//!
//! Everything is environment-driven:
//! - BIND_ADDR: listen address (default 0.0.0.0:8080)
//! - PIPELINE_FILE: path to a pipeline document overriding the built-in one
//! - JOB_TIMEOUT: per-conversion deadline in seconds (default 3600)
//! - OLLAMA_API_URL: local model endpoint (default http://localhost:11434)
//! - GEMINI_API_KEY / GEMINI_MODEL: cloud model credentials
//! - CHATLOG_DIR: chat-log directory (read by the LLM layer)

use portage_engine::compiler::DEFAULT_PIPELINE;
use portage_llm::JsonMap;
use std::time::Duration;
use tracing::info;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Runtime configuration for the conversion service
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address
    pub bind_addr: String,
    /// Pipeline document compiled at startup
    pub pipeline_document: String,
    /// Deadline for one conversion run
    pub job_timeout: Duration,
    /// Environment-provided defaults injected into every pipeline
    /// document's options before compilation
    pub env_options: JsonMap,
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

/// Reads a document from the file named by `key`, falling back to
/// `default` when the variable is unset or the file is unreadable
fn file_from_env(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(path) if !path.is_empty() => match std::fs::read_to_string(&path) {
            Ok(content) if !content.is_empty() => {
                info!("loaded pipeline document from {}", path);
                content
            }
            _ => default.to_string(),
        },
        _ => default.to_string(),
    }
}

impl Config {
    /// Loads the configuration from environment variables
    pub fn from_env() -> Self {
        let mut env_options = JsonMap::new();
        env_options.insert(
            "OLLAMA_API_URL".to_string(),
            env_or("OLLAMA_API_URL", DEFAULT_OLLAMA_URL).into(),
        );
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            env_options.insert("GEMINI_API_KEY".to_string(), key.into());
        }
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            env_options.insert("GEMINI_MODEL".to_string(), model.into());
        }

        let job_timeout = std::env::var("JOB_TIMEOUT")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(3600));

        Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
            pipeline_document: file_from_env("PIPELINE_FILE", DEFAULT_PIPELINE),
            job_timeout,
            env_options,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut env_options = JsonMap::new();
        env_options.insert("OLLAMA_API_URL".to_string(), DEFAULT_OLLAMA_URL.into());
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            pipeline_document: DEFAULT_PIPELINE.to_string(),
            job_timeout: Duration::from_secs(3600),
            env_options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.pipeline_document, DEFAULT_PIPELINE);
        assert_eq!(config.job_timeout, Duration::from_secs(3600));
        assert_eq!(
            config.env_options["OLLAMA_API_URL"],
            DEFAULT_OLLAMA_URL
        );
    }
}
