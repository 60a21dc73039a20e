//! Local-model-server backend (ollama wire protocol)
//!
//! Talks to an ollama-compatible `/api/generate` endpoint with streaming
//! disabled and a structured-output schema that forces the
//! `{filename: file_content}` response shape.

use crate::client::{
    call_with_deadline, required_str, ConfigError, InvocationMetrics, JsonMap, LlmClient, LlmError,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Built-in max-token cap applied by `prepare`
pub(crate) const MAX_TOKENS: u64 = 2 << 14;

/// Structured-output schema: an object whose additional properties are
/// strings, i.e. a map of filename to file content
pub(crate) fn output_schema() -> serde_json::Value {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "additionalProperties": { "type": "string" }
    })
}

/// One non-streamed generate call
#[derive(Debug, Serialize)]
pub(crate) struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub options: JsonMap,
    pub format: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// Response fields the metrics care about; durations are nanoseconds
#[derive(Debug, Default, Deserialize)]
pub(crate) struct GenerateResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done_reason: String,
    #[serde(default)]
    pub total_duration: u64,
    #[serde(default)]
    pub prompt_eval_duration: u64,
    #[serde(default)]
    pub eval_duration: u64,
    #[serde(default)]
    pub prompt_eval_count: u64,
    #[serde(default)]
    pub eval_count: u64,
}

impl GenerateResponse {
    pub fn metrics(&self) -> InvocationMetrics {
        InvocationMetrics {
            total: Duration::from_nanos(self.total_duration),
            prompt: Duration::from_nanos(self.prompt_eval_duration),
            eval: Duration::from_nanos(self.eval_duration),
            prompt_tokens: self.prompt_eval_count,
            eval_tokens: self.eval_count,
        }
    }
}

/// Posts one generate request and decodes the response
pub(crate) async fn generate(
    http: reqwest::Client,
    base_url: String,
    request: GenerateRequest,
) -> Result<(String, InvocationMetrics), LlmError> {
    let url = format!("{}/api/generate", base_url.trim_end_matches('/'));
    debug!("invoking {} at {}", request.model, url);

    let response = http.post(&url).json(&request).send().await?;
    let body: GenerateResponse = response.error_for_status()?.json().await?;

    let metrics = body.metrics();
    if body.response.is_empty() {
        return Err(LlmError::EmptyResponse {
            reason: body.done_reason,
        });
    }
    Ok((body.response, metrics))
}

/// Client for a local ollama model server
#[derive(Debug, Default)]
pub struct OllamaClient {
    model: String,
    options: JsonMap,
    base_url: String,
    http: Option<reqwest::Client>,
}

impl OllamaClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn configure(&mut self, args: &JsonMap) -> Result<(), ConfigError> {
        if self.http.is_none() {
            self.base_url = required_str(args, "OLLAMA_API_URL")?.to_string();
            self.http = Some(reqwest::Client::new());
        }
        Ok(())
    }

    fn prepare(&mut self, args: &JsonMap) -> Result<(), ConfigError> {
        let model = required_str(args, "model_name")?.to_string();

        let mut options = args.clone();
        options.remove("model_name");
        options.insert("max_tokens".to_string(), MAX_TOKENS.into());
        options.insert(
            "response_format".to_string(),
            serde_json::json!({ "type": "json_object" }),
        );

        self.model = model;
        self.options = options;
        Ok(())
    }

    async fn invoke(&self, prompt: &str) -> Result<(String, InvocationMetrics), LlmError> {
        let http = self.http.clone().ok_or(LlmError::NotConfigured)?;
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: self.options.clone(),
            format: output_schema(),
            system: None,
        };
        let base_url = self.base_url.clone();

        call_with_deadline(generate(http, base_url, request)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_requires_endpoint() {
        let mut client = OllamaClient::new();
        assert!(matches!(
            client.configure(&JsonMap::new()),
            Err(ConfigError::MissingArgument("OLLAMA_API_URL"))
        ));

        let mut args = JsonMap::new();
        args.insert(
            "OLLAMA_API_URL".to_string(),
            "http://localhost:11434".into(),
        );
        assert!(client.configure(&args).is_ok());
    }

    #[test]
    fn test_prepare_merges_defaults() {
        let mut client = OllamaClient::new();
        let mut args = JsonMap::new();
        args.insert("model_name".to_string(), "qwen2.5-coder:14b".into());
        args.insert("temperature".to_string(), 0.9.into());

        client.prepare(&args).unwrap();
        assert_eq!(client.model_name(), "qwen2.5-coder:14b");
        assert!(!client.options.contains_key("model_name"));
        assert_eq!(client.options["temperature"], 0.9);
        assert_eq!(client.options["max_tokens"], MAX_TOKENS);
        assert_eq!(client.options["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_prepare_requires_model() {
        let mut client = OllamaClient::new();
        assert!(client.prepare(&JsonMap::new()).is_err());
    }

    #[tokio::test]
    async fn test_invoke_without_configure_fails() {
        let client = OllamaClient::new();
        assert!(matches!(
            client.invoke("hi").await,
            Err(LlmError::NotConfigured)
        ));
    }

    #[test]
    fn test_empty_response_reports_done_reason() {
        let body = GenerateResponse {
            done_reason: "load".to_string(),
            ..GenerateResponse::default()
        };
        assert!(body.response.is_empty());
        assert_eq!(body.metrics().prompt_tokens, 0);
    }
}
