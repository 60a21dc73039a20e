//! Reasoning-model backend
//!
//! Same wire protocol as the local model server, with an answer-only
//! system prompt. Responses carry a chain-of-thought prelude that the
//! reasoning response reader strips before decoding.

use crate::client::{
    call_with_deadline, required_str, ConfigError, InvocationMetrics, JsonMap, LlmClient, LlmError,
};
use crate::ollama::{generate, output_schema, GenerateRequest, MAX_TOKENS};
use async_trait::async_trait;

const SYSTEM_PROMPT: &str = "Act as an assistant that only provided an answer without any \
explanation, ever. Just return what the user asked for using the formating rules.";

/// Client for reasoning models served over the ollama protocol
#[derive(Debug, Default)]
pub struct DeepSeekClient {
    model: String,
    options: JsonMap,
    base_url: String,
    http: Option<reqwest::Client>,
}

impl DeepSeekClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LlmClient for DeepSeekClient {
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
            system: Some(SYSTEM_PROMPT.to_string()),
        };
        let base_url = self.base_url.clone();

        call_with_deadline(generate(http, base_url, request)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
