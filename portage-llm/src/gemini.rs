//! Cloud-model backend (Gemini)
//!
//! Calls the `generateContent` REST endpoint with a JSON response MIME
//! type, a low temperature, and an object schema with nullable string
//! properties for the filenames a conversion is expected to produce.

use crate::client::{
    call_with_deadline, required_str, ConfigError, InvocationMetrics, JsonMap, LlmClient, LlmError,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;
use tracing::debug;

const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: UsageMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

fn response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "main.go": { "type": "STRING", "nullable": true },
            "go.mod": { "type": "STRING", "nullable": true },
            "main.py": { "type": "STRING", "nullable": true },
        }
    })
}

/// Client for the Gemini cloud API
#[derive(Debug, Default)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    http: Option<reqwest::Client>,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self::default()
    }
}

async fn generate_content(
    http: reqwest::Client,
    url: String,
    body: serde_json::Value,
) -> Result<(String, InvocationMetrics), LlmError> {
    let start = Instant::now();
    let response = http.post(&url).json(&body).send().await?;
    let decoded: GenerateContentResponse = response.error_for_status()?.json().await?;

    let elapsed = start.elapsed();
    let metrics = InvocationMetrics {
        total: elapsed,
        prompt: elapsed,
        eval: elapsed,
        prompt_tokens: decoded.usage_metadata.prompt_token_count,
        eval_tokens: decoded.usage_metadata.total_token_count,
    };

    let mut text = String::new();
    if let Some(candidate) = decoded.candidates.first() {
        for part in &candidate.content.parts {
            text.push_str(&part.text);
        }
    }
    let text = text.trim().to_string();

    if text.is_empty() {
        return Err(LlmError::EmptyResponse {
            reason: "no candidate text".to_string(),
        });
    }
    Ok((text, metrics))
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn configure(&mut self, args: &JsonMap) -> Result<(), ConfigError> {
        self.api_key = required_str(args, "GEMINI_API_KEY")?.to_string();
        self.model = match args.get("GEMINI_MODEL").and_then(|value| value.as_str()) {
            Some(model) => model.to_string(),
            None => DEFAULT_MODEL.to_string(),
        };
        self.http = Some(reqwest::Client::new());
        Ok(())
    }

    fn prepare(&mut self, args: &JsonMap) -> Result<(), ConfigError> {
        if let Some(model) = args.get("GEMINI_MODEL").and_then(|value| value.as_str()) {
            self.model = model.to_string();
        }
        Ok(())
    }

    async fn invoke(&self, prompt: &str) -> Result<(String, InvocationMetrics), LlmError> {
        let http = self.http.clone().ok_or(LlmError::NotConfigured)?;
        let url = format!("{}/{}:generateContent?key={}", API_BASE, self.model, self.api_key);
        debug!("invoking gemini model {}", self.model);

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": 0.1,
                "responseSchema": response_schema(),
            }
        });

        call_with_deadline(generate_content(http, url, body)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
