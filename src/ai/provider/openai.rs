//! OpenAI API Collaborator
//!
//! Batch analysis over OpenAI's Chat Completions API. HTTP failures are
//! classified by status so the invoker can back off on 429 and stop on auth
//! errors.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{
    CollaboratorResponse, LlmCollaborator, TokenUsage, build_analysis_prompt, parse_batch_response,
};
use crate::config::LlmConfig;
use crate::types::{ErrorCategory, ErrorClassifier, LensError, LlmError, Result};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const PROVIDER: &str = "openai";

/// OpenAI collaborator with secure API key handling
pub struct OpenAiCollaborator {
    /// Never exposed in logs or debug output
    api_key: SecretString,
    api_base: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCollaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCollaborator")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiCollaborator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = Self::resolve_api_key(config).ok_or_else(|| {
            LensError::config(
                "OpenAI API key not found. Set OPENAI_API_KEY or llm.api_key in config",
            )
        })?;
        Self::with_api_key(config, api_key)
    }

    /// Key from `llm.api_key`, then `OPENAI_API_KEY`; blank keys count as missing
    pub fn resolve_api_key(config: &LlmConfig) -> Option<String> {
        config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn with_api_key(config: &LlmConfig, api_key: String) -> Result<Self> {
        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LensError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: SecretString::from(api_key),
            api_base,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
            client,
        })
    }

    fn build_request(&self, texts: &[String], language: &str) -> ChatCompletionRequest {
        let prompt = build_analysis_prompt(texts, language);
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt.user,
                },
            ],
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            response_format: Some(ResponseFormat {
                format_type: "json_object",
            }),
        }
    }
}

#[async_trait]
impl LlmCollaborator for OpenAiCollaborator {
    async fn analyze(
        &self,
        texts: &[String],
        language: &str,
    ) -> std::result::Result<CollaboratorResponse, LlmError> {
        info!(
            model = %self.model,
            comments = texts.len(),
            "Analyzing batch with OpenAI"
        );

        let start_time = Instant::now();
        let request = self.build_request(texts, language);
        let url = format!("{}/chat/completions", self.api_base);

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let category = if e.is_timeout() || e.is_connect() {
                    ErrorCategory::Network
                } else {
                    ErrorCategory::Transient
                };
                LlmError::with_provider(category, format!("request failed: {}", e), PROVIDER)
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64);
            let body = response.text().await.unwrap_or_default();
            let mut error = ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("OpenAI API error ({}): {}", status, body),
                PROVIDER,
            );
            if let Some(wait) = retry_after {
                error = error.retry_after(wait);
            }
            return Err(error);
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            LlmError::with_provider(
                ErrorCategory::ParseError,
                format!("failed to decode OpenAI response: {}", e),
                PROVIDER,
            )
        })?;

        let usage = body
            .usage
            .map(|u| TokenUsage::from_openai(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let content = body
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| {
                LlmError::with_provider(
                    ErrorCategory::ParseError,
                    "no content in OpenAI response",
                    PROVIDER,
                )
            })?;

        let responses = parse_batch_response(content).map_err(|e| e.provider(PROVIDER))?;
        debug!(
            returned = responses.len(),
            expected = texts.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            tokens = usage.total(),
            "OpenAI response parsed"
        );

        Ok(CollaboratorResponse { responses, usage })
    }

    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key() -> LlmConfig {
        LlmConfig {
            api_key: Some("sk-test".to_string()),
            api_base: Some("http://localhost:9/v1/".to_string()),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_debug_redacts_key() {
        let collaborator = OpenAiCollaborator::new(&config_with_key()).unwrap();
        let debug = format!("{:?}", collaborator);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-test"));
        assert_eq!(collaborator.api_base, "http://localhost:9/v1");
    }

    #[test]
    fn test_request_uses_json_object_format() {
        let collaborator = OpenAiCollaborator::new(&config_with_key()).unwrap();
        let request = collaborator.build_request(&["hola".to_string()], "es");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["model"], "gpt-4o-mini");
    }

    #[test]
    fn test_decode_completion_body() {
        let body = r#"{
            "choices": [{"message": {"content": "[]"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30}
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        let usage = parsed.usage.unwrap();
        assert_eq!(
            TokenUsage::from_openai(usage.prompt_tokens, usage.completion_tokens).total(),
            150
        );
    }
}
