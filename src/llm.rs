//! LLM provider abstraction.
//!
//! The orchestrator talks to a model through [`LlmProvider`]:
//! `generate(prompt, options) -> text`, failing with a [`ProviderError`]
//! whose kind decides whether a retry makes sense.
//!
//! | Provider | `llm.provider` | Endpoint |
//! |----------|----------------|----------|
//! | [`GeminiProvider`] | `gemini` | `POST {base}/models/{model}:generateContent` |
//! | [`OpenAiProvider`] | `openai` | `POST {base}/chat/completions` (any compatible server) |
//! | [`DisabledProvider`] | `disabled` | none; every call fails with `NotConfigured` |
//!
//! # Status classification
//!
//! - timeout, connection failure, HTTP 5xx: transient
//! - HTTP 429: quota exhausted, terminal
//! - other 4xx: rejected, terminal
//! - safety block or content filter: terminal
//!
//! Retrying is not done here; callers wrap `generate` in a
//! [`RetryPolicy`](crate::retry::RetryPolicy).

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::config::ProviderConfig;
use crate::error::ProviderError;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_output_tokens: 2048,
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError>;
}

/// Build the provider named by `config.provider`.
pub fn create_provider(config: &ProviderConfig) -> Result<Box<dyn LlmProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "gemini" => Ok(Box::new(GeminiProvider::new(config)?)),
        "openai" => Ok(Box::new(OpenAiProvider::new(config)?)),
        other => bail!("Unknown llm provider: '{}'", other),
    }
}

pub struct DisabledProvider;

#[async_trait]
impl LlmProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured(
            "llm.provider is 'disabled'".to_string(),
        ))
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Map a non-success HTTP status to a provider error.
fn classify_status(status: u16, body: String) -> ProviderError {
    match status {
        429 => ProviderError::QuotaExhausted(body),
        500..=599 => ProviderError::Server { status, body },
        _ => ProviderError::Rejected { status, body },
    }
}

// ============ Gemini ============

pub struct GeminiProvider {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            bail!("Gemini API key is empty");
        }
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model: config
                .model
                .strip_prefix("models/")
                .unwrap_or(&config.model)
                .to_string(),
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": options.temperature,
                "maxOutputTokens": options.max_output_tokens,
            }
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), text));
        }

        let json: Value = response.json().await?;
        parse_gemini_response(&json)
    }
}

pub(crate) fn parse_gemini_response(json: &Value) -> Result<String, ProviderError> {
    if let Some(reason) = json
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(ProviderError::SafetyRejected(format!(
            "prompt blocked: {}",
            reason
        )));
    }

    let candidate = json
        .pointer("/candidates/0")
        .ok_or_else(|| ProviderError::MalformedResponse("no candidates in response".to_string()))?;

    let finish = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .unwrap_or("");
    if matches!(finish, "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST") {
        return Err(ProviderError::SafetyRejected(format!(
            "response blocked: {}",
            finish
        )));
    }

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ProviderError::MalformedResponse(format!(
            "empty candidate text (finishReason={})",
            finish
        )));
    }
    Ok(text)
}

// ============ OpenAI-compatible ============

pub struct OpenAiProvider {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": options.temperature,
            "max_tokens": options.max_output_tokens,
        });

        let mut request = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), text));
        }

        let json: Value = response.json().await?;
        parse_openai_response(&json)
    }
}

pub(crate) fn parse_openai_response(json: &Value) -> Result<String, ProviderError> {
    let choice = json
        .pointer("/choices/0")
        .ok_or_else(|| ProviderError::MalformedResponse("no choices in response".to_string()))?;

    if choice.get("finish_reason").and_then(Value::as_str) == Some("content_filter") {
        return Err(ProviderError::SafetyRejected(
            "response removed by content filter".to_string(),
        ));
    }

    choice
        .pointer("/message/content")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::MalformedResponse("empty message content".to_string()))
}

// ============ Response parsing ============

/// Parse a model reply that should hold one JSON object.
///
/// A surrounding markdown code fence (with or without a language tag) is
/// removed first. Prose around the object is tolerated by falling back to
/// the outermost `{...}` span.
pub fn parse_json_response(text: &str) -> Result<serde_json::Map<String, Value>, ProviderError> {
    let cleaned = strip_code_fence(text.trim());

    let value: Value = match serde_json::from_str(cleaned) {
        Ok(v) => v,
        Err(first_err) => {
            let span = cleaned
                .find('{')
                .zip(cleaned.rfind('}'))
                .filter(|(start, end)| start < end)
                .map(|(start, end)| &cleaned[start..=end]);
            match span.map(|s| serde_json::from_str::<Value>(s)) {
                Some(Ok(v)) => v,
                _ => {
                    return Err(ProviderError::MalformedResponse(format!(
                        "invalid JSON: {}",
                        first_err
                    )))
                }
            }
        }
    };

    match value {
        Value::Object(map) => Ok(map),
        other => Err(ProviderError::MalformedResponse(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// USD per million (input, output) tokens for a model family.
pub fn price_per_million(model: &str) -> (f64, f64) {
    if model.contains("flash") {
        (0.075, 0.30)
    } else {
        (1.25, 5.00)
    }
}

/// Rough cost of one call from character counts.
pub fn estimate_cost(
    model: &str,
    input_chars: usize,
    output_chars: usize,
    chars_per_token: usize,
) -> f64 {
    let per_token = chars_per_token.max(1) as f64;
    let (input_price, output_price) = price_per_million(model);
    (input_chars as f64 / per_token) / 1_000_000.0 * input_price
        + (output_chars as f64 / per_token) / 1_000_000.0 * output_price
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_json() {
        let map = parse_json_response(r#"{"tldr": "ok", "key_points": ["a"]}"#).unwrap();
        assert_eq!(map["tldr"], "ok");
    }

    #[test]
    fn test_parse_fenced_json() {
        let map = parse_json_response("```json\n{\"tldr\": \"fenced\"}\n```").unwrap();
        assert_eq!(map["tldr"], "fenced");
        let map = parse_json_response("```\n{\"tldr\": \"bare\"}\n```\n").unwrap();
        assert_eq!(map["tldr"], "bare");
    }

    #[test]
    fn test_parse_json_with_prose() {
        let map = parse_json_response("Here you go:\n{\"tldr\": \"x\"}\nThanks").unwrap();
        assert_eq!(map["tldr"], "x");
    }

    #[test]
    fn test_malformed_json_is_recoverable_error() {
        assert!(matches!(
            parse_json_response("{\"tldr\": "),
            Err(ProviderError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_json_response("[1, 2]"),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(classify_status(429, String::new()), ProviderError::QuotaExhausted(_)));
        assert!(matches!(classify_status(503, String::new()), ProviderError::Server { status: 503, .. }));
        assert!(matches!(classify_status(400, String::new()), ProviderError::Rejected { status: 400, .. }));
    }

    #[test]
    fn test_gemini_safety_block() {
        let blocked = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(matches!(parse_gemini_response(&blocked), Err(ProviderError::SafetyRejected(_))));

        let finished = json!({ "candidates": [{ "finishReason": "SAFETY" }] });
        assert!(matches!(parse_gemini_response(&finished), Err(ProviderError::SafetyRejected(_))));
    }

    #[test]
    fn test_gemini_text_joined() {
        let ok = json!({
            "candidates": [{
                "finishReason": "STOP",
                "content": { "parts": [{ "text": "{\"tldr\":" }, { "text": "\"x\"}" }] }
            }]
        });
        assert_eq!(parse_gemini_response(&ok).unwrap(), "{\"tldr\":\"x\"}");
    }

    #[test]
    fn test_openai_content_filter() {
        let filtered = json!({ "choices": [{ "finish_reason": "content_filter", "message": { "content": "" } }] });
        assert!(matches!(parse_openai_response(&filtered), Err(ProviderError::SafetyRejected(_))));
        let ok = json!({ "choices": [{ "finish_reason": "stop", "message": { "content": "hi" } }] });
        assert_eq!(parse_openai_response(&ok).unwrap(), "hi");
    }

    #[test]
    fn test_cost_by_family() {
        let flash = estimate_cost("gemini-2.0-flash", 4_000_000, 0, 4);
        assert!((flash - 0.075).abs() < 1e-9);
        let pro = estimate_cost("gemini-2.5-pro", 0, 4_000_000, 4);
        assert!((pro - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_disabled_provider_fails_terminally() {
        let err = DisabledProvider
            .generate("x", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
