//! Chat-completion gateway.
//!
//! Both pipeline stages depend on schema-constrained model output: one
//! structured call per clustering batch, one per article generation or
//! iteration. The [`ChatModel`] trait is the seam — the orchestrator and
//! workflow take `&dyn ChatModel`, production wires in [`OpenAiChat`], and
//! tests inject a scripted model.
//!
//! The retry contract matches the embedding client: 429/5xx and network
//! errors retry with exponential backoff, other 4xx fail immediately, and
//! every call is bounded by the configured timeout. A timeout is surfaced
//! like any other failure; callers commit nothing on error.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;

/// A chat model that answers one (system, user) prompt pair with a single
/// JSON text payload.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Run one completion and return the raw response text. The prompt
    /// instructs the model to emit JSON; parsing and validation happen at
    /// the call site, where a schema violation is a hard failure.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// No-op model used when `llm.provider = "disabled"`. Any call fails with
/// a descriptive error so misconfiguration surfaces early.
pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        bail!("LLM provider is disabled. Set [llm] provider in config.")
    }
}

/// Chat model backed by the OpenAI chat-completions API in JSON mode.
pub struct OpenAiChat {
    model: String,
    api_key: String,
    max_retries: u32,
    timeout: Duration,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model,
            api_key,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return extract_message_content(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after retries")))
    }
}

fn extract_message_content(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))
}

/// Create the configured chat model.
pub fn create_chat_model(config: &LlmConfig) -> Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledChat)),
        "openai" => Ok(Box::new(OpenAiChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

/// Strip an optional markdown code fence from a model response and return
/// the JSON payload. Models in JSON mode usually return bare JSON, but a
/// fenced payload still parses rather than failing the whole batch.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_bare() {
        assert_eq!(extract_json("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_fenced() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(raw), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_fence_without_language() {
        let raw = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(raw), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_whitespace() {
        assert_eq!(extract_json("  \n {\"a\": 1} \n"), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_message_content() {
        let json = serde_json::json!({
            "choices": [ { "message": { "content": "{\"ok\": true}" } } ]
        });
        assert_eq!(extract_message_content(&json).unwrap(), "{\"ok\": true}");
    }

    #[test]
    fn test_extract_message_content_missing() {
        let json = serde_json::json!({ "choices": [] });
        assert!(extract_message_content(&json).is_err());
    }

    #[tokio::test]
    async fn test_disabled_chat_fails() {
        let chat = DisabledChat;
        assert!(chat.complete("s", "u").await.is_err());
    }
}
