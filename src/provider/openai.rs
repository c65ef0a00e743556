use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{api_key, http_error, Provider, TOP_P};
use crate::errors::RuntimeError;
use crate::wire::CompletionOptions;

/// OpenAI-compatible chat completions (OpenRouter, OpenAI, llama.cpp's
/// `/v1` surface). The whole prompt goes out as a single user message.
pub struct OpenAIProvider {
    model: String,
    base: String,
    key_env: String,
    key: Option<String>,
    client: Client,
}

impl OpenAIProvider {
    pub fn new(model: String, base: String, key_env: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { model, base, key_env, key: None, client })
    }
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn load(&mut self) -> Result<(), RuntimeError> {
        self.key = Some(api_key(&self.key_env)?);
        Ok(())
    }

    async fn unload(&mut self) -> Result<(), RuntimeError> {
        self.key = None;
        Ok(())
    }

    async fn complete(&mut self, prompt: &str, opts: &CompletionOptions) -> Result<String, RuntimeError> {
        let key = self.key.as_deref().ok_or(RuntimeError::NotLoaded)?;
        let url = format!("{}/chat/completions", self.base.trim_end_matches('/'));

        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "temperature": opts.temperature,
            "top_p": TOP_P,
            "max_tokens": opts.max_tokens,
        });
        if !opts.stop_sequences.is_empty() {
            body["stop"] = json!(opts.stop_sequences);
        }

        tracing::debug!(%url, model = %self.model, "chat completion");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| http_error("chat request failed", e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| http_error("chat read body failed", e))?;
        if !status.is_success() {
            return Err(RuntimeError::Generation(format!("API error ({status}): {text}")));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| RuntimeError::Generation(format!("failed to parse chat response: {e}\nRaw: {text}")))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}
