use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{http_error, Provider, TOP_P};
use crate::errors::RuntimeError;
use crate::wire::CompletionOptions;

pub struct Ollama {
    pub model: String,
    pub url: String,
    client: Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct OllamaOptions<'a> {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
    stop: &'a [String],
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

impl Ollama {
    pub fn new(model: String, url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { model, url, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.url.trim_end_matches('/'))
    }

    async fn post(&self, body: &GenerateRequest<'_>) -> Result<GenerateResponse, RuntimeError> {
        let resp = self
            .client
            .post(self.endpoint())
            .json(body)
            .send()
            .await
            .map_err(|e| http_error("ollama request failed", e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| http_error("ollama read body failed", e))?;
        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| RuntimeError::Generation(format!("ollama response parse error: {e}; body: {text}")))?;
        if let Some(err) = parsed.error.as_deref() {
            return Err(RuntimeError::Generation(format!("ollama ({status}): {err}")));
        }
        if !status.is_success() {
            return Err(RuntimeError::Generation(format!("ollama ({status}): {text}")));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl Provider for Ollama {
    fn name(&self) -> &str {
        "ollama"
    }

    /// A prompt-less generate request makes the server load the weights.
    async fn load(&mut self) -> Result<(), RuntimeError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: None,
            stream: false,
            options: None,
            keep_alive: Some(serde_json::json!("30m")),
        };
        self.post(&body).await.map(|_| ())
    }

    async fn unload(&mut self) -> Result<(), RuntimeError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: None,
            stream: false,
            options: None,
            keep_alive: Some(serde_json::json!(0)),
        };
        self.post(&body).await.map(|_| ())
    }

    async fn complete(&mut self, prompt: &str, opts: &CompletionOptions) -> Result<String, RuntimeError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: Some(prompt),
            stream: false,
            options: Some(OllamaOptions {
                temperature: opts.temperature,
                top_p: TOP_P,
                num_predict: opts.max_tokens,
                stop: &opts.stop_sequences,
            }),
            keep_alive: None,
        };
        tracing::debug!(url = %self.endpoint(), model = %self.model, "ollama generate");
        Ok(self.post(&body).await?.response)
    }
}
