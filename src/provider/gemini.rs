use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{api_key, http_error, Provider, TOP_P};
use crate::errors::RuntimeError;
use crate::wire::CompletionOptions;

pub struct Gemini {
    pub model: String,
    pub api_base: String,
    key_env: String,
    key: Option<String>,
    client: Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop_sequences: &'a [String],
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl Gemini {
    pub fn new(model: String, api_base: String, key_env: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { model, api_base, key_env, key: None, client })
    }
}

#[async_trait]
impl Provider for Gemini {
    fn name(&self) -> &str {
        "gemini"
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
        let url = format!(
            "{}/models/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            self.model
        );
        let body = GenerateRequest {
            contents: vec![Content { role: "user", parts: vec![Part { text: prompt }] }],
            generation_config: GenerationConfig {
                temperature: opts.temperature,
                top_p: TOP_P,
                max_output_tokens: opts.max_tokens,
                stop_sequences: &opts.stop_sequences,
            },
        };

        tracing::debug!(%url, "gemini generateContent");

        let resp = self
            .client
            .post(&url)
            .query(&[("key", key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| http_error("gemini request failed", e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| http_error("gemini read body failed", e))?;
        if !status.is_success() {
            return Err(RuntimeError::Generation(format!("gemini API error ({status}): {text}")));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| RuntimeError::Generation(format!("gemini response parse error: {e}")))?;

        let content = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join(""))
            .unwrap_or_default();
        Ok(content)
    }
}
