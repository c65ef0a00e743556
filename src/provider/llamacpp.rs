use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

use super::cache::ModelCache;
use super::{http_error, ModelRef, Provider, TOP_P};
use crate::config;
use crate::errors::RuntimeError;
use crate::wire::CompletionOptions;

const HEALTH_WAIT: Duration = Duration::from_secs(180);
const HEALTH_POLL: Duration = Duration::from_millis(500);

/// Local GGUF inference through a `llama-server` process, either one we
/// spawn ourselves or one already listening at a known URL.
pub struct LlamaCpp {
    base_url: String,
    prompt_template: String,
    client: Client,
    spawn: Option<SpawnSpec>,
    child: Option<Child>,
}

struct SpawnSpec {
    binary: String,
    cache: ModelCache,
    model: ModelRef,
    port: u16,
    context_size: u32,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    top_p: f32,
    stop: &'a [String],
    cache_prompt: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    content: String,
}

impl LlamaCpp {
    pub fn connect(url: String, cfg: &config::LlamaCpp, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            prompt_template: cfg.prompt_template.clone(),
            client: Client::builder().timeout(timeout).build()?,
            spawn: None,
            child: None,
        })
    }

    pub fn spawned(cache: ModelCache, model: ModelRef, cfg: &config::LlamaCpp, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: format!("http://127.0.0.1:{}", cfg.port),
            prompt_template: cfg.prompt_template.clone(),
            client: Client::builder().timeout(timeout).build()?,
            spawn: Some(SpawnSpec {
                binary: cfg.binary.clone(),
                cache,
                model,
                port: cfg.port,
                context_size: cfg.context_size,
            }),
            child: None,
        })
    }

    fn render_prompt(&self, prompt: &str) -> String {
        if self.prompt_template.contains("{prompt}") {
            self.prompt_template.replace("{prompt}", prompt)
        } else {
            prompt.to_string()
        }
    }

    async fn start_server(spec: &SpawnSpec) -> Result<Child, RuntimeError> {
        let weights: PathBuf = spec
            .cache
            .ensure(&spec.model)
            .await
            .map_err(|e| RuntimeError::Generation(format!("model weights unavailable: {e:#}")))?;
        let binary = which::which(&spec.binary).map_err(|e| {
            RuntimeError::Generation(format!("'{}' not found on PATH: {e}", spec.binary))
        })?;

        tracing::info!(binary = %binary.display(), model = %weights.display(), port = spec.port, "starting llama-server");
        Command::new(binary)
            .arg("-m")
            .arg(&weights)
            .arg("--port")
            .arg(spec.port.to_string())
            .arg("-c")
            .arg(spec.context_size.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::Generation(format!("failed to spawn llama-server: {e}")))
    }

    /// `/health` answers 503 while the weights are loading and 200 once ready.
    async fn wait_healthy(&mut self) -> Result<(), RuntimeError> {
        let url = format!("{}/health", self.base_url);
        let started = Instant::now();
        loop {
            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(RuntimeError::Generation(format!("llama-server exited early: {status}")));
                }
            }
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => tracing::debug!(status = %resp.status(), "llama-server not ready"),
                Err(e) if self.child.is_none() && e.is_connect() => return Err(RuntimeError::NotLoaded),
                Err(e) => tracing::debug!(error = %e, "llama-server not reachable yet"),
            }
            if started.elapsed() > HEALTH_WAIT {
                return Err(RuntimeError::Timeout(HEALTH_WAIT));
            }
            tokio::time::sleep(HEALTH_POLL).await;
        }
    }
}

#[async_trait]
impl Provider for LlamaCpp {
    fn name(&self) -> &str {
        "llamacpp"
    }

    async fn load(&mut self) -> Result<(), RuntimeError> {
        if self.child.is_none() {
            if let Some(spec) = &self.spawn {
                self.child = Some(Self::start_server(spec).await?);
            }
        }
        if let Err(e) = self.wait_healthy().await {
            self.unload().await.ok();
            return Err(e);
        }
        Ok(())
    }

    async fn unload(&mut self) -> Result<(), RuntimeError> {
        if let Some(mut child) = self.child.take() {
            child
                .kill()
                .await
                .map_err(|e| RuntimeError::Generation(format!("failed to stop llama-server: {e}")))?;
        }
        Ok(())
    }

    async fn complete(&mut self, prompt: &str, opts: &CompletionOptions) -> Result<String, RuntimeError> {
        let url = format!("{}/completion", self.base_url);
        let rendered = self.render_prompt(prompt);
        let body = CompletionRequest {
            prompt: &rendered,
            n_predict: opts.max_tokens,
            temperature: opts.temperature,
            top_p: TOP_P,
            stop: &opts.stop_sequences,
            cache_prompt: true,
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| http_error("llama-server request failed", e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| http_error("llama-server read body failed", e))?;
        if !status.is_success() {
            return Err(RuntimeError::Generation(format!("llama-server ({status}): {text}")));
        }
        let parsed: CompletionResponse = serde_json::from_str(&text)
            .map_err(|e| RuntimeError::Generation(format!("llama-server response parse error: {e}")))?;
        Ok(parsed.content)
    }
}
