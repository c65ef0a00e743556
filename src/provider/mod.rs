use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::ProviderKind;
use crate::config::Config;
use crate::errors::RuntimeError;
use crate::wire::CompletionOptions;

pub mod cache;
pub mod gemini;
pub mod llamacpp;
pub mod ollama;
pub mod openai;
pub mod runtime;

pub use runtime::ModelRuntime;

/// Nucleus sampling used by every backend; only temperature is tuned per call.
pub const TOP_P: f32 = 0.9;

/// A text-completion engine. Methods take `&mut self`: a provider is never
/// driven by two callers at once, [`ModelRuntime`] owns it behind a lock.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&mut self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn unload(&mut self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn complete(&mut self, prompt: &str, opts: &CompletionOptions) -> Result<String, RuntimeError>;
}

pub type DynProvider = Box<dyn Provider + Send + Sync>;

pub fn make_provider(cfg: &Config) -> Result<DynProvider> {
    let request_timeout = Duration::from_secs(cfg.timeout_secs);
    match cfg.provider {
        ProviderKind::LlamaCpp => {
            let provider = match &cfg.llamacpp.server_url {
                Some(url) => llamacpp::LlamaCpp::connect(url.clone(), &cfg.llamacpp, request_timeout)?,
                None => {
                    let cache = cache::ModelCache::new(cfg.model_cache_dir.clone());
                    let model = cache
                        .resolve(&cfg.model, &cfg.llamacpp.preset)
                        .ok_or_else(|| anyhow!("unknown model '{}': not a file and not a preset", cfg.model))?;
                    llamacpp::LlamaCpp::spawned(cache, model, &cfg.llamacpp, request_timeout)?
                }
            };
            Ok(Box::new(provider))
        }
        ProviderKind::Ollama => Ok(Box::new(ollama::Ollama::new(
            cfg.model.clone(),
            cfg.ollama.url.clone(),
            request_timeout,
        )?)),
        ProviderKind::OpenAI => Ok(Box::new(openai::OpenAIProvider::new(
            cfg.model.clone(),
            cfg.api.openai_base.clone(),
            cfg.api.openai_key_env.clone(),
            request_timeout,
        )?)),
        ProviderKind::Gemini => Ok(Box::new(gemini::Gemini::new(
            cfg.model.clone(),
            cfg.api.gemini_base.clone(),
            cfg.api.gemini_key_env.clone(),
            request_timeout,
        )?)),
    }
}

/// Maps transport errors onto the runtime taxonomy.
pub(crate) fn http_error(context: &str, e: reqwest::Error) -> RuntimeError {
    if e.is_timeout() {
        RuntimeError::Timeout(Duration::ZERO)
    } else if e.is_connect() {
        RuntimeError::NotLoaded
    } else {
        RuntimeError::Generation(format!("{context}: {e}"))
    }
}

pub(crate) fn api_key(env: &str) -> Result<String, RuntimeError> {
    std::env::var(env)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| RuntimeError::Generation(format!("{env} env var is not set")))
}

/// Where a local model's weights live once resolved.
#[derive(Debug, Clone)]
pub enum ModelRef {
    File(PathBuf),
    Preset(&'static cache::ModelPreset),
}
