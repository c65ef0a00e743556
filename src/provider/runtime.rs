use std::time::Duration;
use tokio::sync::Mutex;

use super::DynProvider;
use crate::errors::RuntimeError;
use crate::wire::CompletionOptions;

struct Slot {
    provider: DynProvider,
    loaded: bool,
}

/// Single-slot owner of the inference engine.
///
/// Every completion acquires the slot for its whole duration, so at most one
/// decode is in flight no matter how many runs share the runtime.
pub struct ModelRuntime {
    slot: Mutex<Slot>,
    name: String,
    timeout: Duration,
}

impl ModelRuntime {
    pub fn new(provider: DynProvider, timeout: Duration) -> Self {
        let name = provider.name().to_string();
        Self { slot: Mutex::new(Slot { provider, loaded: false }), name, timeout }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn load(&self) -> Result<(), RuntimeError> {
        let mut slot = self.slot.lock().await;
        if slot.loaded {
            return Ok(());
        }
        tracing::info!(provider = %self.name, "loading model");
        slot.provider.load().await?;
        slot.loaded = true;
        Ok(())
    }

    pub async fn unload(&self) -> Result<(), RuntimeError> {
        let mut slot = self.slot.lock().await;
        if !slot.loaded {
            return Ok(());
        }
        slot.loaded = false;
        tracing::info!(provider = %self.name, "unloading model");
        slot.provider.unload().await
    }

    pub async fn is_loaded(&self) -> bool {
        self.slot.lock().await.loaded
    }

    pub async fn complete(&self, prompt: &str, opts: &CompletionOptions) -> Result<String, RuntimeError> {
        let mut slot = self.slot.lock().await;
        if !slot.loaded {
            return Err(RuntimeError::NotLoaded);
        }
        tracing::debug!(prompt_chars = prompt.len(), max_tokens = opts.max_tokens, "completion");
        match tokio::time::timeout(self.timeout, slot.provider.complete(prompt, opts)).await {
            Ok(Err(RuntimeError::Timeout(_))) => Err(RuntimeError::Timeout(self.timeout)),
            Ok(res) => res,
            Err(_) => Err(RuntimeError::Timeout(self.timeout)),
        }
    }
}
