pub mod extract;

use crate::config::Config;
use crate::context::template_context;
use crate::errors::{RuntimeError, SynthesisFailure};
use crate::log::Artifacts;
use crate::prompt;
use crate::provider::ModelRuntime;
use crate::template::TemplateStore;
use crate::wire::{CompletionOptions, FileKind, FileSpec, GeneratedFile, Module, ProjectPlan};

/// Produces one file per FileSpec. Never touches the filesystem beyond
/// reading template context.
pub struct Synthesizer<'a> {
    runtime: &'a ModelRuntime,
    config: &'a Config,
    store: &'a TemplateStore,
    artifacts: &'a Artifacts,
}

impl<'a> Synthesizer<'a> {
    pub fn new(runtime: &'a ModelRuntime, config: &'a Config, store: &'a TemplateStore, artifacts: &'a Artifacts) -> Self {
        Self { runtime, config, store, artifacts }
    }

    fn options(&self) -> CompletionOptions {
        let s = &self.config.synthesis;
        CompletionOptions {
            max_tokens: s.max_tokens,
            temperature: s.temperature,
            stop_sequences: s.stop_sequences.clone(),
        }
    }

    pub async fn synthesize(&self, plan: &ProjectPlan, module: &Module, spec: &FileSpec) -> GeneratedFile {
        let opts = self.options();
        let tolerance = self.config.synthesis.balance_tolerance;
        let attempts = self.config.limits.synth_retries + 1;
        let context = template_context(self.store, plan, spec.kind, self.config.synthesis.template_context_bytes);
        let file_name = spec.relative_path.rsplit('/').next().unwrap_or(&spec.relative_path);

        let mut last = SynthesisFailure::Empty;
        let mut strict = false;

        for attempt in 1..=attempts {
            let prompt = if strict {
                prompt::file_prompt_strict(plan, module, spec, &last.to_string())
            } else {
                prompt::file_prompt(plan, module, spec, &context)
            };
            let stage = format!("synth.{file_name}.{attempt}");

            let raw = match self.runtime.complete(&prompt, &opts).await {
                Ok(raw) => raw,
                Err(RuntimeError::NotLoaded) => {
                    return GeneratedFile::failed(spec, SynthesisFailure::Runtime(RuntimeError::NotLoaded), attempt)
                }
                Err(e) => {
                    tracing::warn!(path = %spec.relative_path, attempt, error = %e, "completion failed");
                    self.artifacts.record(&stage, &prompt, None);
                    last = SynthesisFailure::Runtime(e);
                    strict = false;
                    continue;
                }
            };
            self.artifacts.record(&stage, &prompt, Some(&raw));

            match extract::extract(&raw, spec.kind, tolerance) {
                Ok(content) => {
                    let content = normalize(plan, spec, content);
                    tracing::debug!(path = %spec.relative_path, attempt, bytes = content.len(), "file accepted");
                    return GeneratedFile::ok(spec, content, attempt);
                }
                Err(why) => {
                    tracing::warn!(path = %spec.relative_path, attempt, reason = %why, "file output rejected");
                    last = why;
                    strict = true;
                }
            }
        }

        match last {
            SynthesisFailure::Runtime(_) => GeneratedFile::failed(spec, last, attempts),
            other => GeneratedFile::rejected(spec, other, attempts),
        }
    }
}

fn normalize(plan: &ProjectPlan, spec: &FileSpec, content: String) -> String {
    if spec.kind != FileKind::Source {
        return content;
    }
    let Some(expected) = extract::package_for_path(&spec.relative_path) else {
        return content;
    };
    let fixed = extract::enforce_package(&content, &expected);
    extract::ensure_r_import(&fixed, &expected, &plan.package_id)
}
