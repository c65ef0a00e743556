//! Local cache of GGUF weights.
//!
//! Presets name a file on a model hub; the first use downloads it into the
//! cache directory and every later run reuses the cached copy.

use anyhow::{Context, Result};
use fs_err as fs;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::ModelRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPreset {
    pub name: &'static str,
    /// Empty for models distributed outside the hub.
    pub repo_id: &'static str,
    pub filename: &'static str,
    pub model_type: &'static str,
}

/// Small, CPU-friendly models first.
pub const PRESETS: &[ModelPreset] = &[
    ModelPreset {
        name: "TinyLlama 1.1B Chat Q5",
        repo_id: "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF",
        filename: "tinyllama-1.1b-chat-v1.0.Q5_K_M.gguf",
        model_type: "llama",
    },
    ModelPreset {
        name: "Phi-2 Q4_K_M",
        repo_id: "TheBloke/phi-2-GGUF",
        filename: "phi-2.Q4_K_M.gguf",
        model_type: "phi",
    },
    ModelPreset {
        name: "CodeLlama 7B Q4_K_M",
        repo_id: "TheBloke/CodeLlama-7B-GGUF",
        filename: "codellama-7b.Q4_K_M.gguf",
        model_type: "llama",
    },
    ModelPreset {
        name: "Orca Mini 3B Q4",
        repo_id: "",
        filename: "orca-mini-3b-gguf2-q4_0.gguf",
        model_type: "llama",
    },
];

impl ModelPreset {
    pub fn download_url(&self) -> String {
        if self.repo_id.is_empty() {
            format!("https://gpt4all.io/models/gguf/{}", self.filename)
        } else {
            format!("https://huggingface.co/{}/resolve/main/{}", self.repo_id, self.filename)
        }
    }
}

/// Matches a preset by display name (case-insensitive) or by file name.
pub fn find_preset(name_or_file: &str) -> Option<&'static ModelPreset> {
    let needle = name_or_file.trim();
    PRESETS
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(needle) || p.filename == needle)
}

#[derive(Debug, Clone)]
pub struct ModelCache {
    dir: PathBuf,
}

impl ModelCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cached_path(&self, preset: &ModelPreset) -> PathBuf {
        self.dir.join(preset.filename)
    }

    pub fn is_cached(&self, preset: &ModelPreset) -> bool {
        self.cached_path(preset).is_file()
    }

    /// `model` may be a path to a GGUF file, a preset name or a preset file
    /// name; `fallback_preset` is used when `model` is none of these.
    pub fn resolve(&self, model: &str, fallback_preset: &str) -> Option<ModelRef> {
        let as_path = Path::new(model);
        if !model.is_empty() && as_path.is_file() {
            return Some(ModelRef::File(as_path.to_path_buf()));
        }
        find_preset(model)
            .or_else(|| find_preset(fallback_preset))
            .map(ModelRef::Preset)
    }

    /// Returns the local weights path, downloading on first use.
    pub async fn ensure(&self, model: &ModelRef) -> Result<PathBuf> {
        match model {
            ModelRef::File(p) => Ok(p.clone()),
            ModelRef::Preset(preset) => {
                let path = self.cached_path(preset);
                if path.is_file() {
                    tracing::debug!(path = %path.display(), "model already cached");
                    return Ok(path);
                }
                self.download(preset, &path).await?;
                Ok(path)
            }
        }
    }

    async fn download(&self, preset: &ModelPreset, dest: &Path) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let url = preset.download_url();
        tracing::info!(%url, "downloading model (first time only)");

        let resp = reqwest::get(&url)
            .await
            .with_context(|| format!("requesting {url}"))?
            .error_for_status()
            .with_context(|| format!("downloading {url}"))?;

        let bar = match resp.content_length() {
            Some(total) => ProgressBar::new(total),
            None => ProgressBar::new_spinner(),
        };
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:40}] {bytes}/{total_bytes} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(preset.filename.to_string());

        // Partial downloads stay in the temp file and vanish on error.
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk: bytes::Bytes = chunk.context("reading model stream")?;
            tmp.write_all(&chunk)?;
            bar.inc(chunk.len() as u64);
        }
        tmp.flush()?;
        tmp.persist(dest)
            .with_context(|| format!("storing model at {}", dest.display()))?;
        bar.finish_with_message(format!("{} downloaded", preset.filename));
        Ok(())
    }
}
