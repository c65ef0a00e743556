use anyhow::{Context, Result};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::ProviderKind;

pub const DEFAULT_CONFIG_FILE: &str = "android_agent.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: String,
    pub template_dir: PathBuf,
    pub output_root: PathBuf,
    pub model_cache_dir: PathBuf,
    pub provider: ProviderKind,
    pub model: String,
    pub timeout_secs: u64,
    pub limits: Limits,
    pub synthesis: Synthesis,
    pub llamacpp: LlamaCpp,
    pub ollama: Ollama,
    pub api: Api,
}

/// Bounds on plan size and retry budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_idea_chars: usize,
    pub max_modules: usize,
    pub max_files: usize,
    pub plan_retries: usize,
    pub synth_retries: usize,
    pub max_consecutive_failures: usize,
}

/// Sampling and extraction knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Synthesis {
    pub temperature: f32,
    pub max_tokens: u32,
    pub plan_temperature: f32,
    pub plan_max_tokens: u32,
    pub balance_tolerance: usize,
    pub stop_sequences: Vec<String>,
    pub template_context_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlamaCpp {
    /// Connect to an already running server instead of spawning one.
    pub server_url: Option<String>,
    pub binary: String,
    pub port: u16,
    pub context_size: u32,
    pub preset: String,
    pub prompt_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Ollama {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Api {
    pub openai_base: String,
    pub openai_key_env: String,
    pub gemini_base: String,
    pub gemini_key_env: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: "2025-10-01".into(),
            template_dir: PathBuf::from("templates/empty_activity"),
            output_root: PathBuf::from("output_projects"),
            model_cache_dir: PathBuf::from("models"),
            provider: ProviderKind::LlamaCpp,
            model: "tinyllama-1.1b-chat-v1.0.Q5_K_M.gguf".into(),
            timeout_secs: 600,
            limits: Limits::default(),
            synthesis: Synthesis::default(),
            llamacpp: LlamaCpp::default(),
            ollama: Ollama::default(),
            api: Api::default(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_idea_chars: 2000,
            max_modules: 8,
            max_files: 30,
            plan_retries: 2,
            synth_retries: 1,
            max_consecutive_failures: 2,
        }
    }
}

impl Default for Synthesis {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1536,
            plan_temperature: 0.3,
            plan_max_tokens: 1024,
            balance_tolerance: 1,
            stop_sequences: vec!["</s>".into()],
            template_context_bytes: 4_096,
        }
    }
}

impl Default for LlamaCpp {
    fn default() -> Self {
        Self {
            server_url: None,
            binary: "llama-server".into(),
            port: 8089,
            context_size: 4096,
            preset: "TinyLlama 1.1B Chat Q5".into(),
            prompt_template: "<s>[INST] {prompt} [/INST]".into(),
        }
    }
}

impl Default for Ollama {
    fn default() -> Self {
        Self { url: "http://localhost:11434".into() }
    }
}

impl Default for Api {
    fn default() -> Self {
        Self {
            openai_base: "https://openrouter.ai/api/v1".into(),
            openai_key_env: "OPENROUTER_API_KEY".into(),
            gemini_base: "https://generativelanguage.googleapis.com/v1beta".into(),
            gemini_key_env: "GEMINI_API_KEY".into(),
        }
    }
}

impl Config {
    /// Loads `path` if given, else `android_agent.toml` in the working directory
    /// when present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let p = PathBuf::from(DEFAULT_CONFIG_FILE);
                p.exists().then_some(p)
            }
        };
        match candidate {
            Some(p) => {
                let text = fs::read_to_string(&p)?;
                toml::from_str(&text).with_context(|| format!("parsing {}", p.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).context("serializing config")?;
        fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            provider = "ollama"
            model = "codellama:7b"

            [limits]
            max_files = 12
            "#,
        )
        .unwrap();
        assert_eq!(cfg.provider, ProviderKind::Ollama);
        assert_eq!(cfg.limits.max_files, 12);
        assert_eq!(cfg.limits.max_modules, 8);
        assert_eq!(cfg.synthesis.balance_tolerance, 1);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg/android_agent.toml");
        let mut cfg = Config::default();
        cfg.limits.plan_retries = 5;
        cfg.save(&path).unwrap();
        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.limits.plan_retries, 5);
        assert_eq!(loaded.template_dir, cfg.template_dir);
    }
}
