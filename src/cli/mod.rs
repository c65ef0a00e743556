use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local GGUF model served by llama.cpp
    #[value(name = "llamacpp", alias = "llama-cpp", alias = "local")]
    LlamaCpp,
    Ollama,
    /// OpenAI-compatible chat API (OpenRouter by default)
    #[value(name = "openai", alias = "open-ai", alias = "openrouter")]
    OpenAI,
    Gemini,
}

#[derive(Parser, Debug)]
#[command(name = "android_agent", version, about = "Create an Android Studio project from an app idea")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// TOML config file (defaults to ./android_agent.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, global = true)]
    pub provider: Option<ProviderKind>,

    #[arg(long, global = true)]
    pub model: Option<String>,

    #[arg(long, global = true)]
    pub template: Option<PathBuf>,

    #[arg(long, global = true)]
    pub output_root: Option<PathBuf>,

    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    #[arg(long, default_value_t = false, global = true)]
    pub save_request: bool,

    #[arg(long, default_value_t = false, global = true)]
    pub save_response: bool,

    #[arg(long, default_value_t = false, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Plan, synthesize and assemble a project for each idea
    Generate {
        /// App idea in plain words; repeat to generate several projects
        #[arg(long, required = true)]
        idea: Vec<String>,

        /// Skip the interactive plan confirmation
        #[arg(long, default_value_t = false)]
        auto_approve: bool,
    },
    /// Print the plan for an idea as JSON without generating anything
    Plan {
        #[arg(long)]
        idea: String,
    },
    /// List model presets and whether they are cached
    Models,
    /// Download a preset's weights into the model cache
    Fetch {
        #[arg(long)]
        preset: String,
    },
    /// Show previous generation runs
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Write the effective configuration to a TOML file
    InitConfig {
        #[arg(long, default_value = crate::config::DEFAULT_CONFIG_FILE)]
        path: PathBuf,
    },
}

impl Args {
    /// Applies command-line overrides on top of the loaded config.
    pub fn apply_overrides(&self, cfg: &mut crate::config::Config) {
        if let Some(p) = self.provider {
            cfg.provider = p;
        }
        if let Some(m) = &self.model {
            cfg.model = m.clone();
        }
        if let Some(t) = &self.template {
            cfg.template_dir = t.clone();
        }
        if let Some(o) = &self.output_root {
            cfg.output_root = o.clone();
        }
        if let Some(t) = self.timeout_secs {
            cfg.timeout_secs = t;
        }
    }
}
