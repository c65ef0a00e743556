use anyhow::Context;
use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

pub const HISTORY_FILE: &str = "history.jsonl";

/// Installs the stderr subscriber. `RUST_LOG` wins over the `debug` flag.
pub fn init(debug: bool) {
    let fallback = if debug { "android_agent=debug" } else { "android_agent=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

/// Where per-run prompt/completion artifacts are kept.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub dir: PathBuf,
    pub save_request: bool,
    pub save_response: bool,
    pub debug: bool,
}

pub struct SavedPaths {
    pub dir: PathBuf,
    pub request: Option<PathBuf>,
    pub response: Option<PathBuf>,
}

pub fn run_dir(output_root: &Path, run: Uuid) -> PathBuf {
    output_root.join(".runs").join(run.to_string())
}

impl Artifacts {
    pub fn new(output_root: &Path, run: Uuid, save_request: bool, save_response: bool, debug: bool) -> Self {
        Self { dir: run_dir(output_root, run), save_request, save_response, debug }
    }

    pub fn disabled() -> Self {
        Self { dir: PathBuf::new(), save_request: false, save_response: false, debug: false }
    }

    /// Saves one prompt/completion pair. `stage` becomes the file stem,
    /// e.g. `plan.1` or `synth.MainActivity.kt.2`.
    pub fn save_stage(&self, stage: &str, prompt: &str, completion: Option<&str>) -> anyhow::Result<SavedPaths> {
        let mut request_path = None;
        let mut response_path = None;
        if !self.save_request && !self.save_response {
            return Ok(SavedPaths { dir: self.dir.clone(), request: None, response: None });
        }
        fs::create_dir_all(&self.dir)?;
        let stem = sanitize_stage(stage);

        if self.save_request {
            let p = self.dir.join(format!("{stem}.prompt.txt"));
            fs::write(&p, prompt)?;
            request_path = Some(p);
        }
        if self.save_response {
            if let Some(text) = completion {
                let p = self.dir.join(format!("{stem}.completion.txt"));
                fs::write(&p, text)?;
                response_path = Some(p);
            }
        }

        let saved = SavedPaths { dir: self.dir.clone(), request: request_path, response: response_path };
        if self.debug {
            print_saved_paths(stage, &saved);
        }
        Ok(saved)
    }

    /// Best effort; artifact problems never fail a run.
    pub fn record(&self, stage: &str, prompt: &str, completion: Option<&str>) {
        if let Err(e) = self.save_stage(stage, prompt, completion) {
            tracing::warn!(stage, error = %e, "could not save stage artifacts");
        }
    }
}

fn sanitize_stage(stage: &str) -> String {
    stage
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

pub fn print_saved_paths(stage: &str, saved: &SavedPaths) {
    eprintln!("debug[{stage}]: artifacts directory: {}", saved.dir.display());
    if let Some(p) = &saved.request {
        eprintln!("debug[{stage}]: prompt saved at: {}", p.display());
    } else {
        eprintln!("debug[{stage}]: prompt not saved (flag off)");
    }
    if let Some(p) = &saved.response {
        eprintln!("debug[{stage}]: completion saved at: {}", p.display());
    } else {
        eprintln!("debug[{stage}]: completion not saved (flag off)");
    }
    std::io::stderr().flush().ok();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub idea: String,
    pub app_name: Option<String>,
    pub project_path: Option<PathBuf>,
    /// `complete`, `degraded`, or the failing stage label.
    pub outcome: String,
    pub skipped: Vec<String>,
    pub created_at: DateTime<Utc>,
}

pub fn append_history(output_root: &Path, record: &HistoryRecord) -> anyhow::Result<()> {
    fs::create_dir_all(output_root)?;
    let path = output_root.join(HISTORY_FILE);
    let mut f = fs::OpenOptions::new().create(true).append(true).open(&path)?;
    let line = serde_json::to_string(record)?;
    writeln!(f, "{line}").with_context(|| format!("appending to {}", path.display()))?;
    Ok(())
}

/// Most recent records last. Unreadable lines are skipped.
pub fn read_history(output_root: &Path, limit: usize) -> anyhow::Result<Vec<HistoryRecord>> {
    let path = output_root.join(HISTORY_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(&path)?;
    let mut records: Vec<HistoryRecord> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect();
    if records.len() > limit {
        let excess = records.len() - limit;
        records.drain(..excess);
    }
    Ok(records)
}
