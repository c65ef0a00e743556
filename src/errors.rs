use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("model is not loaded")]
    NotLoaded,
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
    #[error("generation error: {0}")]
    Generation(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("the idea is empty")]
    EmptyIdea,
    #[error("model runtime unavailable: {0}")]
    RuntimeUnavailable(RuntimeError),
    #[error("model output could not be parsed into a plan after {attempts} attempts: {last}")]
    UnparseablePlan { attempts: usize, last: String },
}

impl PlanError {
    pub fn reason(&self) -> &'static str {
        match self {
            PlanError::EmptyIdea => "empty-idea",
            PlanError::RuntimeUnavailable(_) => "runtime-unavailable",
            PlanError::UnparseablePlan { .. } => "unparseable-plan",
        }
    }
}

/// Why a single file did not make it into the project. Never fatal on its own.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthesisFailure {
    #[error("model returned no usable content")]
    Empty,
    #[error("content looks truncated: {0}")]
    Truncated(String),
    #[error("runtime failed: {0}")]
    Runtime(RuntimeError),
    #[error("path escapes the project root")]
    PathEscape,
    #[error("write failed: {0}")]
    Write(String),
}

#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("template copy failed: {0}")]
    TemplateCopyFailed(String),
    #[error("rewriting template identifiers failed: {0}")]
    RewriteFailed(String),
    #[error("validation failed for {}: {}", root.display(), problems.join("; "))]
    ValidationFailed { root: PathBuf, problems: Vec<String> },
    #[error("assembly task did not finish: {0}")]
    Interrupted(String),
}

impl AssemblyError {
    pub fn reason(&self) -> &'static str {
        match self {
            AssemblyError::TemplateCopyFailed(_) => "template-copy-failed",
            AssemblyError::RewriteFailed(_) => "rewrite-failed",
            AssemblyError::ValidationFailed { .. } => "validation-failed",
            AssemblyError::Interrupted(_) => "interrupted",
        }
    }

    /// The instance left on disk for inspection, if any.
    pub fn degraded_root(&self) -> Option<&PathBuf> {
        match self {
            AssemblyError::ValidationFailed { root, .. } => Some(root),
            _ => None,
        }
    }
}

/// Run-level failure, tagged with the stage that stopped the pipeline.
#[derive(Error, Debug)]
pub enum RunFailure {
    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),
    #[error("synthesis of {path} failed: {error}")]
    Synthesize { path: String, error: RuntimeError },
    #[error("assembly failed: {0}")]
    Assemble(#[from] AssemblyError),
    #[error("run cancelled")]
    Cancelled,
}

impl RunFailure {
    pub fn stage(&self) -> String {
        match self {
            RunFailure::Plan(_) => "plan".to_string(),
            RunFailure::Synthesize { path, .. } => format!("synthesize:{path}"),
            RunFailure::Assemble(e) => format!("assemble:{}", e.reason()),
            RunFailure::Cancelled => "cancelled".to_string(),
        }
    }
}
