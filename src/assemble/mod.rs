//! Template copy -> identifier rewrite -> file writes -> validation.

pub mod rewrite;
pub mod validate;

use fs_err as fs;
use serde::Serialize;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::apply::{apply_files, ApplyKind};
use crate::errors::AssemblyError;
use crate::template::TemplateStore;
use crate::wire::{GeneratedFile, ProjectPlan};
use rewrite::Identifiers;

const MAX_NAME_SUFFIX: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssemblyStage {
    Pending,
    Copying,
    Rewriting,
    WritingFiles,
    Validating,
    Complete,
    Failed,
}

impl fmt::Display for AssemblyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssemblyStage::Pending => "pending",
            AssemblyStage::Copying => "copying",
            AssemblyStage::Rewriting => "rewriting",
            AssemblyStage::WritingFiles => "writing-files",
            AssemblyStage::Validating => "validating",
            AssemblyStage::Complete => "complete",
            AssemblyStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrittenFile {
    pub path: String,
    pub bytes: u64,
    pub merged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectInstance {
    pub root: PathBuf,
    pub app_name: String,
    pub package_id: String,
    pub written: Vec<WrittenFile>,
    pub skipped: Vec<SkippedFile>,
    pub stage: AssemblyStage,
}

impl ProjectInstance {
    pub fn bytes_written(&self) -> u64 {
        self.written.iter().map(|w| w.bytes).sum()
    }
}

pub struct Assembler<'a> {
    store: &'a TemplateStore,
    output_root: PathBuf,
    stage: AssemblyStage,
}

impl<'a> Assembler<'a> {
    pub fn new(store: &'a TemplateStore, output_root: impl Into<PathBuf>) -> Self {
        Self { store, output_root: output_root.into(), stage: AssemblyStage::Pending }
    }

    pub fn stage(&self) -> AssemblyStage {
        self.stage
    }

    fn enter(&mut self, next: AssemblyStage, root: &Path) {
        tracing::info!(from = %self.stage, to = %next, root = %root.display(), "assembly stage");
        self.stage = next;
    }

    /// Creates `output_root/<app_name>`, or `<app_name>-2`, `-3`, ... when taken.
    /// `create_dir` fails on existing paths, so two runs can never share one.
    pub fn claim_dir(&self, app_name: &str) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.output_root)?;
        for n in 1..=MAX_NAME_SUFFIX {
            let name = if n == 1 { app_name.to_string() } else { format!("{app_name}-{n}") };
            let candidate = self.output_root.join(name);
            match fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free directory name for {app_name}"),
        ))
    }

    fn discard(&mut self, root: &Path) {
        self.stage = AssemblyStage::Failed;
        if let Err(e) = fs::remove_dir_all(root) {
            tracing::warn!(root = %root.display(), error = %e, "could not remove failed instance");
        }
    }

    pub fn assemble(&mut self, plan: &ProjectPlan, files: &[GeneratedFile]) -> Result<ProjectInstance, AssemblyError> {
        let root = self.claim_dir(&plan.app_name).map_err(|e| {
            self.stage = AssemblyStage::Failed;
            AssemblyError::TemplateCopyFailed(format!("claiming output directory: {e}"))
        })?;

        self.enter(AssemblyStage::Copying, &root);
        let copied = match self.store.copy_into(&root) {
            Ok(n) => n,
            Err(e) => {
                self.discard(&root);
                return Err(AssemblyError::TemplateCopyFailed(format!("{e:#}")));
            }
        };
        tracing::debug!(files = copied, template = %self.store.label(), "template copied");

        self.enter(AssemblyStage::Rewriting, &root);
        let ids = Identifiers::new(self.store.descriptor(), plan);
        match rewrite::rewrite_instance(&root, &ids) {
            Ok(summary) => tracing::debug!(
                files = summary.files_rewritten,
                dirs = summary.dirs_moved,
                "identifiers rewritten"
            ),
            Err(e) => {
                self.discard(&root);
                return Err(e);
            }
        }

        self.enter(AssemblyStage::WritingFiles, &root);
        let applied = apply_files(&root, files, &plan.package_id);

        self.enter(AssemblyStage::Validating, &root);
        let problems = validate::validate(&root, self.store.descriptor(), plan, &applied);
        if !problems.is_empty() {
            self.stage = AssemblyStage::Failed;
            tracing::error!(root = %root.display(), problems = problems.len(), "instance failed validation");
            return Err(AssemblyError::ValidationFailed { root, problems });
        }

        self.enter(AssemblyStage::Complete, &root);
        let mut written = Vec::new();
        let mut skipped = Vec::new();
        for d in applied.details {
            match d.kind {
                ApplyKind::Skipped => skipped.push(SkippedFile {
                    path: d.path,
                    reason: d.note.unwrap_or_default(),
                }),
                kind => written.push(WrittenFile {
                    path: d.path,
                    bytes: d.bytes_after.unwrap_or(0),
                    merged: kind == ApplyKind::Merged,
                }),
            }
        }

        Ok(ProjectInstance {
            root,
            app_name: plan.app_name.clone(),
            package_id: plan.package_id.clone(),
            written,
            skipped,
            stage: self.stage,
        })
    }
}
