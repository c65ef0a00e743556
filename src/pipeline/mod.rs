//! One run: idea -> plan -> files -> project.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::assemble::{Assembler, ProjectInstance};
use crate::config::Config;
use crate::errors::{AssemblyError, RunFailure, RuntimeError, SynthesisFailure};
use crate::log::{append_history, Artifacts, HistoryRecord};
use crate::plan::Planner;
use crate::provider::ModelRuntime;
use crate::synth::Synthesizer;
use crate::template::TemplateStore;
use crate::wire::{FileStatus, GeneratedFile, Idea, ProjectPlan};

/// Shared stop request, set from the Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receives human-readable progress for a run.
pub trait Progress: Send + Sync {
    fn notify(&self, run: &str, message: &str);

    fn file_done(&self, _run: &str, _file: &GeneratedFile) {}
}

pub struct Silent;

impl Progress for Silent {
    fn notify(&self, _run: &str, _message: &str) {}
}

#[derive(Debug)]
pub struct RunReport {
    pub id: Uuid,
    pub idea: String,
    pub plan: Option<ProjectPlan>,
    pub warnings: Vec<String>,
    pub files: Vec<GeneratedFile>,
    pub instance: Option<ProjectInstance>,
    pub failure: Option<RunFailure>,
    pub started_at: DateTime<Utc>,
    artifacts: Artifacts,
}

impl RunReport {
    /// Short label used in progress lines.
    pub fn label(&self) -> String {
        match &self.plan {
            Some(p) => p.app_name.clone(),
            None => self.id.simple().to_string()[..8].to_string(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.instance.is_some() && self.failure.is_none()
    }

    /// `complete`, `degraded` when files were skipped, or the failing stage.
    pub fn outcome(&self) -> String {
        match (&self.failure, &self.instance) {
            (Some(f), _) => f.stage(),
            (None, Some(inst)) if !inst.skipped.is_empty() => "degraded".to_string(),
            (None, Some(_)) => "complete".to_string(),
            (None, None) => "pending".to_string(),
        }
    }

    pub fn project_path(&self) -> Option<&std::path::Path> {
        if let Some(inst) = &self.instance {
            return Some(inst.root.as_path());
        }
        match &self.failure {
            Some(RunFailure::Assemble(e)) => e.degraded_root().map(|p| p.as_path()),
            _ => None,
        }
    }

    /// Planned paths that did not make it into the project.
    pub fn skipped_paths(&self) -> Vec<String> {
        match &self.instance {
            Some(inst) => inst.skipped.iter().map(|s| s.path.clone()).collect(),
            None => self
                .files
                .iter()
                .filter(|f| f.status != FileStatus::Ok)
                .map(|f| f.relative_path.clone())
                .collect(),
        }
    }

    pub fn history_record(&self) -> HistoryRecord {
        HistoryRecord {
            id: self.id,
            idea: self.idea.clone(),
            app_name: self.plan.as_ref().map(|p| p.app_name.clone()),
            project_path: self.project_path().map(|p| p.to_path_buf()),
            outcome: self.outcome(),
            skipped: self.skipped_paths(),
            created_at: self.started_at,
        }
    }
}

fn assembly_join_error(e: tokio::task::JoinError) -> AssemblyError {
    if e.is_panic() {
        AssemblyError::Interrupted(format!("assembly panicked: {e}"))
    } else {
        AssemblyError::Interrupted(format!("assembly task cancelled: {e}"))
    }
}

pub struct Pipeline<'a> {
    runtime: &'a ModelRuntime,
    config: &'a Config,
    store: &'a TemplateStore,
    cancel: CancelFlag,
    progress: &'a dyn Progress,
    save_request: bool,
    save_response: bool,
    debug: bool,
    record_history: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        runtime: &'a ModelRuntime,
        config: &'a Config,
        store: &'a TemplateStore,
        cancel: CancelFlag,
        progress: &'a dyn Progress,
    ) -> Self {
        Self {
            runtime,
            config,
            store,
            cancel,
            progress,
            save_request: false,
            save_response: false,
            debug: false,
            record_history: true,
        }
    }

    pub fn with_artifacts(mut self, save_request: bool, save_response: bool, debug: bool) -> Self {
        self.save_request = save_request;
        self.save_response = save_response;
        self.debug = debug;
        self
    }

    pub fn with_history(mut self, record: bool) -> Self {
        self.record_history = record;
        self
    }

    pub fn start(&self, idea: &str) -> RunReport {
        let id = Uuid::new_v4();
        let artifacts = Artifacts::new(&self.config.output_root, id, self.save_request, self.save_response, self.debug);
        RunReport {
            id,
            idea: idea.to_string(),
            plan: None,
            warnings: Vec::new(),
            files: Vec::new(),
            instance: None,
            failure: None,
            started_at: Utc::now(),
            artifacts,
        }
    }

    fn check_cancel(&self) -> Result<(), RunFailure> {
        if self.cancel.is_cancelled() {
            Err(RunFailure::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Validates the idea and derives the plan. The plan is also kept on the report.
    pub async fn plan(&self, report: &mut RunReport) -> Result<ProjectPlan, RunFailure> {
        self.check_cancel()?;
        let (idea, truncated) = Idea::new(&report.idea, self.config.limits.max_idea_chars)?;
        if truncated {
            let msg = format!("idea truncated to {} characters", self.config.limits.max_idea_chars);
            tracing::warn!(run = %report.id, "{msg}");
            report.warnings.push(msg);
        }

        self.progress.notify(&report.label(), "planning");
        let artifacts = report.artifacts.clone();
        let (plan, warnings) = Planner::new(self.runtime, self.config, &artifacts).plan(&idea).await?;
        for w in &warnings {
            tracing::warn!(run = %report.id, "{w}");
        }
        report.warnings.extend(warnings);
        report.plan = Some(plan.clone());
        Ok(plan)
    }

    /// Synthesizes every planned file in order, then assembles the project.
    pub async fn build(&self, report: &mut RunReport, plan: &ProjectPlan) -> Result<ProjectInstance, RunFailure> {
        let artifacts = report.artifacts.clone();
        let synth = Synthesizer::new(self.runtime, self.config, self.store, &artifacts);
        let total = plan.file_count();
        let max_failures = self.config.limits.max_consecutive_failures.max(1);
        let mut consecutive = 0usize;

        for (n, (module, spec)) in plan.files().enumerate() {
            self.check_cancel()?;
            self.progress
                .notify(&report.label(), &format!("[{}/{}] {}", n + 1, total, spec.relative_path));

            let file = synth.synthesize(plan, module, spec).await;
            self.progress.file_done(&report.label(), &file);

            let runtime_error = match (&file.status, &file.failure) {
                (FileStatus::Failed, Some(SynthesisFailure::Runtime(e))) => Some(e.clone()),
                _ => None,
            };
            report.files.push(file);

            match runtime_error {
                Some(error) => {
                    consecutive += 1;
                    if error == RuntimeError::NotLoaded || consecutive >= max_failures {
                        return Err(RunFailure::Synthesize { path: spec.relative_path.clone(), error });
                    }
                }
                None => consecutive = 0,
            }
        }

        self.check_cancel()?;
        self.progress.notify(&report.label(), "assembling");

        let store = self.store.clone();
        let output_root = self.config.output_root.clone();
        let plan = plan.clone();
        let files = report.files.clone();
        // Assembly runs to completion once started; cancellation is not checked inside.
        let assembled = tokio::task::spawn_blocking(move || Assembler::new(&store, output_root).assemble(&plan, &files))
            .await
            .map_err(assembly_join_error)?;
        Ok(assembled?)
    }

    /// Records the result on the report, logs it and appends it to the history.
    pub fn finish(&self, mut report: RunReport, result: Result<ProjectInstance, RunFailure>) -> RunReport {
        match result {
            Ok(instance) => {
                tracing::info!(
                    run = %report.id,
                    root = %instance.root.display(),
                    written = instance.written.len(),
                    skipped = instance.skipped.len(),
                    "project ready"
                );
                report.instance = Some(instance);
            }
            Err(failure) => {
                tracing::error!(run = %report.id, stage = %failure.stage(), error = %failure, "run failed");
                report.failure = Some(failure);
            }
        }
        if self.record_history {
            if let Err(e) = append_history(&self.config.output_root, &report.history_record()) {
                tracing::warn!(error = %e, "could not append run history");
            }
        }
        report
    }

    pub async fn run(&self, idea: &str) -> RunReport {
        let mut report = self.start(idea);
        let result = match self.plan(&mut report).await {
            Ok(plan) => self.build(&mut report, &plan).await,
            Err(e) => Err(e),
        };
        self.finish(report, result)
    }
}
