use colored::Colorize;
use humansize::{format_size, DECIMAL};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::{AssemblyError, RunFailure};
use crate::log::HistoryRecord;
use crate::pipeline::{Progress, RunReport};
use crate::provider::cache::{ModelCache, PRESETS};
use crate::wire::{FileKind, FileStatus, GeneratedFile, ProjectPlan};

fn kind_tag(kind: FileKind) -> colored::ColoredString {
    match kind {
        FileKind::Source => "[KOTLIN]".green().bold(),
        FileKind::Resource => "[XML]".cyan().bold(),
        FileKind::ManifestFragment => "[MANIFEST]".magenta().bold(),
    }
}

pub fn show_plan(plan: &ProjectPlan, warnings: &[String]) {
    println!("\n=== PLAN ===");
    println!("{}  ({})", plan.display_name.bold(), plan.package_id);
    let mut n = 0usize;
    for m in &plan.modules {
        println!("{}", format!("module {}", m.name).yellow().bold());
        for f in &m.files {
            n += 1;
            println!("{}. {}  {} — {}", n, kind_tag(f.kind), f.relative_path, f.description);
        }
    }
    if !warnings.is_empty() {
        println!("\nPlanner warnings:");
        for w in warnings {
            println!(" - {}", w);
        }
    }
    println!();
}

pub fn confirm(prompt: &str) -> bool {
    print!("{} [y/N]: ", prompt);
    let _ = io::stdout().flush();
    let mut s = String::new();
    if io::stdin().read_line(&mut s).is_ok() {
        let ans = s.trim().to_lowercase();
        ans == "y" || ans == "yes"
    } else {
        false
    }
}

pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner} {msg} ({elapsed})").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// One spinner line per run, plus a log line per finished file.
pub struct ConsoleProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self { multi: MultiProgress::new(), bars: Mutex::new(HashMap::new()) }
    }

    fn bar(&self, run: &str) -> Option<ProgressBar> {
        let mut bars = self.bars.lock().ok()?;
        let pb = bars.entry(run.to_string()).or_insert_with(|| {
            self.multi.add(spinner(run))
        });
        Some(pb.clone())
    }

    pub fn finish(&self) {
        if let Ok(mut bars) = self.bars.lock() {
            for (_, pb) in bars.drain() {
                pb.finish_and_clear();
            }
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress for ConsoleProgress {
    fn notify(&self, run: &str, message: &str) {
        if let Some(pb) = self.bar(run) {
            pb.set_message(format!("{run}: {message}"));
        }
    }

    fn file_done(&self, run: &str, file: &GeneratedFile) {
        let status = match file.status {
            FileStatus::Ok => "ok".green().bold(),
            FileStatus::Rejected => "rejected".yellow().bold(),
            FileStatus::Failed => "failed".red().bold(),
        };
        let why = file.failure.as_ref().map(|f| format!("  ({f})")).unwrap_or_default();
        let _ = self.multi.println(format!("{run}: {status} {}{why}", file.relative_path));
    }
}

pub fn print_run_report(report: &RunReport) {
    let (written, skipped, bytes) = match &report.instance {
        Some(i) => (i.written.len(), i.skipped.len(), i.bytes_written()),
        None => (0, report.skipped_paths().len(), 0),
    };
    let outcome = report.outcome();
    let outcome_label = match outcome.as_str() {
        "complete" => outcome.green().bold(),
        "degraded" => outcome.yellow().bold(),
        _ => outcome.red().bold(),
    };

    println!(
        "\n{}",
        "┏━━━━━━━━━━━━━━━━━━━━━━━━ Run Report ━━━━━━━━━━━━━━━━━━━━━━━┓".bold()
    );
    println!("  {}: {}   {}: {}", "Idea".bold(), report.idea, "Outcome".bold(), outcome_label);
    println!(
        "  {}: {}   {}: {}   {}: {}",
        "Written".green().bold(), written,
        "Skipped".yellow().bold(), skipped,
        "Bytes".bold(), format_size(bytes, DECIMAL)
    );
    println!("{}", "┗━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┛".bold());

    if let Some(path) = report.project_path() {
        println!("Project: {}", path.display().to_string().bold());
    }
    if let Some(failure) = &report.failure {
        println!("{} {}", "Failed:".red().bold(), failure);
    }
    if let Some(RunFailure::Assemble(AssemblyError::ValidationFailed { problems, .. })) = &report.failure {
        println!("{}", indent(&problems.join("\n"), 2));
    }
    if let Some(inst) = &report.instance {
        for s in &inst.skipped {
            println!(" {} {}  ({})", "skipped".yellow(), s.path, s.reason);
        }
    } else {
        for p in report.skipped_paths() {
            println!(" {} {}", "skipped".yellow(), p);
        }
    }
    println!();
}

pub fn print_models(cache: &ModelCache) {
    println!("\nModel cache: {}", cache.dir().display());
    for p in PRESETS {
        let state = if cache.is_cached(p) {
            let size = cache.cached_path(p).metadata().map(|m| m.len()).unwrap_or(0);
            format!("cached, {}", format_size(size, DECIMAL)).green()
        } else {
            "not downloaded".dimmed()
        };
        println!("  {:<28} {:<8} {}  [{}]", p.name.bold(), p.model_type, p.filename, state);
    }
    println!();
}

pub fn print_history(records: &[HistoryRecord]) {
    if records.is_empty() {
        println!("(no runs recorded yet)");
        return;
    }
    for r in records {
        let outcome = match r.outcome.as_str() {
            "complete" => r.outcome.green(),
            "degraded" => r.outcome.yellow(),
            _ => r.outcome.red(),
        };
        println!(
            "{}  {}  {}  {}",
            r.created_at.format("%Y-%m-%d %H:%M"),
            outcome,
            r.app_name.as_deref().unwrap_or("-").bold(),
            r.idea
        );
        if let Some(p) = &r.project_path {
            println!("    {}", p.display());
        }
        if !r.skipped.is_empty() {
            println!("    skipped: {}", r.skipped.join(", "));
        }
    }
}

fn indent(s: &str, n: usize) -> String {
    let pad = " ".repeat(n);
    s.lines()
        .map(|l| format!("{}{}", pad, l))
        .collect::<Vec<_>>()
        .join("\n")
}
