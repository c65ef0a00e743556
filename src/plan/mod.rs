//! Idea -> ProjectPlan. The model proposes, `sanitize` disposes.

pub mod naming;

use std::collections::HashSet;

use crate::config::{Config, Limits};
use crate::errors::{PlanError, RuntimeError};
use crate::log::Artifacts;
use crate::prompt;
use crate::provider::ModelRuntime;
use crate::safety;
use crate::wire::{CompletionOptions, FileKind, FileSpec, Idea, Module, ProjectPlan, RawPlan};

const JAVA_PREFIXES: &[&str] = &["app/src/main/java/", "src/main/java/", "main/java/", "java/", "app/src/main/kotlin/", "kotlin/"];
const RES_PREFIXES: &[&str] = &["app/src/main/res/", "src/main/res/", "main/res/", "res/"];
const RES_FOLDERS: &[&str] = &["layout", "values", "menu", "drawable", "xml", "color", "anim", "animator", "navigation", "font", "mipmap"];
/// Names small models give when they did not really name the app.
const GENERIC_NAMES: &[&str] = &["app", "myapp", "androidapp", "application", "appname", "untitled", "newapp", "sampleapp"];

pub struct Planner<'a> {
    runtime: &'a ModelRuntime,
    config: &'a Config,
    artifacts: &'a Artifacts,
}

impl<'a> Planner<'a> {
    pub fn new(runtime: &'a ModelRuntime, config: &'a Config, artifacts: &'a Artifacts) -> Self {
        Self { runtime, config, artifacts }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            max_tokens: self.config.synthesis.plan_max_tokens,
            temperature: self.config.synthesis.plan_temperature,
            stop_sequences: self.config.synthesis.stop_sequences.clone(),
        }
    }

    /// Returns the plan plus warnings about anything that was dropped or clamped.
    pub async fn plan(&self, idea: &Idea) -> Result<(ProjectPlan, Vec<String>), PlanError> {
        let limits = &self.config.limits;
        let taken = naming::taken_package_ids(&self.config.output_root);
        let opts = self.options();
        let attempts = limits.plan_retries + 1;

        let mut last_problem = String::new();
        let mut last_runtime: Option<RuntimeError> = None;

        for attempt in 0..attempts {
            let prompt = if attempt == 0 {
                prompt::plan_prompt(idea, limits)
            } else {
                prompt::plan_prompt_strict(idea, limits, &last_problem)
            };
            let stage = format!("plan-{attempt}");

            let text = match self.runtime.complete(&prompt, &opts).await {
                Ok(t) => t,
                Err(RuntimeError::NotLoaded) => return Err(PlanError::RuntimeUnavailable(RuntimeError::NotLoaded)),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "plan completion failed");
                    self.artifacts.record(&stage, &prompt, None);
                    last_problem = e.to_string();
                    last_runtime = Some(e);
                    continue;
                }
            };
            self.artifacts.record(&stage, &prompt, Some(&text));
            last_runtime = None;

            let outcome = parse_plan(&text).and_then(|raw| sanitize(raw, idea, limits, &taken));
            match outcome {
                Ok((plan, warnings)) => {
                    tracing::info!(
                        app = %plan.app_name,
                        package = %plan.package_id,
                        modules = plan.modules.len(),
                        files = plan.file_count(),
                        attempt,
                        "plan accepted"
                    );
                    return Ok((plan, warnings));
                }
                Err(problem) => {
                    tracing::warn!(attempt, %problem, "plan rejected");
                    last_problem = problem;
                }
            }
        }

        match last_runtime {
            Some(e) => Err(PlanError::RuntimeUnavailable(e)),
            None => Err(PlanError::UnparseablePlan { attempts, last: last_problem }),
        }
    }
}

/// First balanced `{...}` in `s`. Braces inside JSON strings are ignored.
pub fn extract_first_json_object(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut start = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if start.is_some() => in_string = true,
            b'{' => {
                if start.is_none() {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(st) = start {
                        return Some(s[st..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }
    None
}

pub fn parse_plan(text: &str) -> Result<RawPlan, String> {
    let json = extract_first_json_object(text).ok_or_else(|| "no JSON object in the answer".to_string())?;
    serde_json::from_str::<RawPlan>(&json).map_err(|e| format!("plan JSON is malformed: {e}"))
}

fn is_package_segment(s: &str) -> bool {
    !s.contains('.') && naming::is_valid_package_id(&format!("x.{s}"))
}

/// Android resource file stems: `[a-z][a-z0-9_]*`.
fn is_resource_name(stem: &str) -> bool {
    let mut chars = stem.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn is_class_name(stem: &str) -> bool {
    let mut chars = stem.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn strip_any<'s>(path: &'s str, prefixes: &[&str]) -> &'s str {
    prefixes
        .iter()
        .find_map(|p| path.strip_prefix(p))
        .unwrap_or(path)
}

fn guess_res_folder(name: &str) -> &'static str {
    let stem = name.trim_end_matches(".xml");
    if ["strings", "colors", "themes", "styles", "dimens", "arrays"].contains(&stem) {
        "values"
    } else if stem.starts_with("menu_") || stem.ends_with("_menu") {
        "menu"
    } else if stem.starts_with("ic_") || stem.starts_with("bg_") {
        "drawable"
    } else {
        "layout"
    }
}

/// Maps a model-proposed path to its canonical location for `kind`.
pub fn normalize_path(kind: FileKind, raw: &str, package_path: &str) -> Result<String, String> {
    let clean = safety::clean_relative(raw).map_err(|e| e.to_string())?;
    let unified = clean.to_string_lossy().replace('\\', "/");

    match kind {
        FileKind::ManifestFragment => Ok("app/src/main/AndroidManifest.xml".to_string()),
        FileKind::Source => {
            let rest = strip_any(&unified, JAVA_PREFIXES);
            let rest = rest
                .strip_prefix(package_path)
                .and_then(|r| r.strip_prefix('/'))
                .unwrap_or(rest);
            let mut segs: Vec<&str> = rest.split('/').collect();
            let file = segs.pop().unwrap_or_default();
            let stem = file
                .strip_suffix(".kt")
                .or_else(|| file.strip_suffix(".java"))
                .unwrap_or(file);
            if file.contains('.') && stem == file {
                return Err(format!("'{raw}' is not a Kotlin source"));
            }
            if !is_class_name(stem) {
                return Err(format!("'{stem}' is not a valid class file name"));
            }
            let sub: Vec<&str> = if segs.len() <= 2 && segs.iter().all(|s| is_package_segment(s)) {
                segs
            } else {
                Vec::new()
            };
            let mut out = format!("app/src/main/java/{package_path}");
            for s in sub {
                out.push('/');
                out.push_str(s);
            }
            Ok(format!("{out}/{stem}.kt"))
        }
        FileKind::Resource => {
            let rest = strip_any(&unified, RES_PREFIXES);
            let mut segs: Vec<&str> = rest.split('/').collect();
            let file = segs.pop().unwrap_or_default().to_ascii_lowercase();
            let stem = match file.strip_suffix(".xml") {
                Some(stem) => stem.to_string(),
                None if file.contains('.') => return Err(format!("'{raw}' is not an XML resource")),
                None => file,
            };
            if !is_resource_name(&stem) {
                return Err(format!("'{stem}' is not a valid resource name"));
            }
            let name = format!("{stem}.xml");
            let folder = match segs.as_slice() {
                [] => guess_res_folder(&name).to_string(),
                [f] => f.to_ascii_lowercase(),
                _ => return Err(format!("'{raw}' nests too deep for a resource")),
            };
            let base = folder.split('-').next().unwrap_or_default();
            if !RES_FOLDERS.contains(&base) {
                return Err(format!("'{folder}' is not a resource folder"));
            }
            Ok(format!("app/src/main/res/{folder}/{name}"))
        }
    }
}

fn choose_names(raw: Option<&str>, idea: &Idea) -> (String, String) {
    if let Some(proposed) = raw {
        if let (Some(app), Some(display)) = (naming::sanitize_app_name(proposed), naming::display_name(proposed)) {
            if !GENERIC_NAMES.contains(&app.to_ascii_lowercase().as_str()) {
                return (app, display);
            }
        }
    }
    match naming::name_from_idea(idea.as_str()) {
        Some(app) => (app.clone(), app),
        None => (naming::DEFAULT_APP_NAME.to_string(), naming::DEFAULT_APP_NAME.to_string()),
    }
}

/// Turns the model's raw plan into one the rest of the pipeline can trust.
pub fn sanitize(
    raw: RawPlan,
    idea: &Idea,
    limits: &Limits,
    taken: &HashSet<String>,
) -> Result<(ProjectPlan, Vec<String>), String> {
    let mut warnings = Vec::new();

    let (app_name, display_name) = choose_names(raw.app_name.as_deref(), idea);

    let proposed_pkg = raw.package_id.as_deref().map(|p| p.trim().to_ascii_lowercase());
    let base_pkg = match proposed_pkg {
        Some(p) if naming::is_valid_package_id(&p) => p,
        Some(p) => {
            if !p.is_empty() {
                warnings.push(format!("package '{p}' is not a valid identifier; derived one from the app name"));
            }
            naming::derive_package_id(&app_name)
        }
        None => naming::derive_package_id(&app_name),
    };
    let package_id = naming::unique_package_id(&base_pkg, taken);
    if package_id != base_pkg {
        warnings.push(format!("package '{base_pkg}' already used under the output root; using '{package_id}'"));
    }
    let package_path = package_id.replace('.', "/");

    let mut seen: HashSet<String> = HashSet::new();
    let mut modules: Vec<Module> = Vec::new();
    for (n, rm) in raw.modules.into_iter().enumerate() {
        let name = match rm.name.trim() {
            "" => format!("module{}", n + 1),
            s => s.to_string(),
        };
        let mut files = Vec::new();
        for rf in rm.files {
            let Some(kind) = FileKind::parse_loose(&rf.kind, &rf.path) else {
                warnings.push(format!("dropped '{}' (unknown kind '{}')", rf.path, rf.kind));
                continue;
            };
            let relative_path = match normalize_path(kind, &rf.path, &package_path) {
                Ok(p) => p,
                Err(why) => {
                    warnings.push(format!("dropped '{}' ({why})", rf.path));
                    continue;
                }
            };
            if !seen.insert(relative_path.clone()) {
                warnings.push(format!("dropped duplicate {relative_path}"));
                continue;
            }
            let description = match rf.description.trim() {
                "" => format!("Implements {}", relative_path.rsplit('/').next().unwrap_or(&relative_path)),
                d => d.to_string(),
            };
            files.push(FileSpec { relative_path, kind, description });
        }
        if files.is_empty() {
            warnings.push(format!("dropped module '{name}' (no usable files)"));
            continue;
        }
        modules.push(Module { name, files });
    }

    if modules.len() > limits.max_modules {
        warnings.push(format!("clamped {} modules to {}", modules.len(), limits.max_modules));
        modules.truncate(limits.max_modules);
    }

    let mut budget = limits.max_files;
    let total: usize = modules.iter().map(|m| m.files.len()).sum();
    if total > budget {
        warnings.push(format!("clamped {total} files to {budget}"));
        for m in &mut modules {
            m.files.truncate(budget);
            budget -= m.files.len();
        }
        modules.retain(|m| !m.files.is_empty());
    }

    if modules.is_empty() {
        return Err("the plan has no usable modules".to_string());
    }

    Ok((ProjectPlan { app_name, display_name, package_id, modules }, warnings))
}
