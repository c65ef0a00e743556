//! Template identifiers -> plan identifiers, in file contents and in the
//! package directory layout.

use fs_err as fs;
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::apply::write_atomic;
use crate::errors::AssemblyError;
use crate::template::TemplateDescriptor;
use crate::wire::ProjectPlan;

const TEXT_EXTENSIONS: &[&str] = &["kt", "java", "kts", "gradle", "xml", "pro", "properties"];
pub const SOURCE_SETS: &[&str] = &["main", "test", "androidTest"];

fn root_project_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(rootProject\.name\s*=\s*")[^"]*(")"#).expect("static regex"))
}

fn gradle_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"((?:namespace|applicationId)\s*=\s*")[^"]*(")"#).expect("static regex"))
}

fn manifest_package_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(<manifest\b[^>]*?\spackage=")[^"]*(")"#).expect("static regex"))
}

fn app_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(<string\s+name="app_name"[^>]*>)[^<]*(</string>)"#).expect("static regex"))
}

pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "\\'")
}

fn set_between(re: &Regex, text: &str, value: &str) -> String {
    re.replace_all(text, |c: &Captures| format!("{}{}{}", &c[1], value, &c[2]))
        .into_owned()
}

/// Value currently held by a `(prefix)value(suffix)` site, for validation.
pub fn current_values(re_kind: IdSite, text: &str) -> Vec<String> {
    let re = match re_kind {
        IdSite::GradleIds => gradle_id_re(),
        IdSite::ManifestPackage => manifest_package_re(),
        IdSite::RootProject => root_project_re(),
    };
    re.captures_iter(text)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let start = c.get(1)?.end() - whole.start();
            let end = c.get(2)?.start() - whole.start();
            Some(whole.as_str()[start..end].to_string())
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub enum IdSite {
    GradleIds,
    ManifestPackage,
    RootProject,
}

#[derive(Debug, Clone)]
pub struct Identifiers {
    pub old_package: String,
    pub new_package: String,
    pub new_project: String,
    pub new_label: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewriteSummary {
    pub files_rewritten: usize,
    pub dirs_moved: usize,
}

impl Identifiers {
    pub fn new(template: &TemplateDescriptor, plan: &ProjectPlan) -> Self {
        Self {
            old_package: template.package_id.clone(),
            new_package: plan.package_id.clone(),
            new_project: plan.app_name.clone(),
            new_label: plan.display_name.clone(),
        }
    }

    pub fn old_package_path(&self) -> String {
        self.old_package.replace('.', "/")
    }

    pub fn new_package_path(&self) -> String {
        self.new_package.replace('.', "/")
    }

    pub fn rewrite_text(&self, text: &str) -> String {
        let s = text.replace(&self.old_package, &self.new_package);
        let s = set_between(root_project_re(), &s, &self.new_project);
        let s = set_between(gradle_id_re(), &s, &self.new_package);
        let s = set_between(manifest_package_re(), &s, &self.new_package);
        set_between(app_name_re(), &s, &xml_escape(&self.new_label))
    }

    pub fn rewrite_path(&self, rel: &str) -> String {
        rel.replace(
            &format!("java/{}/", self.old_package_path()),
            &format!("java/{}/", self.new_package_path()),
        )
    }
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TEXT_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

fn prune_empty(stop: &Path, from: Option<&Path>) -> std::io::Result<()> {
    let mut dir = from;
    while let Some(d) = dir {
        if d == stop || !d.starts_with(stop) {
            break;
        }
        if fs::read_dir(d)?.next().is_some() {
            break;
        }
        fs::remove_dir(d)?;
        dir = d.parent();
    }
    Ok(())
}

/// Moves `java/<old>` to `java/<new>` inside one source set. Goes through a
/// staging name so `new` may sit inside `old` or the other way round.
fn move_package_dir(java_root: &Path, old_rel: &str, new_rel: &str) -> std::io::Result<bool> {
    let old = java_root.join(old_rel);
    if old_rel == new_rel || !old.is_dir() {
        return Ok(false);
    }
    let staging = java_root.join(format!(".pkg-{}", Uuid::new_v4().simple()));
    fs::rename(&old, &staging)?;
    prune_empty(java_root, old.parent())?;

    let new = java_root.join(new_rel);
    if let Some(parent) = new.parent() {
        fs::create_dir_all(parent)?;
    }
    if new.exists() {
        for entry in fs::read_dir(&staging)? {
            let entry = entry?;
            let target = new.join(entry.file_name());
            if target.exists() {
                tracing::warn!(path = %target.display(), "package move target exists; keeping it");
                continue;
            }
            fs::rename(entry.path(), target)?;
        }
        fs::remove_dir_all(&staging)?;
    } else {
        fs::rename(&staging, &new)?;
    }
    Ok(true)
}

/// Rewrites every identifier site in a fresh instance and relocates the
/// package directories of each source set.
pub fn rewrite_instance(root: &Path, ids: &Identifiers) -> Result<RewriteSummary, AssemblyError> {
    let fail = |e: std::io::Error| AssemblyError::RewriteFailed(e.to_string());
    let mut summary = RewriteSummary::default();

    let files: Vec<_> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_text_file(e.path()))
        .map(|e| e.into_path())
        .collect();

    for path in files {
        let Ok(text) = fs::read_to_string(&path) else {
            tracing::debug!(path = %path.display(), "not UTF-8; left as is");
            continue;
        };
        let rewritten = ids.rewrite_text(&text);
        if rewritten != text {
            write_atomic(&path, rewritten.as_bytes()).map_err(fail)?;
            summary.files_rewritten += 1;
        }
    }

    let (old_rel, new_rel) = (ids.old_package_path(), ids.new_package_path());
    for set in SOURCE_SETS {
        let java_root = root.join("app/src").join(set).join("java");
        if move_package_dir(&java_root, &old_rel, &new_rel).map_err(fail)? {
            summary.dirs_moved += 1;
        }
    }
    Ok(summary)
}
