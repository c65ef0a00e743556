//! Read-only base project. Each run gets its own copy; nothing here ever
//! writes below [`TemplateStore::root`].

use anyhow::{Context, Result};
use fs_err as fs;
use glob::{MatchOptions, Pattern};
use rayon::prelude::*;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::wire::FileKind;

pub const DESCRIPTOR: &str = "template.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateDescriptor {
    pub name: String,
    pub version: String,
    /// Package id baked into the template sources.
    pub package_id: String,
    /// `rootProject.name` in settings.gradle.kts.
    pub project_name: String,
    /// Launcher label in strings.xml.
    pub app_label: String,
    #[serde(default = "default_manifest")]
    pub manifest: String,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub context: ContextFiles,
}

/// Template files shown to the model per file kind. `{package_path}` expands
/// to the template's package directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextFiles {
    #[serde(default)]
    pub source: Vec<String>,
    #[serde(default)]
    pub resource: Vec<String>,
    #[serde(default)]
    pub manifest: Vec<String>,
}

fn default_manifest() -> String {
    "app/src/main/AndroidManifest.xml".into()
}

impl TemplateDescriptor {
    pub fn package_path(&self) -> String {
        self.package_id.replace('.', "/")
    }

    pub fn context_for(&self, kind: FileKind) -> Vec<String> {
        let list = match kind {
            FileKind::Source => &self.context.source,
            FileKind::Resource => &self.context.resource,
            FileKind::ManifestFragment => &self.context.manifest,
        };
        let pkg = self.package_path();
        list.iter().map(|p| p.replace("{package_path}", &pkg)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct TemplateStore {
    root: PathBuf,
    descriptor: TemplateDescriptor,
    excludes: Vec<Pattern>,
}

impl TemplateStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let desc_path = root.join(DESCRIPTOR);
        let text = fs::read_to_string(&desc_path)
            .with_context(|| format!("template descriptor missing under {}", root.display()))?;
        let descriptor: TemplateDescriptor =
            toml::from_str(&text).with_context(|| format!("parsing {}", desc_path.display()))?;
        let excludes = descriptor
            .exclude
            .iter()
            .map(|p| Pattern::new(p).with_context(|| format!("bad exclude pattern '{p}'")))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(name = %descriptor.name, version = %descriptor.version, "template opened");
        Ok(Self { root, descriptor, excludes })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn descriptor(&self) -> &TemplateDescriptor {
        &self.descriptor
    }

    pub fn label(&self) -> String {
        format!("{}@{}", self.descriptor.name, self.descriptor.version)
    }

    fn is_excluded(&self, rel: &Path) -> bool {
        if rel == Path::new(DESCRIPTOR) {
            return true;
        }
        let opts = MatchOptions { require_literal_separator: true, ..MatchOptions::new() };
        self.excludes.iter().any(|p| p.matches_path_with(rel, opts))
    }

    /// Relative paths of every file a copy would contain.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| match e.path().strip_prefix(&self.root) {
                Ok(rel) => rel.as_os_str().is_empty() || !self.is_excluded(rel),
                Err(_) => false,
            });
        for entry in walker {
            let entry = entry.with_context(|| format!("walking {}", self.root.display()))?;
            if entry.file_type().is_symlink() {
                tracing::debug!(path = %entry.path().display(), "skipping symlink in template");
                continue;
            }
            if entry.file_type().is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                    out.push(rel.to_path_buf());
                }
            }
        }
        Ok(out)
    }

    /// Reads one template file, `None` if absent or not UTF-8.
    pub fn read(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.root.join(rel)).ok()
    }

    /// Copies the template into `dest`, which must already exist and be empty.
    /// Returns the number of files copied.
    pub fn copy_into(&self, dest: &Path) -> Result<usize> {
        let files = self.files()?;
        let mut dirs: Vec<PathBuf> = files
            .iter()
            .filter_map(|f| f.parent().map(Path::to_path_buf))
            .filter(|d| !d.as_os_str().is_empty())
            .collect();
        dirs.sort();
        dirs.dedup();
        for d in &dirs {
            fs::create_dir_all(dest.join(d))?;
        }
        files
            .par_iter()
            .try_for_each(|rel| fs::copy(self.root.join(rel), dest.join(rel)).map(|_| ()))
            .with_context(|| format!("copying template into {}", dest.display()))?;
        Ok(files.len())
    }
}
