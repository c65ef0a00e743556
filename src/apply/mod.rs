use fs_err as fs;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::errors::SynthesisFailure;
use crate::merge::{merge_manifest, merge_resources};
use crate::safety::resolve_within_root;
use crate::wire::{FileKind, FileStatus, GeneratedFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyKind {
    Created,
    Updated,
    Merged,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct FileResult {
    pub kind: ApplyKind,
    pub path: String,
    pub bytes_before: Option<u64>,
    pub bytes_after: Option<u64>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub merged: usize,
    pub skipped: usize,
    pub bytes_written: u64,
    pub details: Vec<FileResult>,
    /// Writes that were attempted and did not land.
    pub write_failures: Vec<String>,
}

impl ApplySummary {
    fn skip(&mut self, path: &str, before: Option<u64>, note: String) {
        self.skipped += 1;
        self.details.push(FileResult {
            kind: ApplyKind::Skipped,
            path: path.to_string(),
            bytes_before: before,
            bytes_after: before,
            note: Some(note),
        });
    }
}

/// Temp file in the target directory, then rename over the target: the file
/// is either the old one or the complete new one.
pub fn write_atomic(abs: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = abs.parent().unwrap_or_else(|| Path::new("."));
    let tmp = NamedTempFile::new_in(parent)?;
    fs::write(tmp.path(), data)?;
    tmp.persist(abs).map_err(|e| e.error)?;
    Ok(())
}

fn merge_into_manifest(abs: &Path, fragment: &str, package_id: &str) -> Result<(String, Vec<String>), String> {
    let existing = fs::read_to_string(abs).map_err(|e| e.to_string())?;
    let outcome = merge_manifest(&existing, fragment, package_id)?;
    if outcome.added.is_empty() {
        return Err(format!("nothing new to merge ({})", outcome.skipped.join(", ")));
    }
    Ok((outcome.content, outcome.added))
}

/// `res/values*/` files hold named entries the template already references.
fn is_values_file(relative_path: &str) -> bool {
    let mut parts = relative_path.rsplit('/');
    parts.next();
    matches!((parts.next(), parts.next()), (Some(dir), Some("res")) if dir.starts_with("values"))
}

fn merge_into_values(abs: &Path, generated: &str) -> Result<(String, Vec<String>), String> {
    let existing = fs::read_to_string(abs).map_err(|e| e.to_string())?;
    let outcome = merge_resources(&existing, generated)?;
    if outcome.added.is_empty() {
        return Err(format!("nothing new to merge ({})", outcome.skipped.join(", ")));
    }
    Ok((outcome.content, outcome.added))
}

/// Writes every `ok` file under `root`. Everything else, and anything whose
/// path resolves outside `root`, is recorded as skipped.
pub fn apply_files(root: &Path, files: &[GeneratedFile], package_id: &str) -> ApplySummary {
    let mut sum = ApplySummary::default();

    for f in files {
        if f.status != FileStatus::Ok {
            let why = f
                .failure
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| format!("{:?}", f.status));
            sum.skip(&f.relative_path, None, why);
            continue;
        }

        let abs = match resolve_within_root(root, &f.relative_path) {
            Ok(p) => p,
            Err(violation) => {
                tracing::warn!(path = %f.relative_path, %violation, "refusing to write outside the project");
                sum.skip(&f.relative_path, None, format!("{}: {violation}", SynthesisFailure::PathEscape));
                continue;
            }
        };
        let before = abs.metadata().ok().map(|m| m.len());

        let (data, kind, note) = if f.kind == FileKind::ManifestFragment {
            match merge_into_manifest(&abs, &f.content, package_id) {
                Ok((merged, added)) => (merged, ApplyKind::Merged, Some(format!("merged {}", added.join(", ")))),
                Err(why) => {
                    sum.skip(&f.relative_path, before, format!("manifest fragment not merged: {why}"));
                    continue;
                }
            }
        } else if f.kind == FileKind::Resource && before.is_some() && is_values_file(&f.relative_path) {
            match merge_into_values(&abs, &f.content) {
                Ok((merged, added)) => (merged, ApplyKind::Merged, Some(format!("merged {}", added.join(", ")))),
                Err(why) => {
                    sum.skip(&f.relative_path, before, format!("resource values not merged: {why}"));
                    continue;
                }
            }
        } else if before.is_some() {
            (f.content.clone(), ApplyKind::Updated, None)
        } else {
            (f.content.clone(), ApplyKind::Created, None)
        };

        let written = match abs.parent() {
            Some(parent) => fs::create_dir_all(parent).and_then(|_| write_atomic(&abs, data.as_bytes())),
            None => write_atomic(&abs, data.as_bytes()),
        };
        if let Err(e) = written {
            tracing::error!(path = %f.relative_path, error = %e, "write failed");
            sum.write_failures.push(f.relative_path.clone());
            sum.skip(&f.relative_path, before, SynthesisFailure::Write(e.to_string()).to_string());
            continue;
        }

        let after = data.len() as u64;
        match kind {
            ApplyKind::Created => sum.created += 1,
            ApplyKind::Updated => sum.updated += 1,
            ApplyKind::Merged => sum.merged += 1,
            ApplyKind::Skipped => {}
        }
        sum.bytes_written += after;
        sum.details.push(FileResult {
            kind,
            path: f.relative_path.clone(),
            bytes_before: before,
            bytes_after: Some(after),
            note,
        });
    }
    sum
}
