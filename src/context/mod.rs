use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::assemble::rewrite::Identifiers;
use crate::template::TemplateStore;
use crate::wire::{FileKind, ProjectPlan};

/// A snapshot of a template file we want the model to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBlob {
    pub path: String,
    pub bytes: usize,
    pub truncated: bool,
    pub content: String,
}

/// Read the first `max_bytes` of each given file (relative to `root`) and
/// produce FileBlob entries for the prompt.
pub fn snapshot_files(paths: &[String], root: &Path, max_bytes: usize) -> Vec<FileBlob> {
    let mut out = Vec::new();
    for rel in paths {
        let abs = root.join(rel);
        if !abs.is_file() {
            continue;
        }
        match read_prefix(&abs, max_bytes) {
            Ok((content, bytes, truncated)) => out.push(FileBlob { path: rel.clone(), bytes, truncated, content }),
            Err(_) => {
                // Best-effort: an unreadable context file only makes the prompt thinner
                continue;
            }
        }
    }
    out
}

fn read_prefix(path: &Path, max_bytes: usize) -> anyhow::Result<(String, usize, bool)> {
    let data = fs::read(path)?;
    let bytes = data.len();
    let truncated = bytes > max_bytes;
    let slice = if truncated { &data[..max_bytes] } else { &data[..] };
    let content = String::from_utf8_lossy(slice).into_owned();
    Ok((content, bytes, truncated))
}

/// Template files relevant to `kind`, shown with the plan's identifiers
/// already substituted so the model never sees the template's package.
pub fn template_context(store: &TemplateStore, plan: &ProjectPlan, kind: FileKind, max_bytes: usize) -> Vec<FileBlob> {
    let ids = Identifiers::new(store.descriptor(), plan);
    let paths = store.descriptor().context_for(kind);
    snapshot_files(&paths, store.root(), max_bytes)
        .into_iter()
        .map(|mut blob| {
            blob.path = ids.rewrite_path(&blob.path);
            blob.content = ids.rewrite_text(&blob.content);
            blob
        })
        .collect()
}

pub fn render_blobs(blobs: &[FileBlob]) -> String {
    let mut s = String::new();
    for b in blobs {
        s.push_str(&format!("--- {}{} ---\n", b.path, if b.truncated { " (truncated)" } else { "" }));
        s.push_str(b.content.trim_end());
        s.push('\n');
    }
    s
}
