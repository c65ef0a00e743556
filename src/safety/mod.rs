use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathViolation {
    #[error("empty path")]
    Empty,
    #[error("absolute path '{0}'")]
    Absolute(String),
    #[error("parent traversal in '{0}'")]
    ParentTraversal(String),
    #[error("invalid path segment '{0}'")]
    InvalidSegment(String),
    #[error("'{0}' resolves outside the project root")]
    EscapesRoot(String),
}

/// Lexical check: a relative path made only of plain segments.
///
/// Backslashes count as separators so Windows-style model output is judged
/// the same way on every platform.
pub fn clean_relative(candidate: &str) -> Result<PathBuf, PathViolation> {
    let unified = candidate.trim().replace('\\', "/");
    if unified.is_empty() {
        return Err(PathViolation::Empty);
    }
    if unified.starts_with('/') {
        return Err(PathViolation::Absolute(candidate.to_string()));
    }

    let mut clean = PathBuf::new();
    for comp in Path::new(&unified).components() {
        match comp {
            Component::Normal(seg) => {
                let s = seg.to_string_lossy();
                if s.contains(':') || s.contains('\0') {
                    return Err(PathViolation::InvalidSegment(s.into_owned()));
                }
                clean.push(seg);
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(PathViolation::ParentTraversal(candidate.to_string())),
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathViolation::Absolute(candidate.to_string()))
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(PathViolation::Empty);
    }
    Ok(clean)
}

/// Resolves `candidate` under `root` and proves the result stays inside it,
/// including through symlinks that already exist on disk.
pub fn resolve_within_root(root: &Path, candidate: &str) -> Result<PathBuf, PathViolation> {
    let clean = clean_relative(candidate)?;
    let joined = root.join(&clean);

    let escapes = || PathViolation::EscapesRoot(candidate.to_string());
    let abs_root = std::fs::canonicalize(root).map_err(|_| escapes())?;

    if joined.symlink_metadata().map(|m| m.file_type().is_symlink()).unwrap_or(false) {
        return Err(escapes());
    }

    // Deepest ancestor that exists decides where the write really lands.
    let mut probe = joined.as_path();
    while !probe.exists() {
        match probe.parent() {
            Some(p) => probe = p,
            None => return Err(escapes()),
        }
    }
    let abs_probe = std::fs::canonicalize(probe).map_err(|_| escapes())?;
    if !abs_probe.starts_with(&abs_root) {
        return Err(escapes());
    }
    Ok(joined)
}
