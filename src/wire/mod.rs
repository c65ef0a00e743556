use serde::{Deserialize, Serialize};

use crate::errors::{PlanError, SynthesisFailure};

/// ========================================
/// Pipeline data model
/// ========================================

/// Free-text app idea. Non-empty and length bounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Idea(String);

impl Idea {
    /// Trims the input and truncates it to `max_chars` characters.
    /// Returns the idea and whether truncation happened.
    pub fn new(text: &str, max_chars: usize) -> Result<(Self, bool), PlanError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PlanError::EmptyIdea);
        }
        match trimmed.char_indices().nth(max_chars) {
            Some((cut, _)) => Ok((Self(trimmed[..cut].trim_end().to_string()), true)),
            None => Ok((Self(trimmed.to_string()), false)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    Source,
    Resource,
    ManifestFragment,
}

impl FileKind {
    /// Lenient mapping of whatever label the model used.
    pub fn parse_loose(label: &str, path: &str) -> Option<Self> {
        let l = label.trim().to_lowercase();
        match l.as_str() {
            "source" | "kotlin" | "kt" | "code" | "class" | "activity" => Some(FileKind::Source),
            "resource" | "layout" | "xml" | "res" | "values" | "menu" | "drawable" => {
                Some(FileKind::Resource)
            }
            "manifest" | "manifest-fragment" | "manifest_fragment" | "manifestfragment" => {
                Some(FileKind::ManifestFragment)
            }
            _ => {
                let p = path.to_lowercase();
                if p.ends_with("androidmanifest.xml") {
                    Some(FileKind::ManifestFragment)
                } else if p.ends_with(".kt") {
                    Some(FileKind::Source)
                } else if p.ends_with(".xml") {
                    Some(FileKind::Resource)
                } else {
                    None
                }
            }
        }
    }

    pub fn fence_languages(&self) -> &'static [&'static str] {
        match self {
            FileKind::Source => &["kotlin", "kt"],
            FileKind::Resource | FileKind::ManifestFragment => &["xml"],
        }
    }

    pub fn is_xml(&self) -> bool {
        !matches!(self, FileKind::Source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    pub relative_path: String,
    pub kind: FileKind,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub files: Vec<FileSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPlan {
    pub app_name: String,
    pub display_name: String,
    pub package_id: String,
    pub modules: Vec<Module>,
}

impl ProjectPlan {
    pub fn files(&self) -> impl Iterator<Item = (&Module, &FileSpec)> {
        self.modules
            .iter()
            .flat_map(|m| m.files.iter().map(move |f| (m, f)))
    }

    pub fn file_count(&self) -> usize {
        self.modules.iter().map(|m| m.files.len()).sum()
    }

    /// `com.example.app` -> `com/example/app`
    pub fn package_path(&self) -> String {
        self.package_id.replace('.', "/")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedFile {
    pub relative_path: String,
    pub kind: FileKind,
    pub content: String,
    pub status: FileStatus,
    pub failure: Option<SynthesisFailure>,
    pub attempts: usize,
}

impl GeneratedFile {
    pub fn ok(spec: &FileSpec, content: String, attempts: usize) -> Self {
        Self {
            relative_path: spec.relative_path.clone(),
            kind: spec.kind,
            content,
            status: FileStatus::Ok,
            failure: None,
            attempts,
        }
    }

    pub fn rejected(spec: &FileSpec, why: SynthesisFailure, attempts: usize) -> Self {
        Self {
            relative_path: spec.relative_path.clone(),
            kind: spec.kind,
            content: String::new(),
            status: FileStatus::Rejected,
            failure: Some(why),
            attempts,
        }
    }

    pub fn failed(spec: &FileSpec, why: SynthesisFailure, attempts: usize) -> Self {
        Self {
            relative_path: spec.relative_path.clone(),
            kind: spec.kind,
            content: String::new(),
            status: FileStatus::Failed,
            failure: Some(why),
            attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop_sequences: Vec<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.2,
            stop_sequences: vec!["</s>".into()],
        }
    }
}

/// ========================================
/// Plan schema as the model is asked to emit it
/// ========================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPlan {
    #[serde(default, alias = "name", alias = "appName")]
    pub app_name: Option<String>,
    #[serde(default, alias = "package", alias = "packageId")]
    pub package_id: Option<String>,
    #[serde(default, alias = "features")]
    pub modules: Vec<RawModule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawModule {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub files: Vec<RawFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFile {
    #[serde(default, alias = "filename", alias = "file")]
    pub path: String,
    #[serde(default, alias = "type")]
    pub kind: String,
    #[serde(default, alias = "purpose", alias = "spec")]
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idea_rejects_blank_and_truncates() {
        assert_eq!(Idea::new("   \n", 10), Err(PlanError::EmptyIdea));
        let (idea, cut) = Idea::new("  a todo app  ", 100).unwrap();
        assert_eq!(idea.as_str(), "a todo app");
        assert!(!cut);
        let (idea, cut) = Idea::new("ééééé", 3).unwrap();
        assert_eq!(idea.as_str(), "ééé");
        assert!(cut);
    }

    #[test]
    fn kind_labels_are_lenient() {
        assert_eq!(FileKind::parse_loose("Kotlin", "X.kt"), Some(FileKind::Source));
        assert_eq!(FileKind::parse_loose("", "res/layout/a.xml"), Some(FileKind::Resource));
        assert_eq!(
            FileKind::parse_loose("", "app/src/main/AndroidManifest.xml"),
            Some(FileKind::ManifestFragment)
        );
        assert_eq!(FileKind::parse_loose("gradle", "build.gradle.kts"), None);
    }

    #[test]
    fn raw_plan_accepts_aliases() {
        let raw: RawPlan = serde_json::from_str(
            r#"{"name":"Notes","features":[{"name":"core","files":[{"filename":"A.kt","type":"kotlin","purpose":"x"}]}]}"#,
        )
        .unwrap();
        assert_eq!(raw.app_name.as_deref(), Some("Notes"));
        assert_eq!(raw.modules[0].files[0].path, "A.kt");
        assert_eq!(raw.modules[0].files[0].kind, "kotlin");
    }
}
