//! App names and package identifiers.

use fs_err as fs;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use uuid::Uuid;

pub const MAX_APP_NAME: usize = 40;
pub const DEFAULT_APP_NAME: &str = "MyApp";
const PACKAGE_PREFIX: &str = "com.example";

const RESERVED: &[&str] = &[
    "abstract", "as", "assert", "boolean", "break", "byte", "case", "catch", "char", "class",
    "const", "continue", "default", "do", "double", "else", "enum", "extends", "false", "final",
    "finally", "float", "for", "fun", "goto", "if", "implements", "import", "in", "instanceof",
    "int", "interface", "is", "long", "native", "new", "null", "object", "package", "private",
    "protected", "public", "return", "short", "static", "strictfp", "super", "switch",
    "synchronized", "this", "throw", "throws", "transient", "true", "try", "typealias", "typeof",
    "val", "var", "void", "volatile", "when", "while",
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "app", "application", "android", "with", "and", "or", "for", "to", "of",
    "my", "that", "which", "where", "simple", "small", "basic", "lets", "let", "users", "user",
    "can", "in", "on", "from", "by", "is", "it", "i", "want", "need", "make", "build", "create",
];

fn package_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)+$").expect("static regex"))
}

fn application_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"applicationId\s*=\s*"([^"]+)""#).expect("static regex"))
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
        None => String::new(),
    }
}

/// Strips the decorations small models put around a one-line answer.
fn first_answer_line(raw: &str) -> &str {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("```"))
        .unwrap_or("");
    let lower = line.to_lowercase();
    for prefix in ["app name:", "name:", "title:"] {
        if lower.starts_with(prefix) {
            return line[prefix.len()..].trim();
        }
    }
    line
}

/// Human label, e.g. `"Shopping List"`. `None` if nothing usable remains.
pub fn display_name(raw: &str) -> Option<String> {
    let ws = words(first_answer_line(raw));
    if ws.is_empty() {
        return None;
    }
    let mut label = ws.iter().map(|w| {
        if w.chars().any(|c| c.is_ascii_lowercase()) && w.chars().any(|c| c.is_ascii_uppercase()) {
            w.clone()
        } else {
            title_case(w)
        }
    })
    .collect::<Vec<_>>()
    .join(" ");
    label.truncate(MAX_APP_NAME);
    Some(label.trim().to_string())
}

/// Filesystem- and identifier-safe name, e.g. `"ShoppingList"`.
pub fn sanitize_app_name(raw: &str) -> Option<String> {
    let label = display_name(raw)?;
    let joined: String = label.split(' ').collect();
    let trimmed = joined.trim_start_matches(|c: char| c.is_ascii_digit());
    let mut name: String = trimmed.chars().take(MAX_APP_NAME).collect();
    if name.is_empty() {
        return None;
    }
    if let Some(first) = name.get(0..1) {
        name.replace_range(0..1, &first.to_ascii_uppercase());
    }
    Some(name)
}

/// Names an app from the idea's first significant words.
pub fn name_from_idea(idea: &str) -> Option<String> {
    let picked: Vec<String> = words(idea)
        .into_iter()
        .filter(|w| !STOP_WORDS.contains(&w.to_lowercase().as_str()))
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .take(3)
        .collect();
    if picked.is_empty() {
        return None;
    }
    sanitize_app_name(&picked.join(" "))
}

pub fn is_valid_package_id(id: &str) -> bool {
    package_regex().is_match(id) && id.split('.').all(|seg| !RESERVED.contains(&seg))
}

/// `com.example.<name>`, or a generated id when the name makes no valid leaf.
pub fn derive_package_id(app_name: &str) -> String {
    let leaf: String = app_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    let candidate = format!("{PACKAGE_PREFIX}.{leaf}");
    if is_valid_package_id(&candidate) {
        candidate
    } else {
        generated_package_id()
    }
}

pub fn generated_package_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{PACKAGE_PREFIX}.app{}", &hex[..8])
}

/// Application ids already used by projects under `output_root`.
pub fn taken_package_ids(output_root: &Path) -> HashSet<String> {
    let mut taken = HashSet::new();
    let Ok(entries) = fs::read_dir(output_root) else {
        return taken;
    };
    for entry in entries.flatten() {
        let gradle = entry.path().join("app").join("build.gradle.kts");
        if let Ok(text) = fs::read_to_string(&gradle) {
            if let Some(cap) = application_id_regex().captures(&text) {
                taken.insert(cap[1].to_string());
            }
        }
    }
    taken
}

/// Appends 2, 3, ... to the last segment until the id is free.
pub fn unique_package_id(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}{n}"))
        .find(|c| !taken.contains(c))
        .unwrap_or_else(generated_package_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_names_are_identifier_safe() {
        assert_eq!(sanitize_app_name("\"Shopping List!\"").as_deref(), Some("ShoppingList"));
        assert_eq!(sanitize_app_name("App name: QuickNotes\nextra").as_deref(), Some("QuickNotes"));
        assert_eq!(sanitize_app_name("```\n2048 game\n```").as_deref(), Some("Game"));
        assert_eq!(sanitize_app_name("!!!"), None);
        let long = "word ".repeat(30);
        assert!(sanitize_app_name(&long).unwrap().len() <= MAX_APP_NAME);
    }

    #[test]
    fn display_name_keeps_spaces() {
        assert_eq!(display_name("shopping list").as_deref(), Some("Shopping List"));
        assert_eq!(display_name("FitTrack pro").as_deref(), Some("FitTrack Pro"));
    }

    #[test]
    fn idea_words_make_a_name() {
        assert_eq!(
            name_from_idea("shopping list with categories and share").as_deref(),
            Some("ShoppingListCategories")
        );
        assert_eq!(name_from_idea("a simple app"), None);
    }

    #[test]
    fn package_rules() {
        assert!(is_valid_package_id("com.example.shoppinglist"));
        assert!(!is_valid_package_id("shoppinglist"));
        assert!(!is_valid_package_id("com.example.ShoppingList"));
        assert!(!is_valid_package_id("com.example.1app"));
        assert!(!is_valid_package_id("com.example.class"));
        assert_eq!(derive_package_id("ShoppingList"), "com.example.shoppinglist");
        let generated = derive_package_id("Class");
        assert!(generated.starts_with("com.example.app"));
        assert!(is_valid_package_id(&generated));
    }

    #[test]
    fn package_ids_are_unique_in_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("ShoppingList/app");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("build.gradle.kts"), "applicationId = \"com.example.shoppinglist\"").unwrap();
        let taken = taken_package_ids(dir.path());
        assert_eq!(unique_package_id("com.example.shoppinglist", &taken), "com.example.shoppinglist2");
        assert_eq!(unique_package_id("com.example.notes", &taken), "com.example.notes");
    }
}
