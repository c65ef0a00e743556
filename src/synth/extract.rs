//! Pulling one source file out of a free-form completion.
//!
//! Order of preference: a JSON envelope `{"filename": .., "content": ..}`,
//! then fenced code blocks, then the bare text with chatter trimmed off.
//! Whatever comes out is checked for lexical balance before it is accepted.

use serde::Deserialize;

use crate::errors::SynthesisFailure;
use crate::plan::extract_first_json_object;
use crate::wire::FileKind;

const MODEL_DEBRIS: &[&str] = &["</s>", "<s>", "[/INST]", "[INST]", "<|endoftext|>", "<|im_end|>"];
const KOTLIN_STARTS: &[&str] = &[
    "package ", "import ", "@", "class ", "data class ", "object ", "interface ", "fun ", "abstract ",
    "open class ", "sealed ", "enum class ", "private ", "internal ", "const val ", "val ", "/**", "//",
];

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    #[allow(dead_code)]
    filename: Option<String>,
    #[serde(default, alias = "code")]
    content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fence {
    pub lang: String,
    pub body: String,
    pub terminated: bool,
}

/// Every ``` fence in `text`. An unterminated last fence runs to the end.
pub fn find_fences(text: &str) -> Vec<Fence> {
    let mut out = Vec::new();
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        let Some(info) = line.trim_start().strip_prefix("```") else {
            continue;
        };
        let lang = info.trim().to_ascii_lowercase();
        let mut body = Vec::new();
        let mut terminated = false;
        for inner in lines.by_ref() {
            if inner.trim_start().starts_with("```") {
                terminated = true;
                break;
            }
            body.push(inner);
        }
        out.push(Fence { lang, body: body.join("\n"), terminated });
    }
    out
}

/// A `json` fence is never a file body; envelopes inside one are unwrapped earlier.
fn pick_fence(fences: Vec<Fence>, kind: FileKind) -> Option<Fence> {
    let langs = kind.fence_languages();
    let (matching, other): (Vec<Fence>, Vec<Fence>) = fences
        .into_iter()
        .filter(|f| !f.body.trim().is_empty() && f.lang != "json")
        .partition(|f| langs.contains(&f.lang.as_str()));
    let longest = |v: Vec<Fence>| v.into_iter().max_by_key(|f| f.body.len());
    longest(matching).or_else(|| longest(other))
}

/// The first JSON object anywhere in `text`, if it is a file envelope.
fn envelope_content(text: &str) -> Option<String> {
    let json = extract_first_json_object(text)?;
    let env: Envelope = serde_json::from_str(&json).ok()?;
    if env.content.trim().is_empty() {
        None
    } else {
        Some(env.content)
    }
}

/// Drops introductory and closing prose around unfenced code.
pub fn strip_prose(text: &str, kind: FileKind) -> String {
    if kind.is_xml() {
        let (Some(start), Some(end)) = (text.find('<'), text.rfind('>')) else {
            return String::new();
        };
        if end < start {
            return String::new();
        }
        return text[start..=end].to_string();
    }
    let lines: Vec<&str> = text.lines().collect();
    let Some(first) = lines
        .iter()
        .position(|l| KOTLIN_STARTS.iter().any(|s| l.trim_start().starts_with(s)))
    else {
        return String::new();
    };
    let last = lines
        .iter()
        .rposition(|l| l.trim_end().ends_with('}'))
        .filter(|&l| l >= first)
        .unwrap_or(lines.len() - 1);
    lines[first..=last].join("\n")
}

/// Net `{}` and `()` counts, ignoring strings, chars and comments.
/// `Err` when the text ends inside a block comment or raw string.
pub fn kotlin_balance(src: &str) -> Result<(i64, i64), String> {
    let b = src.as_bytes();
    let (mut braces, mut parens) = (0i64, 0i64);
    let mut i = 0usize;
    while i < b.len() {
        match b[i] {
            b'/' if b.get(i + 1) == Some(&b'/') => {
                while i < b.len() && b[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if b.get(i + 1) == Some(&b'*') => {
                let mut depth = 1;
                i += 2;
                while depth > 0 {
                    if i + 1 >= b.len() {
                        return Err("unterminated block comment".into());
                    }
                    if b[i] == b'/' && b[i + 1] == b'*' {
                        depth += 1;
                        i += 2;
                    } else if b[i] == b'*' && b[i + 1] == b'/' {
                        depth -= 1;
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
                continue;
            }
            b'"' if b[i..].starts_with(b"\"\"\"") => {
                let Some(end) = src[i + 3..].find("\"\"\"") else {
                    return Err("unterminated raw string".into());
                };
                i += 3 + end + 3;
                continue;
            }
            b'"' => {
                i += 1;
                while i < b.len() && b[i] != b'"' && b[i] != b'\n' {
                    if b[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'\'' => {
                // char literal: 'a', '\n', '\u0041'
                if b.get(i + 1) == Some(&b'\\') {
                    if let Some(off) = src.get(i + 3..).and_then(|r| r.find('\'')) {
                        i += 3 + off;
                    }
                } else if let Some(c) = src.get(i + 1..).and_then(|r| r.chars().next()) {
                    if b.get(i + 1 + c.len_utf8()) == Some(&b'\'') {
                        i += 1 + c.len_utf8();
                    }
                }
            }
            b'{' => braces += 1,
            b'}' => braces -= 1,
            b'(' => parens += 1,
            b')' => parens -= 1,
            _ => {}
        }
        i += 1;
    }
    Ok((braces, parens))
}

/// Count of unmatched or mismatched tags. Declarations, comments, CDATA and
/// self-closing tags are neutral.
pub fn xml_imbalance(src: &str) -> usize {
    let mut stack: Vec<String> = Vec::new();
    let mut problems = 0usize;
    let mut i = 0usize;
    while let Some(rel) = src[i..].find('<') {
        let start = i + rel;
        let rest = &src[start..];
        let skip_to = |pat: &str| rest.find(pat).map(|e| start + e + pat.len());
        let next = if rest.starts_with("<!--") {
            skip_to("-->")
        } else if rest.starts_with("<![CDATA[") {
            skip_to("]]>")
        } else if rest.starts_with("<?") {
            skip_to("?>")
        } else if rest.starts_with("<!") {
            skip_to(">")
        } else {
            // find the tag end outside attribute quotes
            let mut quote: Option<u8> = None;
            let end = rest.bytes().enumerate().skip(1).find_map(|(k, c)| match (quote, c) {
                (None, b'"' | b'\'') => {
                    quote = Some(c);
                    None
                }
                (Some(q), c) if c == q => {
                    quote = None;
                    None
                }
                (None, b'>') => Some(k),
                _ => None,
            });
            match end {
                None => None,
                Some(k) => {
                    let tag = &rest[1..k];
                    if let Some(name) = tag.strip_prefix('/') {
                        let name = name.trim();
                        match stack.iter().rposition(|open| open == name) {
                            Some(pos) => {
                                problems += stack.len() - pos - 1;
                                stack.truncate(pos);
                            }
                            None => problems += 1,
                        }
                    } else if !tag.trim_end().ends_with('/') {
                        let name: String =
                            tag.chars().take_while(|c| !c.is_whitespace() && *c != '/').collect();
                        stack.push(name);
                    }
                    Some(start + k + 1)
                }
            }
        };
        match next {
            Some(n) => i = n,
            None => return problems + stack.len() + 1,
        }
    }
    problems + stack.len()
}

/// Rejects content whose delimiters are off by more than `tolerance`.
pub fn check_balance(content: &str, kind: FileKind, tolerance: usize) -> Result<(), SynthesisFailure> {
    let tol = tolerance as i64;
    if kind.is_xml() {
        let off = xml_imbalance(content);
        if off > tolerance {
            return Err(SynthesisFailure::Truncated(format!("{off} unbalanced XML tags")));
        }
        return Ok(());
    }
    let (braces, parens) = kotlin_balance(content).map_err(SynthesisFailure::Truncated)?;
    if braces.abs() > tol || parens.abs() > tol {
        return Err(SynthesisFailure::Truncated(format!("braces off by {braces}, parentheses off by {parens}")));
    }
    Ok(())
}

fn scrub(text: &str) -> String {
    let mut s = text.to_string();
    for d in MODEL_DEBRIS {
        s = s.replace(d, "");
    }
    s
}

/// Extracts one file of `kind` from a raw completion.
pub fn extract(raw: &str, kind: FileKind, tolerance: usize) -> Result<String, SynthesisFailure> {
    let text = scrub(raw);
    if text.trim().is_empty() {
        return Err(SynthesisFailure::Empty);
    }

    let fences = find_fences(&text);
    let envelope = envelope_content(&text).or_else(|| fences.iter().find_map(|f| envelope_content(&f.body)));

    let content = if let Some(c) = envelope {
        c
    } else if let Some(fence) = pick_fence(fences, kind) {
        if !fence.terminated {
            check_balance(&fence.body, kind, tolerance)
                .map_err(|_| SynthesisFailure::Truncated("unterminated code fence".into()))?;
        }
        fence.body
    } else {
        strip_prose(&text, kind)
    };

    let content = content.trim().to_string();
    if content.is_empty() {
        return Err(SynthesisFailure::Empty);
    }
    check_balance(&content, kind, tolerance)?;
    Ok(content + "\n")
}

/// `app/src/main/java/com/example/x/ui/A.kt` -> `com.example.x.ui`
pub fn package_for_path(relative_path: &str) -> Option<String> {
    let rest = relative_path.strip_prefix("app/src/main/java/")?;
    let (dir, _) = rest.rsplit_once('/')?;
    Some(dir.replace('/', "."))
}

/// Forces the `package` line to `expected`, adding one if missing.
pub fn enforce_package(content: &str, expected: &str) -> String {
    let wanted = format!("package {expected}");
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    match lines.iter().position(|l| l.trim_start().starts_with("package ")) {
        Some(idx) => lines[idx] = wanted,
        None => {
            lines.insert(0, String::new());
            lines.insert(0, wanted);
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Files in sub-packages need the app's `R` imported explicitly.
pub fn ensure_r_import(content: &str, own_package: &str, root_package: &str) -> String {
    let import = format!("import {root_package}.R");
    if own_package == root_package || !content.contains("R.") || content.contains(&import) {
        return content.to_string();
    }
    let mut lines: Vec<&str> = content.lines().collect();
    let at = lines
        .iter()
        .position(|l| l.trim_start().starts_with("package "))
        .map(|p| p + 1)
        .unwrap_or(0);
    let import_line = import.as_str();
    if at > 0 && lines.get(at).is_some_and(|l| l.trim().is_empty()) {
        lines.insert(at + 1, import_line);
    } else {
        lines.insert(at, import_line);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const KT: &str = "package com.example.notes\n\nclass A {\n    fun f() = \"}\" + '{'\n}";

    #[test]
    fn balance_ignores_literals_and_comments() {
        assert_eq!(kotlin_balance(KT).unwrap(), (0, 0));
        assert_eq!(kotlin_balance("fun a() { /* { nested /* } */ */ }").unwrap(), (0, 0));
        assert_eq!(kotlin_balance("val s = \"\"\"{ raw\"\"\"\nfun b() {").unwrap(), (1, 0));
        assert_eq!(kotlin_balance("val c = '\\''\n// }}}\nfun x() {}").unwrap(), (0, 0));
        assert!(kotlin_balance("fun a() { /* open").is_err());
    }

    #[test]
    fn xml_balance_counts_real_tags() {
        let ok = "<?xml version=\"1.0\"?>\n<!-- <x> -->\n<LinearLayout a=\"1 > 0\">\n<TextView/>\n<Button></Button>\n</LinearLayout>";
        assert_eq!(xml_imbalance(ok), 0);
        assert_eq!(xml_imbalance("<a><b></a>"), 1);
        assert_eq!(xml_imbalance("<a><b><c>"), 3);
        assert_eq!(xml_imbalance("<a attr=\"x"), 1);
    }

    #[test]
    fn prefers_matching_fence() {
        let raw = "Here:\n```xml\n<a/>\n```\nand the code\n```kotlin\nclass Big {\n  fun x() {}\n}\n```\nDone.";
        assert_eq!(extract(raw, FileKind::Source, 1).unwrap(), "class Big {\n  fun x() {}\n}\n");
        assert_eq!(extract(raw, FileKind::Resource, 1).unwrap(), "<a/>\n");
    }

    #[test]
    fn envelope_and_bare_text() {
        let env = r#"{"filename": "A.kt", "content": "class A {\n}"}"#;
        assert_eq!(extract(env, FileKind::Source, 0).unwrap(), "class A {\n}\n");
        let bare = "Sure, here is the file.\npackage x.y\n\nclass A {\n}\nHope this helps!</s>";
        assert_eq!(extract(bare, FileKind::Source, 0).unwrap(), "package x.y\n\nclass A {\n}\n");
        let xml = "The layout:\n<FrameLayout>\n</FrameLayout>\nThat is all.";
        assert_eq!(extract(xml, FileKind::Resource, 0).unwrap(), "<FrameLayout>\n</FrameLayout>\n");
    }

    #[test]
    fn envelopes_are_unwrapped_inside_fences_and_after_prose() {
        let fenced = "```json\n{\"filename\":\"ShareHelper.kt\",\"content\":\"package com.example.x\\n\\nobject ShareHelper {\\n}\"}\n```";
        assert_eq!(
            extract(fenced, FileKind::Source, 1).unwrap(),
            "package com.example.x\n\nobject ShareHelper {\n}\n"
        );
        let chatty = "Here is the file you asked for:\n{\"filename\": \"row.xml\", \"content\": \"<LinearLayout>\\n</LinearLayout>\"}\nLet me know!";
        assert_eq!(extract(chatty, FileKind::Resource, 1).unwrap(), "<LinearLayout>\n</LinearLayout>\n");
        // a json fence without an envelope is not taken as the file body
        let stray = "```json\n{\"name\": \"x\"}\n```\nclass A {\n}";
        assert_eq!(extract(stray, FileKind::Source, 0).unwrap(), "class A {\n}\n");
    }

    #[test]
    fn rejects_empty_and_truncated() {
        assert_eq!(extract("   </s>", FileKind::Source, 1), Err(SynthesisFailure::Empty));
        assert_eq!(extract("I cannot help with that.", FileKind::Source, 1), Err(SynthesisFailure::Empty));
        assert!(matches!(
            extract("```kotlin\nclass A {\n  fun b() {\n    if (x) {\n", FileKind::Source, 1),
            Err(SynthesisFailure::Truncated(_))
        ));
        // an unterminated fence is fine when its body is whole
        assert_eq!(extract("```kotlin\nclass A {}\n", FileKind::Source, 0).unwrap(), "class A {}\n");
        assert!(matches!(
            extract("<LinearLayout><TextView><Button>", FileKind::Resource, 1),
            Err(SynthesisFailure::Truncated(_))
        ));
    }

    #[test]
    fn package_lines() {
        assert_eq!(
            package_for_path("app/src/main/java/com/example/x/ui/A.kt").as_deref(),
            Some("com.example.x.ui")
        );
        assert_eq!(enforce_package("package wrong.pkg;\n\nclass A", "com.example.x"), "package com.example.x\n\nclass A\n");
        assert_eq!(enforce_package("class A", "com.example.x"), "package com.example.x\n\nclass A\n");
        let fixed = ensure_r_import("package com.example.x.ui\n\nclass A { val id = R.id.list }", "com.example.x.ui", "com.example.x");
        assert_eq!(fixed, "package com.example.x.ui\n\nimport com.example.x.R\nclass A { val id = R.id.list }\n");
    }
}
