//! Splices model-written manifest elements into the project manifest.

/// Elements that live directly under `<manifest>`.
const MANIFEST_LEVEL: &[&str] = &["uses-permission", "uses-permission-sdk-23", "uses-feature", "permission", "queries"];
/// Elements that live under `<application>`.
const APPLICATION_LEVEL: &[&str] = &["activity", "activity-alias", "service", "receiver", "provider", "meta-data"];
/// Wrappers the model was told not to emit; their children are used instead.
const MANIFEST_WRAPPERS: &[&str] = &["manifest", "application"];

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub name: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub content: String,
    pub added: Vec<String>,
    pub skipped: Vec<String>,
}

fn tag_name(s: &str) -> String {
    s.chars()
        .take_while(|c| !c.is_whitespace() && *c != '>' && *c != '/')
        .collect()
}

/// Value of attribute `key`. `name` does not match `android:name`.
fn attr(element: &str, key: &str) -> Option<String> {
    let needle = format!("{key}=\"");
    let (at, _) = element
        .match_indices(&needle)
        .find(|(pos, _)| element[..*pos].ends_with(char::is_whitespace))?;
    let start = at + needle.len();
    let end = element[start..].find('"')? + start;
    Some(element[start..end].to_string())
}

/// Offset of the next `<tag` at or after `from` that opens exactly `tag`,
/// so `<activity` does not match `<activity-alias`.
fn find_open(xml: &str, from: usize, tag: &str) -> Option<usize> {
    let open = format!("<{tag}");
    xml[from..]
        .match_indices(&open)
        .map(|(pos, _)| pos + from)
        .find(|&pos| {
            xml[pos + open.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_whitespace() || c == '/' || c == '>')
        })
}

/// End offset (exclusive) of the element starting at `start`, or `None` if it
/// never closes.
fn element_end(xml: &str, start: usize, tag: &str) -> Option<usize> {
    let open_end = xml[start..].find('>')? + start;
    if xml[..open_end].ends_with('/') {
        return Some(open_end + 1);
    }
    let close = format!("</{tag}>");
    let mut depth = 1usize;
    let mut i = open_end + 1;
    while depth > 0 {
        let next_open = find_open(xml, i, tag);
        let next_close = xml[i..].find(&close).map(|c| c + i)?;
        match next_open {
            Some(o) if o < next_close => {
                let inner_end = xml[o..].find('>')? + o;
                if !xml[..inner_end].ends_with('/') {
                    depth += 1;
                }
                i = inner_end + 1;
            }
            _ => {
                depth -= 1;
                i = next_close + close.len();
            }
        }
    }
    Some(i)
}

/// Top-level elements of a manifest fragment, descending through
/// manifest/application wrappers. Comments, declarations and stray text are dropped.
pub fn parse_fragment(xml: &str) -> Result<Vec<Element>, String> {
    parse_elements(xml, MANIFEST_WRAPPERS, "android:name")
}

fn parse_elements(xml: &str, wrappers: &[&str], name_key: &str) -> Result<Vec<Element>, String> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while let Some(rel) = xml[i..].find('<') {
        let start = i + rel;
        let rest = &xml[start..];
        if rest.starts_with("<!--") {
            i = start + rest.find("-->").ok_or("unterminated comment")? + 3;
            continue;
        }
        if rest.starts_with("<?") || rest.starts_with("<!") {
            i = start + rest.find('>').ok_or("unterminated declaration")? + 1;
            continue;
        }
        if rest.starts_with("</") {
            // closing tag of a wrapper we descended into
            i = start + rest.find('>').ok_or("unterminated closing tag")? + 1;
            continue;
        }
        let tag = tag_name(&rest[1..]);
        if tag.is_empty() {
            return Err(format!("malformed tag at offset {start}"));
        }
        if wrappers.contains(&tag.as_str()) {
            i = start + rest.find('>').ok_or("unterminated wrapper tag")? + 1;
            continue;
        }
        let end = element_end(xml, start, &tag).ok_or_else(|| format!("<{tag}> is never closed"))?;
        let text = xml[start..end].to_string();
        let open_tag_end = text.find('>').unwrap_or(text.len());
        out.push(Element { name: attr(&text[..open_tag_end], name_key), tag, text });
        i = end;
    }
    if out.is_empty() {
        return Err("no elements found".into());
    }
    Ok(out)
}

fn short_name(name: &str, package_id: &str) -> String {
    name.strip_prefix(package_id)
        .filter(|rest| rest.starts_with('.'))
        .map(str::to_string)
        .unwrap_or_else(|| name.to_string())
}

/// Whether `doc` has a `<tag>` whose `name_key` attribute is one of `names`.
fn declares(doc: &str, tag: &str, name_key: &str, names: &[&str]) -> bool {
    let mut from = 0usize;
    while let Some(pos) = find_open(doc, from, tag) {
        let end = doc[pos..].find('>').map(|e| e + pos).unwrap_or(doc.len());
        if attr(&doc[pos..end], name_key).is_some_and(|existing| names.contains(&existing.as_str())) {
            return true;
        }
        from = pos + 1;
    }
    false
}

fn already_declared(manifest: &str, el: &Element, package_id: &str) -> bool {
    let Some(name) = &el.name else {
        return false;
    };
    let short = short_name(name, package_id);
    let full = if short.starts_with('.') { format!("{package_id}{short}") } else { short.clone() };
    declares(manifest, &el.tag, "android:name", &[short.as_str(), full.as_str()])
}

fn indent(text: &str, pad: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    // Re-indent relative to the element's first line.
    let base = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0)
        .saturating_sub(4);
    lines
        .iter()
        .enumerate()
        .map(|(n, l)| {
            if n == 0 {
                format!("{pad}{}", l.trim_start())
            } else if l.trim().is_empty() {
                String::new()
            } else {
                let cut = (l.len() - l.trim_start().len()).min(base);
                format!("{pad}{}", &l[cut..])
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Merges `fragment` into `manifest`. Elements already declared (by tag and
/// `android:name`) and elements of unknown kinds are skipped.
pub fn merge_manifest(manifest: &str, fragment: &str, package_id: &str) -> Result<MergeOutcome, String> {
    let elements = parse_fragment(fragment)?;
    let mut top = Vec::new();
    let mut app = Vec::new();
    let mut skipped = Vec::new();

    for el in elements {
        let label = match &el.name {
            Some(n) => format!("<{}> {}", el.tag, n),
            None => format!("<{}>", el.tag),
        };
        if already_declared(manifest, &el, package_id) {
            skipped.push(format!("{label} (already declared)"));
        } else if MANIFEST_LEVEL.contains(&el.tag.as_str()) {
            top.push((label, el));
        } else if APPLICATION_LEVEL.contains(&el.tag.as_str()) {
            app.push((label, el));
        } else {
            skipped.push(format!("{label} (not a manifest element)"));
        }
    }

    let mut content = manifest.to_string();
    let mut added = Vec::new();

    if !app.is_empty() {
        let at = content
            .rfind("</application>")
            .ok_or("manifest has no <application> element")?;
        let block: String = app
            .iter()
            .map(|(_, el)| format!("{}\n", indent(&el.text, "        ")))
            .collect();
        // keep the closing tag on its own indented line
        let line_start = content[..at].rfind('\n').map(|n| n + 1).unwrap_or(at);
        let insert_at = if content[line_start..at].trim().is_empty() { line_start } else { at };
        content.insert_str(insert_at, &block);
        added.extend(app.into_iter().map(|(l, _)| l));
    }

    if !top.is_empty() {
        let anchor = content
            .find("<application")
            .or_else(|| content.rfind("</manifest>"))
            .ok_or("manifest has no <manifest> element")?;
        let line_start = content[..anchor].rfind('\n').map(|n| n + 1).unwrap_or(anchor);
        let insert_at = if content[line_start..anchor].trim().is_empty() { line_start } else { anchor };
        let block: String = top
            .iter()
            .map(|(_, el)| format!("{}\n", indent(&el.text, "    ")))
            .collect::<String>()
            + "\n";
        content.insert_str(insert_at, &block);
        added.extend(top.into_iter().map(|(l, _)| l));
    }

    Ok(MergeOutcome { content, added, skipped })
}

/// Adds the `<resources>` entries of `generated` that `existing` does not
/// define yet. Entries already defined keep their current value, so names the
/// project already references (such as `app_name`) always resolve.
pub fn merge_resources(existing: &str, generated: &str) -> Result<MergeOutcome, String> {
    let elements = parse_elements(generated, &["resources"], "name")?;
    let mut fresh = Vec::new();
    let mut skipped = Vec::new();

    for el in elements {
        match &el.name {
            None => skipped.push(format!("<{}> (no name)", el.tag)),
            Some(name) if declares(existing, &el.tag, "name", &[name.as_str()]) => {
                skipped.push(format!("<{}> {name} (already defined)", el.tag))
            }
            Some(name) => fresh.push((format!("<{}> {name}", el.tag), el)),
        }
    }

    let mut content = existing.to_string();
    if !fresh.is_empty() {
        let at = content.rfind("</resources>").ok_or("file has no <resources> element")?;
        let line_start = content[..at].rfind('\n').map(|n| n + 1).unwrap_or(at);
        let insert_at = if content[line_start..at].trim().is_empty() { line_start } else { at };
        let block: String = fresh
            .iter()
            .map(|(_, el)| format!("{}\n", indent(&el.text, "    ")))
            .collect();
        content.insert_str(insert_at, &block);
    }

    Ok(MergeOutcome { content, added: fresh.into_iter().map(|(l, _)| l).collect(), skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android"
    package="com.example.notes">

    <application
        android:label="@string/app_name">
        <activity
            android:name=".MainActivity"
            android:exported="true">
        </activity>
    </application>

</manifest>
"#;

    #[test]
    fn parses_through_wrappers_and_comments() {
        let els = parse_fragment(
            "<!-- extra -->\n<manifest><application>\n<activity android:name=\".ShareActivity\">\n<intent-filter><action android:name=\"x\"/></intent-filter>\n</activity>\n</application></manifest>",
        )
        .unwrap();
        assert_eq!(els.len(), 1);
        assert_eq!(els[0].tag, "activity");
        assert_eq!(els[0].name.as_deref(), Some(".ShareActivity"));
        assert!(els[0].text.ends_with("</activity>"));
    }

    #[test]
    fn unclosed_fragment_is_an_error() {
        assert!(parse_fragment("<activity android:name=\".A\">").is_err());
        assert!(parse_fragment("just words").is_err());
    }

    #[test]
    fn merges_permissions_and_activities() {
        let fragment = r#"<uses-permission android:name="android.permission.INTERNET" />
<activity android:name=".ShareActivity" android:exported="false" />
<activity android:name="com.example.notes.MainActivity" />
<foo />"#;
        let out = merge_manifest(MANIFEST, fragment, "com.example.notes").unwrap();
        assert_eq!(
            out.added,
            vec!["<activity> .ShareActivity".to_string(), "<uses-permission> android.permission.INTERNET".to_string()]
        );
        assert_eq!(out.skipped.len(), 2);
        let perm = out.content.find("android.permission.INTERNET").unwrap();
        let app = out.content.find("<application").unwrap();
        assert!(perm < app);
        let share = out.content.find(".ShareActivity").unwrap();
        let app_close = out.content.find("</application>").unwrap();
        assert!(share > app && share < app_close);
        assert!(out.content.contains("        <activity android:name=\".ShareActivity\""));
    }

    #[test]
    fn hyphenated_tags_are_distinct_elements() {
        let manifest = MANIFEST.replace(
            "    </application>",
            "        <activity-alias android:name=\".Launcher\" android:targetActivity=\".MainActivity\" />\n    </application>",
        );
        let out = merge_manifest(&manifest, "<activity android:name=\".Launcher\" />", "com.example.notes").unwrap();
        assert_eq!(out.added, vec!["<activity> .Launcher".to_string()]);

        let with_sdk23 = MANIFEST.replace(
            "    <application",
            "    <uses-permission-sdk-23 android:name=\"android.permission.CAMERA\" />\n\n    <application",
        );
        let out = merge_manifest(&with_sdk23, "<uses-permission android:name=\"android.permission.CAMERA\" />", "com.example.notes")
            .unwrap();
        assert_eq!(out.added.len(), 1);
        assert!(out.skipped.is_empty());
    }

    #[test]
    fn resources_merge_without_losing_existing_names() {
        let strings = "<resources>\n    <string name=\"app_name\">Shopping List</string>\n</resources>\n";
        let generated = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<resources>\n    <string name=\"app_name\">MyApp</string>\n    <string name=\"share\">Share</string>\n    <string-array name=\"units\">\n        <item>kg</item>\n    </string-array>\n</resources>";
        let out = merge_resources(strings, generated).unwrap();
        assert_eq!(out.added, vec!["<string> share".to_string(), "<string-array> units".to_string()]);
        assert_eq!(out.skipped, vec!["<string> app_name (already defined)".to_string()]);
        assert!(out.content.contains(">Shopping List<"));
        assert!(!out.content.contains("MyApp"));
        assert!(out.content.find("share").unwrap() < out.content.find("</resources>").unwrap());
        assert!(merge_resources("<resources/>", "<resources><string name=\"a\">A</string></resources>").is_err());
    }

    #[test]
    fn nested_same_tag_elements_close_correctly() {
        let xml = "<provider android:name=\"a\"><provider android:name=\"b\"></provider></provider><service android:name=\"s\"/>";
        let els = parse_fragment(xml).unwrap();
        assert_eq!(els.len(), 2);
        assert_eq!(els[1].tag, "service");
    }
}
