use fs_err as fs;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use walkdir::WalkDir;

use super::rewrite::{current_values, IdSite, SOURCE_SETS};
use crate::apply::{ApplyKind, ApplySummary};
use crate::synth::extract::{package_for_path, xml_imbalance};
use crate::template::TemplateDescriptor;
use crate::wire::ProjectPlan;

fn declared_package(source: &str) -> Option<String> {
    source
        .lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix("package "))
        .map(|p| p.trim().trim_end_matches(';').to_string())
}

fn check_manifest(root: &Path, template: &TemplateDescriptor, plan: &ProjectPlan, problems: &mut Vec<String>) {
    let path = root.join(&template.manifest);
    let Ok(text) = fs::read_to_string(&path) else {
        problems.push(format!("{} is missing", template.manifest));
        return;
    };
    let off = xml_imbalance(&text);
    if off > 0 {
        problems.push(format!("{} has {off} unbalanced tags", template.manifest));
    }
    for pkg in current_values(IdSite::ManifestPackage, &text) {
        if pkg != plan.package_id {
            problems.push(format!("manifest package is {pkg}, expected {}", plan.package_id));
        }
    }
}

fn resource_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@(string|style|color)/([A-Za-z0-9_.]+)").expect("static regex"))
}

fn resource_def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<(string|style|color)\b[^>]*\sname="([^"]+)""#).expect("static regex"))
}

/// `(type, name)` for every string, style and color under `res/values*`.
fn defined_values(res: &Path) -> HashSet<(String, String)> {
    let mut out = HashSet::new();
    for entry in WalkDir::new(res).max_depth(2).into_iter().filter_map(Result::ok) {
        let in_values = entry
            .path()
            .parent()
            .and_then(|d| d.file_name())
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("values"));
        if !entry.file_type().is_file() || !in_values {
            continue;
        }
        let Ok(text) = fs::read_to_string(entry.path()) else {
            continue;
        };
        for cap in resource_def_re().captures_iter(&text) {
            out.insert((cap[1].to_string(), cap[2].to_string()));
        }
    }
    out
}

fn check_resource_refs(root: &Path, manifest: &str, problems: &mut Vec<String>) {
    let Ok(manifest) = fs::read_to_string(root.join(manifest)) else {
        return;
    };
    let defined = defined_values(&root.join("app/src/main/res"));
    for cap in resource_ref_re().captures_iter(&manifest) {
        let key = (cap[1].to_string(), cap[2].to_string());
        if !defined.contains(&key) {
            problems.push(format!("manifest references @{}/{} which no values file defines", key.0, key.1));
        }
    }
}

fn check_gradle(root: &Path, plan: &ProjectPlan, problems: &mut Vec<String>) {
    let Ok(text) = fs::read_to_string(root.join("app/build.gradle.kts")) else {
        problems.push("app/build.gradle.kts is missing".into());
        return;
    };
    let ids = current_values(IdSite::GradleIds, &text);
    if ids.is_empty() {
        problems.push("app/build.gradle.kts declares no namespace/applicationId".into());
    }
    for id in ids {
        if id != plan.package_id {
            problems.push(format!("gradle identifier is {id}, expected {}", plan.package_id));
        }
    }
}

fn check_package_dirs(root: &Path, template: &TemplateDescriptor, plan: &ProjectPlan, problems: &mut Vec<String>) {
    let new_dir = root.join("app/src/main/java").join(plan.package_path());
    if !new_dir.is_dir() {
        problems.push(format!("package directory {} is missing", plan.package_path()));
    }
    if template.package_id == plan.package_id {
        return;
    }
    for set in SOURCE_SETS {
        let old = root.join("app/src").join(set).join("java").join(template.package_path());
        if old.exists() {
            problems.push(format!("template package directory still present in {set}"));
        }
    }
}

fn check_kotlin_packages(root: &Path, problems: &mut Vec<String>) {
    let java = root.join("app/src/main/java");
    for entry in WalkDir::new(&java).into_iter().filter_map(Result::ok) {
        let p = entry.path();
        if !entry.file_type().is_file() || p.extension().and_then(|e| e.to_str()) != Some("kt") {
            continue;
        }
        let Ok(rel) = p.strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        let expected = package_for_path(&rel);
        let declared = fs::read_to_string(p).ok().as_deref().and_then(declared_package);
        if declared != expected {
            problems.push(format!(
                "{rel} declares package {} but lives in {}",
                declared.as_deref().unwrap_or("(none)"),
                expected.as_deref().unwrap_or("(root)")
            ));
        }
    }
}

fn check_writes(root: &Path, applied: &ApplySummary, problems: &mut Vec<String>) {
    for failed in &applied.write_failures {
        problems.push(format!("write of {failed} failed"));
    }
    for d in applied.details.iter().filter(|d| d.kind != ApplyKind::Skipped) {
        let on_disk = root.join(&d.path).metadata().ok().map(|m| m.len());
        if on_disk != d.bytes_after {
            problems.push(format!(
                "{} should be {} bytes, found {}",
                d.path,
                d.bytes_after.unwrap_or(0),
                on_disk.map(|n| n.to_string()).unwrap_or_else(|| "nothing".into())
            ));
        }
    }
}

/// Structural checks on an assembled instance. Empty means valid.
pub fn validate(root: &Path, template: &TemplateDescriptor, plan: &ProjectPlan, applied: &ApplySummary) -> Vec<String> {
    let mut problems = Vec::new();
    check_manifest(root, template, plan, &mut problems);
    check_resource_refs(root, &template.manifest, &mut problems);
    check_gradle(root, plan, &mut problems);
    check_package_dirs(root, template, plan, &mut problems);
    check_kotlin_packages(root, &mut problems);
    check_writes(root, applied, &mut problems);
    problems
}
