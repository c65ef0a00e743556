mod common;

use std::collections::BTreeSet;
use std::path::PathBuf;

use android_agent::assemble::{AssemblyStage, Assembler};
use android_agent::errors::{AssemblyError, SynthesisFailure};
use android_agent::wire::{FileKind, FileSpec, GeneratedFile, Module, ProjectPlan};
use common::{snapshot, template, template_dir};
use pretty_assertions::assert_eq;

fn spec(path: &str, kind: FileKind) -> FileSpec {
    FileSpec { relative_path: path.into(), kind, description: String::new() }
}

fn plan(files: Vec<FileSpec>) -> ProjectPlan {
    ProjectPlan {
        app_name: "ShoppingList".into(),
        display_name: "Shopping List".into(),
        package_id: "com.example.shoppinglist".into(),
        modules: vec![Module { name: "list".into(), files }],
    }
}

fn ok(path: &str, kind: FileKind, content: &str) -> GeneratedFile {
    GeneratedFile::ok(&spec(path, kind), content.to_string(), 1)
}

const HELPER: &str = "app/src/main/java/com/example/shoppinglist/ListHelper.kt";
const HELPER_SRC: &str = "package com.example.shoppinglist\n\nobject ListHelper {\n    fun sorted(items: List<String>) = items.sorted()\n}\n";

#[test]
fn escaping_paths_are_skipped_and_nothing_lands_outside() {
    let out = tempfile::tempdir().unwrap();
    let root = out.path().join("projects");
    let store = template();
    let plan = plan(vec![spec(HELPER, FileKind::Source)]);
    let files = vec![
        ok(HELPER, FileKind::Source, HELPER_SRC),
        ok("../escape.kt", FileKind::Source, "package evil\n"),
        ok("app/../../escape2.kt", FileKind::Source, "package evil\n"),
    ];

    let inst = Assembler::new(&store, &root).assemble(&plan, &files).unwrap();

    assert_eq!(inst.stage, AssemblyStage::Complete);
    assert_eq!(inst.written.len(), 1);
    assert_eq!(inst.skipped.len(), 2);
    assert!(inst.skipped.iter().all(|s| s.reason.starts_with(&SynthesisFailure::PathEscape.to_string())));
    assert!(!root.join("escape.kt").exists());
    assert!(!out.path().join("escape2.kt").exists());
    let top: Vec<_> = std::fs::read_dir(&root).unwrap().map(|e| e.unwrap().file_name()).collect();
    assert_eq!(top, vec![std::ffi::OsString::from("ShoppingList")]);
}

#[test]
fn template_is_never_modified() {
    let before = snapshot(&template_dir());
    let out = tempfile::tempdir().unwrap();
    let store = template();
    let plan = plan(vec![spec(HELPER, FileKind::Source)]);

    Assembler::new(&store, out.path())
        .assemble(&plan, &[ok(HELPER, FileKind::Source, HELPER_SRC)])
        .unwrap();

    assert_eq!(snapshot(&template_dir()), before);
}

#[test]
fn identifiers_are_rewritten_everywhere() {
    let out = tempfile::tempdir().unwrap();
    let store = template();
    let plan = plan(vec![spec(HELPER, FileKind::Source)]);

    let inst = Assembler::new(&store, out.path())
        .assemble(&plan, &[ok(HELPER, FileKind::Source, HELPER_SRC)])
        .unwrap();
    let root = &inst.root;

    let old = &store.descriptor().package_id;
    for (rel, bytes) in snapshot(root) {
        let text = String::from_utf8_lossy(&bytes);
        assert!(!text.contains(old.as_str()), "{} still mentions {old}", rel.display());
    }
    for set in ["main", "test", "androidTest"] {
        assert!(root.join(format!("app/src/{set}/java/com/example/shoppinglist")).is_dir());
        assert!(!root.join(format!("app/src/{set}/java/com/example/empty_activity_android_studio_base_template")).exists());
    }
    let manifest = std::fs::read_to_string(root.join("app/src/main/AndroidManifest.xml")).unwrap();
    assert!(manifest.contains("package=\"com.example.shoppinglist\""));
    let gradle = std::fs::read_to_string(root.join("app/build.gradle.kts")).unwrap();
    assert!(gradle.contains("applicationId = \"com.example.shoppinglist\""));
    assert!(gradle.contains("namespace = \"com.example.shoppinglist\""));
    let strings = std::fs::read_to_string(root.join("app/src/main/res/values/strings.xml")).unwrap();
    assert!(strings.contains(">Shopping List<"));
    assert!(!root.join("template.toml").exists());
}

#[test]
fn the_same_plan_twice_gets_two_roots_with_the_same_files() {
    let out = tempfile::tempdir().unwrap();
    let store = template();
    let plan = plan(vec![spec(HELPER, FileKind::Source)]);
    let files = vec![ok(HELPER, FileKind::Source, HELPER_SRC)];

    let first = Assembler::new(&store, out.path()).assemble(&plan, &files).unwrap();
    let second = Assembler::new(&store, out.path()).assemble(&plan, &files).unwrap();

    assert_eq!(first.root, out.path().join("ShoppingList"));
    assert_eq!(second.root, out.path().join("ShoppingList-2"));
    let a: BTreeSet<PathBuf> = snapshot(&first.root).into_keys().collect();
    let b: BTreeSet<PathBuf> = snapshot(&second.root).into_keys().collect();
    assert_eq!(a, b);
    assert!(a.contains(&PathBuf::from(HELPER)));
}

#[test]
fn manifest_fragments_merge_and_duplicates_skip() {
    let out = tempfile::tempdir().unwrap();
    let store = template();
    let manifest = "app/src/main/AndroidManifest.xml";
    let plan = plan(vec![spec(manifest, FileKind::ManifestFragment)]);
    let fragment = "<uses-permission android:name=\"android.permission.INTERNET\" />\n<activity android:name=\".MainActivity\" />\n";

    let inst = Assembler::new(&store, out.path())
        .assemble(&plan, &[ok(manifest, FileKind::ManifestFragment, fragment)])
        .unwrap();

    assert_eq!(inst.written.len(), 1);
    assert!(inst.written[0].merged);
    let text = std::fs::read_to_string(inst.root.join(manifest)).unwrap();
    assert_eq!(text.matches("android.permission.INTERNET").count(), 1);
    assert_eq!(text.matches(".MainActivity\"").count(), 1);
    assert!(text.find("INTERNET").unwrap() < text.find("<application").unwrap());
}

#[test]
fn non_ok_files_keep_the_template_default() {
    let out = tempfile::tempdir().unwrap();
    let store = template();
    let layout = "app/src/main/res/layout/activity_main.xml";
    let plan = plan(vec![spec(layout, FileKind::Resource)]);
    let rejected = GeneratedFile::rejected(&spec(layout, FileKind::Resource), SynthesisFailure::Empty, 2);

    let inst = Assembler::new(&store, out.path()).assemble(&plan, &[rejected]).unwrap();

    assert!(inst.written.is_empty());
    assert_eq!(inst.skipped.len(), 1);
    assert_eq!(inst.skipped[0].path, layout);
    let original = std::fs::read(template_dir().join(layout)).unwrap();
    assert_eq!(std::fs::read(inst.root.join(layout)).unwrap(), original);
}

#[test]
fn failed_validation_leaves_the_instance_for_inspection() {
    let out = tempfile::tempdir().unwrap();
    let store = template();
    let plan = plan(vec![spec(HELPER, FileKind::Source)]);
    let wrong = ok(HELPER, FileKind::Source, "package com.example.elsewhere\n\nobject ListHelper\n");

    let mut assembler = Assembler::new(&store, out.path());
    let err = assembler.assemble(&plan, &[wrong]).unwrap_err();

    assert_eq!(assembler.stage(), AssemblyStage::Failed);
    match err {
        AssemblyError::ValidationFailed { root, problems } => {
            assert!(root.join("app/build.gradle.kts").exists());
            assert!(problems.iter().any(|p| p.contains("ListHelper.kt")), "{problems:?}");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn generated_values_files_keep_what_the_manifest_references() {
    let out = tempfile::tempdir().unwrap();
    let store = template();
    let strings = "app/src/main/res/values/strings.xml";
    let themes = "app/src/main/res/values/themes.xml";
    let plan = plan(vec![spec(strings, FileKind::Resource), spec(themes, FileKind::Resource)]);
    let files = vec![
        ok(strings, FileKind::Resource, "<resources>\n    <string name=\"add_item\">Add item</string>\n</resources>\n"),
        ok(
            themes,
            FileKind::Resource,
            "<resources>\n    <style name=\"AppTheme\" parent=\"Theme.MaterialComponents.Light\">\n        <item name=\"colorPrimary\">@color/teal_200</item>\n    </style>\n</resources>\n",
        ),
    ];

    let inst = Assembler::new(&store, out.path()).assemble(&plan, &files).unwrap();

    assert_eq!(inst.stage, AssemblyStage::Complete);
    assert_eq!(inst.written.len(), 2);
    assert!(inst.written.iter().all(|w| w.merged));
    let strings_text = std::fs::read_to_string(inst.root.join(strings)).unwrap();
    assert!(strings_text.contains("<string name=\"app_name\">Shopping List</string>"));
    assert!(strings_text.contains("name=\"add_item\""));
    let themes_text = std::fs::read_to_string(inst.root.join(themes)).unwrap();
    assert!(themes_text.contains("name=\"Theme.App\""));
    assert!(themes_text.contains("name=\"AppTheme\""));
}
