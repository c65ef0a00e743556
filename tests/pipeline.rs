mod common;

use std::sync::Mutex;

use android_agent::errors::{RunFailure, RuntimeError};
use android_agent::log::read_history;
use android_agent::pipeline::{CancelFlag, Pipeline, Progress, Silent};
use android_agent::wire::{FileStatus, GeneratedFile};
use common::{config, loaded, shopping_script, template, ScriptedProvider, SHOPPING_IDEA, SHOPPING_PLAN};
use pretty_assertions::assert_eq;

#[derive(Default)]
struct Recorder {
    done: Mutex<Vec<(String, FileStatus)>>,
}

impl Progress for Recorder {
    fn notify(&self, _run: &str, _message: &str) {}

    fn file_done(&self, _run: &str, file: &GeneratedFile) {
        self.done.lock().unwrap().push((file.relative_path.clone(), file.status));
    }
}

#[tokio::test]
async fn shopping_list_idea_produces_a_complete_project() {
    let out = tempfile::tempdir().unwrap();
    let cfg = config(out.path());
    let store = template();
    let runtime = loaded(ScriptedProvider::texts(&shopping_script())).await;
    let recorder = Recorder::default();

    let report = Pipeline::new(&runtime, &cfg, &store, CancelFlag::new(), &recorder)
        .run(SHOPPING_IDEA)
        .await;

    assert!(report.succeeded(), "{:?}", report.failure);
    assert_eq!(report.outcome(), "complete");
    let inst = report.instance.as_ref().unwrap();
    assert_eq!(inst.root, out.path().join("ShoppingList"));
    assert_eq!(inst.written.len(), 7);
    assert!(inst.skipped.is_empty());
    assert_eq!(recorder.done.lock().unwrap().len(), 7);

    let root = &inst.root;
    let manifest = std::fs::read_to_string(root.join("app/src/main/AndroidManifest.xml")).unwrap();
    assert!(manifest.contains("package=\"com.example.shoppinglist\""));
    assert!(manifest.contains("android.intent.action.SEND"));
    assert_eq!(manifest.matches("android:name=\".MainActivity\"").count(), 1);

    let activity = std::fs::read_to_string(root.join("app/src/main/java/com/example/shoppinglist/MainActivity.kt")).unwrap();
    assert!(activity.starts_with("package com.example.shoppinglist\n"));
    assert!(activity.contains("ShoppingListAdapter"));
    let share = std::fs::read_to_string(root.join("app/src/main/java/com/example/shoppinglist/ShareHelper.kt")).unwrap();
    assert!(share.contains("Intent.ACTION_SEND"));
    let row = std::fs::read_to_string(root.join("app/src/main/res/layout/item_shopping.xml")).unwrap();
    assert!(row.starts_with("<LinearLayout"));
    assert!(!row.contains("This row shows"));
    assert!(root.join("app/src/main/res/menu/main_menu.xml").is_file());

    let history = read_history(out.path(), 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, "complete");
    assert_eq!(history[0].app_name.as_deref(), Some("ShoppingList"));
    assert_eq!(history[0].project_path.as_deref(), Some(root.as_path()));
}

#[tokio::test]
async fn empty_completions_degrade_to_the_template_defaults() {
    let out = tempfile::tempdir().unwrap();
    let cfg = config(out.path());
    let store = template();
    let runtime = loaded(ScriptedProvider::texts(&[SHOPPING_PLAN])).await;

    let report = Pipeline::new(&runtime, &cfg, &store, CancelFlag::new(), &Silent)
        .run(SHOPPING_IDEA)
        .await;

    assert!(report.succeeded(), "{:?}", report.failure);
    assert_eq!(report.outcome(), "degraded");
    let planned: Vec<String> = report.plan.as_ref().unwrap().files().map(|(_, f)| f.relative_path.clone()).collect();
    assert_eq!(report.skipped_paths(), planned);

    let inst = report.instance.as_ref().unwrap();
    assert!(inst.written.is_empty());
    let layout = std::fs::read(inst.root.join("app/src/main/res/layout/activity_main.xml")).unwrap();
    let original = std::fs::read(store.root().join("app/src/main/res/layout/activity_main.xml")).unwrap();
    assert_eq!(layout, original);
    assert!(inst.root.join("app/src/main/java/com/example/shoppinglist/MainActivity.kt").is_file());

    let history = read_history(out.path(), 10).unwrap();
    assert_eq!(history[0].outcome, "degraded");
    assert_eq!(history[0].skipped.len(), 7);
}

#[tokio::test]
async fn repeated_runtime_failures_stop_the_run() {
    let out = tempfile::tempdir().unwrap();
    let cfg = config(out.path());
    let store = template();
    let provider = ScriptedProvider::texts(&[SHOPPING_PLAN])
        .with_fallback(Err(RuntimeError::Generation("context overflow".into())));
    let runtime = loaded(provider).await;

    let report = Pipeline::new(&runtime, &cfg, &store, CancelFlag::new(), &Silent)
        .run(SHOPPING_IDEA)
        .await;

    assert!(!report.succeeded());
    assert_eq!(
        report.outcome(),
        "synthesize:app/src/main/java/com/example/shoppinglist/ShoppingListAdapter.kt"
    );
    assert_eq!(report.files.len(), cfg.limits.max_consecutive_failures);
    assert!(report.project_path().is_none());
    assert!(!out.path().join("ShoppingList").exists());

    let history = read_history(out.path(), 10).unwrap();
    assert_eq!(history[0].outcome, report.outcome());
}

#[tokio::test]
async fn unloaded_runtime_fails_at_planning() {
    let out = tempfile::tempdir().unwrap();
    let cfg = config(out.path());
    let store = template();
    let runtime = android_agent::provider::ModelRuntime::new(
        Box::new(ScriptedProvider::texts(&shopping_script())),
        std::time::Duration::from_secs(5),
    );

    let report = Pipeline::new(&runtime, &cfg, &store, CancelFlag::new(), &Silent)
        .run(SHOPPING_IDEA)
        .await;

    assert_eq!(report.outcome(), "plan");
    assert!(matches!(report.failure, Some(RunFailure::Plan(_))));
    assert!(report.plan.is_none());
}

#[tokio::test]
async fn a_cancelled_run_writes_nothing() {
    let out = tempfile::tempdir().unwrap();
    let cfg = config(out.path());
    let store = template();
    let provider = ScriptedProvider::texts(&shopping_script());
    let runtime = loaded(provider.clone()).await;
    let cancel = CancelFlag::new();
    cancel.cancel();

    let report = Pipeline::new(&runtime, &cfg, &store, cancel, &Silent)
        .run(SHOPPING_IDEA)
        .await;

    assert_eq!(report.outcome(), "cancelled");
    assert!(provider.prompts().is_empty());
    assert!(!out.path().join("ShoppingList").exists());
}

#[tokio::test]
async fn history_can_be_switched_off() {
    let out = tempfile::tempdir().unwrap();
    let cfg = config(out.path());
    let store = template();
    let runtime = loaded(ScriptedProvider::texts(&[SHOPPING_PLAN])).await;
    let pipe = Pipeline::new(&runtime, &cfg, &store, CancelFlag::new(), &Silent).with_history(false);

    let mut report = pipe.start(SHOPPING_IDEA);
    let plan = pipe.plan(&mut report).await.unwrap();
    assert_eq!(report.plan.as_ref(), Some(&plan));
    let report = pipe.finish(report, Err(RunFailure::Cancelled));

    assert_eq!(report.outcome(), "cancelled");
    assert!(read_history(out.path(), 10).unwrap().is_empty());
}
