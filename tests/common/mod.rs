#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use android_agent::config::Config;
use android_agent::errors::RuntimeError;
use android_agent::provider::{ModelRuntime, Provider};
use android_agent::template::TemplateStore;
use android_agent::wire::CompletionOptions;
use walkdir::WalkDir;

/// Replays canned completions in order, then repeats `fallback` forever.
#[derive(Clone)]
pub struct ScriptedProvider {
    responses: Arc<Mutex<VecDeque<Result<String, RuntimeError>>>>,
    fallback: Result<String, RuntimeError>,
    pub prompts: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<String, RuntimeError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            fallback: Ok(String::new()),
            prompts: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn texts(responses: &[&str]) -> Self {
        Self::new(responses.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn with_fallback(mut self, fallback: Result<String, RuntimeError>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&mut self, prompt: &str, _opts: &CompletionOptions) -> Result<String, RuntimeError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn template_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("templates/empty_activity")
}

pub fn template() -> TemplateStore {
    TemplateStore::open(template_dir()).unwrap()
}

pub fn config(output_root: &Path) -> Config {
    Config {
        template_dir: template_dir(),
        output_root: output_root.to_path_buf(),
        ..Config::default()
    }
}

pub async fn loaded(provider: ScriptedProvider) -> ModelRuntime {
    let runtime = ModelRuntime::new(Box::new(provider), Duration::from_secs(5));
    runtime.load().await.unwrap();
    runtime
}

/// Relative path -> bytes for every file under `root`.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            (rel, std::fs::read(e.path()).unwrap())
        })
        .collect()
}

pub const SHOPPING_IDEA: &str = "shopping list with categories and share";

pub const SHOPPING_PLAN: &str = r#"Here is the architecture:
```json
{
  "app_name": "Shopping List",
  "package_id": "com.example.shoppinglist",
  "modules": [
    {
      "name": "list",
      "files": [
        {"path": "MainActivity.kt", "kind": "source", "description": "Shows items grouped by category in a RecyclerView"},
        {"path": "ShoppingListAdapter.kt", "kind": "source", "description": "RecyclerView adapter for the list view"},
        {"path": "layout/activity_main.xml", "kind": "resource", "description": "Screen with the list view"},
        {"path": "layout/item_shopping.xml", "kind": "resource", "description": "One row with name and category"}
      ]
    },
    {
      "name": "share",
      "files": [
        {"path": "ShareHelper.kt", "kind": "source", "description": "Builds the ACTION_SEND share intent for the list"},
        {"path": "menu/main_menu.xml", "kind": "resource", "description": "Toolbar menu with the share action"},
        {"path": "AndroidManifest.xml", "kind": "manifest-fragment", "description": "Query SEND handlers"}
      ]
    }
  ]
}
```"#;

pub const MAIN_ACTIVITY: &str = r#"```kotlin
package com.example.wrong

import android.os.Bundle
import android.view.Menu
import android.view.MenuItem
import androidx.appcompat.app.AppCompatActivity
import androidx.recyclerview.widget.LinearLayoutManager
import androidx.recyclerview.widget.RecyclerView

class MainActivity : AppCompatActivity() {
    private val items = mutableListOf("Milk" to "Dairy", "Apples" to "Fruit")

    override fun onCreate(savedInstanceState: Bundle?) {
        super.onCreate(savedInstanceState)
        setContentView(R.layout.activity_main)
        val list = findViewById<RecyclerView>(R.id.list)
        list.layoutManager = LinearLayoutManager(this)
        list.adapter = ShoppingListAdapter(items.sortedBy { it.second })
    }

    override fun onCreateOptionsMenu(menu: Menu): Boolean {
        menuInflater.inflate(R.menu.main_menu, menu)
        return true
    }

    override fun onOptionsItemSelected(item: MenuItem): Boolean {
        if (item.itemId == R.id.action_share) {
            startActivity(ShareHelper.intent(items))
            return true
        }
        return super.onOptionsItemSelected(item)
    }
}
```"#;

pub const ADAPTER: &str = r#"package com.example.shoppinglist

import android.view.LayoutInflater
import android.view.View
import android.view.ViewGroup
import android.widget.TextView
import androidx.recyclerview.widget.RecyclerView

class ShoppingListAdapter(private val items: List<Pair<String, String>>) :
    RecyclerView.Adapter<ShoppingListAdapter.Holder>() {

    class Holder(view: View) : RecyclerView.ViewHolder(view) {
        val name: TextView = view.findViewById(R.id.name)
        val category: TextView = view.findViewById(R.id.category)
    }

    override fun onCreateViewHolder(parent: ViewGroup, viewType: Int): Holder {
        val view = LayoutInflater.from(parent.context).inflate(R.layout.item_shopping, parent, false)
        return Holder(view)
    }

    override fun getItemCount() = items.size

    override fun onBindViewHolder(holder: Holder, position: Int) {
        holder.name.text = items[position].first
        holder.category.text = "[${items[position].second}]"
    }
}
"#;

pub const ACTIVITY_LAYOUT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<androidx.recyclerview.widget.RecyclerView xmlns:android="http://schemas.android.com/apk/res/android"
    android:id="@+id/list"
    android:layout_width="match_parent"
    android:layout_height="match_parent" />"#;

pub const ITEM_LAYOUT: &str = r#"Sure! Here is the row layout:
<LinearLayout xmlns:android="http://schemas.android.com/apk/res/android"
    android:layout_width="match_parent"
    android:layout_height="wrap_content"
    android:orientation="horizontal">
    <TextView android:id="@+id/name" android:layout_width="0dp" android:layout_weight="1" android:layout_height="wrap_content" />
    <TextView android:id="@+id/category" android:layout_width="wrap_content" android:layout_height="wrap_content" />
</LinearLayout>
This row shows the item name and its category."#;

pub const SHARE_HELPER: &str = r#"{"filename": "ShareHelper.kt", "content": "package com.example.shoppinglist\n\nimport android.content.Intent\n\nobject ShareHelper {\n    fun intent(items: List<Pair<String, String>>): Intent {\n        val text = items.joinToString(\"\\n\") { \"${it.first} (${it.second})\" }\n        val send = Intent(Intent.ACTION_SEND).apply {\n            type = \"text/plain\"\n            putExtra(Intent.EXTRA_TEXT, text)\n        }\n        return Intent.createChooser(send, null)\n    }\n}\n"}"#;

pub const MENU: &str = r#"```xml
<menu xmlns:android="http://schemas.android.com/apk/res/android"
    xmlns:app="http://schemas.android.com/apk/res-auto">
    <item
        android:id="@+id/action_share"
        android:title="Share"
        app:showAsAction="ifRoom" />
</menu>
```"#;

pub const MANIFEST_FRAGMENT: &str = r#"```xml
<queries>
    <intent>
        <action android:name="android.intent.action.SEND" />
    </intent>
</queries>
<activity android:name=".MainActivity" android:exported="true" />
```"#;

/// The plan followed by one good completion per planned file.
pub fn shopping_script() -> Vec<&'static str> {
    vec![SHOPPING_PLAN, MAIN_ACTIVITY, ADAPTER, ACTIVITY_LAYOUT, ITEM_LAYOUT, SHARE_HELPER, MENU, MANIFEST_FRAGMENT]
}
