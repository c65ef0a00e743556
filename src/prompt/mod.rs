use crate::config::Limits;
use crate::context::{render_blobs, FileBlob};
use crate::wire::{FileKind, FileSpec, Idea, Module, ProjectPlan};

fn system_preamble() -> &'static str {
    "You are an expert Android app developer. Keep code concise, compilable, and production quality."
}

fn conventions(plan: &ProjectPlan) -> String {
    format!(
r#"Project Conventions:
- Language: Kotlin for all sources; Android views with XML layouts (no Jetpack Compose).
- Base classes: androidx.appcompat.app.AppCompatActivity for activities, androidx.fragment.app.Fragment for fragments.
- Available libraries only: androidx.core:core-ktx, androidx.appcompat, com.google.android.material, androidx.constraintlayout, androidx.recyclerview. Do not use any other dependency.
- View lookup: findViewById (view binding is not enabled).
- Package: every Kotlin file starts with `package {package}` (or a sub-package matching its folder) and imports R as `{package}.R` when it lives in a sub-package.
- Resources: layouts in res/layout, strings in res/values/strings.xml, menus in res/menu. The app label string is `app_name` = "{display}".
- Entry point: MainActivity is the launcher activity; other activities must be declared in the manifest.
- minSdk 24, targetSdk 33."#,
        package = plan.package_id,
        display = plan.display_name,
    )
}

fn plan_schema(limits: &Limits) -> String {
    format!(
r#"Return EXACTLY ONE JSON object (no markdown, no prose, no code fences) that conforms to:

{{
  "app_name": string,            // short, friendly name, max 3 words
  "package_id": string,          // reverse-DNS, lowercase, e.g. "com.example.shoppinglist"
  "modules": [
    {{
      "name": string,            // feature module, e.g. "list", "share"
      "files": [
        {{ "path": string, "kind": "source"|"resource"|"manifest-fragment", "description": string }}
      ]
    }}
  ]
}}

Rules:
- 1 to {max_modules} modules, at most {max_files} files in total. Keep it minimal.
- "source" files are Kotlin classes; give the file name only, e.g. "ShoppingListActivity.kt". Always include "MainActivity.kt".
- "resource" files are XML resources; give "<folder>/<name>.xml", e.g. "layout/activity_shopping_list.xml" or "menu/main_menu.xml".
- Use at most one "manifest-fragment" file with path "AndroidManifest.xml" when extra activities or permissions are needed.
- "description" states in one sentence what the file must implement."#,
        max_modules = limits.max_modules,
        max_files = limits.max_files,
    )
}

pub fn plan_prompt(idea: &Idea, limits: &Limits) -> String {
    format!(
        "{preamble}\n\nDesign a simple, clean architecture for an Android app using Kotlin and XML. \
List the feature modules and the files to implement with a brief purpose for each.\n\n{schema}\n\nIdea: {idea}",
        preamble = system_preamble(),
        schema = plan_schema(limits),
        idea = idea.as_str(),
    )
}

/// Reformulation after a response that could not be parsed.
pub fn plan_prompt_strict(idea: &Idea, limits: &Limits, problem: &str) -> String {
    format!(
"STRICT MODE. Your previous answer could not be used: {problem}

Output ONLY the JSON object below, filled in for the idea. No explanations, no markdown, nothing before or after the JSON.

{schema}

Idea: {idea}",
        problem = problem,
        schema = plan_schema(limits),
        idea = idea.as_str(),
    )
}

pub fn output_shape(kind: FileKind) -> &'static str {
    match kind {
        FileKind::Source => {
            "Output a single complete Kotlin file: the package line, imports, and declarations. No surrounding prose."
        }
        FileKind::Resource => {
            "Output a single complete Android XML resource file starting with <?xml version=\"1.0\" encoding=\"utf-8\"?>. No surrounding prose."
        }
        FileKind::ManifestFragment => {
            "Output ONLY the XML elements to add to AndroidManifest.xml: <uses-permission .../> elements and/or <activity .../> elements. Do not output the <manifest> or <application> tags. MainActivity is already declared."
        }
    }
}

fn planned_files(plan: &ProjectPlan) -> String {
    let mut s = String::new();
    for (module, f) in plan.files() {
        s.push_str(&format!(" - [{}] {} ({:?}): {}\n", module.name, f.relative_path, f.kind, f.description));
    }
    s
}

pub fn file_prompt(plan: &ProjectPlan, module: &Module, spec: &FileSpec, template: &[FileBlob]) -> String {
    let context = if template.is_empty() {
        "(none)".to_string()
    } else {
        render_blobs(template)
    };
    format!(
"{preamble}

App: {display} ({app})
Package: {package}

{conventions}

All planned files (keep names and references consistent with this list):
{files}
Module: {module}
File to write: {path}
Purpose: {description}

Template files already in the project:
{context}

{shape}",
        preamble = system_preamble(),
        display = plan.display_name,
        app = plan.app_name,
        package = plan.package_id,
        conventions = conventions(plan),
        files = planned_files(plan),
        module = module.name,
        path = spec.relative_path,
        description = spec.description,
        context = context,
        shape = output_shape(spec.kind),
    )
}

/// Retry after malformed output: same task, output-only-code instruction.
pub fn file_prompt_strict(plan: &ProjectPlan, module: &Module, spec: &FileSpec, problem: &str) -> String {
    format!(
"STRICT MODE. Your previous answer was unusable: {problem}

Write the file {path} for the Android app \"{display}\" (package {package}).
Module: {module}
Purpose: {description}

{shape}
Output ONLY the code. The first character of your answer must be the first character of the file. Close every brace and tag.",
        problem = problem,
        path = spec.relative_path,
        display = plan.display_name,
        package = plan.package_id,
        module = module.name,
        description = spec.description,
        shape = output_shape(spec.kind),
    )
}
