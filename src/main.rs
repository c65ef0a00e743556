use anyhow::{anyhow, Context};
use clap::Parser;
use futures::future::join_all;
use std::time::Duration;

use android_agent::cli::{self, Command};
use android_agent::config::Config;
use android_agent::log;
use android_agent::pipeline::{CancelFlag, Pipeline, RunReport, Silent};
use android_agent::provider::cache::{find_preset, ModelCache};
use android_agent::provider::{self, ModelRef, ModelRuntime};
use android_agent::template::TemplateStore;
use android_agent::ux;

async fn start_runtime(cfg: &Config) -> anyhow::Result<ModelRuntime> {
    let prov = provider::make_provider(cfg)?;
    let runtime = ModelRuntime::new(prov, Duration::from_secs(cfg.timeout_secs));
    let spin = ux::spinner(&format!("loading model via {}", runtime.name()));
    let loaded = runtime.load().await;
    spin.finish_and_clear();
    loaded.map_err(|e| anyhow!("model runtime '{}' could not be loaded: {e}", runtime.name()))?;
    Ok(runtime)
}

async fn stop_runtime(runtime: &ModelRuntime) {
    if let Err(e) = runtime.unload().await {
        tracing::warn!(error = %e, "model unload failed");
    }
}

fn watch_ctrl_c(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("cancellation requested; stopping after the current step");
            cancel.cancel();
        }
    });
}

async fn generate(args: &cli::Args, cfg: &Config, ideas: &[String], auto_approve: bool) -> anyhow::Result<Vec<RunReport>> {
    let store = TemplateStore::open(&cfg.template_dir)
        .with_context(|| format!("opening template {}", cfg.template_dir.display()))?;
    tracing::info!(template = %store.label(), ideas = ideas.len(), "generation started");

    let runtime = start_runtime(cfg).await?;
    let cancel = CancelFlag::new();
    watch_ctrl_c(cancel.clone());

    let progress = ux::ConsoleProgress::new();
    let pipe = Pipeline::new(&runtime, cfg, &store, cancel, &progress)
        .with_artifacts(args.save_request, args.save_response, args.debug);

    let reports = if auto_approve {
        join_all(ideas.iter().map(|idea| pipe.run(idea))).await
    } else {
        let mut out = Vec::new();
        for idea in ideas {
            let mut report = pipe.start(idea);
            let result = match pipe.plan(&mut report).await {
                Ok(plan) => {
                    progress.finish();
                    ux::show_plan(&plan, &report.warnings);
                    if !ux::confirm("Generate this project?") {
                        println!("Skipped by user.");
                        continue;
                    }
                    pipe.build(&mut report, &plan).await
                }
                Err(e) => Err(e),
            };
            out.push(pipe.finish(report, result));
        }
        out
    };
    progress.finish();

    stop_runtime(&runtime).await;
    Ok(reports)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    log::init(args.debug);

    let mut cfg = Config::load(args.config.as_deref())?;
    args.apply_overrides(&mut cfg);
    tracing::debug!(provider = ?cfg.provider, model = %cfg.model, output = %cfg.output_root.display(), "configuration loaded");

    match &args.command {
        Command::InitConfig { path } => {
            cfg.save(path)?;
            println!("Configuration written to {}", path.display());
        }
        Command::History { limit } => {
            let records = log::read_history(&cfg.output_root, *limit)?;
            ux::print_history(&records);
        }
        Command::Models => {
            ux::print_models(&ModelCache::new(cfg.model_cache_dir.clone()));
        }
        Command::Fetch { preset } => {
            let found = find_preset(preset).ok_or_else(|| anyhow!("no preset named '{preset}' (see `models`)"))?;
            let cache = ModelCache::new(cfg.model_cache_dir.clone());
            let path = cache.ensure(&ModelRef::Preset(found)).await?;
            println!("{} ready at {}", found.name, path.display());
        }
        Command::Plan { idea } => {
            let store = TemplateStore::open(&cfg.template_dir)
                .with_context(|| format!("opening template {}", cfg.template_dir.display()))?;
            let runtime = start_runtime(&cfg).await?;
            let pipe = Pipeline::new(&runtime, &cfg, &store, CancelFlag::new(), &Silent)
                .with_artifacts(args.save_request, args.save_response, args.debug)
                .with_history(false);
            let mut report = pipe.start(idea);
            let planned = pipe.plan(&mut report).await;
            stop_runtime(&runtime).await;

            let plan = planned.map_err(|e| anyhow!("{} ({})", e, e.stage()))?;
            for w in &report.warnings {
                eprintln!("warning: {w}");
            }
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Command::Generate { idea, auto_approve } => {
            let reports = generate(&args, &cfg, idea, *auto_approve).await?;
            for r in &reports {
                ux::print_run_report(r);
            }
            let failed = reports.iter().filter(|r| !r.succeeded()).count();
            if failed > 0 {
                return Err(anyhow!("{failed} of {} runs did not produce a project", reports.len()));
            }
        }
    }
    Ok(())
}
