//! Implementation of the `sitestack synth` command.
//!
//! Loads the app manifest, declares every stack, drains the deferred site
//! builds and writes one template per stack to the output directory.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::debug;

use sitestack_lib::events::kind;
use sitestack_lib::{App, AppMode};

use crate::manifest::Manifest;
use crate::output::{
  OutputFormat, format_duration, plural, print_info, print_json, print_progress, print_stat, print_success,
  print_warning, truncate_hash,
};

#[derive(Debug, Clone)]
pub struct SynthOptions {
  pub config: PathBuf,
  pub stage: Option<String>,
  pub mode: Option<AppMode>,
  pub out: Option<PathBuf>,
  pub output: OutputFormat,
  pub verbose: bool,
}

pub fn cmd_synth(opts: &SynthOptions) -> Result<()> {
  let started = Instant::now();
  let manifest = Manifest::load(&opts.config)?;
  let base = manifest_dir(&opts.config)?;
  debug!(config = %opts.config.display(), stacks = manifest.stacks.len(), "manifest loaded");

  let mut config = manifest.app.clone();
  config.apply_env_overrides().context("Invalid environment override")?;
  if let Some(stage) = &opts.stage {
    config.stage = stage.clone();
  }
  if let Some(mode) = opts.mode {
    config.mode = mode;
  }
  match &opts.out {
    Some(out) => config.out_dir = out.clone(),
    None if config.out_dir.is_relative() => config.out_dir = base.join(&config.out_dir),
    None => {}
  }

  let definitions = manifest.definitions(&base)?;
  let app = App::new(config);

  if app.mode() == AppMode::Local && !opts.output.is_json() {
    print_warning("Local mode: sites are placeholders unless dev.deploy is set");
  }
  let _progress = (!opts.output.is_json()).then(|| {
    app.events().forward(&[kind::BUILD_START, kind::BUILD_END], |event| {
      let site = event.properties["site"].as_str().unwrap_or_default();
      match event.properties["buildId"].as_str() {
        Some(build_id) => print_progress(&format!("Built site {} ({})", site, truncate_hash(build_id))),
        None => print_progress(&format!("Building site {}", site)),
      }
    })
  });

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(async {
    for definition in &definitions {
      app
        .stack(definition)
        .await
        .with_context(|| format!("Failed to declare stack: {}", definition.name()))?;
    }
    app.finish().await.context("Failed to build sites")
  })?;

  let assembly = app.synth().context("Failed to synthesize stacks")?;
  let out_dir = app.config().out_dir.clone();
  assembly
    .write_to(&out_dir)
    .with_context(|| format!("Failed to write templates to {}", out_dir.display()))?;

  if opts.output.is_json() {
    let stacks: Vec<_> = assembly
      .stacks
      .iter()
      .map(|s| json!({ "name": s.name, "dependencies": s.dependencies, "resources": s.resources.len() }))
      .collect();
    print_json(&json!({
      "app": assembly.app,
      "stage": assembly.stage,
      "mode": app.mode().to_string(),
      "out": out_dir.display().to_string(),
      "stacks": stacks,
    }))?;
    return Ok(());
  }

  print_success(&format!(
    "Synthesized {} for {} ({}) in {}",
    plural(assembly.stacks.len(), "stack"),
    assembly.app,
    assembly.stage,
    format_duration(started.elapsed())
  ));
  for stack in &assembly.stacks {
    print_stat(&stack.name, &plural(stack.resources.len(), "resource"));
    if opts.verbose && !stack.dependencies.is_empty() {
      println!("    depends on {}", stack.dependencies.join(", "));
    }
  }
  print_info(&format!("Templates written to {}", out_dir.display()));
  Ok(())
}

fn manifest_dir(config: &Path) -> Result<PathBuf> {
  let dir = match config.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent,
    _ => Path::new("."),
  };
  dunce::canonicalize(dir).with_context(|| format!("Failed to resolve manifest directory: {}", dir.display()))
}
