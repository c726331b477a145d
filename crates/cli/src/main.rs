mod cmd;
mod manifest;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sitestack_lib::AppMode;

use cmd::{SynthOptions, cmd_synth};
use output::OutputFormat;

/// sitestack - declare sites, APIs and data resources as stacks
#[derive(Parser)]
#[command(name = "sitestack")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build every site and write the stack templates
  Synth {
    /// Path to the app manifest
    #[arg(short, long, default_value = "sitestack.json")]
    config: PathBuf,

    /// Stage name (overrides SITESTACK_STAGE and the manifest)
    #[arg(long)]
    stage: Option<String>,

    /// deploy, local or test (overrides SITESTACK_MODE and the manifest)
    #[arg(long)]
    mode: Option<AppMode>,

    /// Directory for templates and site artifacts
    #[arg(long)]
    out: Option<PathBuf>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("sitestack=debug,sitestack_lib=debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Synth {
      config,
      stage,
      mode,
      out,
    } => cmd_synth(&SynthOptions {
      config,
      stage,
      mode,
      out,
      output: cli.output,
      verbose: cli.verbose,
    }),
  }
}
