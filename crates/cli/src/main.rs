mod cmd;
mod output;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::output::OutputFormat;

/// snapex - static snapshot export for server-rendered sites
#[derive(Parser)]
#[command(name = "snapex")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct Target {
  /// Project root (default: current directory)
  #[arg(long, value_name = "DIR")]
  pub project_root: Option<PathBuf>,

  /// Export destination, relative to the project root
  #[arg(long, value_name = "DIR")]
  pub dest: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ExportArgs {
  /// Skip the build and export existing artifacts
  #[arg(long)]
  pub copy_only: bool,

  /// Port for the temporary server (default: a free port)
  #[arg(long)]
  pub port: Option<u16>,

  /// Path probed to decide the server is ready
  #[arg(long, value_name = "PATH")]
  pub health_path: Option<String>,

  /// Readiness probe attempts
  #[arg(long, value_name = "N")]
  pub ready_retries: Option<u32>,

  /// Delay between readiness probes (e.g. 200ms)
  #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
  pub ready_delay: Option<Duration>,

  /// Only 2xx on the health path counts as ready
  #[arg(long)]
  pub strict_readiness: bool,

  /// Extra route to capture as <route>/index.html (repeatable)
  #[arg(long = "route", value_name = "ROUTE")]
  pub routes: Vec<String>,

  /// Command that starts the server, instead of the standalone bundle
  #[arg(long, value_name = "CMD")]
  pub server_cmd: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
  /// Build, capture and write the static snapshot
  Export {
    #[command(flatten)]
    target: Target,

    #[command(flatten)]
    args: ExportArgs,
  },

  /// Show what the export destination currently holds
  Status {
    #[command(flatten)]
    target: Target,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Export { target, args } => cmd::cmd_export(&target, &args, cli.output),
    Commands::Status { target } => cmd::cmd_status(&target, cli.output),
  }
}
