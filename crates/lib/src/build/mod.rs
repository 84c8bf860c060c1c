//! Build trigger.
//!
//! Runs the framework's production build before a snapshot is captured.
//! Build failures are never retried: a failing build is not transient.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ExportConfig;
use crate::server::describe_exit;

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("failed to start build command `{cmd}`: {source}")]
  Spawn {
    cmd: String,
    #[source]
    source: std::io::Error,
  },

  #[error("build command `{cmd}` failed ({})", describe_exit(.status))]
  Failed { cmd: String, status: ExitStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
  /// Copy-only mode: existing artifacts are used as they are.
  Skipped,
  Built { duration: Duration },
}

/// Run the configured build command in the project root, unless the config
/// is in copy-only mode.
pub async fn run_build(config: &ExportConfig) -> Result<BuildOutcome, BuildError> {
  if config.copy_only {
    info!("copy-only mode, skipping build");
    return Ok(BuildOutcome::Skipped);
  }

  let cmd = config.build_command.as_str();
  info!(cmd = %cmd, root = %config.project_root.display(), "running build");
  let start = Instant::now();

  let (shell, shell_args) = get_shell();
  let output = Command::new(shell)
    .args(shell_args)
    .arg(cmd)
    .current_dir(&config.project_root)
    .stdin(Stdio::null())
    .output()
    .await
    .map_err(|source| BuildError::Spawn {
      cmd: cmd.to_string(),
      source,
    })?;

  let stdout = String::from_utf8_lossy(&output.stdout);
  if !stdout.trim().is_empty() {
    debug!(stdout = %tail(&stdout, 40), "build output");
  }

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
      debug!(stderr = %tail(&stderr, 40), "build stderr");
    }
    return Err(BuildError::Failed {
      cmd: cmd.to_string(),
      status: output.status,
    });
  }

  let duration = start.elapsed();
  info!(elapsed_ms = duration.as_millis() as u64, "build finished");
  Ok(BuildOutcome::Built { duration })
}

/// Shell used to run the build command string.
fn get_shell() -> (&'static str, &'static [&'static str]) {
  #[cfg(unix)]
  {
    ("/bin/sh", &["-c"])
  }

  #[cfg(windows)]
  {
    ("powershell.exe", &["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command"])
  }
}

/// Last `lines` lines of `text`.
fn tail(text: &str, lines: usize) -> String {
  let all: Vec<&str> = text.trim_end().lines().collect();
  let start = all.len().saturating_sub(lines);
  all[start..].join("\n")
}
