//! Temporary server lifecycle.
//!
//! The snapshot is rendered by the app's own production server, started as
//! a child process on a local port for the duration of one export:
//!
//! - [`entry`] decides what to run (standalone bundle, start script, override)
//! - [`guard`] owns the child process and guarantees it is torn down
//! - [`launch`] spawns the server and polls it until it answers

pub mod entry;
pub mod guard;
pub mod launch;

use std::process::ExitStatus;

use thiserror::Error;

pub use entry::{EntryKind, ServerEntry};
pub use guard::{ServerGuard, with_server};
pub use launch::{RunningServer, free_port, launch, wait_ready};

#[derive(Debug, Error)]
pub enum ServerError {
  #[error("failed to spawn server `{cmd}`: {source}")]
  Spawn {
    cmd: String,
    #[source]
    source: std::io::Error,
  },

  #[error("server exited before becoming ready ({})", describe_exit(.status))]
  ExitedEarly { status: ExitStatus },

  #[error("server not ready after {attempts} attempt(s), last result: {last}")]
  NotReady { attempts: u32, last: String },

  #[error("failed to reserve a port on {host}: {source}")]
  Port {
    host: String,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid server address {0}")]
  Address(String),

  #[error("failed to build probe client: {0}")]
  Client(#[from] reqwest::Error),

  #[error("io error while supervising server: {0}")]
  Io(#[from] std::io::Error),
}

/// Human-readable exit code or terminating signal.
pub fn describe_exit(status: &ExitStatus) -> String {
  if let Some(code) = status.code() {
    return format!("exit code {}", code);
  }

  #[cfg(unix)]
  {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = status.signal() {
      return format!("killed by signal {}", signal);
    }
  }

  "unknown exit status".to_string()
}
