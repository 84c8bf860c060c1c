//! The export pipeline and its failure recovery.
//!
//! One run moves through fixed stages:
//!
//! 1. back up the current destination, if any
//! 2. attempt build, server launch, capture and materialize
//! 3. accept the attempt if the destination now has an `index.html`
//! 4. otherwise restore the backup, or write a placeholder when there is none
//! 5. remove the backup
//!
//! Failures inside the attempt never escape [`run_export`]; they become the
//! `reason` of a degraded [`ExportOutcome`]. Only an unsafe destination and
//! filesystem errors while backing up or recovering are returned as
//! [`ExportError`].

pub mod backup;
pub mod placeholder;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::build::{BuildError, BuildOutcome, run_build};
use crate::capture::{
  CaptureError, FetchError, MaterializeError, MaterializeReport, PageFetcher, capture_pages, materialize,
};
use crate::config::{ConfigError, ExportConfig};
use crate::consts::INDEX_FILE;
use crate::server::{EntryKind, RunningServer, ServerEntry, ServerError, free_port, launch, with_server};

pub use backup::Backup;

#[derive(Debug, Error)]
pub enum ExportError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("failed to back up {dest} to {backup}: {source}")]
  Backup {
    dest: PathBuf,
    backup: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to restore previous export into {dest}: {source}")]
  Restore {
    dest: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write placeholder export: {0}")]
  Placeholder(#[source] MaterializeError),
}

/// Why an export attempt did not produce a usable destination.
#[derive(Debug, Error)]
pub enum AttemptError {
  #[error(transparent)]
  Build(#[from] BuildError),

  #[error(transparent)]
  Server(#[from] ServerError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Capture(#[from] CaptureError),

  #[error(transparent)]
  Materialize(#[from] MaterializeError),

  #[error("export finished without writing {0}")]
  MissingIndex(PathBuf),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExportOutcome {
  /// A fresh snapshot replaced the destination.
  Exported {
    built: bool,
    server: EntryKind,
    port: u16,
    ready_attempts: u32,
    report: MaterializeReport,
  },
  /// The attempt failed and the previous export was put back.
  RestoredBackup { reason: String },
  /// The attempt failed with no previous export; a placeholder was written.
  Placeholder { reason: String },
}

impl ExportOutcome {
  pub fn is_degraded(&self) -> bool {
    !matches!(self, ExportOutcome::Exported { .. })
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
  pub destination: PathBuf,
  pub duration_ms: u64,
  #[serde(flatten)]
  pub outcome: ExportOutcome,
}

/// A successful attempt, before it is evaluated.
#[derive(Debug)]
pub struct Attempt {
  pub build: BuildOutcome,
  pub server: EntryKind,
  pub port: u16,
  pub ready_attempts: u32,
  pub report: MaterializeReport,
}

/// Run one export with backup and recovery.
pub async fn run_export(config: &ExportConfig) -> Result<ExportSummary, ExportError> {
  let start = Instant::now();
  config.validate()?;
  let dest = &config.destination;
  info!(dest = %dest.display(), copy_only = config.copy_only, "starting export");

  let backup_dir = config.backup_dir();
  let mut backup = Backup::create(dest, &backup_dir).map_err(|source| ExportError::Backup {
    dest: dest.clone(),
    backup: backup_dir.clone(),
    source,
  })?;

  let outcome = match evaluate(attempt_export(config).await, dest) {
    Ok(attempt) => {
      info!(
        dest = %dest.display(),
        pages = attempt.report.pages.len(),
        "export succeeded"
      );
      Ok(ExportOutcome::Exported {
        built: matches!(attempt.build, BuildOutcome::Built { .. }),
        server: attempt.server,
        port: attempt.port,
        ready_attempts: attempt.ready_attempts,
        report: attempt.report,
      })
    }
    Err(e) => {
      warn!(error = %e, "export attempt failed, recovering");
      recover(&mut backup, dest, e.to_string())
    }
  };

  if let Err(e) = backup.cleanup() {
    warn!(path = %backup_dir.display(), error = %e, "failed to remove backup");
  }

  let outcome = outcome?;
  Ok(ExportSummary {
    destination: dest.clone(),
    duration_ms: start.elapsed().as_millis() as u64,
    outcome,
  })
}

/// Build, serve, capture and write the export once.
///
/// The server is shut down before this returns, whatever happened during
/// capture.
pub async fn attempt_export(config: &ExportConfig) -> Result<Attempt, AttemptError> {
  let build = run_build(config).await?;

  let entry = ServerEntry::resolve(config);
  let port = match config.port {
    Some(port) => port,
    None => free_port(&config.host)?,
  };
  let fetcher = PageFetcher::new(&config.capture)?;

  let RunningServer {
    guard,
    base_url,
    attempts,
  } = launch(config, &entry, port).await?;

  let pages = with_server(guard, || capture_pages(&fetcher, &base_url, &config.capture)).await?;
  let report = materialize(&pages, config)?;

  Ok(Attempt {
    build,
    server: entry.kind,
    port,
    ready_attempts: attempts,
    report,
  })
}

/// An attempt only counts if it left an `index.html` behind.
fn evaluate(attempt: Result<Attempt, AttemptError>, dest: &Path) -> Result<Attempt, AttemptError> {
  let attempt = attempt?;
  let index = dest.join(INDEX_FILE);
  if index.is_file() {
    Ok(attempt)
  } else {
    Err(AttemptError::MissingIndex(index))
  }
}

fn recover(backup: &mut Backup, dest: &Path, reason: String) -> Result<ExportOutcome, ExportError> {
  if backup.exists() {
    backup.restore().map_err(|source| ExportError::Restore {
      dest: dest.to_path_buf(),
      source,
    })?;
    warn!(dest = %dest.display(), "kept previous export");
    Ok(ExportOutcome::RestoredBackup { reason })
  } else {
    placeholder::write(dest).map_err(ExportError::Placeholder)?;
    warn!(dest = %dest.display(), "no previous export, serving placeholder");
    Ok(ExportOutcome::Placeholder { reason })
  }
}
