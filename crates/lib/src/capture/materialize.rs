//! Writing captured pages and asset trees into the export destination.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::CapturedPage;
use crate::config::ExportConfig;
use crate::consts::{HEALTH_MARKER, HEALTH_MARKER_BODY};
use crate::util::fs::{copy_dir_all, remove_dir_if_exists};
use crate::util::hash::ContentHash;

#[derive(Debug, Error)]
pub enum MaterializeError {
  #[error("failed to reset destination {path}: {source}")]
  Reset {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to copy assets from {from} to {to}: {source}")]
  Copy {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
  pub route: String,
  pub file: PathBuf,
  pub status: u16,
  pub bytes: u64,
  pub sha256: ContentHash,
  pub redirects: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetReport {
  pub source: PathBuf,
  pub target: PathBuf,
  pub files: u64,
  pub bytes: u64,
}

/// What ended up in the destination.
#[derive(Debug, Clone, Serialize)]
pub struct MaterializeReport {
  pub destination: PathBuf,
  pub pages: Vec<PageReport>,
  pub assets: Vec<AssetReport>,
  /// Asset sources that did not exist and were skipped.
  pub missing_assets: Vec<PathBuf>,
}

/// Replace the destination with `pages` plus the configured asset trees.
///
/// Assets are copied before pages so a page always wins over an asset file
/// at the same path. The health marker is written last.
pub fn materialize(pages: &[CapturedPage], config: &ExportConfig) -> Result<MaterializeReport, MaterializeError> {
  let dest = &config.destination;
  reset_dir(dest)?;

  let mut assets = Vec::new();
  let mut missing_assets = Vec::new();
  for mapping in &config.assets {
    let from = config.resolve(&mapping.source);
    if !from.is_dir() {
      warn!(source = %from.display(), "asset directory missing, skipping");
      missing_assets.push(mapping.source.clone());
      continue;
    }

    let to = dest.join(&mapping.target);
    let stats = copy_dir_all(&from, &to).map_err(|source| MaterializeError::Copy {
      from: from.clone(),
      to: to.clone(),
      source,
    })?;
    debug!(source = %from.display(), files = stats.files, bytes = stats.bytes, "copied assets");
    assets.push(AssetReport {
      source: mapping.source.clone(),
      target: mapping.target.clone(),
      files: stats.files,
      bytes: stats.bytes,
    });
  }

  let mut reports = Vec::with_capacity(pages.len());
  for captured in pages {
    let body = &captured.page.body;
    write_file(&dest.join(&captured.file), body)?;
    reports.push(PageReport {
      route: captured.route.clone(),
      file: captured.file.clone(),
      status: captured.page.status.as_u16(),
      bytes: body.len() as u64,
      sha256: ContentHash::of(body),
      redirects: captured.page.redirects,
    });
  }

  write_file(&dest.join(HEALTH_MARKER), HEALTH_MARKER_BODY.as_bytes())?;

  info!(
    dest = %dest.display(),
    pages = reports.len(),
    asset_trees = assets.len(),
    "export written"
  );

  Ok(MaterializeReport {
    destination: dest.clone(),
    pages: reports,
    assets,
    missing_assets,
  })
}

pub(crate) fn reset_dir(path: &Path) -> Result<(), MaterializeError> {
  let reset_err = |source| MaterializeError::Reset {
    path: path.to_path_buf(),
    source,
  };
  if remove_dir_if_exists(path).map_err(reset_err)? {
    debug!(path = %path.display(), "removed previous export");
  }
  fs::create_dir_all(path).map_err(reset_err)
}

pub(crate) fn write_file(path: &Path, contents: &[u8]) -> Result<(), MaterializeError> {
  let write_err = |source| MaterializeError::Write {
    path: path.to_path_buf(),
    source,
  };
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(write_err)?;
  }
  fs::write(path, contents).map_err(write_err)
}
