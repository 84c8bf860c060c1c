//! Read-only view of an export destination.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::consts::{HEALTH_MARKER, INDEX_FILE, NOT_FOUND_FILE, PLACEHOLDER_MARKER};
use crate::util::hash::{ContentHash, DigestError, digest_tree};

#[derive(Debug, Clone, Serialize)]
pub struct ExportStatus {
  pub destination: PathBuf,
  pub exists: bool,
  pub has_index: bool,
  pub has_not_found: bool,
  pub has_health_marker: bool,
  /// The index page is the "snapshot unavailable" placeholder.
  pub is_placeholder: bool,
  pub files: u64,
  pub bytes: u64,
  /// Hash over the whole tree; `None` when the destination does not exist.
  pub tree_hash: Option<ContentHash>,
}

impl ExportStatus {
  /// Has a real snapshot to serve.
  pub fn is_servable(&self) -> bool {
    self.has_index && !self.is_placeholder
  }
}

pub fn inspect(dest: &Path) -> Result<ExportStatus, DigestError> {
  if !dest.is_dir() {
    return Ok(ExportStatus {
      destination: dest.to_path_buf(),
      exists: false,
      has_index: false,
      has_not_found: false,
      has_health_marker: false,
      is_placeholder: false,
      files: 0,
      bytes: 0,
      tree_hash: None,
    });
  }

  let index = dest.join(INDEX_FILE);
  let is_placeholder = fs::read_to_string(&index)
    .map(|html| html.contains(PLACEHOLDER_MARKER))
    .unwrap_or(false);
  let digest = digest_tree(dest)?;

  Ok(ExportStatus {
    destination: dest.to_path_buf(),
    exists: true,
    has_index: index.is_file(),
    has_not_found: dest.join(NOT_FOUND_FILE).is_file(),
    has_health_marker: dest.join(HEALTH_MARKER).is_file(),
    is_placeholder,
    files: digest.files,
    bytes: digest.bytes,
    tree_hash: Some(digest.hash),
  })
}
