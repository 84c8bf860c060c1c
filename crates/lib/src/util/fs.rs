//! Filesystem helpers for copying and clearing export trees.

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Totals for a recursive copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
  pub files: u64,
  pub bytes: u64,
}

/// Recursively copy `src` into `dst`, creating `dst` if needed.
///
/// Existing files in `dst` are overwritten. Symlinks are recreated as
/// symlinks on unix and copied as regular files elsewhere.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<CopyStats> {
  let mut stats = CopyStats::default();
  fs::create_dir_all(dst)?;

  for entry in WalkDir::new(src).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    if rel.as_os_str().is_empty() {
      continue;
    }
    let target = dst.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      copy_symlink(entry.path(), &target)?;
      stats.files += 1;
    } else if file_type.is_file() {
      stats.bytes += fs::copy(entry.path(), &target)?;
      stats.files += 1;
    }
  }

  Ok(stats)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
  let link_target = fs::read_link(src)?;
  if dst.symlink_metadata().is_ok() {
    fs::remove_file(dst)?;
  }
  std::os::unix::fs::symlink(link_target, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
  fs::copy(src, dst).map(|_| ())
}

/// Remove a directory tree. Returns `false` if there was nothing to remove.
pub fn remove_dir_if_exists(path: &Path) -> io::Result<bool> {
  match fs::remove_dir_all(path) {
    Ok(()) => Ok(true),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
    Err(e) => Err(e),
  }
}
