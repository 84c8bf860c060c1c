//! Parking the previous export while a new one is attempted.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::consts::INDEX_FILE;
use crate::util::fs::{copy_dir_all, remove_dir_if_exists};

/// Copy of the destination taken before an export attempt.
#[derive(Debug)]
pub struct Backup {
  dest: PathBuf,
  path: PathBuf,
  present: bool,
}

/// A directory with an `index.html` can be served.
fn is_servable(dir: &Path) -> bool {
  dir.join(INDEX_FILE).is_file()
}

impl Backup {
  /// Copy `dest` to `backup_dir` if it exists.
  ///
  /// A backup left behind by an interrupted run is adopted instead when the
  /// destination cannot be served and the backup can: the run was cut off
  /// mid-restore or mid-write, and the backup is the last good export.
  /// Otherwise the leftover is removed first.
  pub fn create(dest: &Path, backup_dir: &Path) -> io::Result<Self> {
    if backup_dir.is_dir() {
      if !is_servable(dest) && is_servable(backup_dir) {
        warn!(
          dest = %dest.display(),
          backup = %backup_dir.display(),
          "destination incomplete, keeping backup from an interrupted run"
        );
        return Ok(Self {
          dest: dest.to_path_buf(),
          path: backup_dir.to_path_buf(),
          present: true,
        });
      }
      remove_dir_if_exists(backup_dir)?;
      warn!(path = %backup_dir.display(), "removed stale backup from an earlier run");
    }

    let present = dest.is_dir();
    if present {
      let stats = copy_dir_all(dest, backup_dir)?;
      info!(
        dest = %dest.display(),
        backup = %backup_dir.display(),
        files = stats.files,
        "backed up previous export"
      );
    } else {
      debug!(dest = %dest.display(), "no previous export to back up");
    }

    Ok(Self {
      dest: dest.to_path_buf(),
      path: backup_dir.to_path_buf(),
      present,
    })
  }

  pub fn exists(&self) -> bool {
    self.present
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Put the backup back in place of whatever the attempt left behind.
  pub fn restore(&mut self) -> io::Result<()> {
    remove_dir_if_exists(&self.dest)?;
    fs::rename(&self.path, &self.dest)?;
    self.present = false;
    info!(dest = %self.dest.display(), "restored previous export");
    Ok(())
  }

  /// Remove the backup directory, whether or not it was used.
  pub fn cleanup(self) -> io::Result<()> {
    if remove_dir_if_exists(&self.path)? {
      debug!(path = %self.path.display(), "removed backup");
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::digest_tree;
  use tempfile::TempDir;

  fn previous_export(dest: &Path) {
    fs::create_dir_all(dest.join("_next/static")).unwrap();
    fs::write(dest.join("index.html"), "<h1>v1</h1>").unwrap();
    fs::write(dest.join("_next/static/app.js"), "v1").unwrap();
  }

  #[test]
  fn create_and_restore_round_trip() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("_static");
    let backup_dir = temp.path().join("._static.backup");
    previous_export(&dest);
    let before = digest_tree(&dest).unwrap();

    let mut backup = Backup::create(&dest, &backup_dir).unwrap();
    assert!(backup.exists());
    assert!(dest.join("index.html").exists(), "destination stays in place");

    fs::remove_dir_all(&dest).unwrap();
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("partial.html"), "half").unwrap();

    backup.restore().unwrap();
    backup.cleanup().unwrap();

    assert_eq!(digest_tree(&dest).unwrap(), before);
    assert!(!backup_dir.exists());
  }

  #[test]
  fn no_destination_means_no_backup() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("_static");
    let backup_dir = temp.path().join("._static.backup");

    let backup = Backup::create(&dest, &backup_dir).unwrap();

    assert!(!backup.exists());
    assert!(!backup_dir.exists());
  }

  #[test]
  fn stale_backup_is_replaced() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("_static");
    let backup_dir = temp.path().join("._static.backup");
    previous_export(&dest);
    fs::create_dir_all(&backup_dir).unwrap();
    fs::write(backup_dir.join("leftover.html"), "crashed run").unwrap();

    let backup = Backup::create(&dest, &backup_dir).unwrap();

    assert!(!backup.path().join("leftover.html").exists());
    assert!(backup.path().join("index.html").exists());
    backup.cleanup().unwrap();
    assert!(!backup_dir.exists());
  }

  #[test]
  fn leftover_backup_is_adopted_when_destination_is_gone() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("_static");
    let backup_dir = temp.path().join("._static.backup");
    previous_export(&backup_dir);
    let before = digest_tree(&backup_dir).unwrap();

    let mut backup = Backup::create(&dest, &backup_dir).unwrap();

    assert!(backup.exists());
    assert_eq!(digest_tree(backup.path()).unwrap(), before);

    backup.restore().unwrap();
    assert_eq!(digest_tree(&dest).unwrap(), before);
  }

  #[test]
  fn leftover_backup_wins_over_half_written_destination() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("_static");
    let backup_dir = temp.path().join("._static.backup");
    previous_export(&backup_dir);
    fs::create_dir_all(dest.join("_next/static")).unwrap();
    fs::write(dest.join("_next/static/app.js"), "v2, no pages yet").unwrap();

    let backup = Backup::create(&dest, &backup_dir).unwrap();

    assert!(backup.exists());
    assert_eq!(
      fs::read_to_string(backup.path().join("_next/static/app.js")).unwrap(),
      "v1",
      "backup must not be overwritten by the half-written destination"
    );
  }
}
