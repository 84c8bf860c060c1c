//! One export at a time per project.
//!
//! An export wipes its destination and parks a backup next to it, so two
//! runs against the same project would destroy each other's work. Each run
//! takes a non-blocking exclusive lock on `<project_root>/.snapex.lock` and
//! records who holds it, so a second run can say what it is waiting on.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ExportConfig;
use crate::consts::LOCK_FILENAME;

/// Who holds the lock, stored as JSON in the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub pid: u32,
  pub started_at_unix: u64,
  pub destination: PathBuf,
  pub command: String,
}

impl LockHolder {
  fn current(config: &ExportConfig, command: &str) -> Self {
    Self {
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default(),
      destination: config.destination.clone(),
      command: command.to_string(),
    }
  }
}

fn describe_holder(holder: &Option<LockHolder>) -> String {
  match holder {
    Some(h) => format!(
      "`{}` (pid {}) writing {} since unix time {}",
      h.command,
      h.pid,
      h.destination.display(),
      h.started_at_unix
    ),
    None => "holder unknown".to_string(),
  }
}

#[derive(Debug, Error)]
pub enum ExportLockError {
  #[error(
    "another export is running: {}\nremove {} if no snapex process is alive",
    describe_holder(.holder),
    .lock_path.display()
  )]
  Busy {
    lock_path: PathBuf,
    holder: Option<LockHolder>,
  },

  #[error("failed to lock {}: {source}", .lock_path.display())]
  Io {
    lock_path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Exclusive right to export `project_root`. Released when dropped.
#[derive(Debug)]
pub struct ExportLock {
  file: File,
  path: PathBuf,
}

impl ExportLock {
  pub fn acquire(config: &ExportConfig, command: &str) -> Result<Self, ExportLockError> {
    let path = config.project_root.join(LOCK_FILENAME);
    let io_err = |source| ExportLockError::Io {
      lock_path: path.clone(),
      source,
    };

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(io_err)?;

    match try_lock_exclusive(&file) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
        return Err(ExportLockError::Busy {
          holder: read_holder(&file).ok(),
          lock_path: path,
        });
      }
      Err(e) => return Err(io_err(e)),
    }

    let holder = LockHolder::current(config, command);
    let json = serde_json::to_vec_pretty(&holder).map_err(|e| io_err(io::Error::other(e)))?;
    (&file).set_len(0).map_err(io_err)?;
    (&file).rewind().map_err(io_err)?;
    (&file).write_all(&json).map_err(io_err)?;
    debug!(path = %path.display(), pid = holder.pid, "acquired export lock");

    Ok(Self { file, path })
  }

  /// Read back through the held handle, which also works on Windows where
  /// the locked range cannot be opened a second time.
  pub fn holder(&self) -> io::Result<LockHolder> {
    read_holder(&self.file)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

fn read_holder(mut file: &File) -> io::Result<LockHolder> {
  file.rewind()?;
  let mut json = String::new();
  file.read_to_string(&mut json)?;
  serde_json::from_str(&json).map_err(io::Error::other)
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};

  flock(file, FlockOperation::NonBlockingLockExclusive).map_err(io::Error::from)
}

#[cfg(windows)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};
  use windows_sys::Win32::System::IO::OVERLAPPED;

  // SAFETY: the handle is owned by `file` and outlives the call; a zeroed
  // OVERLAPPED locks from offset 0.
  let locked = unsafe {
    let mut overlapped: OVERLAPPED = std::mem::zeroed();
    LockFileEx(
      file.as_raw_handle() as HANDLE,
      LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
      0,
      1,
      0,
      &mut overlapped,
    )
  };
  if locked != 0 {
    return Ok(());
  }
  // ERROR_LOCK_VIOLATION does not map to WouldBlock on its own
  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(33) {
    Err(io::Error::from(io::ErrorKind::WouldBlock))
  } else {
    Err(err)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn holder_is_recorded() {
    let temp = TempDir::new().unwrap();
    let config = ExportConfig::new(temp.path());

    let lock = ExportLock::acquire(&config, "snapex export").unwrap();
    let holder = lock.holder().unwrap();

    assert_eq!(lock.path(), temp.path().join(".snapex.lock"));
    assert_eq!(holder.command, "snapex export");
    assert_eq!(holder.pid, std::process::id());
    assert_eq!(holder.destination, config.destination);
  }

  #[cfg(unix)]
  #[test]
  fn second_export_names_the_running_one() {
    let temp = TempDir::new().unwrap();
    let first = ExportConfig::new(temp.path()).with_destination("public_html");
    let _held = ExportLock::acquire(&first, "snapex export --copy-only").unwrap();

    let err = ExportLock::acquire(&ExportConfig::new(temp.path()), "snapex export").unwrap_err();

    match &err {
      ExportLockError::Busy {
        holder: Some(holder), ..
      } => {
        assert_eq!(holder.command, "snapex export --copy-only");
        assert!(holder.destination.ends_with("public_html"));
      }
      other => panic!("expected Busy with holder, got {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("another export is running"), "{message}");
    assert!(message.contains(".snapex.lock"), "{message}");
  }

  #[test]
  fn released_when_dropped() {
    let temp = TempDir::new().unwrap();
    let config = ExportConfig::new(temp.path());
    drop(ExportLock::acquire(&config, "first").unwrap());

    let lock = ExportLock::acquire(&config, "second").unwrap();

    assert_eq!(lock.holder().unwrap().command, "second");
  }

  #[test]
  fn garbage_lock_file_is_overwritten() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(".snapex.lock"), "not json, and longer than the new contents ...").unwrap();
    let config = ExportConfig::new(temp.path());

    let lock = ExportLock::acquire(&config, "snapex export").unwrap();

    assert_eq!(lock.holder().unwrap().command, "snapex export");
  }
}
