//! SHA256 digests of captured pages and whole export trees.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

/// Lowercase hex SHA256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
  pub fn of(data: &[u8]) -> Self {
    Self::finish(Sha256::new_with_prefix(data))
  }

  /// First 12 hex digits, enough to tell two exports apart at a glance.
  pub fn short(&self) -> &str {
    &self.0[..self.0.len().min(12)]
  }

  fn finish(hasher: Sha256) -> Self {
    Self(format!("{:x}", hasher.finalize()))
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Fingerprint of an export directory.
///
/// Two exports with the same digest serve the same bytes at the same paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeDigest {
  pub hash: ContentHash,
  /// Regular files, symlinks not included.
  pub files: u64,
  pub bytes: u64,
}

#[derive(Debug, Error)]
pub enum DigestError {
  #[error("failed to walk {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Digest every entry below `root` in sorted order.
///
/// Each entry contributes one line: its kind, its `/`-separated relative
/// path and, for files and symlinks, the hash of its contents or target.
/// Timestamps and permissions are ignored.
pub fn digest_tree(root: &Path) -> Result<TreeDigest, DigestError> {
  let mut tree = Sha256::new();
  let mut files = 0;
  let mut bytes = 0;

  for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
    let entry = entry.map_err(|source| DigestError::Walk {
      path: root.to_path_buf(),
      source,
    })?;
    let path = entry.path();
    let read_err = |source| DigestError::Read {
      path: path.to_path_buf(),
      source,
    };
    let rel = relative_key(root, path);
    let file_type = entry.file_type();

    let line = if file_type.is_symlink() {
      let target = fs::read_link(path).map_err(read_err)?;
      format!("link {} {}", rel, ContentHash::of(target.to_string_lossy().as_bytes()))
    } else if file_type.is_dir() {
      format!("dir {}", rel)
    } else {
      let mut contents = Sha256::new();
      bytes += io::copy(&mut File::open(path).map_err(read_err)?, &mut contents).map_err(read_err)?;
      files += 1;
      format!("file {} {}", rel, ContentHash::finish(contents))
    };

    tree.update(line.as_bytes());
    tree.update(b"\n");
  }

  Ok(TreeDigest {
    hash: ContentHash::finish(tree),
    files,
    bytes,
  })
}

fn relative_key(root: &Path, path: &Path) -> String {
  let rel = path.strip_prefix(root).unwrap_or(path);
  rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  fn export(dir: &Path, index: &str) {
    fs::create_dir_all(dir.join("_next/static")).unwrap();
    fs::write(dir.join("index.html"), index).unwrap();
    fs::write(dir.join("_next/static/app.js"), "app()").unwrap();
  }

  #[test]
  fn identical_exports_share_a_digest() {
    let temp = tempdir().unwrap();
    export(&temp.path().join("a"), "<h1>home</h1>");
    export(&temp.path().join("b"), "<h1>home</h1>");

    let a = digest_tree(&temp.path().join("a")).unwrap();
    let b = digest_tree(&temp.path().join("b")).unwrap();

    assert_eq!(a, b);
    assert_eq!(a.hash.0.len(), 64);
    assert_eq!(a.files, 2);
    assert_eq!(a.bytes, 13 + 5);
  }

  #[test]
  fn page_content_changes_digest() {
    let temp = tempdir().unwrap();
    export(temp.path(), "<h1>v1</h1>");
    let before = digest_tree(temp.path()).unwrap();

    fs::write(temp.path().join("index.html"), "<h1>v2</h1>").unwrap();

    assert_ne!(digest_tree(temp.path()).unwrap().hash, before.hash);
  }

  #[test]
  fn moving_a_file_changes_digest() {
    let temp = tempdir().unwrap();
    let flat = temp.path().join("flat");
    fs::create_dir_all(&flat).unwrap();
    fs::write(flat.join("app.js"), "app()").unwrap();

    let nested = temp.path().join("nested");
    fs::create_dir_all(nested.join("_next")).unwrap();
    fs::write(nested.join("_next/app.js"), "app()").unwrap();

    assert_ne!(digest_tree(&flat).unwrap().hash, digest_tree(&nested).unwrap().hash);
  }

  #[cfg(unix)]
  #[test]
  fn symlink_target_is_part_of_digest() {
    let temp = tempdir().unwrap();
    export(temp.path(), "<h1>home</h1>");
    std::os::unix::fs::symlink("index.html", temp.path().join("home.html")).unwrap();
    let before = digest_tree(temp.path()).unwrap();
    assert_eq!(before.files, 2, "symlinks are not counted as files");

    fs::remove_file(temp.path().join("home.html")).unwrap();
    std::os::unix::fs::symlink("_next/static/app.js", temp.path().join("home.html")).unwrap();

    assert_ne!(digest_tree(temp.path()).unwrap().hash, before.hash);
  }

  #[test]
  fn page_hash_is_plain_sha256() {
    let hash = ContentHash::of(b"hello world");
    assert_eq!(hash.0, "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9");
    assert_eq!(hash.short(), "b94d27b9934d");
    assert_eq!(ContentHash(String::new()).short(), "");
  }
}
