//! Server entry point resolution.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{CommandLine, ExportConfig};
use crate::consts::{STANDALONE_DIR, STANDALONE_ENTRY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
  /// Explicit command from the config.
  Custom,
  /// `node server.js` from the standalone build output.
  Standalone,
  /// `npm run start`, used when no standalone bundle exists.
  StartScript,
}

/// What to spawn, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
  pub kind: EntryKind,
  pub command: CommandLine,
  pub cwd: PathBuf,
}

impl ServerEntry {
  pub fn resolve(config: &ExportConfig) -> Self {
    if let Some(command) = &config.server_command {
      info!(cmd = %command, "using configured server command");
      return Self {
        kind: EntryKind::Custom,
        command: command.clone(),
        cwd: config.project_root.clone(),
      };
    }

    let standalone_dir = config.project_root.join(STANDALONE_DIR);
    let script = standalone_dir.join(STANDALONE_ENTRY);
    if script.is_file() {
      info!(script = %script.display(), "using standalone server");
      return Self {
        kind: EntryKind::Standalone,
        command: CommandLine::new("node", &[STANDALONE_ENTRY]),
        cwd: standalone_dir,
      };
    }

    warn!(
      expected = %script.display(),
      "standalone server not found, falling back to `npm run start`"
    );
    Self {
      kind: EntryKind::StartScript,
      command: CommandLine::new(npm_program(), &["run", "start"]),
      cwd: config.project_root.clone(),
    }
  }
}

fn npm_program() -> &'static str {
  if cfg!(windows) { "npm.cmd" } else { "npm" }
}
