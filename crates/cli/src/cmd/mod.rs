mod export;
mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use snapex_lib::config::ExportConfig;

use crate::Target;

pub use export::cmd_export;
pub use status::cmd_status;

/// Resolve the project root and load the config for it from the environment.
///
/// `--dest` overrides `STATIC_EXPORT_DEST`.
fn load_config(target: &Target) -> Result<ExportConfig> {
  let root = match &target.project_root {
    Some(root) => root.clone(),
    None => std::env::current_dir().context("Failed to determine current directory")?,
  };
  let root: PathBuf =
    dunce::canonicalize(&root).with_context(|| format!("Project root not found: {}", root.display()))?;

  let config = ExportConfig::from_env(root).context("Invalid export configuration")?;
  let config = match &target.dest {
    Some(dest) => config.with_destination(dest),
    None => config,
  };
  debug!(
    root = %config.project_root.display(),
    dest = %config.destination.display(),
    "resolved project"
  );
  Ok(config)
}
