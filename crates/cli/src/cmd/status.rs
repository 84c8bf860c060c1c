//! Status command implementation.
//!
//! Reports what the export destination holds without touching it.

use anyhow::{Context, Result};
use tracing::debug;

use snapex_lib::inspect::{ExportStatus, inspect};

use super::load_config;
use crate::Target;
use crate::output::{Details, OutputFormat, Tone, emit_json, headline, human_bytes};

pub fn cmd_status(target: &Target, output: OutputFormat) -> Result<()> {
  let config = load_config(target)?;
  let status = inspect(&config.destination).context("Failed to inspect export destination")?;
  debug!(servable = status.is_servable(), files = status.files, "inspected destination");

  if output.is_json() {
    return emit_json(&status);
  }

  if !status.exists {
    headline(
      Tone::Note,
      &format!(
        "No export found at {}. Run 'snapex export' to create one.",
        status.destination.display()
      ),
    );
    return Ok(());
  }

  headline(tone(&status), title(&status));
  details(&status).print();
  Ok(())
}

fn tone(status: &ExportStatus) -> Tone {
  if status.is_servable() {
    Tone::Done
  } else if status.is_placeholder {
    Tone::Degraded
  } else {
    Tone::Failed
  }
}

fn title(status: &ExportStatus) -> &'static str {
  match tone(status) {
    Tone::Done => "Snapshot ready",
    Tone::Degraded => "Placeholder page is being served",
    _ => "Export has no index.html",
  }
}

fn details(status: &ExportStatus) -> Details {
  let present = |yes: bool| if yes { "yes" } else { "missing" };
  let mut details = Details::default();
  details
    .row("Destination", status.destination.display().to_string())
    .row("index.html", present(status.has_index))
    .row("404.html", present(status.has_not_found))
    .row("Health marker", present(status.has_health_marker))
    .row("Files", format!("{} ({})", status.files, human_bytes(status.bytes)));
  if let Some(hash) = &status.tree_hash {
    details.row("Tree hash", hash.short());
  }
  details
}
