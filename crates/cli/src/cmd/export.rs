//! Implementation of the `snapex export` command.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use snapex_lib::config::{CommandLine, ExportConfig, ReadinessPolicy};
use snapex_lib::export::{ExportOutcome, ExportSummary, run_export};
use snapex_lib::export_lock::ExportLock;
use snapex_lib::server::EntryKind;

use super::load_config;
use crate::output::{Details, OutputFormat, Tone, emit_json, headline, human_bytes, human_elapsed};
use crate::{ExportArgs, Target};

/// Run one export under the project's export lock.
///
/// Degraded outcomes (previous snapshot restored, placeholder written) are
/// reported as warnings and still exit successfully.
pub fn cmd_export(target: &Target, args: &ExportArgs, output: OutputFormat) -> Result<()> {
  let mut config = load_config(target)?;
  apply_args(&mut config, args);

  let command = std::env::args().collect::<Vec<_>>().join(" ");
  let lock = ExportLock::acquire(&config, &command).context("Failed to acquire export lock")?;
  debug!(lock = %lock.path().display(), "holding export lock");

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let summary = rt.block_on(run_export(&config)).context("Export failed")?;
  drop(lock);
  info!(
    outcome = if summary.outcome.is_degraded() { "degraded" } else { "exported" },
    duration_ms = summary.duration_ms,
    "export finished"
  );

  if output.is_json() {
    return emit_json(&summary);
  }

  println!();
  let (tone, title, details) = describe(&summary);
  headline(tone, title);
  details.print();
  if let ExportOutcome::Exported { report, .. } = &summary.outcome {
    for missing in &report.missing_assets {
      headline(Tone::Degraded, &format!("Asset directory missing: {}", missing.display()));
    }
  }

  Ok(())
}

/// Headline and detail rows for a finished export.
fn describe(summary: &ExportSummary) -> (Tone, &'static str, Details) {
  let mut details = Details::default();
  details.row("Destination", summary.destination.display().to_string());

  let (tone, title) = match &summary.outcome {
    ExportOutcome::Exported {
      built,
      server,
      port,
      ready_attempts,
      report,
    } => {
      details
        .row("Build", if *built { "ran" } else { "skipped (copy-only)" })
        .row(
          "Server",
          format!("{} on port {}, ready after {} probe(s)", server_label(*server), port, ready_attempts),
        );
      for page in &report.pages {
        details.row(
          page.file.display().to_string(),
          format!("HTTP {}, {}, sha256 {}", page.status, human_bytes(page.bytes), page.sha256.short()),
        );
      }
      let (files, bytes) = report
        .assets
        .iter()
        .fold((0, 0), |(files, bytes), asset| (files + asset.files, bytes + asset.bytes));
      details.row("Assets", format!("{} file(s), {}", files, human_bytes(bytes)));
      (Tone::Done, "Export complete!")
    }
    ExportOutcome::RestoredBackup { reason } => {
      details.row("Reason", reason.as_str());
      (Tone::Degraded, "Export failed, previous snapshot kept")
    }
    ExportOutcome::Placeholder { reason } => {
      details.row("Reason", reason.as_str());
      (Tone::Degraded, "Export failed, placeholder page written")
    }
  };

  details.row("Duration", human_elapsed(summary.duration_ms));
  (tone, title, details)
}

/// Flags take precedence over the environment.
fn apply_args(config: &mut ExportConfig, args: &ExportArgs) {
  if args.copy_only {
    config.copy_only = true;
  }
  if let Some(port) = args.port {
    config.port = Some(port);
  }
  if let Some(path) = &args.health_path {
    config.readiness.path = path.clone();
  }
  if let Some(retries) = args.ready_retries {
    config.readiness.retries = retries;
  }
  if let Some(delay) = args.ready_delay {
    config.readiness.delay = delay;
  }
  if args.strict_readiness {
    config.readiness.policy = ReadinessPolicy::SuccessOnly;
  }
  config.capture.routes.extend(args.routes.iter().cloned());
  if let Some(cmd) = args.server_cmd.as_deref().and_then(CommandLine::parse) {
    config.server_command = Some(cmd);
  }
}

fn server_label(kind: EntryKind) -> &'static str {
  match kind {
    EntryKind::Custom => "custom command",
    EntryKind::Standalone => "standalone server.js",
    EntryKind::StartScript => "npm run start",
  }
}
