//! Rendering command results.
//!
//! A text result is a headline followed by aligned detail rows. Headlines
//! for degraded or failed results go to stderr, so they stay visible when
//! `--output json` keeps stdout for the JSON document. Logs always go to
//! stderr.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
  Done,
  Degraded,
  Failed,
  Note,
}

impl Tone {
  fn glyph(self) -> &'static str {
    match self {
      Tone::Done => "✓",
      Tone::Degraded => "⚠",
      Tone::Failed => "✗",
      Tone::Note => "•",
    }
  }

  fn on_stderr(self) -> bool {
    matches!(self, Tone::Degraded | Tone::Failed)
  }
}

pub fn headline(tone: Tone, message: &str) {
  let stream = if tone.on_stderr() { Stream::Stderr } else { Stream::Stdout };
  let glyph = tone.glyph();
  let glyph = match tone {
    Tone::Done => glyph.if_supports_color(stream, |g| g.green()).to_string(),
    Tone::Degraded => glyph.if_supports_color(stream, |g| g.yellow()).to_string(),
    Tone::Failed => glyph.if_supports_color(stream, |g| g.red()).to_string(),
    Tone::Note => glyph.if_supports_color(stream, |g| g.blue()).to_string(),
  };
  let line = format!("{} {}", glyph, message.if_supports_color(stream, |m| m.bold()));

  if tone.on_stderr() {
    eprintln!("{}", line);
  } else {
    println!("{}", line);
  }
}

/// Label and value rows under a headline, aligned on the longest label.
#[derive(Debug, Default)]
pub struct Details {
  rows: Vec<(String, String)>,
}

impl Details {
  pub fn row(&mut self, label: impl Into<String>, value: impl Into<String>) -> &mut Self {
    self.rows.push((label.into(), value.into()));
    self
  }

  /// Labels with their colon, padded to a shared column.
  fn padded(&self) -> impl Iterator<Item = (String, &str)> {
    let width = self.rows.iter().map(|(label, _)| label.chars().count() + 1).max().unwrap_or(0);
    self
      .rows
      .iter()
      .map(move |(label, value)| (format!("{:<width$}", format!("{}:", label)), value.as_str()))
  }

  #[cfg(test)]
  pub(crate) fn lines(&self) -> Vec<String> {
    self.padded().map(|(label, value)| format!("  {} {}", label, value)).collect()
  }

  pub fn print(&self) {
    for (label, value) in self.padded() {
      println!("  {} {}", label.if_supports_color(Stream::Stdout, |l| l.dimmed()), value);
    }
  }
}

/// Binary units, one decimal above a KiB.
pub fn human_bytes(bytes: u64) -> String {
  const UNITS: [&str; 3] = ["KiB", "MiB", "GiB"];
  if bytes < 1024 {
    return format!("{} B", bytes);
  }
  let mut size = bytes as f64 / 1024.0;
  let mut unit = UNITS[0];
  for next in &UNITS[1..] {
    if size < 1024.0 {
      break;
    }
    size /= 1024.0;
    unit = *next;
  }
  format!("{:.1} {}", size, unit)
}

/// Whole milliseconds, e.g. `2s 350ms`.
pub fn human_elapsed(millis: u64) -> String {
  humantime::format_duration(Duration::from_millis(millis)).to_string()
}

/// The whole result as one pretty JSON document on stdout.
pub fn emit_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize result as JSON")?;
  println!("{}", json);
  Ok(())
}
