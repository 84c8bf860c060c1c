//! Minimal export written when there is nothing better to serve.

use std::path::Path;

use tracing::info;

use crate::capture::MaterializeError;
use crate::capture::materialize::{reset_dir, write_file};
use crate::consts::{HEALTH_MARKER, HEALTH_MARKER_BODY, INDEX_FILE, NOT_FOUND_FILE, PLACEHOLDER_MARKER};

fn page(title: &str, message: &str) -> String {
  format!(
    r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<meta name="generator" content="{marker}">
<title>{title}</title>
</head>
<body>
<main>
<h1>{title}</h1>
<p>{message}</p>
</main>
</body>
</html>
"#,
    marker = PLACEHOLDER_MARKER,
    title = title,
    message = message,
  )
}

/// Replace `dest` with a "snapshot unavailable" notice.
pub fn write(dest: &Path) -> Result<(), MaterializeError> {
  reset_dir(dest)?;

  write_file(
    &dest.join(INDEX_FILE),
    page(
      "Snapshot unavailable",
      "A static snapshot of this site could not be generated. Please check back shortly.",
    )
    .as_bytes(),
  )?;
  write_file(
    &dest.join(NOT_FOUND_FILE),
    page("Page not found", "The requested page is not part of this snapshot.").as_bytes(),
  )?;
  write_file(&dest.join(HEALTH_MARKER), HEALTH_MARKER_BODY.as_bytes())?;

  info!(dest = %dest.display(), "wrote placeholder export");
  Ok(())
}
