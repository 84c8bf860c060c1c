//! Capture rendered pages from the running server and write them out.
//!
//! - [`fetch`] is the HTTP side: one GET per page with explicit redirects
//! - [`materialize`] turns captured pages and asset trees into the export

pub mod fetch;
pub mod materialize;

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::config::CaptureConfig;
use crate::consts::{INDEX_FILE, NOT_FOUND_FILE};

pub use fetch::{FetchError, FetchedPage, PageFetcher};
pub use materialize::{MaterializeError, MaterializeReport, materialize};

#[derive(Debug, Error)]
pub enum CaptureError {
  #[error("failed to capture {route}: {source}")]
  Fetch {
    route: String,
    #[source]
    source: FetchError,
  },

  #[error("route {0:?} cannot be written inside the export")]
  InvalidRoute(String),
}

/// A page fetched from the server, with the file it will be written to.
#[derive(Debug, Clone)]
pub struct CapturedPage {
  pub route: String,
  /// Relative to the export destination.
  pub file: PathBuf,
  pub page: FetchedPage,
}

/// Output path for `route`, relative to the destination.
///
/// `/` is `index.html`, `/pricing` is `pricing/index.html`.
pub fn route_file(route: &str) -> Result<PathBuf, CaptureError> {
  let path = route.split(['?', '#']).next().unwrap_or_default();
  let mut file = PathBuf::new();

  for component in Path::new(path.trim_start_matches('/')).components() {
    match component {
      Component::Normal(part) => file.push(part),
      Component::CurDir => {}
      _ => return Err(CaptureError::InvalidRoute(route.to_string())),
    }
  }

  file.push(INDEX_FILE);
  Ok(file)
}

/// Absolute URL of `route` on the local server.
///
/// Only paths starting with a single `/` are accepted, and the result must
/// stay on `base`'s origin, so a route can never pull a page from another
/// host into the export.
pub fn route_url(base: &Url, route: &str) -> Result<Url, CaptureError> {
  let invalid = || CaptureError::InvalidRoute(route.to_string());
  if !route.starts_with('/') || route.starts_with("//") || route.starts_with("/\\") {
    return Err(invalid());
  }
  let url = base.join(route).map_err(|_| invalid())?;
  if url.origin() != base.origin() {
    return Err(invalid());
  }
  Ok(url)
}

/// Fetch the root page, the not-found page and every extra route.
///
/// Every route is checked before the first request. Stops at the first
/// failure.
pub async fn capture_pages(
  fetcher: &PageFetcher,
  base: &Url,
  capture: &CaptureConfig,
) -> Result<Vec<CapturedPage>, CaptureError> {
  let mut targets = vec![
    (
      capture.root_path.clone(),
      PathBuf::from(INDEX_FILE),
      route_url(base, &capture.root_path)?,
    ),
    (
      capture.not_found_path.clone(),
      PathBuf::from(NOT_FOUND_FILE),
      route_url(base, &capture.not_found_path)?,
    ),
  ];

  for route in &capture.routes {
    let url = route_url(base, route)?;
    let file = route_file(route)?;
    if targets.iter().any(|(_, existing, _)| *existing == file) {
      debug!(route = %route, file = %file.display(), "route already captured, skipping");
      continue;
    }
    targets.push((route.clone(), file, url));
  }

  let mut pages = Vec::with_capacity(targets.len());
  for (route, file, url) in targets {
    let page = fetcher
      .fetch_page(url)
      .await
      .map_err(|source| CaptureError::Fetch {
        route: route.clone(),
        source,
      })?;

    info!(
      route = %route,
      status = page.status.as_u16(),
      redirects = page.redirects,
      bytes = page.body.len(),
      "captured page"
    );
    pages.push(CapturedPage { route, file, page });
  }

  Ok(pages)
}
