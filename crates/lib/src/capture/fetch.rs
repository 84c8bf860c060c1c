//! Page fetching with bounded, explicit redirect handling.
//!
//! reqwest's own redirect support is disabled: redirects from the temporary
//! server frequently point at `https://localhost/...` (the app believes it
//! runs behind a TLS proxy), which has to be rewritten back to the local
//! plain-http address before it can be followed.

use std::time::Duration;

use reqwest::header::LOCATION;
use reqwest::{Response, StatusCode};
use thiserror::Error;
use tracing::debug;
use url::{Host, Url};

use crate::config::CaptureConfig;

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("failed to build http client: {0}")]
  Client(#[source] reqwest::Error),

  #[error("request to {url} failed: {source}")]
  Request {
    url: Url,
    #[source]
    source: reqwest::Error,
  },

  #[error("request to {url} timed out after {timeout:?}")]
  Timeout { url: Url, timeout: Duration },

  #[error("too many redirects fetching {start} (limit {limit}, last location {last})")]
  TooManyRedirects { start: Url, last: Url, limit: usize },

  #[error("invalid redirect location {location:?} from {url}")]
  InvalidLocation { url: Url, location: String },

  #[error("unexpected HTTP status {status} from {url}")]
  UnexpectedStatus { url: Url, status: StatusCode },
}

/// A fully resolved response.
#[derive(Debug, Clone)]
pub struct FetchedPage {
  /// The URL originally asked for.
  pub requested: Url,
  /// The URL that produced the final response.
  pub url: Url,
  pub status: StatusCode,
  /// Raw response bytes, whatever charset the page declares.
  pub body: Vec<u8>,
  /// Redirects followed to get here.
  pub redirects: usize,
}

enum RedirectStep {
  Resolved(Response),
  Follow(Url),
}

/// Position in a redirect chain.
struct RedirectState {
  start: Url,
  current: Url,
  followed: usize,
}

impl RedirectState {
  fn new(start: Url) -> Self {
    Self {
      current: start.clone(),
      start,
      followed: 0,
    }
  }

  fn step(&self, response: Response) -> Result<RedirectStep, FetchError> {
    if !response.status().is_redirection() {
      return Ok(RedirectStep::Resolved(response));
    }

    let location = response.headers().get(LOCATION).map(|value| {
      value
        .to_str()
        .map(str::to_string)
        .map_err(|_| String::from_utf8_lossy(value.as_bytes()).to_string())
    });

    match location {
      None => Ok(RedirectStep::Resolved(response)),
      Some(Err(raw)) => Err(FetchError::InvalidLocation {
        url: self.current.clone(),
        location: raw,
      }),
      Some(Ok(location)) => Ok(RedirectStep::Follow(resolve_location(&self.current, &location)?)),
    }
  }

  fn advance(&mut self, next: Url, limit: usize) -> Result<(), FetchError> {
    if self.followed >= limit {
      return Err(FetchError::TooManyRedirects {
        start: self.start.clone(),
        last: next,
        limit,
      });
    }
    debug!(from = %self.current, to = %next, hop = self.followed + 1, "following redirect");
    self.followed += 1;
    self.current = next;
    Ok(())
  }
}

/// Resolve a `Location` header against the URL that returned it.
///
/// Relative locations are joined onto `current`. Absolute locations that
/// point at a loopback host are forced to plain http on `current`'s host and
/// port.
pub fn resolve_location(current: &Url, location: &str) -> Result<Url, FetchError> {
  let invalid = || FetchError::InvalidLocation {
    url: current.clone(),
    location: location.to_string(),
  };

  let mut next = current.join(location).map_err(|_| invalid())?;

  if is_loopback(&next) {
    next.set_scheme("http").map_err(|_| invalid())?;
    next.set_host(current.host_str()).map_err(|_| invalid())?;
    next.set_port(current.port()).map_err(|_| invalid())?;
  }

  Ok(next)
}

fn is_loopback(url: &Url) -> bool {
  match url.host() {
    Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
    Some(Host::Ipv4(ip)) => ip.is_loopback(),
    Some(Host::Ipv6(ip)) => ip.is_loopback(),
    None => false,
  }
}

pub struct PageFetcher {
  client: reqwest::Client,
  max_redirects: usize,
  timeout: Duration,
}

impl PageFetcher {
  pub fn new(capture: &CaptureConfig) -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .redirect(reqwest::redirect::Policy::none())
      .timeout(capture.fetch_timeout)
      .no_proxy()
      .build()
      .map_err(FetchError::Client)?;

    Ok(Self {
      client,
      max_redirects: capture.max_redirects,
      timeout: capture.fetch_timeout,
    })
  }

  /// GET `url`, following up to `max_redirects` redirects.
  ///
  /// Any final status is returned as-is.
  pub async fn fetch(&self, url: Url) -> Result<FetchedPage, FetchError> {
    let mut state = RedirectState::new(url);

    loop {
      let response = self
        .client
        .get(state.current.clone())
        .send()
        .await
        .map_err(|e| self.request_error(&state.current, e))?;

      match state.step(response)? {
        RedirectStep::Resolved(response) => {
          let status = response.status();
          let body = response
            .bytes()
            .await
            .map_err(|e| self.request_error(&state.current, e))?
            .to_vec();
          return Ok(FetchedPage {
            requested: state.start,
            url: state.current,
            status,
            body,
            redirects: state.followed,
          });
        }
        RedirectStep::Follow(next) => state.advance(next, self.max_redirects)?,
      }
    }
  }

  /// Like [`fetch`](Self::fetch), but only a 2xx or 404 final response is
  /// accepted.
  pub async fn fetch_page(&self, url: Url) -> Result<FetchedPage, FetchError> {
    let page = self.fetch(url).await?;
    if page.status.is_success() || page.status == StatusCode::NOT_FOUND {
      debug!(url = %page.url, status = page.status.as_u16(), bytes = page.body.len(), "fetched page");
      Ok(page)
    } else {
      Err(FetchError::UnexpectedStatus {
        url: page.url,
        status: page.status,
      })
    }
  }

  fn request_error(&self, url: &Url, source: reqwest::Error) -> FetchError {
    if source.is_timeout() {
      FetchError::Timeout {
        url: url.clone(),
        timeout: self.timeout,
      }
    } else {
      FetchError::Request {
        url: url.clone(),
        source: source.without_url(),
      }
    }
  }
}
