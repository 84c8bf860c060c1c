//! Spawning the server and waiting for it to answer.

use std::net::TcpListener;

use reqwest::StatusCode;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use url::Url;

use super::{ServerEntry, ServerError, ServerGuard};
use crate::config::{ExportConfig, ReadinessConfig};

/// A server that passed its readiness probe.
#[derive(Debug)]
pub struct RunningServer {
  pub guard: ServerGuard,
  /// `http://host:port/` of the server.
  pub base_url: Url,
  /// Probe attempts it took to see the server ready.
  pub attempts: u32,
}

/// Ask the OS for a free port on `host`.
pub fn free_port(host: &str) -> Result<u16, ServerError> {
  let port_err = |source| ServerError::Port {
    host: host.to_string(),
    source,
  };
  let listener = TcpListener::bind((host, 0)).map_err(port_err)?;
  Ok(listener.local_addr().map_err(port_err)?.port())
}

pub fn base_url(host: &str, port: u16) -> Result<Url, ServerError> {
  let host = if host.contains(':') && !host.starts_with('[') {
    format!("[{}]", host)
  } else {
    host.to_string()
  };
  let raw = format!("http://{}:{}/", host, port);
  Url::parse(&raw).map_err(|_| ServerError::Address(raw))
}

/// Spawn `entry` on `port` and wait until it is ready.
///
/// On any failure the process is stopped before the error is returned.
pub async fn launch(config: &ExportConfig, entry: &ServerEntry, port: u16) -> Result<RunningServer, ServerError> {
  let base_url = base_url(&config.host, port)?;
  let env = config.server_env(port);
  let mut guard = ServerGuard::spawn(entry, &env, config.shutdown_grace)?;

  match wait_ready(&mut guard, &base_url, &config.readiness).await {
    Ok(attempts) => Ok(RunningServer {
      guard,
      base_url,
      attempts,
    }),
    Err(e) => {
      if let Err(shutdown_err) = guard.shutdown().await {
        warn!(error = %shutdown_err, "failed to stop server after launch failure");
      }
      Err(e)
    }
  }
}

/// Poll the readiness path until the policy accepts a response.
///
/// The child is checked before every probe so that a crashed server is
/// reported with its exit status rather than as a timeout. The whole wait
/// ends at `budget() + probe_timeout`, however slowly the server answers.
/// Returns the number of attempts used.
pub async fn wait_ready(
  guard: &mut ServerGuard,
  base_url: &Url,
  readiness: &ReadinessConfig,
) -> Result<u32, ServerError> {
  let probe_url = base_url
    .join(&readiness.path)
    .map_err(|_| ServerError::Address(format!("{}{}", base_url, readiness.path)))?;

  let client = reqwest::Client::builder()
    .redirect(reqwest::redirect::Policy::none())
    .no_proxy()
    .build()?;

  let deadline = Instant::now() + readiness.budget() + readiness.probe_timeout;
  let mut last = "no probe attempted".to_string();
  let mut attempts = 0;

  while attempts < readiness.retries {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
      debug!(attempts, "readiness deadline reached");
      break;
    }
    if let Some(status) = guard.try_wait()? {
      return Err(ServerError::ExitedEarly { status });
    }
    attempts += 1;

    let probe = client
      .get(probe_url.clone())
      .timeout(remaining.min(readiness.probe_timeout))
      .send()
      .await;
    match probe {
      Ok(response) => {
        let status = response.status();
        if readiness.policy.accepts(status) {
          if status == StatusCode::NOT_FOUND {
            debug!(url = %probe_url, "health path returned 404, treating server as ready");
          }
          info!(attempt = attempts, status = status.as_u16(), "server ready");
          return Ok(attempts);
        }
        last = format!("HTTP {}", status);
      }
      Err(e) => last = e.without_url().to_string(),
    }

    debug!(attempt = attempts, last = %last, "server not ready yet");
    if attempts < readiness.retries {
      sleep(readiness.delay.min(deadline.saturating_duration_since(Instant::now()))).await;
    }
  }

  if let Some(status) = guard.try_wait()? {
    return Err(ServerError::ExitedEarly { status });
  }

  Err(ServerError::NotReady { attempts, last })
}
