//! Test utilities for snapex-lib.
//!
//! Helpers for tests that spawn stand-in server processes or need a local
//! port nobody is listening on.

use std::path::Path;
use std::time::Duration;

use crate::config::{CommandLine, ExportConfig};

/// A port that was free a moment ago. Connections to it are refused.
pub fn unused_port() -> u16 {
  let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
  listener.local_addr().unwrap().port()
}

/// Split `host:port` as returned by `mockito::Server::host_with_port`.
pub fn split_host_port(host_with_port: &str) -> (String, u16) {
  let (host, port) = host_with_port.rsplit_once(':').unwrap();
  (host.to_string(), port.parse().unwrap())
}

/// A long-lived process that never binds a port.
#[cfg(unix)]
pub fn sleeper() -> CommandLine {
  CommandLine::new("sleep", &["30"])
}

/// A process that exits immediately with `code`.
#[cfg(unix)]
pub fn exits_with(code: i32) -> CommandLine {
  CommandLine::new("/bin/sh", &["-c", &format!("exit {}", code)])
}

/// Whether a process with this pid still exists and is not a zombie.
///
/// Background children of a killed server are reparented, and may linger
/// as zombies until their new parent reaps them.
#[cfg(unix)]
pub fn is_running(pid: u32) -> bool {
  use nix::sys::signal::kill;
  use nix::unistd::Pid;

  if kill(Pid::from_raw(pid as i32), None).is_err() {
    return false;
  }
  match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
    // state is the first field after the parenthesized command name
    Ok(stat) => stat
      .rsplit_once(')')
      .is_none_or(|(_, rest)| !rest.trim_start().starts_with('Z')),
    Err(_) => true,
  }
}

/// Poll until `pid` is gone. Signals are delivered asynchronously.
#[cfg(unix)]
pub async fn stopped_within(pid: u32, timeout: Duration) -> bool {
  let deadline = tokio::time::Instant::now() + timeout;
  while is_running(pid) {
    if tokio::time::Instant::now() >= deadline {
      return false;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  true
}

/// Config that skips the build, runs `server` and probes `host:port`,
/// with a readiness budget small enough for tests.
pub fn fast_config(root: &Path, server: CommandLine, host: &str, port: u16) -> ExportConfig {
  let mut config = ExportConfig::new(root);
  config.copy_only = true;
  config.server_command = Some(server);
  config.host = host.to_string();
  config.port = Some(port);
  config.readiness.retries = 10;
  config.readiness.delay = Duration::from_millis(50);
  config.readiness.probe_timeout = Duration::from_millis(500);
  config.capture.fetch_timeout = Duration::from_secs(5);
  config.shutdown_grace = Duration::from_secs(2);
  config
}
