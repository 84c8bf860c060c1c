//! Scoped ownership of the server child process.

use std::collections::BTreeMap;
use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::{ServerError, ServerEntry, describe_exit};

/// A running server process.
///
/// On unix the server leads its own process group, and every signal goes to
/// the whole group so that `npm` wrappers and shell scripts do not leave
/// their children behind.
///
/// Call [`ServerGuard::shutdown`] (or run work through [`with_server`]) to
/// stop it gracefully. Dropping the guard without shutting down still kills
/// the process group.
#[derive(Debug)]
pub struct ServerGuard {
  child: Child,
  pid: Option<u32>,
  grace: Duration,
}

impl ServerGuard {
  /// Spawn `entry` with `env` added to the inherited environment.
  pub fn spawn(entry: &ServerEntry, env: &BTreeMap<String, String>, grace: Duration) -> Result<Self, ServerError> {
    debug!(cmd = %entry.command, cwd = %entry.cwd.display(), "spawning server");

    let mut command = Command::new(&entry.command.program);
    command
      .args(&entry.command.args)
      .current_dir(&entry.cwd)
      .envs(env)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let child = command.spawn().map_err(|source| ServerError::Spawn {
      cmd: entry.command.to_string(),
      source,
    })?;

    let pid = child.id();
    info!(pid = ?pid, cmd = %entry.command, "server process started");

    Ok(Self { child, pid, grace })
  }

  /// OS process id, captured at spawn time.
  pub fn pid(&self) -> Option<u32> {
    self.pid
  }

  /// Returns the exit status if the process has already exited.
  pub fn try_wait(&mut self) -> Result<Option<ExitStatus>, ServerError> {
    Ok(self.child.try_wait()?)
  }

  /// Ask the server to stop, wait up to the grace period, then kill it.
  ///
  /// Always reaps the process before returning. Whatever is left of its
  /// process group afterwards is killed.
  pub async fn shutdown(mut self) -> Result<ExitStatus, ServerError> {
    if let Some(status) = self.child.try_wait()? {
      debug!(pid = ?self.pid, status = %describe_exit(&status), "server already exited");
      self.kill_group()?;
      return Ok(status);
    }

    self.terminate()?;

    let status = match tokio::time::timeout(self.grace, self.child.wait()).await {
      Ok(status) => status?,
      Err(_) => {
        warn!(pid = ?self.pid, grace_ms = self.grace.as_millis() as u64, "server ignored SIGTERM, killing");
        self.kill_group()?;
        self.child.wait().await?
      }
    };
    self.kill_group()?;

    info!(pid = ?self.pid, status = %describe_exit(&status), "server stopped");
    Ok(status)
  }

  #[cfg(unix)]
  fn signal_group(&self, signal: nix::sys::signal::Signal) -> Result<(), ServerError> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pid) = self.pid else {
      return Ok(());
    };
    match killpg(Pid::from_raw(pid as i32), signal) {
      Ok(()) | Err(Errno::ESRCH) => Ok(()),
      Err(errno) => Err(ServerError::Io(errno.into())),
    }
  }

  #[cfg(unix)]
  fn terminate(&mut self) -> Result<(), ServerError> {
    self.signal_group(nix::sys::signal::Signal::SIGTERM)
  }

  #[cfg(unix)]
  fn kill_group(&mut self) -> Result<(), ServerError> {
    self.signal_group(nix::sys::signal::Signal::SIGKILL)
  }

  #[cfg(not(unix))]
  fn terminate(&mut self) -> Result<(), ServerError> {
    Ok(self.child.start_kill()?)
  }

  #[cfg(not(unix))]
  fn kill_group(&mut self) -> Result<(), ServerError> {
    match self.child.try_wait()? {
      Some(_) => Ok(()),
      None => Ok(self.child.start_kill()?),
    }
  }
}

impl Drop for ServerGuard {
  fn drop(&mut self) {
    if let Ok(None) = self.child.try_wait() {
      debug!(pid = ?self.pid, "server guard dropped while running, killing");
      let _ = self.kill_group();
      let _ = self.child.start_kill();
    }
  }
}

/// Run `work` while `server` is up, then shut the server down whatever the
/// outcome of `work`. Shutdown failures are logged, not returned.
pub async fn with_server<F, Fut, T>(server: ServerGuard, work: F) -> T
where
  F: FnOnce() -> Fut,
  Fut: Future<Output = T>,
{
  let result = work().await;
  if let Err(e) = server.shutdown().await {
    warn!(error = %e, "failed to stop server cleanly");
  }
  result
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::config::CommandLine;
  use crate::server::EntryKind;
  use crate::util::testutil::{exits_with, is_running, sleeper, stopped_within};
  use tempfile::TempDir;

  fn entry(command: CommandLine, temp: &TempDir) -> ServerEntry {
    ServerEntry {
      kind: EntryKind::Custom,
      command,
      cwd: temp.path().to_path_buf(),
    }
  }

  #[tokio::test]
  async fn shutdown_terminates_running_process() {
    let temp = TempDir::new().unwrap();
    let guard = ServerGuard::spawn(&entry(sleeper(), &temp), &BTreeMap::new(), Duration::from_secs(2)).unwrap();
    let pid = guard.pid().unwrap();
    assert!(is_running(pid));

    let status = guard.shutdown().await.unwrap();

    assert!(!status.success());
    assert!(!is_running(pid));
  }

  #[tokio::test]
  async fn shutdown_kills_process_ignoring_sigterm() {
    let temp = TempDir::new().unwrap();
    let stubborn = CommandLine::new("/bin/sh", &["-c", "trap '' TERM; while true; do sleep 1; done"]);
    let guard = ServerGuard::spawn(&entry(stubborn, &temp), &BTreeMap::new(), Duration::from_millis(300)).unwrap();
    let pid = guard.pid().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    guard.shutdown().await.unwrap();

    assert!(!is_running(pid));
  }

  #[tokio::test]
  async fn shutdown_stops_background_children() {
    let temp = TempDir::new().unwrap();
    let pid_file = temp.path().join("child.pid");
    let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
    let guard = ServerGuard::spawn(
      &entry(CommandLine::new("/bin/sh", &["-c", &script]), &temp),
      &BTreeMap::new(),
      Duration::from_secs(2),
    )
    .unwrap();
    let child_pid = read_pid(&pid_file).await;
    assert!(is_running(child_pid));

    guard.shutdown().await.unwrap();

    assert!(stopped_within(child_pid, Duration::from_secs(2)).await);
  }

  #[tokio::test]
  async fn dropped_guard_kills_background_children() {
    let temp = TempDir::new().unwrap();
    let pid_file = temp.path().join("child.pid");
    let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
    let guard = ServerGuard::spawn(
      &entry(CommandLine::new("/bin/sh", &["-c", &script]), &temp),
      &BTreeMap::new(),
      Duration::from_secs(2),
    )
    .unwrap();
    let child_pid = read_pid(&pid_file).await;

    drop(guard);

    assert!(stopped_within(child_pid, Duration::from_secs(2)).await);
  }

  async fn read_pid(pid_file: &std::path::Path) -> u32 {
    for _ in 0..200 {
      if let Ok(pid) = std::fs::read_to_string(pid_file).unwrap_or_default().trim().parse() {
        return pid;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no pid written to {}", pid_file.display());
  }

  #[tokio::test]
  async fn shutdown_after_exit_returns_status() {
    let temp = TempDir::new().unwrap();
    let mut guard = ServerGuard::spawn(&entry(exits_with(4), &temp), &BTreeMap::new(), Duration::from_secs(1)).unwrap();

    while guard.try_wait().unwrap().is_none() {
      tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let status = guard.shutdown().await.unwrap();
    assert_eq!(status.code(), Some(4));
  }

  #[tokio::test]
  async fn spawn_failure_names_command() {
    let temp = TempDir::new().unwrap();
    let missing = CommandLine::new("/nonexistent/snapex-server", &[]);

    let err = ServerGuard::spawn(&entry(missing, &temp), &BTreeMap::new(), Duration::from_secs(1)).unwrap_err();

    assert!(matches!(err, ServerError::Spawn { .. }));
    assert!(err.to_string().contains("/nonexistent/snapex-server"));
  }

  #[tokio::test]
  async fn server_env_is_injected() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("env.txt");
    let script = format!("echo \"$PORT $SITE_URL\" > {}", out.display());
    let mut env = BTreeMap::new();
    env.insert("PORT".to_string(), "4321".to_string());
    env.insert("SITE_URL".to_string(), "https://dynamic.capital".to_string());

    let mut guard = ServerGuard::spawn(
      &entry(CommandLine::new("/bin/sh", &["-c", &script]), &temp),
      &env,
      Duration::from_secs(1),
    )
    .unwrap();
    while guard.try_wait().unwrap().is_none() {
      tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let written = std::fs::read_to_string(out).unwrap();
    assert_eq!(written.trim(), "4321 https://dynamic.capital");
  }

  #[tokio::test]
  async fn with_server_stops_process_when_work_fails() {
    let temp = TempDir::new().unwrap();
    let guard = ServerGuard::spawn(&entry(sleeper(), &temp), &BTreeMap::new(), Duration::from_secs(2)).unwrap();
    let pid = guard.pid().unwrap();

    let result: Result<(), &str> = with_server(guard, || async { Err("capture failed") }).await;

    assert_eq!(result, Err("capture failed"));
    assert!(!is_running(pid));
  }
}
