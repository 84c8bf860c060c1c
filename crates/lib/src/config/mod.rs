//! Export configuration.
//!
//! `ExportConfig` is assembled once (defaults, then environment, then CLI
//! flags) and passed by reference into every stage of the pipeline. No stage
//! below the CLI reads the process environment on its own.

mod env;

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;

use crate::consts::DEFAULT_DEST_DIR;

pub use env::ConfigError;

/// Which readiness probe responses count as "server is up".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessPolicy {
  /// 2xx, or 404 (the server answered, the probed route just doesn't exist).
  #[default]
  SuccessOrNotFound,
  /// Only 2xx.
  SuccessOnly,
}

impl ReadinessPolicy {
  pub fn accepts(self, status: StatusCode) -> bool {
    match self {
      ReadinessPolicy::SuccessOnly => status.is_success(),
      ReadinessPolicy::SuccessOrNotFound => status.is_success() || status == StatusCode::NOT_FOUND,
    }
  }
}

#[derive(Debug, Clone)]
pub struct ReadinessConfig {
  /// Path probed on the launched server.
  pub path: String,
  /// Number of probe attempts before giving up.
  pub retries: u32,
  /// Delay between two probe attempts.
  pub delay: Duration,
  /// Upper bound for a single probe request.
  pub probe_timeout: Duration,
  pub policy: ReadinessPolicy,
}

impl Default for ReadinessConfig {
  fn default() -> Self {
    Self {
      path: "/healthz".to_string(),
      retries: 75,
      delay: Duration::from_millis(200),
      probe_timeout: Duration::from_secs(2),
      policy: ReadinessPolicy::default(),
    }
  }
}

impl ReadinessConfig {
  /// Wall-clock budget spent sleeping between probes.
  pub fn budget(&self) -> Duration {
    self.delay * self.retries
  }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
  pub root_path: String,
  /// A path the app does not serve, used to capture its rendered 404 page.
  pub not_found_path: String,
  /// Extra routes captured as `<route>/index.html`.
  pub routes: Vec<String>,
  pub max_redirects: usize,
  pub fetch_timeout: Duration,
}

impl Default for CaptureConfig {
  fn default() -> Self {
    Self {
      root_path: "/".to_string(),
      not_found_path: "/__snapshot_not_found__".to_string(),
      routes: Vec::new(),
      max_redirects: 5,
      fetch_timeout: Duration::from_secs(30),
    }
  }
}

/// Values injected into the temporary server's environment.
#[derive(Debug, Clone)]
pub struct SiteEnv {
  /// Canonical site origin. Defaults to the temporary server's own address.
  pub origin: Option<String>,
  pub supabase_url: String,
  pub supabase_anon_key: String,
  /// Comma separated. Defaults to the site origin.
  pub allowed_origins: Option<String>,
}

impl Default for SiteEnv {
  fn default() -> Self {
    Self {
      origin: None,
      supabase_url: "https://stub.supabase.co".to_string(),
      supabase_anon_key: "stub-anon-key".to_string(),
      allowed_origins: None,
    }
  }
}

/// A program plus its arguments, spawned without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
  pub program: String,
  pub args: Vec<String>,
}

impl CommandLine {
  pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
    Self {
      program: program.into(),
      args: args.iter().map(|a| a.to_string()).collect(),
    }
  }

  /// Split on whitespace. Returns `None` for a blank string.
  pub fn parse(line: &str) -> Option<Self> {
    let mut parts = line.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some(Self {
      program,
      args: parts.collect(),
    })
  }
}

impl std::fmt::Display for CommandLine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.program)?;
    for arg in &self.args {
      write!(f, " {}", arg)?;
    }
    Ok(())
  }
}

/// A prebuilt asset tree copied into the export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMapping {
  /// Relative to the project root.
  pub source: PathBuf,
  /// Relative to the destination. `.` copies into the destination itself.
  pub target: PathBuf,
}

impl AssetMapping {
  pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
    Self {
      source: source.into(),
      target: target.into(),
    }
  }

  fn defaults() -> Vec<Self> {
    vec![
      AssetMapping::new(".next/static", "_next/static"),
      AssetMapping::new("public", "."),
    ]
  }
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
  pub project_root: PathBuf,
  pub destination: PathBuf,
  /// Skip the build step and export from existing artifacts.
  pub copy_only: bool,
  /// Shell command producing the production build.
  pub build_command: String,
  /// Overrides server entry resolution entirely.
  pub server_command: Option<CommandLine>,
  pub host: String,
  /// `None` picks a free ephemeral port at launch time.
  pub port: Option<u16>,
  pub site: SiteEnv,
  pub readiness: ReadinessConfig,
  pub capture: CaptureConfig,
  /// Time the server gets to exit after SIGTERM before it is killed.
  pub shutdown_grace: Duration,
  pub assets: Vec<AssetMapping>,
}

impl ExportConfig {
  pub fn new(project_root: impl Into<PathBuf>) -> Self {
    let project_root = project_root.into();
    let destination = project_root.join(DEFAULT_DEST_DIR);
    Self {
      project_root,
      destination,
      copy_only: false,
      build_command: "npm run build".to_string(),
      server_command: None,
      host: "127.0.0.1".to_string(),
      port: None,
      site: SiteEnv::default(),
      readiness: ReadinessConfig::default(),
      capture: CaptureConfig::default(),
      shutdown_grace: Duration::from_secs(5),
      assets: AssetMapping::defaults(),
    }
  }

  /// Set the destination. Relative paths are resolved against the project root.
  pub fn with_destination(mut self, destination: impl AsRef<Path>) -> Self {
    self.destination = self.resolve(destination.as_ref());
    self
  }

  pub(crate) fn resolve(&self, path: &Path) -> PathBuf {
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.project_root.join(path)
    }
  }

  /// Reject destinations that a reset would take the project down with.
  ///
  /// The destination may not be the project root or one of its ancestors,
  /// and may not overlap a configured asset source in either direction.
  /// Paths are compared after lexical normalization.
  pub fn validate(&self) -> Result<(), ConfigError> {
    let dest = normalize(&self.destination);
    let unsafe_dest = |reason: String| ConfigError::UnsafeDestination {
      dest: self.destination.clone(),
      reason,
    };

    if dest.parent().is_none() {
      return Err(unsafe_dest("it is a filesystem root".to_string()));
    }
    let root = normalize(&self.project_root);
    if root.starts_with(&dest) {
      return Err(unsafe_dest(format!("it contains the project root {}", root.display())));
    }

    for mapping in &self.assets {
      let source = normalize(&self.resolve(&mapping.source));
      if dest.starts_with(&source) || source.starts_with(&dest) {
        return Err(unsafe_dest(format!("it overlaps the asset source {}", source.display())));
      }
    }
    Ok(())
  }

  /// Where the previous export is parked while a new one is attempted.
  pub fn backup_dir(&self) -> PathBuf {
    let name = self
      .destination
      .file_name()
      .map(|n| n.to_string_lossy().to_string())
      .unwrap_or_else(|| DEFAULT_DEST_DIR.to_string());
    self.destination.with_file_name(format!(".{}.backup", name))
  }

  /// Origin the temporary server should consider canonical.
  pub fn site_origin(&self, port: u16) -> String {
    self
      .site
      .origin
      .clone()
      .unwrap_or_else(|| format!("http://{}:{}", self.host, port))
  }

  /// Environment injected into the server process.
  pub fn server_env(&self, port: u16) -> BTreeMap<String, String> {
    let origin = self.site_origin(port);
    let allowed = self.site.allowed_origins.clone().unwrap_or_else(|| origin.clone());

    let mut env = BTreeMap::new();
    env.insert("PORT".to_string(), port.to_string());
    env.insert("HOSTNAME".to_string(), self.host.clone());
    env.insert("NODE_ENV".to_string(), "production".to_string());
    env.insert("SITE_URL".to_string(), origin.clone());
    env.insert("NEXT_PUBLIC_SITE_URL".to_string(), origin);
    env.insert("SUPABASE_URL".to_string(), self.site.supabase_url.clone());
    env.insert("NEXT_PUBLIC_SUPABASE_URL".to_string(), self.site.supabase_url.clone());
    env.insert("SUPABASE_ANON_KEY".to_string(), self.site.supabase_anon_key.clone());
    env.insert(
      "NEXT_PUBLIC_SUPABASE_ANON_KEY".to_string(),
      self.site.supabase_anon_key.clone(),
    );
    env.insert("ALLOWED_ORIGINS".to_string(), allowed);
    env
  }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        out.pop();
      }
      other => out.push(other),
    }
  }
  out
}
