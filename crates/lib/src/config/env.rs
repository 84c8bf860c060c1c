use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use super::{CommandLine, ExportConfig, ReadinessPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("invalid value for {key}: {value:?}")]
  InvalidValue { key: String, value: String },

  /// The destination is wiped on every run, so it must not contain the
  /// project or overlap an asset source.
  #[error("refusing to export into {dest}: {reason}")]
  UnsafeDestination { dest: PathBuf, reason: String },
}

pub const DEST: &str = "STATIC_EXPORT_DEST";
pub const COPY_ONLY: &str = "STATIC_EXPORT_COPY_ONLY";
pub const BUILD_CMD: &str = "STATIC_EXPORT_BUILD_CMD";
pub const SERVER_CMD: &str = "STATIC_EXPORT_SERVER_CMD";
pub const HOST: &str = "STATIC_EXPORT_HOST";
pub const PORT: &str = "STATIC_EXPORT_PORT";
pub const HEALTH_PATH: &str = "STATIC_EXPORT_HEALTH_PATH";
pub const READY_RETRIES: &str = "STATIC_EXPORT_READY_RETRIES";
pub const READY_DELAY_MS: &str = "STATIC_EXPORT_READY_DELAY_MS";
pub const STRICT_READINESS: &str = "STATIC_EXPORT_STRICT_READINESS";
pub const ROUTES: &str = "STATIC_EXPORT_ROUTES";
pub const FETCH_TIMEOUT_MS: &str = "STATIC_EXPORT_FETCH_TIMEOUT_MS";

impl ExportConfig {
  /// Defaults overlaid with values from the process environment.
  pub fn from_env(project_root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
    Self::from_lookup(project_root, |key| std::env::var(key).ok())
  }

  /// Defaults overlaid with values from `lookup`. Blank values count as unset.
  pub fn from_lookup<F>(project_root: impl Into<PathBuf>, lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let get = |key: &str| {
      lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    };
    let first_of = |keys: &[&str]| keys.iter().find_map(|key| get(key));

    let mut config = ExportConfig::new(project_root);

    if let Some(dest) = get(DEST) {
      config = config.with_destination(dest);
    }
    if let Some(value) = get(COPY_ONLY) {
      config.copy_only = parse_bool(COPY_ONLY, &value)?;
    }
    if let Some(cmd) = get(BUILD_CMD) {
      config.build_command = cmd;
    }
    if let Some(cmd) = get(SERVER_CMD) {
      config.server_command = CommandLine::parse(&cmd);
    }
    if let Some(host) = get(HOST) {
      config.host = host;
    }
    if let Some(port) = get(PORT) {
      config.port = Some(parse_num(PORT, &port)?);
    }

    if let Some(origin) = first_of(&["SITE_URL", "NEXT_PUBLIC_SITE_URL"]) {
      config.site.origin = Some(origin);
    }
    if let Some(url) = first_of(&["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"]) {
      config.site.supabase_url = url;
    }
    if let Some(key) = first_of(&["SUPABASE_ANON_KEY", "NEXT_PUBLIC_SUPABASE_ANON_KEY"]) {
      config.site.supabase_anon_key = key;
    }
    if let Some(origins) = get("ALLOWED_ORIGINS") {
      config.site.allowed_origins = Some(origins);
    }

    if let Some(path) = get(HEALTH_PATH) {
      config.readiness.path = path;
    }
    if let Some(retries) = get(READY_RETRIES) {
      config.readiness.retries = parse_num(READY_RETRIES, &retries)?;
    }
    if let Some(delay) = get(READY_DELAY_MS) {
      config.readiness.delay = Duration::from_millis(parse_num(READY_DELAY_MS, &delay)?);
    }
    if let Some(value) = get(STRICT_READINESS)
      && parse_bool(STRICT_READINESS, &value)?
    {
      config.readiness.policy = ReadinessPolicy::SuccessOnly;
    }

    if let Some(routes) = get(ROUTES) {
      config.capture.routes = split_list(&routes);
    }
    if let Some(timeout) = get(FETCH_TIMEOUT_MS) {
      config.capture.fetch_timeout = Duration::from_millis(parse_num(FETCH_TIMEOUT_MS, &timeout)?);
    }

    debug!(
      root = %config.project_root.display(),
      dest = %config.destination.display(),
      copy_only = config.copy_only,
      "loaded export config"
    );

    Ok(config)
  }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
  match value.to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(invalid(key, value)),
  }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.parse().map_err(|_| invalid(key, value))
}

fn split_list(value: &str) -> Vec<String> {
  value
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}

fn invalid(key: &str, value: &str) -> ConfigError {
  ConfigError::InvalidValue {
    key: key.to_string(),
    value: value.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use std::collections::HashMap;

  fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key| map.get(key).cloned()
  }

  #[test]
  fn empty_environment_yields_defaults() {
    let config = ExportConfig::from_lookup("/srv/app", lookup(&[])).unwrap();
    assert_eq!(config.destination, PathBuf::from("/srv/app/_static"));
    assert_eq!(config.build_command, "npm run build");
    assert!(config.server_command.is_none());
    assert!(config.port.is_none());
    assert_eq!(config.readiness.policy, ReadinessPolicy::SuccessOrNotFound);
  }

  #[test]
  fn overrides_are_applied() {
    let config = ExportConfig::from_lookup(
      "/srv/app",
      lookup(&[
        (DEST, "dist/snapshot"),
        (COPY_ONLY, "yes"),
        (SERVER_CMD, "node custom-server.js"),
        (PORT, "4567"),
        (READY_RETRIES, "10"),
        (READY_DELAY_MS, "50"),
        (STRICT_READINESS, "true"),
        (ROUTES, "/about, /pricing,,"),
        (FETCH_TIMEOUT_MS, "1500"),
      ]),
    )
    .unwrap();

    assert_eq!(config.destination, PathBuf::from("/srv/app/dist/snapshot"));
    assert!(config.copy_only);
    assert_eq!(
      config.server_command,
      Some(CommandLine::new("node", &["custom-server.js"]))
    );
    assert_eq!(config.port, Some(4567));
    assert_eq!(config.readiness.retries, 10);
    assert_eq!(config.readiness.delay, Duration::from_millis(50));
    assert_eq!(config.readiness.policy, ReadinessPolicy::SuccessOnly);
    assert_eq!(config.capture.routes, vec!["/about", "/pricing"]);
    assert_eq!(config.capture.fetch_timeout, Duration::from_millis(1500));
  }

  #[test]
  fn public_site_variables_are_fallbacks() {
    let config = ExportConfig::from_lookup(
      "/srv/app",
      lookup(&[
        ("NEXT_PUBLIC_SITE_URL", "https://public.example"),
        ("SUPABASE_URL", "https://real.supabase.co"),
        ("NEXT_PUBLIC_SUPABASE_URL", "https://ignored.supabase.co"),
        ("NEXT_PUBLIC_SUPABASE_ANON_KEY", "anon"),
      ]),
    )
    .unwrap();

    assert_eq!(config.site.origin.as_deref(), Some("https://public.example"));
    assert_eq!(config.site.supabase_url, "https://real.supabase.co");
    assert_eq!(config.site.supabase_anon_key, "anon");
  }

  #[test]
  fn blank_values_count_as_unset() {
    let config = ExportConfig::from_lookup("/srv/app", lookup(&[("SITE_URL", "  "), (PORT, "")])).unwrap();
    assert!(config.site.origin.is_none());
    assert!(config.port.is_none());
  }

  #[test]
  fn malformed_numbers_are_rejected() {
    let err = ExportConfig::from_lookup("/srv/app", lookup(&[(PORT, "eighty")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == PORT));

    let err = ExportConfig::from_lookup("/srv/app", lookup(&[(COPY_ONLY, "maybe")])).unwrap_err();
    assert!(err.to_string().contains(COPY_ONLY));
  }

  #[test]
  #[serial]
  fn from_env_reads_process_environment() {
    temp_env::with_vars(
      [
        (COPY_ONLY, Some("1")),
        (HOST, Some("0.0.0.0")),
        ("SITE_URL", Some("https://dynamic.capital")),
        (PORT, None::<&str>),
      ],
      || {
        let config = ExportConfig::from_env("/srv/app").unwrap();
        assert!(config.copy_only);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.site.origin.as_deref(), Some("https://dynamic.capital"));
        assert!(config.port.is_none());
      },
    );
  }
}
