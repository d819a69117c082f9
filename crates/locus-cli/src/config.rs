//! Configuration vault – reads/writes `~/.locus/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use locus_geometry::{DEFAULT_HEIGHT_SLACK, RefineOptions};
use locus_middleware::ReconnectPolicy;
use locus_runtime::{DangerZone, SessionConfig};
use locus_types::{AnchorSet, LocusError, Point};
use serde::{Deserialize, Serialize};

/// Persisted configuration stored in `~/.locus/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket URL of the range measurement server.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Seconds the danger flag stays raised after the last trigger.
    #[serde(default = "default_danger_hold_secs")]
    pub danger_hold_secs: u64,

    /// First reconnect delay in milliseconds; doubles per failed attempt.
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Gauss-Newton iteration bound.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Gauss-Newton step tolerance.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Relative slack for reading slightly short ranges as zero height.
    /// Raise it (e.g. `1e-3`) when ranges are rounded to the centimetre.
    #[serde(default = "default_height_slack")]
    pub height_slack: f64,

    /// The four anchors in hull order.
    #[serde(default = "default_anchors")]
    pub anchors: AnchorSet,

    /// Optional 3- or 4-vertex polygon that raises the danger flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danger_zone: Option<DangerZone>,
}

fn default_server_url() -> String {
    "ws://localhost:5000/ranges".to_string()
}
fn default_danger_hold_secs() -> u64 {
    5
}
fn default_reconnect_initial_ms() -> u64 {
    500
}
fn default_reconnect_max_ms() -> u64 {
    10_000
}
fn default_max_iterations() -> usize {
    100
}
fn default_tolerance() -> f64 {
    1e-6
}
fn default_height_slack() -> f64 {
    DEFAULT_HEIGHT_SLACK
}
fn default_anchors() -> AnchorSet {
    AnchorSet::new([
        Point::planar(0.0, 0.0),
        Point::planar(10.0, 0.0),
        Point::planar(10.0, 10.0),
        Point::planar(0.0, 10.0),
    ])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            danger_hold_secs: default_danger_hold_secs(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            height_slack: default_height_slack(),
            anchors: default_anchors(),
            danger_zone: None,
        }
    }
}

impl Config {
    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<(), LocusError> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(LocusError::Config(format!(
                "server_url must be a ws:// or wss:// URL, got {:?}",
                self.server_url
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(LocusError::Config(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if !(self.height_slack.is_finite() && self.height_slack >= 0.0) {
            return Err(LocusError::Config(format!(
                "height_slack must be non-negative, got {}",
                self.height_slack
            )));
        }
        if self.reconnect_initial_ms == 0 || self.reconnect_initial_ms > self.reconnect_max_ms {
            return Err(LocusError::Config(format!(
                "reconnect delays must satisfy 0 < initial ({}) <= max ({})",
                self.reconnect_initial_ms, self.reconnect_max_ms
            )));
        }
        if let Some(bad) = self.anchors.as_slice().iter().find(|a| !a.is_finite()) {
            return Err(LocusError::Config(format!("anchor {bad} is not finite")));
        }
        Ok(())
    }

    pub fn refine_options(&self) -> RefineOptions {
        RefineOptions {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            height_slack: self.height_slack,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            server_url: self.server_url.clone(),
            anchors: self.anchors,
            refine: self.refine_options(),
            reconnect: ReconnectPolicy {
                initial: Duration::from_millis(self.reconnect_initial_ms),
                max: Duration::from_millis(self.reconnect_max_ms),
            },
            danger_hold: Duration::from_secs(self.danger_hold_secs),
            danger_zone: self.danger_zone.clone(),
        }
    }
}

/// Return the path to `~/.locus/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".locus").join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
///
/// Environment overrides are applied on top of the file contents and the
/// result is validated.
pub fn load_from(path: &Path) -> Result<Option<Config>, LocusError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        LocusError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| LocusError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Apply `LOCUS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `LOCUS_SERVER_URL` | `server_url` |
/// | `LOCUS_DANGER_HOLD_SECS` | `danger_hold_secs` |
/// | `LOCUS_MAX_ITERATIONS` | `max_iterations` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("LOCUS_SERVER_URL") {
        cfg.server_url = v;
    }
    if let Ok(v) = std::env::var("LOCUS_DANGER_HOLD_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.danger_hold_secs = secs;
    }
    if let Ok(v) = std::env::var("LOCUS_MAX_ITERATIONS")
        && let Ok(n) = v.parse::<usize>()
    {
        cfg.max_iterations = n;
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), LocusError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| LocusError::Config(format!("failed to create config directory: {e}")))?;
        // Owner-only directory (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                LocusError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| LocusError::Serialization(format!("failed to serialize config: {e}")))?;
    let write_err =
        |e: std::io::Error| LocusError::Config(format!("failed to write {}: {e}", path.display()));
    // Owner-only file (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
