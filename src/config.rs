//! Service configuration module.
//!
//! Handles loading, validating, and merging `thumbcache.toml`. The user file
//! is sparse: it is merged over the stock defaults, so it only needs the
//! values it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [coalescing]
//! poll_tries = 3                   # Store re-checks per failed lock attempt
//! max_attempts = 2                 # Lock attempts before computing unlocked
//! default_poll_interval_ms = 200   # Poll sleep before any latency is known
//! latency_window_secs = 60         # Latency samples older than this are ignored
//!
//! [lock]
//! dir = ".thumbcache/locks"
//! lease_ms = 5000
//! extension_ms = 5000
//! tries = 3
//! retry_delay_ms = 200
//!
//! [store]
//! dir = ".thumbcache/store"
//!
//! [download]
//! allowed_content_types = ["image/jpeg", "image/png", "image/gif"]
//! timeout_secs = 30
//!
//! [limits]
//! max_area = 6000000               # Largest width x height accepted
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::downloader::SUPPORTED_CONTENT_TYPES;
use crate::locker::LockOptions;
use crate::request::DEFAULT_MAX_AREA;
use crate::service::CoalescingSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Service configuration loaded from `thumbcache.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Lock/poll cycle timing.
    pub coalescing: CoalescingConfig,
    /// Lease locks shared between processes.
    pub lock: LockConfig,
    /// Artifact store location.
    pub store: StoreConfig,
    /// Source fetching.
    pub download: DownloadConfig,
    /// Request limits.
    pub limits: LimitsConfig,
}

impl ServiceConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coalescing.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "coalescing.max_attempts must be at least 1".into(),
            ));
        }
        if self.coalescing.poll_tries == 0 {
            return Err(ConfigError::Validation(
                "coalescing.poll_tries must be at least 1".into(),
            ));
        }
        if self.lock.tries == 0 {
            return Err(ConfigError::Validation(
                "lock.tries must be at least 1".into(),
            ));
        }
        if self.lock.lease_ms == 0 || self.lock.extension_ms == 0 {
            return Err(ConfigError::Validation(
                "lock.lease_ms and lock.extension_ms must be non-zero".into(),
            ));
        }
        if self.download.allowed_content_types.is_empty() {
            return Err(ConfigError::Validation(
                "download.allowed_content_types must not be empty".into(),
            ));
        }
        if self.download.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "download.timeout_secs must be non-zero".into(),
            ));
        }
        if self.limits.max_area == 0 {
            return Err(ConfigError::Validation(
                "limits.max_area must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoalescingConfig {
    pub poll_tries: u32,
    pub max_attempts: u32,
    pub default_poll_interval_ms: u64,
    pub latency_window_secs: u64,
}

impl Default for CoalescingConfig {
    fn default() -> Self {
        let settings = CoalescingSettings::default();
        Self {
            poll_tries: settings.poll_tries,
            max_attempts: settings.max_attempts,
            default_poll_interval_ms: settings.default_poll_interval.as_millis() as u64,
            latency_window_secs: settings.latency_window.as_secs(),
        }
    }
}

impl CoalescingConfig {
    pub fn settings(&self) -> CoalescingSettings {
        CoalescingSettings {
            poll_tries: self.poll_tries,
            max_attempts: self.max_attempts,
            default_poll_interval: Duration::from_millis(self.default_poll_interval_ms),
            latency_window: Duration::from_secs(self.latency_window_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    /// Directory holding lease files. Every process sharing it is coordinated.
    pub dir: String,
    pub lease_ms: u64,
    /// Lease kept after a successful computation. Must exceed the gap between
    /// a peer's cache miss and its lock attempt, or that peer recomputes.
    pub extension_ms: u64,
    pub tries: u32,
    pub retry_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        let options = LockOptions::default();
        Self {
            dir: ".thumbcache/locks".to_string(),
            lease_ms: options.lease.as_millis() as u64,
            extension_ms: options.extension.as_millis() as u64,
            tries: options.tries,
            retry_delay_ms: options.retry_delay.as_millis() as u64,
        }
    }
}

impl LockConfig {
    pub fn options(&self) -> LockOptions {
        LockOptions {
            lease: Duration::from_millis(self.lease_ms),
            extension: Duration::from_millis(self.extension_ms),
            tries: self.tries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: ".thumbcache/store".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadConfig {
    /// MIME types accepted after sniffing the downloaded bytes.
    pub allowed_content_types: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            allowed_content_types: SUPPORTED_CONTENT_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect(),
            timeout_secs: 30,
        }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub max_area: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_area: DEFAULT_MAX_AREA,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ServiceConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value. `Ok(None)` if it does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ServiceConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ServiceConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`, falling back to stock defaults when it is absent.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `thumbcache.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# thumbcache configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Coalescing: how concurrent requests for the same thumbnail share work
# ---------------------------------------------------------------------------
[coalescing]
# Store re-checks after failing to take the lock, per attempt.
poll_tries = 3

# Lock attempts before computing without the lock.
max_attempts = 2

# Sleep between store re-checks until a computation latency has been observed.
# Afterwards the sleep is half the recent average latency.
default_poll_interval_ms = 200

# Latency samples older than this are ignored.
latency_window_secs = 60

# ---------------------------------------------------------------------------
# Locks
# ---------------------------------------------------------------------------
[lock]
# Lease files live here. Processes sharing this directory coordinate.
dir = ".thumbcache/locks"

# Lease granted on acquisition. A crashed holder blocks its key this long.
lease_ms = 5000

# Lease granted after a successful computation, so late peers find the
# stored artifact instead of recomputing.
extension_ms = 5000

# Acquisition attempts per lock call, and the pause between them.
tries = 3
retry_delay_ms = 200

# ---------------------------------------------------------------------------
# Store
# ---------------------------------------------------------------------------
[store]
# Computed thumbnails, one JPEG per fingerprint.
dir = ".thumbcache/store"

# ---------------------------------------------------------------------------
# Downloads
# ---------------------------------------------------------------------------
[download]
# Accepted source types, detected from the file contents.
allowed_content_types = ["image/jpeg", "image/png", "image/gif"]

timeout_secs = 30

# ---------------------------------------------------------------------------
# Limits
# ---------------------------------------------------------------------------
[limits]
# Largest accepted width x height, in pixels.
max_area = 6000000
"##
}
