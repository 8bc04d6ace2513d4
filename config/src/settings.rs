//! Typed runtime settings: every recognized environment variable with its default.
//!
//! Parsed once at startup via [`Settings::from_env`]. Malformed numeric values are
//! a hard error so a typo in a deployment never silently falls back to a default.

use serde::Serialize;

use crate::LoadError;

/// Default listen address for the HTTP server.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Runtime settings for the orchestration core and the server.
///
/// `Serialize` covers the `/config` endpoint; [`Settings::public`] strips the
/// sensitive fields first.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// Bootstrap master token; `None` means generate and log one at startup.
    #[serde(skip_serializing)]
    pub master_token: Option<String>,
    /// Session lifetime in hours. Default 168 (7 days).
    pub session_ttl_hours: u64,
    /// Maximum concurrent per-device operations in a fan-out batch. Default 10.
    pub fan_out_max_concurrency: usize,
    /// Background inspection workers. Default 4.
    pub job_workers: usize,
    /// Per-device operation timeout in seconds. Default 30.
    pub device_timeout_seconds: u64,
    /// Per-tool-call timeout in seconds. Default 60.
    pub tool_timeout_seconds: u64,
    /// Bounded stream buffer, in events. Default 256.
    pub stream_buffer_events: usize,
    /// Deep-dive iteration depth bound. Default 3.
    pub deepdive_max_depth: u32,
    /// Deep-dive parallel sub-task bound. Default 30.
    pub deepdive_max_fanout: usize,
    /// When true, `non_network` classifications are refused instead of routed.
    pub guard_mode_enabled: bool,
    /// SQLite database path; empty means in-memory stores only.
    pub db_path: String,
    /// HTTP listen address.
    pub listen_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            master_token: None,
            session_ttl_hours: 168,
            fan_out_max_concurrency: 10,
            job_workers: 4,
            device_timeout_seconds: 30,
            tool_timeout_seconds: 60,
            stream_buffer_events: 256,
            deepdive_max_depth: 3,
            deepdive_max_fanout: 30,
            guard_mode_enabled: false,
            db_path: String::new(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T, LoadError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| LoadError::InvalidValue {
            key: key.to_string(),
            value: raw,
            reason: format!("expected {}", std::any::type_name::<T>()),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool, LoadError> {
    match std::env::var(key) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(LoadError::InvalidValue {
                key: key.to_string(),
                value: raw,
                reason: "expected a boolean".to_string(),
            }),
        },
        Err(_) => Ok(default),
    }
}

impl Settings {
    /// Reads all recognized variables from the environment, using the documented
    /// default for any that are unset.
    pub fn from_env() -> Result<Self, LoadError> {
        let defaults = Settings::default();
        Ok(Self {
            master_token: std::env::var("MASTER_TOKEN").ok().filter(|t| !t.is_empty()),
            session_ttl_hours: parse_var("SESSION_TTL_HOURS", defaults.session_ttl_hours)?,
            fan_out_max_concurrency: parse_var(
                "FAN_OUT_MAX_CONCURRENCY",
                defaults.fan_out_max_concurrency,
            )?,
            job_workers: parse_var("JOB_WORKERS", defaults.job_workers)?,
            device_timeout_seconds: parse_var(
                "DEVICE_TIMEOUT_SECONDS",
                defaults.device_timeout_seconds,
            )?,
            tool_timeout_seconds: parse_var("TOOL_TIMEOUT_SECONDS", defaults.tool_timeout_seconds)?,
            stream_buffer_events: parse_var("STREAM_BUFFER_EVENTS", defaults.stream_buffer_events)?,
            deepdive_max_depth: parse_var("DEEPDIVE_MAX_DEPTH", defaults.deepdive_max_depth)?,
            deepdive_max_fanout: parse_var("DEEPDIVE_MAX_FANOUT", defaults.deepdive_max_fanout)?,
            guard_mode_enabled: parse_bool("GUARD_MODE_ENABLED", defaults.guard_mode_enabled)?,
            db_path: std::env::var("OLAV_DB_PATH").unwrap_or_default(),
            listen_addr: std::env::var("OLAV_LISTEN_ADDR")
                .unwrap_or_else(|_| defaults.listen_addr.clone()),
        })
    }

    /// Non-sensitive view for the `/config` endpoint: the master token is never
    /// serialized, and the db path is reduced to a set/unset flag.
    pub fn public(&self) -> serde_json::Value
    where
        Self: Serialize,
    {
        serde_json::json!({
            "session_ttl_hours": self.session_ttl_hours,
            "fan_out_max_concurrency": self.fan_out_max_concurrency,
            "job_workers": self.job_workers,
            "device_timeout_seconds": self.device_timeout_seconds,
            "tool_timeout_seconds": self.tool_timeout_seconds,
            "stream_buffer_events": self.stream_buffer_events,
            "deepdive_max_depth": self.deepdive_max_depth,
            "deepdive_max_fanout": self.deepdive_max_fanout,
            "guard_mode_enabled": self.guard_mode_enabled,
            "persistent_storage": !self.db_path.is_empty(),
        })
    }
}
