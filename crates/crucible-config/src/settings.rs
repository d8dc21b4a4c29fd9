use std::collections::HashMap;

use clap::Parser;

use crate::error::ConfigError;

/// Operator controls: environment-style configuration, loaded once at
/// startup and treated as immutable for the process lifetime.
///
/// Built on `clap::Parser`'s `env` feature — this is read via
/// [`OperatorConfig::load`], which consults only environment variables
/// (never argv), so it can be embedded as a flattened field inside a real
/// CLI's `Parser` derive without the two uses fighting over positional
/// arguments.
#[derive(Debug, Clone, Parser)]
pub struct OperatorConfig {
    /// Total concurrent sandboxes (N in the executor pool).
    #[arg(long, env = "CRUCIBLE_POOL_SIZE", default_value_t = 3)]
    pub pool_size: u32,

    /// Dispatcher back-off floor when slots are exhausted.
    #[arg(long, env = "CRUCIBLE_DISPATCHER_BACKOFF_BASE_MS", default_value_t = 100)]
    pub dispatcher_backoff_base_ms: u64,

    /// Dispatcher back-off ceiling when slots are exhausted.
    #[arg(long, env = "CRUCIBLE_DISPATCHER_BACKOFF_CAP_MS", default_value_t = 5_000)]
    pub dispatcher_backoff_cap_ms: u64,

    /// How often the orphan reaper sweeps, in seconds.
    #[arg(long, env = "CRUCIBLE_REAPER_INTERVAL_SECS", default_value_t = 60)]
    pub reaper_interval_secs: u64,

    /// Grace window before a stale non-terminal record is reaped, in seconds.
    #[arg(long, env = "CRUCIBLE_REAPER_GRACE_WINDOW_SECS", default_value_t = 120)]
    pub reaper_grace_window_secs: u64,

    /// Default evaluation timeout when the caller doesn't specify one.
    #[arg(long, env = "CRUCIBLE_DEFAULT_TIMEOUT_SECS", default_value_t = 30)]
    pub default_timeout_secs: u32,

    /// Hard ceiling on any evaluation's requested timeout.
    #[arg(long, env = "CRUCIBLE_MAX_TIMEOUT_SECS", default_value_t = 300)]
    pub max_timeout_secs: u32,

    /// Watcher outer wall-clock slack added atop `timeout_secs` before a
    /// hung driver is force-killed (slack ≥ 5s).
    #[arg(long, env = "CRUCIBLE_TIMEOUT_SLACK_SECS", default_value_t = 5)]
    pub timeout_slack_secs: u32,

    /// Threshold in bytes above which stdout/stderr is externalized.
    #[arg(long, env = "CRUCIBLE_LARGE_OUTPUT_THRESHOLD_BYTES", default_value_t = 10 * 1024)]
    pub large_output_threshold_bytes: usize,

    /// Root directory (or URI prefix) for externalized output blobs.
    #[arg(long, env = "CRUCIBLE_OUTPUT_STORE_ROOT", default_value = "./crucible-output-store")]
    pub output_store_root: String,

    /// Byte cap on the per-evaluation ring buffer in `logs:{id}:latest`.
    #[arg(long, env = "CRUCIBLE_LOG_BUFFER_SIZE", default_value_t = 64 * 1024)]
    pub log_buffer_size: usize,

    /// `{language: backend}` as a JSON object string, e.g.
    /// `{"python":"process","node":"process"}`. Parsed by
    /// [`OperatorConfig::sandbox_backends`].
    #[arg(
        long,
        env = "CRUCIBLE_SANDBOX_BACKENDS",
        default_value = r#"{"python":"process","node":"process","javascript":"process"}"#
    )]
    pub sandbox_backends_json: String,
}

impl OperatorConfig {
    /// Read configuration from the environment (argv is never consulted).
    pub fn load() -> Result<Self, ConfigError> {
        Self::try_parse_from(std::iter::once("crucible".to_string())).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn sandbox_backends(&self) -> Result<HashMap<String, String>, ConfigError> {
        serde_json::from_str(&self.sandbox_backends_json)
            .map_err(|e| ConfigError::Conversion(format!("{e}: {}", self.sandbox_backends_json)))
    }

    pub fn dispatcher_backoff_base(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.dispatcher_backoff_base_ms)
    }

    pub fn dispatcher_backoff_cap(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.dispatcher_backoff_cap_ms)
    }

    pub fn reaper_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn reaper_grace_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reaper_grace_window_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_defaults() {
        let cfg = OperatorConfig::load().unwrap();
        assert_eq!(cfg.pool_size, 3);
        assert_eq!(cfg.large_output_threshold_bytes, 10 * 1024);
    }

    #[test]
    fn sandbox_backends_parses_the_default_json() {
        let cfg = OperatorConfig::load().unwrap();
        let backends = cfg.sandbox_backends().unwrap();
        assert_eq!(backends.get("python").map(String::as_str), Some("process"));
    }
}
