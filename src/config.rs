//! Runtime configuration for controllers
//!
//! [`ControllerConfig`] is meant to be flattened into the embedding binary's
//! clap arguments; every flag also reads from the environment.

use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::error::{Error, Result};

/// Output format for log lines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args, Clone, Debug)]
pub struct ControllerConfig {
    /// Maximum number of objects reconciled concurrently per controller
    #[arg(long, env = "MAX_CONCURRENT_RECONCILES", default_value_t = 10)]
    pub max_concurrent_reconciles: u16,

    /// Base period for timer-driven resyncs (e.g. "600", "10m")
    #[arg(long, env = "RESYNC_PERIOD", default_value = "600s", value_parser = parse_duration)]
    pub resync_period: Duration,

    /// Deadline for a single reconcile pass
    #[arg(long, env = "RECONCILE_TIMEOUT", default_value = "120s", value_parser = parse_duration)]
    pub reconcile_timeout: Duration,

    /// Field manager recorded on writes to the API server
    #[arg(long, env = "FIELD_MANAGER", default_value = "dbcluster-operator")]
    pub field_manager: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 10,
            resync_period: Duration::from_secs(600),
            reconcile_timeout: Duration::from_secs(120),
            field_manager: "dbcluster-operator".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::ConfigError(
                "max-concurrent-reconciles must be at least 1".to_string(),
            ));
        }
        if self.resync_period.is_zero() {
            return Err(Error::ConfigError("resync-period must be positive".to_string()));
        }
        if self.reconcile_timeout.is_zero() {
            return Err(Error::ConfigError(
                "reconcile-timeout must be positive".to_string(),
            ));
        }
        if self.field_manager.is_empty() {
            return Err(Error::ConfigError("field-manager must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Parse `"30"`, `"30s"`, `"5m"` or `"1h"`
pub fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    let value = value.trim();
    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {value:?}"))?;
    let seconds = match unit {
        "s" => amount,
        "m" => amount.saturating_mul(60),
        "h" => amount.saturating_mul(3600),
        other => return Err(format!("unknown duration unit {other:?} in {value:?}")),
    };
    Ok(Duration::from_secs(seconds))
}
