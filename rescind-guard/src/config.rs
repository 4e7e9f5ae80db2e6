//! Guard configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use rescind_core::constants::*;
use rescind_core::error::{RescindError, Result};
use rescind_core::GuardToggle;

/// Guard configuration.
///
/// Everything except `enabled` is fixed for the lifetime of a guard;
/// `enabled` only seeds the initial [`GuardToggle`]
/// and is re-read from the switch afterwards. See [`toggle`](Self::toggle).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Reclaimer tick interval in milliseconds
    pub sweep_interval_ms: u64,
    /// Hard retention ceiling for revokes in seconds
    pub retention_ceiling_secs: u64,
    /// Watermark lag behind `now` when no call is pending, in milliseconds
    pub idle_watermark_lag_ms: u64,
    /// How far in the past a dispatch time may be, in seconds
    pub dispatch_window_secs: u64,
    /// Forward clock-skew tolerance for revoke receive times, in seconds
    pub revoke_skew_secs: u64,
    /// Initial guard-enabled value
    pub enabled: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            retention_ceiling_secs: DEFAULT_RETENTION_CEILING_SECS,
            idle_watermark_lag_ms: DEFAULT_IDLE_WATERMARK_LAG_MS,
            dispatch_window_secs: DEFAULT_DISPATCH_WINDOW_SECS,
            revoke_skew_secs: DEFAULT_REVOKE_SKEW_SECS,
            enabled: true,
        }
    }
}

impl GuardConfig {
    /// Loads configuration from `RESCIND_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed numbers are errors.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let number = |suffix: &str, default: u64| -> Result<u64> {
            let name = format!("{ENV_PREFIX}{suffix}");
            match lookup(&name) {
                None => Ok(default),
                Some(raw) => raw.trim().parse().map_err(|_| {
                    RescindError::ConfigError(format!("{name} must be a non-negative integer, got '{raw}'"))
                }),
            }
        };

        let config = Self {
            sweep_interval_ms: number("SWEEP_INTERVAL_MS", defaults.sweep_interval_ms)?,
            retention_ceiling_secs: number("RETENTION_CEILING_SECS", defaults.retention_ceiling_secs)?,
            idle_watermark_lag_ms: number("IDLE_WATERMARK_LAG_MS", defaults.idle_watermark_lag_ms)?,
            dispatch_window_secs: number("DISPATCH_WINDOW_SECS", defaults.dispatch_window_secs)?,
            revoke_skew_secs: number("REVOKE_SKEW_SECS", defaults.revoke_skew_secs)?,
            enabled: lookup(&format!("{ENV_PREFIX}GUARD_ENABLED"))
                .map(|v| {
                    let v = v.trim();
                    v != "false" && v != "0"
                })
                .unwrap_or(defaults.enabled),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that the intervals are usable.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_ms == 0 {
            return Err(RescindError::ConfigError("sweep interval must be positive".into()));
        }
        if self.retention_ceiling_secs == 0 {
            return Err(RescindError::ConfigError("retention ceiling must be positive".into()));
        }
        if self.retention_ceiling() < self.sweep_interval() {
            return Err(RescindError::ConfigError(format!(
                "retention ceiling ({}s) is shorter than the sweep interval ({}ms)",
                self.retention_ceiling_secs, self.sweep_interval_ms
            )));
        }
        Ok(())
    }

    /// Sets the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets the retention ceiling.
    pub fn with_retention_ceiling(mut self, ceiling: Duration) -> Self {
        self.retention_ceiling_secs = ceiling.as_secs();
        self
    }

    /// Starts the guard disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Builds a runtime switch seeded from `enabled`.
    pub fn toggle(&self) -> GuardToggle {
        GuardToggle::new(self.enabled)
    }

    /// Reclaimer tick interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Hard retention ceiling.
    pub fn retention_ceiling(&self) -> Duration {
        Duration::from_secs(self.retention_ceiling_secs)
    }

    /// Watermark lag when idle.
    pub fn idle_watermark_lag(&self) -> Duration {
        Duration::from_millis(self.idle_watermark_lag_ms)
    }

    /// Accepted age of a dispatch time.
    pub fn dispatch_window(&self) -> Duration {
        Duration::from_secs(self.dispatch_window_secs)
    }

    /// Accepted lead of a revoke receive time.
    pub fn revoke_skew(&self) -> Duration {
        Duration::from_secs(self.revoke_skew_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rescind_core::GuardSwitch;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GuardConfig::default();
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
        assert_eq!(config.retention_ceiling(), Duration::from_secs(3600));
        assert_eq!(config.dispatch_window(), Duration::from_secs(300));
        assert!(config.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = GuardConfig::from_lookup(lookup(&[
            ("RESCIND_SWEEP_INTERVAL_MS", "250"),
            ("RESCIND_RETENTION_CEILING_SECS", " 120 "),
            ("RESCIND_GUARD_ENABLED", "false"),
        ]))
        .unwrap();
        assert_eq!(config.sweep_interval_ms, 250);
        assert_eq!(config.retention_ceiling_secs, 120);
        assert!(!config.enabled);
        assert!(!config.toggle().is_enabled());
        assert_eq!(config.revoke_skew_secs, DEFAULT_REVOKE_SKEW_SECS);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = GuardConfig::from_lookup(lookup(&[("RESCIND_SWEEP_INTERVAL_MS", "fast")])).unwrap_err();
        assert!(matches!(err, RescindError::ConfigError(_)));
        assert!(err.to_string().contains("RESCIND_SWEEP_INTERVAL_MS"));
    }

    #[test]
    fn test_validate() {
        assert!(GuardConfig::default()
            .with_sweep_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(GuardConfig::default()
            .with_sweep_interval(Duration::from_secs(10))
            .with_retention_ceiling(Duration::from_secs(5))
            .validate()
            .is_err());
    }

    #[test]
    fn test_serde_partial() {
        let config: GuardConfig = serde_json::from_str(r#"{"enabled": false}"#).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.sweep_interval_ms, DEFAULT_SWEEP_INTERVAL_MS);
    }
}
