//! Controller configuration.

use std::time::Duration;

use crate::prober::ProbeMode;

pub const PROBE_INTERVAL_ENV: &str = "EVALQ_PROBE_INTERVAL_MS";
pub const PROBE_MODE_ENV: &str = "EVALQ_PROBE_MODE";

/// Shortest probe interval accepted; `tokio::time::interval` rejects zero.
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {what}: '{value}'")]
    Invalid { what: &'static str, value: String },
}

impl ConfigError {
    pub fn invalid(what: &'static str, value: impl Into<String>) -> Self {
        Self::Invalid {
            what,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub probe_interval: Duration,
    pub probe_mode: ProbeMode,
    /// Capacity of the command channel into the event loop.
    pub command_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(1),
            probe_mode: ProbeMode::UntilDrained,
            command_buffer: 32,
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `EVALQ_PROBE_INTERVAL_MS` and `EVALQ_PROBE_MODE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(PROBE_INTERVAL_ENV) {
            let millis: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("probe interval", raw.as_str()))?;
            if millis == 0 {
                return Err(ConfigError::invalid("probe interval", raw));
            }
            config.probe_interval = Duration::from_millis(millis);
        }

        if let Some(raw) = lookup(PROBE_MODE_ENV) {
            config.probe_mode = raw.parse()?;
        }

        Ok(config)
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval.max(MIN_PROBE_INTERVAL);
        self
    }

    pub fn with_probe_mode(mut self, mode: ProbeMode) -> Self {
        self.probe_mode = mode;
        self
    }

    pub fn with_command_buffer(mut self, n: usize) -> Self {
        self.command_buffer = n.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = ControllerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.probe_interval, Duration::from_secs(1));
        assert_eq!(config.probe_mode, ProbeMode::UntilDrained);
    }

    #[test]
    fn env_overrides() {
        let config = ControllerConfig::from_lookup(lookup(&[
            (PROBE_INTERVAL_ENV, "250"),
            (PROBE_MODE_ENV, "bounded:4"),
        ]))
        .unwrap();
        assert_eq!(config.probe_interval, Duration::from_millis(250));
        assert_eq!(config.probe_mode, ProbeMode::Bounded { pings: 4 });
    }

    #[test]
    fn zero_or_garbage_interval_is_rejected() {
        assert!(ControllerConfig::from_lookup(lookup(&[(PROBE_INTERVAL_ENV, "0")])).is_err());
        assert_eq!(
            ControllerConfig::from_lookup(lookup(&[(PROBE_INTERVAL_ENV, "soon")])).unwrap_err(),
            ConfigError::invalid("probe interval", "soon")
        );
    }

    #[test]
    fn builder_clamps_command_buffer() {
        let config = ControllerConfig::new()
            .with_command_buffer(0)
            .with_probe_mode(ProbeMode::Disabled);
        assert_eq!(config.command_buffer, 1);
        assert_eq!(config.probe_mode, ProbeMode::Disabled);
    }

    #[test]
    fn builder_clamps_zero_probe_interval() {
        let config = ControllerConfig::new().with_probe_interval(Duration::ZERO);
        assert_eq!(config.probe_interval, MIN_PROBE_INTERVAL);
    }
}
