use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Dispatcher settings.
///
/// `debug` is a single switch: it turns on validation, dispatch logging, and
/// history recording together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    pub debug: bool,
    /// Maximum retained history entries. `None` keeps everything.
    pub history_limit: Option<usize>,
    /// Maximum nesting of conditional sub-sequences.
    pub max_depth: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            debug: false,
            history_limit: None,
            max_depth: 32,
        }
    }
}

impl DispatcherConfig {
    /// Defaults with debug mode on.
    pub fn debug() -> Self {
        Self {
            debug: true,
            ..Self::default()
        }
    }

    /// Load from `SWITCHYARD_DEBUG`, `SWITCHYARD_HISTORY_LIMIT` and
    /// `SWITCHYARD_MAX_DEPTH`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            debug: optional_env("SWITCHYARD_DEBUG")?.unwrap_or(defaults.debug),
            history_limit: optional_env("SWITCHYARD_HISTORY_LIMIT")?,
            max_depth: optional_env("SWITCHYARD_MAX_DEPTH")?.unwrap_or(defaults.max_depth),
        };

        config.log_settings();
        Ok(config)
    }

    fn log_settings(&self) {
        tracing::info!("Dispatcher config loaded:");
        tracing::info!("  SWITCHYARD_DEBUG: {}", self.debug);
        tracing::info!(
            "  SWITCHYARD_HISTORY_LIMIT: {}",
            self.history_limit
                .map(|n| n.to_string())
                .unwrap_or_else(|| "<unbounded>".to_string())
        );
        tracing::info!("  SWITCHYARD_MAX_DEPTH: {}", self.max_depth);
    }
}

fn optional_env<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_debug_off() {
        let config = DispatcherConfig::default();
        assert!(!config.debug);
        assert_eq!(config.history_limit, None);
        assert_eq!(config.max_depth, 32);
    }

    #[test]
    fn deserializes_partial_tables() {
        let config: DispatcherConfig =
            serde_json::from_value(serde_json::json!({"debug": true})).unwrap();
        assert_eq!(config, DispatcherConfig::debug());
    }
}
