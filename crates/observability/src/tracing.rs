//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Filter used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
    /// JSON lines when `true`, human-readable text otherwise.
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            json: true,
        }
    }
}

impl ObservabilityConfig {
    /// Human-readable output at `filter`, for local runs and tests.
    pub fn pretty(filter: impl Into<String>) -> Self {
        Self {
            default_filter: filter.into(),
            json: false,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Install the global subscriber. Subsequent calls are no-ops returning `false`.
pub fn init_with(config: &ObservabilityConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let installed = if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };
    if installed {
        ::tracing::debug!(filter = %config.default_filter, json = config.json, "tracing initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_json_at_info() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.default_filter, "info");
        assert!(config.json);
        assert!(!ObservabilityConfig::pretty("debug").json);
    }

    #[test]
    fn second_initialization_is_a_no_op() {
        let first = init_with(&ObservabilityConfig::pretty("debug"));
        let second = init_with(&ObservabilityConfig::default());
        assert!(first);
        assert!(!second);
    }
}
