// Logging setup for the CLI
//
// Engine events are emitted through `tracing`; this installs a console
// subscriber on stderr so report output on stdout stays machine-readable.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "workyard=info,workyard_engine=info";

/// Configuration for console logging
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Whether to enable console logging
    pub enable_console: bool,
    /// Log filter (e.g., "info", "workyard_engine=debug")
    pub log_filter: Option<String>,
    /// Include event targets in log lines
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_console: true,
            log_filter: None,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    /// - `WORKYARD_LOG_CONSOLE`: "false" disables console logging
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            enable_console: lookup("WORKYARD_LOG_CONSOLE")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
            log_filter: lookup("RUST_LOG").or_else(|| lookup("LOG_LEVEL")),
            with_target: true,
        }
    }

    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Install the global tracing subscriber
pub fn init_telemetry(config: TelemetryConfig) {
    let console_layer = if config.enable_console {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(config.with_target)
                .with_filter(config.filter()),
        )
    } else {
        None
    };

    tracing_subscriber::registry().with(console_layer).init();

    tracing::debug!(
        filter = config.log_filter.as_deref().unwrap_or(DEFAULT_FILTER),
        "Console logging enabled"
    );
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
    fn test_defaults() {
        let config = TelemetryConfig::from_lookup(lookup(&[]));
        assert!(config.enable_console);
        assert!(config.log_filter.is_none());
    }

    #[test]
    fn test_rust_log_wins_over_log_level() {
        let config = TelemetryConfig::from_lookup(lookup(&[
            ("RUST_LOG", "workyard_engine=debug"),
            ("LOG_LEVEL", "warn"),
        ]));
        assert_eq!(config.log_filter.as_deref(), Some("workyard_engine=debug"));

        let config = TelemetryConfig::from_lookup(lookup(&[("LOG_LEVEL", "warn")]));
        assert_eq!(config.log_filter.as_deref(), Some("warn"));
    }

    #[test]
    fn test_console_can_be_disabled() {
        let config = TelemetryConfig::from_lookup(lookup(&[("WORKYARD_LOG_CONSOLE", "FALSE")]));
        assert!(!config.enable_console);
    }
}
