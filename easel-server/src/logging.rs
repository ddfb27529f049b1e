use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Crates whose events pass the default filter.
const LOG_TARGETS: &[&str] = &["easel_server", "easel_core", "tower_http"];

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub json_format: bool,
}

impl LoggingConfig {
    /// Unknown level names fall back to INFO.
    pub fn new(level: &str, json_format: bool) -> Self {
        Self {
            level: level.trim().parse().unwrap_or(Level::INFO),
            json_format,
        }
    }

    fn filter(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        LOG_TARGETS
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Installs the global subscriber. `RUST_LOG`, when set, overrides the
/// configured level. Fails if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.filter()));

    let layer = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true);
    let layer = if config.json_format {
        layer.json().flatten_event(true).boxed()
    } else {
        layer.boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_per_target_filter() {
        let config = LoggingConfig::new("DEBUG", false);
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(
            config.filter(),
            "easel_server=debug,easel_core=debug,tower_http=debug"
        );
    }

    #[test]
    fn unknown_level_defaults_to_info() {
        assert_eq!(LoggingConfig::new("chatty", true).level, Level::INFO);
    }

    #[test]
    fn second_init_reports_an_error() {
        let config = LoggingConfig::new("info", false);
        let _ = init_logging(&config);
        let second = init_logging(&config);
        assert!(second.is_err());
    }
}
