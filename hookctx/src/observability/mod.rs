//! Logging setup.
//!
//! The library itself only emits `tracing` events. Agents embedding it call
//! [`init_logging`] once at startup, unless they install their own
//! subscriber.

use crate::config::LoggingConfig;
use crate::errors::HookError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`.
///
/// # Errors
///
/// Returns `HookError::Config` if the filter directive is invalid or a
/// global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), HookError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(&config.level)?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init()
    };
    installed.map_err(|e| HookError::Config(format!("cannot install subscriber: {e}")))
}

fn parse_filter(level: &str) -> Result<EnvFilter, HookError> {
    EnvFilter::try_new(level)
        .map_err(|e| HookError::Config(format!("invalid log filter '{level}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter() {
        assert!(parse_filter("info").is_ok());
        assert!(parse_filter("hookctx=debug,warn").is_ok());
        assert!(matches!(
            parse_filter("hookctx=loudest"),
            Err(HookError::Config(_))
        ));
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
