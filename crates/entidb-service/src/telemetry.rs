//! Tracing subscriber set-up.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use entidb_core::config::{LogFormat, LoggingConfig};
use entidb_core::{CoreError, CoreResult};

/// Filter from `RUST_LOG`, falling back to the configured directive.
pub fn env_filter(config: &LoggingConfig) -> CoreResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|err| {
            CoreError::validation(format!("invalid logging.filter `{}`: {err}", config.filter))
        }),
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LoggingConfig) -> CoreResult<()> {
    let filter = env_filter(config)?;
    let registry = Registry::default().with(filter);
    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true),
            )
            .try_init(),
    };
    installed.map_err(|err| CoreError::invalid_state(format!("tracing already initialised: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_filters_are_rejected() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            filter: "entidb=notalevel".to_string(),
            format: LogFormat::Json,
        };
        assert!(env_filter(&config).is_err());
    }

    #[test]
    fn second_initialisation_fails() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
