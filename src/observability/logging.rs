//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global `tracing` subscriber once per process
//! - Honour `RUST_LOG`, falling back to the configured level
//! - Emit pretty output for development, JSON lines for production

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::LogFormat;
use crate::config::ObservabilityConfig;

/// Build the filter: `RUST_LOG` wins, otherwise the configured level for this
/// crate and `tower_http`.
pub fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "sandbox_gateway={level},tower_http={level}",
            level = config.log_level
        ))
    })
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed, which happens
/// when several gateways share one test process.
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let (pretty, json) = match config.log_format {
        LogFormat::Pretty => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(pretty)
        .with(json)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_reported_not_fatal() {
        let config = ObservabilityConfig::default();
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }
}
