//! Structured logging setup.
//!
//! JSON output for production, pretty output for development. Audit events
//! are emitted under the `audit` target and can be routed separately with an
//! `EnvFilter` directive such as `audit=info`.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::config::ObservabilityConfig;

/// Initialize the tracing subscriber from configuration.
///
/// # Errors
///
/// Returns an error if the level string does not parse or a global
/// subscriber is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&config.log_level)?;

    if config.json_logging {
        let fmt_layer = fmt::layer()
            .json()
            .with_file(true)
            .with_line_number(true)
            .with_target(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        let config = ObservabilityConfig {
            log_level: "not a level,,=".to_string(),
            json_logging: false,
        };
        assert!(init_logging(&config).is_err());
    }
}
