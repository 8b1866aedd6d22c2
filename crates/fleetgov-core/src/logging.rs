//! Tracing subscriber bootstrap

use crate::{FleetError, FleetResult, LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber described by `config`
///
/// `RUST_LOG` takes precedence over the configured level when set. Installing
/// a second subscriber fails with [`FleetError::Config`].
pub fn init(config: &LoggingConfig) -> FleetResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| FleetError::Config(format!("Invalid log level '{}': {}", config.level, e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| FleetError::Config(format!("Failed to set subscriber: {}", e)))
}
