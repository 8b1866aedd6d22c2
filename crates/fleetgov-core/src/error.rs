//! Error types for fleetgov

use thiserror::Error;

/// Main error type for fleetgov
///
/// Admission rejections and unplaced jobs are ordinary decision values and
/// never surface through this type.
#[derive(Error, Debug)]
pub enum FleetError {
    /// Malformed quota, queue set, fleet or controller configuration
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration failure detected at call time or while loading config
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tenant not declared in the admission config
    #[error("Unknown tenant '{0}'")]
    UnknownTenant(String),

    /// Queue not declared for the given tenant
    #[error("Unknown queue '{queue}' for tenant '{tenant}'")]
    UnknownQueue { tenant: String, queue: String },

    /// Queue name not declared in the queue manager
    #[error("Unknown queue '{0}'")]
    UnknownQueueName(String),

    /// GPU not present in the fleet
    #[error("Unknown GPU '{0}'")]
    UnknownGpu(String),

    /// Slice not present on the given GPU
    #[error("Unknown slice '{slice}' on GPU '{gpu}'")]
    UnknownSlice { gpu: String, slice: String },

    /// Job not currently running
    #[error("Unknown job '{0}'")]
    UnknownJob(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FleetError {
    /// Whether this error is a lookup failure (an unknown name was referenced)
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            FleetError::UnknownTenant(_)
                | FleetError::UnknownQueue { .. }
                | FleetError::UnknownQueueName(_)
                | FleetError::UnknownGpu(_)
                | FleetError::UnknownSlice { .. }
                | FleetError::UnknownJob(_)
        )
    }
}

/// Result type for fleetgov operations
pub type FleetResult<T> = Result<T, FleetError>;

impl From<toml::de::Error> for FleetError {
    fn from(err: toml::de::Error) -> Self {
        FleetError::Config(err.to_string())
    }
}
