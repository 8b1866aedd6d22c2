//! fleetgov-core: Core types for the fleetgov control plane
//!
//! This crate provides the types shared by every fleetgov component:
//! - Configuration schema and validation
//! - Error handling
//! - Injectable monotonic clock
//! - GPU fleet model (GPUs, MIG slices, jobs, allocations)
//! - Logging bootstrap

pub mod clock;
pub mod config;
pub mod error;
pub mod gpu;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use gpu::*;
