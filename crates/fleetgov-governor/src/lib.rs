//! fleetgov-governor: GPU load governor for fleetgov
//!
//! A discrete-time PID controller with a backlog feed-forward term that
//! turns live GPU telemetry into dispatch tuning:
//! - Concurrency scale
//! - Micro-batch size and generation token budget
//! - Thermal and memory safety overrides

pub mod governor;
pub mod metrics;

pub use governor::{ControlState, GpuGovernor};
pub use metrics::{GovernorDecision, GpuMetrics};
