//! fleetgov-dispatch: Control loop wiring for fleetgov
//!
//! This crate composes the fleetgov components:
//! - Dispatcher: admission, queueing, governor tuning and slice placement
//! - Weighted traffic mixes
//! - Deterministic load simulation

pub mod dispatcher;
pub mod mix;
pub mod simulation;

pub use dispatcher::{Dispatcher, TickReport, WorkItem};
pub use mix::{parse_mix, TrafficMix};
pub use simulation::{
    default_metrics, run_simulation, SimulationParams, SimulationResult, SimulationTally,
};
