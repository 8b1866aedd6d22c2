//! fleetgov-scheduler: MIG-aware GPU job scheduler for fleetgov
//!
//! This crate places admitted jobs onto GPU slices:
//! - Profile matching against MIG slices
//! - Thermal and utilisation headroom ceilings
//! - Least-loaded-first placement with per-job outcomes

pub mod placement;
pub mod scheduler;

pub use placement::{
    LeastLoadedStrategy, Placement, PlacementStrategy, SliceChoice, UnplacedReason,
};
pub use scheduler::JobScheduler;
