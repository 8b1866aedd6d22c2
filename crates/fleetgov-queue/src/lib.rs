//! fleetgov-queue: Work queues for fleetgov
//!
//! This crate tracks admitted work waiting for dispatch:
//! - A fixed set of named FIFO queues
//! - Arrival timestamps and throughput counters
//! - Backlog and head-of-line age metrics

pub mod manager;

pub use manager::{QueueItem, QueueManager, QueueSnapshot};
