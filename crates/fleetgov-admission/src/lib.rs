//! fleetgov-admission: Admission control for fleetgov
//!
//! This crate decides whether a unit of work may enter a queue:
//! - Continuously refilled token buckets per (tenant, queue)
//! - Inflight concurrency caps
//! - Read-only bucket snapshots for observability

pub mod bucket;
pub mod controller;

pub use bucket::{AdmissionDecision, BucketSnapshot, RejectReason, TokenBucket};
pub use controller::{AdmissionController, AdmissionSnapshot};
