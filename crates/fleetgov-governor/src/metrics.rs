//! Governor inputs and outputs

use serde::{Deserialize, Serialize};

/// One telemetry sample consumed by [`GpuGovernor::update`](crate::GpuGovernor::update)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpuMetrics {
    /// Aggregate compute utilisation (0-1)
    pub utilisation: f64,
    /// Aggregate memory utilisation (0-1)
    pub memory_utilisation: f64,
    /// Hottest GPU temperature in degrees Celsius
    pub temperature: f64,
    /// Items waiting across queues
    pub backlog: f64,
    /// Backlog the fleet is sized for; must be > 0
    pub backlog_target: f64,
    /// Current dispatcher concurrency
    pub concurrency: f64,
    /// Current micro-batch size
    pub micro_batch: u32,
    /// Current generation token budget
    pub max_new_tokens: u32,
}

impl GpuMetrics {
    /// Replace the backlog with a freshly measured value
    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog as f64;
        self
    }
}

/// Dispatch tuning produced by one governor tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorDecision {
    /// Multiplier applied to dispatcher concurrency
    pub concurrency_scale: f64,
    /// Micro-batch size to use until the next tick
    pub micro_batch: u32,
    /// Token budget to use until the next tick
    pub max_new_tokens: u32,
    /// Route overflow work to CPU fallbacks
    pub divert_to_cpu: bool,
    /// Queues to stop draining until the next tick
    pub pause_queues: Vec<String>,
}

impl GovernorDecision {
    /// Whether the given queue should be drained this tick
    pub fn is_paused(&self, queue: &str) -> bool {
        self.pause_queues.iter().any(|q| q == queue)
    }
}
