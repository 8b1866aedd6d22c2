//! Dispatcher wiring admission, queues, governor and scheduler together

use fleetgov_admission::{AdmissionController, AdmissionDecision};
use fleetgov_core::{Allocation, FleetError, FleetResult, Job};
use fleetgov_governor::{GovernorDecision, GpuGovernor, GpuMetrics};
use fleetgov_queue::QueueManager;
use fleetgov_scheduler::{JobScheduler, Placement};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Inflight units held by one admitted item, whatever its token weight
const ADMITTED_SLOT: u32 = 1;

/// A unit of admitted work waiting for a GPU slice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Work identifier, reused as the scheduler job id
    pub id: String,
    /// Submitting tenant
    pub tenant: String,
    /// Queue the work is admitted into
    pub queue: String,
    /// Slice profile the work needs
    pub profile: String,
    /// Token cost charged at admission
    pub weight: u32,
}

impl WorkItem {
    /// Create a unit-weight work item with a fresh id
    pub fn new(
        tenant: impl Into<String>,
        queue: impl Into<String>,
        profile: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant: tenant.into(),
            queue: queue.into(),
            profile: profile.into(),
            weight: 1,
        }
    }

    /// Set the admission weight
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

/// What one dispatcher tick did
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Governor output used for this tick
    pub decision: GovernorDecision,
    /// Items drained per queue, in drain order
    pub drained: Vec<(String, usize)>,
    /// One outcome per drained item, in drain order
    pub placements: Vec<Placement>,
}

impl TickReport {
    /// Number of drained items that received a slice
    pub fn allocated(&self) -> usize {
        self.placements
            .iter()
            .filter(|p| p.allocation().is_some())
            .count()
    }
}

/// Reference control loop
///
/// `submit` may be called from many threads through a shared reference;
/// `tick` and `complete` belong to the single dispatcher loop.
pub struct Dispatcher {
    admission: Arc<AdmissionController>,
    queues: Arc<QueueManager<WorkItem>>,
    governor: GpuGovernor,
    scheduler: JobScheduler,
    drain_weights: Vec<(String, u32)>,
    running: HashMap<String, (WorkItem, Allocation)>,
}

impl Dispatcher {
    /// Create a dispatcher draining every declared queue with weight 1
    pub fn new(
        admission: Arc<AdmissionController>,
        queues: Arc<QueueManager<WorkItem>>,
        governor: GpuGovernor,
        scheduler: JobScheduler,
    ) -> Self {
        let drain_weights = queues.names().map(|name| (name.to_string(), 1)).collect();
        Self {
            admission,
            queues,
            governor,
            scheduler,
            drain_weights,
            running: HashMap::new(),
        }
    }

    /// Replace the drain order and per-queue weights
    pub fn with_drain_weights<I, S>(mut self, weights: I) -> FleetResult<Self>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut drain_weights = Vec::new();
        for (queue, weight) in weights {
            let queue = queue.into();
            self.queues.depth(&queue)?;
            if weight == 0 {
                return Err(FleetError::Validation(format!(
                    "Drain weight for '{}' must be > 0",
                    queue
                )));
            }
            drain_weights.push((queue, weight));
        }
        if drain_weights.is_empty() {
            return Err(FleetError::Validation(
                "At least one queue must be drained".to_string(),
            ));
        }
        self.drain_weights = drain_weights;
        Ok(self)
    }

    /// Admit and enqueue a work item
    pub fn submit(&self, item: WorkItem) -> FleetResult<AdmissionDecision> {
        let decision = self.admission.allow(&item.tenant, &item.queue, item.weight)?;
        if !decision.allowed {
            return Ok(decision);
        }
        let (tenant, queue) = (item.tenant.clone(), item.queue.clone());
        if let Err(e) = self.queues.enqueue(&queue, item) {
            self.admission.release(&tenant, &queue, ADMITTED_SLOT)?;
            return Err(e);
        }
        Ok(decision)
    }

    fn release_admission(&self, item: &WorkItem) -> FleetResult<()> {
        self.admission
            .release(&item.tenant, &item.queue, ADMITTED_SLOT)
    }

    /// Run one control step
    ///
    /// The sample's backlog is replaced with the live queue depth before the
    /// governor sees it. Each non-paused queue then yields up to
    /// `weight x round(concurrency_scale)` micro-batches, and every drained item
    /// is offered to the scheduler. Items that find no slice give their
    /// admission back and are reported as unplaced. Every placement is
    /// recorded before the first admission release error is returned.
    pub fn tick(&mut self, metrics: GpuMetrics, now: Instant) -> FleetResult<TickReport> {
        let metrics = metrics.with_backlog(self.queues.total_depth());
        let decision = self.governor.update(&metrics, now)?;

        let batches_per_weight = decision.concurrency_scale.round().max(1.0) as usize;
        let mut drained = Vec::new();
        let mut items = Vec::new();
        for (queue, weight) in &self.drain_weights {
            if decision.is_paused(queue) {
                debug!(queue = %queue, "Queue paused");
                continue;
            }
            let budget = *weight as usize * batches_per_weight * decision.micro_batch as usize;
            let batch = self.queues.dequeue_batch(queue, budget)?;
            drained.push((queue.clone(), batch.len()));
            items.extend(batch);
        }

        let jobs: Vec<Job> = items
            .iter()
            .map(|item| Job::new(item.id.clone(), item.profile.clone()))
            .collect();
        let placements = self.scheduler.place(jobs);

        let mut release_error = None;
        for (item, placement) in items.into_iter().zip(&placements) {
            match placement {
                Placement::Allocated(allocation) => {
                    self.running
                        .insert(item.id.clone(), (item, allocation.clone()));
                }
                Placement::Unplaced { reason, .. } => {
                    warn!(work_id = %item.id, queue = %item.queue, %reason, "Work not placed");
                    if let Err(e) = self.release_admission(&item) {
                        release_error.get_or_insert(e);
                    }
                }
            }
        }
        if let Some(e) = release_error {
            return Err(e);
        }

        let report = TickReport {
            decision,
            drained,
            placements,
        };
        info!(
            backlog = metrics.backlog,
            scale = report.decision.concurrency_scale,
            allocated = report.allocated(),
            unplaced = report.placements.len() - report.allocated(),
            "Dispatcher tick"
        );
        Ok(report)
    }

    /// Mark running work as finished, freeing its slot and admission
    pub fn complete(&mut self, work_id: &str) -> FleetResult<WorkItem> {
        let (item, allocation) = self
            .running
            .remove(work_id)
            .ok_or_else(|| FleetError::UnknownJob(work_id.to_string()))?;
        self.scheduler.release(&allocation)?;
        self.release_admission(&item)?;
        debug!(work_id, gpu = %allocation.gpu_id, "Work completed");
        Ok(item)
    }

    /// Refresh a GPU's telemetry in the scheduler's fleet model
    pub fn refresh_gpu(
        &mut self,
        gpu_id: &str,
        utilisation: f64,
        temperature: f64,
    ) -> FleetResult<()> {
        self.scheduler
            .update_telemetry(gpu_id, utilisation, temperature)
    }

    /// Work currently holding a slot
    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// Start a new control epoch
    pub fn reset_governor(&mut self) {
        self.governor.reset();
    }

    /// Scheduler fleet view
    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }
}
