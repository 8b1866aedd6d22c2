//! Synthetic load simulation on simulated time

use crate::dispatcher::WorkItem;
use crate::mix::TrafficMix;
use fleetgov_admission::AdmissionController;
use fleetgov_core::{FleetError, FleetResult};
use fleetgov_governor::{GovernorDecision, GpuGovernor, GpuMetrics};
use fleetgov_queue::QueueManager;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Simulation knobs
#[derive(Debug, Clone)]
pub struct SimulationParams {
    /// Arrivals per second
    pub qps: u32,
    /// Simulated run length in seconds
    pub duration_secs: f64,
    /// Tenant every request is charged to
    pub tenant: String,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            qps: 10,
            duration_secs: 60.0,
            tenant: "default".to_string(),
        }
    }
}

/// Counters gathered while a simulation runs
#[derive(Debug, Clone, Default)]
pub struct SimulationTally {
    /// Admitted requests per queue
    pub enqueued: BTreeMap<String, u64>,
    /// Rejected requests per queue
    pub rejected: BTreeMap<String, u64>,
    /// Total queue depth after each arrival
    pub backlog_history: Vec<f64>,
    /// Arrival rate of the run
    pub qps: u32,
    /// Simulated run length in seconds
    pub duration_secs: f64,
}

impl SimulationTally {
    fn total_enqueued(&self) -> u64 {
        self.enqueued.values().sum()
    }

    fn total_rejected(&self) -> u64 {
        self.rejected.values().sum()
    }
}

/// Outcome of [`run_simulation`]
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Admitted requests per queue
    pub enqueued: BTreeMap<String, u64>,
    /// Rejected requests per queue
    pub rejected: BTreeMap<String, u64>,
    /// Arrivals generated
    pub total_requests: u64,
    /// Simulated run length in seconds
    pub duration_secs: f64,
    /// Governor output for the final sample, when a governor was supplied
    pub governor_decision: Option<GovernorDecision>,
}

impl fmt::Display for SimulationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} enqueued={:?} rejected={:?} duration={}s",
            self.total_requests, self.enqueued, self.rejected, self.duration_secs
        )?;
        if let Some(decision) = &self.governor_decision {
            write!(
                f,
                " governor={:.2}/{}mb/{}tok",
                decision.concurrency_scale, decision.micro_batch, decision.max_new_tokens
            )?;
        }
        Ok(())
    }
}

/// Telemetry sample derived from a finished run
///
/// Utilisation is the admitted fraction, memory and temperature grow with
/// peak and final backlog respectively.
pub fn default_metrics(tally: &SimulationTally) -> GpuMetrics {
    let enqueued = tally.total_enqueued() as f64;
    let total = (tally.total_enqueued() + tally.total_rejected()).max(1) as f64;
    let peak = tally.backlog_history.iter().copied().fold(0.0, f64::max);
    let last = tally.backlog_history.last().copied().unwrap_or(0.0);

    GpuMetrics {
        utilisation: (enqueued / total).min(1.0),
        memory_utilisation: (0.55 + 0.01 * peak).min(0.99),
        temperature: (58.0 + 0.4 * last).min(95.0),
        backlog: peak,
        backlog_target: f64::from(tally.qps).max(1.0),
        concurrency: (enqueued / tally.duration_secs.max(1e-6)).max(1.0),
        micro_batch: 4,
        max_new_tokens: 1024,
    }
}

/// Drive `round(qps * duration)` fixed-interval arrivals through admission
/// and the queues
///
/// Time is simulated from the controller clock's current instant, so the
/// run is deterministic and does not sleep. Admitted requests are enqueued,
/// released and dequeued straight away. When a governor is given it is fed
/// one sample at the end of the run, built by `metrics_fn` or
/// [`default_metrics`].
pub fn run_simulation(
    params: &SimulationParams,
    mix: &TrafficMix,
    controller: &AdmissionController,
    queues: &QueueManager<WorkItem>,
    governor: Option<&mut GpuGovernor>,
    metrics_fn: Option<&dyn Fn(&SimulationTally) -> GpuMetrics>,
) -> FleetResult<SimulationResult> {
    if params.qps == 0 {
        return Err(FleetError::Validation(
            "qps must be greater than zero".to_string(),
        ));
    }
    if !(params.duration_secs.is_finite() && params.duration_secs > 0.0) {
        return Err(FleetError::Validation(
            "duration must be greater than zero".to_string(),
        ));
    }

    let interval = Duration::from_secs_f64(1.0 / f64::from(params.qps));
    let total_requests = (params.duration_secs * f64::from(params.qps)).round() as u64;
    let start = controller.clock().now();

    info!(
        qps = params.qps,
        duration_secs = params.duration_secs,
        tenant = %params.tenant,
        total_requests,
        "Starting load simulation"
    );

    let mut tally = SimulationTally {
        qps: params.qps,
        duration_secs: params.duration_secs,
        ..SimulationTally::default()
    };
    let mut arrivals = mix.arrivals();
    let mut now = start;

    for _ in 0..total_requests {
        let Some(queue) = arrivals.next() else {
            break;
        };
        let decision = controller.allow_at(&params.tenant, queue, 1, now)?;
        if decision.allowed {
            let item = WorkItem::new(params.tenant.as_str(), queue, queue);
            queues.enqueue_at(queue, item, now)?;
            controller.release(&params.tenant, queue, 1)?;
            queues.dequeue(queue)?;
            *tally.enqueued.entry(queue.to_string()).or_default() += 1;
        } else {
            *tally.rejected.entry(queue.to_string()).or_default() += 1;
        }
        tally.backlog_history.push(queues.total_depth() as f64);
        now += interval;
    }

    let governor_decision = match governor {
        Some(governor) => {
            let metrics = match metrics_fn {
                Some(f) => f(&tally),
                None => default_metrics(&tally),
            };
            debug!(?metrics, "Feeding simulated telemetry to governor");
            Some(governor.update(&metrics, now)?)
        }
        None => None,
    };

    let result = SimulationResult {
        enqueued: tally.enqueued,
        rejected: tally.rejected,
        total_requests,
        duration_secs: params.duration_secs,
        governor_decision,
    };
    info!(summary = %result, "Load simulation finished");
    Ok(result)
}
