//! Per-tenant, per-queue admission controller

use crate::bucket::{AdmissionDecision, BucketSnapshot, TokenBucket};
use fleetgov_core::{validate_admission, AdmissionConfig, FleetError, FleetResult, SharedClock};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, info};

type BucketMap = HashMap<String, HashMap<String, Mutex<TokenBucket>>>;

/// Tenant -> queue -> bucket view returned by [`AdmissionController::snapshot`]
pub type AdmissionSnapshot = BTreeMap<String, BTreeMap<String, BucketSnapshot>>;

/// Gate deciding whether a unit of work may enter a queue
///
/// The bucket map is fixed at construction; each bucket carries its own lock
/// so callers on different (tenant, queue) pairs never contend.
pub struct AdmissionController {
    buckets: BucketMap,
    clock: SharedClock,
}

impl AdmissionController {
    /// Create a controller from validated quotas
    pub fn new(quotas: &AdmissionConfig, clock: SharedClock) -> FleetResult<Self> {
        validate_admission(quotas)?;
        let now = clock.now();
        let buckets: BucketMap = quotas
            .iter()
            .map(|(tenant, queues)| {
                let tenant_buckets = queues
                    .iter()
                    .map(|(queue, quota)| {
                        (queue.clone(), Mutex::new(TokenBucket::new(*quota, now)))
                    })
                    .collect();
                (tenant.clone(), tenant_buckets)
            })
            .collect();

        info!(
            tenants = buckets.len(),
            buckets = buckets.values().map(HashMap::len).sum::<usize>(),
            "Admission controller initialized"
        );

        Ok(Self { buckets, clock })
    }

    /// Evaluate a request at the clock's current instant
    pub fn allow(&self, tenant: &str, queue: &str, weight: u32) -> FleetResult<AdmissionDecision> {
        self.allow_at(tenant, queue, weight, self.clock.now())
    }

    /// Evaluate a request at an explicit instant
    pub fn allow_at(
        &self,
        tenant: &str,
        queue: &str,
        weight: u32,
        now: Instant,
    ) -> FleetResult<AdmissionDecision> {
        let decision = self.bucket(tenant, queue)?.lock().try_acquire(weight, now);
        match decision.reason {
            None => debug!(tenant, queue, weight, "Admitted"),
            Some(reason) => debug!(tenant, queue, weight, %reason, "Rejected"),
        }
        Ok(decision)
    }

    /// Return concurrency after a unit of work completes
    pub fn release(&self, tenant: &str, queue: &str, weight: u32) -> FleetResult<()> {
        self.bucket(tenant, queue)?.lock().release(weight);
        debug!(tenant, queue, weight, "Released");
        Ok(())
    }

    /// Current state of every bucket; does not refill
    pub fn snapshot(&self) -> AdmissionSnapshot {
        self.buckets
            .iter()
            .map(|(tenant, queues)| {
                let view = queues
                    .iter()
                    .map(|(queue, bucket)| (queue.clone(), bucket.lock().snapshot()))
                    .collect();
                (tenant.clone(), view)
            })
            .collect()
    }

    /// The clock driving [`allow`](Self::allow)
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    fn bucket(&self, tenant: &str, queue: &str) -> FleetResult<&Mutex<TokenBucket>> {
        let tenant_buckets = self
            .buckets
            .get(tenant)
            .ok_or_else(|| FleetError::UnknownTenant(tenant.to_string()))?;
        tenant_buckets
            .get(queue)
            .ok_or_else(|| FleetError::UnknownQueue {
                tenant: tenant.to_string(),
                queue: queue.to_string(),
            })
    }
}
