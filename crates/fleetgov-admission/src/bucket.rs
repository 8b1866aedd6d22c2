//! Token bucket with an inflight cap

use fleetgov_core::Quota;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Why a unit of work was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Not enough tokens for the requested weight
    RateLimit,
    /// The bucket already has `max_inflight` admitted units
    MaxInflight,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::RateLimit => write!(f, "rate_limit"),
            RejectReason::MaxInflight => write!(f, "max_inflight"),
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    /// Whether the work may proceed
    pub allowed: bool,
    /// Set when `allowed` is false
    pub reason: Option<RejectReason>,
}

impl AdmissionDecision {
    /// An accepted decision
    pub fn accept() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// A rejected decision
    pub fn reject(reason: RejectReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Read-only view of one bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    /// Tokens as of the last refill
    pub tokens: f64,
    /// Bucket capacity (the quota burst)
    pub max_tokens: f64,
    /// Units currently admitted
    pub inflight: u32,
    /// Inflight cap
    pub max_inflight: u32,
}

/// Continuously refilled token bucket plus an inflight counter
///
/// Tokens stay within `[0, burst]` and inflight within `[0, max_inflight]`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    quota: Quota,
    tokens: f64,
    last_refill: Instant,
    inflight: u32,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(quota: Quota, now: Instant) -> Self {
        Self {
            quota,
            tokens: f64::from(quota.burst),
            last_refill: now,
            inflight: 0,
        }
    }

    /// The quota this bucket enforces
    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// Try to admit one unit costing `weight` tokens
    ///
    /// The inflight cap is checked before tokens, so a saturated bucket
    /// rejects with [`RejectReason::MaxInflight`] without spending anything.
    pub fn try_acquire(&mut self, weight: u32, now: Instant) -> AdmissionDecision {
        self.refill(now);
        if self.inflight >= self.quota.max_inflight {
            return AdmissionDecision::reject(RejectReason::MaxInflight);
        }
        let cost = f64::from(weight);
        if self.tokens < cost {
            return AdmissionDecision::reject(RejectReason::RateLimit);
        }
        self.tokens -= cost;
        self.inflight += 1;
        AdmissionDecision::accept()
    }

    /// Give back concurrency; consumed tokens are never restored
    pub fn release(&mut self, weight: u32) {
        self.inflight = self.inflight.saturating_sub(weight);
    }

    /// Current state without refilling
    pub fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            tokens: self.tokens,
            max_tokens: f64::from(self.quota.burst),
            inflight: self.inflight,
            max_inflight: self.quota.max_inflight,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed == 0.0 {
            return;
        }
        self.tokens = (self.tokens + elapsed * self.quota.rate).min(f64::from(self.quota.burst));
        self.last_refill = now;
    }
}
