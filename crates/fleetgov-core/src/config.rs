//! Configuration types for fleetgov
//!
//! The control plane is configured from a single TOML document that is
//! deserialized into [`ControlPlaneConfig`] and validated once at load time.

use crate::{FleetError, FleetResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

/// Tenant name -> queue name -> quota
pub type AdmissionConfig = BTreeMap<String, BTreeMap<String, Quota>>;

/// GPU id -> MIG profile -> slice capacity
pub type FleetTopology = BTreeMap<String, BTreeMap<String, u32>>;

/// Full control plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Declared work queues
    pub queues: QueueConfig,
    /// Per-tenant, per-queue admission quotas
    pub tenants: AdmissionConfig,
    /// GPU governor tuning
    #[serde(default)]
    pub governor: GovernorConfig,
    /// Scheduler headroom policy
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// GPU fleet topology
    pub fleet: FleetTopology,
}

impl ControlPlaneConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> FleetResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FleetError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(
            path = %path.display(),
            tenants = config.tenants.len(),
            queues = config.queues.names.len(),
            gpus = config.fleet.len(),
            "Loaded control plane config"
        );
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> FleetResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-section consistency
    pub fn validate(&self) -> FleetResult<()> {
        let declared = self.queues.validate()?;
        validate_admission(&self.tenants)?;
        for (tenant, queues) in &self.tenants {
            for queue in queues.keys() {
                if !declared.contains(queue.as_str()) {
                    return Err(FleetError::Validation(format!(
                        "Tenant '{}' references undeclared queue '{}'",
                        tenant, queue
                    )));
                }
            }
        }
        self.governor.validate()?;
        for queue in &self.governor.pause_queues_on_hot {
            if !declared.contains(queue.as_str()) {
                return Err(FleetError::Validation(format!(
                    "pause_queues_on_hot references undeclared queue '{}'",
                    queue
                )));
            }
        }
        self.scheduler.validate()?;
        validate_topology(&self.fleet)
    }
}

/// Rate limit and concurrency rule for one (tenant, queue) bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quota {
    /// Token refill rate per second
    pub rate: f64,
    /// Bucket capacity
    pub burst: u32,
    /// Maximum admitted units in flight
    pub max_inflight: u32,
}

impl Quota {
    /// Create a validated quota
    pub fn new(rate: f64, burst: u32, max_inflight: u32) -> FleetResult<Self> {
        let quota = Self {
            rate,
            burst,
            max_inflight,
        };
        quota.validate()?;
        Ok(quota)
    }

    /// Reject non-positive fields
    pub fn validate(&self) -> FleetResult<()> {
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return Err(FleetError::Validation("rate must be > 0".to_string()));
        }
        if self.burst == 0 {
            return Err(FleetError::Validation("burst must be > 0".to_string()));
        }
        if self.max_inflight == 0 {
            return Err(FleetError::Validation(
                "max_inflight must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validate a tenant -> queue -> quota mapping
pub fn validate_admission(config: &AdmissionConfig) -> FleetResult<()> {
    if config.is_empty() {
        return Err(FleetError::Validation(
            "At least one tenant quota is required".to_string(),
        ));
    }
    for (tenant, queues) in config {
        if tenant.is_empty() {
            return Err(FleetError::Validation(
                "Missing tenant identifier".to_string(),
            ));
        }
        if queues.is_empty() {
            return Err(FleetError::Validation(format!(
                "Tenant '{}' must define at least one queue",
                tenant
            )));
        }
        for (queue, quota) in queues {
            quota.validate().map_err(|e| match e {
                FleetError::Validation(msg) => {
                    FleetError::Validation(format!("Quota for {}/{}: {}", tenant, queue, msg))
                }
                other => other,
            })?;
        }
    }
    Ok(())
}

/// Declared work queues
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue names in declaration order
    pub names: Vec<String>,
}

impl QueueConfig {
    /// Returns the de-duplicated name set
    pub fn validate(&self) -> FleetResult<BTreeSet<&str>> {
        if self.names.is_empty() {
            return Err(FleetError::Validation(
                "At least one queue must be declared".to_string(),
            ));
        }
        if self.names.iter().any(|n| n.is_empty()) {
            return Err(FleetError::Validation(
                "Queue name cannot be empty".to_string(),
            ));
        }
        Ok(self.names.iter().map(String::as_str).collect())
    }
}

/// GPU governor tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Aggregate utilisation setpoint (0-1)
    pub target_util: f64,
    /// Proportional gain
    pub kp: f64,
    /// Integral gain
    pub ki: f64,
    /// Derivative gain
    pub kd: f64,
    /// Backlog feed-forward gain
    pub kf: f64,
    /// Anti-windup bound on the integral term
    pub integral_limit: f64,
    /// Lower bound of the backlog normalization divisor
    pub backlog_normalizer: f64,
    /// Smallest concurrency scale
    pub min_scale: f64,
    /// Largest concurrency scale
    pub max_scale: f64,
    /// Micro-batch floor
    pub base_micro_batch: u32,
    /// Micro-batch ceiling
    pub max_micro_batch: u32,
    /// Token budget floor
    pub min_max_new_tokens: u32,
    /// Token budget ceiling
    pub base_max_new_tokens: u32,
    /// Temperature (C) at which the safety override engages
    pub max_temperature: f64,
    /// Memory utilisation (0-1) at which the safety override engages
    pub max_memory: f64,
    /// Queues to pause while the safety override is active
    pub pause_queues_on_hot: Vec<String>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            target_util: 0.8,
            kp: 0.6,
            ki: 0.1,
            kd: 0.05,
            kf: 0.3,
            integral_limit: 1.0,
            backlog_normalizer: 100.0,
            min_scale: 0.25,
            max_scale: 2.0,
            base_micro_batch: 1,
            max_micro_batch: 32,
            min_max_new_tokens: 128,
            base_max_new_tokens: 2048,
            max_temperature: 85.0,
            max_memory: 0.85,
            pause_queues_on_hot: Vec::new(),
        }
    }
}

impl GovernorConfig {
    /// Check gains and bounds
    pub fn validate(&self) -> FleetResult<()> {
        let finite = [
            ("target_util", self.target_util),
            ("kp", self.kp),
            ("ki", self.ki),
            ("kd", self.kd),
            ("kf", self.kf),
            ("integral_limit", self.integral_limit),
            ("backlog_normalizer", self.backlog_normalizer),
            ("min_scale", self.min_scale),
            ("max_scale", self.max_scale),
            ("max_temperature", self.max_temperature),
            ("max_memory", self.max_memory),
        ];
        if let Some((name, _)) = finite.iter().find(|(_, v)| !v.is_finite()) {
            return Err(FleetError::Validation(format!("{} must be finite", name)));
        }
        if self.min_scale <= 0.0 {
            return Err(FleetError::Validation("min_scale must be > 0".to_string()));
        }
        if self.min_scale > self.max_scale {
            return Err(FleetError::Validation(
                "min_scale must not exceed max_scale".to_string(),
            ));
        }
        if self.integral_limit < 0.0 {
            return Err(FleetError::Validation(
                "integral_limit must be >= 0".to_string(),
            ));
        }
        if self.backlog_normalizer < 0.0 {
            return Err(FleetError::Validation(
                "backlog_normalizer must be >= 0".to_string(),
            ));
        }
        if self.base_micro_batch == 0 {
            return Err(FleetError::Validation(
                "base_micro_batch must be > 0".to_string(),
            ));
        }
        if self.base_micro_batch > self.max_micro_batch {
            return Err(FleetError::Validation(
                "base_micro_batch must not exceed max_micro_batch".to_string(),
            ));
        }
        if self.min_max_new_tokens > self.base_max_new_tokens {
            return Err(FleetError::Validation(
                "min_max_new_tokens must not exceed base_max_new_tokens".to_string(),
            ));
        }
        Ok(())
    }
}

/// Scheduler headroom policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// GPUs at or above this temperature (C) receive no new jobs
    pub max_temperature: f64,
    /// GPUs at or above this utilisation (0-1) receive no new jobs
    pub max_utilisation: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_temperature: 82.0,
            max_utilisation: 0.92,
        }
    }
}

impl SchedulerConfig {
    /// Reject ceilings that would make every GPU ineligible
    pub fn validate(&self) -> FleetResult<()> {
        if !self.max_temperature.is_finite() {
            return Err(FleetError::Validation(
                "max_temperature must be finite".to_string(),
            ));
        }
        if !(self.max_utilisation.is_finite() && self.max_utilisation > 0.0) {
            return Err(FleetError::Validation(
                "max_utilisation must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validate a GPU fleet topology
pub fn validate_topology(topology: &FleetTopology) -> FleetResult<()> {
    if topology.is_empty() {
        return Err(FleetError::Validation(
            "At least one GPU must be declared".to_string(),
        ));
    }
    for (gpu, slices) in topology {
        if let Some((profile, _)) = slices.iter().find(|(_, cap)| **cap == 0) {
            return Err(FleetError::Validation(format!(
                "Slice {}:{} must have capacity > 0",
                gpu, profile
            )));
        }
    }
    Ok(())
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Full human-readable lines
    Text,
    /// Abbreviated single-line output
    Compact,
    /// Newline-delimited JSON
    Json,
}
