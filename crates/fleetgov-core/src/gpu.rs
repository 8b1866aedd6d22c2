//! GPU fleet model: devices, MIG slices, jobs and allocations

use crate::{validate_topology, FleetResult, FleetTopology};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Utilisation assigned to GPUs built from a topology
pub const DEFAULT_UTILISATION: f64 = 0.0;

/// Temperature (C) assigned to GPUs built from a topology
pub const DEFAULT_TEMPERATURE: f64 = 60.0;

/// A MIG slice or logical partition of a GPU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    /// Slice identifier, `"{gpu_id}:{profile}"` for built fleets
    pub id: String,
    /// Workload profile served by this slice
    pub profile: String,
    /// Maximum concurrently running jobs
    pub capacity: u32,
    /// Jobs currently running
    pub running: u32,
}

impl Slice {
    /// Create an idle slice
    pub fn new(id: impl Into<String>, profile: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            profile: profile.into(),
            capacity,
            running: 0,
        }
    }

    /// Whether another job fits
    pub fn has_capacity(&self) -> bool {
        self.running < self.capacity
    }

    /// Fraction of capacity in use
    pub fn load(&self) -> f64 {
        if self.capacity == 0 {
            1.0
        } else {
            f64::from(self.running) / f64::from(self.capacity)
        }
    }
}

/// GPU with utilisation and thermal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gpu {
    /// GPU identifier
    pub id: String,
    /// Compute utilisation (0-1)
    pub utilisation: f64,
    /// Temperature in degrees Celsius
    pub temperature: f64,
    /// Slices indexed by profile
    pub slices: BTreeMap<String, Slice>,
}

impl Gpu {
    /// Create a GPU with no slices
    pub fn new(id: impl Into<String>, utilisation: f64, temperature: f64) -> Self {
        Self {
            id: id.into(),
            utilisation,
            temperature,
            slices: BTreeMap::new(),
        }
    }

    /// Add a slice keyed by its profile
    pub fn with_slice(mut self, slice: Slice) -> Self {
        self.slices.insert(slice.profile.clone(), slice);
        self
    }

    /// Slices able to serve the given profile
    pub fn compatible_slices<'a>(&'a self, profile: &'a str) -> impl Iterator<Item = &'a Slice> {
        self.slices.get(profile).into_iter()
    }

    /// Whether any slice serves the given profile
    pub fn serves(&self, profile: &str) -> bool {
        self.slices.contains_key(profile)
    }
}

/// A unit of GPU work to place
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier
    pub id: String,
    /// Required slice profile
    pub profile: String,
}

impl Job {
    /// Create a job
    pub fn new(id: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            profile: profile.into(),
        }
    }
}

/// A job bound to a GPU slice
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Allocation {
    /// Placed job
    pub job_id: String,
    /// Target GPU
    pub gpu_id: String,
    /// Target slice on that GPU
    pub slice_id: String,
}

/// Build a fleet from a topology
///
/// Every GPU starts at [`DEFAULT_UTILISATION`] and [`DEFAULT_TEMPERATURE`];
/// live values arrive later through telemetry.
///
/// ```
/// use fleetgov_core::{build_gpu_fleet, FleetTopology};
///
/// let mut topology = FleetTopology::new();
/// topology.insert("gpu0".into(), [("fast".to_string(), 2)].into());
/// let fleet = build_gpu_fleet(&topology).unwrap();
/// assert_eq!(fleet[0].slices["fast"].id, "gpu0:fast");
/// ```
pub fn build_gpu_fleet(topology: &FleetTopology) -> FleetResult<Vec<Gpu>> {
    validate_topology(topology)?;
    let fleet = topology
        .iter()
        .map(|(gpu_id, slices)| {
            slices.iter().fold(
                Gpu::new(gpu_id.clone(), DEFAULT_UTILISATION, DEFAULT_TEMPERATURE),
                |gpu, (profile, capacity)| {
                    gpu.with_slice(Slice::new(
                        format!("{}:{}", gpu_id, profile),
                        profile.clone(),
                        *capacity,
                    ))
                },
            )
        })
        .collect();
    Ok(fleet)
}
