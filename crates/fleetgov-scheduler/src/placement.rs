//! Placement decisions for GPU jobs

use fleetgov_core::{Allocation, Gpu, Job, SchedulerConfig};
use serde::{Deserialize, Serialize};

/// Why a job could not be placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnplacedReason {
    /// No GPU in the fleet exposes the job's profile
    UnknownProfile,
    /// Every GPU exposing the profile is over a thermal or utilisation ceiling
    NoEligibleGpu,
    /// Eligible slices for the profile are all full
    NoCapacity,
}

impl std::fmt::Display for UnplacedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnplacedReason::UnknownProfile => write!(f, "unknown_profile"),
            UnplacedReason::NoEligibleGpu => write!(f, "no_eligible_gpu"),
            UnplacedReason::NoCapacity => write!(f, "no_capacity"),
        }
    }
}

/// Outcome for one submitted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// The job was bound to a slice
    Allocated(Allocation),
    /// The job was left unplaced
    Unplaced {
        job_id: String,
        reason: UnplacedReason,
    },
}

impl Placement {
    /// The job this outcome refers to
    pub fn job_id(&self) -> &str {
        match self {
            Placement::Allocated(allocation) => &allocation.job_id,
            Placement::Unplaced { job_id, .. } => job_id,
        }
    }

    /// The allocation, if the job was placed
    pub fn allocation(&self) -> Option<&Allocation> {
        match self {
            Placement::Allocated(allocation) => Some(allocation),
            Placement::Unplaced { .. } => None,
        }
    }
}

/// Slice chosen for a job: GPU index in the fleet plus the slice profile key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceChoice {
    /// Index into the scheduler's fleet
    pub gpu_index: usize,
    /// Slice key on that GPU
    pub profile: String,
}

/// Strategy for choosing a slice for a job
pub trait PlacementStrategy: Send + Sync {
    /// Choose a slice for `job` without mutating the fleet
    fn choose(
        &self,
        gpus: &[Gpu],
        job: &Job,
        config: &SchedulerConfig,
    ) -> Result<SliceChoice, UnplacedReason>;
}

/// Least-loaded-first strategy
///
/// GPUs at or above `max_temperature` or `max_utilisation` are skipped.
/// Among the remaining slices of the job's profile with spare capacity, the
/// one with the lowest `running / capacity` wins; ties go to the GPU with the
/// lowest utilisation, then to fleet order. This spreads load rather than
/// packing it.
pub struct LeastLoadedStrategy;

impl PlacementStrategy for LeastLoadedStrategy {
    fn choose(
        &self,
        gpus: &[Gpu],
        job: &Job,
        config: &SchedulerConfig,
    ) -> Result<SliceChoice, UnplacedReason> {
        let mut served = false;
        let mut eligible = false;
        let mut best: Option<((f64, f64), usize)> = None;

        for (index, gpu) in gpus.iter().enumerate() {
            if !gpu.serves(&job.profile) {
                continue;
            }
            served = true;
            if gpu.temperature >= config.max_temperature
                || gpu.utilisation >= config.max_utilisation
            {
                continue;
            }
            eligible = true;
            for slice in gpu.compatible_slices(&job.profile) {
                if !slice.has_capacity() {
                    continue;
                }
                let key = (slice.load(), gpu.utilisation);
                if best.map_or(true, |(best_key, _)| key < best_key) {
                    best = Some((key, index));
                }
            }
        }

        match best {
            Some((_, gpu_index)) => Ok(SliceChoice {
                gpu_index,
                profile: job.profile.clone(),
            }),
            None if !served => Err(UnplacedReason::UnknownProfile),
            None if !eligible => Err(UnplacedReason::NoEligibleGpu),
            None => Err(UnplacedReason::NoCapacity),
        }
    }
}
