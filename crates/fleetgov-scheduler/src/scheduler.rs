//! Main scheduler logic

use fleetgov_core::{Allocation, FleetError, FleetResult, Gpu, Job, SchedulerConfig};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::placement::{LeastLoadedStrategy, Placement, PlacementStrategy, UnplacedReason};

/// Assigns jobs to GPU slices honouring MIG profiles and headroom ceilings
///
/// Jobs are handled one at a time in input order; input order is the
/// caller's priority. The scheduler is driven by a single dispatcher loop.
pub struct JobScheduler {
    /// Fleet state, updated locally on allocation and externally via telemetry
    gpus: Vec<Gpu>,
    /// Headroom ceilings
    config: SchedulerConfig,
    /// Placement strategy
    placement_strategy: Arc<dyn PlacementStrategy>,
}

impl JobScheduler {
    /// Create a scheduler with the least-loaded placement strategy
    pub fn new(gpus: Vec<Gpu>, config: SchedulerConfig) -> FleetResult<Self> {
        Self::with_strategy(gpus, config, Arc::new(LeastLoadedStrategy))
    }

    /// Create a scheduler with a custom placement strategy
    pub fn with_strategy(
        gpus: Vec<Gpu>,
        config: SchedulerConfig,
        placement_strategy: Arc<dyn PlacementStrategy>,
    ) -> FleetResult<Self> {
        if gpus.is_empty() {
            return Err(FleetError::Validation(
                "At least one GPU must be declared".to_string(),
            ));
        }
        config.validate()?;

        info!(
            gpus = gpus.len(),
            slices = gpus.iter().map(|g| g.slices.len()).sum::<usize>(),
            max_temperature = config.max_temperature,
            max_utilisation = config.max_utilisation,
            "Job scheduler initialized"
        );

        Ok(Self {
            gpus,
            config,
            placement_strategy,
        })
    }

    /// Place jobs and return only the successful allocations
    ///
    /// Unplaceable jobs are dropped without a trace in the result; compare
    /// lengths, or use [`place`](Self::place) to get a reason per job.
    pub fn schedule<I>(&mut self, jobs: I) -> Vec<Allocation>
    where
        I: IntoIterator<Item = Job>,
    {
        self.place(jobs)
            .into_iter()
            .filter_map(|placement| match placement {
                Placement::Allocated(allocation) => Some(allocation),
                Placement::Unplaced { .. } => None,
            })
            .collect()
    }

    /// Place jobs and return one tagged outcome per job, in input order
    pub fn place<I>(&mut self, jobs: I) -> Vec<Placement>
    where
        I: IntoIterator<Item = Job>,
    {
        jobs.into_iter().map(|job| self.place_one(job)).collect()
    }

    fn place_one(&mut self, job: Job) -> Placement {
        let choice = match self
            .placement_strategy
            .choose(&self.gpus, &job, &self.config)
        {
            Ok(choice) => choice,
            Err(reason) => {
                warn!(job_id = %job.id, profile = %job.profile, %reason, "Job left unplaced");
                return Placement::Unplaced {
                    job_id: job.id,
                    reason,
                };
            }
        };

        let Some(gpu) = self.gpus.get_mut(choice.gpu_index) else {
            warn!(job_id = %job.id, gpu_index = choice.gpu_index, "Strategy chose a missing GPU");
            return Placement::Unplaced {
                job_id: job.id,
                reason: UnplacedReason::UnknownProfile,
            };
        };
        let Some(slice) = gpu.slices.get_mut(&choice.profile) else {
            warn!(job_id = %job.id, gpu = %gpu.id, "Strategy chose a missing slice");
            return Placement::Unplaced {
                job_id: job.id,
                reason: UnplacedReason::UnknownProfile,
            };
        };
        slice.running += 1;
        let slice_id = slice.id.clone();
        // Local estimate, stale until the next telemetry refresh
        gpu.utilisation = (gpu.utilisation + 1.0 / f64::from(slice.capacity.max(1))).min(1.0);

        debug!(
            job_id = %job.id,
            gpu = %gpu.id,
            slice = %slice_id,
            utilisation = gpu.utilisation,
            "Job allocated"
        );

        Placement::Allocated(Allocation {
            job_id: job.id,
            gpu_id: gpu.id.clone(),
            slice_id,
        })
    }

    /// Free the slot held by a finished job
    ///
    /// The GPU utilisation estimate is left for telemetry to correct.
    pub fn release(&mut self, allocation: &Allocation) -> FleetResult<()> {
        let gpu = self.gpu_mut(&allocation.gpu_id)?;
        let slice = gpu
            .slices
            .values_mut()
            .find(|s| s.id == allocation.slice_id)
            .ok_or_else(|| FleetError::UnknownSlice {
                gpu: allocation.gpu_id.clone(),
                slice: allocation.slice_id.clone(),
            })?;
        slice.running = slice.running.saturating_sub(1);
        debug!(
            job_id = %allocation.job_id,
            slice = %allocation.slice_id,
            running = slice.running,
            "Slot released"
        );
        Ok(())
    }

    /// Refresh a GPU's state from telemetry
    ///
    /// Non-finite readings are rejected and leave the GPU unchanged.
    pub fn update_telemetry(
        &mut self,
        gpu_id: &str,
        utilisation: f64,
        temperature: f64,
    ) -> FleetResult<()> {
        let readings = [("utilisation", utilisation), ("temperature", temperature)];
        if let Some((name, value)) = readings.iter().find(|(_, v)| !v.is_finite()) {
            return Err(FleetError::Config(format!(
                "{} for {} must be finite, got {}",
                name, gpu_id, value
            )));
        }
        let gpu = self.gpu_mut(gpu_id)?;
        gpu.utilisation = utilisation;
        gpu.temperature = temperature;
        debug!(gpu = gpu_id, utilisation, temperature, "Telemetry updated");
        Ok(())
    }

    /// Current fleet view
    pub fn gpus(&self) -> &[Gpu] {
        &self.gpus
    }

    /// Headroom ceilings in effect
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn gpu_mut(&mut self, gpu_id: &str) -> FleetResult<&mut Gpu> {
        self.gpus
            .iter_mut()
            .find(|g| g.id == gpu_id)
            .ok_or_else(|| FleetError::UnknownGpu(gpu_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgov_core::{build_gpu_fleet, FleetTopology};
    use std::collections::HashSet;

    fn fleet(entries: &[(&str, &[(&str, u32)])]) -> Vec<Gpu> {
        let topology: FleetTopology = entries
            .iter()
            .map(|(gpu, slices)| {
                (
                    gpu.to_string(),
                    slices.iter().map(|(p, c)| (p.to_string(), *c)).collect(),
                )
            })
            .collect();
        build_gpu_fleet(&topology).unwrap()
    }

    #[test]
    fn test_assigns_jobs_to_matching_profiles() {
        let mut scheduler = JobScheduler::new(
            fleet(&[("gpu0", &[("fast", 2), ("verify", 1)])]),
            SchedulerConfig::default(),
        )
        .unwrap();
        let jobs = vec![Job::new("job-fast-1", "fast"), Job::new("job-fast-2", "fast")];

        let assignments = scheduler.schedule(jobs);
        let pairs: HashSet<_> = assignments
            .iter()
            .map(|a| (a.job_id.as_str(), a.gpu_id.as_str()))
            .collect();
        assert_eq!(
            pairs,
            HashSet::from([("job-fast-1", "gpu0"), ("job-fast-2", "gpu0")])
        );
    }

    #[test]
    fn test_respects_capacity() {
        let mut scheduler =
            JobScheduler::new(fleet(&[("gpu0", &[("fast", 1)])]), SchedulerConfig::default())
                .unwrap();
        let assignments =
            scheduler.schedule(vec![Job::new("job-1", "fast"), Job::new("job-2", "fast")]);
        assert_eq!(assignments.len(), 1);
        assert_eq!(
            assignments[0],
            Allocation {
                job_id: "job-1".to_string(),
                gpu_id: "gpu0".to_string(),
                slice_id: "gpu0:fast".to_string(),
            }
        );
    }

    #[test]
    fn test_skips_hot_gpu() {
        let mut gpus = fleet(&[("gpu0", &[("fast", 1)]), ("gpu1", &[("fast", 1)])]);
        gpus[0].temperature = 90.0;
        let mut scheduler = JobScheduler::new(
            gpus,
            SchedulerConfig {
                max_temperature: 80.0,
                ..SchedulerConfig::default()
            },
        )
        .unwrap();

        let assignments = scheduler.schedule(vec![Job::new("job-1", "fast")]);
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].gpu_id, "gpu1");
    }

    #[test]
    fn test_skips_saturated_gpu() {
        let mut gpus = fleet(&[("gpu0", &[("fast", 4)]), ("gpu1", &[("fast", 4)])]);
        gpus[0].utilisation = 0.95;
        let mut scheduler = JobScheduler::new(gpus, SchedulerConfig::default()).unwrap();
        let assignments = scheduler.schedule(vec![Job::new("job-1", "fast")]);
        assert_eq!(assignments[0].gpu_id, "gpu1");
    }

    #[test]
    fn test_spreads_load_across_gpus() {
        let mut scheduler = JobScheduler::new(
            fleet(&[("gpu0", &[("fast", 4)]), ("gpu1", &[("fast", 4)])]),
            SchedulerConfig::default(),
        )
        .unwrap();
        let jobs = (0..4).map(|i| Job::new(format!("job-{}", i), "fast"));
        let gpus: Vec<String> = scheduler
            .schedule(jobs)
            .into_iter()
            .map(|a| a.gpu_id)
            .collect();
        assert_eq!(gpus, vec!["gpu0", "gpu1", "gpu0", "gpu1"]);
    }

    #[test]
    fn test_allocation_bumps_utilisation_estimate() {
        let mut scheduler =
            JobScheduler::new(fleet(&[("gpu0", &[("fast", 4)])]), SchedulerConfig::default())
                .unwrap();
        scheduler.schedule(vec![Job::new("job-1", "fast")]);
        let gpu = &scheduler.gpus()[0];
        assert_eq!(gpu.slices["fast"].running, 1);
        assert!((gpu.utilisation - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_place_preserves_order_and_reasons() {
        let mut gpus = fleet(&[("gpu0", &[("fast", 1), ("verify", 1)])]);
        gpus[0].slices.get_mut("fast").unwrap().running = 1;
        let mut scheduler = JobScheduler::new(gpus, SchedulerConfig::default()).unwrap();
        let placements = scheduler.place(vec![
            Job::new("b", "fast"),
            Job::new("a", "verify"),
            Job::new("c", "expert"),
        ]);

        assert_eq!(placements.len(), 3);
        assert_eq!(
            placements.iter().map(Placement::job_id).collect::<Vec<_>>(),
            vec!["b", "a", "c"]
        );
        assert_eq!(
            placements[0],
            Placement::Unplaced {
                job_id: "b".to_string(),
                reason: UnplacedReason::NoCapacity,
            }
        );
        assert_eq!(placements[1].allocation().unwrap().slice_id, "gpu0:verify");
        assert_eq!(
            placements[2],
            Placement::Unplaced {
                job_id: "c".to_string(),
                reason: UnplacedReason::UnknownProfile,
            }
        );
    }

    #[test]
    fn test_release_frees_capacity() {
        let mut scheduler =
            JobScheduler::new(fleet(&[("gpu0", &[("fast", 1)])]), SchedulerConfig::default())
                .unwrap();
        let first = scheduler.schedule(vec![Job::new("job-1", "fast")]);
        assert!(scheduler.schedule(vec![Job::new("job-2", "fast")]).is_empty());

        scheduler.release(&first[0]).unwrap();
        // Telemetry brings the utilisation estimate back down
        scheduler.update_telemetry("gpu0", 0.1, 65.0).unwrap();
        let second = scheduler.schedule(vec![Job::new("job-3", "fast")]);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_release_unknown_allocation() {
        let mut scheduler =
            JobScheduler::new(fleet(&[("gpu0", &[("fast", 1)])]), SchedulerConfig::default())
                .unwrap();
        let ghost_gpu = Allocation {
            job_id: "j".to_string(),
            gpu_id: "gpu9".to_string(),
            slice_id: "gpu9:fast".to_string(),
        };
        assert!(matches!(
            scheduler.release(&ghost_gpu),
            Err(FleetError::UnknownGpu(_))
        ));

        let ghost_slice = Allocation {
            gpu_id: "gpu0".to_string(),
            slice_id: "gpu0:batch".to_string(),
            ..ghost_gpu
        };
        assert!(matches!(
            scheduler.release(&ghost_slice),
            Err(FleetError::UnknownSlice { .. })
        ));
    }

    #[test]
    fn test_update_telemetry_makes_gpu_ineligible() {
        let mut scheduler =
            JobScheduler::new(fleet(&[("gpu0", &[("fast", 2)])]), SchedulerConfig::default())
                .unwrap();
        scheduler.update_telemetry("gpu0", 0.3, 88.0).unwrap();
        let placements = scheduler.place(vec![Job::new("job-1", "fast")]);
        assert_eq!(
            placements[0],
            Placement::Unplaced {
                job_id: "job-1".to_string(),
                reason: UnplacedReason::NoEligibleGpu,
            }
        );
        assert!(scheduler.update_telemetry("gpu7", 0.0, 50.0).is_err());
    }

    #[test]
    fn test_requires_gpus() {
        assert!(matches!(
            JobScheduler::new(Vec::new(), SchedulerConfig::default()),
            Err(FleetError::Validation(_))
        ));
    }

    #[test]
    fn test_non_finite_telemetry_rejected() {
        let mut scheduler =
            JobScheduler::new(fleet(&[("gpu0", &[("fast", 2)])]), SchedulerConfig::default())
                .unwrap();
        scheduler.update_telemetry("gpu0", 0.5, 90.0).unwrap();

        assert!(matches!(
            scheduler.update_telemetry("gpu0", f64::NAN, 60.0),
            Err(FleetError::Config(_))
        ));
        assert!(matches!(
            scheduler.update_telemetry("gpu0", 0.1, f64::NAN),
            Err(FleetError::Config(_))
        ));
        assert!(scheduler
            .update_telemetry("gpu0", f64::INFINITY, 60.0)
            .is_err());

        // The hot reading still stands, so the GPU stays ineligible
        assert_eq!(scheduler.gpus()[0].temperature, 90.0);
        assert!(scheduler.schedule(vec![Job::new("job-1", "fast")]).is_empty());
    }

    struct OutOfRangeStrategy;

    impl PlacementStrategy for OutOfRangeStrategy {
        fn choose(
            &self,
            gpus: &[Gpu],
            job: &Job,
            _config: &SchedulerConfig,
        ) -> Result<crate::placement::SliceChoice, UnplacedReason> {
            Ok(crate::placement::SliceChoice {
                gpu_index: gpus.len(),
                profile: job.profile.clone(),
            })
        }
    }

    #[test]
    fn test_bad_strategy_index_leaves_job_unplaced() {
        let mut scheduler = JobScheduler::with_strategy(
            fleet(&[("gpu0", &[("fast", 2)])]),
            SchedulerConfig::default(),
            Arc::new(OutOfRangeStrategy),
        )
        .unwrap();
        let placements = scheduler.place(vec![Job::new("job-1", "fast")]);
        assert_eq!(
            placements[0],
            Placement::Unplaced {
                job_id: "job-1".to_string(),
                reason: UnplacedReason::UnknownProfile,
            }
        );
        assert_eq!(scheduler.gpus()[0].slices["fast"].running, 0);
    }
}
