//! PID + feed-forward GPU load governor

use crate::metrics::{GovernorDecision, GpuMetrics};
use fleetgov_core::{FleetError, FleetResult, GovernorConfig};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Smallest time step used once the controller is warm
const MIN_DT_SECS: f64 = 1e-6;

/// Discrete controller state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlState {
    /// No sample seen since construction or the last reset
    Cold,
    /// At least one sample seen
    Warm {
        /// Instant of the previous sample
        last_time: Instant,
        /// Setpoint error of the previous sample
        last_error: f64,
    },
}

/// Keeps aggregate GPU utilisation near a setpoint while reacting to backlog
/// and protecting thermal and memory headroom
///
/// Driven by a single control loop, once per telemetry sample.
#[derive(Debug, Clone)]
pub struct GpuGovernor {
    config: GovernorConfig,
    state: ControlState,
    integral: f64,
}

impl GpuGovernor {
    /// Create a cold governor
    pub fn new(config: GovernorConfig) -> FleetResult<Self> {
        config.validate()?;
        info!(
            target_util = config.target_util,
            kp = config.kp,
            ki = config.ki,
            kd = config.kd,
            kf = config.kf,
            "GPU governor initialized"
        );
        Ok(Self {
            config,
            state: ControlState::Cold,
            integral: 0.0,
        })
    }

    /// Tuning in effect
    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Current controller state
    pub fn state(&self) -> ControlState {
        self.state
    }

    /// Whether at least one sample has been processed
    pub fn is_warm(&self) -> bool {
        matches!(self.state, ControlState::Warm { .. })
    }

    /// Accumulated integral term
    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Return to the cold state
    pub fn reset(&mut self) {
        self.state = ControlState::Cold;
        self.integral = 0.0;
        debug!("GPU governor reset");
    }

    /// Process one telemetry sample
    ///
    /// The PID state advances even while the thermal/memory override forces
    /// the minimum scale, so control resumes smoothly once headroom returns.
    pub fn update(&mut self, metrics: &GpuMetrics, now: Instant) -> FleetResult<GovernorDecision> {
        check_metrics(metrics)?;
        let cfg = &self.config;

        let (dt, last_error) = match self.state {
            ControlState::Cold => (0.0, None),
            ControlState::Warm {
                last_time,
                last_error,
            } => (
                now.saturating_duration_since(last_time)
                    .as_secs_f64()
                    .max(MIN_DT_SECS),
                Some(last_error),
            ),
        };

        let error = cfg.target_util - metrics.utilisation;
        self.integral = (self.integral + error * dt).clamp(-cfg.integral_limit, cfg.integral_limit);
        let derivative = last_error.map_or(0.0, |last| (error - last) / dt);

        let normalizer = cfg
            .backlog_normalizer
            .max(metrics.backlog_target)
            .max(1.0);
        let backlog_term = (metrics.backlog - metrics.backlog_target) / normalizer;

        let control = cfg.kp * error
            + cfg.ki * self.integral
            + cfg.kd * derivative
            + cfg.kf * backlog_term;
        let mut scale = (1.0 + control).clamp(cfg.min_scale, cfg.max_scale);

        let hot = metrics.memory_utilisation >= cfg.max_memory
            || metrics.temperature >= cfg.max_temperature;
        if hot {
            warn!(
                memory_utilisation = metrics.memory_utilisation,
                temperature = metrics.temperature,
                "Safety override engaged"
            );
            scale = cfg.min_scale;
        }

        let decision = GovernorDecision {
            concurrency_scale: scale,
            micro_batch: scaled(
                metrics.micro_batch,
                scale,
                cfg.base_micro_batch,
                cfg.max_micro_batch,
            ),
            max_new_tokens: scaled(
                metrics.max_new_tokens,
                scale,
                cfg.min_max_new_tokens,
                cfg.base_max_new_tokens,
            ),
            divert_to_cpu: hot,
            pause_queues: if hot {
                cfg.pause_queues_on_hot.clone()
            } else {
                Vec::new()
            },
        };

        debug!(
            error,
            integral = self.integral,
            derivative,
            backlog_term,
            scale,
            micro_batch = decision.micro_batch,
            max_new_tokens = decision.max_new_tokens,
            "Governor tick"
        );

        self.state = ControlState::Warm {
            last_time: now,
            last_error: error,
        };
        Ok(decision)
    }
}

impl Default for GpuGovernor {
    fn default() -> Self {
        Self {
            config: GovernorConfig::default(),
            state: ControlState::Cold,
            integral: 0.0,
        }
    }
}

fn check_metrics(metrics: &GpuMetrics) -> FleetResult<()> {
    if !(metrics.backlog_target.is_finite() && metrics.backlog_target > 0.0) {
        return Err(FleetError::Config(format!(
            "backlog_target must be > 0, got {}",
            metrics.backlog_target
        )));
    }
    let fields = [
        ("utilisation", metrics.utilisation),
        ("memory_utilisation", metrics.memory_utilisation),
        ("temperature", metrics.temperature),
        ("backlog", metrics.backlog),
    ];
    if let Some((name, value)) = fields.iter().find(|(_, v)| !v.is_finite()) {
        return Err(FleetError::Config(format!(
            "{} must be finite, got {}",
            name, value
        )));
    }
    Ok(())
}

fn scaled(value: u32, scale: f64, lo: u32, hi: u32) -> u32 {
    (f64::from(value) * scale)
        .round()
        .clamp(f64::from(lo), f64::from(hi)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn metrics() -> GpuMetrics {
        GpuMetrics {
            utilisation: 0.4,
            memory_utilisation: 0.4,
            temperature: 60.0,
            backlog: 80.0,
            backlog_target: 40.0,
            concurrency: 8.0,
            micro_batch: 2,
            max_new_tokens: 1024,
        }
    }

    #[test]
    fn test_increases_scale_when_util_low_and_backlog_high() {
        let mut governor = GpuGovernor::new(GovernorConfig {
            target_util: 0.8,
            ..GovernorConfig::default()
        })
        .unwrap();
        let sample = metrics();

        let decision = governor.update(&sample, Instant::now()).unwrap();
        assert!(decision.concurrency_scale > 1.0);
        assert!(decision.micro_batch >= sample.micro_batch);
        assert!(decision.max_new_tokens >= sample.max_new_tokens);
        assert!(!decision.divert_to_cpu);
        assert!(decision.pause_queues.is_empty());
    }

    #[test]
    fn test_limits_scale_when_hot() {
        let config = GovernorConfig {
            min_scale: 0.3,
            pause_queues_on_hot: vec!["batch".to_string()],
            ..GovernorConfig::default()
        };
        let mut governor = GpuGovernor::new(config.clone()).unwrap();
        let sample = GpuMetrics {
            utilisation: 0.7,
            memory_utilisation: 0.9,
            temperature: 90.0,
            backlog: 10.0,
            backlog_target: 20.0,
            concurrency: 4.0,
            micro_batch: 4,
            max_new_tokens: 2048,
        };

        let decision = governor.update(&sample, Instant::now()).unwrap();
        assert!((decision.concurrency_scale - config.min_scale).abs() < 1e-12);
        assert!(decision.divert_to_cpu);
        assert_eq!(decision.pause_queues, config.pause_queues_on_hot);
        assert!(decision.is_paused("batch"));
    }

    #[test]
    fn test_memory_override_ignores_error_sign() {
        let mut governor = GpuGovernor::default();
        let min_scale = governor.config().min_scale;
        // Very low utilisation would otherwise push the scale up
        let sample = GpuMetrics {
            utilisation: 0.0,
            memory_utilisation: 0.9,
            temperature: 50.0,
            ..metrics()
        };
        let decision = governor.update(&sample, Instant::now()).unwrap();
        assert_eq!(decision.concurrency_scale, min_scale);
        assert!(decision.divert_to_cpu);
    }

    #[test]
    fn test_override_still_advances_state() {
        let mut governor = GpuGovernor::default();
        let start = Instant::now();
        let hot = GpuMetrics {
            utilisation: 0.2,
            temperature: 95.0,
            ..metrics()
        };
        governor.update(&hot, start).unwrap();
        governor.update(&hot, start + Duration::from_secs(1)).unwrap();
        assert!(governor.is_warm());
        assert!(governor.integral() > 0.0);
    }

    #[test]
    fn test_integral_clamped() {
        let config = GovernorConfig {
            integral_limit: 0.1,
            ..GovernorConfig::default()
        };
        let mut governor = GpuGovernor::new(config.clone()).unwrap();
        let sample = GpuMetrics {
            utilisation: 0.0,
            memory_utilisation: 0.1,
            temperature: 50.0,
            backlog: 10.0,
            backlog_target: 10.0,
            concurrency: 2.0,
            micro_batch: 1,
            max_new_tokens: 512,
        };

        let start = Instant::now();
        for step in 1..=5 {
            governor
                .update(&sample, start + Duration::from_secs(step))
                .unwrap();
            assert!(governor.integral().abs() <= config.integral_limit);
        }
        let decision = governor
            .update(&sample, start + Duration::from_secs(10))
            .unwrap();
        assert!(governor.integral().abs() <= config.integral_limit);
        assert!(decision.concurrency_scale <= config.max_scale);
        assert!(decision.concurrency_scale >= config.min_scale);
    }

    #[test]
    fn test_requires_positive_backlog_target() {
        let mut governor = GpuGovernor::default();
        let sample = GpuMetrics {
            backlog: 0.0,
            backlog_target: 0.0,
            ..metrics()
        };
        let result = governor.update(&sample, Instant::now());
        assert!(matches!(result, Err(FleetError::Config(_))));
        // A rejected sample leaves the controller cold
        assert!(!governor.is_warm());
    }

    #[test]
    fn test_rejects_non_finite_telemetry() {
        let mut governor = GpuGovernor::default();
        let sample = GpuMetrics {
            utilisation: f64::NAN,
            ..metrics()
        };
        assert!(governor.update(&sample, Instant::now()).is_err());
    }

    #[test]
    fn test_cold_tick_has_no_integral_or_derivative() {
        let mut governor = GpuGovernor::default();
        governor.update(&metrics(), Instant::now()).unwrap();
        assert_eq!(governor.integral(), 0.0);
        assert!(governor.is_warm());
    }

    #[test]
    fn test_duplicate_timestamp_does_not_divide_by_zero() {
        let mut governor = GpuGovernor::default();
        let now = Instant::now();
        governor.update(&metrics(), now).unwrap();
        let decision = governor.update(&metrics(), now).unwrap();
        assert!(decision.concurrency_scale.is_finite());
    }

    #[test]
    fn test_reset_returns_to_cold() {
        let mut governor = GpuGovernor::default();
        let start = Instant::now();
        governor.update(&metrics(), start).unwrap();
        governor
            .update(&metrics(), start + Duration::from_secs(2))
            .unwrap();
        assert!(governor.integral() != 0.0);

        governor.reset();
        assert_eq!(governor.state(), ControlState::Cold);
        assert_eq!(governor.integral(), 0.0);
    }

    #[test]
    fn test_token_budget_capped_at_baseline() {
        let config = GovernorConfig::default();
        let mut governor = GpuGovernor::new(config.clone()).unwrap();
        let sample = GpuMetrics {
            utilisation: 0.0,
            backlog: 500.0,
            max_new_tokens: config.base_max_new_tokens,
            micro_batch: 8,
            ..metrics()
        };
        let decision = governor.update(&sample, Instant::now()).unwrap();
        assert!(decision.concurrency_scale > 1.0);
        // Micro-batch grows past its input, token budget stays at baseline
        assert!(decision.micro_batch > 8);
        assert_eq!(decision.max_new_tokens, config.base_max_new_tokens);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = GovernorConfig {
            min_scale: 0.0,
            ..GovernorConfig::default()
        };
        assert!(matches!(
            GpuGovernor::new(config),
            Err(FleetError::Validation(_))
        ));
    }

    fn sample() -> impl Strategy<Value = (GpuMetrics, u64)> {
        (
            0.0f64..1.0,
            0.0f64..1.0,
            30.0f64..100.0,
            0.0f64..1_000.0,
            1.0f64..200.0,
            1u32..64,
            1u32..8_192,
            0u64..5_000,
        )
            .prop_map(|(util, mem, temp, backlog, target, mb, tokens, step_ms)| {
                (
                    GpuMetrics {
                        utilisation: util,
                        memory_utilisation: mem,
                        temperature: temp,
                        backlog,
                        backlog_target: target,
                        concurrency: 1.0,
                        micro_batch: mb,
                        max_new_tokens: tokens,
                    },
                    step_ms,
                )
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_outputs_stay_within_bounds(samples in proptest::collection::vec(sample(), 1..40)) {
            let config = GovernorConfig::default();
            let mut governor = GpuGovernor::new(config.clone()).unwrap();
            let mut now = Instant::now();
            for (metrics, step_ms) in samples {
                now += Duration::from_millis(step_ms);
                let decision = governor.update(&metrics, now).unwrap();
                prop_assert!(governor.integral().abs() <= config.integral_limit);
                prop_assert!(decision.concurrency_scale >= config.min_scale);
                prop_assert!(decision.concurrency_scale <= config.max_scale);
                prop_assert!(decision.micro_batch >= config.base_micro_batch);
                prop_assert!(decision.micro_batch <= config.max_micro_batch);
                prop_assert!(decision.max_new_tokens >= config.min_max_new_tokens);
                prop_assert!(decision.max_new_tokens <= config.base_max_new_tokens);
            }
        }
    }
}
