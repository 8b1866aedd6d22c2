//! Weighted traffic mixes for synthetic load

use fleetgov_core::{FleetError, FleetResult};
use std::str::FromStr;

/// Queue names with positive integer weights, in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficMix {
    weights: Vec<(String, u32)>,
}

impl TrafficMix {
    /// Create a mix; a repeated name keeps its first position and last weight
    pub fn new<I, S>(weights: I) -> FleetResult<Self>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut mix: Vec<(String, u32)> = Vec::new();
        for (name, weight) in weights {
            let name = name.into();
            if name.is_empty() {
                return Err(FleetError::Validation(
                    "Queue name cannot be empty".to_string(),
                ));
            }
            if weight == 0 {
                return Err(FleetError::Validation("Weight must be positive".to_string()));
            }
            match mix.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry.1 = weight,
                None => mix.push((name, weight)),
            }
        }
        if mix.is_empty() {
            return Err(FleetError::Validation(
                "Weights must contain at least one queue".to_string(),
            ));
        }
        Ok(Self { weights: mix })
    }

    /// Queue names and weights
    pub fn weights(&self) -> &[(String, u32)] {
        &self.weights
    }

    /// Queue names in declaration order
    pub fn queues(&self) -> impl Iterator<Item = &str> {
        self.weights.iter().map(|(name, _)| name.as_str())
    }

    /// Endless arrival sequence: each queue repeated `weight` times, in order
    pub fn arrivals(&self) -> impl Iterator<Item = &str> + '_ {
        self.weights
            .iter()
            .flat_map(|(name, weight)| std::iter::repeat(name.as_str()).take(*weight as usize))
            .cycle()
    }
}

impl FromStr for TrafficMix {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_mix(s)
    }
}

/// Parse `"fast=80,batch=20"`
///
/// Fractional weights are truncated toward zero.
pub fn parse_mix(mix: &str) -> FleetResult<TrafficMix> {
    if mix.trim().is_empty() {
        return Err(FleetError::Validation("mix cannot be empty".to_string()));
    }
    let mut weights = Vec::new();
    for chunk in mix.split(',') {
        let (name, raw) = chunk
            .split_once('=')
            .ok_or_else(|| FleetError::Validation(format!("Invalid mix fragment '{}'", chunk)))?;
        let value: f64 = raw.trim().parse().map_err(|_| {
            FleetError::Validation(format!("Invalid weight in mix fragment '{}'", chunk))
        })?;
        let value = value.trunc();
        if !(value.is_finite() && value >= 1.0 && value <= f64::from(u32::MAX)) {
            return Err(FleetError::Validation("Weight must be positive".to_string()));
        }
        weights.push((name.trim().to_string(), value as u32));
    }
    TrafficMix::new(weights)
}
