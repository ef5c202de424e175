//! Global simulation settings.

use crate::error::{SimError, SimResult};
use crate::network::LateralDirection;
use crate::units::Duration;

/// What happens to a GTU whose planning step fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FaultPolicy {
    /// Stop the GTU where it is and suspend its planning until it is triggered.
    #[default]
    Halt,
    /// Remove the GTU from the simulation.
    Remove,
}

/// Settings shared by all GTUs of a simulation.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimConfig {
    /// The validity of each operational plan. Default: 0.5 s.
    pub planning_interval: Duration,
    /// The time a GTU occupies both lanes while changing lanes. Default: 3 s.
    pub lane_change_duration: Duration,
    /// The side GTUs keep to when not overtaking. Default: right.
    pub preferred_side: LateralDirection,
    /// How far ahead in time route based lane incentives look. Default: 90 s.
    pub suitability_horizon: Duration,
    pub fault_policy: FaultPolicy,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            planning_interval: Duration::new(0.5),
            lane_change_duration: Duration::new(3.0),
            preferred_side: LateralDirection::Right,
            suitability_horizon: Duration::new(90.0),
            fault_policy: FaultPolicy::Halt,
        }
    }
}

impl SimConfig {
    /// Checks that every duration is finite and positive.
    pub fn validate(&self) -> SimResult<()> {
        let positive = |key: &'static str, value: Duration| {
            if value.is_finite() && value > Duration::ZERO {
                Ok(())
            } else {
                Err(SimError::Parameter {
                    key,
                    reason: format!("{value} must be finite and positive"),
                })
            }
        };
        positive("planning_interval", self.planning_interval)?;
        positive("lane_change_duration", self.lane_change_duration)?;
        positive("suitability_horizon", self.suitability_horizon)
    }
}
