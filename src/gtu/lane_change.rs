//! The lane change decision model.
//!
//! Every cycle the model compares the acceleration a GTU gets in its current
//! lane with the accelerations it would get after moving into either adjacent
//! lane, taking into account the new follower it would impose itself on and
//! the route incentive of each lane. The model has no memory; an ongoing lane
//! change is tracked by the GTU itself.

use super::car_following::CarFollowingModel;
use crate::error::SimResult;
use crate::parameters::{self, Parameters};
use crate::perception::LaneTraffic;
use crate::units::{Acceleration, Speed};

/// How a driver weighs its own gain against the hindrance it causes.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Personality {
    /// Only considers its own acceleration.
    Egoistic,
    /// Blends its own acceleration with that of the follower it would cut in front of.
    Altruistic { weight: f64 },
}

impl Default for Personality {
    fn default() -> Self {
        Self::Egoistic
    }
}

impl Personality {
    /// An altruistic driver that values the follower as much as itself.
    pub fn altruistic() -> Self {
        Self::Altruistic { weight: 0.5 }
    }

    /// Reduces a dual step to a single comparable acceleration.
    pub fn utility(&self, step: &DualAccelerationStep) -> Acceleration {
        match *self {
            Self::Egoistic => step.ego,
            Self::Altruistic { weight } => {
                let weight = weight.clamp(0.0, 1.0);
                step.ego * (1.0 - weight) + step.follower * weight
            }
        }
    }
}

/// The acceleration of a GTU in a lane, and of the follower it has there.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DualAccelerationStep {
    pub ego: Acceleration,
    pub follower: Acceleration,
}

/// The lateral outcome of a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LaneDecision {
    Stay,
    /// Move towards the side the GTU keeps to by default.
    MoveToPreferred,
    /// Move towards the overtaking side.
    MoveToNonPreferred,
}

/// The outcome of a lane change decision.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LaneMovementStep {
    /// The acceleration of the GTU in the lane it chose.
    pub acceleration: Acceleration,
    pub decision: LaneDecision,
}

/// What the model needs to know about the deciding GTU.
#[derive(Clone, Copy)]
pub struct EgoState<'a> {
    pub params: &'a Parameters,
    pub car_following: CarFollowingModel,
    pub speed: Speed,
    pub max_speed: Speed,
}

/// Route incentives of the two adjacent lanes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Incentives {
    pub preferred: Acceleration,
    pub non_preferred: Acceleration,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaneChangeModel {
    pub personality: Personality,
}

impl LaneChangeModel {
    pub fn new(personality: Personality) -> Self {
        Self { personality }
    }

    /// Computes the acceleration of the GTU if it were in the lane with the
    /// given traffic, and that of the nearest follower in that lane.
    ///
    /// Parallel vehicles count as leaders at zero gap. Without a follower,
    /// the follower term is the maximum acceleration.
    pub fn dual_step(&self, ego: &EgoState, traffic: &LaneTraffic, speed_limit: Speed) -> SimResult<DualAccelerationStep> {
        let leaders: Vec<_> = traffic
            .parallel
            .iter()
            .chain(traffic.leaders.iter())
            .cloned()
            .collect();
        let acc = ego
            .car_following
            .accelerate(ego.params, ego.speed, ego.max_speed, &leaders, speed_limit)?;
        let follower = match traffic.followers.first() {
            Some(follower) => ego.car_following.follow_obstacle(
                ego.params,
                follower.speed,
                ego.max_speed,
                follower.distance.abs(),
                ego.speed,
                speed_limit,
            )?,
            None => ego.params.get(&parameters::A)?,
        };
        Ok(DualAccelerationStep { ego: acc, follower })
    }

    /// Whether the nearest follower in the lane could respond to the GTU
    /// without braking harder than `b_safe`. The response is not limited to
    /// the follower's braking capability, and NaN counts as unsafe.
    fn follower_is_safe(
        &self,
        ego: &EgoState,
        traffic: &LaneTraffic,
        speed_limit: Speed,
        b_safe: Acceleration,
    ) -> SimResult<bool> {
        let Some(follower) = traffic.followers.first() else {
            return Ok(true);
        };
        let acc = ego.car_following.follow_obstacle_unbounded(
            ego.params,
            follower.speed,
            ego.max_speed,
            follower.distance.abs(),
            ego.speed,
            speed_limit,
        )?;
        Ok(acc >= -b_safe)
    }

    /// Decides whether the GTU should stay in its lane or move to one of the
    /// adjacent lanes. A missing adjacent lane is passed as `None`.
    ///
    /// A candidate lane is only considered when nothing overlaps the GTU in
    /// that lane and the new follower would not have to brake harder than
    /// `b_safe`. It is then chosen when its utility plus route incentive beats
    /// the utility of staying plus `threshold`.
    #[allow(clippy::too_many_arguments)]
    pub fn decide(
        &self,
        ego: &EgoState,
        same_lane: &LaneTraffic,
        preferred: Option<&LaneTraffic>,
        non_preferred: Option<&LaneTraffic>,
        speed_limit: Speed,
        incentives: Incentives,
        threshold: Acceleration,
    ) -> SimResult<LaneMovementStep> {
        let b_max = ego.params.get(&parameters::B_MAX)?;
        if !same_lane.parallel.is_empty() {
            return Ok(LaneMovementStep {
                acceleration: -b_max,
                decision: LaneDecision::Stay,
            });
        }
        let b_safe = ego.params.get(&parameters::B_SAFE)?;

        let straight = self.dual_step(ego, same_lane, speed_limit)?;
        let stay_utility = self.personality.utility(&straight) + threshold;

        let evaluate = |traffic: Option<&LaneTraffic>, incentive: Acceleration| -> SimResult<Option<(Acceleration, Acceleration)>> {
            let Some(traffic) = traffic else {
                return Ok(None);
            };
            if !traffic.parallel.is_empty() {
                return Ok(None);
            }
            if !self.follower_is_safe(ego, traffic, speed_limit, b_safe)? {
                return Ok(None);
            }
            let step = self.dual_step(ego, traffic, speed_limit)?;
            let attractiveness = self.personality.utility(&step) + incentive - stay_utility;
            Ok(Some((attractiveness, step.ego)))
        };
        let preferred = evaluate(preferred, incentives.preferred)?;
        let non_preferred = evaluate(non_preferred, incentives.non_preferred)?;

        let best = match (preferred, non_preferred) {
            (Some(p), Some(n)) if n.0 > p.0 => Some((n, LaneDecision::MoveToNonPreferred)),
            (Some(p), _) => Some((p, LaneDecision::MoveToPreferred)),
            (None, Some(n)) => Some((n, LaneDecision::MoveToNonPreferred)),
            (None, None) => None,
        };
        let step = match best {
            Some(((attractiveness, acceleration), decision)) if attractiveness > Acceleration::ZERO => {
                LaneMovementStep { acceleration, decision }
            }
            _ => LaneMovementStep {
                acceleration: straight.ego,
                decision: LaneDecision::Stay,
            },
        };
        Ok(step)
    }
}
