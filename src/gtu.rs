use self::car_following::CarFollowingModel;
use self::lane_change::{EgoState, Incentives, LaneChangeModel, LaneDecision, LaneMovementStep};
use self::plan::{OperationalPlan, Segment};
use crate::error::SimResult;
use crate::network::LateralDirection;
use crate::parameters::{self, Parameters};
use crate::perception::{DecisionKind, LanePerception};
use crate::units::{Acceleration, Duration, Length, Speed, Time};
use crate::util::Interval;
use crate::{GtuId, LaneId, RouteId};

pub mod car_following;
pub mod lane_change;
pub mod plan;

/// The kind of a GTU, used for lane compatibility, directionality and speed limits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GtuType {
    #[default]
    Car,
    Truck,
    Bus,
    Motorcycle,
}

impl GtuType {
    pub const ALL: [GtuType; 4] = [Self::Car, Self::Truck, Self::Bus, Self::Motorcycle];
}

/// The lifecycle state of a GTU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GtuState {
    /// Created, but not yet planned for.
    Generating,
    Active,
    Removed,
}

/// Which implementation of the neighbours capability a GTU perceives with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NeighborSensing {
    /// Distance and speed of neighbours only.
    #[default]
    Sensor,
    /// Also observes the acceleration of neighbours, as vehicle to vehicle
    /// communication would.
    Direct,
}

/// The attributes of a GTU.
#[derive(Clone, Debug)]
pub struct GtuAttributes {
    pub gtu_type: GtuType,
    /// The length in m.
    pub length: Length,
    /// The width in m.
    pub width: Length,
    /// The maximum speed the vehicle is capable of.
    pub max_speed: Speed,
    pub params: Parameters,
    pub car_following: CarFollowingModel,
    pub lane_change: LaneChangeModel,
    pub sensing: NeighborSensing,
}

impl GtuAttributes {
    /// A passenger car with default behavioural parameters.
    pub fn car() -> Self {
        Self {
            gtu_type: GtuType::Car,
            length: Length::new(4.0),
            width: Length::new(1.9),
            max_speed: Speed::from_kmh(180.0),
            params: Parameters::defaults(),
            car_following: Default::default(),
            lane_change: Default::default(),
            sensing: Default::default(),
        }
    }

    /// A heavy goods vehicle.
    pub fn truck() -> Self {
        Self {
            gtu_type: GtuType::Truck,
            length: Length::new(12.0),
            width: Length::new(2.5),
            max_speed: Speed::from_kmh(90.0),
            ..Self::car()
        }
    }
}

/// An in-progress lane change. The GTU occupies both lanes until it ends.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaneChangeManeuver {
    pub origin: LaneId,
    pub target: LaneId,
    pub direction: LateralDirection,
    /// When the manoeuvre started and when it ends.
    pub window: Interval<Time>,
}

/// The kinematic state of a GTU, as committed by its last plan.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GtuSnapshot {
    pub id: GtuId,
    pub gtu_type: GtuType,
    /// The time the snapshot was taken.
    pub time: Time,
    /// The reference lane.
    pub lane: LaneId,
    /// The position of the centre of the GTU along the lane.
    pub position: Length,
    pub speed: Speed,
    pub acceleration: Acceleration,
    pub length: Length,
    pub width: Length,
}

/// The kinematic state of a GTU at some instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Kinematics {
    pub lane: LaneId,
    pub position: Length,
    pub speed: Speed,
    pub acceleration: Acceleration,
}

/// The outcome of one planning step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlanDecision {
    pub acceleration: Acceleration,
    /// The side to start changing lanes towards, if any.
    pub lane_change: Option<LateralDirection>,
}

/// A generalised travel unit: a simulated vehicle.
#[derive(Clone, Debug)]
pub struct Gtu {
    /// The GTU's ID.
    id: GtuId,
    gtu_type: GtuType,
    /// Half the GTU's length in m.
    half_len: Length,
    /// Half the GTU's width in m.
    half_wid: Length,
    max_speed: Speed,
    params: Parameters,
    car_following: CarFollowingModel,
    lane_change: LaneChangeModel,
    sensing: NeighborSensing,
    /// The route the GTU follows at branches, if it has one.
    route: Option<RouteId>,
    state: GtuState,
    /// The current operational plan.
    plan: OperationalPlan,
    /// Incremented on every commit, so events scheduled against an older plan can be discarded.
    generation: u64,
    /// The in-progress lane change, if there is one.
    maneuver: Option<LaneChangeManeuver>,
    /// Whether the GTU has been ordered to stop.
    frozen: bool,
    /// Whether planning has been suspended after a fault.
    halted: bool,
    snapshot: GtuSnapshot,
}

impl Gtu {
    /// Creates a new GTU, standing by at the given position until it is first planned for.
    pub(crate) fn new(
        id: GtuId,
        attributes: &GtuAttributes,
        route: Option<RouteId>,
        lane: LaneId,
        position: Length,
        speed: Speed,
        now: Time,
    ) -> Self {
        let plan = OperationalPlan::new(
            now,
            Duration::ZERO,
            lane,
            position,
            speed,
            Segment::Acceleration(Acceleration::ZERO),
        );
        Self {
            id,
            gtu_type: attributes.gtu_type,
            half_len: attributes.length * 0.5,
            half_wid: attributes.width * 0.5,
            max_speed: attributes.max_speed,
            params: attributes.params.clone(),
            car_following: attributes.car_following,
            lane_change: attributes.lane_change,
            sensing: attributes.sensing,
            route,
            state: GtuState::Generating,
            plan,
            generation: 0,
            maneuver: None,
            frozen: false,
            halted: false,
            snapshot: GtuSnapshot {
                id,
                gtu_type: attributes.gtu_type,
                time: now,
                lane,
                position,
                speed: plan.start_speed(),
                acceleration: Acceleration::ZERO,
                length: attributes.length,
                width: attributes.width,
            },
        }
    }

    /// Gets the GTU's ID.
    pub fn id(&self) -> GtuId {
        self.id
    }

    pub fn gtu_type(&self) -> GtuType {
        self.gtu_type
    }

    /// The GTU's length in m.
    pub fn length(&self) -> Length {
        self.half_len * 2.0
    }

    /// The GTU's width in m.
    pub fn width(&self) -> Length {
        self.half_wid * 2.0
    }

    pub(crate) fn half_len(&self) -> Length {
        self.half_len
    }

    pub fn max_speed(&self) -> Speed {
        self.max_speed
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn car_following(&self) -> CarFollowingModel {
        self.car_following
    }

    pub fn lane_change_model(&self) -> LaneChangeModel {
        self.lane_change
    }

    pub fn sensing(&self) -> NeighborSensing {
        self.sensing
    }

    pub fn route(&self) -> Option<RouteId> {
        self.route
    }

    pub fn state(&self) -> GtuState {
        self.state
    }

    pub fn plan(&self) -> &OperationalPlan {
        &self.plan
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn maneuver(&self) -> Option<&LaneChangeManeuver> {
        self.maneuver.as_ref()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Whether planning has been suspended after a fault.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// The state committed by the last plan, as seen by other GTUs.
    pub fn snapshot(&self) -> &GtuSnapshot {
        &self.snapshot
    }

    /// The reference lane of the GTU.
    pub fn lane(&self) -> LaneId {
        self.snapshot.lane
    }

    /// The position of the centre of the GTU on `lane`, if it occupies that lane.
    pub fn position_on(&self, lane: LaneId) -> Option<Length> {
        let on_origin = self.maneuver.map_or(false, |m| m.origin == lane);
        (self.snapshot.lane == lane || on_origin).then_some(self.snapshot.position)
    }

    /// The lanes the GTU is registered on.
    pub fn lanes(&self) -> impl Iterator<Item = LaneId> {
        let origin = self.maneuver.map(|m| m.origin);
        std::iter::once(self.snapshot.lane).chain(origin)
    }

    /// The state of the GTU at `time` according to its current plan. The
    /// position may lie beyond the end of the plan's lane.
    pub fn kinematics_at(&self, time: Time) -> Kinematics {
        Kinematics {
            lane: self.plan.lane(),
            position: self.plan.position_at(time),
            speed: self.plan.speed_at(time),
            acceleration: self.plan.acceleration_at(time),
        }
    }

    /// Whether the GTU is stopped.
    pub fn has_stopped(&self) -> bool {
        self.snapshot.speed.si() < 0.1
    }

    /// Determines the comfortable stopping distance of the GTU.
    pub fn stopping_distance(&self) -> SimResult<Length> {
        CarFollowingModel::stopping_distance(&self.params, self.snapshot.speed)
    }

    /// Set the desired speed factor of the GTU, a scalar which is multiplied
    /// with the speed limit to give the speed the GTU wants to drive at.
    pub fn set_speed_factor(&mut self, factor: f64) -> SimResult<()> {
        self.params.set(&parameters::FSPEED, factor)
    }

    pub(crate) fn set_state(&mut self, state: GtuState) {
        self.state = state;
    }

    pub(crate) fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    pub(crate) fn set_halted(&mut self, halted: bool) {
        self.halted = halted;
    }

    pub(crate) fn start_maneuver(&mut self, maneuver: LaneChangeManeuver) {
        self.maneuver = Some(maneuver);
    }

    pub(crate) fn finish_maneuver(&mut self) -> Option<LaneChangeManeuver> {
        self.maneuver.take()
    }

    /// Makes `plan` the active plan, truncating the previous one, and
    /// publishes its starting state. Returns the new plan generation.
    pub(crate) fn commit(&mut self, plan: OperationalPlan) -> u64 {
        self.plan.truncate(plan.start());
        self.plan = plan;
        self.generation += 1;
        self.snapshot = GtuSnapshot {
            time: plan.start(),
            lane: plan.lane(),
            position: plan.start_position(),
            speed: plan.start_speed(),
            acceleration: plan.acceleration_at(plan.start()),
            ..self.snapshot
        };
        self.generation
    }

    /// Decides the acceleration and lane change of the next plan from the
    /// current perception.
    pub(crate) fn plan_step(&self, perception: &LanePerception, preferred_side: LateralDirection) -> SimResult<PlanDecision> {
        let ego = perception.ego()?;
        let neighbors = perception.neighbors()?;
        let infra = perception.infrastructure()?;

        if self.frozen {
            let b_max = self.params.get(&parameters::B_MAX)?;
            let acceleration = if ego.speed > Speed::ZERO { -b_max } else { Acceleration::ZERO };
            return Ok(PlanDecision {
                acceleration,
                lane_change: None,
            });
        }

        let state = EgoState {
            params: &self.params,
            car_following: self.car_following,
            speed: ego.speed,
            max_speed: self.max_speed,
        };
        let non_preferred_side = preferred_side.opposite();
        let step = if self.maneuver.is_some() {
            let dual = self.lane_change.dual_step(&state, &neighbors.current, infra.speed_limit)?;
            LaneMovementStep {
                acceleration: dual.ego,
                decision: LaneDecision::Stay,
            }
        } else {
            self.lane_change.decide(
                &state,
                &neighbors.current,
                neighbors.side(preferred_side),
                neighbors.side(non_preferred_side),
                infra.speed_limit,
                Incentives {
                    preferred: infra.incentives.side(preferred_side),
                    non_preferred: infra.incentives.side(non_preferred_side),
                },
                infra.incentives.current,
            )?
        };
        let lane_change = match step.decision {
            LaneDecision::Stay => None,
            LaneDecision::MoveToPreferred => Some(preferred_side),
            LaneDecision::MoveToNonPreferred => Some(non_preferred_side),
        };

        let mut acceleration = step.acceleration;
        for point in &infra.decision_points {
            let constraint = match point.kind {
                DecisionKind::DeadEnd if lane_change.is_none() => Some(self.car_following.stop_at_line(
                    &self.params,
                    ego.speed,
                    self.max_speed,
                    point.distance - self.half_len,
                    infra.speed_limit,
                )?),
                DecisionKind::SpeedLimitChange(limit) => self.car_following.approach_speed_limit(
                    &self.params,
                    ego.speed,
                    self.max_speed,
                    limit,
                    point.distance,
                )?,
                _ => None,
            };
            if let Some(constraint) = constraint {
                acceleration = acceleration.min(constraint);
            }
        }

        Ok(PlanDecision {
            acceleration,
            lane_change,
        })
    }
}
