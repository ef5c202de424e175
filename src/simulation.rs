use crate::config::{FaultPolicy, SimConfig};
#[cfg(feature = "debug")]
use crate::debug::take_debug_frame;
use crate::debug::{debug_lane_change, debug_plan};
use crate::error::{SimError, SimResult};
use crate::gtu::plan::{OperationalPlan, Segment};
use crate::gtu::{Gtu, GtuAttributes, GtuSnapshot, GtuState, Kinematics, LaneChangeManeuver};
use crate::network::{DetectorKind, LateralDirection, Network};
use crate::parameters;
use crate::perception::{LanePerception, PerceptionContext};
use crate::route::{Navigator, Route, RouteResolver, RouteSet};
use crate::scheduler::{Priority, Scheduled, Scheduler};
use crate::units::{Acceleration, Length, Speed, Time};
use crate::util::Interval;
use crate::{DetectorId, GtuId, GtuSet, LaneId, RouteId};
use log::{debug, info, warn};
use rand::Rng;
use rand_distr::Distribution;
use slotmap::{Key, SecondaryMap};
use smallvec::SmallVec;

/// Detectors closer than this ahead of the start of a plan are considered passed.
const DETECTOR_TOLERANCE: Length = Length::new(1e-6);

/// A request to create a GTU.
#[derive(Clone, Debug)]
pub struct SpawnRequest {
    pub attributes: GtuAttributes,
    /// The route to follow at branches.
    pub route: Option<RouteId>,
    pub lane: LaneId,
    /// The position of the centre of the GTU along the lane.
    pub position: Length,
    pub speed: Speed,
}

/// An external event that makes a GTU replan immediately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Brake maximally and stay stopped until released.
    ForcedStop,
    /// Lift a forced stop.
    Release,
    /// An emergency, processed before anything else at the same instant.
    Hazard,
}

/// Why a GTU left the simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RemovalReason {
    ReachedSink,
    /// Drove off the end of a lane without a successor.
    LeftNetwork,
    /// Planning failed under [`FaultPolicy::Remove`].
    Fault,
    /// Removed through [`Simulation::remove_gtu`].
    External,
}

/// Something observable that happened during the simulation.
#[derive(Clone, Debug, PartialEq)]
pub enum SimEvent {
    GtuCreated { gtu: GtuId, time: Time, lane: LaneId },
    /// A new plan was committed; the snapshot is its starting state.
    PlanCommitted(GtuSnapshot),
    LaneChangeCommitted {
        gtu: GtuId,
        time: Time,
        from: LaneId,
        to: LaneId,
    },
    LaneChangeCompleted { gtu: GtuId, time: Time, lane: LaneId },
    DetectorTriggered {
        gtu: GtuId,
        time: Time,
        detector: DetectorId,
    },
    GtuRemoved {
        gtu: GtuId,
        time: Time,
        reason: RemovalReason,
    },
    PlanningFault {
        gtu: GtuId,
        time: Time,
        error: SimError,
    },
}

/// The payload of a scheduled event.
#[derive(Debug)]
enum Action {
    Spawn(Box<SpawnRequest>),
    /// Plan expiry. Ignored if the GTU has committed another plan since.
    Replan { generation: u64 },
    Trigger(Trigger),
    /// The predicted passage of a detector under the plan of the given generation.
    Detector { detector: DetectorId, generation: u64 },
    /// The end of the lane change manoeuvre ending at `end`.
    FinishLaneChange { end: Time },
}

/// Where a GTU ends up once its position is moved onto the lane it lies on.
enum Arrival {
    Lane {
        state: Kinematics,
        sensors: SmallVec<[DetectorId; 2]>,
    },
    Sink {
        detector: DetectorId,
        sensors: SmallVec<[DetectorId; 2]>,
    },
    LeftNetwork {
        sensors: SmallVec<[DetectorId; 2]>,
    },
}

/// An event driven traffic simulation.
///
/// Each GTU commits an operational plan valid over a short interval and
/// replans when it expires, when it passes a detector, or when it is
/// triggered. All events are processed in a deterministic order.
#[derive(Default)]
pub struct Simulation {
    config: SimConfig,
    /// The road network, including the occupancy of each lane.
    network: Network,
    /// The routes GTUs may follow.
    routes: RouteSet,
    /// Cache of routing decisions at nodes.
    resolver: RouteResolver,
    /// The GTUs being simulated.
    gtus: GtuSet,
    /// The perception of each GTU.
    perceptions: SecondaryMap<GtuId, LanePerception>,
    scheduler: Scheduler<Action>,
    /// Events not yet taken by the caller.
    events: Vec<SimEvent>,
}

impl Simulation {
    /// Creates a new simulation on the given network.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            ..Default::default()
        }
    }

    /// Creates a new simulation with custom settings.
    pub fn with_config(network: Network, config: SimConfig) -> SimResult<Self> {
        config.validate()?;
        Ok(Self {
            network,
            config,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Adds a route GTUs can be assigned to.
    pub fn add_route(&mut self, route: Route) -> RouteId {
        self.routes.insert(route)
    }

    pub fn route(&self, id: RouteId) -> Option<&Route> {
        self.routes.get(id)
    }

    /// Schedules the creation of a GTU at `time`. If the spot is occupied at
    /// that time, creation is retried one planning interval later.
    pub fn spawn(&mut self, time: Time, request: SpawnRequest) -> SimResult<()> {
        let gtu_type = request.attributes.gtu_type;
        let lane = self.network.get_lane(request.lane).ok_or_else(|| {
            SimError::network("spawn", format!("lane {:?} does not exist", request.lane))
        })?;
        if !lane.compatibility().permits(gtu_type) {
            return Err(SimError::network(
                "spawn",
                format!("lane {:?} does not accept {gtu_type:?}", request.lane),
            ));
        }
        if !(request.position >= Length::ZERO && request.position <= lane.length()) {
            return Err(SimError::network(
                "spawn",
                format!("position {} is outside lane {:?}", request.position, request.lane),
            ));
        }
        if !request.speed.is_finite() || request.speed < Speed::ZERO {
            return Err(SimError::numeric("spawn", format!("invalid speed {}", request.speed)));
        }
        if let Some(route) = request.route {
            self.routes
                .get(route)
                .ok_or_else(|| SimError::network("spawn", format!("route {route:?} does not exist")))?
                .validate(&self.network, gtu_type)?;
        }
        self.scheduler.schedule(
            time,
            Priority::Spawn,
            GtuId::null(),
            Action::Spawn(Box::new(request)),
        )
    }

    /// Schedules a trigger for a GTU at `time`.
    pub fn trigger(&mut self, time: Time, gtu: GtuId, trigger: Trigger) -> SimResult<()> {
        if !self.gtus.contains_key(gtu) {
            return Err(SimError::UnknownGtu(gtu));
        }
        let priority = match trigger {
            Trigger::Hazard => Priority::Hazard,
            Trigger::ForcedStop | Trigger::Release => Priority::Trigger,
        };
        self.scheduler.schedule(time, priority, gtu, Action::Trigger(trigger))
    }

    /// Sets the `frozen` attribute of a GTU. When a GTU is frozen,
    /// it will maximally decelerate until its speed is zero and remain stopped
    /// until it is no longer frozen. Takes effect at the current time.
    pub fn set_gtu_frozen(&mut self, gtu: GtuId, frozen: bool) -> SimResult<()> {
        let trigger = if frozen {
            Trigger::ForcedStop
        } else {
            Trigger::Release
        };
        self.trigger(self.now(), gtu, trigger)
    }

    /// Removes a GTU from the simulation.
    pub fn remove_gtu(&mut self, gtu: GtuId) -> SimResult<Gtu> {
        self.remove(gtu, RemovalReason::External)
            .ok_or(SimError::UnknownGtu(gtu))
    }

    /// Randomly assigns a desired speed factor to each GTU, which is sampled
    /// from a normal distribution with a mean of 1 (no adjustment)
    /// and standard deviation of `stddev`.
    pub fn randomise_speed_factors(&mut self, stddev: f64) -> SimResult<()> {
        self.randomise_speed_factors_with(&mut rand::thread_rng(), stddev)
    }

    /// As [`Self::randomise_speed_factors`], drawing from the given generator.
    pub fn randomise_speed_factors_with<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        stddev: f64,
    ) -> SimResult<()> {
        let distr = rand_distr::Normal::new(1.0, stddev).map_err(|err| SimError::Parameter {
            key: "fSpeed",
            reason: err.to_string(),
        })?;
        for (_, gtu) in &mut self.gtus {
            let factor = distr.sample(rng).clamp(0.75, 1.25);
            gtu.set_speed_factor(factor)?;
        }
        Ok(())
    }

    /// Processes the next event. Returns `false` if there was none.
    ///
    /// Planning failures are handled according to the fault policy; only
    /// scheduler errors are returned.
    pub fn step(&mut self) -> SimResult<bool> {
        let Some(event) = self.scheduler.pop() else {
            return Ok(false);
        };
        self.dispatch(event)?;
        Ok(true)
    }

    /// Processes every event up to and including `time`.
    pub fn run_until(&mut self, time: Time) -> SimResult<()> {
        while let Some((next, _)) = self.scheduler.peek() {
            if next > time {
                break;
            }
            self.step()?;
        }
        self.scheduler.advance_to(time)
    }

    /// The current simulation time.
    pub fn now(&self) -> Time {
        self.scheduler.now()
    }

    /// The number of events waiting to be processed.
    pub fn pending(&self) -> usize {
        self.scheduler.len()
    }

    /// Gets a reference to the GTU with the given ID.
    pub fn get_gtu(&self, gtu: GtuId) -> Option<&Gtu> {
        self.gtus.get(gtu)
    }

    /// Returns an iterator over all the GTUs in the simulation.
    pub fn iter_gtus(&self) -> impl Iterator<Item = &Gtu> {
        self.gtus.iter().map(|(_, gtu)| gtu)
    }

    /// The last committed state of every GTU.
    pub fn snapshots(&self) -> impl Iterator<Item = &GtuSnapshot> {
        self.iter_gtus().map(|gtu| gtu.snapshot())
    }

    /// The perception of a GTU as of its last planning cycle.
    pub fn perception(&self, gtu: GtuId) -> Option<&LanePerception> {
        self.perceptions.get(gtu)
    }

    /// Takes the events that happened since the last call.
    pub fn take_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Gets mutable access to the network. Cached routing decisions are
    /// discarded.
    pub fn network_mut(&mut self) -> &mut Network {
        self.resolver.invalidate();
        &mut self.network
    }

    /// The snapshot of every GTU, and the plans and lane changes committed
    /// since the last call.
    #[cfg(feature = "debug")]
    pub fn debug(&mut self) -> serde_json::Value {
        serde_json::json!({
            "time": self.now().si(),
            "gtus": self.snapshots().collect::<Vec<_>>(),
            "frame": take_debug_frame(),
        })
    }

    fn dispatch(&mut self, event: Scheduled<Action>) -> SimResult<()> {
        let id = event.gtu;
        match event.payload {
            Action::Spawn(request) => self.spawn_batch(*request),
            Action::Replan { generation } => {
                if self.is_current(id, generation) {
                    self.replan(id)
                } else {
                    Ok(())
                }
            }
            Action::Trigger(trigger) => self.apply_trigger(id, trigger),
            Action::Detector {
                detector,
                generation,
            } => {
                if self.is_current(id, generation) {
                    self.cross_detector(id, detector)
                } else {
                    Ok(())
                }
            }
            Action::FinishLaneChange { end } => {
                let window_end = self
                    .gtus
                    .get(id)
                    .and_then(|gtu| gtu.maneuver())
                    .map(|maneuver| maneuver.window.max);
                if window_end == Some(end) {
                    self.complete_lane_change(id);
                }
                Ok(())
            }
        }
    }

    /// Whether events scheduled against the plan of `generation` still apply.
    fn is_current(&self, id: GtuId, generation: u64) -> bool {
        self.gtus
            .get(id)
            .map_or(false, |gtu| gtu.generation() == generation && !gtu.is_halted())
    }

    /// Creates the GTUs of every spawn request due now.
    fn spawn_batch(&mut self, first: SpawnRequest) -> SimResult<()> {
        let now = self.now();
        let mut batch = vec![first];
        while self.scheduler.peek() == Some((now, Priority::Spawn)) {
            match self.scheduler.pop() {
                Some(Scheduled {
                    payload: Action::Spawn(request),
                    ..
                }) => batch.push(*request),
                Some(other) => self.dispatch(other)?,
                None => break,
            }
        }

        let mut created = SmallVec::<[GtuId; 4]>::new();
        for request in batch {
            if self.is_occupied(&request) {
                warn!(
                    "Spawn spot at {} on lane {:?} is occupied at {now}, retrying",
                    request.position, request.lane
                );
                let retry = now + self.config.planning_interval;
                self.scheduler.schedule(
                    retry,
                    Priority::Spawn,
                    GtuId::null(),
                    Action::Spawn(Box::new(request)),
                )?;
                continue;
            }
            created.push(self.create_gtu(request));
        }
        for id in created {
            let generation = self.gtus[id].generation();
            self.scheduler
                .schedule(now, Priority::Replan, id, Action::Replan { generation })?;
        }
        Ok(())
    }

    /// Whether the GTU requested would overlap a GTU already on the lane.
    fn is_occupied(&self, request: &SpawnRequest) -> bool {
        let now = self.now();
        let extent = Interval::disc(request.position, request.attributes.length * 0.5);
        self.network
            .lane(request.lane)
            .gtus()
            .iter()
            .filter_map(|id| self.gtus.get(*id))
            .any(|other| {
                let position = other.kinematics_at(now).position;
                extent.overlaps(&Interval::disc(position, other.half_len()))
            })
    }

    fn create_gtu(&mut self, request: SpawnRequest) -> GtuId {
        let now = self.now();
        let id = self.gtus.insert_with_key(|id| {
            Gtu::new(
                id,
                &request.attributes,
                request.route,
                request.lane,
                request.position,
                request.speed,
                now,
            )
        });
        self.network
            .lane_mut(request.lane)
            .insert_gtu(&self.gtus, id);
        self.perceptions
            .insert(id, LanePerception::standard(request.attributes.sensing));
        info!("Created GTU {id:?} on lane {:?} at {now}", request.lane);
        self.events.push(SimEvent::GtuCreated {
            gtu: id,
            time: now,
            lane: request.lane,
        });
        id
    }

    fn apply_trigger(&mut self, id: GtuId, trigger: Trigger) -> SimResult<()> {
        let Some(gtu) = self.gtus.get_mut(id) else {
            return Ok(());
        };
        match trigger {
            Trigger::ForcedStop => gtu.set_frozen(true),
            Trigger::Release => gtu.set_frozen(false),
            Trigger::Hazard => {}
        }
        if gtu.is_halted() {
            info!("GTU {id:?} resumes planning after {trigger:?}");
            gtu.set_halted(false);
        }
        debug!("GTU {id:?} triggered: {trigger:?}");
        self.replan(id)
    }

    fn cross_detector(&mut self, id: GtuId, detector: DetectorId) -> SimResult<()> {
        self.report_detector(id, detector);
        match self.network.detector(detector).kind {
            DetectorKind::Sink => {
                self.remove(id, RemovalReason::ReachedSink);
                Ok(())
            }
            DetectorKind::Sensor => self.replan(id),
        }
    }

    fn report_detector(&mut self, id: GtuId, detector: DetectorId) {
        let time = self.now();
        debug!("GTU {id:?} passed detector {detector:?} at {time}");
        self.events.push(SimEvent::DetectorTriggered {
            gtu: id,
            time,
            detector,
        });
    }

    /// Plans the GTU from its state now, handling failures per the fault policy.
    fn replan(&mut self, id: GtuId) -> SimResult<()> {
        let state = match self.advance(id) {
            Ok(Some(state)) => state,
            Ok(None) => return Ok(()),
            Err(err) => return self.fault(id, err, None),
        };
        match self.plan_from(id, state) {
            Err(err) => self.fault(id, err, Some(state)),
            Ok(()) => Ok(()),
        }
    }

    /// Moves the GTU onto the lane it has driven onto, reporting the
    /// detectors it passed. Returns `None` if the GTU left the simulation.
    fn advance(&mut self, id: GtuId) -> SimResult<Option<Kinematics>> {
        let now = self.now();
        let Some(gtu) = self.gtus.get(id) else {
            return Ok(None);
        };
        let start = gtu.kinematics_at(now);
        let nav = navigator(&self.network, &self.routes, &self.resolver, gtu);
        let arrival = arrive(&nav, start)?;
        let state = match arrival {
            Arrival::Lane { state, sensors } => {
                sensors.iter().for_each(|d| self.report_detector(id, *d));
                state
            }
            Arrival::Sink { detector, sensors } => {
                sensors.iter().for_each(|d| self.report_detector(id, *d));
                self.report_detector(id, detector);
                self.remove(id, RemovalReason::ReachedSink);
                return Ok(None);
            }
            Arrival::LeftNetwork { sensors } => {
                sensors.iter().for_each(|d| self.report_detector(id, *d));
                self.remove(id, RemovalReason::LeftNetwork);
                return Ok(None);
            }
        };
        if state.lane != start.lane {
            self.complete_lane_change(id);
        }
        Ok(Some(state))
    }

    /// Perceives, decides and commits a new plan starting at `state`.
    fn plan_from(&mut self, id: GtuId, state: Kinematics) -> SimResult<()> {
        let now = self.now();
        let gtu = self.gtus.get(id).ok_or(SimError::UnknownGtu(id))?;
        let ctx = PerceptionContext {
            now,
            ego: gtu,
            state,
            gtus: &self.gtus,
            nav: navigator(&self.network, &self.routes, &self.resolver, gtu),
            preferred_side: self.config.preferred_side,
            horizon: self.config.suitability_horizon,
        };
        let perception = self
            .perceptions
            .get_mut(id)
            .ok_or(SimError::UnknownGtu(id))?;
        perception.perceive(&ctx)?;
        let decision = gtu.plan_step(perception, self.config.preferred_side)?;

        let target = decision.lane_change.and_then(|side| {
            self.network
                .adjacent_lane(state.lane, side, gtu.gtu_type())
                .map(|lane| (side, lane))
        });
        let (plan, maneuver) = self.make_plan(state, decision.acceleration, target);
        self.commit(id, plan, maneuver)
    }

    /// Builds the plan for the next interval, and the manoeuvre if it starts a lane change.
    fn make_plan(
        &self,
        state: Kinematics,
        acceleration: Acceleration,
        lane_change: Option<(LateralDirection, LaneId)>,
    ) -> (OperationalPlan, Option<LaneChangeManeuver>) {
        let now = self.now();
        let duration = self.config.planning_interval;
        match lane_change {
            Some((direction, target)) => {
                let plan = OperationalPlan::new(
                    now,
                    duration,
                    target,
                    state.position,
                    state.speed,
                    Segment::LaneChange {
                        acceleration,
                        direction,
                    },
                );
                let maneuver = LaneChangeManeuver {
                    origin: state.lane,
                    target,
                    direction,
                    window: Interval::new(now, now + self.config.lane_change_duration),
                };
                (plan, Some(maneuver))
            }
            None => {
                let segment = if state.speed <= Speed::ZERO && acceleration <= Acceleration::ZERO {
                    Segment::Stop
                } else {
                    Segment::Acceleration(acceleration)
                };
                let plan = OperationalPlan::new(
                    now,
                    duration,
                    state.lane,
                    state.position,
                    state.speed,
                    segment,
                );
                (plan, None)
            }
        }
    }

    /// Makes `plan` the active plan of the GTU, updates lane occupancy, and
    /// schedules the events that follow from it.
    fn commit(
        &mut self,
        id: GtuId,
        plan: OperationalPlan,
        maneuver: Option<LaneChangeManeuver>,
    ) -> SimResult<()> {
        let Some(gtu) = self.gtus.get(id) else {
            return Ok(());
        };
        let lanes: SmallVec<[LaneId; 2]> = gtu.lanes().collect();
        for lane in lanes {
            self.network.lane_mut(lane).remove_gtu(id);
        }

        let gtu = &mut self.gtus[id];
        if let Some(maneuver) = maneuver {
            gtu.start_maneuver(maneuver);
        }
        gtu.set_state(GtuState::Active);
        let generation = gtu.commit(plan);
        let halted = gtu.is_halted();
        let snapshot = *gtu.snapshot();
        let lanes: SmallVec<[LaneId; 2]> = gtu.lanes().collect();
        for lane in lanes {
            self.network.lane_mut(lane).insert_gtu(&self.gtus, id);
        }

        debug!(
            "GTU {id:?} committed {:?} at {} on lane {:?}",
            plan.segment(),
            snapshot.position,
            snapshot.lane
        );
        debug_plan(&snapshot);
        self.events.push(SimEvent::PlanCommitted(snapshot));

        if let Some(maneuver) = maneuver {
            info!(
                "GTU {id:?} changing lanes from {:?} to {:?}",
                maneuver.origin, maneuver.target
            );
            debug_lane_change(id, maneuver.origin, maneuver.target, plan.start());
            self.events.push(SimEvent::LaneChangeCommitted {
                gtu: id,
                time: plan.start(),
                from: maneuver.origin,
                to: maneuver.target,
            });
            let end = maneuver.window.max;
            self.scheduler.schedule(
                end,
                Priority::LaneChangeFinish,
                id,
                Action::FinishLaneChange { end },
            )?;
        }

        if !halted {
            self.scheduler
                .schedule(plan.end(), Priority::Replan, id, Action::Replan { generation })?;
            self.schedule_detector(id, &plan, generation)?;
        }
        Ok(())
    }

    /// Schedules the passage of the first detector ahead on the plan's lane,
    /// if it happens before the plan expires.
    fn schedule_detector(
        &mut self,
        id: GtuId,
        plan: &OperationalPlan,
        generation: u64,
    ) -> SimResult<()> {
        let next = self
            .network
            .lane(plan.lane())
            .detectors()
            .find(|(pos, _)| *pos - plan.start_position() > DETECTOR_TOLERANCE);
        let Some((pos, detector)) = next else {
            return Ok(());
        };
        let Some(dt) = plan.time_to_travel(pos - plan.start_position()) else {
            return Ok(());
        };
        let time = plan.start() + dt;
        if time > plan.end() {
            return Ok(());
        }
        self.scheduler.schedule(
            time,
            Priority::Trigger,
            id,
            Action::Detector {
                detector,
                generation,
            },
        )
    }

    /// Ends the GTU's lane change, releasing the lane it came from.
    fn complete_lane_change(&mut self, id: GtuId) {
        let Some(maneuver) = self.gtus.get_mut(id).and_then(|gtu| gtu.finish_maneuver()) else {
            return;
        };
        self.network.lane_mut(maneuver.origin).remove_gtu(id);
        let time = self.now();
        info!("GTU {id:?} completed lane change onto {:?}", maneuver.target);
        self.events.push(SimEvent::LaneChangeCompleted {
            gtu: id,
            time,
            lane: maneuver.target,
        });
    }

    /// Handles a failure to plan. `state` is where planning started, if the
    /// GTU got that far.
    fn fault(&mut self, id: GtuId, err: SimError, state: Option<Kinematics>) -> SimResult<()> {
        if err.is_fatal() {
            return Err(err);
        }
        let now = self.now();
        warn!("Planning GTU {id:?} failed at {now}: {err}");
        self.events.push(SimEvent::PlanningFault {
            gtu: id,
            time: now,
            error: err,
        });
        match self.config.fault_policy {
            FaultPolicy::Remove => {
                self.remove(id, RemovalReason::Fault);
                Ok(())
            }
            FaultPolicy::Halt => {
                let Some(gtu) = self.gtus.get_mut(id) else {
                    return Ok(());
                };
                gtu.set_halted(true);
                let mut state = state.unwrap_or_else(|| gtu.kinematics_at(now));
                state.position = state.position.min(self.network.lane(state.lane).length());
                let duration = self.config.planning_interval;
                // Brake as hard as possible, then hold
                let plan = match gtu.params().get(&parameters::B_MAX) {
                    Ok(b_max) if state.speed > Speed::ZERO => OperationalPlan::new(
                        now,
                        duration,
                        state.lane,
                        state.position,
                        state.speed,
                        Segment::Acceleration(-b_max),
                    ),
                    _ => OperationalPlan::standstill(now, duration, state.lane, state.position),
                };
                self.commit(id, plan, None)
            }
        }
    }

    fn remove(&mut self, id: GtuId, reason: RemovalReason) -> Option<Gtu> {
        let mut gtu = self.gtus.remove(id)?;
        for lane in gtu.lanes() {
            self.network.lane_mut(lane).remove_gtu(id);
        }
        gtu.set_state(GtuState::Removed);
        self.perceptions.remove(id);
        let time = self.now();
        info!("Removed GTU {id:?} at {time}: {reason:?}");
        self.events.push(SimEvent::GtuRemoved {
            gtu: id,
            time,
            reason,
        });
        Some(gtu)
    }
}

fn navigator<'a>(
    network: &'a Network,
    routes: &'a RouteSet,
    resolver: &'a RouteResolver,
    gtu: &Gtu,
) -> Navigator<'a> {
    Navigator {
        network,
        routes,
        resolver,
        gtu_type: gtu.gtu_type(),
        route: gtu.route(),
    }
}

/// Moves `state` past the ends of lanes until its position lies on a lane,
/// noting the detectors passed on the lanes entered.
fn arrive(nav: &Navigator, mut state: Kinematics) -> SimResult<Arrival> {
    let network = nav.network;
    let mut sensors = SmallVec::new();
    loop {
        let length = network.lane(state.lane).length();
        if state.position <= length {
            return Ok(Arrival::Lane { state, sensors });
        }
        let Some(next) = nav.next_lane_on_route(state.lane)? else {
            return Ok(Arrival::LeftNetwork { sensors });
        };
        state.position -= length;
        state.lane = next;
        for (pos, detector) in network.lane(next).detectors() {
            if pos > state.position {
                break;
            }
            match network.detector(detector).kind {
                DetectorKind::Sink => return Ok(Arrival::Sink { detector, sensors }),
                DetectorKind::Sensor => sensors.push(detector),
            }
        }
    }
}
