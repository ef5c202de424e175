use super::{
    CategoryView, Capability, Headway, LaneTraffic, PerceptionCategory, PerceptionContext, Relation,
};
use crate::error::SimResult;
use crate::network::{DetectorKind, LateralDirection};
use crate::parameters;
use crate::route::LaneIncentives;
use crate::units::{Acceleration, Length, Speed};
use crate::LaneId;
use arrayvec::ArrayVec;
use log::debug;
use smallvec::SmallVec;
use std::collections::VecDeque;

/// The most lanes a single scan walks through.
const MAX_LANES: usize = 64;

/// The most decision points reported ahead of a GTU.
pub const MAX_DECISION_POINTS: usize = 8;

/// The perceiving GTU itself.
#[derive(Clone, Debug, PartialEq)]
pub struct EgoView {
    pub speed: Speed,
    pub acceleration: Acceleration,
    pub length: Length,
    pub width: Length,
    /// The reference lane.
    pub lane: LaneId,
    /// The position of the centre of the GTU along the reference lane.
    pub position: Length,
}

#[derive(Default)]
pub struct EgoPerception {
    view: Option<EgoView>,
}

impl PerceptionCategory for EgoPerception {
    fn capability(&self) -> Capability {
        Capability::Ego
    }

    fn update(&mut self, ctx: &PerceptionContext) -> SimResult<()> {
        self.view = Some(EgoView {
            speed: ctx.state.speed,
            acceleration: ctx.state.acceleration,
            length: ctx.ego.length(),
            width: ctx.ego.width(),
            lane: ctx.state.lane,
            position: ctx.state.position,
        });
        Ok(())
    }

    fn view(&self) -> Option<CategoryView<'_>> {
        self.view.as_ref().map(CategoryView::Ego)
    }

    fn clear(&mut self) {
        self.view = None;
    }
}

/// The traffic on the current lane and on each adjacent lane the GTU may change to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NeighborsView {
    pub current: LaneTraffic,
    pub left: Option<LaneTraffic>,
    pub right: Option<LaneTraffic>,
}

impl NeighborsView {
    /// The traffic on the adjacent lane on the given side, if there is such a lane.
    pub fn side(&self, side: LateralDirection) -> Option<&LaneTraffic> {
        match side {
            LateralDirection::Left => self.left.as_ref(),
            LateralDirection::Right => self.right.as_ref(),
        }
    }
}

/// Neighbours perceived through vehicle to vehicle communication, which
/// includes their acceleration.
#[derive(Default)]
pub struct DirectNeighbors {
    view: Option<NeighborsView>,
}

/// Neighbours perceived through on-board sensors: distance and speed only.
#[derive(Default)]
pub struct SensorNeighbors {
    view: Option<NeighborsView>,
}

macro_rules! impl_neighbors {
    ($name:ident, $observe_acceleration:expr) => {
        impl PerceptionCategory for $name {
            fn capability(&self) -> Capability {
                Capability::Neighbors
            }

            fn update(&mut self, ctx: &PerceptionContext) -> SimResult<()> {
                self.view = Some(perceive_neighbors(ctx, $observe_acceleration)?);
                Ok(())
            }

            fn view(&self) -> Option<CategoryView<'_>> {
                self.view.as_ref().map(CategoryView::Neighbors)
            }

            fn clear(&mut self) {
                self.view = None;
            }
        }
    };
}

impl_neighbors!(DirectNeighbors, true);
impl_neighbors!(SensorNeighbors, false);

fn perceive_neighbors(ctx: &PerceptionContext, observe: bool) -> SimResult<NeighborsView> {
    let params = ctx.ego.params();
    let lookahead = params.get(&parameters::LOOKAHEAD)?;
    let lookback = params.get(&parameters::LOOKBACK)?;
    let scan = |lane| scan_lane(ctx, lane, lookahead, lookback, observe);

    let lane = ctx.state.lane;
    let mut current = scan(lane);
    if let Some(maneuver) = ctx.ego.maneuver() {
        if maneuver.origin != lane {
            current.merge(scan(maneuver.origin));
        }
    }
    let adjacent = |side| {
        ctx.nav
            .network
            .adjacent_lane(lane, side, ctx.ego.gtu_type())
            .map(scan)
    };
    Ok(NeighborsView {
        current,
        left: adjacent(LateralDirection::Left),
        right: adjacent(LateralDirection::Right),
    })
}

/// The GTUs registered on `lane`, related to the perceiving GTU as if the
/// start of the lane were at `offset` along the perceiving GTU's lane.
fn observe_lane<'a>(
    ctx: &PerceptionContext<'a>,
    lane: LaneId,
    offset: Length,
    observe: bool,
) -> impl Iterator<Item = Headway> + 'a {
    let gtus = ctx.gtus;
    let ego = ctx.ego;
    let position = ctx.state.position;
    ctx.nav
        .network
        .lane(lane)
        .gtus()
        .iter()
        .filter(move |id| **id != ego.id())
        .filter_map(move |id| {
            let other = gtus.get(*id)?;
            let other_position = offset + other.position_on(lane)?;
            Some(Headway::relate(
                position,
                ego.length(),
                other.snapshot(),
                other_position,
                observe,
            ))
        })
}

/// Scans for leaders downstream along the route and for followers through
/// all upstream lanes, starting at a lane sharing the perceiving GTU's
/// longitudinal coordinate.
fn scan_lane(
    ctx: &PerceptionContext,
    lane: LaneId,
    lookahead: Length,
    lookback: Length,
    observe: bool,
) -> LaneTraffic {
    let net = ctx.nav.network;
    let gtu_type = ctx.ego.gtu_type();
    let position = ctx.state.position;
    let in_range = |h: &Headway| match h.relation {
        Relation::Leader => h.distance <= lookahead,
        Relation::Follower => -h.distance <= lookback,
        Relation::Parallel => true,
    };

    let mut headways: Vec<Headway> = observe_lane(ctx, lane, Length::ZERO, observe)
        .filter(|h| in_range(h))
        .collect();

    // Downstream
    let mut offset = Length::ZERO;
    let mut current = lane;
    for _ in 0..MAX_LANES {
        offset += net.lane(current).length();
        if offset - position > lookahead {
            break;
        }
        let next = match ctx.nav.next_lane_on_route(current) {
            Ok(Some(next)) => next,
            Ok(None) => break,
            Err(err) => {
                debug!("Not perceiving beyond the end of lane {current:?}: {err}");
                break;
            }
        };
        headways.extend(
            observe_lane(ctx, next, offset, observe)
                .filter(|h| h.relation != Relation::Follower && in_range(h)),
        );
        current = next;
    }

    // Upstream
    let mut visited: SmallVec<[LaneId; 8]> = SmallVec::new();
    visited.push(lane);
    let mut queue = VecDeque::new();
    if position < lookback {
        for prev in net.prev_lanes(lane, gtu_type) {
            queue.push_back((prev, -net.lane(prev).length()));
        }
    }
    while let Some((upstream, offset)) = queue.pop_front() {
        if visited.contains(&upstream) || visited.len() >= MAX_LANES {
            continue;
        }
        visited.push(upstream);
        headways.extend(
            observe_lane(ctx, upstream, offset, observe)
                .filter(|h| h.relation != Relation::Leader && in_range(h)),
        );
        if position - offset < lookback {
            for prev in net.prev_lanes(upstream, gtu_type) {
                queue.push_back((prev, offset - net.lane(prev).length()));
            }
        }
    }

    LaneTraffic::from_headways(headways)
}

/// A place ahead where the GTU may have to act.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DecisionKind {
    /// The lane splits onto several links.
    Branch,
    /// The lane ends without continuation on the route.
    DeadEnd,
    /// A different speed limit applies from here on.
    SpeedLimitChange(Speed),
    /// The GTU leaves the simulation here.
    Sink,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecisionPoint {
    pub kind: DecisionKind,
    /// The distance from the centre of the GTU.
    pub distance: Length,
}

/// The road ahead of the GTU.
#[derive(Clone, Debug, PartialEq)]
pub struct InfrastructureView {
    /// The speed limit at the reference position.
    pub speed_limit: Speed,
    /// The decision points within the look-ahead distance, nearest first.
    pub decision_points: ArrayVec<DecisionPoint, MAX_DECISION_POINTS>,
    pub incentives: LaneIncentives,
}

impl InfrastructureView {
    /// The nearest decision point.
    pub fn next_decision_point(&self) -> Option<&DecisionPoint> {
        self.decision_points.first()
    }
}

#[derive(Default)]
pub struct InfrastructurePerception {
    view: Option<InfrastructureView>,
}

impl PerceptionCategory for InfrastructurePerception {
    fn capability(&self) -> Capability {
        Capability::Infrastructure
    }

    fn update(&mut self, ctx: &PerceptionContext) -> SimResult<()> {
        let net = ctx.nav.network;
        let gtu_type = ctx.ego.gtu_type();
        let lookahead = ctx.ego.params().get(&parameters::LOOKAHEAD)?;
        let lane = ctx.state.lane;
        let position = ctx.state.position;

        let mut points = ArrayVec::new();
        let mut current = lane;
        let mut start = -position;
        for _ in 0..MAX_LANES {
            if points.remaining_capacity() < 2 {
                break;
            }
            let sink = net
                .lane(current)
                .detectors()
                .find(|(pos, id)| start + *pos > Length::ZERO && net.detector(*id).kind == DetectorKind::Sink);
            if let Some((pos, _)) = sink {
                points.push(DecisionPoint {
                    kind: DecisionKind::Sink,
                    distance: start + pos,
                });
                break;
            }
            let end = start + net.lane(current).length();
            if end > lookahead {
                break;
            }
            if ctx.nav.is_branch(current) {
                points.push(DecisionPoint {
                    kind: DecisionKind::Branch,
                    distance: end,
                });
            }
            match ctx.nav.next_lane_on_route(current)? {
                None => {
                    points.push(DecisionPoint {
                        kind: DecisionKind::DeadEnd,
                        distance: end,
                    });
                    break;
                }
                Some(next) => {
                    let limit = net.speed_limit(next, gtu_type);
                    if limit != net.speed_limit(current, gtu_type) {
                        points.push(DecisionPoint {
                            kind: DecisionKind::SpeedLimitChange(limit),
                            distance: end,
                        });
                    }
                    start = end;
                    current = next;
                }
            }
        }

        self.view = Some(InfrastructureView {
            speed_limit: net.speed_limit(lane, gtu_type),
            decision_points: points,
            incentives: ctx.nav.lane_incentives(
                lane,
                position,
                ctx.state.speed,
                ctx.preferred_side,
                ctx.horizon,
            ),
        });
        Ok(())
    }

    fn view(&self) -> Option<CategoryView<'_>> {
        self.view.as_ref().map(CategoryView::Infrastructure)
    }

    fn clear(&mut self) {
        self.view = None;
    }
}

#[cfg(test)]
mod test {
    use super::super::LanePerception;
    use super::*;
    use crate::error::SimError;
    use crate::gtu::plan::OperationalPlan;
    use crate::gtu::{Gtu, GtuAttributes, NeighborSensing};
    use crate::network::{LaneAttributes, Network};
    use crate::route::{Navigator, RouteResolver, RouteSet, STAY_IN_CURRENT_LANE_INCENTIVE};
    use crate::units::{Duration, Time};
    use crate::{GtuId, GtuSet};
    use assert_approx_eq::assert_approx_eq;

    struct World {
        net: Network,
        gtus: GtuSet,
        routes: RouteSet,
        resolver: RouteResolver,
    }

    impl World {
        fn new(net: Network) -> Self {
            Self {
                net,
                gtus: GtuSet::with_key(),
                routes: RouteSet::with_key(),
                resolver: RouteResolver::new(),
            }
        }

        fn place(&mut self, lane: LaneId, pos: f64, speed: f64) -> GtuId {
            let id = self.gtus.insert_with_key(|id| {
                Gtu::new(
                    id,
                    &GtuAttributes::car(),
                    None,
                    lane,
                    Length::new(pos),
                    Speed::new(speed),
                    Time::ZERO,
                )
            });
            self.net.lane_mut(lane).insert_gtu(&self.gtus, id);
            id
        }

        fn perceive(&self, perception: &mut LanePerception, ego: GtuId) -> SimResult<()> {
            let gtu = &self.gtus[ego];
            let ctx = PerceptionContext {
                now: Time::ZERO,
                ego: gtu,
                state: gtu.kinematics_at(Time::ZERO),
                gtus: &self.gtus,
                nav: Navigator {
                    network: &self.net,
                    routes: &self.routes,
                    resolver: &self.resolver,
                    gtu_type: gtu.gtu_type(),
                    route: gtu.route(),
                },
                preferred_side: LateralDirection::Right,
                horizon: Duration::new(90.0),
            };
            perception.perceive(&ctx)
        }
    }

    /// A 1 km two lane road, returned as `[left, right]`.
    fn two_lanes() -> (Network, [LaneId; 2]) {
        let mut net = Network::new();
        let a = net.add_node("a");
        let b = net.add_node("b");
        let link = net.add_link(a, b, &Default::default());
        let attrs = LaneAttributes::new(Length::new(1000.0), Speed::new(30.0));
        let left = net.add_lane(link, &attrs);
        let right = net.add_lane(link, &attrs);
        net.set_adjacent(left, right, Default::default());
        (net, [left, right])
    }

    /// Two consecutive single lane links of 200 m with the given speed limits.
    fn two_links(first: f64, second: f64) -> (Network, [LaneId; 2]) {
        let mut net = Network::new();
        let [a, b, c] = ["a", "b", "c"].map(|n| net.add_node(n));
        let ab = net.add_link(a, b, &Default::default());
        let bc = net.add_link(b, c, &Default::default());
        let one = net.add_lane(ab, &LaneAttributes::new(Length::new(200.0), Speed::new(first)));
        let two = net.add_lane(bc, &LaneAttributes::new(Length::new(200.0), Speed::new(second)));
        net.connect_lanes(one, two);
        (net, [one, two])
    }

    #[test]
    fn repeated_reads_are_identical() {
        let (net, [_, right]) = two_lanes();
        let mut world = World::new(net);
        let ego = world.place(right, 100.0, 20.0);
        let leader = world.place(right, 150.0, 15.0);
        let mut perception = LanePerception::standard(NeighborSensing::Sensor);
        world.perceive(&mut perception, ego).unwrap();
        assert_eq!(perception.cycle(), 1);

        let first = perception.neighbors().unwrap().clone();
        let second = perception.neighbors().unwrap();
        assert_eq!(&first, second);
        assert_eq!(
            first.current.leaders[0].distance.si().to_bits(),
            second.current.leaders[0].distance.si().to_bits()
        );

        // The leader commits a new plan: only the next cycle sees it.
        let plan = OperationalPlan::new(
            Time::ZERO,
            Duration::new(0.5),
            right,
            Length::new(160.0),
            Speed::new(15.0),
            crate::gtu::plan::Segment::Acceleration(Acceleration::ZERO),
        );
        world.gtus[leader].commit(plan);
        assert_eq!(perception.neighbors().unwrap(), &first);
        world.perceive(&mut perception, ego).unwrap();
        assert_eq!(perception.cycle(), 2);
        assert_approx_eq!(perception.neighbors().unwrap().current.leaders[0].distance.si(), 56.0);
    }

    #[test]
    fn neighbours_within_horizon() {
        let (net, [left, right]) = two_lanes();
        let mut world = World::new(net);
        let ego = world.place(right, 100.0, 20.0);
        world.place(right, 150.0, 15.0);
        world.place(right, 600.0, 15.0);
        world.place(right, 50.0, 25.0);
        world.place(left, 101.0, 20.0);
        let mut perception = LanePerception::standard(NeighborSensing::Sensor);
        world.perceive(&mut perception, ego).unwrap();

        let neighbors = perception.neighbors().unwrap();
        assert_eq!(neighbors.current.leaders.len(), 1);
        assert_eq!(neighbors.current.leaders[0].distance, Length::new(46.0));
        assert_eq!(neighbors.current.followers.len(), 1);
        assert_eq!(neighbors.current.followers[0].distance, Length::new(-46.0));
        assert!(neighbors.current.parallel.is_empty());
        let left_traffic = neighbors.side(LateralDirection::Left).unwrap();
        assert_eq!(left_traffic.parallel.len(), 1);
        assert!(neighbors.right.is_none());
        assert_eq!(neighbors.current.leaders[0].acceleration, None);
    }

    #[test]
    fn direct_sensing_observes_acceleration() {
        let (net, [_, right]) = two_lanes();
        let mut world = World::new(net);
        let ego = world.place(right, 100.0, 20.0);
        world.place(right, 150.0, 15.0);
        let mut perception = LanePerception::standard(NeighborSensing::Direct);
        world.perceive(&mut perception, ego).unwrap();
        let leader = perception.neighbors().unwrap().current.leader().cloned().unwrap();
        assert_eq!(leader.acceleration, Some(Acceleration::ZERO));
    }

    #[test]
    fn neighbours_across_lane_boundaries() {
        let (net, [one, two]) = two_links(25.0, 25.0);
        let mut world = World::new(net);
        let ego = world.place(one, 150.0, 20.0);
        let ahead = world.place(two, 50.0, 20.0);
        let mut perception = LanePerception::standard(NeighborSensing::Sensor);
        world.perceive(&mut perception, ego).unwrap();
        let leader = perception.neighbors().unwrap().current.leader().cloned().unwrap();
        assert_eq!(leader.gtu, ahead);
        assert_approx_eq!(leader.distance.si(), 96.0);

        world.perceive(&mut perception, ahead).unwrap();
        let follower = perception.neighbors().unwrap().current.follower().cloned().unwrap();
        assert_eq!(follower.gtu, ego);
        assert_approx_eq!(follower.distance.si(), -96.0);
    }

    #[test]
    fn dead_end_and_speed_limit_ahead() {
        let (net, [one, _]) = two_links(25.0, 15.0);
        let mut world = World::new(net);
        let ego = world.place(one, 150.0, 20.0);
        let mut perception = LanePerception::standard(NeighborSensing::Sensor);
        world.perceive(&mut perception, ego).unwrap();
        let infra = perception.infrastructure().unwrap();
        assert_eq!(infra.speed_limit, Speed::new(25.0));
        assert_eq!(
            infra.decision_points.as_slice(),
            &[
                DecisionPoint {
                    kind: DecisionKind::SpeedLimitChange(Speed::new(15.0)),
                    distance: Length::new(50.0),
                },
                DecisionPoint {
                    kind: DecisionKind::DeadEnd,
                    distance: Length::new(250.0),
                },
            ]
        );
        assert_eq!(infra.incentives.current, STAY_IN_CURRENT_LANE_INCENTIVE);
    }

    #[test]
    fn sink_ends_the_road_ahead() {
        let (mut net, [one, two]) = two_links(25.0, 25.0);
        net.add_detector(two, Length::new(20.0), DetectorKind::Sink);
        let mut world = World::new(net);
        let ego = world.place(one, 150.0, 20.0);
        let mut perception = LanePerception::standard(NeighborSensing::Sensor);
        world.perceive(&mut perception, ego).unwrap();
        let infra = perception.infrastructure().unwrap();
        assert_eq!(
            infra.next_decision_point(),
            Some(&DecisionPoint {
                kind: DecisionKind::Sink,
                distance: Length::new(70.0),
            })
        );
        assert_eq!(infra.decision_points.len(), 1);
    }

    #[test]
    fn failed_cycle_leaves_nothing_readable() {
        // A split into three exits without a route cannot be resolved.
        let mut net = Network::new();
        let a = net.add_node("a");
        let b = net.add_node("b");
        let ab = net.add_link(a, b, &Default::default());
        let attrs = LaneAttributes::new(Length::new(100.0), Speed::new(25.0));
        let lane = net.add_lane(ab, &attrs);
        for name in ["c", "d", "e"] {
            let end = net.add_node(name);
            let link = net.add_link(b, end, &Default::default());
            let out = net.add_lane(link, &attrs);
            net.connect_lanes(lane, out);
        }
        let mut world = World::new(net);
        let ego = world.place(lane, 10.0, 10.0);
        let mut perception = LanePerception::standard(NeighborSensing::Sensor);
        let err = world.perceive(&mut perception, ego).unwrap_err();
        assert!(matches!(err, SimError::NetworkInconsistency { .. }));
        assert!(matches!(
            perception.ego(),
            Err(SimError::PerceptionUnavailable {
                capability: Capability::Ego,
                reason: "not perceived yet"
            })
        ));
    }
}
