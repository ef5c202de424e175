//! Strategic routing: which link to take at a node, which lane to follow,
//! and how strongly a GTU should prefer each lane to stay on its route.

use crate::error::{SimError, SimResult};
use crate::gtu::GtuType;
use crate::network::{LateralDirection, Network};
use crate::units::{Acceleration, Duration, Length, Speed};
use crate::{LaneId, LinkId, NodeId, RouteId};
use log::debug;
use slotmap::SlotMap;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::HashMap;

/// The suitability of a lane that can be followed past the time horizon.
pub const NO_LANE_CHANGE_NEEDED: Length = Length::new(f64::MAX);

/// The suitability of a lane that must be left immediately.
pub const GET_OFF_THIS_LANE_NOW: Length = Length::ZERO;

/// The incentive to move to the preferred side when the route doesn't care.
pub const PREFERRED_LANE_INCENTIVE: Acceleration = Acceleration::new(0.3);

/// The incentive to move away from the preferred side when the route doesn't care.
pub const NON_PREFERRED_LANE_INCENTIVE: Acceleration = Acceleration::new(-0.3);

/// The incentive to stay in the current lane when the route doesn't care.
pub const STAY_IN_CURRENT_LANE_INCENTIVE: Acceleration = Acceleration::new(0.1);

/// The strongest (dis)incentive derived from the route.
const MAX_ROUTE_DECELERATION: f64 = 10.0; // m/s^2

/// The maximum number of links inspected when looking for the next split.
const MAX_LINKS_TO_SPLIT: usize = 64;

pub type RouteSet = SlotMap<RouteId, Route>;

/// An ordered sequence of nodes a GTU intends to visit.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Route {
    nodes: Vec<NodeId>,
}

impl Route {
    /// Creates a route through the given nodes.
    pub fn new(nodes: Vec<NodeId>) -> SimResult<Self> {
        if nodes.is_empty() {
            return Err(SimError::network("route", "a route needs at least one node"));
        }
        Ok(Self { nodes })
    }

    /// Finds the route from `from` to `to` with the shortest free-flow travel time.
    pub fn shortest(network: &Network, from: NodeId, to: NodeId, gtu_type: GtuType) -> SimResult<Self> {
        let result = pathfinding::directed::dijkstra::dijkstra(
            &from,
            |node| successors(network, *node, gtu_type),
            |node| *node == to,
        );
        let (nodes, _) = result.ok_or_else(|| {
            SimError::network(
                "route",
                format!(
                    "no route from {} to {} for {:?}",
                    network.node(from).name(),
                    network.node(to).name(),
                    gtu_type
                ),
            )
        })?;
        Ok(Self { nodes })
    }

    /// Checks that every pair of consecutive nodes is joined by a link the GTU type can use.
    pub fn validate(&self, network: &Network, gtu_type: GtuType) -> SimResult<()> {
        for pair in self.nodes.windows(2) {
            let usable = network
                .link_between(pair[0], pair[1], gtu_type)
                .filter(|link| network.link_accepts(*link, gtu_type));
            if usable.is_none() {
                return Err(SimError::network(
                    "route",
                    format!(
                        "no link from {} to {} for {:?}",
                        network.node(pair[0]).name(),
                        network.node(pair[1]).name(),
                        gtu_type
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn origin(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn destination(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// The node visited after `node`, or `None` if `node` is the destination
    /// or not on the route.
    pub fn next_node(&self, node: NodeId) -> Option<NodeId> {
        let idx = self.nodes.iter().position(|n| *n == node)?;
        self.nodes.get(idx + 1).copied()
    }
}

/// The neighbours of a node for Dijkstra, with the travel time in ms.
fn successors(network: &Network, node: NodeId, gtu_type: GtuType) -> SmallVec<[(NodeId, u64); 4]> {
    network
        .departing_links(node, gtu_type)
        .filter(|link| network.link_accepts(*link, gtu_type))
        .map(|link| {
            let other = network.link(link).other_end(node);
            (other, travel_time_ms(network, link, gtu_type))
        })
        .collect()
}

/// The free-flow travel time over a link in ms, at the highest lane speed limit.
fn travel_time_ms(network: &Network, link: LinkId, gtu_type: GtuType) -> u64 {
    let speed = network
        .link(link)
        .lanes()
        .iter()
        .map(|lane| network.speed_limit(*lane, gtu_type).si())
        .fold(0.0, f64::max);
    let length = network.link_length(link).si();
    if speed <= 0.0 {
        return u32::MAX as u64;
    }
    (1000.0 * length / speed).round() as u64
}

/// The links a GTU may leave `node` by, excluding the link it arrived on.
fn candidate_links(
    network: &Network,
    node: NodeId,
    arriving: Option<LinkId>,
    gtu_type: GtuType,
) -> SmallVec<[LinkId; 4]> {
    network
        .departing_links(node, gtu_type)
        .filter(|link| Some(*link) != arriving)
        .filter(|link| network.link_accepts(*link, gtu_type))
        .collect()
}

/// Determines the link a GTU takes out of `node` after arriving on `arriving`.
///
/// The route is only consulted when there is more than one candidate link.
pub fn next_link(
    network: &Network,
    node: NodeId,
    arriving: Option<LinkId>,
    gtu_type: GtuType,
    route: Option<&Route>,
) -> SimResult<LinkId> {
    let candidates = candidate_links(network, node, arriving, gtu_type);
    let name = network.node(node).name();
    match candidates.as_slice() {
        [] => Err(SimError::network(
            "route",
            format!("node {name} is a dead end for {gtu_type:?}"),
        )),
        [only] => Ok(*only),
        _ => {
            let route = route.ok_or_else(|| {
                SimError::network(
                    "route",
                    format!("node {name} has {} exits and there is no route", candidates.len()),
                )
            })?;
            if !route.contains(node) {
                return Err(SimError::network(
                    "route",
                    format!("node {name} is not on the route"),
                ));
            }
            let next = route.next_node(node).ok_or_else(|| {
                SimError::network("route", format!("the route ends at node {name}"))
            })?;
            candidates
                .iter()
                .copied()
                .find(|link| network.link(*link).other_end(node) == next)
                .ok_or_else(|| {
                    SimError::network(
                        "route",
                        format!(
                            "no link from {name} to {} for {gtu_type:?}",
                            network.node(next).name()
                        ),
                    )
                })
        }
    }
}

/// Resolves next links, remembering the answers.
///
/// The cache is owned by the simulation and must be invalidated whenever the
/// network topology changes.
#[derive(Debug, Default)]
pub struct RouteResolver {
    cache: RefCell<HashMap<(NodeId, Option<LinkId>, GtuType, Option<RouteId>), LinkId>>,
}

impl RouteResolver {
    pub fn new() -> Self {
        Default::default()
    }

    /// The cached equivalent of [`next_link`].
    pub fn next_link(
        &self,
        network: &Network,
        routes: &RouteSet,
        node: NodeId,
        arriving: Option<LinkId>,
        gtu_type: GtuType,
        route: Option<RouteId>,
    ) -> SimResult<LinkId> {
        let key = (node, arriving, gtu_type, route);
        if let Some(link) = self.cache.borrow().get(&key) {
            return Ok(*link);
        }
        let link = next_link(
            network,
            node,
            arriving,
            gtu_type,
            route.and_then(|id| routes.get(id)),
        )?;
        self.cache.borrow_mut().insert(key, link);
        Ok(link)
    }

    /// Forgets every cached answer.
    pub fn invalidate(&mut self) {
        self.cache.get_mut().clear();
    }

    /// The number of cached answers.
    pub fn cached(&self) -> usize {
        self.cache.borrow().len()
    }
}

/// The route incentives for the lanes left of, at and right of a GTU.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LaneIncentives {
    pub left: Acceleration,
    pub current: Acceleration,
    pub right: Acceleration,
}

impl LaneIncentives {
    /// The incentives of a GTU whose route doesn't constrain its lane.
    pub fn keep_side(preferred: LateralDirection) -> Self {
        let (left, right) = match preferred {
            LateralDirection::Left => (PREFERRED_LANE_INCENTIVE, NON_PREFERRED_LANE_INCENTIVE),
            LateralDirection::Right => (NON_PREFERRED_LANE_INCENTIVE, PREFERRED_LANE_INCENTIVE),
        };
        Self {
            left,
            current: STAY_IN_CURRENT_LANE_INCENTIVE,
            right,
        }
    }

    pub fn side(&self, side: LateralDirection) -> Acceleration {
        match side {
            LateralDirection::Left => self.left,
            LateralDirection::Right => self.right,
        }
    }
}

/// The deceleration needed to stop from `speed` within `distance`.
pub fn stop_incentive(speed: Speed, distance: Length) -> Acceleration {
    if distance.si() <= 0.0 {
        return Acceleration::new(-MAX_ROUTE_DECELERATION);
    }
    let v = speed.si();
    Acceleration::new(f64::max(-v * v / (2.0 * distance.si()), -MAX_ROUTE_DECELERATION))
}

/// Answers routing questions on behalf of one GTU.
#[derive(Clone, Copy)]
pub struct Navigator<'a> {
    pub network: &'a Network,
    pub routes: &'a RouteSet,
    pub resolver: &'a RouteResolver,
    pub gtu_type: GtuType,
    pub route: Option<RouteId>,
}

impl<'a> Navigator<'a> {
    /// The link to take out of `node`.
    pub fn next_link(&self, node: NodeId, arriving: Option<LinkId>) -> SimResult<LinkId> {
        self.resolver.next_link(
            self.network,
            self.routes,
            node,
            arriving,
            self.gtu_type,
            self.route,
        )
    }

    /// The lane to follow after the end of `lane`, or `None` at a dead end or
    /// where the lane does not continue onto the link the route takes.
    pub fn next_lane_on_route(&self, lane: LaneId) -> SimResult<Option<LaneId>> {
        let next = self.network.next_lanes(lane, self.gtu_type);
        let first = match next.first() {
            Some(first) => *first,
            None => return Ok(None),
        };
        let first_link = self.network.lane(first).link();
        if next.iter().all(|l| self.network.lane(*l).link() == first_link) {
            return Ok(Some(first));
        }
        let link = self.network.lane(lane).link();
        let node = self.network.link(link).end();
        let target = self.next_link(node, Some(link))?;
        Ok(next
            .iter()
            .copied()
            .find(|l| self.network.lane(*l).link() == target))
    }

    /// Whether the end of `lane` is a split that requires a routing decision.
    pub fn is_branch(&self, lane: LaneId) -> bool {
        let next = self.network.next_lanes(lane, self.gtu_type);
        next.iter()
            .map(|l| self.network.lane(*l).link())
            .any(|link| Some(link) != next.first().map(|l| self.network.lane(*l).link()))
    }

    /// The lanes of `link` the GTU may use, left to right.
    fn compatible_lanes(&self, link: LinkId) -> SmallVec<[LaneId; 4]> {
        self.network
            .link(link)
            .lanes()
            .iter()
            .copied()
            .filter(|l| self.network.lane(*l).compatibility().permits(self.gtu_type))
            .collect()
    }

    fn travel_time(&self, lane: LaneId, distance: Length) -> f64 {
        distance.si() / self.network.speed_limit(lane, self.gtu_type).si()
    }

    /// The distance within which a GTU at `position` on `lane` should leave the
    /// lane to stay on its route, looking no further ahead than `horizon`.
    ///
    /// Returns [`NO_LANE_CHANGE_NEEDED`] if the lane is as good as any other.
    pub fn suitability(&self, lane: LaneId, position: Length, horizon: Duration) -> SimResult<Length> {
        let net = self.network;
        let mut remaining = net.lane(lane).length() - position;
        let mut spare = horizon.si() - self.travel_time(lane, remaining);
        let mut current = lane;
        let mut link = net.lane(lane).link();

        let mut inspected = 0;
        loop {
            inspected += 1;
            if !(spare > 0.0) || inspected > MAX_LINKS_TO_SPLIT {
                return Ok(NO_LANE_CHANGE_NEEDED);
            }
            match self.compatible_lanes(link).len() {
                0 => {
                    return Err(SimError::network(
                        "route",
                        format!("no lanes on link {link:?} for {:?}", self.gtu_type),
                    ))
                }
                1 => return Ok(NO_LANE_CHANGE_NEEDED),
                _ => {}
            }
            let node = net.link(link).end();
            let exits = candidate_links(net, node, Some(link), self.gtu_type);
            match exits.as_slice() {
                [] => return Ok(NO_LANE_CHANGE_NEEDED),
                [only] => {
                    let continuation = net
                        .next_lanes(current, self.gtu_type)
                        .into_iter()
                        .find(|l| net.lane(*l).link() == *only)
                        .or_else(|| self.compatible_lanes(*only).first().copied());
                    let Some(next) = continuation else {
                        return Ok(NO_LANE_CHANGE_NEEDED);
                    };
                    let length = net.lane(next).length();
                    remaining += length;
                    spare -= self.travel_time(next, length);
                    current = next;
                    link = *only;
                }
                _ => break,
            }
        }

        // The end of `link` is a split; find the lanes that lead onto the route.
        let after = self.next_link(net.link(link).end(), Some(link))?;
        let spare = Duration::new(spare);
        let mut suitable: SmallVec<[(LaneId, Length); 4]> = SmallVec::new();
        for before in self.compatible_lanes(link) {
            for cont in net.next_lanes(before, self.gtu_type) {
                if net.lane(cont).link() != after {
                    continue;
                }
                let value = self.suitability(cont, Length::ZERO, spare)?;
                match suitable.iter().position(|(l, _)| *l == before) {
                    Some(idx) => suitable[idx].1 = suitable[idx].1.min(value),
                    None => suitable.push((before, value)),
                }
            }
        }
        if suitable.is_empty() {
            return Err(SimError::network(
                "route",
                format!("no lane of link {link:?} continues onto link {after:?}"),
            ));
        }
        if let Some((_, value)) = suitable.iter().find(|(l, _)| *l == current) {
            return Ok(*value);
        }

        let total = self.compatible_lanes(link).len();
        let left = self.suitability_with_lane_changes(current, remaining, &suitable, total, LateralDirection::Left);
        let right = self.suitability_with_lane_changes(current, remaining, &suitable, total, LateralDirection::Right);
        Ok(left.max(right))
    }

    /// The suitability of a lane from which lane changes are needed to reach a
    /// suitable lane, spreading the remaining distance over the lane changes.
    fn suitability_with_lane_changes(
        &self,
        start: LaneId,
        remaining: Length,
        suitable: &[(LaneId, Length)],
        total: usize,
        side: LateralDirection,
    ) -> Length {
        let mut used = 0;
        let mut lane = start;
        let value = loop {
            used += 1;
            if used > total {
                return GET_OFF_THIS_LANE_NOW;
            }
            match self.network.adjacent_lane(lane, side, self.gtu_type) {
                Some(next) => lane = next,
                None => return GET_OFF_THIS_LANE_NOW,
            }
            if let Some((_, value)) = suitable.iter().find(|(l, _)| *l == lane) {
                break *value;
            }
        };
        let fraction = if value == NO_LANE_CHANGE_NEEDED { 0.0 } else { 0.5 };
        let not_suitable = total.saturating_sub(suitable.len()) as f64;
        if not_suitable + fraction <= 0.0 {
            return remaining;
        }
        remaining * ((not_suitable - used as f64 + 1.0 + fraction) / (not_suitable + fraction))
    }

    /// Converts the suitability of the current and adjacent lanes into
    /// acceleration incentives for the lane change model.
    ///
    /// A lane that can be followed past the horizon gets the default incentive
    /// for keeping to the preferred side. Routing failures while looking ahead
    /// are not fatal here, the lane is then treated as suitable.
    pub fn lane_incentives(
        &self,
        lane: LaneId,
        position: Length,
        speed: Speed,
        preferred: LateralDirection,
        horizon: Duration,
    ) -> LaneIncentives {
        let defaults = LaneIncentives::keep_side(preferred);
        let suitability_of = |lane: Option<LaneId>| match lane {
            None => GET_OFF_THIS_LANE_NOW,
            Some(lane) => self
                .suitability(lane, position, horizon)
                .unwrap_or_else(|err| {
                    debug!("Route problem while computing lane suitability: {err}");
                    NO_LANE_CHANGE_NEEDED
                }),
        };
        let incentive = |suitability: Length, default: Acceleration| {
            if suitability == NO_LANE_CHANGE_NEEDED {
                default
            } else {
                stop_incentive(speed, suitability)
            }
        };
        let left = self.network.adjacent_lane(lane, LateralDirection::Left, self.gtu_type);
        let right = self.network.adjacent_lane(lane, LateralDirection::Right, self.gtu_type);
        LaneIncentives {
            left: incentive(suitability_of(left), defaults.left),
            current: incentive(suitability_of(Some(lane)), defaults.current),
            right: incentive(suitability_of(right), defaults.right),
        }
    }
}
