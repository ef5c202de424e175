use crate::gtu::GtuType;
use crate::units::{Length, Speed};
use crate::{DetectorId, LaneId, LinkId, NodeId};
pub use lane::{Lane, LaneAttributes};
use slotmap::SlotMap;
use smallvec::SmallVec;

mod lane;

/// The lateral side of a lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LateralDirection {
    Left,
    Right,
}

impl LateralDirection {
    /// The other side.
    pub fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

/// The direction in which a link may be travelled, relative to its design line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Directionality {
    /// The link may not be travelled at all.
    None,
    /// From the start node to the end node.
    Forward,
    /// From the end node to the start node.
    Backward,
    Both,
}

impl Directionality {
    fn permits(self, forward: bool) -> bool {
        match self {
            Self::None => false,
            Self::Forward => forward,
            Self::Backward => !forward,
            Self::Both => true,
        }
    }
}

/// The set of GTU types something applies to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Compatibility {
    #[default]
    All,
    Only(SmallVec<[GtuType; 4]>),
}

impl Compatibility {
    /// Compatible with every GTU type.
    pub fn all() -> Self {
        Self::All
    }

    /// Compatible with the given GTU types only.
    pub fn only(types: &[GtuType]) -> Self {
        Self::Only(types.iter().copied().collect())
    }

    /// Compatible with no GTU type.
    pub fn none() -> Self {
        Self::Only(SmallVec::new())
    }

    /// Whether the GTU type is compatible.
    pub fn permits(&self, gtu_type: GtuType) -> bool {
        match self {
            Self::All => true,
            Self::Only(types) => types.contains(&gtu_type),
        }
    }
}

/// A point in the network where links meet.
#[derive(Clone, Debug)]
pub struct Node {
    id: NodeId,
    name: String,
    /// All links with this node as their start or end.
    links: Vec<LinkId>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The links attached to this node, in insertion order.
    pub fn links(&self) -> &[LinkId] {
        &self.links
    }
}

/// A road between two nodes, carrying one or more lanes side by side.
#[derive(Clone, Debug)]
pub struct Link {
    id: LinkId,
    start: NodeId,
    end: NodeId,
    /// The default directionality.
    directionality: Directionality,
    /// Directionality overrides for specific GTU types.
    overrides: SmallVec<[(GtuType, Directionality); 2]>,
    /// The lanes of the link, ordered left to right.
    lanes: Vec<LaneId>,
}

/// The attributes of a link.
#[derive(Clone, Debug)]
pub struct LinkAttributes {
    /// The default directionality for all GTU types.
    pub directionality: Directionality,
    /// Directionality overrides for specific GTU types.
    pub overrides: Vec<(GtuType, Directionality)>,
}

impl Default for LinkAttributes {
    fn default() -> Self {
        Self {
            directionality: Directionality::Forward,
            overrides: vec![],
        }
    }
}

impl Link {
    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn end(&self) -> NodeId {
        self.end
    }

    /// The lanes on this link, left to right.
    pub fn lanes(&self) -> &[LaneId] {
        &self.lanes
    }

    /// The directionality of the link for the given GTU type.
    pub fn directionality(&self, gtu_type: GtuType) -> Directionality {
        self.overrides
            .iter()
            .find(|(t, _)| *t == gtu_type)
            .map(|(_, d)| *d)
            .unwrap_or(self.directionality)
    }

    /// Whether a GTU of the given type may leave `node` along this link.
    pub fn can_depart_from(&self, node: NodeId, gtu_type: GtuType) -> bool {
        let dir = self.directionality(gtu_type);
        (node == self.start && dir.permits(true)) || (node == self.end && dir.permits(false))
    }

    /// The node at the other end of the link.
    pub fn other_end(&self, node: NodeId) -> NodeId {
        if node == self.start {
            self.end
        } else {
            self.start
        }
    }
}

/// What a detector does when a GTU passes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DetectorKind {
    /// Removes the GTU from the simulation.
    Sink,
    /// Reports the passage and triggers a replan of the GTU.
    Sensor,
}

/// A point detector on a lane.
#[derive(Clone, Copy, Debug)]
pub struct Detector {
    pub id: DetectorId,
    pub lane: LaneId,
    pub position: Length,
    pub kind: DetectorKind,
}

/// A static road network: nodes, links, lanes and detectors.
///
/// The topology is fixed once construction is complete. The only state that
/// changes while simulating is the occupancy list of each lane, which is
/// owned by the simulation kernel.
#[derive(Default)]
pub struct Network {
    nodes: SlotMap<NodeId, Node>,
    links: SlotMap<LinkId, Link>,
    lanes: SlotMap<LaneId, Lane>,
    detectors: SlotMap<DetectorId, Detector>,
}

impl Network {
    /// Creates an empty network.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a node.
    pub fn add_node(&mut self, name: &str) -> NodeId {
        self.nodes.insert_with_key(|id| Node {
            id,
            name: name.to_string(),
            links: vec![],
        })
    }

    /// Adds a link from `start` to `end`.
    pub fn add_link(&mut self, start: NodeId, end: NodeId, attributes: &LinkAttributes) -> LinkId {
        let link_id = self.links.insert_with_key(|id| Link {
            id,
            start,
            end,
            directionality: attributes.directionality,
            overrides: attributes.overrides.iter().copied().collect(),
            lanes: vec![],
        });
        self.nodes[start].links.push(link_id);
        if start != end {
            self.nodes[end].links.push(link_id);
        }
        link_id
    }

    /// Adds a lane to the right-hand side of a link.
    ///
    /// All lanes of a link share the same longitudinal coordinate, so they
    /// should have the same length.
    pub fn add_lane(&mut self, link: LinkId, attributes: &LaneAttributes) -> LaneId {
        let lane_id = self
            .lanes
            .insert_with_key(|id| Lane::new(id, link, attributes));
        self.links[link].lanes.push(lane_id);
        lane_id
    }

    /// Marks two lanes of the same link as laterally adjacent, and permits
    /// lane changes between them for the given GTU types in both directions.
    pub fn set_adjacent(&mut self, left: LaneId, right: LaneId, permitted: Compatibility) {
        self.lanes[left].set_adjacent(LateralDirection::Right, right, permitted.clone());
        self.lanes[right].set_adjacent(LateralDirection::Left, left, permitted);
    }

    /// Forbids lane changes from `lane` towards `side`, keeping the adjacency itself.
    pub fn forbid_lane_change(&mut self, lane: LaneId, side: LateralDirection) {
        self.lanes[lane].forbid_lane_change(side);
    }

    /// Specifies that the end of the `from` lane connects to the start of the `to` lane.
    pub fn connect_lanes(&mut self, from: LaneId, to: LaneId) {
        self.lanes[from].add_lane_out(to);
        self.lanes[to].add_lane_in(from);
    }

    /// Adds a detector to a lane.
    pub fn add_detector(&mut self, lane: LaneId, position: Length, kind: DetectorKind) -> DetectorId {
        let id = self.detectors.insert_with_key(|id| Detector {
            id,
            lane,
            position,
            kind,
        });
        self.lanes[lane].add_detector(id, position);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id]
    }

    pub fn lane(&self, id: LaneId) -> &Lane {
        &self.lanes[id]
    }

    pub fn detector(&self, id: DetectorId) -> &Detector {
        &self.detectors[id]
    }

    /// Gets the lane with the given ID, if it exists.
    pub fn get_lane(&self, id: LaneId) -> Option<&Lane> {
        self.lanes.get(id)
    }

    pub(crate) fn lane_mut(&mut self, id: LaneId) -> &mut Lane {
        &mut self.lanes[id]
    }

    /// Returns an iterator over all the nodes in the network.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Returns an iterator over all the links in the network.
    pub fn iter_links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    /// Returns an iterator over all the lanes in the network.
    pub fn iter_lanes(&self) -> impl Iterator<Item = &Lane> {
        self.lanes.values()
    }

    pub(crate) fn iter_lanes_mut(&mut self) -> impl Iterator<Item = &mut Lane> {
        self.lanes.values_mut()
    }

    /// The lane laterally adjacent to `lane` on the given side, if it exists,
    /// accepts the GTU type, and a lane change towards it is permitted.
    pub fn adjacent_lane(
        &self,
        lane: LaneId,
        side: LateralDirection,
        gtu_type: GtuType,
    ) -> Option<LaneId> {
        let adjacent = self.lanes[lane].adjacent(side)?;
        if !adjacent.permitted.permits(gtu_type) {
            return None;
        }
        let target = adjacent.lane;
        self.lanes[target]
            .compatibility()
            .permits(gtu_type)
            .then_some(target)
    }

    /// The downstream lanes the GTU type can reach from the end of `lane`
    /// without knowledge of its route.
    pub fn next_lanes(&self, lane: LaneId, gtu_type: GtuType) -> SmallVec<[LaneId; 4]> {
        self.lanes[lane]
            .lanes_out()
            .iter()
            .copied()
            .filter(|id| self.lanes[*id].compatibility().permits(gtu_type))
            .collect()
    }

    /// The upstream lanes leading into `lane` for the GTU type.
    pub fn prev_lanes(&self, lane: LaneId, gtu_type: GtuType) -> SmallVec<[LaneId; 4]> {
        self.lanes[lane]
            .lanes_in()
            .iter()
            .copied()
            .filter(|id| self.lanes[*id].compatibility().permits(gtu_type))
            .collect()
    }

    /// The speed limit on the lane for the GTU type.
    pub fn speed_limit(&self, lane: LaneId, gtu_type: GtuType) -> Speed {
        self.lanes[lane].speed_limit(gtu_type)
    }

    /// Whether any lane on the link accepts the GTU type.
    pub fn link_accepts(&self, link: LinkId, gtu_type: GtuType) -> bool {
        self.links[link]
            .lanes
            .iter()
            .any(|id| self.lanes[*id].compatibility().permits(gtu_type))
    }

    /// Finds a link leaving `from` towards `to` that the GTU type may travel.
    pub fn link_between(&self, from: NodeId, to: NodeId, gtu_type: GtuType) -> Option<LinkId> {
        self.nodes[from].links.iter().copied().find(|id| {
            let link = &self.links[*id];
            link.other_end(from) == to && link.can_depart_from(from, gtu_type)
        })
    }

    /// The links that leave `node` for the GTU type, in insertion order.
    pub fn departing_links(
        &self,
        node: NodeId,
        gtu_type: GtuType,
    ) -> impl Iterator<Item = LinkId> + '_ {
        self.nodes[node]
            .links
            .iter()
            .copied()
            .filter(move |id| self.links[*id].can_depart_from(node, gtu_type))
    }

    /// The links on which the GTU type can arrive at `node`.
    pub fn arriving_links(
        &self,
        node: NodeId,
        gtu_type: GtuType,
    ) -> impl Iterator<Item = LinkId> + '_ {
        self.nodes[node].links.iter().copied().filter(move |id| {
            let link = &self.links[*id];
            link.can_depart_from(link.other_end(node), gtu_type)
        })
    }

    /// The length of a link, taken as the length of its first lane.
    pub fn link_length(&self, link: LinkId) -> Length {
        self.links[link]
            .lanes
            .first()
            .map(|id| self.lanes[*id].length())
            .unwrap_or(Length::ZERO)
    }
}
