use super::{Compatibility, LateralDirection};
use crate::gtu::{Gtu, GtuType};
use crate::units::{Length, Speed};
use crate::{DetectorId, GtuId, LaneId, LinkId};
use slotmap::SlotMap;
use smallvec::SmallVec;

/// A single lane of traffic on a link.
#[derive(Clone, Debug)]
pub struct Lane {
    /// The lane ID.
    id: LaneId,
    /// The link carrying this lane.
    link: LinkId,
    /// The length of the lane in m.
    length: Length,
    /// The default speed limit.
    speed_limit: Speed,
    /// Speed limits that apply to specific GTU types.
    type_speed_limits: SmallVec<[(GtuType, Speed); 2]>,
    /// The GTU types that may use the lane.
    compatibility: Compatibility,
    /// The lanes laterally adjacent to this one.
    left: Option<Adjacent>,
    right: Option<Adjacent>,
    /// The lanes that precede this one.
    lanes_in: SmallVec<[LaneId; 4]>,
    /// The lanes that succeed this one.
    lanes_out: SmallVec<[LaneId; 4]>,
    /// The detectors on the lane, ordered by position.
    detectors: SmallVec<[(Length, DetectorId); 2]>,
    /// The GTUs registered on the lane, ordered by position.
    gtus: Vec<GtuId>,
}

/// The attributes of a lane.
#[derive(Clone, Debug)]
pub struct LaneAttributes {
    /// The length of the lane.
    pub length: Length,
    /// The default speed limit.
    pub speed_limit: Speed,
    /// Speed limits for specific GTU types.
    pub type_speed_limits: Vec<(GtuType, Speed)>,
    /// The GTU types that may use the lane.
    pub compatibility: Compatibility,
}

impl LaneAttributes {
    /// Creates the attributes of a lane open to all GTU types.
    pub fn new(length: Length, speed_limit: Speed) -> Self {
        Self {
            length,
            speed_limit,
            type_speed_limits: vec![],
            compatibility: Compatibility::all(),
        }
    }
}

/// A lateral neighbour of a lane.
#[derive(Clone, Debug)]
pub struct Adjacent {
    /// The neighbouring lane.
    pub lane: LaneId,
    /// The GTU types that may change into the neighbouring lane.
    pub permitted: Compatibility,
}

impl Lane {
    pub(crate) fn new(id: LaneId, link: LinkId, attribs: &LaneAttributes) -> Self {
        Self {
            id,
            link,
            length: attribs.length,
            speed_limit: attribs.speed_limit,
            type_speed_limits: attribs.type_speed_limits.iter().copied().collect(),
            compatibility: attribs.compatibility.clone(),
            left: None,
            right: None,
            lanes_in: SmallVec::new(),
            lanes_out: SmallVec::new(),
            detectors: SmallVec::new(),
            gtus: vec![],
        }
    }

    pub fn id(&self) -> LaneId {
        self.id
    }

    /// The link this lane belongs to.
    pub fn link(&self) -> LinkId {
        self.link
    }

    pub fn length(&self) -> Length {
        self.length
    }

    pub fn compatibility(&self) -> &Compatibility {
        &self.compatibility
    }

    /// The speed limit for a GTU type.
    pub fn speed_limit(&self, gtu_type: GtuType) -> Speed {
        self.type_speed_limits
            .iter()
            .find(|(t, _)| *t == gtu_type)
            .map(|(_, v)| *v)
            .unwrap_or(self.speed_limit)
    }

    /// The lateral neighbour on the given side.
    pub fn adjacent(&self, side: LateralDirection) -> Option<&Adjacent> {
        match side {
            LateralDirection::Left => self.left.as_ref(),
            LateralDirection::Right => self.right.as_ref(),
        }
    }

    pub fn lanes_in(&self) -> &[LaneId] {
        &self.lanes_in
    }

    pub fn lanes_out(&self) -> &[LaneId] {
        &self.lanes_out
    }

    /// The detectors on the lane with their positions, in increasing position.
    pub fn detectors(&self) -> impl Iterator<Item = (Length, DetectorId)> + '_ {
        self.detectors.iter().copied()
    }

    /// The GTUs registered on the lane, from upstream to downstream.
    pub fn gtus(&self) -> &[GtuId] {
        &self.gtus
    }

    pub(crate) fn set_adjacent(&mut self, side: LateralDirection, lane: LaneId, permitted: Compatibility) {
        let adjacent = Some(Adjacent { lane, permitted });
        match side {
            LateralDirection::Left => self.left = adjacent,
            LateralDirection::Right => self.right = adjacent,
        }
    }

    pub(crate) fn forbid_lane_change(&mut self, side: LateralDirection) {
        let adjacent = match side {
            LateralDirection::Left => self.left.as_mut(),
            LateralDirection::Right => self.right.as_mut(),
        };
        if let Some(adjacent) = adjacent {
            adjacent.permitted = Compatibility::none();
        }
    }

    pub(crate) fn add_lane_out(&mut self, lane: LaneId) {
        self.lanes_out.push(lane);
    }

    pub(crate) fn add_lane_in(&mut self, lane: LaneId) {
        self.lanes_in.push(lane);
    }

    pub(crate) fn add_detector(&mut self, id: DetectorId, pos: Length) {
        let idx = self
            .detectors
            .iter()
            .position(|(p, _)| *p > pos)
            .unwrap_or(self.detectors.len());
        self.detectors.insert(idx, (pos, id));
    }

    /// Inserts the GTU with the given ID into the lane, keeping the occupancy
    /// list ordered by the position of each GTU on this lane.
    pub(crate) fn insert_gtu(&mut self, gtus: &SlotMap<GtuId, Gtu>, id: GtuId) {
        let lane = self.id;
        let pos_of = |id: GtuId| gtus.get(id).and_then(|g| g.position_on(lane));
        let Some(gtu_pos) = pos_of(id) else {
            return;
        };
        let idx = self
            .gtus
            .iter()
            .position(|other| pos_of(*other).map_or(false, |pos| pos > gtu_pos))
            .unwrap_or(self.gtus.len());
        self.gtus.insert(idx, id);
    }

    /// Removes the GTU with the given ID from the lane.
    pub(crate) fn remove_gtu(&mut self, id: GtuId) {
        if let Some(idx) = self.gtus.iter().rposition(|g| *g == id) {
            self.gtus.remove(idx);
        }
    }
}
