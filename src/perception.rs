//! Per-GTU perception.
//!
//! A [`LanePerception`] holds one implementation per [`Capability`]. Every
//! planning cycle the kernel calls [`LanePerception::perceive`], after which
//! each category returns the same values until the next cycle.

use crate::error::{SimError, SimResult};
use crate::gtu::{Gtu, GtuSnapshot, GtuType, Kinematics, NeighborSensing};
use crate::network::LateralDirection;
use crate::route::Navigator;
use crate::units::{Acceleration, Duration, Length, Speed, Time};
use crate::util::Interval;
use crate::{GtuId, GtuSet};
use itertools::Itertools;
use std::collections::BTreeMap;

pub use self::categories::{
    DecisionKind, DecisionPoint, DirectNeighbors, EgoPerception, EgoView, InfrastructurePerception,
    InfrastructureView, NeighborsView, SensorNeighbors,
};

mod categories;

/// A kind of information a decision model can ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Capability {
    /// The GTU's own kinematics and dimensions.
    Ego,
    /// Headways to other GTUs on the current and adjacent lanes.
    Neighbors,
    /// Speed limits, decision points and route incentives.
    Infrastructure,
}

/// Where a perceived GTU is relative to the perceiving one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Relation {
    Leader,
    /// Longitudinally overlapping.
    Parallel,
    Follower,
}

/// A perceived neighbour.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Headway {
    pub gtu: GtuId,
    pub gtu_type: GtuType,
    /// The net distance between the GTUs: from the front of the perceiving
    /// GTU to the rear of a leader, negative from the rear of the perceiving
    /// GTU to the front of a follower, and zero when parallel.
    pub distance: Length,
    pub length: Length,
    pub speed: Speed,
    /// The acceleration, if it can be observed.
    pub acceleration: Option<Acceleration>,
    pub relation: Relation,
}

impl Headway {
    /// Relates `other`, whose centre is at `other_position` along the axis
    /// of the perceiving GTU, to a GTU of length `ego_length` centred on
    /// `ego_position`. Touching GTUs are parallel.
    pub fn relate(
        ego_position: Length,
        ego_length: Length,
        other: &GtuSnapshot,
        other_position: Length,
        observe_acceleration: bool,
    ) -> Self {
        let ego = Interval::disc(ego_position, ego_length * 0.5);
        let them = Interval::disc(other_position, other.length * 0.5);
        let (relation, distance) = if them.min > ego.max {
            (Relation::Leader, them.min - ego.max)
        } else if them.max < ego.min {
            (Relation::Follower, them.max - ego.min)
        } else {
            (Relation::Parallel, Length::ZERO)
        };
        Self {
            gtu: other.id,
            gtu_type: other.gtu_type,
            distance,
            length: other.length,
            speed: other.speed,
            acceleration: observe_acceleration.then_some(other.acceleration),
            relation,
        }
    }
}

/// The GTUs perceived on one lane.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaneTraffic {
    /// Leaders, nearest first.
    pub leaders: Vec<Headway>,
    /// Followers, nearest first.
    pub followers: Vec<Headway>,
    /// Parallel GTUs, by ID.
    pub parallel: Vec<Headway>,
}

impl LaneTraffic {
    /// Sorts headways into leaders, followers and parallel GTUs.
    /// A GTU appearing more than once is only kept at its first appearance.
    pub fn from_headways(headways: impl IntoIterator<Item = Headway>) -> Self {
        let mut traffic = Self::default();
        for headway in headways.into_iter().unique_by(|h| h.gtu) {
            match headway.relation {
                Relation::Leader => traffic.leaders.push(headway),
                Relation::Follower => traffic.followers.push(headway),
                Relation::Parallel => traffic.parallel.push(headway),
            }
        }
        traffic.sort();
        traffic
    }

    /// Merges the traffic of another lane into this one.
    pub fn merge(&mut self, other: LaneTraffic) {
        let own = std::mem::take(self);
        *self = Self::from_headways(own.into_headways().chain(other.into_headways()));
    }

    /// The nearest leader.
    pub fn leader(&self) -> Option<&Headway> {
        self.leaders.first()
    }

    /// The nearest follower.
    pub fn follower(&self) -> Option<&Headway> {
        self.followers.first()
    }

    pub fn is_empty(&self) -> bool {
        self.leaders.is_empty() && self.followers.is_empty() && self.parallel.is_empty()
    }

    fn into_headways(self) -> impl Iterator<Item = Headway> {
        self.leaders
            .into_iter()
            .chain(self.followers)
            .chain(self.parallel)
    }

    fn sort(&mut self) {
        self.leaders.sort_by(|a, b| a.distance.si().total_cmp(&b.distance.si()));
        self.followers.sort_by(|a, b| b.distance.si().total_cmp(&a.distance.si()));
        self.parallel.sort_by_key(|h| h.gtu);
    }
}

/// Everything a category may look at when it is updated.
pub struct PerceptionContext<'a> {
    pub now: Time,
    /// The perceiving GTU.
    pub ego: &'a Gtu,
    /// The state of the perceiving GTU now, already moved onto the lane its
    /// reference position is on.
    pub state: Kinematics,
    pub gtus: &'a GtuSet,
    pub nav: Navigator<'a>,
    /// The side GTUs keep to by default.
    pub preferred_side: LateralDirection,
    /// How far ahead in time route incentives look.
    pub horizon: Duration,
}

/// A borrowed view of the values of a category.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CategoryView<'a> {
    Ego(&'a EgoView),
    Neighbors(&'a NeighborsView),
    Infrastructure(&'a InfrastructureView),
}

/// A source of perceived information, updated once per planning cycle.
pub trait PerceptionCategory {
    /// The capability this category provides.
    fn capability(&self) -> Capability;

    /// Recomputes the values of the category.
    fn update(&mut self, ctx: &PerceptionContext) -> SimResult<()>;

    /// The values computed by the last update, or `None` before the first.
    fn view(&self) -> Option<CategoryView<'_>>;

    /// Forgets the values of the last update.
    fn clear(&mut self);
}

/// The perception of one GTU: a registry of categories keyed by capability.
#[derive(Default)]
pub struct LanePerception {
    categories: BTreeMap<Capability, Box<dyn PerceptionCategory>>,
    cycle: u64,
}

impl LanePerception {
    /// Creates a perception without any categories.
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a perception providing every capability, with the given
    /// implementation of the neighbours capability.
    pub fn standard(sensing: NeighborSensing) -> Self {
        let mut perception = Self::new();
        perception.register(Box::new(EgoPerception::default()));
        match sensing {
            NeighborSensing::Direct => perception.register(Box::new(DirectNeighbors::default())),
            NeighborSensing::Sensor => perception.register(Box::new(SensorNeighbors::default())),
        }
        perception.register(Box::new(InfrastructurePerception::default()));
        perception
    }

    /// Registers a category, replacing any other providing the same capability.
    pub fn register(&mut self, category: Box<dyn PerceptionCategory>) {
        self.categories.insert(category.capability(), category);
    }

    /// Whether a category provides the capability.
    pub fn provides(&self, capability: Capability) -> bool {
        self.categories.contains_key(&capability)
    }

    /// Updates every category for a new planning cycle. If any category
    /// fails, no category holds values afterwards.
    pub fn perceive(&mut self, ctx: &PerceptionContext) -> SimResult<()> {
        self.cycle += 1;
        let result = self
            .categories
            .values_mut()
            .try_for_each(|category| category.update(ctx));
        if result.is_err() {
            self.categories.values_mut().for_each(|category| category.clear());
        }
        result
    }

    /// The number of the current planning cycle.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Gets the values of the category providing `capability`.
    pub fn get(&self, capability: Capability) -> SimResult<CategoryView<'_>> {
        let category = self
            .categories
            .get(&capability)
            .ok_or(SimError::PerceptionUnavailable {
                capability,
                reason: "not registered",
            })?;
        category.view().ok_or(SimError::PerceptionUnavailable {
            capability,
            reason: "not perceived yet",
        })
    }

    pub fn ego(&self) -> SimResult<&EgoView> {
        match self.get(Capability::Ego)? {
            CategoryView::Ego(view) => Ok(view),
            _ => Err(mismatch(Capability::Ego)),
        }
    }

    pub fn neighbors(&self) -> SimResult<&NeighborsView> {
        match self.get(Capability::Neighbors)? {
            CategoryView::Neighbors(view) => Ok(view),
            _ => Err(mismatch(Capability::Neighbors)),
        }
    }

    pub fn infrastructure(&self) -> SimResult<&InfrastructureView> {
        match self.get(Capability::Infrastructure)? {
            CategoryView::Infrastructure(view) => Ok(view),
            _ => Err(mismatch(Capability::Infrastructure)),
        }
    }
}

fn mismatch(capability: Capability) -> SimError {
    SimError::PerceptionUnavailable {
        capability,
        reason: "registered category provides another view",
    }
}
