pub use config::{FaultPolicy, SimConfig};
pub use error::{SimError, SimResult};
pub use gtu::{Gtu, GtuAttributes, GtuSnapshot, GtuState, GtuType, NeighborSensing};
pub use network::{DetectorKind, LaneAttributes, LateralDirection, LinkAttributes, Network};
pub use route::Route;
pub use simulation::{RemovalReason, SimEvent, Simulation, SpawnRequest, Trigger};
use slotmap::{new_key_type, SlotMap};
pub use slotmap::{Key, KeyData};
pub use util::Interval;

pub mod config;
mod debug;
pub mod error;
pub mod gtu;
pub mod network;
pub mod parameters;
pub mod perception;
pub mod route;
pub mod scheduler;
mod simulation;
pub mod units;
mod util;

new_key_type! {
    /// Unique ID of a [network::Node].
    pub struct NodeId;
    /// Unique ID of a [network::Link].
    pub struct LinkId;
    /// Unique ID of a [network::Lane].
    pub struct LaneId;
    /// Unique ID of a [Gtu].
    pub struct GtuId;
    /// Unique ID of a [Route].
    pub struct RouteId;
    /// Unique ID of a [network::Detector].
    pub struct DetectorId;
}

/// The GTUs of a simulation.
pub type GtuSet = SlotMap<GtuId, Gtu>;
