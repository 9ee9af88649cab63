use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Process-wide tick counter. Every cell advances this once per simulation
/// step; all retention and scheduling arithmetic is done in ticks.
pub type GameTime = u64;

/// Index of a property slot within an entity type's schema.
pub type PropertySlot = u16;

/// Monotonic per-entity event-history sequence number. Never wraps and never
/// repeats for the lifetime of an entity, across any number of handoffs.
pub type HistorySeq = u32;

/// Wrapping sequence number for the volatile position stream.
pub type PositionSeq = u16;

/// Number of times an entity's real copy has been offloaded. Distinguishes
/// successive owners of an entity so that stale messages can be rejected or
/// buffered.
pub type Generation = u32;

/// Process-wide-unique identifier of a world entity.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network address of a cell process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellAddr(pub SocketAddr);

impl fmt::Display for CellAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an entity type's static descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityTypeId(pub u16);

impl fmt::Display for EntityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a controller within one entity's controller set. Only
/// locally unique; a new id is issued on every attach.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControllerId(pub u16);

impl From<u16> for ControllerId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<ControllerId> for u16 {
    fn from(value: ControllerId) -> Self {
        value.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Facing of an entity, in radians.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl Direction {
    pub fn with_yaw(yaw: f32) -> Self {
        Self {
            yaw,
            pitch: 0.0,
            roll: 0.0,
        }
    }
}
