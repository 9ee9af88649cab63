mod controllers;
#[allow(clippy::module_inception)]
mod entity;
mod entity_type;
mod ghost;
mod real;

pub use controllers::{
    ControllerCategory, ControllerEntry, ControllerKind, ControllerSet, MoveToPoint, TickTimer,
    VisionCone, Visit,
};
pub use entity::{Authority, Entity, EntityError, ReplicationState};
pub use entity_type::{EntityTypeDef, EntityTypeError, EntityTypeRegistry};
pub use ghost::{Disposition, GhostAuthority};
pub use real::{RealAuthority, Witness};
