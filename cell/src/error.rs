use thiserror::Error;

use specter_shared::{
    EntityId, Generation, HistoryError, IdAllocatorError, MessageError, PropertyError,
};

use crate::entity::{EntityError, EntityTypeError};
use crate::range::ProximityError;
use crate::space::SpatialError;

/// Errors that can occur during replication protocol operations
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("entity {entity} is not real on this cell")]
    NotReal { entity: EntityId },
    #[error("entity {entity} already has an authoritative copy on this cell")]
    AlreadyReal { entity: EntityId },
    #[error("handoff for entity {entity} is corrupt")]
    CorruptHandoff {
        entity: EntityId,
        #[source]
        source: MessageError,
    },
    #[error("handoff for entity {entity} carries generation {received}, expected {expected}")]
    UnexpectedGeneration {
        entity: EntityId,
        received: Generation,
        expected: Generation,
    },
    #[error("teleport destination for entity {entity} is outside the space")]
    InvalidTeleportTarget { entity: EntityId },
}

/// An error that occurred within a cell process
#[derive(Debug, Error)]
pub enum CellError {
    #[error(transparent)]
    Entity(#[from] EntityError),
    #[error(transparent)]
    EntityType(#[from] EntityTypeError),
    #[error(transparent)]
    Replication(#[from] ReplicationError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Property(#[from] PropertyError),
    #[error(transparent)]
    Spatial(#[from] SpatialError),
    #[error(transparent)]
    Proximity(#[from] ProximityError),
    #[error(transparent)]
    IdAllocator(#[from] IdAllocatorError),
    #[error(transparent)]
    History(#[from] HistoryError),
}
