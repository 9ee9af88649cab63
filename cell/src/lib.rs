//! # Specter Cell
//! A tick-driven cell process that hosts the authoritative ("real") copies
//! of world entities for one spatial partition and keeps ghost mirrors on
//! neighboring cells eventually consistent: position/property/behavior
//! replication, generation-sequenced authority handoff between cells,
//! zombie-ghost recovery after peer crashes, and a replay-able per-entity
//! event history toward clients.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub mod shared {
    pub use specter_shared::{
        decode, encode, CellAddr, CellMessage, ClientMessage, ControllerId, Direction, EntityId,
        EntityTypeId, EventHistory, GameTime, Generation, HandoffMessage, HandoffPayload,
        HistoryError, HistoryEvent, HistorySeq, IdAllocator, IdAllocatorError, MessageError,
        NetworkSender, PositionSeq, PropagationClass, PropertyDef, PropertyError, PropertySchema,
        PropertySlot, PropertyValue, RecyclingIdAllocator, Visibility,
    };
}

mod callbacks;
mod cell;
mod config;
mod entity;
mod error;
mod protocol;
mod range;
mod space;

pub use callbacks::{DeferredCallbacks, ScriptDispatcher, ScriptHook};
pub use cell::{CellProcess, PositionEventPayload, PropertyEventPayload};
pub use config::CellConfig;
pub use entity::{
    Authority, ControllerCategory, ControllerEntry, ControllerKind, ControllerSet, Disposition,
    Entity, EntityError, EntityTypeDef, EntityTypeError, EntityTypeRegistry, GhostAuthority,
    MoveToPoint, RealAuthority, ReplicationState, TickTimer, VisionCone, Visit, Witness,
};
pub use error::{CellError, ReplicationError};
pub use protocol::BufferedGhostMessages;
pub use range::{ProximityError, ProximityIndex, TriggerEvent, TriggerId};
pub use space::{
    physically_possible, settle_jitter_debt, Chunk, ChunkGraph, ChunkId, MoveVerdict, Plane,
    Portal, SpatialError, BOUNDARY_EPSILON,
};
