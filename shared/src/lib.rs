//! # Specter Shared
//! Common types, wire messages & data structures shared between the cell
//! processes of a space-partitioned world.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod event_history;
mod id_allocator;
mod key_generator;
mod messages;
mod properties;
mod types;
mod wrapping_number;

pub use event_history::{EventHistory, HistoryError, HistoryEvent, Visibility};
pub use id_allocator::{IdAllocator, IdAllocatorError, RecyclingIdAllocator};
pub use key_generator::KeyGenerator;
pub use messages::{
    decode, decode_section, encode, encode_section, CellMessage, ClientMessage, HandoffMessage,
    HandoffPayload, MessageError, NetworkSender, SECTION_BASE, SECTION_CONTROLLERS,
    SECTION_PROPERTIES,
};
pub use properties::{
    PropagationClass, PropertyDef, PropertyError, PropertySchema, PropertyValue,
    MAX_PROPERTY_BYTES,
};
pub use types::{
    CellAddr, ControllerId, Direction, EntityId, EntityTypeId, GameTime, Generation, HistorySeq,
    PositionSeq, PropertySlot,
};
pub use wrapping_number::{sequence_greater_than, sequence_less_than, wrapping_diff};
