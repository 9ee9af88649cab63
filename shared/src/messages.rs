use std::net::SocketAddr;

use glam::Vec3;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::event_history::HistoryEvent;
use crate::properties::PropertyValue;
use crate::types::{
    CellAddr, ControllerId, Direction, EntityId, EntityTypeId, Generation, HistorySeq,
    PositionSeq, PropertySlot,
};

/// Errors that can occur while encoding or decoding wire messages
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] bincode::Error),
    /// A handoff payload arrived without one of its delimiting section
    /// tokens; the stream is considered corrupt as a whole.
    #[error("handoff payload is missing section '{token}'")]
    MissingSection { token: String },
}

pub const SECTION_PROPERTIES: &str = "properties";
pub const SECTION_CONTROLLERS: &str = "controllers";
pub const SECTION_BASE: &str = "base";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct HandoffSection {
    token: String,
    bytes: Vec<u8>,
}

/// Token-delimited payload of a handoff message. Each section is named so the
/// receiver can verify stream integrity before reconstructing anything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HandoffPayload {
    sections: Vec<HandoffSection>,
}

impl HandoffPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_section(&mut self, token: &str, bytes: Vec<u8>) {
        self.sections.push(HandoffSection {
            token: token.to_string(),
            bytes,
        });
    }

    pub fn section(&self, token: &str) -> Result<&[u8], MessageError> {
        self.sections
            .iter()
            .find(|section| section.token == token)
            .map(|section| section.bytes.as_slice())
            .ok_or_else(|| MessageError::MissingSection {
                token: token.to_string(),
            })
    }
}

/// The offload/onload handoff message: the full authoritative state of one
/// entity, tagged with the generation its receiver will own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandoffMessage {
    pub entity_type: EntityTypeId,
    pub entity: EntityId,
    pub generation: Generation,
    pub is_teleport: bool,
    /// Set when a failed teleport bounces the entity back to its source.
    pub teleport_failure: bool,
    pub payload: HandoffPayload,
}

/// Messages exchanged between cell processes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CellMessage {
    Handoff(HandoffMessage),
    CreateGhost {
        entity: EntityId,
        entity_type: EntityTypeId,
        generation: Generation,
        owner: CellAddr,
        local_position: Vec3,
        direction: Direction,
        vehicle: Option<EntityId>,
        /// Current head of the volatile position stream, so the fresh ghost
        /// does not mistake the next update for a stale one.
        position_seq: PositionSeq,
        properties: Vec<(PropertySlot, PropertyValue)>,
        controllers: Vec<u8>,
    },
    DeleteGhost {
        entity: EntityId,
        generation: Generation,
    },
    GhostPosition {
        entity: EntityId,
        generation: Generation,
        seq: PositionSeq,
        local_position: Vec3,
        is_on_ground: bool,
        direction: Direction,
    },
    GhostProperty {
        entity: EntityId,
        generation: Generation,
        slot: PropertySlot,
        value: PropertyValue,
    },
    GhostControllerCreate {
        entity: EntityId,
        generation: Generation,
        controller: ControllerId,
        entry: Vec<u8>,
    },
    GhostControllerUpdate {
        entity: EntityId,
        generation: Generation,
        controller: ControllerId,
        state: Vec<u8>,
    },
    GhostControllerDelete {
        entity: EntityId,
        generation: Generation,
        controller: ControllerId,
    },
    /// Sent by the offloading cell to every haunt: the entity is about to
    /// change owners; stop treating the sender as authoritative once the new
    /// owner announces itself.
    GhostSetNextReal {
        entity: EntityId,
        generation: Generation,
        next_owner: CellAddr,
    },
    /// Broadcast by the onloading cell once the real copy is reconstructed.
    GhostSetReal {
        entity: EntityId,
        generation: Generation,
        owner: CellAddr,
    },
    /// Real -> haunts: no client observes the real copy; report back if a
    /// local observer still sees the ghost.
    CheckWitnessed { entity: EntityId },
    /// Ghost -> real: a local observer saw this entity.
    Witnessed { entity: EntityId },
}

impl CellMessage {
    /// The entity this message addresses.
    pub fn entity(&self) -> EntityId {
        match self {
            Self::Handoff(handoff) => handoff.entity,
            Self::CreateGhost { entity, .. }
            | Self::DeleteGhost { entity, .. }
            | Self::GhostPosition { entity, .. }
            | Self::GhostProperty { entity, .. }
            | Self::GhostControllerCreate { entity, .. }
            | Self::GhostControllerUpdate { entity, .. }
            | Self::GhostControllerDelete { entity, .. }
            | Self::GhostSetNextReal { entity, .. }
            | Self::GhostSetReal { entity, .. }
            | Self::CheckWitnessed { entity }
            | Self::Witnessed { entity } => *entity,
        }
    }

    /// The sender's generation tag, for messages that are sequenced.
    pub fn generation(&self) -> Option<Generation> {
        match self {
            Self::Handoff(handoff) => Some(handoff.generation),
            Self::CreateGhost { generation, .. }
            | Self::DeleteGhost { generation, .. }
            | Self::GhostPosition { generation, .. }
            | Self::GhostProperty { generation, .. }
            | Self::GhostControllerCreate { generation, .. }
            | Self::GhostControllerUpdate { generation, .. }
            | Self::GhostControllerDelete { generation, .. }
            | Self::GhostSetNextReal { generation, .. }
            | Self::GhostSetReal { generation, .. } => Some(*generation),
            Self::CheckWitnessed { .. } | Self::Witnessed { .. } => None,
        }
    }

    /// Whether this message begins a new ownership lifespan (and therefore
    /// must carry `generation + 1` relative to the receiver) rather than
    /// belonging to the current one.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Handoff(_) | Self::GhostSetNextReal { .. } | Self::GhostSetReal { .. }
        )
    }
}

/// Messages sent from a cell to a client channel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// A physically impossible move was rejected; snap back to this state.
    PositionCorrection {
        entity: EntityId,
        position: Vec3,
        direction: Direction,
    },
    /// Catch-up replay of history events, oldest first.
    HistoryEvents {
        entity: EntityId,
        events: Vec<HistoryEvent>,
    },
    /// The requested replay range was trimmed; perform a full resync.
    Resync {
        entity: EntityId,
        next_seq: HistorySeq,
    },
}

/// Abstraction over the per-peer ordered message channels. Ordering is
/// guaranteed within one peer's channel only; messages from different peers
/// interleave arbitrarily.
pub trait NetworkSender {
    fn send_to_cell(&mut self, peer: CellAddr, message: CellMessage);
    fn send_to_client(&mut self, client: SocketAddr, message: ClientMessage);
}

pub fn encode(message: &CellMessage) -> Result<Vec<u8>, MessageError> {
    bincode::serialize(message).map_err(MessageError::Encode)
}

pub fn decode(bytes: &[u8]) -> Result<CellMessage, MessageError> {
    bincode::deserialize(bytes).map_err(MessageError::Decode)
}

/// Encodes one payload section or controller stream.
pub fn encode_section<T: Serialize>(value: &T) -> Result<Vec<u8>, MessageError> {
    bincode::serialize(value).map_err(MessageError::Encode)
}

/// Decodes one payload section or controller stream.
pub fn decode_section<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MessageError> {
    bincode::deserialize(bytes).map_err(MessageError::Decode)
}
