use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PropertySlot;

/// Upper bound on the encoded size of a single property payload. Writes above
/// this limit fail before the entity is touched.
pub const MAX_PROPERTY_BYTES: usize = 0xFFFF;

/// Errors that can occur while writing entity properties
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    #[error("unknown property slot {slot}")]
    UnknownSlot { slot: PropertySlot },
    #[error("property payload for slot {slot} is {size} bytes, over the {max} byte limit")]
    OversizedPayload {
        slot: PropertySlot,
        size: usize,
        max: usize,
    },
}

/// A typed property payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Int(i64),
    Float(f32),
    Vector(Vec3),
    Text(String),
    Blob(Vec<u8>),
}

impl PropertyValue {
    /// Approximate encoded size, used for the oversized-payload guard.
    pub fn wire_size(&self) -> usize {
        match self {
            Self::Int(_) => 8,
            Self::Float(_) => 4,
            Self::Vector(_) => 12,
            Self::Text(text) => text.len(),
            Self::Blob(bytes) => bytes.len(),
        }
    }
}

/// How a write to a property slot propagates outward. Determined entirely by
/// static schema metadata, never by the value written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropagationClass {
    /// Replicated to every ghost as a reliable per-slot update.
    Ghosted,
    /// Appended to the event history, visible only to the owning client.
    OwnClient,
    /// Appended to the event history, visible to other clients.
    OtherClients,
    /// Never leaves the authoritative copy.
    Internal,
}

/// Static description of one property slot
#[derive(Clone, Debug)]
pub struct PropertyDef {
    pub name: String,
    pub class: PropagationClass,
    /// When set, multiple writes within one tick coalesce into a single
    /// history event carrying the latest value.
    pub send_latest_only: bool,
}

impl PropertyDef {
    pub fn new(name: &str, class: PropagationClass) -> Self {
        Self {
            name: name.to_string(),
            class,
            send_latest_only: false,
        }
    }

    pub fn latest_only(mut self) -> Self {
        self.send_latest_only = true;
        self
    }
}

/// Per-entity-type property schema: slot index -> static metadata.
#[derive(Clone, Debug, Default)]
pub struct PropertySchema {
    defs: Vec<PropertyDef>,
}

impl PropertySchema {
    pub fn new(defs: Vec<PropertyDef>) -> Self {
        Self { defs }
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn def(&self, slot: PropertySlot) -> Result<&PropertyDef, PropertyError> {
        self.defs
            .get(slot as usize)
            .ok_or(PropertyError::UnknownSlot { slot })
    }

    pub fn is_ghosted(&self, slot: PropertySlot) -> bool {
        self.defs
            .get(slot as usize)
            .map(|def| def.class == PropagationClass::Ghosted)
            .unwrap_or(false)
    }

    /// Checks the oversized-payload guard for a prospective write.
    pub fn check_write(&self, slot: PropertySlot, value: &PropertyValue) -> Result<(), PropertyError> {
        self.def(slot)?;
        let size = value.wire_size();
        if size > MAX_PROPERTY_BYTES {
            return Err(PropertyError::OversizedPayload {
                slot,
                size,
                max: MAX_PROPERTY_BYTES,
            });
        }
        Ok(())
    }

    pub fn slots(&self) -> impl Iterator<Item = PropertySlot> + '_ {
        (0..self.defs.len()).map(|index| index as PropertySlot)
    }
}
