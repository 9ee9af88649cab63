use thiserror::Error;

use specter_shared::{EntityTypeId, PropertySchema};

/// Errors that can occur while resolving entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EntityTypeError {
    #[error("entity type {type_id} is not registered")]
    UnknownType { type_id: EntityTypeId },
}

/// Static description of one entity type: its property schema and the
/// physics/replication knobs derived from it.
#[derive(Clone, Debug)]
pub struct EntityTypeDef {
    pub name: String,
    pub schema: PropertySchema,
    /// Upper bound on client-driven movement speed, units per second.
    pub top_speed: f32,
    /// Volatile positions are streamed, never appended to the event history.
    pub volatile_position: bool,
}

impl EntityTypeDef {
    pub fn new(name: &str, schema: PropertySchema) -> Self {
        Self {
            name: name.to_string(),
            schema,
            top_speed: 10.0,
            volatile_position: false,
        }
    }

    pub fn with_top_speed(mut self, top_speed: f32) -> Self {
        self.top_speed = top_speed;
        self
    }

    pub fn volatile(mut self) -> Self {
        self.volatile_position = true;
        self
    }
}

/// Registry of every entity type this cell can host.
#[derive(Clone, Debug, Default)]
pub struct EntityTypeRegistry {
    types: Vec<EntityTypeDef>,
}

impl EntityTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: EntityTypeDef) -> EntityTypeId {
        let id = EntityTypeId(self.types.len() as u16);
        self.types.push(def);
        id
    }

    pub fn def(&self, type_id: EntityTypeId) -> Result<&EntityTypeDef, EntityTypeError> {
        self.types
            .get(type_id.0 as usize)
            .ok_or(EntityTypeError::UnknownType { type_id })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
