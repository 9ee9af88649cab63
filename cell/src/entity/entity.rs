use glam::Vec3;
use thiserror::Error;

use specter_shared::{
    Direction, EntityId, EntityTypeId, EventHistory, Generation, PositionSeq, PropertySlot,
    PropertyValue,
};

use crate::entity::controllers::ControllerSet;
use crate::entity::ghost::GhostAuthority;
use crate::entity::real::RealAuthority;
use crate::range::TriggerId;
use crate::space::ChunkId;

/// Errors that can occur on entity lifecycle operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    /// A programming-contract violation: attaching an authority over an
    /// existing one, or detaching when none is attached. Aborts the
    /// offending operation only; other residents keep ticking.
    #[error("entity {entity} authority invariant violated: {detail}")]
    AuthorityInvariant {
        entity: EntityId,
        detail: &'static str,
    },
    /// Benign: destroying an entity twice is a no-op.
    #[error("entity {entity} was already destroyed")]
    AlreadyDestroyed { entity: EntityId },
    #[error("entity {entity} is not resident in this cell")]
    NotResident { entity: EntityId },
}

/// Exactly one of these is attached to a live entity at any time.
#[derive(Debug)]
pub enum Authority {
    Real(RealAuthority),
    Ghost(GhostAuthority),
}

/// Externally observable replication state of one entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicationState {
    Real,
    GhostStable,
    GhostAwaitingNewOwner,
    Destroyed,
}

/// The aggregate world object: identity, spatial placement, properties,
/// controllers, history, and its Real or Ghost authority.
pub struct Entity {
    pub id: EntityId,
    pub entity_type: EntityTypeId,
    pub global_position: Vec3,
    pub global_direction: Direction,
    /// Vehicle-relative when riding, equal to the global values otherwise.
    pub local_position: Vec3,
    pub local_direction: Direction,
    pub vehicle: Option<EntityId>,
    pub is_on_ground: bool,
    /// Number of times the real copy has been offloaded; tags the next
    /// handoff and orders inbound ghost messages.
    pub generation: Generation,
    /// Slot-indexed property values; real-only slots are `None` on ghosts.
    pub properties: Vec<Option<PropertyValue>>,
    pub controllers: ControllerSet,
    pub history: EventHistory,
    pub(crate) chunk: Option<ChunkId>,
    /// Owned triggers, kept sorted by ascending radius.
    pub(crate) triggers: Vec<(f32, TriggerId)>,
    /// Trim periods since a client last observed this entity.
    pub periods_without_witness: u32,
    pub position_seq: PositionSeq,
    /// Client-owned entities never release their id back to the allocator
    /// on destruction; the client's session owns it.
    pub client_owned: bool,
    authority: Option<Authority>,
    destroyed: bool,
}

impl Entity {
    pub(crate) fn new(
        id: EntityId,
        entity_type: EntityTypeId,
        position: Vec3,
        direction: Direction,
        property_slots: usize,
        controller_key_quarantine: u64,
    ) -> Self {
        Self {
            id,
            entity_type,
            global_position: position,
            global_direction: direction,
            local_position: position,
            local_direction: direction,
            vehicle: None,
            is_on_ground: false,
            generation: 0,
            properties: vec![None; property_slots],
            controllers: ControllerSet::new(controller_key_quarantine),
            history: EventHistory::new(),
            chunk: None,
            triggers: Vec::new(),
            periods_without_witness: 0,
            position_seq: 0,
            client_owned: false,
            authority: None,
            destroyed: false,
        }
    }

    pub fn attach_real(&mut self, real: RealAuthority) -> Result<(), EntityError> {
        if self.authority.is_some() {
            return Err(EntityError::AuthorityInvariant {
                entity: self.id,
                detail: "attach of real authority over an existing authority",
            });
        }
        self.authority = Some(Authority::Real(real));
        Ok(())
    }

    pub fn attach_ghost(&mut self, ghost: GhostAuthority) -> Result<(), EntityError> {
        if self.authority.is_some() {
            return Err(EntityError::AuthorityInvariant {
                entity: self.id,
                detail: "attach of ghost authority over an existing authority",
            });
        }
        self.authority = Some(Authority::Ghost(ghost));
        Ok(())
    }

    /// Detaches the current authority as the single atomic transition step
    /// of a conversion. The caller must attach the opposite authority before
    /// yielding control.
    pub(crate) fn detach_authority(&mut self) -> Result<Authority, EntityError> {
        self.authority.take().ok_or(EntityError::AuthorityInvariant {
            entity: self.id,
            detail: "detach with no authority attached",
        })
    }

    pub fn is_real(&self) -> bool {
        matches!(self.authority, Some(Authority::Real(_)))
    }

    pub fn is_ghost(&self) -> bool {
        matches!(self.authority, Some(Authority::Ghost(_)))
    }

    pub fn real(&self) -> Option<&RealAuthority> {
        match &self.authority {
            Some(Authority::Real(real)) => Some(real),
            _ => None,
        }
    }

    pub fn real_mut(&mut self) -> Option<&mut RealAuthority> {
        match &mut self.authority {
            Some(Authority::Real(real)) => Some(real),
            _ => None,
        }
    }

    pub fn ghost(&self) -> Option<&GhostAuthority> {
        match &self.authority {
            Some(Authority::Ghost(ghost)) => Some(ghost),
            _ => None,
        }
    }

    pub fn ghost_mut(&mut self) -> Option<&mut GhostAuthority> {
        match &mut self.authority {
            Some(Authority::Ghost(ghost)) => Some(ghost),
            _ => None,
        }
    }

    pub fn replication_state(&self) -> ReplicationState {
        if self.destroyed {
            return ReplicationState::Destroyed;
        }
        match &self.authority {
            Some(Authority::Real(_)) => ReplicationState::Real,
            Some(Authority::Ghost(ghost)) => {
                if ghost.pending_owner.is_some() {
                    ReplicationState::GhostAwaitingNewOwner
                } else {
                    ReplicationState::GhostStable
                }
            }
            // only observable mid-transition, which never yields control
            None => ReplicationState::Destroyed,
        }
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn property(&self, slot: PropertySlot) -> Option<&PropertyValue> {
        self.properties.get(slot as usize).and_then(Option::as_ref)
    }

    pub(crate) fn set_property_value(&mut self, slot: PropertySlot, value: PropertyValue) {
        if let Some(entry) = self.properties.get_mut(slot as usize) {
            *entry = Some(value);
        }
    }

    /// Inserts an owned trigger keeping the list sorted by radius.
    pub(crate) fn record_trigger(&mut self, radius: f32, trigger: TriggerId) {
        let index = self
            .triggers
            .partition_point(|(existing, _)| *existing <= radius);
        self.triggers.insert(index, (radius, trigger));
    }

    pub(crate) fn forget_trigger(&mut self, trigger: TriggerId) -> bool {
        let before = self.triggers.len();
        self.triggers.retain(|(_, existing)| *existing != trigger);
        self.triggers.len() != before
    }

    pub fn trigger_ids(&self) -> Vec<TriggerId> {
        self.triggers.iter().map(|(_, trigger)| *trigger).collect()
    }
}
