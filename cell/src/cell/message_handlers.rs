use glam::Vec3;
use log::{trace, warn};

use specter_shared::{
    decode, decode_section, sequence_greater_than, CellAddr, CellMessage, ControllerId, Direction,
    EntityId, Generation, NetworkSender, PositionSeq, PropertySlot, PropertyValue,
};

use crate::callbacks::{ScriptDispatcher, ScriptHook};
use crate::cell::CellProcess;
use crate::entity::{ControllerSet, Disposition, Entity, EntityError, GhostAuthority};
use crate::error::CellError;

impl CellProcess {
    /// Decodes and dispatches one message from a peer cell's channel.
    pub fn handle_message_bytes(
        &mut self,
        src: CellAddr,
        bytes: &[u8],
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        let message = decode(bytes)?;
        self.handle_cell_message(src, message, net, scripts)
    }

    /// Dispatches one inbound cell message, enforcing the per-entity
    /// generation rules: steady-state messages must carry the current
    /// generation, lifecycle messages the next one; later generations are
    /// buffered, earlier ones discarded.
    pub fn handle_cell_message(
        &mut self,
        src: CellAddr,
        message: CellMessage,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        match &message {
            CellMessage::CheckWitnessed { entity } => {
                return self.handle_check_witnessed(*entity);
            }
            CellMessage::Witnessed { entity } => {
                return self.handle_witnessed(*entity, net, scripts);
            }
            _ => {}
        }

        let id = message.entity();
        let Some(generation) = message.generation() else {
            return Ok(());
        };

        let Some(entity) = self.entities.get(&id) else {
            return self.handle_absent_entity_message(src, message, net, scripts);
        };

        if entity.is_real() {
            // e.g. a duplicate handoff, or traffic that lost a race with our
            // own onload: protocol error, recovered by discarding
            warn!(
                "discarding ghost-targeted message for real entity {} from {} (generation {})",
                id, src, generation
            );
            return Ok(());
        }

        match GhostAuthority::disposition(entity.generation, generation, message.is_lifecycle()) {
            Disposition::Apply => self.apply_ghost_message(src, message, net, scripts),
            Disposition::Buffer => {
                self.buffered.buffer(id, generation, src, message);
                Ok(())
            }
            Disposition::DiscardStale => {
                warn!(
                    "discarding stale message for entity {} from {} (generation {}, current {})",
                    id, src, generation, entity.generation
                );
                Ok(())
            }
        }
    }

    fn handle_absent_entity_message(
        &mut self,
        src: CellAddr,
        message: CellMessage,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        match message {
            CellMessage::Handoff(handoff) => self.onload(src, handoff, net, scripts),
            CellMessage::CreateGhost { .. } => self.apply_create_ghost(src, message, scripts),
            other => {
                trace!(
                    "discarding message for non-resident entity {} from {}",
                    other.entity(),
                    src
                );
                Ok(())
            }
        }
    }

    fn apply_ghost_message(
        &mut self,
        src: CellAddr,
        message: CellMessage,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        match message {
            CellMessage::Handoff(handoff) => self.onload(src, handoff, net, scripts),
            CellMessage::CreateGhost { entity, .. } => {
                warn!(
                    "discarding duplicate create-ghost for resident entity {} from {}",
                    entity, src
                );
                Ok(())
            }
            CellMessage::DeleteGhost { entity, .. } => {
                self.apply_delete_ghost(src, entity, net, scripts)
            }
            CellMessage::GhostPosition {
                entity,
                seq,
                local_position,
                is_on_ground,
                direction,
                ..
            } => self.apply_ghost_position(
                src,
                entity,
                seq,
                local_position,
                is_on_ground,
                direction,
                scripts,
            ),
            CellMessage::GhostProperty {
                entity, slot, value, ..
            } => self.apply_ghost_property(src, entity, slot, value),
            CellMessage::GhostControllerCreate {
                entity,
                controller,
                entry,
                ..
            } => self.apply_ghost_controller_create(src, entity, controller, &entry),
            CellMessage::GhostControllerUpdate {
                entity,
                controller,
                state,
                ..
            } => self.apply_ghost_controller_update(src, entity, controller, &state),
            CellMessage::GhostControllerDelete {
                entity, controller, ..
            } => self.apply_ghost_controller_delete(src, entity, controller),
            CellMessage::GhostSetNextReal {
                entity,
                generation,
                next_owner,
            } => self.apply_set_next_real(src, entity, generation, next_owner),
            CellMessage::GhostSetReal {
                entity,
                generation,
                owner,
            } => self.apply_set_real(src, entity, generation, owner, net, scripts),
            CellMessage::CheckWitnessed { .. } | CellMessage::Witnessed { .. } => Ok(()),
        }
    }

    fn expect_ghost_from(&self, id: EntityId, src: CellAddr) -> Option<&Entity> {
        let entity = self.entities.get(&id)?;
        let ghost = entity.ghost()?;
        if ghost.authoritative_addr() != src {
            warn!(
                "discarding ghost message for entity {} from {}, expected owner {}",
                id,
                src,
                ghost.authoritative_addr()
            );
            return None;
        }
        Some(entity)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_ghost_position(
        &mut self,
        src: CellAddr,
        id: EntityId,
        seq: PositionSeq,
        local_position: Vec3,
        is_on_ground: bool,
        direction: Direction,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        if self.expect_ghost_from(id, src).is_none() {
            return Ok(());
        }
        let vehicle = self.entities.get(&id).and_then(|entity| entity.vehicle);
        let vehicle_position =
            vehicle.and_then(|vehicle| self.entities.get(&vehicle).map(|v| v.global_position));

        let (global, chunk_hint) = {
            let entity = self
                .entities
                .get_mut(&id)
                .ok_or(EntityError::NotResident { entity: id })?;
            // stale volatile updates are dropped on the wrapping stream,
            // never applied out of order
            if !sequence_greater_than(seq, entity.position_seq) {
                trace!("dropping stale position update for ghost {}", id);
                return Ok(());
            }
            entity.position_seq = seq;
            entity.local_position = local_position;
            entity.local_direction = direction;
            entity.is_on_ground = is_on_ground;
            let global = match vehicle_position {
                Some(vehicle_position) => vehicle_position + local_position,
                None => local_position,
            };
            entity.global_position = global;
            entity.global_direction = direction;
            (global, entity.chunk)
        };

        let events = self.proximity.move_entity(id, global.x, global.z)?;
        self.dispatch_trigger_hooks(scripts, &events);

        match self.spatial.find_chunk_containing(global, chunk_hint) {
            Ok(chunk) => {
                if let Some(entity) = self.entities.get_mut(&id) {
                    entity.chunk = Some(chunk);
                }
            }
            Err(err) => {
                log::error!("ghost {} lost chunk containment: {}", id, err);
            }
        }
        Ok(())
    }

    fn apply_ghost_property(
        &mut self,
        src: CellAddr,
        id: EntityId,
        slot: PropertySlot,
        value: PropertyValue,
    ) -> Result<(), CellError> {
        if self.expect_ghost_from(id, src).is_none() {
            return Ok(());
        }
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(EntityError::NotResident { entity: id })?;
        if (slot as usize) >= entity.properties.len() {
            warn!(
                "discarding ghost property update for entity {}: unknown slot {}",
                id, slot
            );
            return Ok(());
        }
        entity.set_property_value(slot, value);
        Ok(())
    }

    fn apply_ghost_controller_create(
        &mut self,
        src: CellAddr,
        id: EntityId,
        controller: ControllerId,
        entry: &[u8],
    ) -> Result<(), CellError> {
        if self.expect_ghost_from(id, src).is_none() {
            return Ok(());
        }
        let entry: crate::entity::ControllerEntry = decode_section(entry)?;
        if entry.id != controller {
            warn!(
                "ghost controller create for entity {} names controller {} but carries {}",
                id, controller, entry.id
            );
            return Ok(());
        }
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(EntityError::NotResident { entity: id })?;
        entity.controllers.install(entry);
        Ok(())
    }

    fn apply_ghost_controller_update(
        &mut self,
        src: CellAddr,
        id: EntityId,
        controller: ControllerId,
        state: &[u8],
    ) -> Result<(), CellError> {
        if self.expect_ghost_from(id, src).is_none() {
            return Ok(());
        }
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(EntityError::NotResident { entity: id })?;
        let Some(entry) = entity.controllers.get_mut(controller) else {
            warn!(
                "ghost controller update for entity {} names unknown controller {}",
                id, controller
            );
            return Ok(());
        };
        entry.kind.read_ghost_state(state)?;
        Ok(())
    }

    fn apply_ghost_controller_delete(
        &mut self,
        src: CellAddr,
        id: EntityId,
        controller: ControllerId,
    ) -> Result<(), CellError> {
        if self.expect_ghost_from(id, src).is_none() {
            return Ok(());
        }
        let now = self.now;
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.controllers.remove(controller, now);
        }
        Ok(())
    }

    fn apply_set_next_real(
        &mut self,
        src: CellAddr,
        id: EntityId,
        generation: Generation,
        next_owner: CellAddr,
    ) -> Result<(), CellError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(EntityError::NotResident { entity: id })?;
        let Some(ghost) = entity.ghost_mut() else {
            return Ok(());
        };
        if ghost.owner != src {
            warn!(
                "set-next-real for entity {} from {}, expected current owner {}; discarding",
                id, src, ghost.owner
            );
            return Ok(());
        }
        ghost.pending_owner = Some(next_owner);
        trace!(
            "ghost {}: next owner {} announced (generation {})",
            id,
            next_owner,
            generation
        );
        Ok(())
    }

    fn apply_set_real(
        &mut self,
        src: CellAddr,
        id: EntityId,
        generation: Generation,
        owner: CellAddr,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        {
            let entity = self
                .entities
                .get_mut(&id)
                .ok_or(EntityError::NotResident { entity: id })?;
            let Some(ghost) = entity.ghost_mut() else {
                return Ok(());
            };
            if src != owner {
                warn!(
                    "set-real for entity {} sent by {} but names {}; discarding",
                    id, src, owner
                );
                return Ok(());
            }
            if let Some(pending) = ghost.pending_owner {
                if pending != owner {
                    // the announced owner failed and authority went
                    // elsewhere (e.g. a bounced teleport); the generation
                    // check already proved this claim is the next lifespan
                    warn!(
                        "set-real for entity {} names {}, but {} was announced; accepting",
                        id, owner, pending
                    );
                }
            }
            ghost.owner = owner;
            ghost.pending_owner = None;
            entity.generation = generation;
            trace!(
                "ghost {}: real confirmed at {} (generation {})",
                id,
                owner,
                generation
            );
        }
        self.replay_buffered(id, net, scripts);
        Ok(())
    }

    fn apply_delete_ghost(
        &mut self,
        src: CellAddr,
        id: EntityId,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        if self.expect_ghost_from(id, src).is_none() {
            return Ok(());
        }
        self.destroy_entity(id, net, scripts)
    }

    fn apply_create_ghost(
        &mut self,
        src: CellAddr,
        message: CellMessage,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        let CellMessage::CreateGhost {
            entity: id,
            entity_type,
            generation,
            owner,
            local_position,
            direction,
            vehicle,
            position_seq,
            properties,
            controllers,
        } = message
        else {
            return Ok(());
        };
        if src != owner {
            warn!(
                "create-ghost for entity {} sent by {} but names owner {}; discarding",
                id, src, owner
            );
            return Ok(());
        }
        let schema_len = self.types.def(entity_type)?.schema.len();
        let controller_entries = ControllerSet::read_ghost_stream(&controllers)?;

        let vehicle_position =
            vehicle.and_then(|vehicle| self.entities.get(&vehicle).map(|v| v.global_position));
        let global = match vehicle_position {
            Some(vehicle_position) => vehicle_position + local_position,
            None => local_position,
        };

        self.callbacks.begin_structural();
        let mut entity = Entity::new(
            id,
            entity_type,
            global,
            direction,
            schema_len,
            self.config.id_quarantine_ticks,
        );
        entity.generation = generation;
        entity.vehicle = vehicle;
        entity.local_position = local_position;
        entity.local_direction = direction;
        entity.position_seq = position_seq;
        for (slot, value) in properties {
            entity.set_property_value(slot, value);
        }
        for entry in controller_entries {
            entity.controllers.install(entry);
        }
        entity.chunk = self.spatial.find_chunk_containing(global, None).ok();
        let attach = entity.attach_ghost(GhostAuthority::new(owner));
        let add = self.proximity.add_entity(id, global.x, global.z);
        if let Some(vehicle) = vehicle {
            if self.entities.contains_key(&vehicle) {
                self.passengers.entry(vehicle).or_default().push(id);
            }
        }
        self.entities.insert(id, entity);
        self.callbacks.queue(id, ScriptHook::GhostCreated);
        self.callbacks.end_structural(scripts);
        attach?;
        add?;
        trace!("created ghost for entity {} owned by {}", id, owner);
        Ok(())
    }

    fn handle_check_witnessed(&mut self, id: EntityId) -> Result<(), CellError> {
        let probe = self.config.witness_probe_periods;
        let Some(entity) = self.entities.get_mut(&id) else {
            return Ok(());
        };
        if entity.is_ghost() {
            // prime the counter; the next local observation reports back
            entity.periods_without_witness = probe;
        }
        Ok(())
    }

    fn handle_witnessed(
        &mut self,
        id: EntityId,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        let forward = {
            let Some(entity) = self.entities.get(&id) else {
                return Ok(());
            };
            entity.ghost().map(|ghost| ghost.authoritative_addr())
        };
        match forward {
            // a ghost relays the observation toward the real copy
            Some(owner) => net.send_to_cell(owner, CellMessage::Witnessed { entity: id }),
            None => self.note_witnessed(id, scripts),
        }
        Ok(())
    }
}
