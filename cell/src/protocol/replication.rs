use glam::Vec3;
use log::{error, info, trace, warn};
use serde::{Deserialize, Serialize};

use specter_shared::{
    decode_section, encode_section, CellAddr, CellMessage, Direction, EntityId, EventHistory,
    HandoffMessage, HandoffPayload, NetworkSender, PositionSeq, PropertySlot, PropertyValue,
    SECTION_BASE, SECTION_CONTROLLERS, SECTION_PROPERTIES,
};

use crate::callbacks::{ScriptDispatcher, ScriptHook};
use crate::cell::CellProcess;
use crate::entity::{
    ControllerEntry, ControllerSet, Entity, EntityError, GhostAuthority, RealAuthority,
};
use crate::error::{CellError, ReplicationError};

/// Base-entity section of the handoff payload: everything the new owner
/// needs beyond properties and controllers, including the retained event
/// history so sequence numbers stay gap-free across the transfer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct HandoffBaseData {
    pub position: Vec3,
    pub direction: Direction,
    pub local_position: Vec3,
    pub local_direction: Direction,
    pub vehicle: Option<EntityId>,
    pub is_on_ground: bool,
    /// Every cell holding a ghost, the offloading cell included.
    pub haunts: Vec<CellAddr>,
    pub periods_without_witness: u32,
    pub had_witness: bool,
    pub jitter_debt_seconds: f32,
    pub client_owned: bool,
    pub position_seq: PositionSeq,
    pub history: EventHistory,
    /// Pre-teleport position, for restoring the entity if the teleport
    /// bounces back.
    pub prior_position: Option<Vec3>,
}

impl CellProcess {
    /// Transfers authority over an entity to another cell. From the instant
    /// this returns, this cell holds only a ghost: the source becomes
    /// non-authoritative before the destination can process anything, so no
    /// two cells ever believe they are real for the entity.
    pub fn offload(
        &mut self,
        id: EntityId,
        destination: CellAddr,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        self.offload_inner(id, destination, false, None, net, scripts)
    }

    /// Teleports an entity: moves it to the target position, then offloads
    /// it to the destination cell, remembering the prior position so a
    /// failed teleport can bounce back.
    pub fn teleport(
        &mut self,
        id: EntityId,
        destination: CellAddr,
        target_position: Vec3,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        let (prior_position, direction, is_on_ground) = {
            let entity = self
                .entities
                .get(&id)
                .ok_or(EntityError::NotResident { entity: id })?;
            if !entity.is_real() {
                return Err(ReplicationError::NotReal { entity: id }.into());
            }
            (
                entity.global_position,
                entity.global_direction,
                entity.is_on_ground,
            )
        };
        // a teleport dismounts the entity; the vehicle stays behind
        self.set_vehicle(id, None)?;
        self.update_position(id, target_position, direction, is_on_ground, net, scripts)?;
        self.offload_inner(id, destination, true, Some(prior_position), net, scripts)
    }

    fn offload_inner(
        &mut self,
        id: EntityId,
        destination: CellAddr,
        is_teleport: bool,
        prior_position: Option<Vec3>,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        let Some(mut entity) = self.entities.remove(&id) else {
            return Err(EntityError::NotResident { entity: id }.into());
        };
        if !entity.is_real() {
            self.entities.insert(id, entity);
            return Err(ReplicationError::NotReal { entity: id }.into());
        }

        self.callbacks.begin_structural();
        self.callbacks.queue(id, ScriptHook::LeavingCell);
        self.flush_coalesced_for(&mut entity);

        let result =
            self.offload_convert(&mut entity, destination, is_teleport, prior_position, net);
        if result.is_ok() {
            self.callbacks.queue(id, ScriptHook::LeftCell);
        }
        self.entities.insert(id, entity);
        self.callbacks.end_structural(scripts);
        result
    }

    fn offload_convert(
        &mut self,
        entity: &mut Entity,
        destination: CellAddr,
        is_teleport: bool,
        prior_position: Option<Vec3>,
        net: &mut dyn NetworkSender,
    ) -> Result<(), CellError> {
        let id = entity.id;
        let new_generation = entity.generation + 1;

        // serialize the full authoritative state before touching anything,
        // so a failure leaves the entity real and untouched
        let (payload, haunts) = {
            let real = entity
                .real()
                .ok_or(ReplicationError::NotReal { entity: id })?;
            let mut haunts = real.haunts().to_vec();
            if !haunts.contains(&self.addr) {
                // we keep a ghost ourselves, so the destination must treat
                // us as a haunt
                haunts.push(self.addr);
            }

            let properties: Vec<(PropertySlot, PropertyValue)> = entity
                .properties
                .iter()
                .enumerate()
                .filter_map(|(slot, value)| {
                    value.clone().map(|value| (slot as PropertySlot, value))
                })
                .collect();
            let base = HandoffBaseData {
                position: entity.global_position,
                direction: entity.global_direction,
                local_position: entity.local_position,
                local_direction: entity.local_direction,
                vehicle: entity.vehicle,
                is_on_ground: entity.is_on_ground,
                haunts: haunts.clone(),
                periods_without_witness: entity.periods_without_witness,
                had_witness: real.witness.is_some(),
                jitter_debt_seconds: real.jitter_debt_seconds,
                client_owned: entity.client_owned,
                position_seq: entity.position_seq,
                history: entity.history.clone(),
                prior_position,
            };

            let mut payload = HandoffPayload::new();
            payload.push_section(SECTION_PROPERTIES, encode_section(&properties)?);
            payload.push_section(SECTION_CONTROLLERS, entity.controllers.write_real_stream()?);
            payload.push_section(SECTION_BASE, encode_section(&base)?);
            (payload, haunts)
        };

        let schema = &self.types.def(entity.entity_type)?.schema;

        // the single atomic transition step: real goes away, ghost arrives
        let _real = entity.detach_authority()?;
        entity.controllers.drop_real_only(self.now);
        for entry in entity.controllers.iter_mut() {
            entry.kind.stop_real();
        }
        for slot in 0..entity.properties.len() {
            if !schema.is_ghosted(slot as PropertySlot) {
                entity.properties[slot] = None;
            }
        }
        let mut ghost = GhostAuthority::new(destination);
        ghost.pending_owner = Some(destination);
        entity.attach_ghost(ghost)?;

        for haunt in &haunts {
            if *haunt != destination && *haunt != self.addr {
                net.send_to_cell(
                    *haunt,
                    CellMessage::GhostSetNextReal {
                        entity: id,
                        generation: new_generation,
                        next_owner: destination,
                    },
                );
            }
        }
        net.send_to_cell(
            destination,
            CellMessage::Handoff(HandoffMessage {
                entity_type: entity.entity_type,
                entity: id,
                generation: new_generation,
                is_teleport,
                teleport_failure: false,
                payload,
            }),
        );
        info!(
            "offloaded entity {} to {} (generation {})",
            id, destination, new_generation
        );
        Ok(())
    }

    /// Reconstructs authoritative state from a handoff message. An invalid
    /// teleport target bounces the entity back to the source instead of
    /// silently dropping authority.
    pub(crate) fn onload(
        &mut self,
        src: CellAddr,
        message: HandoffMessage,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        let id = message.entity;

        // integrity-checked decode of every section before any mutation
        let decoded = Self::decode_handoff(&message);
        let (properties, controller_entries, base) = match decoded {
            Ok(decoded) => decoded,
            Err(source) => {
                error!("handoff for entity {} from {} is corrupt: {}", id, src, source);
                return Err(ReplicationError::CorruptHandoff { entity: id, source }.into());
            }
        };

        let spawn_position = if message.teleport_failure {
            base.prior_position.unwrap_or(base.position)
        } else {
            base.position
        };
        let chunk = match self.spatial.find_chunk_containing(spawn_position, None) {
            Ok(chunk) => chunk,
            Err(_) if message.is_teleport && !message.teleport_failure => {
                warn!(
                    "teleport of entity {} landed outside the space; bouncing back to {}",
                    id, src
                );
                // the offload stream is reflected back unchanged: this cell
                // never owned the lifespan, so the generation is not bumped
                net.send_to_cell(
                    src,
                    CellMessage::Handoff(HandoffMessage {
                        entity_type: message.entity_type,
                        entity: id,
                        generation: message.generation,
                        is_teleport: true,
                        teleport_failure: true,
                        payload: message.payload,
                    }),
                );
                return Ok(());
            }
            Err(err) => {
                error!(
                    "onload of entity {} from {} failed: no chunk contains its position",
                    id, src
                );
                return Err(err.into());
            }
        };

        self.callbacks.begin_structural();
        let result = self.onload_apply(
            src,
            &message,
            properties,
            controller_entries,
            base,
            spawn_position,
            chunk,
            net,
        );
        self.callbacks.end_structural(scripts);
        result?;
        self.replay_buffered(id, net, scripts);
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn decode_handoff(
        message: &HandoffMessage,
    ) -> Result<
        (
            Vec<(PropertySlot, PropertyValue)>,
            Vec<ControllerEntry>,
            HandoffBaseData,
        ),
        specter_shared::MessageError,
    > {
        let properties = decode_section(message.payload.section(SECTION_PROPERTIES)?)?;
        let controllers =
            ControllerSet::read_real_stream(message.payload.section(SECTION_CONTROLLERS)?)?;
        let base = decode_section(message.payload.section(SECTION_BASE)?)?;
        Ok((properties, controllers, base))
    }

    #[allow(clippy::too_many_arguments)]
    fn onload_apply(
        &mut self,
        src: CellAddr,
        message: &HandoffMessage,
        properties: Vec<(PropertySlot, PropertyValue)>,
        controller_entries: Vec<ControllerEntry>,
        base: HandoffBaseData,
        position: Vec3,
        chunk: crate::space::ChunkId,
        net: &mut dyn NetworkSender,
    ) -> Result<(), CellError> {
        let id = message.entity;
        let schema_len = self.types.def(message.entity_type)?.schema.len();

        let mut entity = match self.entities.remove(&id) {
            Some(mut existing) => {
                if existing.is_real() {
                    self.entities.insert(id, existing);
                    return Err(ReplicationError::AlreadyReal { entity: id }.into());
                }
                let expected = existing.generation + 1;
                if message.generation != expected {
                    let received = message.generation;
                    self.entities.insert(id, existing);
                    return Err(ReplicationError::UnexpectedGeneration {
                        entity: id,
                        received,
                        expected,
                    }
                    .into());
                }
                let _ghost = existing.detach_authority()?;
                existing
            }
            None => {
                let entity = Entity::new(
                    id,
                    message.entity_type,
                    position,
                    base.direction,
                    schema_len,
                    self.config.id_quarantine_ticks,
                );
                self.proximity.add_entity(id, position.x, position.z)?;
                entity
            }
        };

        entity.generation = message.generation;
        entity.global_position = position;
        entity.global_direction = base.direction;
        entity.local_direction = base.local_direction;
        entity.vehicle = base.vehicle;
        entity.local_position = if message.teleport_failure {
            position
        } else {
            base.local_position
        };
        entity.is_on_ground = base.is_on_ground;
        entity.position_seq = base.position_seq;
        entity.client_owned = base.client_owned;
        entity.periods_without_witness = base.periods_without_witness;
        entity.history = base.history;

        entity.properties = vec![None; schema_len];
        for (slot, value) in properties {
            entity.set_property_value(slot, value);
        }

        // controllers restart from their streamed parameters: their effects
        // are not assumed persistent across handoffs
        entity.controllers = ControllerSet::new(self.config.id_quarantine_ticks);
        for mut entry in controller_entries {
            entry.kind.start_real(self.now);
            entity.controllers.install(entry);
        }

        let mut real = RealAuthority::new(self.now_seconds);
        real.jitter_debt_seconds = base.jitter_debt_seconds;
        let haunts: Vec<CellAddr> = base
            .haunts
            .iter()
            .copied()
            .filter(|haunt| *haunt != self.addr)
            .collect();
        real.set_haunts(haunts.clone());
        entity.attach_real(real)?;

        let events = self.proximity.move_entity(id, position.x, position.z)?;
        self.queue_trigger_hooks(&events);
        entity.chunk = Some(chunk);

        for haunt in &haunts {
            net.send_to_cell(
                *haunt,
                CellMessage::GhostSetReal {
                    entity: id,
                    generation: message.generation,
                    owner: self.addr,
                },
            );
        }

        self.callbacks.queue(id, ScriptHook::EnteringCell);
        self.callbacks.queue(id, ScriptHook::EnteredCell);
        if message.teleport_failure {
            self.callbacks.queue(id, ScriptHook::TeleportFailure);
        } else if message.is_teleport {
            let nearby = self
                .proximity
                .query_range(position.x, position.z, self.config.teleport_nearby_radius)
                .into_iter()
                .find(|other| *other != id);
            self.callbacks.queue(id, ScriptHook::TeleportSuccess { nearby });
        }

        if let Some(vehicle) = entity.vehicle {
            if self.entities.contains_key(&vehicle) {
                let riders = self.passengers.entry(vehicle).or_default();
                if !riders.contains(&id) {
                    riders.push(id);
                }
            }
        }

        self.entities.insert(id, entity);
        // older lifespans can never apply once this generation is real
        self.buffered.discard_stale(id, message.generation);
        info!(
            "onloaded entity {} from {} (generation {})",
            id, src, message.generation
        );
        Ok(())
    }

    /// Registers a ghost of a real entity on a neighboring cell and streams
    /// it the ghosted state.
    pub fn add_haunt(
        &mut self,
        id: EntityId,
        cell: CellAddr,
        net: &mut dyn NetworkSender,
    ) -> Result<(), CellError> {
        if cell == self.addr {
            return Ok(());
        }
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(EntityError::NotResident { entity: id })?;
        let generation = entity.generation;
        {
            let real = entity
                .real_mut()
                .ok_or(ReplicationError::NotReal { entity: id })?;
            if !real.add_haunt(cell) {
                return Ok(());
            }
        }

        let schema = &self.types.def(entity.entity_type)?.schema;
        let properties: Vec<(PropertySlot, PropertyValue)> = entity
            .properties
            .iter()
            .enumerate()
            .filter_map(|(slot, value)| {
                let slot = slot as PropertySlot;
                if schema.is_ghosted(slot) {
                    value.clone().map(|value| (slot, value))
                } else {
                    None
                }
            })
            .collect();
        let controllers = entity.controllers.write_ghost_stream()?;

        net.send_to_cell(
            cell,
            CellMessage::CreateGhost {
                entity: id,
                entity_type: entity.entity_type,
                generation,
                owner: self.addr,
                local_position: entity.local_position,
                direction: entity.global_direction,
                vehicle: entity.vehicle,
                position_seq: entity.position_seq,
                properties,
                controllers,
            },
        );
        info!("created ghost of entity {} on {}", id, cell);
        Ok(())
    }

    /// Withdraws a ghost from a neighboring cell. Returns whether the cell
    /// was a haunt.
    pub fn remove_haunt(
        &mut self,
        id: EntityId,
        cell: CellAddr,
        net: &mut dyn NetworkSender,
    ) -> Result<bool, CellError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(EntityError::NotResident { entity: id })?;
        let generation = entity.generation;
        let real = entity
            .real_mut()
            .ok_or(ReplicationError::NotReal { entity: id })?;
        if !real.remove_haunt(cell) {
            return Ok(false);
        }
        net.send_to_cell(cell, CellMessage::DeleteGhost { entity: id, generation });
        Ok(true)
    }

    /// Reacts to peer-liveness information: drops dead haunts from real
    /// entities, and for each ghost whose (pending) owner died either adopts
    /// a live successor that already announced itself in the buffer, or
    /// destroys the ghost as an unrecoverable zombie.
    pub fn note_peer_death(
        &mut self,
        dead: CellAddr,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) {
        if !self.dead_peers.insert(dead) {
            return;
        }
        info!("peer cell {} reported dead", dead);

        let ids: Vec<EntityId> = self.entities.keys().copied().collect();
        for id in ids {
            let (is_zombie, generation) = {
                let Some(entity) = self.entities.get_mut(&id) else {
                    continue;
                };
                if let Some(real) = entity.real_mut() {
                    if real.remove_haunt(dead) {
                        trace!("dropped dead haunt {} from entity {}", dead, id);
                    }
                    continue;
                }
                let Some(ghost) = entity.ghost() else {
                    continue;
                };
                (ghost.watch_addr() == dead, entity.generation)
            };
            if !is_zombie {
                continue;
            }

            let successor = self.buffered.successor_after(id, generation, |addr| {
                !self.dead_peers.contains(&addr)
            });
            match successor {
                Some((successor_generation, owner)) => {
                    info!(
                        "ghost {}: adopting announced successor {} at generation {}",
                        id, owner, successor_generation
                    );
                    if let Some(entity) = self.entities.get_mut(&id) {
                        // jump over the dead lifespans; the buffered
                        // announcement replays as the next one
                        entity.generation = successor_generation - 1;
                        if let Some(ghost) = entity.ghost_mut() {
                            ghost.pending_owner = None;
                        }
                    }
                    self.replay_buffered(id, net, scripts);
                }
                None => {
                    warn!(
                        "ghost {} is a zombie (owner {} dead, no live successor); destroying",
                        id, dead
                    );
                    let _ = self.destroy_entity(id, net, scripts);
                }
            }
        }
    }

    /// Drains buffered lifespans that have become applicable: the tail of
    /// the current lifespan, plus the next one once a lifecycle message for
    /// it is waiting.
    pub(crate) fn replay_buffered(
        &mut self,
        id: EntityId,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) {
        loop {
            if !self.entities.contains_key(&id) {
                self.buffered.discard_entity(id);
                return;
            }
            let generation = match self.entities.get(&id) {
                Some(entity) => entity.generation,
                None => return,
            };

            let mut progressed = false;
            for (src, message) in self.buffered.take_lifespan(id, generation) {
                progressed = true;
                if let Err(err) = self.handle_cell_message(src, message, net, scripts) {
                    warn!("replay of buffered message for entity {} failed: {}", id, err);
                }
            }
            if self.buffered.has_lifecycle(id, generation + 1) {
                for (src, message) in self.buffered.take_lifespan(id, generation + 1) {
                    progressed = true;
                    if let Err(err) = self.handle_cell_message(src, message, net, scripts) {
                        warn!(
                            "replay of buffered message for entity {} failed: {}",
                            id, err
                        );
                    }
                }
            }
            if !progressed {
                return;
            }
        }
    }
}
