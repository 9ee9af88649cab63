use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;

use glam::Vec3;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use specter_shared::{
    encode_section, CellAddr, CellMessage, ClientMessage, ControllerId, Direction, EntityId,
    EntityTypeId, GameTime, HistoryError, HistorySeq, IdAllocator, NetworkSender,
    PropagationClass, PropertySlot, PropertyValue, Visibility,
};

use crate::callbacks::{DeferredCallbacks, ScriptDispatcher, ScriptHook};
use crate::config::CellConfig;
use crate::entity::{
    ControllerKind, Entity, EntityError, EntityTypeRegistry, RealAuthority, ReplicationState,
    Witness,
};
use crate::error::{CellError, ReplicationError};
use crate::protocol::BufferedGhostMessages;
use crate::range::{ProximityIndex, TriggerEvent, TriggerId};
use crate::space::{physically_possible, settle_jitter_debt, ChunkGraph, MoveVerdict};

/// Payload of a position history event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionEventPayload {
    pub position: Vec3,
    pub direction: Direction,
}

/// Payload of a property-change history event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyEventPayload {
    pub slot: PropertySlot,
    pub value: PropertyValue,
}

/// The tick-driven host of one spatial partition: owns the resident entity
/// set, the chunk graph, the proximity index, and drives replication and
/// history trimming once per tick. All collaborators (network sender, script
/// dispatcher) are passed in per call; there is no ambient global state.
pub struct CellProcess {
    pub(crate) addr: CellAddr,
    pub(crate) config: CellConfig,
    pub(crate) now: GameTime,
    pub(crate) now_seconds: f64,
    pub(crate) types: EntityTypeRegistry,
    pub(crate) entities: HashMap<EntityId, Entity>,
    pub(crate) spatial: ChunkGraph,
    pub(crate) proximity: ProximityIndex,
    pub(crate) buffered: BufferedGhostMessages,
    pub(crate) callbacks: DeferredCallbacks,
    pub(crate) ids: Box<dyn IdAllocator>,
    pub(crate) dead_peers: HashSet<CellAddr>,
    pub(crate) pending_latest: HashMap<EntityId, BTreeMap<PropertySlot, (Visibility, Vec<u8>)>>,
    pub(crate) passengers: HashMap<EntityId, Vec<EntityId>>,
}

impl CellProcess {
    pub fn new(
        addr: CellAddr,
        config: CellConfig,
        types: EntityTypeRegistry,
        spatial: ChunkGraph,
        ids: Box<dyn IdAllocator>,
    ) -> Self {
        Self {
            addr,
            config,
            now: 0,
            now_seconds: 0.0,
            types,
            entities: HashMap::new(),
            spatial,
            proximity: ProximityIndex::new(),
            buffered: BufferedGhostMessages::new(),
            callbacks: DeferredCallbacks::new(),
            ids,
            dead_peers: HashSet::new(),
            pending_latest: HashMap::new(),
            passengers: HashMap::new(),
        }
    }

    pub fn addr(&self) -> CellAddr {
        self.addr
    }

    pub fn now(&self) -> GameTime {
        self.now
    }

    pub fn now_seconds(&self) -> f64 {
        self.now_seconds
    }

    pub fn config(&self) -> &CellConfig {
        &self.config
    }

    pub fn types(&self) -> &EntityTypeRegistry {
        &self.types
    }

    pub fn spatial(&self) -> &ChunkGraph {
        &self.spatial
    }

    pub fn proximity(&self) -> &ProximityIndex {
        &self.proximity
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// The replication state of an entity as observable from outside;
    /// non-resident entities report as destroyed.
    pub fn replication_state(&self, id: EntityId) -> ReplicationState {
        self.entities
            .get(&id)
            .map(Entity::replication_state)
            .unwrap_or(ReplicationState::Destroyed)
    }

    pub fn is_peer_dead(&self, addr: CellAddr) -> bool {
        self.dead_peers.contains(&addr)
    }

    /// Spawns a fresh authoritative entity at `position`.
    pub fn spawn_real(
        &mut self,
        type_id: EntityTypeId,
        position: Vec3,
        direction: Direction,
        client_owned: bool,
    ) -> Result<EntityId, CellError> {
        let schema_len = self.types.def(type_id)?.schema.len();
        let chunk = self.spatial.find_chunk_containing(position, None)?;
        let id = self.ids.allocate(self.now)?;

        let mut entity = Entity::new(
            id,
            type_id,
            position,
            direction,
            schema_len,
            self.config.id_quarantine_ticks,
        );
        entity.client_owned = client_owned;
        entity.chunk = Some(chunk);
        entity.attach_real(RealAuthority::new(self.now_seconds))?;

        self.proximity.add_entity(id, position.x, position.z)?;
        self.entities.insert(id, entity);
        info!("spawned real entity {} of type {}", id, type_id);
        Ok(id)
    }

    /// Destroys a resident entity: tears down its authority, then its
    /// controllers, then its index membership, and finally releases the id
    /// if the entity was cell-only. Destroying an already-destroyed entity
    /// is reported as a benign error, never a crash.
    pub fn destroy_entity(
        &mut self,
        id: EntityId,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        let Some(mut entity) = self.entities.remove(&id) else {
            warn!("destroy of already-destroyed entity {} ignored", id);
            return Err(EntityError::AlreadyDestroyed { entity: id }.into());
        };

        self.callbacks.begin_structural();
        entity.mark_destroyed();

        let mut was_real = false;
        match entity.detach_authority() {
            Ok(crate::entity::Authority::Real(real)) => {
                was_real = true;
                for haunt in real.haunts() {
                    net.send_to_cell(
                        *haunt,
                        CellMessage::DeleteGhost {
                            entity: id,
                            generation: entity.generation,
                        },
                    );
                }
            }
            Ok(crate::entity::Authority::Ghost(_)) => {
                self.callbacks.queue(id, ScriptHook::GhostDestroyed);
            }
            Err(err) => error!("{err}"),
        }

        for controller in entity.controllers.ids() {
            entity.controllers.remove(controller, self.now);
        }

        self.proximity.remove_entity(id);
        entity.chunk = None;

        if let Some(riders) = self.passengers.remove(&id) {
            for passenger in riders {
                if let Some(passenger) = self.entities.get_mut(&passenger) {
                    passenger.vehicle = None;
                    passenger.local_position = passenger.global_position;
                    passenger.local_direction = passenger.global_direction;
                }
            }
        }
        if let Some(vehicle) = entity.vehicle {
            if let Some(riders) = self.passengers.get_mut(&vehicle) {
                riders.retain(|rider| *rider != id);
            }
        }

        self.pending_latest.remove(&id);
        self.buffered.discard_entity(id);

        if was_real && !entity.client_owned {
            self.ids.release(id, self.now);
        }

        self.callbacks.end_structural(scripts);
        info!("destroyed entity {}", id);
        Ok(())
    }

    /// One pass of the tick loop: advances controllers, flushes coalesced
    /// property events, runs the witness/trim cycle, and verifies the
    /// proximity index.
    pub fn tick(&mut self, net: &mut dyn NetworkSender, scripts: &mut dyn ScriptDispatcher) {
        self.now += 1;
        self.now_seconds += self.config.tick_seconds;

        self.advance_controllers(net, scripts);
        self.flush_coalesced_properties();

        if self.config.trim_interval_ticks > 0 && self.now % self.config.trim_interval_ticks == 0 {
            self.witness_and_trim_cycle(net, scripts);
        }

        if self.config.proximity_check_interval_ticks > 0
            && self.now % self.config.proximity_check_interval_ticks == 0
            && !self.proximity.is_sorted()
        {
            self.proximity.heal();
        }
    }

    fn advance_controllers(
        &mut self,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) {
        enum Action {
            Move {
                controller: ControllerId,
                target: Vec3,
                face_movement: bool,
                arrived: bool,
            },
            Timer {
                controller: ControllerId,
                user_arg: i32,
                repeating: bool,
            },
        }

        let ids: Vec<EntityId> = self.entities.keys().copied().collect();
        for id in ids {
            let now = self.now;
            let tick_seconds = self.config.tick_seconds as f32;

            let mut actions = Vec::new();
            let (position, direction, on_ground) = {
                let Some(entity) = self.entities.get_mut(&id) else {
                    continue;
                };
                if !entity.is_real() {
                    continue;
                }
                let position = entity.global_position;
                for entry in entity.controllers.iter_mut() {
                    let user_arg = entry.user_arg;
                    match &mut entry.kind {
                        ControllerKind::MoveToPoint(move_to) => {
                            let to_destination = move_to.destination - position;
                            let distance = to_destination.length();
                            let step = move_to.velocity * tick_seconds;
                            let (target, arrived) = if distance <= step || distance == 0.0 {
                                (move_to.destination, true)
                            } else {
                                (position + to_destination * (step / distance), false)
                            };
                            actions.push(Action::Move {
                                controller: entry.id,
                                target,
                                face_movement: move_to.face_movement,
                                arrived,
                            });
                        }
                        ControllerKind::TickTimer(timer) => {
                            if now >= timer.next_fire {
                                if timer.repeating {
                                    timer.next_fire = now + timer.interval_ticks;
                                }
                                actions.push(Action::Timer {
                                    controller: entry.id,
                                    user_arg,
                                    repeating: timer.repeating,
                                });
                            }
                        }
                        ControllerKind::VisionCone(_) => {}
                    }
                }
                (position, entity.global_direction, entity.is_on_ground)
            };

            for action in actions {
                match action {
                    Action::Move {
                        controller,
                        target,
                        face_movement,
                        arrived,
                    } => {
                        let direction = if face_movement {
                            let delta = target - position;
                            Direction::with_yaw(delta.x.atan2(delta.z))
                        } else {
                            direction
                        };
                        if let Err(err) =
                            self.update_position(id, target, direction, on_ground, net, scripts)
                        {
                            warn!("movement controller {} on entity {}: {}", controller, id, err);
                            continue;
                        }
                        if arrived {
                            if let Some(entity) = self.entities.get_mut(&id) {
                                entity.controllers.remove(controller, now);
                            }
                            self.callbacks.dispatch(
                                scripts,
                                id,
                                ScriptHook::ControllerComplete { controller },
                            );
                        }
                    }
                    Action::Timer {
                        controller,
                        user_arg,
                        repeating,
                    } => {
                        if !repeating {
                            if let Some(entity) = self.entities.get_mut(&id) {
                                entity.controllers.remove(controller, now);
                            }
                        }
                        self.callbacks.dispatch(
                            scripts,
                            id,
                            ScriptHook::TimerFired {
                                controller,
                                user_arg,
                            },
                        );
                    }
                }
            }
        }
    }

    /// Moves an authoritative or scripted entity to a new position,
    /// re-seating every dependent structure: proximity order and triggers,
    /// chunk membership, event history, and the ghost position stream.
    pub fn update_position(
        &mut self,
        id: EntityId,
        position: Vec3,
        direction: Direction,
        is_on_ground: bool,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        if !self.entities.contains_key(&id) {
            return Err(EntityError::NotResident { entity: id }.into());
        }

        self.callbacks.begin_structural();
        let result = self.update_position_inner(id, position, direction, is_on_ground, net);
        self.callbacks.end_structural(scripts);
        result?;

        // passengers ride along through the same path
        let riders = self.passengers.get(&id).cloned().unwrap_or_default();
        for rider in riders {
            let Some(passenger) = self.entities.get(&rider) else {
                continue;
            };
            let target = position + passenger.local_position;
            let rider_direction = passenger.local_direction;
            let rider_on_ground = passenger.is_on_ground;
            if let Err(err) =
                self.update_position(rider, target, rider_direction, rider_on_ground, net, scripts)
            {
                warn!("passenger {} of vehicle {}: {}", rider, id, err);
            }
        }
        Ok(())
    }

    fn update_position_inner(
        &mut self,
        id: EntityId,
        position: Vec3,
        direction: Direction,
        is_on_ground: bool,
        net: &mut dyn NetworkSender,
    ) -> Result<(), CellError> {
        let mut entity = self
            .entities
            .remove(&id)
            .ok_or(EntityError::NotResident { entity: id })?;
        let result = self.reseat_entity(&mut entity, position, direction, is_on_ground, net);
        self.entities.insert(id, entity);
        result
    }

    fn reseat_entity(
        &mut self,
        entity: &mut Entity,
        position: Vec3,
        direction: Direction,
        is_on_ground: bool,
        net: &mut dyn NetworkSender,
    ) -> Result<(), CellError> {
        let id = entity.id;
        entity.global_position = position;
        entity.global_direction = direction;
        entity.is_on_ground = is_on_ground;
        match entity.vehicle.and_then(|vehicle| self.entities.get(&vehicle)) {
            Some(vehicle) => {
                entity.local_position = position - vehicle.global_position;
            }
            None => {
                entity.local_position = position;
                entity.local_direction = direction;
            }
        }

        let events = self.proximity.move_entity(id, position.x, position.z)?;
        self.queue_trigger_hooks(&events);

        match self.spatial.find_chunk_containing(position, entity.chunk) {
            Ok(chunk) => entity.chunk = Some(chunk),
            Err(err) => {
                // containment lost is a consistency error: log loudly, keep
                // the previous chunk, and let the next move re-resolve
                error!("entity {} lost chunk containment: {}", id, err);
            }
        }

        // the history is authoritative-side state: only the real copy
        // appends, and only for non-volatile types (volatile positions are
        // streamed, never logged)
        let volatile = self.types.def(entity.entity_type)?.volatile_position;
        if entity.is_real() && !volatile {
            let payload = encode_section(&PositionEventPayload {
                position,
                direction,
            })?;
            entity
                .history
                .add(Visibility::OtherClients, payload, self.now);
        }

        if entity.is_real() {
            entity.position_seq = entity.position_seq.wrapping_add(1);
            let message = CellMessage::GhostPosition {
                entity: id,
                generation: entity.generation,
                seq: entity.position_seq,
                local_position: entity.local_position,
                is_on_ground,
                direction,
            };
            if let Some(real) = entity.real() {
                for haunt in real.haunts() {
                    net.send_to_cell(*haunt, message.clone());
                }
            }
        }
        Ok(())
    }

    pub(crate) fn queue_trigger_hooks(&mut self, events: &[TriggerEvent]) {
        for event in events {
            let hook = if event.entered {
                ScriptHook::TriggerEntered {
                    trigger: event.trigger,
                    other: event.other,
                }
            } else {
                ScriptHook::TriggerLeft {
                    trigger: event.trigger,
                    other: event.other,
                }
            };
            self.callbacks.queue(event.owner, hook);
        }
    }

    pub(crate) fn dispatch_trigger_hooks(
        &mut self,
        scripts: &mut dyn ScriptDispatcher,
        events: &[TriggerEvent],
    ) {
        for event in events {
            let hook = if event.entered {
                ScriptHook::TriggerEntered {
                    trigger: event.trigger,
                    other: event.other,
                }
            } else {
                ScriptHook::TriggerLeft {
                    trigger: event.trigger,
                    other: event.other,
                }
            };
            self.callbacks.dispatch(scripts, event.owner, hook);
        }
    }

    /// Validates and applies a client-driven move. Physically impossible
    /// moves are rejected with a correction back to the requester; the
    /// entity never silently teleports.
    pub fn request_move(
        &mut self,
        id: EntityId,
        to: Vec3,
        direction: Direction,
        is_on_ground: bool,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<MoveVerdict, CellError> {
        let (verdict, client, top_speed) = {
            let entity = self
                .entities
                .get(&id)
                .ok_or(EntityError::NotResident { entity: id })?;
            let real = entity
                .real()
                .ok_or(ReplicationError::NotReal { entity: id })?;
            if real.corrections_outstanding > 0 {
                return Ok(MoveVerdict::CorrectionPending);
            }
            let top_speed = self.types.def(entity.entity_type)?.top_speed;
            let elapsed = (self.now_seconds - real.last_validated_seconds).max(0.0) as f32;
            let chunk = match entity.chunk {
                Some(chunk) => chunk,
                None => self
                    .spatial
                    .find_chunk_containing(entity.global_position, None)?,
            };
            let verdict = physically_possible(
                &self.spatial,
                chunk,
                entity.global_position,
                to,
                elapsed,
                top_speed,
                real.jitter_debt_seconds,
            );
            (verdict, real.witness.map(|witness| witness.client), top_speed)
        };

        match verdict {
            MoveVerdict::Accepted => {
                let now_seconds = self.now_seconds;
                let allowance = self.config.jitter_allowance_seconds;
                if let Some(entity) = self.entities.get_mut(&id) {
                    let distance = entity.global_position.distance(to);
                    if let Some(real) = entity.real_mut() {
                        let elapsed = (now_seconds - real.last_validated_seconds).max(0.0) as f32;
                        real.jitter_debt_seconds = settle_jitter_debt(
                            real.jitter_debt_seconds,
                            elapsed,
                            distance,
                            top_speed,
                            allowance,
                        );
                        real.last_validated_seconds = now_seconds;
                    }
                }
                self.update_position(id, to, direction, is_on_ground, net, scripts)?;
            }
            MoveVerdict::CorrectionPending => {}
            MoveVerdict::RejectedSpeed { .. } | MoveVerdict::RejectedPath => {
                warn!("entity {}: rejecting impossible move ({:?})", id, verdict);
                if let Some(entity) = self.entities.get_mut(&id) {
                    let position = entity.global_position;
                    let current_direction = entity.global_direction;
                    if let Some(real) = entity.real_mut() {
                        real.corrections_outstanding += 1;
                    }
                    if let Some(client) = client {
                        net.send_to_client(
                            client,
                            ClientMessage::PositionCorrection {
                                entity: id,
                                position,
                                direction: current_direction,
                            },
                        );
                    }
                }
            }
        }
        Ok(verdict)
    }

    /// The client acknowledged a position correction; movement validation
    /// resumes from now.
    pub fn acknowledge_correction(&mut self, id: EntityId) -> Result<(), CellError> {
        let now_seconds = self.now_seconds;
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(EntityError::NotResident { entity: id })?;
        if let Some(real) = entity.real_mut() {
            real.corrections_outstanding = real.corrections_outstanding.saturating_sub(1);
            real.last_validated_seconds = now_seconds;
        }
        Ok(())
    }

    /// Writes a property on a real entity. Propagation is decided by the
    /// slot's static schema metadata; oversized payloads fail before the
    /// entity is touched.
    pub fn set_property(
        &mut self,
        id: EntityId,
        slot: PropertySlot,
        value: PropertyValue,
        net: &mut dyn NetworkSender,
    ) -> Result<(), CellError> {
        let (class, send_latest_only) = {
            let entity = self
                .entities
                .get(&id)
                .ok_or(EntityError::NotResident { entity: id })?;
            if !entity.is_real() {
                return Err(ReplicationError::NotReal { entity: id }.into());
            }
            let schema = &self.types.def(entity.entity_type)?.schema;
            schema.check_write(slot, &value)?;
            let def = schema.def(slot)?;
            (def.class, def.send_latest_only)
        };

        match class {
            PropagationClass::Ghosted => {
                let entity = self
                    .entities
                    .get_mut(&id)
                    .ok_or(EntityError::NotResident { entity: id })?;
                entity.set_property_value(slot, value.clone());
                let generation = entity.generation;
                let haunts: Vec<CellAddr> = entity
                    .real()
                    .map(|real| real.haunts().to_vec())
                    .unwrap_or_default();
                for haunt in haunts {
                    net.send_to_cell(
                        haunt,
                        CellMessage::GhostProperty {
                            entity: id,
                            generation,
                            slot,
                            value: value.clone(),
                        },
                    );
                }
            }
            PropagationClass::OwnClient | PropagationClass::OtherClients => {
                let visibility = if class == PropagationClass::OwnClient {
                    Visibility::OwnClient
                } else {
                    Visibility::OtherClients
                };
                let payload = encode_section(&PropertyEventPayload {
                    slot,
                    value: value.clone(),
                })?;
                let now = self.now;
                let entity = self
                    .entities
                    .get_mut(&id)
                    .ok_or(EntityError::NotResident { entity: id })?;
                entity.set_property_value(slot, value);
                if send_latest_only {
                    self.pending_latest
                        .entry(id)
                        .or_default()
                        .insert(slot, (visibility, payload));
                } else {
                    entity.history.add(visibility, payload, now);
                }
            }
            PropagationClass::Internal => {
                let entity = self
                    .entities
                    .get_mut(&id)
                    .ok_or(EntityError::NotResident { entity: id })?;
                entity.set_property_value(slot, value);
            }
        }
        Ok(())
    }

    /// Flushes coalesced send-latest-only property events into history, one
    /// event per written slot.
    fn flush_coalesced_properties(&mut self) {
        if self.pending_latest.is_empty() {
            return;
        }
        let now = self.now;
        let pending = std::mem::take(&mut self.pending_latest);
        for (id, slots) in pending {
            let Some(entity) = self.entities.get_mut(&id) else {
                continue;
            };
            for (_, (visibility, payload)) in slots {
                entity.history.add(visibility, payload, now);
            }
        }
    }

    pub(crate) fn flush_coalesced_for(&mut self, entity: &mut Entity) {
        if let Some(slots) = self.pending_latest.remove(&entity.id) {
            for (_, (visibility, payload)) in slots {
                entity.history.add(visibility, payload, self.now);
            }
        }
    }

    /// Attaches a controller to a real entity; an exclusive category evicts
    /// its current occupant first. Ghost-capable controllers replicate to
    /// every haunt.
    pub fn add_controller(
        &mut self,
        id: EntityId,
        kind: ControllerKind,
        user_arg: i32,
        net: &mut dyn NetworkSender,
    ) -> Result<ControllerId, CellError> {
        let now = self.now;
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(EntityError::NotResident { entity: id })?;
        if !entity.is_real() {
            return Err(ReplicationError::NotReal { entity: id }.into());
        }

        let mut kind = kind;
        kind.start_real(now);
        let kind_name = kind.kind_name();
        let ghost_capable = kind.has_ghost_state();
        let (controller, evicted) = entity.controllers.add(kind, user_arg, now);
        let generation = entity.generation;
        let haunts: Vec<CellAddr> = entity
            .real()
            .map(|real| real.haunts().to_vec())
            .unwrap_or_default();

        if let Some(evicted) = evicted {
            info!(
                "entity {}: {} controller {} evicted by new {} controller {}",
                id,
                evicted.kind.kind_name(),
                evicted.id,
                kind_name,
                controller
            );
            if evicted.kind.has_ghost_state() {
                for haunt in &haunts {
                    net.send_to_cell(
                        *haunt,
                        CellMessage::GhostControllerDelete {
                            entity: id,
                            generation,
                            controller: evicted.id,
                        },
                    );
                }
            }
        }

        if ghost_capable {
            if let Some(entry) = entity.controllers.get(controller) {
                let bytes = encode_section(entry)?;
                for haunt in &haunts {
                    net.send_to_cell(
                        *haunt,
                        CellMessage::GhostControllerCreate {
                            entity: id,
                            generation,
                            controller,
                            entry: bytes.clone(),
                        },
                    );
                }
            }
        }
        Ok(controller)
    }

    /// Detaches a controller. Idempotent; returns whether anything was
    /// removed.
    pub fn remove_controller(
        &mut self,
        id: EntityId,
        controller: ControllerId,
        net: &mut dyn NetworkSender,
    ) -> Result<bool, CellError> {
        let now = self.now;
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(EntityError::NotResident { entity: id })?;
        let Some(entry) = entity.controllers.remove(controller, now) else {
            return Ok(false);
        };
        if entity.is_real() && entry.kind.has_ghost_state() {
            let generation = entity.generation;
            let haunts: Vec<CellAddr> = entity
                .real()
                .map(|real| real.haunts().to_vec())
                .unwrap_or_default();
            for haunt in haunts {
                net.send_to_cell(
                    haunt,
                    CellMessage::GhostControllerDelete {
                        entity: id,
                        generation,
                        controller,
                    },
                );
            }
        }
        Ok(true)
    }

    /// Pushes a ghost-capable controller's current state to every haunt,
    /// after the embedder mutated it in place.
    pub fn sync_controller(
        &mut self,
        id: EntityId,
        controller: ControllerId,
        net: &mut dyn NetworkSender,
    ) -> Result<(), CellError> {
        let entity = self
            .entities
            .get(&id)
            .ok_or(EntityError::NotResident { entity: id })?;
        let real = entity
            .real()
            .ok_or(ReplicationError::NotReal { entity: id })?;
        let Some(entry) = entity.controllers.get(controller) else {
            return Ok(());
        };
        if let Some(state) = entry.kind.write_ghost_state()? {
            for haunt in real.haunts() {
                net.send_to_cell(
                    *haunt,
                    CellMessage::GhostControllerUpdate {
                        entity: id,
                        generation: entity.generation,
                        controller,
                        state: state.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    /// Attaches a range trigger to an entity; entities already inside the
    /// fresh range produce immediate entered hooks.
    pub fn add_proximity_trigger(
        &mut self,
        id: EntityId,
        radius: f32,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<TriggerId, CellError> {
        if !self.entities.contains_key(&id) {
            return Err(EntityError::NotResident { entity: id }.into());
        }
        let (trigger, events) = self.proximity.add_trigger(id, radius)?;
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.record_trigger(radius, trigger);
        }
        self.dispatch_trigger_hooks(scripts, &events);
        Ok(trigger)
    }

    /// Idempotent; returns whether the trigger existed.
    pub fn remove_proximity_trigger(&mut self, id: EntityId, trigger: TriggerId) -> bool {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.forget_trigger(trigger);
        }
        self.proximity.remove_trigger(trigger)
    }

    /// Attaches or clears the client-observation handle of a real entity.
    pub fn set_witness(
        &mut self,
        id: EntityId,
        client: Option<SocketAddr>,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        let terminal = self.config.witness_terminal_periods;
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(EntityError::NotResident { entity: id })?;
        if !entity.is_real() {
            return Err(ReplicationError::NotReal { entity: id }.into());
        }
        match client {
            Some(addr) => {
                let was_unwitnessed = entity.periods_without_witness >= terminal;
                if let Some(real) = entity.real_mut() {
                    real.witness = Some(Witness { client: addr });
                }
                entity.periods_without_witness = 0;
                if was_unwitnessed {
                    self.callbacks.dispatch(scripts, id, ScriptHook::Witnessed(true));
                }
            }
            None => {
                if let Some(real) = entity.real_mut() {
                    real.witness = None;
                }
            }
        }
        Ok(())
    }

    /// A local observer touched a ghost that had been primed by a
    /// check-witnessed probe: report back to the real copy.
    pub fn note_ghost_observed(
        &mut self,
        id: EntityId,
        net: &mut dyn NetworkSender,
    ) -> Result<(), CellError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(EntityError::NotResident { entity: id })?;
        let Some(ghost) = entity.ghost() else {
            return Ok(());
        };
        if entity.periods_without_witness > 0 {
            let owner = ghost.authoritative_addr();
            entity.periods_without_witness = 0;
            net.send_to_cell(owner, CellMessage::Witnessed { entity: id });
        }
        Ok(())
    }

    /// A real entity was observed (locally or via a ghost's report). Resets
    /// the witness counter and fires `Witnessed(true)` exactly once per
    /// transition out of the unwitnessed state.
    pub(crate) fn note_witnessed(&mut self, id: EntityId, scripts: &mut dyn ScriptDispatcher) {
        let terminal = self.config.witness_terminal_periods;
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        if !entity.is_real() {
            return;
        }
        let was_unwitnessed = entity.periods_without_witness >= terminal;
        entity.periods_without_witness = 0;
        if was_unwitnessed {
            self.callbacks.dispatch(scripts, id, ScriptHook::Witnessed(true));
        }
    }

    fn witness_and_trim_cycle(
        &mut self,
        net: &mut dyn NetworkSender,
        scripts: &mut dyn ScriptDispatcher,
    ) {
        let probe = self.config.witness_probe_periods;
        let terminal = self.config.witness_terminal_periods;
        let retention = self.config.history_retention_ticks;
        let now = self.now;

        let ids: Vec<EntityId> = self.entities.keys().copied().collect();
        for id in ids {
            let mut fire_lost = false;
            let mut fire_regained = false;
            let mut probe_haunts: Vec<CellAddr> = Vec::new();
            {
                let Some(entity) = self.entities.get_mut(&id) else {
                    continue;
                };
                entity.history.trim(now, retention, None);
                if !entity.is_real() {
                    continue;
                }
                let witnessed = entity
                    .real()
                    .map(|real| real.witness.is_some())
                    .unwrap_or(false);
                if witnessed {
                    if entity.periods_without_witness >= terminal {
                        fire_regained = true;
                    }
                    entity.periods_without_witness = 0;
                } else {
                    entity.periods_without_witness += 1;
                    if entity.periods_without_witness == probe {
                        probe_haunts = entity
                            .real()
                            .map(|real| real.haunts().to_vec())
                            .unwrap_or_default();
                    }
                    if entity.periods_without_witness == terminal {
                        fire_lost = true;
                    }
                }
            }
            for haunt in probe_haunts {
                net.send_to_cell(haunt, CellMessage::CheckWitnessed { entity: id });
            }
            if fire_regained {
                self.callbacks.dispatch(scripts, id, ScriptHook::Witnessed(true));
            }
            if fire_lost {
                self.callbacks.dispatch(scripts, id, ScriptHook::Witnessed(false));
            }
        }
    }

    /// Replays retained history to a client from `from_seq`. If the range
    /// was already trimmed the client is told to resync instead.
    pub fn client_catch_up(
        &mut self,
        id: EntityId,
        from_seq: HistorySeq,
        client: SocketAddr,
        net: &mut dyn NetworkSender,
    ) -> Result<(), CellError> {
        let entity = self
            .entities
            .get(&id)
            .ok_or(EntityError::NotResident { entity: id })?;
        match entity.history.replay_from(from_seq) {
            Ok(events) => {
                net.send_to_client(
                    client,
                    ClientMessage::HistoryEvents {
                        entity: id,
                        events: events.into_iter().cloned().collect(),
                    },
                );
            }
            Err(HistoryError::AlreadyTrimmed { requested, oldest }) => {
                warn!(
                    "entity {}: replay from {} not possible (oldest retained {}); resync",
                    id, requested, oldest
                );
                net.send_to_client(
                    client,
                    ClientMessage::Resync {
                        entity: id,
                        next_seq: entity.history.next_seq(),
                    },
                );
            }
            Err(err @ HistoryError::AheadOfHistory { .. }) => return Err(err.into()),
        }
        Ok(())
    }

    /// Invokes an embedder-defined scripted hook by name, honoring the
    /// deferred-callback contract: during a structural mutation the
    /// invocation is queued and replayed afterwards, in call order.
    pub fn invoke_script(
        &mut self,
        id: EntityId,
        name: &str,
        args: Vec<PropertyValue>,
        scripts: &mut dyn ScriptDispatcher,
    ) -> Result<(), CellError> {
        if !self.entities.contains_key(&id) {
            return Err(EntityError::NotResident { entity: id }.into());
        }
        self.callbacks.dispatch(
            scripts,
            id,
            ScriptHook::Named {
                name: name.to_string(),
                args,
            },
        );
        Ok(())
    }

    /// Mounts `id` on `vehicle` (or dismounts with `None`), recomputing its
    /// vehicle-relative coordinates.
    pub fn set_vehicle(
        &mut self,
        id: EntityId,
        vehicle: Option<EntityId>,
    ) -> Result<(), CellError> {
        if let Some(vehicle) = vehicle {
            if !self.entities.contains_key(&vehicle) {
                return Err(EntityError::NotResident { entity: vehicle }.into());
            }
        }
        let previous = self
            .entities
            .get(&id)
            .ok_or(EntityError::NotResident { entity: id })?
            .vehicle;
        if let Some(previous) = previous {
            if let Some(riders) = self.passengers.get_mut(&previous) {
                riders.retain(|rider| *rider != id);
            }
        }
        let vehicle_position =
            vehicle.and_then(|vehicle| self.entities.get(&vehicle).map(|v| v.global_position));
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(EntityError::NotResident { entity: id })?;
        entity.vehicle = vehicle;
        match vehicle_position {
            Some(vehicle_position) => {
                entity.local_position = entity.global_position - vehicle_position;
            }
            None => {
                entity.local_position = entity.global_position;
                entity.local_direction = entity.global_direction;
            }
        }
        if let Some(vehicle) = vehicle {
            self.passengers.entry(vehicle).or_default().push(id);
        }
        Ok(())
    }
}
