use std::collections::{BTreeMap, HashMap, VecDeque};

use log::trace;

use specter_shared::{CellAddr, CellMessage, EntityId, Generation};

/// Out-of-generation ghost messages, buffered per entity and grouped into
/// the ownership "lifespan" (generation) they belong to. A whole lifespan's
/// subsequence replays in arrival order once its generation becomes current;
/// a buffered lifecycle announcement doubles as the successor record that
/// zombie recovery adopts.
#[derive(Default)]
pub struct BufferedGhostMessages {
    buffers: HashMap<EntityId, BTreeMap<Generation, VecDeque<(CellAddr, CellMessage)>>>,
}

impl BufferedGhostMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(
        &mut self,
        entity: EntityId,
        generation: Generation,
        src: CellAddr,
        message: CellMessage,
    ) {
        trace!(
            "buffering out-of-generation message for entity {} (generation {})",
            entity,
            generation
        );
        self.buffers
            .entry(entity)
            .or_default()
            .entry(generation)
            .or_default()
            .push_back((src, message));
    }

    /// Removes and returns the buffered subsequence for one lifespan, in
    /// arrival order.
    pub fn take_lifespan(
        &mut self,
        entity: EntityId,
        generation: Generation,
    ) -> VecDeque<(CellAddr, CellMessage)> {
        let Some(lifespans) = self.buffers.get_mut(&entity) else {
            return VecDeque::new();
        };
        let taken = lifespans.remove(&generation).unwrap_or_default();
        if lifespans.is_empty() {
            self.buffers.remove(&entity);
        }
        taken
    }

    /// Whether a lifespan's buffer holds a lifecycle message (handoff,
    /// set-next-real or set-real). Steady-state-only buffers must keep
    /// waiting for one before the lifespan can begin.
    pub fn has_lifecycle(&self, entity: EntityId, generation: Generation) -> bool {
        self.buffers
            .get(&entity)
            .and_then(|lifespans| lifespans.get(&generation))
            .map(|messages| messages.iter().any(|(_, message)| message.is_lifecycle()))
            .unwrap_or(false)
    }

    /// Finds the earliest buffered successor announcement after the given
    /// generation whose announced owner is still alive: the adoption target
    /// for zombie recovery.
    pub fn successor_after<F: Fn(CellAddr) -> bool>(
        &self,
        entity: EntityId,
        after: Generation,
        is_alive: F,
    ) -> Option<(Generation, CellAddr)> {
        let lifespans = self.buffers.get(&entity)?;
        for (generation, messages) in lifespans.range(after + 1..) {
            for (_, message) in messages {
                let owner = match message {
                    CellMessage::GhostSetReal { owner, .. } => *owner,
                    CellMessage::GhostSetNextReal { next_owner, .. } => *next_owner,
                    CellMessage::Handoff(_) => continue,
                    _ => continue,
                };
                if is_alive(owner) {
                    return Some((*generation, owner));
                }
            }
        }
        None
    }

    /// Drops lifespans at or before `up_to`; their messages can never apply
    /// again. Returns how many messages were discarded.
    pub fn discard_stale(&mut self, entity: EntityId, up_to: Generation) -> usize {
        let Some(lifespans) = self.buffers.get_mut(&entity) else {
            return 0;
        };
        let stale: Vec<Generation> = lifespans.range(..=up_to).map(|(gen, _)| *gen).collect();
        let mut discarded = 0;
        for generation in stale {
            if let Some(messages) = lifespans.remove(&generation) {
                discarded += messages.len();
            }
        }
        if lifespans.is_empty() {
            self.buffers.remove(&entity);
        }
        discarded
    }

    /// Drops everything buffered for a destroyed entity.
    pub fn discard_entity(&mut self, entity: EntityId) -> usize {
        self.buffers
            .remove(&entity)
            .map(|lifespans| lifespans.values().map(VecDeque::len).sum())
            .unwrap_or(0)
    }

    pub fn has_any(&self, entity: EntityId) -> bool {
        self.buffers.contains_key(&entity)
    }

    pub fn pending_count(&self) -> usize {
        self.buffers
            .values()
            .flat_map(BTreeMap::values)
            .map(VecDeque::len)
            .sum()
    }
}
