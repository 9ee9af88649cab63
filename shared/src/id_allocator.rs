use std::collections::VecDeque;

use thiserror::Error;

use crate::types::{EntityId, GameTime};

/// Errors that can occur while allocating entity ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IdAllocatorError {
    /// Every id is either live or still quarantined; the caller must fail the
    /// spawning operation rather than reuse a live id.
    #[error("entity id space is exhausted")]
    Exhausted,
}

/// The id-allocator collaborator. Issues process-wide-unique entity ids and
/// accepts them back once a cell-only entity is finally destroyed.
pub trait IdAllocator {
    fn allocate(&mut self, now: GameTime) -> Result<EntityId, IdAllocatorError>;
    fn release(&mut self, id: EntityId, now: GameTime);
}

/// Default [`IdAllocator`] implementation: hands out fresh ids until the
/// space runs dry, then recycles released ids once they have sat out a
/// quarantine interval (so that late messages addressed to a dead entity
/// cannot be misdelivered to its successor).
pub struct RecyclingIdAllocator {
    next_id: u32,
    recycled_ids: VecDeque<(GameTime, EntityId)>,
    quarantine_ticks: GameTime,
}

impl RecyclingIdAllocator {
    pub fn new(quarantine_ticks: GameTime) -> Self {
        Self {
            // id 0 is reserved so that a zeroed stream never aliases a live
            // entity
            next_id: 1,
            recycled_ids: VecDeque::new(),
            quarantine_ticks,
        }
    }

    pub fn recycled_count(&self) -> usize {
        self.recycled_ids.len()
    }
}

impl IdAllocator for RecyclingIdAllocator {
    fn allocate(&mut self, now: GameTime) -> Result<EntityId, IdAllocatorError> {
        if let Some((released_at, _)) = self.recycled_ids.front() {
            if now.saturating_sub(*released_at) >= self.quarantine_ticks {
                let (_, id) = self
                    .recycled_ids
                    .pop_front()
                    .ok_or(IdAllocatorError::Exhausted)?;
                return Ok(id);
            }
        }

        if self.next_id == u32::MAX {
            return Err(IdAllocatorError::Exhausted);
        }

        let id = EntityId(self.next_id);
        self.next_id += 1;
        Ok(id)
    }

    fn release(&mut self, id: EntityId, now: GameTime) {
        self.recycled_ids.push_back((now, id));
    }
}
