use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{GameTime, HistorySeq};

/// Errors that can occur during EventHistory operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// The requested range was already trimmed; the observer must perform a
    /// full resync instead of a replay.
    #[error("events from {requested} were already trimmed (oldest retained is {oldest})")]
    AlreadyTrimmed {
        requested: HistorySeq,
        oldest: HistorySeq,
    },
    /// The requested sequence number has not been issued yet.
    #[error("replay from {requested} is ahead of the next sequence number {next}")]
    AheadOfHistory {
        requested: HistorySeq,
        next: HistorySeq,
    },
}

/// Which observers an event is visible to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    OwnClient,
    OtherClients,
    GhostOnly,
}

/// One outward-visible state change
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub seq: HistorySeq,
    pub visibility: Visibility,
    pub created_at: GameTime,
    pub payload: Vec<u8>,
}

/// Per-entity ordered log of outward-visible state changes. Sequence numbers
/// are strictly increasing and gap-free from the entity's creation to its
/// destruction, across any number of authority transfers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventHistory {
    events: VecDeque<HistoryEvent>,
    next_seq: HistorySeq,
}

impl EventHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event and returns its sequence number.
    pub fn add(&mut self, visibility: Visibility, payload: Vec<u8>, now: GameTime) -> HistorySeq {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push_back(HistoryEvent {
            seq,
            visibility,
            created_at: now,
            payload,
        });
        seq
    }

    pub fn next_seq(&self) -> HistorySeq {
        self.next_seq
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sequence number of the oldest event still retained. Equal to
    /// [`Self::next_seq`] when the log is empty.
    pub fn oldest_retained(&self) -> HistorySeq {
        self.events.front().map_or(self.next_seq, |event| event.seq)
    }

    /// Drops events older than `retention_ticks`. Events at or past `floor`
    /// are never removed, so a still-subscribed observer that has
    /// acknowledged up to `floor` cannot see a gap without an explicit
    /// resync. Returns how many events were removed.
    pub fn trim(
        &mut self,
        now: GameTime,
        retention_ticks: GameTime,
        floor: Option<HistorySeq>,
    ) -> usize {
        let mut removed = 0;
        while let Some(front) = self.events.front() {
            if now.saturating_sub(front.created_at) < retention_ticks {
                break;
            }
            if let Some(floor) = floor {
                if front.seq >= floor {
                    break;
                }
            }
            self.events.pop_front();
            removed += 1;
        }
        removed
    }

    /// Replays all retained events starting at `seq`, oldest first. Fails
    /// explicitly if `seq` was already trimmed (the caller must resync) or
    /// has not been issued yet.
    pub fn replay_from(&self, seq: HistorySeq) -> Result<Vec<&HistoryEvent>, HistoryError> {
        if seq > self.next_seq {
            return Err(HistoryError::AheadOfHistory {
                requested: seq,
                next: self.next_seq,
            });
        }
        let oldest = self.oldest_retained();
        if seq < oldest {
            return Err(HistoryError::AlreadyTrimmed {
                requested: seq,
                oldest,
            });
        }
        Ok(self
            .events
            .iter()
            .skip((seq - oldest) as usize)
            .collect())
    }

    /// All retained events, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &HistoryEvent> {
        self.events.iter()
    }
}
