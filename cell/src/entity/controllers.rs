use glam::Vec3;
use serde::{Deserialize, Serialize};

use specter_shared::{
    decode_section, encode_section, ControllerId, GameTime, KeyGenerator, MessageError,
};

/// Exclusive controller categories: at most one controller of a category may
/// be attached at a time; attaching a second implicitly removes the first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerCategory {
    Movement,
    Vision,
}

/// Walks the entity toward a destination point, then completes. Real-only:
/// its effects are not assumed persistent across handoffs, so the next owner
/// restarts it from the streamed parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoveToPoint {
    pub destination: Vec3,
    pub velocity: f32,
    pub face_movement: bool,
}

/// A vision cone mirrored onto ghosts so neighboring cells can answer
/// can-see queries locally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisionCone {
    pub radius: f32,
    pub field_of_view: f32,
}

/// Fires a timer hook after an interval, optionally repeating. Real-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickTimer {
    pub interval_ticks: GameTime,
    pub next_fire: GameTime,
    pub repeating: bool,
}

/// Tagged variant over every controller kind, with the small capability
/// surface the replication layer needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ControllerKind {
    MoveToPoint(MoveToPoint),
    VisionCone(VisionCone),
    TickTimer(TickTimer),
}

impl ControllerKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::MoveToPoint(_) => "MoveToPoint",
            Self::VisionCone(_) => "VisionCone",
            Self::TickTimer(_) => "TickTimer",
        }
    }

    pub fn category(&self) -> Option<ControllerCategory> {
        match self {
            Self::MoveToPoint(_) => Some(ControllerCategory::Movement),
            Self::VisionCone(_) => Some(ControllerCategory::Vision),
            Self::TickTimer(_) => None,
        }
    }

    /// Called when the controller starts (or restarts) running on a real
    /// copy.
    pub fn start_real(&mut self, now: GameTime) {
        if let Self::TickTimer(timer) = self {
            timer.next_fire = now + timer.interval_ticks;
        }
    }

    /// Called before the controller stops running on a real copy.
    pub fn stop_real(&mut self) {}

    /// The lightweight ghost-side mirror of this controller's state, or
    /// `None` for purely-real kinds.
    pub fn write_ghost_state(&self) -> Result<Option<Vec<u8>>, MessageError> {
        match self {
            Self::VisionCone(cone) => Ok(Some(encode_section(cone)?)),
            Self::MoveToPoint(_) | Self::TickTimer(_) => Ok(None),
        }
    }

    /// Applies a ghost-state update produced by [`Self::write_ghost_state`].
    pub fn read_ghost_state(&mut self, bytes: &[u8]) -> Result<(), MessageError> {
        if let Self::VisionCone(cone) = self {
            *cone = decode_section(bytes)?;
        }
        Ok(())
    }

    pub fn has_ghost_state(&self) -> bool {
        matches!(self, Self::VisionCone(_))
    }
}

/// One attached controller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControllerEntry {
    pub id: ControllerId,
    pub user_arg: i32,
    pub kind: ControllerKind,
}

/// Early-termination signal for [`ControllerSet::visit_all`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

/// The behavior objects attached to one entity, keyed by locally-unique id.
pub struct ControllerSet {
    entries: Vec<ControllerEntry>,
    keys: KeyGenerator<ControllerId>,
}

impl ControllerSet {
    pub fn new(key_quarantine_ticks: GameTime) -> Self {
        Self {
            entries: Vec::new(),
            keys: KeyGenerator::new(key_quarantine_ticks),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attaches a controller. If its category is exclusive and occupied, the
    /// existing controller of that category is removed first and returned.
    pub fn add(
        &mut self,
        kind: ControllerKind,
        user_arg: i32,
        now: GameTime,
    ) -> (ControllerId, Option<ControllerEntry>) {
        let evicted = match kind.category() {
            Some(category) => {
                let existing = self
                    .entries
                    .iter()
                    .position(|entry| entry.kind.category() == Some(category));
                existing.map(|index| {
                    let mut entry = self.entries.remove(index);
                    entry.kind.stop_real();
                    self.keys.recycle_key(entry.id, now);
                    entry
                })
            }
            None => None,
        };

        let id = self.keys.generate(now);
        self.entries.push(ControllerEntry { id, user_arg, kind });
        (id, evicted)
    }

    /// Detaches a controller. Idempotent: removing an unknown id returns
    /// `None` and has no effect.
    pub fn remove(&mut self, id: ControllerId, now: GameTime) -> Option<ControllerEntry> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        let mut entry = self.entries.remove(index);
        entry.kind.stop_real();
        self.keys.recycle_key(id, now);
        Some(entry)
    }

    pub fn get(&self, id: ControllerId) -> Option<&ControllerEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn get_mut(&mut self, id: ControllerId) -> Option<&mut ControllerEntry> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    /// Visits every controller in attach order; stops early when the visitor
    /// returns [`Visit::Stop`].
    pub fn visit_all<F: FnMut(&ControllerEntry) -> Visit>(&self, mut visitor: F) {
        for entry in &self.entries {
            if visitor(entry) == Visit::Stop {
                break;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ControllerEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ControllerEntry> {
        self.entries.iter_mut()
    }

    pub fn ids(&self) -> Vec<ControllerId> {
        self.entries.iter().map(|entry| entry.id).collect()
    }

    /// Serializes every controller (real state) for the handoff stream.
    pub fn write_real_stream(&self) -> Result<Vec<u8>, MessageError> {
        encode_section(&self.entries)
    }

    /// Deserializes a handoff real-state stream.
    pub fn read_real_stream(bytes: &[u8]) -> Result<Vec<ControllerEntry>, MessageError> {
        decode_section(bytes)
    }

    /// Installs an entry carried over by a handoff, keeping fresh key
    /// generation clear of the installed id.
    pub(crate) fn install(&mut self, entry: ControllerEntry) {
        self.keys.skip_past(entry.id);
        self.entries.push(entry);
    }

    /// Serializes the ghost-capable controllers for a create-ghost stream.
    pub fn write_ghost_stream(&self) -> Result<Vec<u8>, MessageError> {
        let mirrored: Vec<&ControllerEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.kind.has_ghost_state())
            .collect();
        encode_section(&mirrored)
    }

    /// Deserializes a create-ghost stream.
    pub fn read_ghost_stream(bytes: &[u8]) -> Result<Vec<ControllerEntry>, MessageError> {
        decode_section(bytes)
    }

    /// Converts the set to its ghost-side shape: purely-real controllers
    /// vanish; the removed entries are returned for teardown bookkeeping.
    pub fn drop_real_only(&mut self, now: GameTime) -> Vec<ControllerEntry> {
        let mut dropped = Vec::new();
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index].kind.has_ghost_state() {
                index += 1;
            } else {
                let mut entry = self.entries.remove(index);
                entry.kind.stop_real();
                self.keys.recycle_key(entry.id, now);
                dropped.push(entry);
            }
        }
        dropped
    }
}
