use std::collections::VecDeque;

use specter_shared::{ControllerId, EntityId, PropertyValue};

use crate::range::TriggerId;

/// The fixed set of lifecycle hooks the core raises toward the behavior
/// layer, plus a generic named invocation for everything the embedder
/// defines itself. The embedder maps these onto whatever scripted callbacks
/// it hosts.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptHook {
    /// A real entity gained (true) or lost (false) its last observer.
    Witnessed(bool),
    EnteringCell,
    EnteredCell,
    LeavingCell,
    LeftCell,
    TeleportSuccess { nearby: Option<EntityId> },
    TeleportFailure,
    GhostCreated,
    GhostDestroyed,
    TriggerEntered { trigger: TriggerId, other: EntityId },
    TriggerLeft { trigger: TriggerId, other: EntityId },
    ControllerComplete { controller: ControllerId },
    TimerFired { controller: ControllerId, user_arg: i32 },
    /// An embedder-defined hook invoked by name.
    Named {
        name: String,
        args: Vec<PropertyValue>,
    },
}

/// The scripting-callback dispatcher collaborator. Invocations arrive only
/// through [`DeferredCallbacks`], never in the middle of a structural
/// mutation.
pub trait ScriptDispatcher {
    fn invoke(&mut self, entity: EntityId, hook: ScriptHook);
}

/// Deferred-callback queue bracketing structural mutations. While at least
/// one structural section is open, hooks are queued instead of invoked; they
/// replay in original call order once the last section closes.
///
/// One queue serves the whole cell: this preserves each entity's own callback
/// order and the cross-entity call order at the same time.
#[derive(Default)]
pub struct DeferredCallbacks {
    structural_depth: u32,
    pending: VecDeque<(EntityId, ScriptHook)>,
}

impl DeferredCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a structural section. Sections nest.
    pub fn begin_structural(&mut self) {
        self.structural_depth += 1;
    }

    /// Closes a structural section; when the outermost section closes, every
    /// queued hook is replayed in order.
    pub fn end_structural(&mut self, scripts: &mut dyn ScriptDispatcher) {
        debug_assert!(self.structural_depth > 0);
        self.structural_depth = self.structural_depth.saturating_sub(1);
        if self.structural_depth == 0 {
            while let Some((entity, hook)) = self.pending.pop_front() {
                scripts.invoke(entity, hook);
            }
        }
    }

    /// Queues a hook for replay at the end of the current structural
    /// section. Only valid while one is open.
    pub fn queue(&mut self, entity: EntityId, hook: ScriptHook) {
        debug_assert!(self.structural_depth > 0);
        self.pending.push_back((entity, hook));
    }

    /// Invokes the hook now, or queues it if a structural section is open.
    pub fn dispatch(
        &mut self,
        scripts: &mut dyn ScriptDispatcher,
        entity: EntityId,
        hook: ScriptHook,
    ) {
        if self.structural_depth > 0 {
            self.pending.push_back((entity, hook));
        } else {
            scripts.invoke(entity, hook);
        }
    }

    pub fn is_restricted(&self) -> bool {
        self.structural_depth > 0
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
