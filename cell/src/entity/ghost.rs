use specter_shared::{CellAddr, Generation};

/// What to do with an inbound ghost-targeted message given its generation
/// tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Apply,
    /// The message belongs to a future ownership lifespan; hold it until the
    /// expected generation becomes current.
    Buffer,
    /// The message belongs to a past lifespan and must never be applied.
    DiscardStale,
}

/// State that exists only on cells holding a non-authoritative mirror: the
/// current owner's address and, during a handoff, the announced next owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GhostAuthority {
    pub owner: CellAddr,
    pub pending_owner: Option<CellAddr>,
}

impl GhostAuthority {
    pub fn new(owner: CellAddr) -> Self {
        Self {
            owner,
            pending_owner: None,
        }
    }

    /// Classifies a message by its generation tag. Steady-state messages
    /// must carry the current generation; lifecycle messages (handoff,
    /// set-next-real, set-real) begin the next lifespan and must carry
    /// `current + 1`. Anything later is buffered, anything earlier is
    /// stale.
    pub fn disposition(
        current_generation: Generation,
        message_generation: Generation,
        is_lifecycle: bool,
    ) -> Disposition {
        let expected = if is_lifecycle {
            current_generation + 1
        } else {
            current_generation
        };
        if message_generation == expected {
            Disposition::Apply
        } else if message_generation > expected {
            Disposition::Buffer
        } else {
            Disposition::DiscardStale
        }
    }

    /// The address steady-state messages are expected from.
    pub fn authoritative_addr(&self) -> CellAddr {
        self.owner
    }

    /// The address whose death makes this ghost a zombie candidate: the
    /// pending owner when a handoff is in flight, otherwise the owner.
    pub fn watch_addr(&self) -> CellAddr {
        self.pending_owner.unwrap_or(self.owner)
    }
}
