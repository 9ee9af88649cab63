use std::net::SocketAddr;

use specter_shared::CellAddr;

/// A client-observation handle: the channel of the client currently
/// witnessing this entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Witness {
    pub client: SocketAddr,
}

/// State that exists only on the cell owning an entity's authoritative copy:
/// the set of cells holding a ghost of it, the observation handle, and the
/// client-movement validation bookkeeping.
#[derive(Clone, Debug)]
pub struct RealAuthority {
    haunts: Vec<CellAddr>,
    pub witness: Option<Witness>,
    /// Corrections sent to the client and not yet acknowledged. Moves are
    /// ignored while this is non-zero.
    pub corrections_outstanding: u32,
    /// Simulated-seconds timestamp of the last validated client move.
    pub last_validated_seconds: f64,
    /// Accumulated movement slack, in seconds. See the physics validator.
    pub jitter_debt_seconds: f32,
}

impl RealAuthority {
    pub fn new(now_seconds: f64) -> Self {
        Self {
            haunts: Vec::new(),
            witness: None,
            corrections_outstanding: 0,
            last_validated_seconds: now_seconds,
            jitter_debt_seconds: 0.0,
        }
    }

    /// Registers a cell as holding a ghost of this entity. Returns false if
    /// it already was one.
    pub fn add_haunt(&mut self, addr: CellAddr) -> bool {
        if self.haunts.contains(&addr) {
            return false;
        }
        self.haunts.push(addr);
        true
    }

    /// Returns whether the cell was a haunt.
    pub fn remove_haunt(&mut self, addr: CellAddr) -> bool {
        let before = self.haunts.len();
        self.haunts.retain(|haunt| *haunt != addr);
        self.haunts.len() != before
    }

    pub fn has_haunt(&self, addr: CellAddr) -> bool {
        self.haunts.contains(&addr)
    }

    pub fn haunts(&self) -> &[CellAddr] {
        &self.haunts
    }

    pub fn haunt_count(&self) -> usize {
        self.haunts.len()
    }

    pub(crate) fn set_haunts(&mut self, haunts: Vec<CellAddr>) {
        self.haunts = haunts;
    }
}
