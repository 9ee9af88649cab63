use specter_shared::GameTime;

/// Contains Config properties which will be used by a cell process
#[derive(Clone, Debug)]
pub struct CellConfig {
    /// Simulated seconds covered by one tick.
    pub tick_seconds: f64,
    /// How long history events are retained before the trim cycle may drop
    /// them, in ticks.
    pub history_retention_ticks: GameTime,
    /// How often the witness/trim cycle runs, in ticks. One cycle equals one
    /// "period" of witness bookkeeping.
    pub trim_interval_ticks: GameTime,
    /// Number of witness-less trim periods after which a real entity probes
    /// its ghosts with a check-witnessed message.
    pub witness_probe_periods: u32,
    /// Number of witness-less trim periods after which `onWitnessed(false)`
    /// fires, exactly once per transition.
    pub witness_terminal_periods: u32,
    /// How often the proximity index verifies that both axis orders are
    /// still sorted, in ticks.
    pub proximity_check_interval_ticks: GameTime,
    /// Maximum accumulated jitter-debt credit, in seconds. Clients get this
    /// much slack before a burst of movement is declared impossible.
    pub jitter_allowance_seconds: f32,
    /// How long released entity ids and controller keys sit in quarantine
    /// before they may be reissued, in ticks.
    pub id_quarantine_ticks: GameTime,
    /// Radius used to pick the `nearby` entity reported by the
    /// teleport-success hook.
    pub teleport_nearby_radius: f32,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 0.1,
            history_retention_ticks: 600,
            trim_interval_ticks: 10,
            witness_probe_periods: 2,
            witness_terminal_periods: 3,
            proximity_check_interval_ticks: 256,
            jitter_allowance_seconds: 0.25,
            id_quarantine_ticks: 600,
            teleport_nearby_radius: 50.0,
        }
    }
}
