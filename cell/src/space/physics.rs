use glam::Vec3;

use crate::space::chunk::{ChunkGraph, ChunkId};

/// Slack added to the speed check so float rounding never rejects a move
/// that is exactly at the limit.
const SPEED_EPSILON: f32 = 1e-3;

/// Outcome of validating one requested move
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MoveVerdict {
    Accepted,
    /// The implied speed exceeds the entity's top speed even after spending
    /// the accumulated jitter-debt credit.
    RejectedSpeed { implied_speed: f32, limit: f32 },
    /// The straight-line path cannot be justified by a chain of permissive
    /// portal crossings.
    RejectedPath,
    /// A previous correction has not been acknowledged yet; the move is
    /// ignored outright.
    CorrectionPending,
}

impl MoveVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Validates that moving from `from` to `to` in `elapsed_seconds` is
/// physically possible: the implied speed (minus the jitter-debt credit)
/// must not exceed `top_speed`, and the straight-line path must be
/// justifiable through permissive portals. Positions are in the frame the
/// caller validates in (vehicle-local for passengers).
///
/// On rejection the caller is expected to issue a correction back to the
/// move's requester, never to silently teleport.
pub fn physically_possible(
    graph: &ChunkGraph,
    from_chunk: ChunkId,
    from: Vec3,
    to: Vec3,
    elapsed_seconds: f32,
    top_speed: f32,
    jitter_credit_seconds: f32,
) -> MoveVerdict {
    let distance = from.distance(to);
    let budget_seconds = (elapsed_seconds + jitter_credit_seconds).max(0.0);
    let allowed = budget_seconds * top_speed;
    if distance > allowed + SPEED_EPSILON {
        let implied_speed = if elapsed_seconds > 0.0 {
            distance / elapsed_seconds
        } else {
            f32::INFINITY
        };
        return MoveVerdict::RejectedSpeed {
            implied_speed,
            limit: top_speed,
        };
    }

    if !graph.segment_justified(from_chunk, from, to) {
        return MoveVerdict::RejectedPath;
    }

    MoveVerdict::Accepted
}

/// Updates the jitter-debt credit after an accepted move: slack accrues when
/// the entity moved slower than its limit and is spent by bursts, clamped to
/// `[0, allowance]`.
pub fn settle_jitter_debt(
    debt_seconds: f32,
    elapsed_seconds: f32,
    distance: f32,
    top_speed: f32,
    allowance_seconds: f32,
) -> f32 {
    let spent = if top_speed > 0.0 {
        distance / top_speed
    } else {
        0.0
    };
    (debt_seconds + elapsed_seconds - spent).clamp(0.0, allowance_seconds)
}
