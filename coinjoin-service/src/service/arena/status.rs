use coinjoin_core::domain::{EndRoundState, Phase, Round, RoundParameters};
use coinjoin_core::foundation::RoundId;
use serde::{Deserialize, Serialize};

/// Immutable per-round view rebuilt at the end of every tick. This snapshot
/// is the only round state clients may read without going through an Arena
/// operation, so status polls never observe a half-updated round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundState {
    pub round_id: RoundId,
    pub phase: Phase,
    pub end_state: Option<EndRoundState>,
    pub is_blame_round: bool,
    pub blame_of: Option<RoundId>,
    pub input_count: usize,
    pub output_count: usize,
    pub parameters: RoundParameters,
    pub created_at_nanos: u64,
    /// Start timestamp of every phase entered so far, in transition order.
    pub phase_history: Vec<(Phase, u64)>,
    /// End of the current phase's time frame (grace included).
    pub phase_deadline_nanos: u64,
    /// Monotonic checkpoint; bumps on every round mutation.
    pub state_id: u64,
}

impl RoundState {
    pub fn from_round(round: &Round) -> Self {
        Self {
            round_id: round.id(),
            phase: round.phase(),
            end_state: round.end_state(),
            is_blame_round: round.is_blame_round(),
            blame_of: round.blame_of(),
            input_count: round.input_count(),
            output_count: round.bobs().len(),
            parameters: round.parameters.clone(),
            created_at_nanos: round.created_at_nanos(),
            phase_history: round.phase_history().to_vec(),
            phase_deadline_nanos: round.phase_time_frame().end_nanos(),
            state_id: round.state_id(),
        }
    }
}

/// A client's last-seen state id for one round; rounds at or below their
/// checkpoint are omitted from the status reply.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RoundStateCheckpoint {
    pub round_id: RoundId,
    pub state_id: u64,
}
