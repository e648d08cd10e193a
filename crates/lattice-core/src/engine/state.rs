use std::fmt;

/// Why an expansion stopped. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A round accepted no more than `min_accept_count` particles: the lattice edge was reached.
    LowYield { round: usize, accepted: usize },
    /// `max_rounds` rounds have completed.
    MaxRounds,
    /// The caller asked the engine to stop between rounds.
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::LowYield { round, accepted } => write!(
                f,
                "low yield in round {} ({} particle(s) accepted)",
                round, accepted
            ),
            StopReason::MaxRounds => write!(f, "maximum number of rounds reached"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-tomogram state machine of the expansion engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Init,
    RoundRunning { index: usize },
    Continue { next_index: usize },
    Stopped(StopReason),
}
