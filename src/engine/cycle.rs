//! engine::cycle
//!
//! The apply cycle state machine.
//!
//! ```text
//! Idle -> Loaded -> Mutated -> Committing -> Applied
//!            ^                     |
//!            +------- retry -------+
//!
//! Mutated -> Applied        (mutation changed nothing, no commit)
//! any non-terminal -> Aborted
//! ```
//!
//! A [`Cycle`] only tracks where an apply is; the engine drives it. An
//! illegal transition is a bug in the engine and is reported as
//! [`InvalidTransition`] rather than a panic.

use thiserror::Error;
use tracing::debug;

/// The phase of one apply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Loaded,
    Mutated,
    Committing,
    Applied,
    Aborted,
}

impl CycleState {
    /// Whether the cycle has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, CycleState::Applied | CycleState::Aborted)
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: CycleState) -> bool {
        use CycleState::*;
        match (self, next) {
            (Idle, Loaded)
            | (Loaded, Mutated)
            | (Mutated, Committing)
            | (Mutated, Applied)
            | (Committing, Applied)
            | (Committing, Loaded) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Loaded => "loaded",
            CycleState::Mutated => "mutated",
            CycleState::Committing => "committing",
            CycleState::Applied => "applied",
            CycleState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid cycle transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: CycleState,
    pub to: CycleState,
}

/// Tracks one apply from `Idle` to a terminal state.
#[derive(Debug)]
pub struct Cycle {
    state: CycleState,
    attempt: u32,
}

impl Default for Cycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Cycle {
    pub fn new() -> Self {
        Self {
            state: CycleState::Idle,
            attempt: 0,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// The current attempt, counting from 1 once the first load happened.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Move to `next`.
    ///
    /// Entering `Loaded` starts a new attempt.
    pub fn advance(&mut self, next: CycleState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        if next == CycleState::Loaded {
            self.attempt += 1;
        }
        debug!(from = %self.state, to = %next, attempt = self.attempt, "cycle transition");
        self.state = next;
        Ok(())
    }

    /// Move to `Aborted` unless already finished.
    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            debug!(from = %self.state, attempt = self.attempt, "cycle aborted");
            self.state = CycleState::Aborted;
        }
    }
}
