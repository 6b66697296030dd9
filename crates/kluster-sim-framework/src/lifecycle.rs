//! Simulator lifecycle state machine.
//!
//! ```text
//!   ┌─────────────┐  init the world  ┌──────────────────┐
//!   │ Constructed │─────────────────▶│ WorldInitialized │◀─┐
//!   └──────┬──────┘                  └────────┬─────────┘──┘
//!          │ run                              │ run
//!          ▼                                  ▼
//!   ┌─────────────────────────────────────────────────────┐
//!   │                       Running                       │
//!   └──────────────────────────┬──────────────────────────┘
//!                              │ stop (from any state)
//!                              ▼
//!                        ┌───────────┐
//!                        │  Stopped  │
//!                        └───────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimulatorError};

/// Where a simulator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulatorState {
    /// Built; the isolated store is empty or holds explicitly created pods.
    Constructed,
    /// The world has been loaded into the isolated store.
    WorldInitialized,
    /// The scheduler is running.
    Running,
    /// Stopped; lifecycle signals are released.
    Stopped,
}

impl fmt::Display for SimulatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Constructed => "constructed",
            Self::WorldInitialized => "world-initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
        })
    }
}

/// Check whether a transition is allowed.
#[must_use]
pub const fn is_valid_transition(from: SimulatorState, to: SimulatorState) -> bool {
    use SimulatorState::{Constructed, Running, Stopped, WorldInitialized};

    matches!(
        (from, to),
        (Constructed | WorldInitialized, WorldInitialized | Running)
            | (Constructed | WorldInitialized | Running, Stopped)
    )
}

/// Validate a transition and return the target state.
///
/// # Errors
///
/// Returns `SimulatorError::InvalidTransition` if the transition is not
/// allowed.
pub fn validate_transition(from: SimulatorState, to: SimulatorState) -> Result<SimulatorState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(SimulatorError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SimulatorState::{Constructed, Running, Stopped, WorldInitialized};

    #[test]
    fn forward_transitions() {
        assert!(is_valid_transition(Constructed, WorldInitialized));
        assert!(is_valid_transition(WorldInitialized, WorldInitialized));
        assert!(is_valid_transition(Constructed, Running));
        assert!(is_valid_transition(WorldInitialized, Running));
        assert!(is_valid_transition(Running, Stopped));
        assert!(is_valid_transition(Constructed, Stopped));
    }

    #[test]
    fn no_way_back() {
        assert!(!is_valid_transition(Running, WorldInitialized));
        assert!(!is_valid_transition(Running, Running));
        assert!(!is_valid_transition(Stopped, Running));
        assert!(!is_valid_transition(Stopped, Stopped));
        assert!(matches!(
            validate_transition(Stopped, WorldInitialized),
            Err(SimulatorError::InvalidTransition { .. })
        ));
    }
}
