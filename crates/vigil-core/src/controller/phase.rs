//! Invocation phase machine

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::ReconcileError;

/// Where an invocation is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Scanning,
    Resolving,
    Persisting,
    Notifying,
    Deciding,
    Chaining,
    Done,
    Aborted,
}

impl Phase {
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        allowed_transitions(self).is_empty()
    }
}

/// Phases reachable from `from`
#[must_use]
pub fn allowed_transitions(from: Phase) -> &'static [Phase] {
    use Phase::{Aborted, Chaining, Deciding, Done, Idle, Notifying, Persisting, Resolving, Scanning};
    match from {
        Idle => &[Scanning, Deciding, Aborted],
        Scanning => &[Resolving, Deciding, Aborted],
        Resolving => &[Persisting, Aborted],
        Persisting => &[Notifying, Scanning, Deciding, Aborted],
        Notifying => &[Scanning, Deciding, Aborted],
        Deciding => &[Chaining, Done, Aborted],
        Chaining | Done | Aborted => &[],
    }
}

/// Validate a single transition
///
/// # Errors
/// Returns [`ReconcileError::IllegalTransition`] if `to` is not reachable.
pub fn validate_transition(from: Phase, to: Phase) -> Result<(), ReconcileError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ReconcileError::IllegalTransition { from, to })
    }
}

/// Current phase plus the path taken to reach it
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: Phase,
    trail: Vec<Phase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            current: Phase::Idle,
            trail: vec![Phase::Idle],
        }
    }
}

impl PhaseTracker {
    /// Move to `to`; a no-op if already there
    ///
    /// # Errors
    /// Returns [`ReconcileError::IllegalTransition`] if the move is not allowed.
    pub fn advance(&mut self, to: Phase) -> Result<(), ReconcileError> {
        if self.current == to {
            return Ok(());
        }
        validate_transition(self.current, to)?;
        trace!(from = ?self.current, ?to, "phase");
        self.current = to;
        self.trail.push(to);
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn current(&self) -> Phase {
        self.current
    }

    #[must_use]
    pub fn trail(&self) -> &[Phase] {
        &self.trail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut tracker = PhaseTracker::default();
        for phase in [
            Phase::Scanning,
            Phase::Resolving,
            Phase::Persisting,
            Phase::Notifying,
            Phase::Scanning,
            Phase::Deciding,
            Phase::Chaining,
        ] {
            tracker.advance(phase).unwrap();
        }
        assert!(tracker.current().is_terminal());
        assert_eq!(tracker.trail().len(), 8);
    }

    #[test]
    fn cannot_skip_persistence() {
        assert!(matches!(
            validate_transition(Phase::Resolving, Phase::Notifying),
            Err(ReconcileError::IllegalTransition {
                from: Phase::Resolving,
                to: Phase::Notifying
            })
        ));
    }

    #[test]
    fn every_live_phase_can_abort() {
        for phase in [
            Phase::Idle,
            Phase::Scanning,
            Phase::Resolving,
            Phase::Persisting,
            Phase::Notifying,
            Phase::Deciding,
        ] {
            assert!(validate_transition(phase, Phase::Aborted).is_ok(), "{phase:?}");
        }
    }

    #[test]
    fn abort_after_announcing_partial_commits() {
        let mut tracker = PhaseTracker::default();
        for phase in [
            Phase::Scanning,
            Phase::Resolving,
            Phase::Persisting,
            Phase::Notifying,
            Phase::Aborted,
        ] {
            tracker.advance(phase).unwrap();
        }
        assert_eq!(tracker.trail().last(), Some(&Phase::Aborted));
    }

    #[test]
    fn terminal_phases_are_final() {
        for phase in [Phase::Chaining, Phase::Done, Phase::Aborted] {
            assert!(phase.is_terminal());
            assert!(validate_transition(phase, Phase::Scanning).is_err());
        }
    }

    #[test]
    fn repeated_phase_is_noop() {
        let mut tracker = PhaseTracker::default();
        tracker.advance(Phase::Scanning).unwrap();
        tracker.advance(Phase::Scanning).unwrap();
        assert_eq!(tracker.trail(), &[Phase::Idle, Phase::Scanning]);
    }
}
