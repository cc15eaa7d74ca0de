//! Correction loop state machine: explicit states and legal transition guards.
//!
//! Gives the propose→execute→retry cycle a typed state model so that:
//! 1. Every state transition is auditable and logged.
//! 2. Illegal transitions are rejected by `advance()`.
//! 3. A run report can replay the exact sequence of states.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// States of one correction-loop run.
///
/// Every run starts at `Ready` and terminates at either `Succeeded` or
/// `Exhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Task accepted, no attempt made yet.
    Ready,
    /// Building the context bundle and calling the generation step.
    Generating,
    /// Judging the candidate (sandbox run or document validation).
    Executing,
    /// Last attempt failed and budget remains.
    Retrying,
    /// A candidate was accepted (terminal).
    Succeeded,
    /// Budget spent without an accepted candidate (terminal).
    Exhausted,
}

impl LoopState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Generating => write!(f, "Generating"),
            Self::Executing => write!(f, "Executing"),
            Self::Retrying => write!(f, "Retrying"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Exhausted => write!(f, "Exhausted"),
        }
    }
}

/// Legal transitions between loop states.
///
/// ```text
/// Ready      → Generating
/// Generating → Executing | Retrying | Exhausted   (generation failure skips Executing)
/// Executing  → Succeeded | Retrying | Exhausted
/// Retrying   → Generating
/// ```
fn is_legal_transition(from: LoopState, to: LoopState) -> bool {
    use LoopState::*;

    matches!(
        (from, to),
        (Ready, Generating)
            | (Generating, Executing)
            | (Generating, Retrying)
            | (Generating, Exhausted)
            | (Executing, Succeeded)
            | (Executing, Retrying)
            | (Executing, Exhausted)
            | (Retrying, Generating)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// The state transitioned from.
    pub from: LoopState,
    /// The state transitioned to.
    pub to: LoopState,
    /// Attempt number at the time of transition (0 before the first attempt).
    pub attempt: u32,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    /// Optional context about why this transition happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: LoopState,
    pub to: LoopState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// The loop state machine.
///
/// Tracks the current state and attempt counter, enforces legal
/// transitions, and keeps a log of all transitions.
pub struct StateMachine {
    current: LoopState,
    attempt: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    /// Create a new state machine at `Ready` with attempt counter 0.
    pub fn new() -> Self {
        Self {
            current: LoopState::Ready,
            attempt: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> LoopState {
        self.current
    }

    /// Attempts started so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Attempt to advance to the next state.
    ///
    /// Entering `Generating` increments the attempt counter.
    pub fn advance(
        &mut self,
        to: LoopState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        if to == LoopState::Generating {
            self.attempt += 1;
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            attempt: self.attempt,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(
            from = %self.current,
            to = %to,
            attempt = self.attempt,
            "State transition"
        );

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Get the full transition log.
    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Consume the machine, keeping only its log.
    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    /// Get a summary string of the state machine's history.
    pub fn summary(&self) -> String {
        format!(
            "{} → {} ({} attempt(s), {} transitions)",
            LoopState::Ready,
            self.current,
            self.attempt,
            self.transitions.len(),
        )
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let sm = StateMachine::new();
        assert_eq!(sm.current(), LoopState::Ready);
        assert_eq!(sm.attempt(), 0);
        assert!(!sm.is_terminal());
        assert!(sm.transitions().is_empty());
    }

    #[test]
    fn test_first_try_success() {
        let mut sm = StateMachine::new();
        sm.advance(LoopState::Generating, None).unwrap();
        sm.advance(LoopState::Executing, None).unwrap();
        sm.advance(LoopState::Succeeded, None).unwrap();

        assert!(sm.is_terminal());
        assert_eq!(sm.attempt(), 1);
        assert_eq!(sm.transitions().len(), 3);
    }

    #[test]
    fn test_retry_increments_attempt() {
        let mut sm = StateMachine::new();
        sm.advance(LoopState::Generating, None).unwrap();
        sm.advance(LoopState::Executing, None).unwrap();
        sm.advance(LoopState::Retrying, Some("runtime")).unwrap();
        sm.advance(LoopState::Generating, None).unwrap();
        assert_eq!(sm.attempt(), 2);
        sm.advance(LoopState::Executing, None).unwrap();
        sm.advance(LoopState::Exhausted, Some("budget spent")).unwrap();
        assert!(sm.is_terminal());
    }

    #[test]
    fn test_generation_failure_skips_executing() {
        let mut sm = StateMachine::new();
        sm.advance(LoopState::Generating, None).unwrap();
        sm.advance(LoopState::Retrying, Some("generation-error")).unwrap();
        sm.advance(LoopState::Generating, None).unwrap();
        sm.advance(LoopState::Exhausted, Some("generation-error")).unwrap();
        assert_eq!(sm.attempt(), 2);
    }

    #[test]
    fn test_cannot_leave_terminal() {
        let mut sm = StateMachine::new();
        sm.advance(LoopState::Generating, None).unwrap();
        sm.advance(LoopState::Executing, None).unwrap();
        sm.advance(LoopState::Succeeded, None).unwrap();

        let err = sm.advance(LoopState::Generating, None).unwrap_err();
        assert_eq!(err.from, LoopState::Succeeded);
        assert_eq!(err.to, LoopState::Generating);
        assert_eq!(sm.attempt(), 1);
    }

    #[test]
    fn test_cannot_skip_generation() {
        let mut sm = StateMachine::new();
        assert!(sm.advance(LoopState::Executing, None).is_err());
        assert!(sm.advance(LoopState::Succeeded, None).is_err());
    }

    #[test]
    fn test_retry_cannot_succeed_directly() {
        let mut sm = StateMachine::new();
        sm.advance(LoopState::Generating, None).unwrap();
        sm.advance(LoopState::Executing, None).unwrap();
        sm.advance(LoopState::Retrying, None).unwrap();
        assert!(sm.advance(LoopState::Succeeded, None).is_err());
    }

    #[test]
    fn test_transition_record_has_reason() {
        let mut sm = StateMachine::new();
        sm.advance(LoopState::Generating, Some("first attempt"))
            .unwrap();
        let record = &sm.transitions()[0];
        assert_eq!(record.from, LoopState::Ready);
        assert_eq!(record.to, LoopState::Generating);
        assert_eq!(record.attempt, 1);
        assert_eq!(record.reason.as_deref(), Some("first attempt"));
    }

    #[test]
    fn test_summary() {
        let mut sm = StateMachine::new();
        sm.advance(LoopState::Generating, None).unwrap();
        sm.advance(LoopState::Exhausted, None).unwrap();
        let summary = sm.summary();
        assert!(summary.contains("Exhausted"));
        assert!(summary.contains("2 transitions"));
    }
}
