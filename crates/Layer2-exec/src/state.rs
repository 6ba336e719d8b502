//! Exec state machine
//!
//! `Created → Running → {Complete, Error}`. A restored exec may begin in
//! `Running` (its container is still alive) or directly in a terminal state.

use serde::{Deserialize, Serialize};

/// Possible states of an exec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecState {
    /// Admitted; the container has not been started yet
    Created,

    /// The container runtime acknowledged start (or the intern is walking)
    Running,

    /// Finished; the result carries no task error
    Complete,

    /// Finished; the result carries the task error
    Error,
}

impl ExecState {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecState::Complete | ExecState::Error)
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: ExecState) -> bool {
        match (self, next) {
            (ExecState::Created, ExecState::Running) => true,
            (ExecState::Created | ExecState::Running, ExecState::Complete | ExecState::Error) => {
                true
            }
            _ => false,
        }
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            ExecState::Created => "Created",
            ExecState::Running => "Running",
            ExecState::Complete => "Complete",
            ExecState::Error => "Error",
        }
    }

    /// Get a symbol for the state
    pub fn symbol(&self) -> &'static str {
        match self {
            ExecState::Created => "◯",
            ExecState::Running => "⟳",
            ExecState::Complete => "✓",
            ExecState::Error => "✗",
        }
    }
}

impl std::fmt::Display for ExecState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ExecState::Created.is_terminal());
        assert!(!ExecState::Running.is_terminal());
        assert!(ExecState::Complete.is_terminal());
        assert!(ExecState::Error.is_terminal());
    }

    #[test]
    fn test_transitions() {
        assert!(ExecState::Created.can_transition_to(ExecState::Running));
        assert!(ExecState::Created.can_transition_to(ExecState::Error));
        assert!(ExecState::Running.can_transition_to(ExecState::Complete));
        assert!(!ExecState::Complete.can_transition_to(ExecState::Error));
        assert!(!ExecState::Error.can_transition_to(ExecState::Running));
        assert!(!ExecState::Running.can_transition_to(ExecState::Created));
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&ExecState::Complete).unwrap(),
            "\"complete\""
        );
        let s: ExecState = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(s, ExecState::Running);
    }
}
