//! Lifecycle state of an offscreen session.

use std::fmt;

/// `Uninitialized -> Configured -> Destroyed`, no skipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Configured,
    /// Terminal.
    Destroyed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Configured => "configured",
            SessionState::Destroyed => "destroyed",
        })
    }
}
