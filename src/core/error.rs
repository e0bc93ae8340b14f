//! Errors surfaced by the processing pipeline.

use crate::state::StateError;

/// Why a reading could not be processed.
///
/// Out-of-order readings are not errors; they come back as
/// [`Outcome::Dropped`](super::Outcome::Dropped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// The reading itself is unusable (bad timestamp, missing field, bad value).
    MalformedInput(String),
    /// The feed's state could not be reached.
    StateUnavailable(String),
}

impl ProcessError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ProcessError::MalformedInput(msg.into())
    }
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::MalformedInput(e) => write!(f, "Malformed input: {e}"),
            ProcessError::StateUnavailable(e) => write!(f, "State unavailable: {e}"),
        }
    }
}

impl std::error::Error for ProcessError {}

impl From<StateError> for ProcessError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Unavailable(e) | StateError::Io(e) => ProcessError::StateUnavailable(e),
        }
    }
}
