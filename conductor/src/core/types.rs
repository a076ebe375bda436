//! Shared deterministic types for conductor core logic.
//!
//! These types define stable contracts between core components and the
//! controller. They do not depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::phase::Phase;

/// Terminal failure classification of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// The response broke the phase grammar and could not be regenerated.
    InvalidTagsExceeded,
    /// Successive turns repeated the same (phase, effective tags) pair.
    NoProgress,
    /// The attempt budget ran out.
    MaxRetriesExceeded,
    /// The producer failed in a way retrying cannot fix.
    ExternalCallError,
}

impl FailureCode {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCode::InvalidTagsExceeded => "INVALID_TAGS_EXCEEDED",
            FailureCode::NoProgress => "NO_PROGRESS",
            FailureCode::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            FailureCode::ExternalCallError => "EXTERNAL_CALL_ERROR",
        }
    }

    /// Trigger label recorded on the `ERROR` transition.
    pub fn trigger(self) -> &'static str {
        match self {
            FailureCode::InvalidTagsExceeded => "invalid_response",
            FailureCode::NoProgress => "no_progress",
            FailureCode::MaxRetriesExceeded => "max_retries",
            FailureCode::ExternalCallError => "external_call_error",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminated result of one `process_turn` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The turn committed; carries the phase after the turn.
    Success(Phase),
    /// The conversation moved to `ERROR` for the given reason.
    Failure(FailureCode),
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TurnOutcome::Success(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_codes_serialize_as_labels() {
        let json = serde_json::to_string(&FailureCode::MaxRetriesExceeded).expect("json");
        assert_eq!(json, "\"MAX_RETRIES_EXCEEDED\"");
        assert_eq!(FailureCode::NoProgress.to_string(), "NO_PROGRESS");
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_string(&TurnOutcome::Success(Phase::Modifying)).expect("json");
        assert_eq!(json, r#"{"outcome":"success","value":"MODIFYING"}"#);
        let json =
            serde_json::to_string(&TurnOutcome::Failure(FailureCode::NoProgress)).expect("json");
        assert_eq!(json, r#"{"outcome":"failure","value":"NO_PROGRESS"}"#);
    }
}
