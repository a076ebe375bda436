//! Phase state machine over a [`ConversationContext`].
//!
//! `transition` is the only way a context changes phase. It is atomic: an
//! illegal target leaves the context untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::phase::Phase;
use crate::core::tags::Tag;
use crate::core::types::FailureCode;

/// Attempted phase change that the transition table forbids.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid phase transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: Phase,
    pub to: Phase,
}

/// Error payload attached to a context while it sits in `ERROR`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: FailureCode,
    pub message: String,
}

/// Optional data recorded with a transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl TransitionExtra {
    pub fn error(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            error: Some(ErrorInfo {
                code,
                message: message.into(),
            }),
            details: Map::new(),
        }
    }

    /// Record the effective tags that drove the transition.
    pub fn with_tags(mut self, tags: &[Tag]) -> Self {
        let literals = tags.iter().map(|tag| Value::String(tag.literal())).collect();
        self.details
            .insert("effective_tags".to_string(), Value::Array(literals));
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// One entry of the append-only transition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    pub trigger: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub extra: TransitionExtra,
}

impl TransitionRecord {
    /// True when either endpoint is a host-internal phase.
    pub fn is_internal(&self) -> bool {
        self.from.is_internal() || self.to.is_internal()
    }
}

/// Per-conversation aggregate persisted after every committed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub current_phase: Phase,
    pub transition_history: Vec<TransitionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub last_updated: DateTime<Utc>,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationContext {
    /// Fresh context in `ANALYSIS` with empty history.
    pub fn new() -> Self {
        Self {
            current_phase: Phase::Analysis,
            transition_history: Vec::new(),
            error: None,
            last_updated: Utc::now(),
        }
    }

    /// History with host-internal transitions filtered out.
    pub fn visible_history(&self) -> Vec<&TransitionRecord> {
        self.transition_history
            .iter()
            .filter(|record| !record.is_internal())
            .collect()
    }

    pub fn last_transition(&self) -> Option<&TransitionRecord> {
        self.transition_history.last()
    }
}

/// Move `context` to `target`, appending a history record.
///
/// Entering `ERROR` attaches `extra.error`; leaving `ERROR` clears it.
pub fn transition(
    context: &mut ConversationContext,
    target: Phase,
    trigger: &str,
    extra: TransitionExtra,
) -> Result<(), TransitionError> {
    let from = context.current_phase;
    if !from.can_transition_to(target) {
        return Err(TransitionError { from, to: target });
    }

    let now = Utc::now();
    if target == Phase::Error {
        context.error = extra.error.clone();
    } else {
        context.error = None;
    }
    context.transition_history.push(TransitionRecord {
        from,
        to: target,
        trigger: trigger.to_string(),
        timestamp: now,
        extra,
    });
    context.current_phase = target;
    context.last_updated = now;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transition_appends_history() {
        let mut ctx = ConversationContext::new();
        transition(&mut ctx, Phase::Modifying, "plan", TransitionExtra::default())
            .expect("legal");
        assert_eq!(ctx.current_phase, Phase::Modifying);
        assert_eq!(ctx.transition_history.len(), 1);
        let record = &ctx.transition_history[0];
        assert_eq!(record.from, Phase::Analysis);
        assert_eq!(record.to, Phase::Modifying);
        assert_eq!(record.trigger, "plan");
    }

    #[test]
    fn illegal_transition_leaves_context_unchanged() {
        let mut ctx = ConversationContext::new();
        let before = ctx.clone();
        let err = transition(&mut ctx, Phase::Finished, "skip", TransitionExtra::default())
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError {
                from: Phase::Analysis,
                to: Phase::Finished
            }
        );
        assert_eq!(ctx, before);
        assert_eq!(
            err.to_string(),
            "invalid phase transition: ANALYSIS -> FINISHED"
        );
    }

    #[test]
    fn transition_succeeds_only_for_table_members() {
        for from in Phase::ALL {
            for to in Phase::ALL {
                let mut ctx = ConversationContext {
                    current_phase: from,
                    ..ConversationContext::new()
                };
                let result = transition(&mut ctx, to, "table_check", TransitionExtra::default());
                assert_eq!(result.is_ok(), from.transitions().contains(&to), "{from} -> {to}");
                let expected = if result.is_ok() { to } else { from };
                assert_eq!(ctx.current_phase, expected);
            }
        }
    }

    #[test]
    fn entering_error_attaches_payload_and_leaving_clears_it() {
        let mut ctx = ConversationContext::new();
        transition(
            &mut ctx,
            Phase::Error,
            "no_progress",
            TransitionExtra::error(FailureCode::NoProgress, "stuck"),
        )
        .expect("to error");
        assert_eq!(
            ctx.error.as_ref().map(|info| info.code),
            Some(FailureCode::NoProgress)
        );

        transition(&mut ctx, Phase::Analysis, "recover", TransitionExtra::default())
            .expect("recover");
        assert!(ctx.error.is_none());
    }

    #[test]
    fn visible_history_skips_internal_phase() {
        let mut ctx = ConversationContext::new();
        transition(&mut ctx, Phase::AwaitingInfo, "reply", TransitionExtra::default())
            .expect("await");
        transition(&mut ctx, Phase::Analysis, "info", TransitionExtra::default())
            .expect("back");
        transition(&mut ctx, Phase::Modifying, "plan", TransitionExtra::default())
            .expect("modify");
        assert_eq!(ctx.transition_history.len(), 3);
        let visible: Vec<Phase> = ctx.visible_history().iter().map(|r| r.to).collect();
        assert_eq!(visible, vec![Phase::Modifying]);
    }

    #[test]
    fn context_round_trips_through_json() {
        let mut ctx = ConversationContext::new();
        transition(
            &mut ctx,
            Phase::Error,
            "invalid_response",
            TransitionExtra::error(FailureCode::InvalidTagsExceeded, "bad tags")
                .with_tags(&[Tag::Plan]),
        )
        .expect("to error");
        let json = serde_json::to_string(&ctx).expect("json");
        let back: ConversationContext = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, ctx);
    }
}
