//! Per-turn response validation.
//!
//! Pipeline: detect tags, normalize them for the current phase, reject
//! terminal directives outside `READY_TO_FINISH`, consult the no-progress
//! tracker, then infer the suggested next phase from the decision table.

use serde::Serialize;
use tracing::debug;

use crate::core::decision::suggest_next_phase;
use crate::core::no_progress::NoProgressTracker;
use crate::core::normalize::normalize_for_phase;
use crate::core::phase::Phase;
use crate::core::tags::{Tag, detect_tags, modified_line_count};

/// Verdict for one generated response. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub phase: Phase,
    pub detected_tags: Vec<Tag>,
    pub allowed_tags: Vec<Tag>,
    pub effective_tags: Vec<Tag>,
    pub ignored_tags: Vec<Tag>,
    pub invalid_tags: Vec<Tag>,
    pub suggested_next_phase: Option<Phase>,
    pub requires_regeneration: bool,
    pub is_no_progress: bool,
    /// `Modified` was effective but its section carried no lines.
    pub empty_patch: bool,
}

/// Validator owning one conversation's no-progress tracker.
#[derive(Debug, Clone)]
pub struct ResponseValidator {
    tracker: NoProgressTracker,
    auto_retry: bool,
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new(NoProgressTracker::default(), true)
    }
}

impl ResponseValidator {
    pub fn new(tracker: NoProgressTracker, auto_retry: bool) -> Self {
        Self {
            tracker,
            auto_retry,
        }
    }

    pub fn tracker(&self) -> &NoProgressTracker {
        &self.tracker
    }

    /// Forget previous turns (after recovery or reset).
    pub fn clear_history(&mut self) {
        self.tracker.clear();
    }

    pub fn validate(&mut self, text: &str, phase: Phase) -> ValidationResult {
        let detected = detect_tags(text);
        let normalized = normalize_for_phase(&detected, phase);

        let invalid: Vec<Tag> = detected
            .iter()
            .filter(|tag| tag.is_terminal_directive() && !phase.is_tag_allowed(tag))
            .cloned()
            .collect();
        let ignored: Vec<Tag> = normalized
            .ignored
            .into_iter()
            .filter(|tag| !invalid.contains(tag))
            .collect();
        let effective = normalized.effective;
        let empty_patch = effective.contains(&Tag::Modified) && modified_line_count(text) == 0;

        let mut result = ValidationResult {
            valid: false,
            phase,
            detected_tags: detected,
            allowed_tags: phase.allowed_tags().to_vec(),
            effective_tags: effective,
            ignored_tags: ignored,
            invalid_tags: invalid,
            suggested_next_phase: None,
            requires_regeneration: false,
            is_no_progress: false,
            empty_patch,
        };

        if !result.invalid_tags.is_empty() {
            result.requires_regeneration = self.auto_retry;
        } else if result.effective_tags.is_empty() {
            // Nothing phase-relevant: the tracker sees it (and resets) but the
            // turn itself is regenerable rather than stuck.
            self.tracker.observe(phase, &result.effective_tags);
            result.requires_regeneration = self.auto_retry;
        } else if self.tracker.observe(phase, &result.effective_tags) {
            result.is_no_progress = true;
        } else {
            result.valid = true;
            result.suggested_next_phase = suggest_next_phase(&result.effective_tags, phase);
        }

        debug!(
            %phase,
            valid = result.valid,
            effective = ?result.effective_tags,
            ignored = ?result.ignored_tags,
            invalid = ?result.invalid_tags,
            suggested = ?result.suggested_next_phase,
            no_progress = result.is_no_progress,
            "validated response"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_with_out_of_phase_modified() {
        let mut validator = ResponseValidator::default();
        let result = validator.validate(
            "%_Plan_%\n1. edit lib.rs\n%_Modified_%\n+x",
            Phase::Analysis,
        );
        assert!(result.valid);
        assert_eq!(result.effective_tags, vec![Tag::Plan]);
        assert_eq!(result.ignored_tags, vec![Tag::Modified]);
        assert!(result.invalid_tags.is_empty());
        assert_eq!(result.suggested_next_phase, Some(Phase::Modifying));
    }

    #[test]
    fn repeated_empty_patch_becomes_no_progress() {
        let mut validator = ResponseValidator::default();
        let text = "%_Modified_%\n\n";
        let first = validator.validate(text, Phase::Modifying);
        assert!(first.valid);
        assert!(first.empty_patch);
        assert_eq!(first.suggested_next_phase, Some(Phase::Verifying));

        let second = validator.validate(text, Phase::Modifying);
        assert!(second.valid);

        let third = validator.validate(text, Phase::Modifying);
        assert!(!third.valid);
        assert!(third.is_no_progress);
        assert!(!third.requires_regeneration);
        assert_eq!(third.suggested_next_phase, None);
    }

    #[test]
    fn verification_report_suggests_ready_to_finish() {
        let mut validator = ResponseValidator::default();
        let result = validator.validate("%_Verification_Report_%\nok", Phase::Verifying);
        assert!(result.valid);
        assert_eq!(result.suggested_next_phase, Some(Phase::ReadyToFinish));
    }

    #[test]
    fn fin_accepted_when_ready_to_finish() {
        let mut validator = ResponseValidator::default();
        let result = validator.validate("%%_Fin_%%", Phase::ReadyToFinish);
        assert!(result.valid);
        assert_eq!(result.suggested_next_phase, Some(Phase::Finished));
    }

    #[test]
    fn fin_outside_ready_to_finish_is_invalid() {
        let mut validator = ResponseValidator::default();
        let result = validator.validate("%_Thought_%\nhm\n%%_Fin_%%", Phase::Analysis);
        assert!(!result.valid);
        assert_eq!(result.invalid_tags, vec![Tag::Fin]);
        assert!(result.ignored_tags.is_empty());
        assert!(result.requires_regeneration);
        assert!(!result.is_no_progress);
    }

    #[test]
    fn no_relevant_tags_requires_regeneration() {
        let mut validator = ResponseValidator::default();
        let result = validator.validate("%_Modified_%\n+x", Phase::Analysis);
        assert!(!result.valid);
        assert!(result.effective_tags.is_empty());
        assert_eq!(result.ignored_tags, vec![Tag::Modified]);
        assert!(result.invalid_tags.is_empty());
        assert!(result.requires_regeneration);
        assert!(!result.is_no_progress);
    }

    #[test]
    fn repeated_irrelevant_responses_never_count_as_stuck() {
        let mut validator = ResponseValidator::default();
        for _ in 0..4 {
            let result = validator.validate("no tags at all", Phase::Analysis);
            assert!(result.requires_regeneration);
            assert!(!result.is_no_progress);
        }
    }

    #[test]
    fn auto_retry_disabled_marks_invalid_as_final() {
        let mut validator = ResponseValidator::new(NoProgressTracker::default(), false);
        let result = validator.validate("plain text", Phase::Modifying);
        assert!(!result.valid);
        assert!(!result.requires_regeneration);
    }

    #[test]
    fn thought_only_is_valid_without_suggestion() {
        let mut validator = ResponseValidator::default();
        let result = validator.validate("%_Thought_%\nreading", Phase::AwaitingInfo);
        assert!(result.valid);
        assert_eq!(result.suggested_next_phase, None);
        assert_eq!(result.allowed_tags, vec![Tag::Thought]);
    }
}
