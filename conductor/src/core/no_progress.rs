//! Detection of conversations that stopped advancing.
//!
//! Each turn contributes a `(phase, effective tags)` pair. Identical pairs on
//! consecutive turns (tags compared as sets) bump a repeat counter; any other
//! pair resets it. Reaching the threshold means the generator is repeating
//! itself and retrying cannot help.

use std::collections::BTreeSet;

use crate::core::phase::Phase;
use crate::core::tags::Tag;

/// Repeats tolerated before a conversation counts as stuck.
pub const DEFAULT_NO_PROGRESS_THRESHOLD: u32 = 2;

#[derive(Debug, Clone)]
pub struct NoProgressTracker {
    last_phase: Option<Phase>,
    last_effective: BTreeSet<Tag>,
    consecutive_repeats: u32,
    threshold: u32,
}

impl Default for NoProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_NO_PROGRESS_THRESHOLD)
    }
}

impl NoProgressTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            last_phase: None,
            last_effective: BTreeSet::new(),
            consecutive_repeats: 0,
            threshold,
        }
    }

    /// Record one turn and report whether the threshold has been reached.
    ///
    /// An empty effective set never counts as a repeat; it clears the
    /// previous observation instead.
    pub fn observe(&mut self, phase: Phase, effective: &[Tag]) -> bool {
        if effective.is_empty() {
            self.clear();
            return false;
        }

        let current: BTreeSet<Tag> = effective.iter().cloned().collect();
        if self.last_phase == Some(phase) && self.last_effective == current {
            self.consecutive_repeats += 1;
        } else {
            self.last_phase = Some(phase);
            self.last_effective = current;
            self.consecutive_repeats = 0;
        }
        self.is_stuck()
    }

    pub fn is_stuck(&self) -> bool {
        self.consecutive_repeats >= self.threshold
    }

    pub fn consecutive_repeats(&self) -> u32 {
        self.consecutive_repeats
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn clear(&mut self) {
        self.last_phase = None;
        self.last_effective.clear();
        self.consecutive_repeats = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn third_identical_turn_is_stuck() {
        let mut tracker = NoProgressTracker::default();
        assert!(!tracker.observe(Phase::Modifying, &[Tag::Modified]));
        assert!(!tracker.observe(Phase::Modifying, &[Tag::Modified]));
        assert!(tracker.observe(Phase::Modifying, &[Tag::Modified]));
        assert_eq!(tracker.consecutive_repeats(), 2);
    }

    #[test]
    fn comparison_ignores_order() {
        let mut tracker = NoProgressTracker::new(1);
        tracker.observe(Phase::Analysis, &[Tag::Thought, Tag::Plan]);
        assert!(tracker.observe(Phase::Analysis, &[Tag::Plan, Tag::Thought]));
    }

    #[test]
    fn different_phase_resets() {
        let mut tracker = NoProgressTracker::default();
        tracker.observe(Phase::Analysis, &[Tag::Thought]);
        tracker.observe(Phase::Analysis, &[Tag::Thought]);
        assert!(!tracker.observe(Phase::Verifying, &[Tag::Thought]));
        assert_eq!(tracker.consecutive_repeats(), 0);
    }

    #[test]
    fn different_tags_reset() {
        let mut tracker = NoProgressTracker::default();
        tracker.observe(Phase::Analysis, &[Tag::Thought]);
        tracker.observe(Phase::Analysis, &[Tag::Thought]);
        assert!(!tracker.observe(Phase::Analysis, &[Tag::Thought, Tag::Plan]));
        assert_eq!(tracker.consecutive_repeats(), 0);
    }

    #[test]
    fn empty_sets_never_repeat() {
        let mut tracker = NoProgressTracker::default();
        for _ in 0..5 {
            assert!(!tracker.observe(Phase::Analysis, &[]));
        }
        assert_eq!(tracker.consecutive_repeats(), 0);
    }

    #[test]
    fn empty_set_breaks_a_streak() {
        let mut tracker = NoProgressTracker::default();
        tracker.observe(Phase::Analysis, &[Tag::Thought]);
        tracker.observe(Phase::Analysis, &[Tag::Thought]);
        tracker.observe(Phase::Analysis, &[]);
        assert!(!tracker.observe(Phase::Analysis, &[Tag::Thought]));
    }

    #[test]
    fn threshold_is_configurable() {
        let mut tracker = NoProgressTracker::new(4);
        for _ in 0..4 {
            assert!(!tracker.observe(Phase::Verifying, &[Tag::Thought]));
        }
        assert!(tracker.observe(Phase::Verifying, &[Tag::Thought]));
    }
}
