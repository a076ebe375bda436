//! Next-phase inference as an ordered decision table.
//!
//! Each rule reads "when `tag` is effective while in `from`, move to `to`".
//! The first matching rule wins, so table order is the precedence between
//! directives that appear together.

use crate::core::phase::Phase;
use crate::core::tags::Tag;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub tag: Tag,
    pub from: Phase,
    pub to: Phase,
}

const fn rule(tag: Tag, from: Phase, to: Phase) -> Rule {
    Rule { tag, from, to }
}

pub const RULES: &[Rule] = &[
    rule(Tag::Fin, Phase::ReadyToFinish, Phase::Finished),
    rule(Tag::NoChangesNeeded, Phase::Analysis, Phase::Verifying),
    rule(Tag::Modified, Phase::Modifying, Phase::Verifying),
    rule(Tag::VerificationReport, Phase::Verifying, Phase::ReadyToFinish),
    rule(Tag::ReplyRequired, Phase::Analysis, Phase::AwaitingInfo),
    rule(Tag::ReplyRequired, Phase::Modifying, Phase::AwaitingInfo),
    rule(Tag::Plan, Phase::Analysis, Phase::Modifying),
];

/// First rule matching `phase` whose tag is in `effective`.
pub fn matching_rule<'a>(rules: &'a [Rule], effective: &[Tag], phase: Phase) -> Option<&'a Rule> {
    rules
        .iter()
        .find(|rule| rule.from == phase && effective.contains(&rule.tag))
}

/// Suggested destination for a turn, if any rule applies.
pub fn suggest_next_phase(effective: &[Tag], phase: Phase) -> Option<Phase> {
    matching_rule(RULES, effective, phase).map(|rule| rule.to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_rule_is_a_legal_transition() {
        for rule in RULES {
            assert!(
                rule.from.can_transition_to(rule.to),
                "{} -> {}",
                rule.from,
                rule.to
            );
        }
    }

    #[test]
    fn every_rule_tag_is_allowed_in_its_phase() {
        for rule in RULES {
            assert!(rule.from.is_tag_allowed(&rule.tag), "{} in {}", rule.tag, rule.from);
        }
    }

    #[test]
    fn plan_in_analysis_moves_to_modifying() {
        assert_eq!(
            suggest_next_phase(&[Tag::Thought, Tag::Plan], Phase::Analysis),
            Some(Phase::Modifying)
        );
    }

    #[test]
    fn reply_required_outranks_plan() {
        assert_eq!(
            suggest_next_phase(&[Tag::Plan, Tag::ReplyRequired], Phase::Analysis),
            Some(Phase::AwaitingInfo)
        );
    }

    #[test]
    fn reply_required_while_modifying_awaits_info() {
        assert_eq!(
            suggest_next_phase(&[Tag::ReplyRequired], Phase::Modifying),
            Some(Phase::AwaitingInfo)
        );
    }

    #[test]
    fn modified_outranks_reply_required() {
        assert_eq!(
            suggest_next_phase(&[Tag::Modified, Tag::ReplyRequired], Phase::Modifying),
            Some(Phase::Verifying)
        );
    }

    #[test]
    fn thought_alone_suggests_nothing() {
        for phase in Phase::ALL {
            assert_eq!(suggest_next_phase(&[Tag::Thought], phase), None, "{phase}");
        }
    }

    #[test]
    fn fin_only_finishes_from_ready_to_finish() {
        assert_eq!(
            suggest_next_phase(&[Tag::Fin], Phase::ReadyToFinish),
            Some(Phase::Finished)
        );
        assert_eq!(suggest_next_phase(&[Tag::Fin], Phase::Verifying), None);
    }
}
