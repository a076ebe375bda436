//! Conversation phases and their fixed tables.
//!
//! Both tables are static data: the allow-list of directive tags per phase
//! (in decreasing priority) and the set of legal destinations per phase.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::tags::Tag;

const ANALYSIS_TAGS: &[Tag] = &[
    Tag::Thought,
    Tag::Plan,
    Tag::ReplyRequired,
    Tag::NoChangesNeeded,
];
const AWAITING_INFO_TAGS: &[Tag] = &[Tag::Thought];
const MODIFYING_TAGS: &[Tag] = &[Tag::Modified, Tag::ReplyRequired];
const VERIFYING_TAGS: &[Tag] = &[Tag::VerificationReport, Tag::Thought];
const READY_TO_FINISH_TAGS: &[Tag] = &[Tag::ReadyForFinalCheck, Tag::Fin];
const ERROR_TAGS: &[Tag] = &[Tag::Thought, Tag::ReplyRequired];

/// Named state of one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Initial analysis and planning.
    Analysis,
    /// Waiting for the host to supply requested files. Never shown to the
    /// generator.
    AwaitingInfo,
    /// Patch generation.
    Modifying,
    /// Self-review of the produced patch.
    Verifying,
    /// The only phase in which the terminal directive is accepted.
    ReadyToFinish,
    Finished,
    Error,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Analysis,
        Phase::AwaitingInfo,
        Phase::Modifying,
        Phase::Verifying,
        Phase::ReadyToFinish,
        Phase::Finished,
        Phase::Error,
    ];

    /// Stable upper-case label (matches the serialized form).
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Analysis => "ANALYSIS",
            Phase::AwaitingInfo => "AWAITING_INFO",
            Phase::Modifying => "MODIFYING",
            Phase::Verifying => "VERIFYING",
            Phase::ReadyToFinish => "READY_TO_FINISH",
            Phase::Finished => "FINISHED",
            Phase::Error => "ERROR",
        }
    }

    /// Tags permitted in this phase, highest priority first.
    pub fn allowed_tags(self) -> &'static [Tag] {
        match self {
            Phase::Analysis => ANALYSIS_TAGS,
            Phase::AwaitingInfo => AWAITING_INFO_TAGS,
            Phase::Modifying => MODIFYING_TAGS,
            Phase::Verifying => VERIFYING_TAGS,
            Phase::ReadyToFinish => READY_TO_FINISH_TAGS,
            Phase::Finished => &[],
            Phase::Error => ERROR_TAGS,
        }
    }

    /// Legal destinations from this phase.
    pub fn transitions(self) -> &'static [Phase] {
        match self {
            Phase::Analysis => &[
                Phase::AwaitingInfo,
                Phase::Modifying,
                Phase::Verifying,
                Phase::Error,
            ],
            Phase::AwaitingInfo => &[Phase::Analysis, Phase::Error],
            Phase::Modifying => &[Phase::Verifying, Phase::AwaitingInfo, Phase::Error],
            Phase::Verifying => &[Phase::Modifying, Phase::ReadyToFinish, Phase::Error],
            Phase::ReadyToFinish => &[Phase::Finished, Phase::Error],
            Phase::Finished => &[],
            Phase::Error => &[Phase::Analysis],
        }
    }

    pub fn can_transition_to(self, target: Phase) -> bool {
        self.transitions().contains(&target)
    }

    pub fn is_tag_allowed(self, tag: &Tag) -> bool {
        self.allowed_tags().contains(tag)
    }

    /// Only `FINISHED` has no way out.
    pub fn is_terminal(self) -> bool {
        self == Phase::Finished
    }

    /// Phases that accept no further turns (`FINISHED`, `ERROR`).
    pub fn is_closed(self) -> bool {
        matches!(self, Phase::Finished | Phase::Error)
    }

    /// Host-side bookkeeping phase that the generator never sees.
    pub fn is_internal(self) -> bool {
        self == Phase::AwaitingInfo
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == normalized)
            .ok_or_else(|| format!("unknown phase '{s}'"))
    }
}
