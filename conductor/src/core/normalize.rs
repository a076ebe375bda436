//! Phase-aware normalization of detected tags.
//!
//! Generators routinely emit several directives in one response. The phase's
//! priority-ordered allow-list decides which of them count:
//! - allowed tags that were detected become `effective`, in allow-list order
//! - detected tags outside the allow-list become `ignored` (noise, not a
//!   protocol violation), in detection order

use serde::Serialize;

use crate::core::phase::Phase;
use crate::core::tags::Tag;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Normalized {
    pub effective: Vec<Tag>,
    pub ignored: Vec<Tag>,
}

pub fn normalize_for_phase(detected: &[Tag], phase: Phase) -> Normalized {
    let allowed = phase.allowed_tags();
    let effective = allowed
        .iter()
        .filter(|tag| detected.contains(tag))
        .cloned()
        .collect();
    let ignored = detected
        .iter()
        .filter(|tag| !allowed.contains(tag))
        .cloned()
        .collect();
    Normalized { effective, ignored }
}
