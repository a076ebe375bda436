//! Directive tag tokenizer.
//!
//! The wire format is defined once here:
//! - single-turn directives `%_Name_%` (e.g. `%_Plan_%`, `%_Reply Required_%`)
//! - the terminal-only directive `%%_Fin_%%`
//!
//! Detection is purely lexical: tag presence is reported, section content is
//! never interpreted by [`detect_tags`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// The closing delimiter always matches the opening one, so adjacent markers
// such as `%_Plan_%%_Modified_%` lex as two tags.
static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%%_(?P<double>[A-Za-z][A-Za-z0-9 _]*?)_%%|%_(?P<single>[A-Za-z][A-Za-z0-9 _]*?)_%")
        .expect("tag regex is valid")
});

/// A directive marker found in generated text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    Thought,
    Plan,
    ReplyRequired,
    Modified,
    VerificationReport,
    NoChangesNeeded,
    ReadyForFinalCheck,
    /// Terminal-only directive (`%%_Fin_%%`).
    Fin,
    /// Well-formed marker with a name outside the fixed vocabulary. Kept
    /// verbatim so it can be reported as ignored noise.
    Unknown(String),
}

impl Tag {
    /// Every known directive, in declaration order.
    pub const KNOWN: [Tag; 8] = [
        Tag::Thought,
        Tag::Plan,
        Tag::ReplyRequired,
        Tag::Modified,
        Tag::VerificationReport,
        Tag::NoChangesNeeded,
        Tag::ReadyForFinalCheck,
        Tag::Fin,
    ];

    /// Directive name as it appears between the delimiters.
    pub fn name(&self) -> &str {
        match self {
            Tag::Thought => "Thought",
            Tag::Plan => "Plan",
            Tag::ReplyRequired => "Reply Required",
            Tag::Modified => "Modified",
            Tag::VerificationReport => "Verification_Report",
            Tag::NoChangesNeeded => "No_Changes_Needed",
            Tag::ReadyForFinalCheck => "Ready_For_Final_Check",
            Tag::Fin => "Fin",
            Tag::Unknown(raw) => raw,
        }
    }

    /// Exact wire form of the tag.
    pub fn literal(&self) -> String {
        match self {
            Tag::Fin => "%%_Fin_%%".to_string(),
            Tag::Unknown(raw) => raw.clone(),
            other => format!("%_{}_%", other.name()),
        }
    }

    /// Classify a full marker literal (delimiters included).
    ///
    /// Returns `None` when `literal` is not a well-formed marker at all.
    pub fn parse(literal: &str) -> Option<Tag> {
        let caps = TAG_REGEX.captures(literal)?;
        let whole = caps.get(0)?;
        if whole.start() != 0 || whole.end() != literal.len() {
            return None;
        }
        classify_captures(&caps)
    }

    /// True for the terminal-only directive.
    pub fn is_terminal_directive(&self) -> bool {
        matches!(self, Tag::Fin)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal())
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.literal())
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Tag::parse(&raw).unwrap_or(Tag::Unknown(raw)))
    }
}

fn classify_captures(caps: &regex::Captures<'_>) -> Option<Tag> {
    let literal = caps.get(0)?.as_str();
    if let Some(name) = caps.name("double") {
        return Some(classify(literal, name.as_str(), true));
    }
    Some(classify(literal, caps.name("single")?.as_str(), false))
}

fn classify(literal: &str, name: &str, double: bool) -> Tag {
    match double {
        true if name == "Fin" => Tag::Fin,
        false => match name {
            "Thought" => Tag::Thought,
            "Plan" => Tag::Plan,
            "Reply Required" => Tag::ReplyRequired,
            "Modified" => Tag::Modified,
            "Verification_Report" => Tag::VerificationReport,
            "No_Changes_Needed" => Tag::NoChangesNeeded,
            "Ready_For_Final_Check" => Tag::ReadyForFinalCheck,
            _ => Tag::Unknown(literal.to_string()),
        },
        _ => Tag::Unknown(literal.to_string()),
    }
}

/// Return the distinct tags present in `text`, in order of first appearance.
pub fn detect_tags(text: &str) -> Vec<Tag> {
    let mut tags: Vec<Tag> = Vec::new();
    for caps in TAG_REGEX.captures_iter(text) {
        let Some(tag) = classify_captures(&caps) else {
            continue;
        };
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// A tag line and the text that follows it up to the next tag line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub tag: Tag,
    pub body: String,
}

/// Split a response into sections. A tag that occupies its own line opens a
/// section; text before the first tag line is dropped. Closing markers
/// (`%_/Name_%`) end the current section.
pub fn extract_sections(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current: Option<Section> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if is_closing_marker(trimmed) {
            if let Some(done) = current.take() {
                sections.push(finish(done));
            }
            continue;
        }
        if let Some(tag) = Tag::parse(trimmed) {
            if let Some(done) = current.take() {
                sections.push(finish(done));
            }
            current = Some(Section {
                tag,
                body: String::new(),
            });
            continue;
        }
        if let Some(section) = current.as_mut() {
            section.body.push_str(line);
            section.body.push('\n');
        }
    }
    if let Some(done) = current.take() {
        sections.push(finish(done));
    }
    sections
}

/// Body of the first section opened by `tag`, if any.
pub fn section_body(text: &str, tag: &Tag) -> Option<String> {
    extract_sections(text)
        .into_iter()
        .find(|section| &section.tag == tag)
        .map(|section| section.body)
}

/// Number of non-blank lines in the `Modified` section (0 when absent).
pub fn modified_line_count(text: &str) -> usize {
    section_body(text, &Tag::Modified)
        .map(|body| body.lines().filter(|line| !line.trim().is_empty()).count())
        .unwrap_or(0)
}

fn is_closing_marker(line: &str) -> bool {
    line.starts_with("%_/") && line.ends_with("_%") && line.len() > 5
}

fn finish(mut section: Section) -> Section {
    section.body = section.body.trim().to_string();
    section
}
