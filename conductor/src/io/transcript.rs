//! Recorded producer responses for offline replay.
//!
//! A transcript is plain text; responses are separated by lines consisting
//! solely of `---` (surrounding whitespace ignored).

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::io::producer::{Producer, ProducerError};

const SEPARATOR: &str = "---";

/// Split transcript text into responses. Blank responses are dropped.
pub fn parse_transcript(text: &str) -> Vec<String> {
    let mut responses = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim() == SEPARATOR {
            push_response(&mut responses, &current);
            current.clear();
        } else {
            current.push(line);
        }
    }
    push_response(&mut responses, &current);
    responses
}

fn push_response(responses: &mut Vec<String>, lines: &[&str]) {
    let body = lines.join("\n");
    if !body.trim().is_empty() {
        responses.push(body.trim_matches('\n').to_string());
    }
}

pub fn load_transcript(path: &Path) -> Result<Vec<String>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("read transcript {}", path.display()))?;
    Ok(parse_transcript(&text))
}

/// Producer that hands out recorded responses in order. Every attempt,
/// including regenerations, consumes one response.
#[derive(Debug)]
pub struct TranscriptProducer {
    remaining: Mutex<VecDeque<String>>,
}

impl TranscriptProducer {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            remaining: Mutex::new(responses.into()),
        }
    }

    pub async fn remaining(&self) -> usize {
        self.remaining.lock().await.len()
    }
}

#[async_trait]
impl Producer for TranscriptProducer {
    async fn generate(&self) -> Result<String, ProducerError> {
        self.remaining
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ProducerError::Rejected("transcript exhausted".to_string()))
    }
}
