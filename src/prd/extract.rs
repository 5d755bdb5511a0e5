//! Requirement extraction from PRD text.
//!
//! A requirement is any bullet (`-`, `*`, `+`, `•`) or numbered (`1.`, `1)`)
//! line. A leading `[ ]` / `[x]` checkbox is dropped. Items shorter than three
//! characters are ignored and repeats (case-insensitive) are kept once.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::store::models::Prd;

static LIST_ITEM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+•]|\d+[.)])\s+(?:\[[ xX]\]\s*)?(.+?)\s*$").unwrap()
});

const MIN_REQUIREMENT_CHARS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub text: String,
    /// Title of the section the line came from, when the PRD is sectioned.
    pub section: Option<String>,
}

/// List items of one block of text, in order.
pub fn extract_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| LIST_ITEM_REGEX.captures(line))
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .filter(|item| item.chars().count() >= MIN_REQUIREMENT_CHARS)
        .collect()
}

/// Requirements of a PRD. Sectioned PRDs are read section by section;
/// otherwise the raw `content` is used.
pub fn extract_requirements(prd: &Prd) -> Vec<Requirement> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut push = |text: String, section: Option<&str>| {
        if seen.insert(text.to_lowercase()) {
            out.push(Requirement {
                text,
                section: section.map(str::to_string),
            });
        }
    };

    match prd.sections.as_deref() {
        Some(sections) if !sections.is_empty() => {
            for section in sections {
                for line in extract_lines(&section.content) {
                    push(line, Some(&section.title));
                }
            }
        }
        _ => {
            for line in extract_lines(prd.content.as_deref().unwrap_or_default()) {
                push(line, None);
            }
        }
    }
    out
}
