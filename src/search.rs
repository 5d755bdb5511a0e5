//! Rank scoring for the cross-entity search endpoint.
//!
//! The store returns substring candidates; each is scored against the query
//! by how its title matches:
//!
//! | match                                   | score |
//! |-----------------------------------------|-------|
//! | title equals the query                  | 100   |
//! | title starts with the query             | 90    |
//! | query appears as a whole word           | 80    |
//! | query starts a word                     | 70    |
//! | query appears anywhere in the title     | 60    |
//! | query only appears in the body          | 60    |
//!
//! All comparisons are case-insensitive.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::store::SearchCandidate;

pub const EXACT: u8 = 100;
pub const PREFIX: u8 = 90;
pub const WHOLE_WORD: u8 = 80;
pub const WORD_PREFIX: u8 = 70;
pub const SUBSTRING: u8 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub entity_type: String,
    pub id: String,
    pub title: String,
    pub score: u8,
}

fn is_boundary(ch: Option<char>) -> bool {
    ch.is_none_or(|c| !c.is_alphanumeric())
}

/// Score `text` against `query`, or `None` when it does not contain it.
pub fn score(text: &str, query: &str) -> Option<u8> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return None;
    }
    let text = text.trim().to_lowercase();
    if text == query {
        return Some(EXACT);
    }
    if text.starts_with(&query) {
        return Some(PREFIX);
    }

    let mut best = None;
    for (start, _) in text.match_indices(&query) {
        let before = text[..start].chars().next_back();
        let after = text[start + query.len()..].chars().next();
        let s = match (is_boundary(before), is_boundary(after)) {
            (true, true) => WHOLE_WORD,
            (true, false) => WORD_PREFIX,
            _ => SUBSTRING,
        };
        best = best.max(Some(s));
        if s == WHOLE_WORD {
            break;
        }
    }
    best
}

/// Score a candidate: by title first, then by body.
pub fn score_candidate(candidate: &SearchCandidate, query: &str) -> Option<u8> {
    score(&candidate.title, query).or_else(|| {
        let q = query.trim().to_lowercase();
        (!q.is_empty() && candidate.body.to_lowercase().contains(&q)).then_some(SUBSTRING)
    })
}

/// Score, drop non-matches and sort by score descending (ties by title).
pub fn rank(candidates: Vec<SearchCandidate>, query: &str) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter_map(|c| {
            score_candidate(&c, query).map(|score| SearchHit {
                entity_type: c.entity_type,
                id: c.id,
                title: c.title,
                score,
            })
        })
        .collect();
    hits.sort_by(|a, b| match b.score.cmp(&a.score) {
        Ordering::Equal => a
            .title
            .to_lowercase()
            .cmp(&b.title.to_lowercase())
            .then_with(|| a.entity_type.cmp(&b.entity_type)),
        other => other,
    });
    hits
}
