//! Matching-pair extraction: from upstream JSON, or derived straight from
//! the milestone's materials when upstream output is unusable.

use std::collections::HashSet;

use serde::Deserialize;

use cairn_db::models::{Material, MatchingPair};

use super::sanitize;

pub const MIN_PAIRS: usize = 2;
pub const MAX_PAIRS: usize = 6;

/// Shape of one upstream matching item before validation.
#[derive(Debug, Deserialize)]
pub struct RawPair {
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub definition: String,
}

/// Parse an upstream completion into validated pairs.
///
/// Returns an empty vec on any failure or when fewer than [`MIN_PAIRS`]
/// survive; the caller falls through to derivation.
pub fn pairs_from_completion(text: &str) -> Vec<MatchingPair> {
    let Some(json) = sanitize::extract_json_array(text) else {
        return Vec::new();
    };
    let Ok(raw) = serde_json::from_str::<Vec<RawPair>>(&json) else {
        return Vec::new();
    };
    let pairs = clean_pairs(raw);
    if pairs.len() < MIN_PAIRS {
        return Vec::new();
    }
    pairs
}

fn clean_pairs(raw: Vec<RawPair>) -> Vec<MatchingPair> {
    let mut seen = HashSet::new();
    let mut pairs = Vec::new();
    for item in raw {
        let term = item.term.trim().to_string();
        let definition = item.definition.trim().to_string();
        if term.is_empty() || definition.is_empty() {
            continue;
        }
        if !seen.insert(term.to_lowercase()) {
            continue;
        }
        pairs.push(MatchingPair { term, definition });
        if pairs.len() == MAX_PAIRS {
            break;
        }
    }
    pairs
}

/// Derive pairs directly from the milestone's materials.
///
/// Glossary-style bullet lines (`Term: definition`) come first; material
/// titles paired with their opening sentence fill the rest. The result can
/// still be short when the materials are thin; the caller checks the floor.
pub fn derive_pairs(materials: &[Material]) -> Vec<MatchingPair> {
    let mut seen = HashSet::new();
    let mut pairs = Vec::new();

    for material in materials {
        for bullet in &material.bullet_points {
            let Some((term, definition)) = bullet.split_once(':') else {
                continue;
            };
            let term = term.trim();
            let definition = definition.trim();
            if term.is_empty() || definition.is_empty() {
                continue;
            }
            if seen.insert(term.to_lowercase()) {
                pairs.push(MatchingPair {
                    term: term.to_string(),
                    definition: definition.to_string(),
                });
                if pairs.len() == MAX_PAIRS {
                    return pairs;
                }
            }
        }
    }

    for material in materials {
        let Some(sentence) = first_sentence(&material.body) else {
            continue;
        };
        let term = material.title.trim();
        if term.is_empty() {
            continue;
        }
        if seen.insert(term.to_lowercase()) {
            pairs.push(MatchingPair {
                term: term.to_string(),
                definition: sentence,
            });
            if pairs.len() == MAX_PAIRS {
                break;
            }
        }
    }

    pairs
}

fn first_sentence(body: &str) -> Option<String> {
    let text = body.trim();
    if text.is_empty() {
        return None;
    }
    let end = text.find(['.', '!', '?']).map_or(text.len(), |i| i + 1);
    let sentence = text[..end].trim();
    if sentence.is_empty() {
        None
    } else {
        Some(sentence.to_string())
    }
}
