//! Roadmap outline intake: the TOML format authors write, and its
//! validation. The same checks run on outlines submitted over HTTP.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cairn_db::models::MilestoneOutline;

/// Top-level structure of a roadmap outline file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoadmapToml {
    pub roadmap: RoadmapMeta,
    #[serde(default)]
    pub milestones: Vec<MilestoneToml>,
}

/// The `[roadmap]` header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoadmapMeta {
    pub title: String,
}

/// One `[[milestones]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MilestoneToml {
    pub topic: String,
    #[serde(default)]
    pub sub_items: Vec<String>,
}

/// Errors that can occur while parsing or validating an outline.
#[derive(Debug, Error)]
pub enum OutlineParseError {
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("roadmap title must not be empty")]
    EmptyTitle,

    #[error("outline must contain at least one milestone")]
    NoMilestones,

    #[error("milestone {index} has an empty topic")]
    EmptyTopic { index: usize },

    #[error("milestone {topic:?} has no sub-items")]
    NoSubItems { topic: String },

    #[error("milestone {topic:?} has an empty sub-item")]
    EmptySubItem { topic: String },
}

/// Parse a roadmap outline from TOML and validate it.
pub fn parse_roadmap_toml(content: &str) -> Result<RoadmapToml, OutlineParseError> {
    let outline: RoadmapToml = toml::from_str(content)?;
    validate(&outline)?;
    Ok(outline)
}

fn validate(outline: &RoadmapToml) -> Result<(), OutlineParseError> {
    if outline.roadmap.title.trim().is_empty() {
        return Err(OutlineParseError::EmptyTitle);
    }
    if outline.milestones.is_empty() {
        return Err(OutlineParseError::NoMilestones);
    }
    for (index, milestone) in outline.milestones.iter().enumerate() {
        validate_one(index, &milestone.topic, &milestone.sub_items)?;
    }
    Ok(())
}

/// Validate milestone outlines submitted directly, bypassing TOML.
pub fn validate_milestones(milestones: &[MilestoneOutline]) -> Result<(), OutlineParseError> {
    if milestones.is_empty() {
        return Err(OutlineParseError::NoMilestones);
    }
    for (index, milestone) in milestones.iter().enumerate() {
        validate_one(index, &milestone.topic, &milestone.sub_items)?;
    }
    Ok(())
}

fn validate_one(index: usize, topic: &str, sub_items: &[String]) -> Result<(), OutlineParseError> {
    if topic.trim().is_empty() {
        return Err(OutlineParseError::EmptyTopic { index });
    }
    if sub_items.is_empty() {
        return Err(OutlineParseError::NoSubItems {
            topic: topic.to_string(),
        });
    }
    if sub_items.iter().any(|item| item.trim().is_empty()) {
        return Err(OutlineParseError::EmptySubItem {
            topic: topic.to_string(),
        });
    }
    Ok(())
}

/// Convert a validated outline into the persisted milestone list.
pub fn to_milestones(outline: &RoadmapToml) -> Vec<MilestoneOutline> {
    outline
        .milestones
        .iter()
        .map(|milestone| MilestoneOutline {
            topic: milestone.topic.clone(),
            sub_items: milestone.sub_items.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[roadmap]
title = "Learn Rust"

[[milestones]]
topic = "Rust fundamentals"
sub_items = ["Ownership and borrowing", "Pattern matching"]

[[milestones]]
topic = "Async Rust"
sub_items = ["Futures and executors", "Tokio tasks"]
"#;

    #[test]
    fn parses_a_complete_outline() {
        let outline = parse_roadmap_toml(SAMPLE).unwrap();
        assert_eq!(outline.roadmap.title, "Learn Rust");
        assert_eq!(outline.milestones.len(), 2);
        assert_eq!(outline.milestones[0].topic, "Rust fundamentals");
        assert_eq!(outline.milestones[1].sub_items.len(), 2);
    }

    #[test]
    fn to_milestones_preserves_order() {
        let outline = parse_roadmap_toml(SAMPLE).unwrap();
        let milestones = to_milestones(&outline);
        assert_eq!(milestones[0].topic, "Rust fundamentals");
        assert_eq!(milestones[1].sub_items[1], "Tokio tasks");
    }

    #[test]
    fn rejects_empty_title() {
        let content = r#"
[roadmap]
title = "  "

[[milestones]]
topic = "Anything"
sub_items = ["A"]
"#;
        let err = parse_roadmap_toml(content).unwrap_err();
        assert!(matches!(err, OutlineParseError::EmptyTitle));
    }

    #[test]
    fn rejects_missing_milestones() {
        let content = r#"
[roadmap]
title = "Empty"
"#;
        let err = parse_roadmap_toml(content).unwrap_err();
        assert!(matches!(err, OutlineParseError::NoMilestones));
    }

    #[test]
    fn rejects_a_milestone_without_sub_items() {
        let content = r#"
[roadmap]
title = "Learn Rust"

[[milestones]]
topic = "Rust fundamentals"
sub_items = []
"#;
        let err = parse_roadmap_toml(content).unwrap_err();
        assert!(matches!(err, OutlineParseError::NoSubItems { topic } if topic == "Rust fundamentals"));
    }

    #[test]
    fn rejects_blank_sub_items() {
        let content = r#"
[roadmap]
title = "Learn Rust"

[[milestones]]
topic = "Rust fundamentals"
sub_items = ["Ownership", "   "]
"#;
        let err = parse_roadmap_toml(content).unwrap_err();
        assert!(matches!(err, OutlineParseError::EmptySubItem { .. }));
    }

    #[test]
    fn rejects_invalid_toml() {
        let err = parse_roadmap_toml("not at all toml [").unwrap_err();
        assert!(matches!(err, OutlineParseError::TomlError(_)));
    }

    #[test]
    fn validate_milestones_checks_direct_submissions() {
        let good = vec![MilestoneOutline {
            topic: "Topic".to_string(),
            sub_items: vec!["Item".to_string()],
        }];
        assert!(validate_milestones(&good).is_ok());

        assert!(matches!(
            validate_milestones(&[]),
            Err(OutlineParseError::NoMilestones)
        ));

        let empty_topic = vec![MilestoneOutline {
            topic: "".to_string(),
            sub_items: vec!["Item".to_string()],
        }];
        assert!(matches!(
            validate_milestones(&empty_topic),
            Err(OutlineParseError::EmptyTopic { index: 0 })
        ));
    }
}
