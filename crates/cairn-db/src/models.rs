use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of quiz attached to a milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizKind {
    Mcq,
    Match,
}

impl fmt::Display for QuizKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Mcq => "mcq",
            Self::Match => "match",
        };
        f.write_str(s)
    }
}

impl FromStr for QuizKind {
    type Err = QuizKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mcq" => Ok(Self::Mcq),
            "match" => Ok(Self::Match),
            other => Err(QuizKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`QuizKind`] string.
#[derive(Debug, Clone)]
pub struct QuizKindParseError(pub String);

impl fmt::Display for QuizKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid quiz kind: {:?}", self.0)
    }
}

impl std::error::Error for QuizKindParseError {}

// ---------------------------------------------------------------------------

/// Scope of a cancellation request.
///
/// Persisted as the JSON string `"any"` or as a bare milestone index, so the
/// serde impls are written by hand rather than derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelScope {
    /// Cancel whatever generation is running on the roadmap.
    Any,
    /// Cancel only a run targeting this milestone index.
    Milestone(u32),
}

impl CancelScope {
    /// Whether a request with this scope applies to a run targeting the
    /// given milestone.
    pub fn matches(&self, milestone_index: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Milestone(index) => *index == milestone_index,
        }
    }
}

impl fmt::Display for CancelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Milestone(index) => write!(f, "{index}"),
        }
    }
}

impl Serialize for CancelScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Any => serializer.serialize_str("any"),
            Self::Milestone(index) => serializer.serialize_u32(*index),
        }
    }
}

impl<'de> Deserialize<'de> for CancelScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScopeVisitor;

        impl de::Visitor<'_> for ScopeVisitor {
            type Value = CancelScope;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("the string \"any\" or a milestone index")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<CancelScope, E> {
                if v == "any" {
                    Ok(CancelScope::Any)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<CancelScope, E> {
                u32::try_from(v)
                    .map(CancelScope::Milestone)
                    .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(v), &self))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<CancelScope, E> {
                u32::try_from(v)
                    .map(CancelScope::Milestone)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }
        }

        deserializer.deserialize_any(ScopeVisitor)
    }
}

// ---------------------------------------------------------------------------
// Document types
// ---------------------------------------------------------------------------

/// One milestone of a roadmap's outline. Immutable once the roadmap exists;
/// the generation pipeline only ever reads these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneOutline {
    pub topic: String,
    pub sub_items: Vec<String>,
}

/// Generated learning material for a single sub-item.
///
/// A material exists complete or not at all; there are no draft rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub milestone_index: u32,
    pub sub_index: u32,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub bullet_points: Vec<String>,
    pub image_ref: String,
}

/// Sparse map from milestone index to its generated materials.
///
/// Only milestones that have been generated appear as keys; absence is
/// meaningful and distinct from an empty list.
pub type MaterialMatrix = BTreeMap<u32, Vec<Material>>;

/// Sparse map from milestone index to its quiz.
pub type QuizMatrix = BTreeMap<u32, Quiz>;

/// A multiple-choice question. `answer` indexes into `choices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub stem: String,
    pub choices: Vec<String>,
    pub answer: usize,
}

/// A term/definition pair for a matching quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingPair {
    pub term: String,
    pub definition: String,
}

/// A quiz document attached to one milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Quiz {
    Mcq { questions: Vec<QuizQuestion> },
    Match { pairs: Vec<MatchingPair> },
}

impl Quiz {
    pub fn kind(&self) -> QuizKind {
        match self {
            Self::Mcq { .. } => QuizKind::Mcq,
            Self::Match { .. } => QuizKind::Match,
        }
    }

    /// Number of questions or pairs.
    pub fn len(&self) -> usize {
        match self {
            Self::Mcq { questions } => questions.len(),
            Self::Match { pairs } => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A pending cancellation request written by the cancel surface and polled
/// by the running generation loop between sub-items.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub scope: CancelScope,
    pub at: DateTime<Utc>,
}

/// Lifecycle record of the most recent generation run on a roadmap.
///
/// Doubles as the single-flight lock: a state with `in_progress = true` and
/// a recent `started_at` marks the roadmap's owner as busy. The record is
/// overwritten by each new run and kept after completion for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationState {
    pub in_progress: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_milestone: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_requested: Option<CancelRequest>,
    /// Whether the run ended by honoring a cancel request. Absent in records
    /// written before cancellation existed, hence the serde default.
    #[serde(default)]
    pub canceled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canceled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl GenerationState {
    /// Fresh in-progress state marking the start of a run.
    pub fn begin(target_milestone: u32, now: DateTime<Utc>) -> Self {
        Self {
            in_progress: true,
            started_at: now,
            target_milestone: Some(target_milestone),
            cancel_requested: None,
            canceled: false,
            canceled_at: None,
            finished_at: None,
        }
    }
}

/// A recorded attempt or completion marker in the progress map.
///
/// Sub-item markers carry only `passed` and `updated_at`. Quiz attempts also
/// record the score and submitted answers, but those are informational: the
/// progress gate checks for the record's presence, never its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AttemptRecord {
    /// Marker written when a learner finishes reading a sub-item.
    pub fn marker(now: DateTime<Utc>) -> Self {
        Self {
            passed: true,
            score: None,
            answers: None,
            attempt_id: None,
            updated_at: now,
        }
    }
}

/// Per-roadmap learner progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(default)]
    pub completed_tasks: BTreeMap<String, AttemptRecord>,
    #[serde(default)]
    pub percent: f64,
}

// ---------------------------------------------------------------------------
// Progress keys
// ---------------------------------------------------------------------------

/// Progress map key for one sub-item of a milestone.
pub fn task_key(milestone_index: u32, sub_index: u32) -> String {
    format!("m-{milestone_index}-t-{sub_index}")
}

/// Progress map key for a milestone's quiz attempt.
pub fn quiz_key(milestone_index: u32) -> String {
    format!("quiz-m-{milestone_index}")
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A roadmap -- the aggregate this service generates content into.
///
/// The outline, content matrices, generation state and progress all live in
/// JSONB columns on the one row; updates are read-modify-write with no
/// version token. The single-flight gate keeps concurrent generation runs
/// off the same owner's roadmaps.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Roadmap {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub published: bool,
    pub milestones: Json<Vec<MilestoneOutline>>,
    pub materials: Json<MaterialMatrix>,
    pub quizzes: Json<QuizMatrix>,
    pub generation: Json<Option<GenerationState>>,
    pub progress: Json<ProgressRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Roadmap {
    /// Total number of sub-items across all milestones.
    pub fn total_sub_items(&self) -> usize {
        self.milestones.iter().map(|m| m.sub_items.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiz_kind_display_roundtrip() {
        let variants = [QuizKind::Mcq, QuizKind::Match];
        for v in &variants {
            let s = v.to_string();
            let parsed: QuizKind = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn quiz_kind_invalid() {
        let result = "essay".parse::<QuizKind>();
        assert!(result.is_err());
    }

    #[test]
    fn cancel_scope_serializes_any_as_string() {
        let json = serde_json::to_string(&CancelScope::Any).expect("serialize");
        assert_eq!(json, "\"any\"");
    }

    #[test]
    fn cancel_scope_serializes_milestone_as_number() {
        let json = serde_json::to_string(&CancelScope::Milestone(3)).expect("serialize");
        assert_eq!(json, "3");
    }

    #[test]
    fn cancel_scope_deserializes_both_shapes() {
        let any: CancelScope = serde_json::from_str("\"any\"").expect("parse any");
        assert_eq!(any, CancelScope::Any);
        let ms: CancelScope = serde_json::from_str("7").expect("parse index");
        assert_eq!(ms, CancelScope::Milestone(7));
    }

    #[test]
    fn cancel_scope_rejects_unknown_string() {
        let result = serde_json::from_str::<CancelScope>("\"all\"");
        assert!(result.is_err());
    }

    #[test]
    fn cancel_scope_matching() {
        assert!(CancelScope::Any.matches(0));
        assert!(CancelScope::Any.matches(9));
        assert!(CancelScope::Milestone(2).matches(2));
        assert!(!CancelScope::Milestone(2).matches(3));
    }

    #[test]
    fn quiz_serializes_with_kind_tag() {
        let quiz = Quiz::Mcq {
            questions: vec![QuizQuestion {
                stem: "What does a pointer store?".into(),
                choices: vec!["An address".into(), "A value".into(), "A type".into()],
                answer: 0,
            }],
        };
        let value = serde_json::to_value(&quiz).expect("serialize");
        assert_eq!(value["kind"], "mcq");
        assert_eq!(value["questions"][0]["answer"], 0);

        let quiz = Quiz::Match {
            pairs: vec![MatchingPair {
                term: "Heap".into(),
                definition: "Region for dynamic allocation".into(),
            }],
        };
        let value = serde_json::to_value(&quiz).expect("serialize");
        assert_eq!(value["kind"], "match");
        assert_eq!(value["pairs"][0]["term"], "Heap");
    }

    #[test]
    fn material_matrix_uses_string_keys() {
        let mut matrix = MaterialMatrix::new();
        matrix.insert(
            2,
            vec![Material {
                milestone_index: 2,
                sub_index: 0,
                title: "Ownership".into(),
                body: "Every value has a single owner.".into(),
                bullet_points: vec![],
                image_ref: "https://example.test/seed/abc".into(),
            }],
        );
        let value = serde_json::to_value(&matrix).expect("serialize");
        assert!(value.get("2").is_some());
        assert!(value.get("0").is_none());

        let back: MaterialMatrix = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back.len(), 1);
        assert_eq!(back[&2][0].sub_index, 0);
    }

    #[test]
    fn generation_state_canceled_defaults_false() {
        // Records written before cancellation existed lack the field.
        let legacy = r#"{"in_progress": false, "started_at": "2026-01-10T08:30:00Z"}"#;
        let state: GenerationState = serde_json::from_str(legacy).expect("parse legacy");
        assert!(!state.canceled);
        assert!(state.cancel_requested.is_none());
        assert!(state.target_milestone.is_none());
    }

    #[test]
    fn progress_record_default_is_empty() {
        let record = ProgressRecord::default();
        assert!(record.completed_tasks.is_empty());
        assert_eq!(record.percent, 0.0);
    }

    #[test]
    fn progress_key_formats() {
        assert_eq!(task_key(0, 0), "m-0-t-0");
        assert_eq!(task_key(3, 11), "m-3-t-11");
        assert_eq!(quiz_key(0), "quiz-m-0");
        assert_eq!(quiz_key(4), "quiz-m-4");
    }
}
