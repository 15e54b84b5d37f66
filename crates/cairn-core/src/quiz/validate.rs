//! Validation and repair of upstream multiple-choice output.
//!
//! Upstream JSON is treated as hostile: questions are dropped rather than
//! repaired when they miss the floors, and whatever survives is shuffled
//! with the answer index recomputed from its text.

use std::collections::HashSet;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;

use cairn_db::models::QuizQuestion;

use super::sanitize;

const MIN_CHOICES: usize = 3;
const MIN_STEM_CHARS: usize = 8;
pub const MAX_QUESTIONS: usize = 5;

/// Phrases that mark a question as being about the roadmap's structure
/// rather than its content.
const META_STEM_MARKERS: &[&str] = &[
    "which sub-item",
    "which milestone",
    "this roadmap",
    "the outline",
    "section of the roadmap",
];

/// Shape of one upstream MCQ item before validation.
#[derive(Debug, Deserialize)]
pub struct RawQuestion {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub answer: Option<serde_json::Value>,
}

/// Parse an upstream completion into validated questions.
///
/// Any failure, from missing JSON to zero surviving questions, returns an
/// empty vec; synthesis falls through to the next strategy instead of
/// surfacing upstream junk as an error.
pub fn questions_from_completion(text: &str) -> Vec<QuizQuestion> {
    let Some(json) = sanitize::extract_json_array(text) else {
        return Vec::new();
    };
    let Ok(raw) = serde_json::from_str::<Vec<RawQuestion>>(&json) else {
        return Vec::new();
    };
    clean_questions(raw)
}

/// Validate, dedupe, shuffle, and cap a batch of raw questions.
pub fn clean_questions(raw: Vec<RawQuestion>) -> Vec<QuizQuestion> {
    let mut rng = rand::rng();
    let mut seen_stems = HashSet::new();
    let mut out = Vec::new();
    for item in raw {
        let Some(mut question) = clean_one(item) else {
            continue;
        };
        if !seen_stems.insert(normalize_stem(&question.stem)) {
            continue;
        }
        shuffle_choices(&mut question, &mut rng);
        out.push(question);
        if out.len() == MAX_QUESTIONS {
            break;
        }
    }
    out
}

fn clean_one(raw: RawQuestion) -> Option<QuizQuestion> {
    let stem = raw.question.trim().to_string();
    if stem.chars().count() < MIN_STEM_CHARS {
        return None;
    }
    if is_meta_stem(&stem) {
        return None;
    }

    // Resolve the correct answer to its text against the raw choice list.
    // The prompt asks for an index, but some models reply with the answer
    // text instead; both are accepted.
    let raw_choices: Vec<String> = raw.choices.iter().map(|c| c.trim().to_string()).collect();
    let correct_text = match raw.answer? {
        serde_json::Value::Number(n) => {
            let index = usize::try_from(n.as_u64()?).ok()?;
            raw_choices.get(index)?.clone()
        }
        serde_json::Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    if correct_text.is_empty() {
        return None;
    }

    // Drop empty and duplicate choices, keeping first occurrences in order.
    let mut seen = HashSet::new();
    let mut choices = Vec::new();
    for choice in raw_choices {
        if choice.is_empty() {
            continue;
        }
        if seen.insert(choice.to_lowercase()) {
            choices.push(choice);
        }
    }
    if choices.len() < MIN_CHOICES {
        return None;
    }

    let answer = choices
        .iter()
        .position(|c| c.to_lowercase() == correct_text.to_lowercase())?;

    Some(QuizQuestion {
        stem,
        choices,
        answer,
    })
}

/// Shuffle the choices and recompute the answer index from its text, so the
/// shuffle can never detach the answer from its choice.
pub fn shuffle_choices<R: Rng>(question: &mut QuizQuestion, rng: &mut R) {
    let correct = question.choices[question.answer].clone();
    question.choices.shuffle(rng);
    question.answer = question
        .choices
        .iter()
        .position(|c| c == &correct)
        .unwrap_or(0);
}

fn is_meta_stem(stem: &str) -> bool {
    let lowered = stem.to_lowercase();
    META_STEM_MARKERS.iter().any(|m| lowered.contains(m))
}

fn normalize_stem(stem: &str) -> String {
    stem.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(question: &str, choices: &[&str], answer: serde_json::Value) -> RawQuestion {
        RawQuestion {
            question: question.to_string(),
            choices: choices.iter().map(|c| c.to_string()).collect(),
            answer: Some(answer),
        }
    }

    #[test]
    fn accepts_a_well_formed_question() {
        let cleaned = clean_questions(vec![raw(
            "What does ownership mean in Rust?",
            &["One owner per value", "Garbage collection", "Manual free"],
            serde_json::json!(0),
        )]);
        assert_eq!(cleaned.len(), 1);
        let q = &cleaned[0];
        assert_eq!(q.choices.len(), 3);
        assert_eq!(q.choices[q.answer], "One owner per value");
    }

    #[test]
    fn shuffle_keeps_answer_attached_to_its_text() {
        let mut rng = rand::rng();
        for _ in 0..50 {
            let mut question = QuizQuestion {
                stem: "Which keyword borrows a value?".to_string(),
                choices: vec![
                    "ref and &".to_string(),
                    "move".to_string(),
                    "clone".to_string(),
                    "drop".to_string(),
                ],
                answer: 0,
            };
            shuffle_choices(&mut question, &mut rng);
            assert_eq!(question.choices[question.answer], "ref and &");
        }
    }

    #[test]
    fn rejects_too_few_distinct_choices() {
        let cleaned = clean_questions(vec![raw(
            "What does ownership mean in Rust?",
            &["One owner", "one owner", "ONE OWNER"],
            serde_json::json!(0),
        )]);
        assert!(cleaned.is_empty());
    }

    #[test]
    fn rejects_short_and_meta_stems() {
        let cleaned = clean_questions(vec![
            raw("Why?", &["a", "b", "c"], serde_json::json!(0)),
            raw(
                "Which sub-item comes first in this roadmap?",
                &["First", "Second", "Third"],
                serde_json::json!(0),
            ),
        ]);
        assert!(cleaned.is_empty());
    }

    #[test]
    fn dedupes_stems_ignoring_case_and_spacing() {
        let cleaned = clean_questions(vec![
            raw(
                "What is a borrow checker?",
                &["A compile-time analysis", "A runtime monitor", "A linter"],
                serde_json::json!(0),
            ),
            raw(
                "what   IS a borrow checker?",
                &["Something else", "Another thing", "A third"],
                serde_json::json!(1),
            ),
        ]);
        assert_eq!(cleaned.len(), 1);
    }

    #[test]
    fn accepts_answer_given_as_text() {
        let cleaned = clean_questions(vec![raw(
            "Which type is heap allocated?",
            &["Box<T>", "i32", "bool"],
            serde_json::json!("box<t>"),
        )]);
        assert_eq!(cleaned.len(), 1);
        let q = &cleaned[0];
        assert_eq!(q.choices[q.answer], "Box<T>");
    }

    #[test]
    fn rejects_out_of_range_answer_index() {
        let cleaned = clean_questions(vec![raw(
            "Which type is heap allocated?",
            &["Box<T>", "i32", "bool"],
            serde_json::json!(9),
        )]);
        assert!(cleaned.is_empty());
    }

    #[test]
    fn caps_the_batch_at_five() {
        let batch: Vec<RawQuestion> = (0..9)
            .map(|i| {
                raw(
                    &format!("Question number {i} about lifetimes?"),
                    &["First choice", "Second choice", "Third choice"],
                    serde_json::json!(0),
                )
            })
            .collect();
        assert_eq!(clean_questions(batch).len(), MAX_QUESTIONS);
    }

    #[test]
    fn completion_parsing_tolerates_fences_and_prose() {
        let completion = "Here you go:\n```json\n[{\"question\": \"What does ownership mean in Rust?\", \"choices\": [\"One owner\", \"GC\", \"Arenas\"], \"answer\": 0}]\n```";
        let questions = questions_from_completion(completion);
        assert_eq!(questions.len(), 1);
    }

    #[test]
    fn completion_parsing_returns_empty_on_junk() {
        assert!(questions_from_completion("I cannot produce a quiz.").is_empty());
        assert!(questions_from_completion("[{\"broken\": ").is_empty());
        assert!(questions_from_completion("[]").is_empty());
    }
}
