//! The terminal quiz strategy: questions built from the outline itself.
//!
//! Runs when every richer strategy has failed, so it must succeed on any
//! input, including a milestone with no materials at all.

use rand::Rng;

use cairn_db::models::{MilestoneOutline, QuizQuestion};

use super::validate;

/// Filler distractors used when a milestone has too few sibling sub-items
/// to fill a choice list.
const FILLER_CHOICES: &[&str] = &["None of the above", "All of the above"];

const MIN_CHOICES: usize = 3;
const MAX_CHOICES: usize = 4;

/// Build recall questions from sub-item titles.
///
/// Each question asks which topic is covered at a given position, with the
/// true title as the correct choice and sibling titles as distractors.
/// Always returns at least one question with at least three choices.
pub fn title_fallback<R: Rng>(outline: &MilestoneOutline, rng: &mut R) -> Vec<QuizQuestion> {
    if outline.sub_items.is_empty() {
        // A milestone with no sub-items should not exist, but the chain must
        // still terminate with a usable quiz.
        let mut question = QuizQuestion {
            stem: format!("What is the focus of the milestone \"{}\"?", outline.topic),
            choices: pad_choices(vec![outline.topic.clone()]),
            answer: 0,
        };
        validate::shuffle_choices(&mut question, rng);
        return vec![question];
    }

    let mut questions = Vec::new();
    for (index, title) in outline
        .sub_items
        .iter()
        .take(validate::MAX_QUESTIONS)
        .enumerate()
    {
        let mut choices = vec![title.clone()];
        for (sibling_index, sibling) in outline.sub_items.iter().enumerate() {
            if sibling_index == index {
                continue;
            }
            choices.push(sibling.clone());
            if choices.len() == MAX_CHOICES {
                break;
            }
        }
        let mut question = QuizQuestion {
            stem: format!(
                "Which topic is covered {} in \"{}\"?",
                ordinal(index + 1),
                outline.topic
            ),
            choices: pad_choices(choices),
            answer: 0,
        };
        validate::shuffle_choices(&mut question, rng);
        questions.push(question);
    }
    questions
}

fn pad_choices(mut choices: Vec<String>) -> Vec<String> {
    for filler in FILLER_CHOICES {
        if choices.len() >= MIN_CHOICES {
            break;
        }
        choices.push((*filler).to_string());
    }
    choices
}

fn ordinal(n: usize) -> String {
    match n {
        1 => "first".to_string(),
        2 => "second".to_string(),
        3 => "third".to_string(),
        4 => "fourth".to_string(),
        5 => "fifth".to_string(),
        _ => format!("{n}th"),
    }
}
