//! Prompt construction for material and quiz completions.
//!
//! Prompts are assembled as plain strings. Quiz prompts carry the milestone's
//! generated material verbatim so questions stay grounded in what the learner
//! actually read.

use cairn_db::models::{Material, MilestoneOutline};

use crate::gateway::CompletionRequest;

const MATERIAL_MAX_TOKENS: u32 = 900;
const QUIZ_MAX_TOKENS: u32 = 700;

const SYSTEM_ROLE: &str = "You are a curriculum writer for a self-paced learning platform. \
You write accurate, concrete teaching material and follow output format instructions exactly.";

/// Build the completion request for one sub-item's learning material.
pub fn material_request(
    roadmap_title: &str,
    outline: &MilestoneOutline,
    sub_item: &str,
) -> CompletionRequest {
    let mut prompt = String::with_capacity(1024);

    prompt.push_str("Write the learning material for one sub-item of a learning roadmap.\n\n");
    prompt.push_str("Roadmap: ");
    prompt.push_str(roadmap_title);
    prompt.push_str("\nMilestone: ");
    prompt.push_str(&outline.topic);
    prompt.push_str("\nSub-item: ");
    prompt.push_str(sub_item);
    prompt.push_str("\n\n");
    prompt.push_str(
        "Write 2 to 4 short paragraphs explaining the sub-item to a motivated beginner, \
concrete and example-driven. Finish with a \"Key points:\" section of 3 to 5 lines, \
each formatted exactly as \"- Term: one-sentence definition\".\n",
    );

    CompletionRequest {
        system: Some(SYSTEM_ROLE.to_string()),
        prompt,
        max_tokens: MATERIAL_MAX_TOKENS,
    }
}

/// Build the completion request for a multiple-choice quiz.
pub fn mcq_request(outline: &MilestoneOutline, materials: &[Material]) -> CompletionRequest {
    let mut prompt = String::with_capacity(4096);

    prompt.push_str("Write a multiple-choice quiz for the milestone \"");
    prompt.push_str(&outline.topic);
    prompt.push_str("\".\n\n");
    prompt.push_str("Rules:\n");
    prompt.push_str("- Return ONLY a JSON array, no prose and no markdown fences.\n");
    prompt.push_str(
        "- Exactly 5 items, each shaped as \
{\"question\": \"...\", \"choices\": [\"...\", \"...\", \"...\", \"...\"], \"answer\": 0}.\n",
    );
    prompt.push_str("- \"answer\" is the zero-based index of the correct choice.\n");
    prompt.push_str("- 4 choices per question, exactly one correct.\n");
    prompt.push_str(
        "- Every question must be answerable from the material below alone; \
do not use outside knowledge.\n",
    );
    prompt.push_str(
        "- Ask about the content itself, never about how the roadmap or its \
sections are organized.\n",
    );
    prompt.push_str("\nMaterial:\n");
    prompt.push_str(&grounding_text(materials));

    CompletionRequest {
        system: Some(SYSTEM_ROLE.to_string()),
        prompt,
        max_tokens: QUIZ_MAX_TOKENS,
    }
}

/// Build the completion request for a term-matching quiz.
pub fn matching_request(outline: &MilestoneOutline, materials: &[Material]) -> CompletionRequest {
    let mut prompt = String::with_capacity(4096);

    prompt.push_str("Write a term-matching quiz for the milestone \"");
    prompt.push_str(&outline.topic);
    prompt.push_str("\".\n\n");
    prompt.push_str("Rules:\n");
    prompt.push_str("- Return ONLY a JSON array, no prose and no markdown fences.\n");
    prompt.push_str(
        "- Between 2 and 6 items, each shaped as {\"term\": \"...\", \"definition\": \"...\"}.\n",
    );
    prompt.push_str(
        "- Terms must appear in the material below; definitions must paraphrase it.\n",
    );
    prompt.push_str("\nMaterial:\n");
    prompt.push_str(&grounding_text(materials));

    CompletionRequest {
        system: Some(SYSTEM_ROLE.to_string()),
        prompt,
        max_tokens: QUIZ_MAX_TOKENS,
    }
}

/// Concatenate a milestone's material for quiz grounding.
fn grounding_text(materials: &[Material]) -> String {
    let mut text = String::with_capacity(4096);
    for material in materials {
        text.push_str("## ");
        text.push_str(&material.title);
        text.push('\n');
        text.push_str(&material.body);
        text.push('\n');
        for bullet in &material.bullet_points {
            text.push_str("- ");
            text.push_str(bullet);
            text.push('\n');
        }
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_outline() -> MilestoneOutline {
        MilestoneOutline {
            topic: "Rust fundamentals".to_string(),
            sub_items: vec![
                "Ownership and borrowing".to_string(),
                "Pattern matching".to_string(),
            ],
        }
    }

    fn sample_material() -> Material {
        Material {
            milestone_index: 0,
            sub_index: 0,
            title: "Ownership and borrowing".to_string(),
            body: "Every value has a single owner.".to_string(),
            bullet_points: vec!["Ownership: each value has one owner".to_string()],
            image_ref: "https://example.test/img".to_string(),
        }
    }

    #[test]
    fn material_request_names_the_slot() {
        let request = material_request("Learn Rust", &sample_outline(), "Pattern matching");
        assert!(request.prompt.contains("Roadmap: Learn Rust"));
        assert!(request.prompt.contains("Milestone: Rust fundamentals"));
        assert!(request.prompt.contains("Sub-item: Pattern matching"));
        assert!(request.prompt.contains("Key points:"));
        assert!(request.system.is_some());
        assert_eq!(request.max_tokens, MATERIAL_MAX_TOKENS);
    }

    #[test]
    fn mcq_request_carries_the_material() {
        let request = mcq_request(&sample_outline(), &[sample_material()]);
        assert!(request.prompt.contains("## Ownership and borrowing"));
        assert!(request.prompt.contains("Every value has a single owner."));
        assert!(request.prompt.contains("- Ownership: each value has one owner"));
        assert!(request.prompt.contains("JSON array"));
        assert!(request.prompt.contains("\"answer\""));
    }

    #[test]
    fn mcq_request_forbids_structure_questions() {
        let request = mcq_request(&sample_outline(), &[]);
        assert!(request.prompt.contains("never about how the roadmap"));
    }

    #[test]
    fn matching_request_asks_for_pairs() {
        let request = matching_request(&sample_outline(), &[sample_material()]);
        assert!(request.prompt.contains("term-matching"));
        assert!(request.prompt.contains("\"term\""));
        assert!(request.prompt.contains("\"definition\""));
        assert!(request.prompt.contains("Rust fundamentals"));
    }

    #[test]
    fn grounding_text_is_empty_for_no_materials() {
        assert!(grounding_text(&[]).is_empty());
    }
}
