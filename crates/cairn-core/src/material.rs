//! Post-processing of material completions into persistable records.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use cairn_db::models::Material;

/// Upper bound on a stored body, in characters.
pub const MAX_BODY_CHARS: usize = 4000;

/// Assemble the persisted record for one generated sub-item.
pub fn build_material(
    roadmap_id: Uuid,
    milestone_index: u32,
    sub_index: u32,
    title: &str,
    completion: &str,
) -> Material {
    let (body, bullet_points) = split_body_and_bullets(completion);
    Material {
        milestone_index,
        sub_index,
        title: title.to_string(),
        body: truncate_body(&body),
        bullet_points,
        image_ref: image_ref(roadmap_id, milestone_index, sub_index),
    }
}

/// Truncate on a character boundary; completions are untrusted and can run
/// long past the token budget's intent.
pub fn truncate_body(text: &str) -> String {
    match text.char_indices().nth(MAX_BODY_CHARS) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

/// Split a completion into prose body and trailing bullet lines.
///
/// The prompt asks for a "Key points:" list at the end; any trailing run of
/// `- ` lines (plus the optional heading above it) is lifted into
/// `bullet_points` and stripped from the body. Completions without such a
/// block come back unchanged with no bullets.
pub fn split_body_and_bullets(text: &str) -> (String, Vec<String>) {
    let lines: Vec<&str> = text.lines().collect();

    // Walk backwards over the trailing bullet block.
    let mut split = lines.len();
    while split > 0 {
        let line = lines[split - 1].trim();
        if line.starts_with("- ") || line.is_empty() {
            split -= 1;
        } else {
            break;
        }
    }

    // A heading directly above the block belongs to it.
    if split > 0 {
        let heading = lines[split - 1].trim().trim_end_matches(':').to_lowercase();
        if heading == "key points" || heading == "key takeaways" {
            split -= 1;
        }
    }

    let bullets: Vec<String> = lines[split..]
        .iter()
        .filter_map(|line| line.trim().strip_prefix("- "))
        .map(|bullet| bullet.trim().to_string())
        .filter(|bullet| !bullet.is_empty())
        .collect();

    if bullets.is_empty() {
        return (text.trim().to_string(), Vec::new());
    }

    let body = lines[..split].join("\n").trim().to_string();
    (body, bullets)
}

/// Deterministic per-slot image reference.
///
/// The seed hashes the roadmap id and item coordinates, so regenerating a
/// sub-item keeps its image stable while distinct slots get distinct images.
pub fn image_ref(roadmap_id: Uuid, milestone_index: u32, sub_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("cairn:{roadmap_id}:{milestone_index}:{sub_index}"));
    let digest = hasher.finalize();
    let seed = hex::encode(&digest[..8]);
    format!("https://picsum.photos/seed/{seed}/640/360")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_trailing_bullets_with_heading() {
        let completion = "Ownership means every value has one owner.\n\
\n\
Key points:\n\
- Ownership: each value has exactly one owner\n\
- Move: assignment transfers ownership\n\
- Borrow: references access without owning";
        let (body, bullets) = split_body_and_bullets(completion);
        assert_eq!(body, "Ownership means every value has one owner.");
        assert_eq!(bullets.len(), 3);
        assert_eq!(bullets[0], "Ownership: each value has exactly one owner");
        assert!(!body.contains("Key points"));
    }

    #[test]
    fn splits_trailing_bullets_without_heading() {
        let completion = "Some prose.\n\n- First: one\n- Second: two";
        let (body, bullets) = split_body_and_bullets(completion);
        assert_eq!(body, "Some prose.");
        assert_eq!(bullets, vec!["First: one", "Second: two"]);
    }

    #[test]
    fn keeps_prose_without_bullets_intact() {
        let completion = "Just two paragraphs.\n\nNo list at the end.\n";
        let (body, bullets) = split_body_and_bullets(completion);
        assert_eq!(body, "Just two paragraphs.\n\nNo list at the end.");
        assert!(bullets.is_empty());
    }

    #[test]
    fn mid_text_bullets_stay_in_the_body() {
        let completion = "Intro.\n- inline list item\nClosing paragraph after the list.";
        let (body, bullets) = split_body_and_bullets(completion);
        assert!(bullets.is_empty());
        assert!(body.contains("inline list item"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_BODY_CHARS + 10);
        let truncated = truncate_body(&long);
        assert_eq!(truncated.chars().count(), MAX_BODY_CHARS);

        let short = "short body";
        assert_eq!(truncate_body(short), short);
    }

    #[test]
    fn image_ref_is_stable_per_slot() {
        let roadmap_id = Uuid::new_v4();
        let a = image_ref(roadmap_id, 0, 1);
        let b = image_ref(roadmap_id, 0, 1);
        let c = image_ref(roadmap_id, 0, 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("https://picsum.photos/seed/"));
    }

    #[test]
    fn build_material_fills_every_field() {
        let roadmap_id = Uuid::new_v4();
        let material = build_material(
            roadmap_id,
            1,
            2,
            "Tokio tasks",
            "Tasks are lightweight.\n\nKey points:\n- Task: a spawned future",
        );
        assert_eq!(material.milestone_index, 1);
        assert_eq!(material.sub_index, 2);
        assert_eq!(material.title, "Tokio tasks");
        assert_eq!(material.body, "Tasks are lightweight.");
        assert_eq!(material.bullet_points, vec!["Task: a spawned future"]);
        assert_eq!(material.image_ref, image_ref(roadmap_id, 1, 2));
    }
}
