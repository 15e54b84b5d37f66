//! Quiz synthesis: a strategy chain that always produces a quiz.
//!
//! Kind selection alternates by milestone parity. Each kind tries its rich
//! strategies first and falls through on any failure; the chain terminates
//! in an outline-derived fallback that cannot fail, so synthesis is total
//! and upstream junk never becomes a caller-visible error.

pub mod fallback;
pub mod pairs;
pub mod sanitize;
pub mod validate;

use sqlx::PgPool;
use uuid::Uuid;

use cairn_db::models::{Material, MilestoneOutline, Quiz, QuizKind};
use cairn_db::queries::roadmaps;

use crate::error::GenerationError;
use crate::gateway::CompletionGateway;
use crate::prompt;

/// Quiz kind for a milestone: even indices get multiple choice, odd get
/// term matching.
pub fn expected_kind(milestone_index: u32) -> QuizKind {
    if milestone_index % 2 == 0 {
        QuizKind::Mcq
    } else {
        QuizKind::Match
    }
}

/// Synthesize a quiz for one milestone.
///
/// Gateway failures during synthesis are logged and swallowed; a run that
/// reached this point still finishes with a quiz.
pub async fn synthesize(
    gateway: &dyn CompletionGateway,
    milestone_index: u32,
    outline: &MilestoneOutline,
    materials: &[Material],
) -> Quiz {
    match expected_kind(milestone_index) {
        QuizKind::Mcq => {
            if let Some(quiz) = upstream_mcq(gateway, outline, materials).await {
                return quiz;
            }
        }
        QuizKind::Match => {
            if let Some(quiz) = upstream_pairs(gateway, outline, materials).await {
                return quiz;
            }
            let derived = pairs::derive_pairs(materials);
            if derived.len() >= pairs::MIN_PAIRS {
                tracing::debug!(milestone = milestone_index, pairs = derived.len(), "matching quiz derived from materials");
                return Quiz::Match { pairs: derived };
            }
        }
    }

    tracing::debug!(milestone = milestone_index, "quiz synthesis fell back to outline titles");
    Quiz::Mcq {
        questions: fallback::title_fallback(outline, &mut rand::rng()),
    }
}

async fn upstream_mcq(
    gateway: &dyn CompletionGateway,
    outline: &MilestoneOutline,
    materials: &[Material],
) -> Option<Quiz> {
    let request = prompt::mcq_request(outline, materials);
    let completion = match gateway.complete(request).await {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "mcq completion failed, falling through");
            return None;
        }
    };
    let questions = validate::questions_from_completion(&completion);
    if questions.is_empty() {
        return None;
    }
    Some(Quiz::Mcq { questions })
}

async fn upstream_pairs(
    gateway: &dyn CompletionGateway,
    outline: &MilestoneOutline,
    materials: &[Material],
) -> Option<Quiz> {
    let request = prompt::matching_request(outline, materials);
    let completion = match gateway.complete(request).await {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "matching completion failed, falling through");
            return None;
        }
    };
    let pairs = pairs::pairs_from_completion(&completion);
    if pairs.is_empty() {
        return None;
    }
    Some(Quiz::Match { pairs })
}

/// Serve a milestone's quiz, synthesizing and persisting when needed.
///
/// A stored quiz of the expected kind is served as-is. A stored quiz of the
/// wrong kind (written before kind selection changed) gets one upgrade
/// attempt per read: the fresh quiz replaces it only when the chain produces
/// the expected kind, otherwise the stored quiz keeps being served. With no
/// stored quiz at all, whatever the chain produces is persisted and served.
pub async fn fetch_or_synthesize(
    pool: &PgPool,
    gateway: &dyn CompletionGateway,
    roadmap_id: Uuid,
    milestone_index: u32,
) -> Result<Quiz, GenerationError> {
    let roadmap = roadmaps::get_roadmap(pool, roadmap_id)
        .await?
        .ok_or_else(|| GenerationError::not_found(format!("roadmap {roadmap_id}")))?;
    let outline = roadmap
        .milestones
        .get(milestone_index as usize)
        .cloned()
        .ok_or_else(|| {
            GenerationError::not_found(format!(
                "milestone {milestone_index} on roadmap {roadmap_id}"
            ))
        })?;
    let expected = expected_kind(milestone_index);
    let materials = roadmap
        .materials
        .get(&milestone_index)
        .cloned()
        .unwrap_or_default();

    if let Some(stored) = roadmap.quizzes.get(&milestone_index) {
        if stored.kind() == expected {
            return Ok(stored.clone());
        }
        let candidate = synthesize(gateway, milestone_index, &outline, &materials).await;
        if candidate.kind() == expected {
            roadmaps::upsert_quiz(pool, roadmap_id, milestone_index, &candidate).await?;
            tracing::info!(
                roadmap_id = %roadmap_id,
                milestone = milestone_index,
                from = %stored.kind(),
                to = %candidate.kind(),
                "legacy quiz upgraded in place"
            );
            return Ok(candidate);
        }
        return Ok(stored.clone());
    }

    let quiz = synthesize(gateway, milestone_index, &outline, &materials).await;
    roadmaps::upsert_quiz(pool, roadmap_id, milestone_index, &quiz).await?;
    Ok(quiz)
}
