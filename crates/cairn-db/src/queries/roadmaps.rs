//! Database query functions for the `roadmaps` table.
//!
//! All updates here are read-modify-write on JSONB columns with no version
//! token; the single-flight gate in cairn-core keeps concurrent generation
//! runs from interleaving writes on the same owner's roadmaps.

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{
    GenerationState, MaterialMatrix, MilestoneOutline, ProgressRecord, Quiz, Roadmap,
};

/// Insert a new roadmap with its outline. Content columns start at their
/// server-side defaults (empty matrices, null generation, zero progress).
pub async fn insert_roadmap(
    pool: &PgPool,
    owner_id: Uuid,
    title: &str,
    milestones: &[MilestoneOutline],
) -> Result<Roadmap> {
    let roadmap = sqlx::query_as::<_, Roadmap>(
        "INSERT INTO roadmaps (id, owner_id, title, milestones) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(owner_id)
    .bind(title)
    .bind(Json(milestones))
    .fetch_one(pool)
    .await
    .context("failed to insert roadmap")?;

    Ok(roadmap)
}

/// Fetch a roadmap by its ID.
pub async fn get_roadmap(pool: &PgPool, id: Uuid) -> Result<Option<Roadmap>> {
    let roadmap = sqlx::query_as::<_, Roadmap>("SELECT * FROM roadmaps WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch roadmap")?;

    Ok(roadmap)
}

/// List all roadmaps, ordered by creation time (newest first).
pub async fn list_roadmaps(pool: &PgPool) -> Result<Vec<Roadmap>> {
    let roadmaps = sqlx::query_as::<_, Roadmap>("SELECT * FROM roadmaps ORDER BY created_at DESC")
        .fetch_all(pool)
        .await
        .context("failed to list roadmaps")?;

    Ok(roadmaps)
}

/// List one owner's roadmaps, ordered by creation time (newest first).
pub async fn list_roadmaps_for_owner(pool: &PgPool, owner_id: Uuid) -> Result<Vec<Roadmap>> {
    let roadmaps = sqlx::query_as::<_, Roadmap>(
        "SELECT * FROM roadmaps WHERE owner_id = $1 ORDER BY created_at DESC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
    .context("failed to list roadmaps for owner")?;

    Ok(roadmaps)
}

/// Overwrite the whole material matrix. Called after every generated item so
/// that a failed or canceled run leaves its finished materials behind.
pub async fn update_materials(pool: &PgPool, id: Uuid, materials: &MaterialMatrix) -> Result<()> {
    let result =
        sqlx::query("UPDATE roadmaps SET materials = $1, updated_at = now() WHERE id = $2")
            .bind(Json(materials))
            .bind(id)
            .execute(pool)
            .await
            .context("failed to update materials")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("roadmap {id} not found");
    }

    Ok(())
}

/// Insert or replace a single milestone's quiz without touching the rest of
/// the quiz matrix.
pub async fn upsert_quiz(pool: &PgPool, id: Uuid, milestone_index: u32, quiz: &Quiz) -> Result<()> {
    let result = sqlx::query(
        "UPDATE roadmaps \
         SET quizzes = jsonb_set(quizzes, $1, $2), updated_at = now() \
         WHERE id = $3",
    )
    .bind(vec![milestone_index.to_string()])
    .bind(Json(quiz))
    .bind(id)
    .execute(pool)
    .await
    .context("failed to upsert quiz")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("roadmap {id} not found");
    }

    Ok(())
}

/// Overwrite the generation state document. `None` writes the JSON null
/// sentinel, meaning no run has ever started.
pub async fn update_generation(
    pool: &PgPool,
    id: Uuid,
    state: Option<&GenerationState>,
) -> Result<()> {
    let result =
        sqlx::query("UPDATE roadmaps SET generation = $1, updated_at = now() WHERE id = $2")
            .bind(Json(state))
            .bind(id)
            .execute(pool)
            .await
            .context("failed to update generation state")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("roadmap {id} not found");
    }

    Ok(())
}

/// Fetch only the generation state, bypassing any roadmap already held in
/// memory. The generation loop polls this between sub-items so it observes
/// cancel requests written after the run began.
pub async fn get_generation(pool: &PgPool, id: Uuid) -> Result<Option<GenerationState>> {
    let row: Option<(Json<Option<GenerationState>>,)> =
        sqlx::query_as("SELECT generation FROM roadmaps WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch generation state")?;

    Ok(row.and_then(|(state,)| state.0))
}

/// Overwrite the learner progress document.
pub async fn update_progress(pool: &PgPool, id: Uuid, progress: &ProgressRecord) -> Result<()> {
    let result =
        sqlx::query("UPDATE roadmaps SET progress = $1, updated_at = now() WHERE id = $2")
            .bind(Json(progress))
            .bind(id)
            .execute(pool)
            .await
            .context("failed to update progress")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("roadmap {id} not found");
    }

    Ok(())
}

/// Mark a roadmap published. Published roadmaps refuse regeneration.
pub async fn publish_roadmap(pool: &PgPool, id: Uuid) -> Result<Roadmap> {
    let roadmap = sqlx::query_as::<_, Roadmap>(
        "UPDATE roadmaps \
         SET published = TRUE, updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to publish roadmap")?;

    match roadmap {
        Some(r) => Ok(r),
        None => anyhow::bail!("roadmap {id} not found"),
    }
}

/// Generation state of one roadmap, as seen by the single-flight scan.
#[derive(Debug, Clone)]
pub struct RoadmapGeneration {
    pub roadmap_id: Uuid,
    pub state: Option<GenerationState>,
}

/// Fetch the generation states of all of an owner's roadmaps except the one
/// being triggered. Re-triggering a roadmap never conflicts with itself;
/// the new run simply overwrites the stored state.
pub async fn generation_states_for_owner(
    pool: &PgPool,
    owner_id: Uuid,
    exclude: Uuid,
) -> Result<Vec<RoadmapGeneration>> {
    let rows: Vec<(Uuid, Json<Option<GenerationState>>)> =
        sqlx::query_as("SELECT id, generation FROM roadmaps WHERE owner_id = $1 AND id <> $2")
            .bind(owner_id)
            .bind(exclude)
            .fetch_all(pool)
            .await
            .context("failed to scan owner generation states")?;

    Ok(rows
        .into_iter()
        .map(|(roadmap_id, state)| RoadmapGeneration {
            roadmap_id,
            state: state.0,
        })
        .collect())
}
