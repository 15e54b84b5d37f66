//! The generation orchestrator: drives one milestone's content run from
//! trigger to persisted materials and quiz.
//!
//! Runs are strictly serial over a milestone's sub-items, and every finished
//! sub-item is persisted before the next starts. Failures and cancels
//! therefore always leave a clean prefix behind, and a retry resumes after
//! the last persisted item instead of starting over.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use cairn_db::models::{CancelRequest, CancelScope, GenerationState, ProgressRecord, QuizKind};
use cairn_db::queries::roadmaps;

use crate::error::{self, GenerationError};
use crate::gateway::CompletionGateway;
use crate::material;
use crate::prompt;
use crate::quiz;
use crate::singleflight;

/// Caller-selected behavior for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Regenerate every sub-item even when the milestone is complete.
    pub force: bool,
    /// Clear the milestone's stored materials and the whole progress record
    /// before generating.
    pub reset: bool,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Every sub-item was generated and the quiz was written.
    Completed {
        material_count: usize,
        quiz_kind: QuizKind,
        quiz_len: usize,
    },
    /// The milestone already had a full material set and force was off.
    Skipped { material_count: usize },
    /// A cancel request was honored between sub-items.
    Canceled { materials_written: usize },
}

/// Acknowledgement returned by [`request_cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelAck {
    /// Whether a live run existed when the flag was written.
    pub in_flight: bool,
}

/// Run content generation for one milestone.
pub async fn generate_milestone(
    pool: &PgPool,
    gateway: &dyn CompletionGateway,
    roadmap_id: Uuid,
    milestone_index: u32,
    options: GenerateOptions,
) -> Result<GenerationOutcome, GenerationError> {
    // 1. Load the roadmap and vet the request.
    let roadmap = roadmaps::get_roadmap(pool, roadmap_id)
        .await?
        .ok_or_else(|| GenerationError::not_found(format!("roadmap {roadmap_id}")))?;
    if roadmap.published {
        return Err(GenerationError::Immutable(roadmap_id));
    }
    let outline = roadmap
        .milestones
        .get(milestone_index as usize)
        .cloned()
        .ok_or_else(|| {
            GenerationError::not_found(format!(
                "milestone {milestone_index} on roadmap {roadmap_id}"
            ))
        })?;

    // 2. Single-flight: one live run per owner across all their roadmaps.
    //    The target roadmap is excluded from the scan, so re-triggering
    //    overwrites a stuck self-run instead of deadlocking on it.
    singleflight::try_acquire(pool, roadmap.owner_id, roadmap_id).await?;

    let mut materials = roadmap.materials.0.clone();

    // 3. Reset wipes the milestone's content and all learner progress
    //    before anything else happens.
    if options.reset {
        materials.remove(&milestone_index);
        roadmaps::update_materials(pool, roadmap_id, &materials).await?;
        roadmaps::update_progress(pool, roadmap_id, &ProgressRecord::default()).await?;
        tracing::info!(
            roadmap_id = %roadmap_id,
            milestone = milestone_index,
            "reset cleared materials and progress"
        );
    }

    let total = outline.sub_items.len();
    let existing = materials.get(&milestone_index).map_or(0, Vec::len);

    // 4. Complete and not forced: nothing to do, aggregate untouched.
    if !options.force && existing >= total {
        tracing::info!(
            roadmap_id = %roadmap_id,
            milestone = milestone_index,
            "milestone already generated, skipping"
        );
        return Ok(GenerationOutcome::Skipped {
            material_count: existing,
        });
    }

    // 5. Force restarts from scratch; otherwise resume after the persisted
    //    prefix a failed or canceled run left behind. The force clear is not
    //    persisted yet, so old content survives until the first new item
    //    lands.
    let start_index = if options.force {
        materials.remove(&milestone_index);
        0
    } else {
        existing
    };

    // 6. Take the single-flight slot by writing a fresh in-progress state.
    let state = GenerationState::begin(milestone_index, Utc::now());
    roadmaps::update_generation(pool, roadmap_id, Some(&state)).await?;

    tracing::info!(
        roadmap_id = %roadmap_id,
        milestone = milestone_index,
        start = start_index,
        total = total,
        force = options.force,
        "generation run started"
    );

    // 7. Strictly serial sub-item loop: poll for cancellation, generate,
    //    persist, advance.
    for sub_index in start_index..total {
        // 7a. Cancellation is polled from a fresh read so a flag written
        //     after the run began is observed at the next boundary.
        if let Some(current) = roadmaps::get_generation(pool, roadmap_id).await? {
            if let Some(request) = &current.cancel_requested {
                if request.scope.matches(milestone_index) {
                    let written = materials.get(&milestone_index).map_or(0, Vec::len);
                    finalize_canceled(pool, roadmap_id, current).await?;
                    tracing::info!(
                        roadmap_id = %roadmap_id,
                        milestone = milestone_index,
                        written = written,
                        "generation run canceled"
                    );
                    return Ok(GenerationOutcome::Canceled {
                        materials_written: written,
                    });
                }
            }
        }

        // 7b. One completion per sub-item. Everything generated so far is
        //     already persisted, so a failure only needs to release the slot
        //     before surfacing.
        let title = &outline.sub_items[sub_index];
        let request = prompt::material_request(&roadmap.title, &outline, title);
        let completion = match gateway.complete(request).await {
            Ok(text) => text,
            Err(err) => {
                finalize(pool, roadmap_id).await?;
                let classified = error::classify_upstream_error(err);
                tracing::warn!(
                    roadmap_id = %roadmap_id,
                    milestone = milestone_index,
                    sub_index = sub_index,
                    error = %classified,
                    "generation run aborted"
                );
                return Err(classified);
            }
        };
        if completion.trim().is_empty() {
            finalize(pool, roadmap_id).await?;
            return Err(GenerationError::MalformedUpstream(format!(
                "empty completion for sub-item {sub_index}"
            )));
        }

        // 7c. Persist the finished item before moving on.
        let record = material::build_material(
            roadmap_id,
            milestone_index,
            sub_index as u32,
            title,
            &completion,
        );
        materials.entry(milestone_index).or_default().push(record);
        roadmaps::update_materials(pool, roadmap_id, &materials).await?;
        tracing::debug!(
            roadmap_id = %roadmap_id,
            milestone = milestone_index,
            sub_index = sub_index,
            "material persisted"
        );
    }

    // 8. The quiz closes the run. Synthesis is total, so a run that got this
    //    far always finishes with a quiz in place.
    let generated = materials.get(&milestone_index).cloned().unwrap_or_default();
    let quiz = quiz::synthesize(gateway, milestone_index, &outline, &generated).await;
    roadmaps::upsert_quiz(pool, roadmap_id, milestone_index, &quiz).await?;

    // 9. Release the slot.
    finalize(pool, roadmap_id).await?;

    tracing::info!(
        roadmap_id = %roadmap_id,
        milestone = milestone_index,
        materials = generated.len(),
        quiz_kind = %quiz.kind(),
        quiz_len = quiz.len(),
        "generation run completed"
    );

    Ok(GenerationOutcome::Completed {
        material_count: generated.len(),
        quiz_kind: quiz.kind(),
        quiz_len: quiz.len(),
    })
}

/// Write a cancellation request onto the roadmap's generation state.
///
/// The flag is honored cooperatively: a running loop polls between sub-items
/// and stops at the next boundary. The acknowledgement reports what was
/// observed at write time; the request stands even if no run ever reads it.
pub async fn request_cancel(
    pool: &PgPool,
    roadmap_id: Uuid,
    scope: CancelScope,
) -> Result<CancelAck, GenerationError> {
    let roadmap = roadmaps::get_roadmap(pool, roadmap_id)
        .await?
        .ok_or_else(|| GenerationError::not_found(format!("roadmap {roadmap_id}")))?;

    let Some(mut state) = roadmap.generation.0.clone() else {
        // Never generated: nothing to flag, nothing in flight.
        return Ok(CancelAck { in_flight: false });
    };

    let now = Utc::now();
    let in_flight = singleflight::is_live(&state, now);
    state.cancel_requested = Some(CancelRequest { scope, at: now });
    roadmaps::update_generation(pool, roadmap_id, Some(&state)).await?;

    tracing::info!(
        roadmap_id = %roadmap_id,
        scope = %scope,
        in_flight = in_flight,
        "cancel requested"
    );
    Ok(CancelAck { in_flight })
}

/// Fire-and-forget generation, used by read surfaces to auto-start the first
/// milestone. The outcome is logged and dropped.
pub fn spawn_generation(
    pool: PgPool,
    gateway: Arc<dyn CompletionGateway>,
    roadmap_id: Uuid,
    milestone_index: u32,
    options: GenerateOptions,
) {
    tokio::spawn(async move {
        match generate_milestone(&pool, gateway.as_ref(), roadmap_id, milestone_index, options)
            .await
        {
            Ok(outcome) => tracing::info!(
                roadmap_id = %roadmap_id,
                milestone = milestone_index,
                outcome = ?outcome,
                "background generation finished"
            ),
            Err(err) => tracing::warn!(
                roadmap_id = %roadmap_id,
                milestone = milestone_index,
                error = %err,
                "background generation failed"
            ),
        }
    });
}

/// Mark the stored state finished, releasing the single-flight slot.
async fn finalize(pool: &PgPool, roadmap_id: Uuid) -> Result<(), GenerationError> {
    if let Some(mut state) = roadmaps::get_generation(pool, roadmap_id).await? {
        state.in_progress = false;
        state.finished_at = Some(Utc::now());
        roadmaps::update_generation(pool, roadmap_id, Some(&state)).await?;
    }
    Ok(())
}

/// Finish a canceled run, keeping the request on the state for audit.
async fn finalize_canceled(
    pool: &PgPool,
    roadmap_id: Uuid,
    mut state: GenerationState,
) -> Result<(), GenerationError> {
    let now = Utc::now();
    state.in_progress = false;
    state.canceled = true;
    state.canceled_at = Some(now);
    state.finished_at = Some(now);
    roadmaps::update_generation(pool, roadmap_id, Some(&state)).await?;
    Ok(())
}
