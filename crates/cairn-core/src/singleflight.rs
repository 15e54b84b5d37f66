//! The single-flight gate: at most one live generation run per owner.
//!
//! The lock is the persisted [`GenerationState`] document itself. A trigger
//! scans the owner's other roadmaps for a live state and refuses when it
//! finds one; triggering the same roadmap again simply overwrites its own
//! state, so a stuck self-run never wedges its roadmap.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use cairn_db::models::GenerationState;
use cairn_db::queries::roadmaps;

use crate::error::GenerationError;

/// A run older than this no longer blocks new runs. Crash-abandoned states
/// keep `in_progress` stuck on; the window stops them from blocking the
/// owner forever.
pub const STALE_AFTER_SECS: i64 = 45 * 60;

/// Whether a stored state still counts as a live run at `now`.
pub fn is_live(state: &GenerationState, now: DateTime<Utc>) -> bool {
    state.in_progress && (now - state.started_at).num_seconds() <= STALE_AFTER_SECS
}

/// Check the owner's other roadmaps for a live run.
///
/// Returns `Conflict` with the busy roadmap's id when one is found. The scan
/// and the caller's subsequent lock write are not atomic; two simultaneous
/// triggers can both pass. That window produces a wasted duplicate run, not
/// corruption, and is accepted.
pub async fn try_acquire(
    pool: &PgPool,
    owner_id: Uuid,
    target_roadmap: Uuid,
) -> Result<(), GenerationError> {
    let states = roadmaps::generation_states_for_owner(pool, owner_id, target_roadmap).await?;
    let now = Utc::now();
    for entry in states {
        if let Some(state) = &entry.state {
            if is_live(state, now) {
                tracing::info!(
                    owner_id = %owner_id,
                    busy_roadmap = %entry.roadmap_id,
                    started_at = %state.started_at,
                    "generation refused, owner already has a live run"
                );
                return Err(GenerationError::Conflict {
                    busy_roadmap: entry.roadmap_id,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn fresh_in_progress_state_is_live() {
        let now = Utc::now();
        let state = GenerationState::begin(0, now - Duration::minutes(5));
        assert!(is_live(&state, now));
    }

    #[test]
    fn finished_state_is_not_live() {
        let now = Utc::now();
        let mut state = GenerationState::begin(0, now - Duration::minutes(5));
        state.in_progress = false;
        state.finished_at = Some(now);
        assert!(!is_live(&state, now));
    }

    #[test]
    fn state_past_the_staleness_window_is_not_live() {
        let now = Utc::now();
        let stale = GenerationState::begin(0, now - Duration::minutes(46));
        assert!(!is_live(&stale, now));

        let just_inside = GenerationState::begin(0, now - Duration::minutes(44));
        assert!(is_live(&just_inside, now));
    }
}
