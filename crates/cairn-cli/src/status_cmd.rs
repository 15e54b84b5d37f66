//! `cairn status` command: show per-milestone content and the generation lock.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use cairn_core::singleflight;
use cairn_db::models::{quiz_key, task_key};
use cairn_db::queries::roadmaps as roadmap_queries;

/// Show detailed status for a single roadmap.
pub async fn run_status(pool: &PgPool, roadmap_id: Uuid) -> Result<()> {
    let roadmap = roadmap_queries::get_roadmap(pool, roadmap_id)
        .await?
        .with_context(|| format!("roadmap {roadmap_id} not found"))?;

    println!("Roadmap: {} ({})", roadmap.title, roadmap.id);
    println!(
        "Published: {}",
        if roadmap.published { "yes" } else { "no" }
    );
    println!("Progress: {:.0}%", roadmap.progress.percent);
    println!();

    // Generation state summary.
    match roadmap.generation.0.as_ref() {
        None => println!("Generation: never run"),
        Some(state) => {
            let now = Utc::now();
            let phase = if singleflight::is_live(state, now) {
                "running"
            } else if state.in_progress {
                "stale (will be overwritten by the next run)"
            } else if state.canceled {
                "canceled"
            } else {
                "finished"
            };
            println!("Generation: {phase}");
            if let Some(target) = state.target_milestone {
                println!("  Target:    milestone {target}");
            }
            println!(
                "  Started:   {}",
                state.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            if let Some(finished_at) = state.finished_at {
                println!(
                    "  Finished:  {}",
                    finished_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            if let Some(cancel) = state.cancel_requested {
                println!(
                    "  Cancel:    requested for scope {} at {}",
                    cancel.scope,
                    cancel.at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
    }
    println!();

    // Per-milestone listing.
    println!("Milestones:");
    for (index, outline) in roadmap.milestones.iter().enumerate() {
        let index = index as u32;
        let total = outline.sub_items.len();
        let generated = roadmap.materials.get(&index).map_or(0, |m| m.len());
        let completed = (0..total as u32)
            .filter(|sub| {
                roadmap
                    .progress
                    .completed_tasks
                    .contains_key(&task_key(index, *sub))
            })
            .count();
        let quiz = roadmap
            .quizzes
            .get(&index)
            .map(|q| format!("{} ({} items)", q.kind(), q.len()))
            .unwrap_or_else(|| "none".to_string());
        let attempted = roadmap
            .progress
            .completed_tasks
            .contains_key(&quiz_key(index));

        let marker = if generated == total && total > 0 {
            "+"
        } else if generated > 0 {
            "*"
        } else {
            "."
        };
        println!("  [{marker}] {index}: {}", outline.topic);
        println!("      materials {generated}/{total}  read {completed}/{total}");
        println!(
            "      quiz {quiz}  attempted {}",
            if attempted { "yes" } else { "no" }
        );
    }

    Ok(())
}
