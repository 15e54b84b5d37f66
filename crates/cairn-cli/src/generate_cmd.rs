//! `cairn generate` and `cairn cancel` commands.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use cairn_core::gateway::{GatewayConfig, HttpGateway};
use cairn_core::orchestrator::{self, GenerateOptions, GenerationOutcome};
use cairn_db::models::CancelScope;

/// Run content generation for one milestone and print the outcome.
pub async fn run_generate(
    pool: &PgPool,
    gateway_config: GatewayConfig,
    roadmap_id: Uuid,
    milestone: u32,
    force: bool,
    reset: bool,
) -> Result<()> {
    let gateway = HttpGateway::new(gateway_config)?;
    let options = GenerateOptions { force, reset };

    println!("Generating milestone {milestone} of roadmap {roadmap_id}...");

    let outcome =
        orchestrator::generate_milestone(pool, &gateway, roadmap_id, milestone, options).await?;

    match outcome {
        GenerationOutcome::Completed {
            material_count,
            quiz_kind,
            quiz_len,
        } => {
            println!("Generation complete.");
            println!();
            println!("  Materials: {material_count}");
            println!("  Quiz:      {quiz_kind} ({quiz_len} items)");
        }
        GenerationOutcome::Skipped { material_count } => {
            println!("Milestone {milestone} already has {material_count} materials; skipped.");
            println!("Use --force to regenerate.");
        }
        GenerationOutcome::Canceled { materials_written } => {
            println!("Generation canceled after {materials_written} materials.");
            println!("Run `cairn generate` again to resume from there.");
        }
    }

    Ok(())
}

/// Flag a running generation for cancellation and print the acknowledgement.
pub async fn run_cancel(pool: &PgPool, roadmap_id: Uuid, milestone: Option<u32>) -> Result<()> {
    let scope = match milestone {
        Some(index) => CancelScope::Milestone(index),
        None => CancelScope::Any,
    };

    let ack = orchestrator::request_cancel(pool, roadmap_id, scope).await?;

    println!("Cancellation requested (scope: {scope}).");
    if ack.in_flight {
        println!("A live run was observed; it stops at the next sub-item boundary.");
    } else {
        println!("No live run was observed; the request stands until the next run reads it.");
    }

    Ok(())
}
