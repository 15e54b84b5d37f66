//! Operator-mode CLI handlers for `cairn roadmap` subcommands.
//!
//! Implements:
//! - `cairn roadmap create <file>`        -- create a roadmap from a TOML outline
//! - `cairn roadmap show <roadmap-id>`    -- show the aggregate in detail
//! - `cairn roadmap list`                 -- list all roadmaps
//! - `cairn roadmap publish <roadmap-id>` -- freeze the roadmap's content

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use cairn_core::outline::{parse_roadmap_toml, to_milestones};
use cairn_db::queries::roadmaps as roadmap_queries;

use crate::RoadmapCommands;

// -----------------------------------------------------------------------
// Public entry point
// -----------------------------------------------------------------------

/// Dispatch a `RoadmapCommands` variant to the appropriate handler.
pub async fn run_roadmap_command(command: RoadmapCommands, pool: &PgPool) -> Result<()> {
    match command {
        RoadmapCommands::Create { file, owner } => cmd_create(pool, &file, owner.as_deref()).await,
        RoadmapCommands::Show { roadmap_id } => cmd_show(pool, &roadmap_id).await,
        RoadmapCommands::List => cmd_list(pool).await,
        RoadmapCommands::Publish { roadmap_id } => cmd_publish(pool, &roadmap_id).await,
    }
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid roadmap ID: {raw:?}"))
}

// -----------------------------------------------------------------------
// cairn roadmap create <file>
// -----------------------------------------------------------------------

/// Read an outline TOML from disk, parse and validate it, insert the
/// roadmap, and print a summary.
async fn cmd_create(pool: &PgPool, file_path: &str, owner: Option<&str>) -> Result<()> {
    // 1. Read the file.
    let content = std::fs::read_to_string(file_path)
        .with_context(|| format!("failed to read outline file: {file_path}"))?;

    // 2. Parse and validate.
    let outline_toml = parse_roadmap_toml(&content)
        .with_context(|| format!("failed to parse outline file: {file_path}"))?;

    // 3. Resolve the owner.
    let owner_id = match owner {
        Some(raw) => Uuid::parse_str(raw).with_context(|| format!("invalid owner ID: {raw:?}"))?,
        None => Uuid::new_v4(),
    };

    // 4. Insert into the DB.
    let milestones = to_milestones(&outline_toml);
    let roadmap =
        roadmap_queries::insert_roadmap(pool, owner_id, &outline_toml.roadmap.title, &milestones)
            .await?;

    // 5. Print summary.
    println!("Roadmap created successfully.");
    println!();
    println!("  Roadmap ID: {}", roadmap.id);
    println!("  Title:      {}", roadmap.title);
    println!("  Owner:      {}", roadmap.owner_id);
    println!("  Milestones: {}", roadmap.milestones.len());
    println!("  Sub-items:  {}", roadmap.total_sub_items());
    println!();
    println!("Next: run `cairn generate {}` to create content.", roadmap.id);

    Ok(())
}

// -----------------------------------------------------------------------
// cairn roadmap show <roadmap-id>
// -----------------------------------------------------------------------

/// Show detailed info for a single roadmap.
async fn cmd_show(pool: &PgPool, roadmap_id_str: &str) -> Result<()> {
    let roadmap_id = parse_id(roadmap_id_str)?;

    let roadmap = roadmap_queries::get_roadmap(pool, roadmap_id)
        .await?
        .with_context(|| format!("roadmap {roadmap_id} not found"))?;

    println!("Roadmap: {}", roadmap.title);
    println!("  ID:        {}", roadmap.id);
    println!("  Owner:     {}", roadmap.owner_id);
    println!(
        "  Published: {}",
        if roadmap.published { "yes" } else { "no" }
    );
    println!("  Progress:  {:.0}%", roadmap.progress.percent);
    println!(
        "  Created:   {}",
        roadmap.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    println!("Milestones:");
    for (index, outline) in roadmap.milestones.iter().enumerate() {
        let index = index as u32;
        let materials = roadmap.materials.get(&index).map_or(0, |m| m.len());
        let quiz = roadmap
            .quizzes
            .get(&index)
            .map(|q| format!("{} ({} items)", q.kind(), q.len()))
            .unwrap_or_else(|| "none".to_string());

        println!("  [{index}] {}", outline.topic);
        println!(
            "    Materials: {materials}/{} generated",
            outline.sub_items.len()
        );
        println!("    Quiz:      {quiz}");
        for sub_item in &outline.sub_items {
            println!("      - {sub_item}");
        }
    }

    Ok(())
}

// -----------------------------------------------------------------------
// cairn roadmap list
// -----------------------------------------------------------------------

/// List all roadmaps with summary info.
async fn cmd_list(pool: &PgPool) -> Result<()> {
    let roadmaps = roadmap_queries::list_roadmaps(pool).await?;

    if roadmaps.is_empty() {
        println!("No roadmaps found. Use `cairn roadmap create <file>` to create one.");
        return Ok(());
    }

    // Compute column widths for a clean table.
    // ID is always 36 chars (UUID).
    let id_w = 36;
    let title_w = roadmaps
        .iter()
        .map(|r| r.title.len())
        .max()
        .unwrap_or(5)
        .max(5);
    let ms_w = 10;
    let pub_w = 9;

    // Header
    println!(
        "{:<id_w$}  {:<title_w$}  {:>ms_w$}  {:<pub_w$}  {:>4}  CREATED",
        "ID", "TITLE", "MILESTONES", "PUBLISHED", "PCT",
    );

    // Rows
    for roadmap in &roadmaps {
        let created = roadmap.created_at.format("%Y-%m-%d %H:%M");
        println!(
            "{:<id_w$}  {:<title_w$}  {:>ms_w$}  {:<pub_w$}  {:>3.0}%  {}",
            roadmap.id,
            roadmap.title,
            roadmap.milestones.len(),
            if roadmap.published { "yes" } else { "no" },
            roadmap.progress.percent,
            created,
        );
    }

    Ok(())
}

// -----------------------------------------------------------------------
// cairn roadmap publish <roadmap-id>
// -----------------------------------------------------------------------

/// Mark a roadmap as published, refusing all future generation.
async fn cmd_publish(pool: &PgPool, roadmap_id_str: &str) -> Result<()> {
    let roadmap_id = parse_id(roadmap_id_str)?;

    roadmap_queries::get_roadmap(pool, roadmap_id)
        .await?
        .with_context(|| format!("roadmap {roadmap_id} not found"))?;

    let roadmap = roadmap_queries::publish_roadmap(pool, roadmap_id).await?;

    println!("Roadmap published.");
    println!();
    println!("  Roadmap ID: {}", roadmap.id);
    println!("  Title:      {}", roadmap.title);
    println!("  Published:  yes");
    println!();
    println!("Generation requests for this roadmap will now be refused.");

    Ok(())
}
