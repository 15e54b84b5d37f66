//! `cairn quiz show` command: print a milestone's quiz.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use cairn_core::gateway::{GatewayConfig, HttpGateway};
use cairn_core::quiz;
use cairn_db::models::Quiz;

/// Fetch (or synthesize) and print the quiz for one milestone.
pub async fn run_quiz_show(
    pool: &PgPool,
    gateway_config: GatewayConfig,
    roadmap_id: Uuid,
    milestone: u32,
) -> Result<()> {
    let gateway = HttpGateway::new(gateway_config)?;
    let quiz = quiz::fetch_or_synthesize(pool, &gateway, roadmap_id, milestone).await?;

    println!("Quiz for milestone {milestone} of roadmap {roadmap_id}:");
    println!();

    match quiz {
        Quiz::Mcq { questions } => {
            println!("Kind: multiple choice ({} questions)", questions.len());
            println!();
            for (number, question) in questions.iter().enumerate() {
                println!("{}. {}", number + 1, question.stem);
                for (choice_index, choice) in question.choices.iter().enumerate() {
                    let mark = if choice_index == question.answer {
                        "*"
                    } else {
                        " "
                    };
                    println!("   {mark} {choice}");
                }
                println!();
            }
        }
        Quiz::Match { pairs } => {
            println!("Kind: matching ({} pairs)", pairs.len());
            println!();
            let term_w = pairs.iter().map(|p| p.term.len()).max().unwrap_or(4);
            for pair in &pairs {
                println!("  {:<term_w$}  =  {}", pair.term, pair.definition);
            }
        }
    }

    Ok(())
}
