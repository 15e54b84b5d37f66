//! End-to-end milestone progression and the quiz read path, against a real
//! Postgres instance with scripted completions.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use cairn_core::error::GenerationError;
use cairn_core::gateway::{CompletionGateway, CompletionRequest};
use cairn_core::orchestrator::{self, GenerateOptions, GenerationOutcome};
use cairn_core::progress::{self, BlockReason, EntryDecision, Redirect};
use cairn_core::quiz;
use cairn_db::models::{
    AttemptRecord, MilestoneOutline, Quiz, QuizKind, QuizQuestion, quiz_key, task_key,
};
use cairn_db::queries::roadmaps;
use cairn_test_utils::{create_test_db, drop_test_db, sample_outline, seed_roadmap};

/// Gateway that pops scripted responses in order; exhaustion errors.
struct ScriptedGateway {
    script: Mutex<VecDeque<String>>,
}

impl ScriptedGateway {
    fn new(texts: &[&str]) -> Self {
        Self {
            script: Mutex::new(texts.iter().map(|t| t.to_string()).collect()),
        }
    }
}

#[async_trait]
impl CompletionGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<String> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}

/// Gateway that always fails, forcing the offline strategies.
struct DownGateway;

#[async_trait]
impl CompletionGateway for DownGateway {
    fn name(&self) -> &str {
        "down"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<String> {
        anyhow::bail!("connection refused")
    }
}

fn material_completion(topic: &str) -> String {
    format!(
        "{topic} explained for a beginner with one worked example.\n\n\
Key points:\n\
- {topic}: the central idea\n\
- {topic} in practice: where it shows up in real code"
    )
}

const MCQ_COMPLETION: &str = r#"[
  {"question": "What does ownership guarantee in Rust?", "choices": ["One owner per value", "Garbage collection", "Reference counting", "Manual free"], "answer": 0}
]"#;

const PAIRS_COMPLETION: &str = r#"[
  {"term": "Future", "definition": "A computation that resolves later"},
  {"term": "Executor", "definition": "Drives futures to completion"},
  {"term": "Task", "definition": "A spawned unit of async work"}
]"#;

#[tokio::test]
async fn two_milestone_progression_end_to_end() {
    let (pool, db_name) = create_test_db().await;
    let roadmap = seed_roadmap(&pool, Uuid::new_v4(), "Learn Rust", &sample_outline()).await;

    // Milestone 0: three materials, then a multiple-choice quiz.
    let first = ScriptedGateway::new(&[
        &material_completion("Ownership"),
        &material_completion("Pattern matching"),
        &material_completion("Error handling"),
        MCQ_COMPLETION,
    ]);
    let outcome =
        orchestrator::generate_milestone(&pool, &first, roadmap.id, 0, GenerateOptions::default())
            .await
            .unwrap();
    assert_eq!(
        outcome,
        GenerationOutcome::Completed {
            material_count: 3,
            quiz_kind: QuizKind::Mcq,
            quiz_len: 1,
        }
    );

    // The gate refuses milestone 1 while milestone 0 is unread.
    let row = roadmaps::get_roadmap(&pool, roadmap.id).await.unwrap().unwrap();
    assert_eq!(
        progress::can_enter(1, &row.progress, &row.milestones),
        EntryDecision::Blocked {
            reason: BlockReason::NeedMaterial,
            redirect: Redirect {
                milestone_index: 0,
                sub_index: Some(0),
            },
        }
    );

    // Reading every sub-item is not enough: the quiz attempt is missing.
    let mut record = row.progress.0.clone();
    for sub_index in 0..3 {
        record
            .completed_tasks
            .insert(task_key(0, sub_index), AttemptRecord::marker(Utc::now()));
    }
    record.percent = progress::recompute_percent(&record, &row.milestones);
    assert!((record.percent - 60.0).abs() < 1e-9);
    roadmaps::update_progress(&pool, roadmap.id, &record).await.unwrap();

    let row = roadmaps::get_roadmap(&pool, roadmap.id).await.unwrap().unwrap();
    assert_eq!(
        progress::can_enter(1, &row.progress, &row.milestones),
        EntryDecision::Blocked {
            reason: BlockReason::NeedQuiz,
            redirect: Redirect {
                milestone_index: 0,
                sub_index: None,
            },
        }
    );

    // A failed attempt still opens the gate: presence gates, score does not.
    record.completed_tasks.insert(
        quiz_key(0),
        AttemptRecord {
            passed: false,
            score: Some(0.4),
            answers: Some(serde_json::json!({"0": 2})),
            attempt_id: Some("attempt-1".to_string()),
            updated_at: Utc::now(),
        },
    );
    roadmaps::update_progress(&pool, roadmap.id, &record).await.unwrap();

    let row = roadmaps::get_roadmap(&pool, roadmap.id).await.unwrap().unwrap();
    assert!(progress::can_enter(1, &row.progress, &row.milestones).is_allowed());

    // Milestone 1: two materials, then a matching quiz from upstream.
    let second = ScriptedGateway::new(&[
        &material_completion("Futures"),
        &material_completion("Tokio tasks"),
        PAIRS_COMPLETION,
    ]);
    let outcome =
        orchestrator::generate_milestone(&pool, &second, roadmap.id, 1, GenerateOptions::default())
            .await
            .unwrap();
    assert_eq!(
        outcome,
        GenerationOutcome::Completed {
            material_count: 2,
            quiz_kind: QuizKind::Match,
            quiz_len: 3,
        }
    );

    let row = roadmaps::get_roadmap(&pool, roadmap.id).await.unwrap().unwrap();
    assert_eq!(row.materials.get(&0).unwrap().len(), 3);
    assert_eq!(row.materials.get(&1).unwrap().len(), 2);
    assert_eq!(row.quizzes.get(&0).unwrap().kind(), QuizKind::Mcq);
    assert_eq!(row.quizzes.get(&1).unwrap().kind(), QuizKind::Match);

    // Finishing milestone 1's reading brings the percent to 100.
    let mut record = row.progress.0.clone();
    for sub_index in 0..2 {
        record
            .completed_tasks
            .insert(task_key(1, sub_index), AttemptRecord::marker(Utc::now()));
    }
    assert_eq!(progress::recompute_percent(&record, &row.milestones), 100.0);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn stored_quiz_of_the_expected_kind_is_served_as_is() {
    let (pool, db_name) = create_test_db().await;
    let roadmap = seed_roadmap(&pool, Uuid::new_v4(), "Learn Rust", &sample_outline()).await;

    let stored = Quiz::Mcq {
        questions: vec![QuizQuestion {
            stem: "What does ownership guarantee in Rust?".to_string(),
            choices: vec!["One owner".to_string(), "GC".to_string(), "Arenas".to_string()],
            answer: 0,
        }],
    };
    roadmaps::upsert_quiz(&pool, roadmap.id, 0, &stored).await.unwrap();

    // The gateway is dead; serving must not need it.
    let served = quiz::fetch_or_synthesize(&pool, &DownGateway, roadmap.id, 0)
        .await
        .unwrap();
    assert_eq!(served, stored);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn missing_quiz_is_synthesized_and_persisted_on_read() {
    let (pool, db_name) = create_test_db().await;
    let roadmap = seed_roadmap(&pool, Uuid::new_v4(), "Learn Rust", &sample_outline()).await;

    let gateway = ScriptedGateway::new(&[MCQ_COMPLETION]);
    let served = quiz::fetch_or_synthesize(&pool, &gateway, roadmap.id, 0)
        .await
        .unwrap();
    assert_eq!(served.kind(), QuizKind::Mcq);

    let row = roadmaps::get_roadmap(&pool, roadmap.id).await.unwrap().unwrap();
    assert_eq!(row.quizzes.get(&0), Some(&served));

    // The next read serves the stored copy without synthesizing again.
    let again = quiz::fetch_or_synthesize(&pool, &DownGateway, roadmap.id, 0)
        .await
        .unwrap();
    assert_eq!(again, served);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn wrong_kind_quiz_is_upgraded_in_place_when_possible() {
    let (pool, db_name) = create_test_db().await;
    let roadmap = seed_roadmap(&pool, Uuid::new_v4(), "Learn Rust", &sample_outline()).await;

    // Milestone 1 expects matching, but a legacy mcq sits there.
    let legacy = Quiz::Mcq {
        questions: vec![QuizQuestion {
            stem: "Leftover from an earlier scheme?".to_string(),
            choices: vec!["Yes".to_string(), "No".to_string(), "Maybe".to_string()],
            answer: 0,
        }],
    };
    roadmaps::upsert_quiz(&pool, roadmap.id, 1, &legacy).await.unwrap();

    let gateway = ScriptedGateway::new(&[PAIRS_COMPLETION]);
    let served = quiz::fetch_or_synthesize(&pool, &gateway, roadmap.id, 1)
        .await
        .unwrap();
    assert_eq!(served.kind(), QuizKind::Match);

    let row = roadmaps::get_roadmap(&pool, roadmap.id).await.unwrap().unwrap();
    assert_eq!(row.quizzes.get(&1), Some(&served));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn legacy_quiz_keeps_serving_when_the_chain_cannot_upgrade() {
    let (pool, db_name) = create_test_db().await;

    // One sub-item and no materials: pair derivation cannot reach its floor,
    // so an odd milestone's chain bottoms out at the mcq fallback.
    let outline = vec![
        MilestoneOutline {
            topic: "Intro".to_string(),
            sub_items: vec!["Only topic".to_string()],
        },
        MilestoneOutline {
            topic: "Follow-up".to_string(),
            sub_items: vec!["Single item".to_string()],
        },
    ];
    let roadmap = seed_roadmap(&pool, Uuid::new_v4(), "Thin roadmap", &outline).await;

    let legacy = Quiz::Mcq {
        questions: vec![QuizQuestion {
            stem: "Which topic does this milestone cover?".to_string(),
            choices: vec![
                "Single item".to_string(),
                "None of the above".to_string(),
                "All of the above".to_string(),
            ],
            answer: 0,
        }],
    };
    roadmaps::upsert_quiz(&pool, roadmap.id, 1, &legacy).await.unwrap();

    let served = quiz::fetch_or_synthesize(&pool, &DownGateway, roadmap.id, 1)
        .await
        .unwrap();
    assert_eq!(served, legacy);

    // The stored quiz was not overwritten by the failed upgrade.
    let row = roadmaps::get_roadmap(&pool, roadmap.id).await.unwrap().unwrap();
    assert_eq!(row.quizzes.get(&1), Some(&legacy));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn unknown_targets_are_not_found() {
    let (pool, db_name) = create_test_db().await;
    let roadmap = seed_roadmap(&pool, Uuid::new_v4(), "Learn Rust", &sample_outline()).await;

    let err = quiz::fetch_or_synthesize(&pool, &DownGateway, Uuid::new_v4(), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::NotFound(_)));

    let err = quiz::fetch_or_synthesize(&pool, &DownGateway, roadmap.id, 42)
        .await
        .unwrap_err();
    assert!(matches!(err, GenerationError::NotFound(_)));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn canceled_run_leaves_quiz_to_the_read_path() {
    let (pool, db_name) = create_test_db().await;
    let roadmap = seed_roadmap(&pool, Uuid::new_v4(), "Learn Rust", &sample_outline()).await;

    // Simulate the aftermath of a canceled run: a material prefix exists but
    // no quiz was written. Values mirror what the orchestrator persists.
    let mut materials = roadmap.materials.0.clone();
    materials.insert(
        0,
        vec![cairn_core::material::build_material(
            roadmap.id,
            0,
            0,
            "Ownership and borrowing",
            &material_completion("Ownership"),
        )],
    );
    roadmaps::update_materials(&pool, roadmap.id, &materials).await.unwrap();

    // The read path fills the gap from whatever exists.
    let served = quiz::fetch_or_synthesize(&pool, &DownGateway, roadmap.id, 0)
        .await
        .unwrap();
    assert_eq!(served.kind(), QuizKind::Mcq);
    assert!(!served.is_empty());

    let row = roadmaps::get_roadmap(&pool, roadmap.id).await.unwrap().unwrap();
    assert!(row.quizzes.get(&0).is_some());

    pool.close().await;
    drop_test_db(&db_name).await;
}
