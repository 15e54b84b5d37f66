use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use cairn_core::error::GenerationError;
use cairn_core::gateway::CompletionGateway;
use cairn_core::orchestrator::{self, GenerateOptions, GenerationOutcome};
use cairn_core::{outline, progress, quiz, singleflight};
use cairn_db::models::{
    AttemptRecord, CancelScope, Material, MilestoneOutline, QuizKind, Roadmap, quiz_key, task_key,
};
use cairn_db::queries::roadmaps;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub gateway: Arc<dyn CompletionGateway>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    retryable: bool,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            retryable: false,
            message: msg.into(),
        }
    }

    pub fn invalid_outline(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            code: "invalid_outline",
            retryable: false,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            retryable: false,
            message: format!("{err:#}"),
        }
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        let status = match &err {
            GenerationError::Conflict { .. } | GenerationError::Immutable(_) => {
                StatusCode::CONFLICT
            }
            GenerationError::NotFound(_) => StatusCode::NOT_FOUND,
            GenerationError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GenerationError::MalformedUpstream(_) => StatusCode::BAD_GATEWAY,
            GenerationError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.code(),
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": self.message,
            "code": self.code,
            "retryable": self.retryable,
        });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRoadmapRequest {
    pub title: String,
    pub milestones: Vec<MilestoneOutline>,
    /// Owner to file the roadmap under. A fresh id is minted when absent.
    #[serde(default)]
    pub owner_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub owner: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RoadmapSummary {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub published: bool,
    pub milestone_count: usize,
    pub percent: f64,
}

impl From<&Roadmap> for RoadmapSummary {
    fn from(r: &Roadmap) -> Self {
        Self {
            id: r.id,
            owner_id: r.owner_id,
            title: r.title.clone(),
            published: r.published,
            milestone_count: r.milestones.len(),
            percent: r.progress.percent,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Target milestone. The first milestone when absent.
    #[serde(default)]
    pub milestone: Option<u32>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub reset: bool,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub status: &'static str,
    pub milestone_index: u32,
    pub material_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz_kind: Option<QuizKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz_len: Option<usize>,
}

impl GenerateResponse {
    fn from_outcome(milestone_index: u32, outcome: GenerationOutcome) -> Self {
        match outcome {
            GenerationOutcome::Completed {
                material_count,
                quiz_kind,
                quiz_len,
            } => Self {
                status: "ok",
                milestone_index,
                material_count,
                quiz_kind: Some(quiz_kind),
                quiz_len: Some(quiz_len),
            },
            GenerationOutcome::Skipped { material_count } => Self {
                status: "skipped",
                milestone_index,
                material_count,
                quiz_kind: None,
                quiz_len: None,
            },
            GenerationOutcome::Canceled { materials_written } => Self {
                status: "canceled",
                milestone_index,
                material_count: materials_written,
                quiz_kind: None,
                quiz_len: None,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelGenerationRequest {
    /// Limit the cancellation to one milestone. Any run when absent.
    #[serde(default)]
    pub milestone: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub requested: bool,
    pub in_flight: bool,
}

#[derive(Debug, Serialize)]
pub struct MaterialsResponse {
    pub milestone_index: u32,
    /// Whether a generation run is live for this roadmap right now.
    pub generating: bool,
    pub materials: Vec<Material>,
}

#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub key: String,
    pub percent: f64,
}

#[derive(Debug, Deserialize)]
pub struct AttemptRequest {
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub answers: Option<serde_json::Value>,
    #[serde(default)]
    pub attempt_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AttemptResponse {
    pub key: String,
    pub passed: bool,
}

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<RedirectBody>,
}

#[derive(Debug, Serialize)]
pub struct RedirectBody {
    pub milestone_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_index: Option<u32>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/roadmaps", get(list_roadmaps).post(create_roadmap))
        .route("/api/roadmaps/{id}", get(get_roadmap_detail))
        .route("/api/roadmaps/{id}/publish", post(publish_roadmap))
        .route("/api/roadmaps/{id}/generate", post(trigger_generation))
        .route("/api/roadmaps/{id}/cancel", post(cancel_generation))
        .route(
            "/api/roadmaps/{id}/milestones/{m}/materials",
            get(get_materials),
        )
        .route(
            "/api/roadmaps/{id}/milestones/{m}/items/{j}/complete",
            post(complete_item),
        )
        .route("/api/roadmaps/{id}/milestones/{m}/access", get(check_access))
        .route("/api/roadmaps/{id}/milestones/{m}/quiz", get(get_quiz))
        .route(
            "/api/roadmaps/{id}/milestones/{m}/quiz/attempts",
            post(record_attempt),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("cairn serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("cairn serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Roadmap handlers
// ---------------------------------------------------------------------------

async fn index(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let roadmaps = roadmaps::list_roadmaps(&state.pool)
        .await
        .map_err(AppError::internal)?;

    let rows = if roadmaps.is_empty() {
        "<tr><td colspan=\"4\">No roadmaps found.</td></tr>".to_string()
    } else {
        roadmaps
            .iter()
            .map(|r| {
                format!(
                    "<tr><td><a href=\"/api/roadmaps/{id}\">{title}</a></td>\
                     <td>{milestones}</td><td>{published}</td><td>{id}</td></tr>",
                    id = r.id,
                    title = r.title,
                    milestones = r.milestones.len(),
                    published = if r.published { "yes" } else { "no" },
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let html = format!(
        "<!DOCTYPE html>\
<html><head><title>cairn</title></head><body>\
<h1>cairn</h1>\
<p><a href=\"/api/roadmaps\">/api/roadmaps</a></p>\
<table><tr><th>Roadmap</th><th>Milestones</th><th>Published</th><th>ID</th></tr>{rows}</table>\
</body></html>"
    );

    Ok(Html(html).into_response())
}

async fn list_roadmaps(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<axum::response::Response, AppError> {
    let roadmaps = match params.owner {
        Some(owner_id) => roadmaps::list_roadmaps_for_owner(&state.pool, owner_id).await,
        None => roadmaps::list_roadmaps(&state.pool).await,
    }
    .map_err(AppError::internal)?;

    let summaries: Vec<RoadmapSummary> = roadmaps.iter().map(RoadmapSummary::from).collect();
    Ok(Json(summaries).into_response())
}

async fn create_roadmap(
    State(state): State<AppState>,
    Json(body): Json<CreateRoadmapRequest>,
) -> Result<axum::response::Response, AppError> {
    if body.title.trim().is_empty() {
        return Err(AppError::invalid_outline("roadmap title must not be empty"));
    }
    outline::validate_milestones(&body.milestones)
        .map_err(|err| AppError::invalid_outline(err.to_string()))?;

    let owner_id = body.owner_id.unwrap_or_else(Uuid::new_v4);
    let roadmap = roadmaps::insert_roadmap(&state.pool, owner_id, &body.title, &body.milestones)
        .await
        .map_err(AppError::internal)?;

    tracing::info!(roadmap_id = %roadmap.id, owner_id = %owner_id, "roadmap created");
    Ok((StatusCode::CREATED, Json(roadmap)).into_response())
}

async fn get_roadmap_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let roadmap = roadmaps::get_roadmap(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("roadmap {id} not found")))?;

    Ok(Json(roadmap).into_response())
}

async fn publish_roadmap(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    roadmaps::get_roadmap(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("roadmap {id} not found")))?;

    let roadmap = roadmaps::publish_roadmap(&state.pool, id)
        .await
        .map_err(AppError::internal)?;

    tracing::info!(roadmap_id = %id, "roadmap published");
    Ok(Json(roadmap).into_response())
}

// ---------------------------------------------------------------------------
// Generation handlers
// ---------------------------------------------------------------------------

async fn trigger_generation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<GenerateRequest>,
) -> Result<axum::response::Response, AppError> {
    let milestone_index = body.milestone.unwrap_or(0);
    let options = GenerateOptions {
        force: body.force,
        reset: body.reset,
    };

    let outcome = orchestrator::generate_milestone(
        &state.pool,
        state.gateway.as_ref(),
        id,
        milestone_index,
        options,
    )
    .await?;

    Ok(Json(GenerateResponse::from_outcome(milestone_index, outcome)).into_response())
}

async fn cancel_generation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelGenerationRequest>,
) -> Result<axum::response::Response, AppError> {
    let scope = match body.milestone {
        Some(index) => CancelScope::Milestone(index),
        None => CancelScope::Any,
    };

    let ack = orchestrator::request_cancel(&state.pool, id, scope).await?;
    Ok(Json(CancelResponse {
        requested: true,
        in_flight: ack.in_flight,
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// Reading-surface handlers
// ---------------------------------------------------------------------------

async fn get_materials(
    State(state): State<AppState>,
    Path((id, milestone_index)): Path<(Uuid, u32)>,
) -> Result<axum::response::Response, AppError> {
    let roadmap = roadmaps::get_roadmap(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("roadmap {id} not found")))?;

    if milestone_index as usize >= roadmap.milestones.len() {
        return Err(AppError::not_found(format!(
            "milestone {milestone_index} not found"
        )));
    }

    let materials = roadmap
        .materials
        .get(&milestone_index)
        .cloned()
        .unwrap_or_default();

    let now = Utc::now();
    let mut generating = roadmap
        .generation
        .0
        .as_ref()
        .is_some_and(|s| singleflight::is_live(s, now));

    // First visit to an untouched roadmap kicks off milestone 0 in the
    // background so content is ready by the time the learner reads.
    if !generating && !roadmap.published && roadmap.materials.is_empty() {
        orchestrator::spawn_generation(
            state.pool.clone(),
            state.gateway.clone(),
            id,
            0,
            GenerateOptions::default(),
        );
        generating = true;
    }

    Ok(Json(MaterialsResponse {
        milestone_index,
        generating,
        materials,
    })
    .into_response())
}

async fn complete_item(
    State(state): State<AppState>,
    Path((id, milestone_index, sub_index)): Path<(Uuid, u32, u32)>,
) -> Result<axum::response::Response, AppError> {
    let roadmap = roadmaps::get_roadmap(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("roadmap {id} not found")))?;

    let outline = roadmap
        .milestones
        .get(milestone_index as usize)
        .ok_or_else(|| AppError::not_found(format!("milestone {milestone_index} not found")))?;
    if sub_index as usize >= outline.sub_items.len() {
        return Err(AppError::not_found(format!(
            "sub-item {sub_index} not found in milestone {milestone_index}"
        )));
    }

    let key = task_key(milestone_index, sub_index);
    let mut record = roadmap.progress.0.clone();
    record
        .completed_tasks
        .insert(key.clone(), AttemptRecord::marker(Utc::now()));
    record.percent = progress::recompute_percent(&record, &roadmap.milestones);

    roadmaps::update_progress(&state.pool, id, &record)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(CompletionResponse {
        key,
        percent: record.percent,
    })
    .into_response())
}

async fn check_access(
    State(state): State<AppState>,
    Path((id, milestone_index)): Path<(Uuid, u32)>,
) -> Result<axum::response::Response, AppError> {
    let roadmap = roadmaps::get_roadmap(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("roadmap {id} not found")))?;

    if milestone_index as usize >= roadmap.milestones.len() {
        return Err(AppError::not_found(format!(
            "milestone {milestone_index} not found"
        )));
    }

    let decision = progress::can_enter(milestone_index, &roadmap.progress, &roadmap.milestones);
    let response = match decision {
        progress::EntryDecision::Ok => AccessResponse {
            allowed: true,
            reason: None,
            redirect: None,
        },
        progress::EntryDecision::Blocked { reason, redirect } => AccessResponse {
            allowed: false,
            reason: Some(reason.as_str()),
            redirect: Some(RedirectBody {
                milestone_index: redirect.milestone_index,
                sub_index: redirect.sub_index,
            }),
        },
    };

    Ok(Json(response).into_response())
}

// ---------------------------------------------------------------------------
// Quiz handlers
// ---------------------------------------------------------------------------

async fn get_quiz(
    State(state): State<AppState>,
    Path((id, milestone_index)): Path<(Uuid, u32)>,
) -> Result<axum::response::Response, AppError> {
    let quiz =
        quiz::fetch_or_synthesize(&state.pool, state.gateway.as_ref(), id, milestone_index).await?;
    Ok(Json(quiz).into_response())
}

async fn record_attempt(
    State(state): State<AppState>,
    Path((id, milestone_index)): Path<(Uuid, u32)>,
    Json(body): Json<AttemptRequest>,
) -> Result<axum::response::Response, AppError> {
    let roadmap = roadmaps::get_roadmap(&state.pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("roadmap {id} not found")))?;

    if milestone_index as usize >= roadmap.milestones.len() {
        return Err(AppError::not_found(format!(
            "milestone {milestone_index} not found"
        )));
    }

    // Attempts are recorded as sent. The gate checks presence, never outcome.
    let record = AttemptRecord {
        passed: body.passed.unwrap_or(true),
        score: body.score,
        answers: body.answers,
        attempt_id: body.attempt_id,
        updated_at: Utc::now(),
    };
    let passed = record.passed;

    let key = quiz_key(milestone_index);
    let mut progress_record = roadmap.progress.0.clone();
    progress_record.completed_tasks.insert(key.clone(), record);
    progress_record.percent =
        progress::recompute_percent(&progress_record, &roadmap.milestones);

    roadmaps::update_progress(&state.pool, id, &progress_record)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(AttemptResponse { key, passed }).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
