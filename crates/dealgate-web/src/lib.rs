//! Axum JSON API over the Dealgate pipeline.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use dealgate_core::{
    can_advance, days_since, entry_gate, stages, weighted_value, ChecklistConfirmation, Gate, HealthBand,
    HealthScore, InactivityFilter, Opportunity, OpportunityDraft, OpportunityFilter, Scale,
    ScaleDefinition, Stage, Staleness,
};
use dealgate_sync::{DeleteConfirmation, DeleteOutcome, MoveOutcome, Pipeline, Selection};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

mod error;

pub use error::{AppError, ConflictError};

pub const CRATE_NAME: &str = "dealgate-web";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/stages", get(stages_handler))
        .route("/api/scales", get(scales_handler))
        .route("/api/vendors", get(vendors_handler))
        .route("/api/session", get(session_handler).put(set_session_handler))
        .route("/api/state", get(state_handler))
        .route("/api/state/error", delete(dismiss_error_handler))
        .route(
            "/api/opportunities",
            get(list_opportunities_handler).post(create_opportunity_handler),
        )
        .route(
            "/api/opportunities/{id}",
            get(opportunity_handler)
                .put(update_opportunity_handler)
                .delete(delete_opportunity_handler),
        )
        .route("/api/opportunities/{id}/stage", post(stage_move_handler))
        .route("/api/opportunities/{id}/assist", post(assist_handler))
        .route("/api/metrics", get(metrics_handler))
        .route("/api/reload", post(reload_handler))
        .with_state(Arc::new(state))
}

/// Warms the cache, starts the change listener and optional resync job, and
/// serves until the listener fails.
pub async fn serve(pipeline: Arc<Pipeline>, port: u16) -> anyhow::Result<()> {
    pipeline.load_vendors().await;
    if let Err(err) = pipeline.load_opportunities().await {
        warn!(error = %err, "initial load failed; serving with an empty pipeline");
    }
    let _listener = pipeline.spawn_change_listener();
    let scheduler = pipeline.maybe_build_scheduler().await?;
    if let Some(scheduler) = &scheduler {
        scheduler.start().await?;
        info!("resync scheduler started");
    }

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "dealgate api listening");
    axum::serve(listener, app(AppState::new(pipeline))).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct StageView {
    #[serde(flatten)]
    stage: &'static Stage,
    gate: Option<&'static Gate>,
}

#[derive(Debug, Serialize)]
pub struct HealthView {
    pub mean: f64,
    pub rounded: u8,
    pub band: HealthBand,
    pub readout: String,
}

impl From<HealthScore> for HealthView {
    fn from(score: HealthScore) -> Self {
        Self {
            mean: score.mean,
            rounded: score.rounded(),
            band: score.band(),
            readout: score.readout(),
        }
    }
}

/// Opportunity with its derived health and inactivity figures.
#[derive(Debug, Serialize)]
pub struct OpportunityView {
    #[serde(flatten)]
    pub opportunity: Opportunity,
    pub health: HealthView,
    pub weighted_value: f64,
    pub days_inactive: i64,
    pub staleness: Staleness,
    /// The next stage's entry gate is already met.
    pub can_advance: bool,
}

impl OpportunityView {
    pub fn new(opportunity: Opportunity, now: DateTime<Utc>) -> Self {
        Self {
            health: HealthScore::of(&opportunity).into(),
            weighted_value: weighted_value(&opportunity),
            days_inactive: days_since(opportunity.last_update, now),
            staleness: Staleness::classify(opportunity.last_update, now),
            can_advance: can_advance(&opportunity, opportunity.stage),
            opportunity,
        }
    }
}

/// Pipeline status without the cached rows.
#[derive(Debug, Serialize)]
pub struct StateView {
    pub current_user: Option<String>,
    pub role: Option<String>,
    pub is_admin: bool,
    pub error: Option<String>,
    pub loading: bool,
    pub revision: u64,
    pub opportunity_count: usize,
    pub selection: Selection,
    pub assistant_available: bool,
}

#[derive(Debug, Deserialize, Default)]
struct ListQuery {
    search: Option<String>,
    #[serde(default, deserialize_with = "stage_param")]
    stage: Option<u8>,
    vendor: Option<String>,
    #[serde(default)]
    inactivity: InactivityFilter,
}

#[derive(Debug, Deserialize, Default)]
struct DeleteQuery {
    confirm: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct MetricsQuery {
    vendor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    user: String,
}

#[derive(Debug, Deserialize)]
pub struct StageMoveRequest {
    pub target: u8,
    #[serde(default)]
    pub checklist: Option<ChecklistConfirmation>,
}

#[derive(Debug, Deserialize, Default)]
struct AssistBody {
    #[serde(default)]
    prompt: Option<String>,
}

/// `stage=all` and an empty value mean no stage filter.
fn stage_param<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u8>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") | Some("all") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn stages_handler() -> Json<Vec<StageView>> {
    Json(
        stages()
            .iter()
            .map(|stage| StageView {
                stage,
                gate: entry_gate(stage.id),
            })
            .collect(),
    )
}

async fn scales_handler() -> Json<Vec<&'static ScaleDefinition>> {
    Json(Scale::ALL.iter().map(|scale| scale.definition()).collect())
}

async fn vendors_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.pipeline.load_vendors().await).into_response()
}

async fn session_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "current_user": state.pipeline.current_user().await }))
}

async fn set_session_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SessionBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.pipeline.set_current_user(body.user.trim()).await?;
    Ok(Json(serde_json::json!({ "current_user": state.pipeline.current_user().await })))
}

async fn state_handler(State(state): State<Arc<AppState>>) -> Json<StateView> {
    let pipeline = &state.pipeline;
    let snapshot = pipeline.snapshot().await;
    let role = snapshot
        .current_user
        .as_deref()
        .map(|user| pipeline.roster().role_for(user).to_string());
    let is_admin = snapshot.current_user.as_deref().is_some_and(|user| {
        pipeline.roster().is_admin(user) || dealgate_core::is_admin(user, &snapshot.vendors)
    });
    Json(StateView {
        role,
        is_admin,
        error: snapshot.error,
        loading: snapshot.loading,
        revision: snapshot.revision,
        opportunity_count: snapshot.opportunities.len(),
        selection: snapshot.selection,
        assistant_available: pipeline.has_assistant(),
        current_user: snapshot.current_user,
    })
}

async fn dismiss_error_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    state.pipeline.clear_banner().await;
    StatusCode::NO_CONTENT
}

async fn list_opportunities_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<OpportunityView>> {
    let filter = OpportunityFilter {
        search: query.search,
        stage: query.stage,
        vendor: query.vendor,
        inactivity: query.inactivity,
    };
    let now = state.pipeline.now();
    let rows = state.pipeline.filtered(&filter).await;
    Json(rows.into_iter().map(|o| OpportunityView::new(o, now)).collect())
}

async fn opportunity_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OpportunityView>, AppError> {
    let opportunity = state
        .pipeline
        .opportunity(id)
        .await
        .ok_or(dealgate_sync::PipelineError::NotFound(id))?;
    Ok(Json(OpportunityView::new(opportunity, state.pipeline.now())))
}

async fn create_opportunity_handler(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<OpportunityDraft>,
) -> Result<(StatusCode, Json<Opportunity>), AppError> {
    let created = state.pipeline.create_opportunity(&draft).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_opportunity_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(draft): Json<OpportunityDraft>,
) -> Result<Json<Opportunity>, AppError> {
    Ok(Json(state.pipeline.update_opportunity(id, &draft).await?))
}

async fn delete_opportunity_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let confirmation = DeleteConfirmation::from(query.confirm.unwrap_or(false));
    match state.pipeline.delete_opportunity(id, confirmation).await? {
        DeleteOutcome::Deleted => Ok(Json(serde_json::json!({ "status": "deleted" }))),
        DeleteOutcome::Cancelled => Err(AppError::conflict(
            "deletion must be confirmed with ?confirm=true",
        )),
    }
}

async fn stage_move_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<StageMoveRequest>,
) -> Result<Response, AppError> {
    let outcome = state.pipeline.request_stage_move(id, request.target).await?;
    let outcome = match (outcome, request.checklist) {
        (MoveOutcome::ChecklistRequired(pending), Some(checklist)) => {
            MoveOutcome::Moved(state.pipeline.confirm_stage_move(&pending, &checklist).await?)
        }
        (outcome, _) => outcome,
    };

    let status = match &outcome {
        MoveOutcome::ChecklistRequired(_) => StatusCode::CONFLICT,
        MoveOutcome::Moved(_) | MoveOutcome::Ignored => StatusCode::OK,
    };
    Ok((status, Json(outcome)).into_response())
}

async fn assist_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<AssistBody>,
) -> Result<Json<Opportunity>, AppError> {
    Ok(Json(state.pipeline.assist(id, body.prompt).await?))
}

async fn metrics_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    Json(state.pipeline.metrics(query.vendor.as_deref()).await).into_response()
}

async fn reload_handler(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.pipeline.load_opportunities().await?;
    Ok(Json(serde_json::json!({ "count": count })))
}
