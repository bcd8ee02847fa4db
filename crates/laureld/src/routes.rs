//! API routes for laureld
//!
//! Engine calls are synchronous SQLite work, so every handler hops onto the
//! blocking pool and is bounded by the configured request timeout.
//!
//! Read routes always answer 200 with whatever the engine could compute; past
//! the timeout they answer with the engine's zero-progress fallback body.
//! Write routes map errors: not found → 404, rejected referral → 409,
//! transient storage or timeout → 503, anything else → 500.
//!
//! Evaluation is not abandoned mid-write. The engine gets the timeout as a
//! deadline, checks it before its single batch write, and the route waits for
//! the outcome so a 503 always means nothing was recorded.

use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use laurel_common::api::{
    AchievementSummary, AchievementsQuery, AchievementsResponse, CompleteRequest, ErrorResponse,
    EvaluationResponse, HealthResponse, LeaderboardQuery, LeaderboardResponse, PointsResponse,
    RedeemRequest, ReferralCodeResponse, ReferralStatusResponse,
};
use laurel_common::referral::ReferralRecord;
use laurel_common::{RewardsEngine, RewardsError};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

type AppStateArc = Arc<AppState>;
type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(status: StatusCode, kind: &str, message: String) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            kind: kind.to_string(),
            error: message,
        }),
    )
}

fn map_engine_error(e: RewardsError) -> ApiError {
    match &e {
        RewardsError::NotFound { .. } => api_error(StatusCode::NOT_FOUND, "not_found", e.to_string()),
        RewardsError::ReferralRejected(_) => {
            api_error(StatusCode::CONFLICT, "rejected", e.to_string())
        }
        RewardsError::TransientStorage { .. } => {
            warn!("  Transient storage failure: {}", e);
            api_error(StatusCode::SERVICE_UNAVAILABLE, "transient", e.to_string())
        }
        _ => {
            error!("  Engine error: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string())
        }
    }
}

fn spawn_engine<T, F>(state: &AppState, f: F) -> JoinHandle<T>
where
    F: FnOnce(&RewardsEngine) -> T + Send + 'static,
    T: Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || f(&engine))
}

fn task_failed(join_err: tokio::task::JoinError) -> ApiError {
    error!("  Engine task failed: {}", join_err);
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "engine task failed".to_string(),
    )
}

/// Run `f` against the engine on the blocking pool, bounded by the timeout
async fn with_engine<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&RewardsEngine) -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(state.request_timeout, spawn_engine(state, f)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_err)) => Err(task_failed(join_err)),
        Err(_) => {
            warn!("  Engine call exceeded {:?}", state.request_timeout);
            Err(api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "transient",
                format!("request timed out after {:?}", state.request_timeout),
            ))
        }
    }
}

/// Read variant of [`with_engine`]: a timeout or a failed task yields
/// `fallback(engine)` instead of an error
async fn read_with_engine<T, F, D>(state: &AppState, f: F, fallback: D) -> T
where
    F: FnOnce(&RewardsEngine) -> T + Send + 'static,
    D: FnOnce(&RewardsEngine) -> T,
    T: Send + 'static,
{
    match tokio::time::timeout(state.request_timeout, spawn_engine(state, f)).await {
        Ok(Ok(value)) => value,
        Ok(Err(join_err)) => {
            error!("  Engine read task failed, serving fallback: {}", join_err);
            fallback(state.engine.as_ref())
        }
        Err(_) => {
            warn!(
                "  Engine read exceeded {:?}, serving fallback",
                state.request_timeout
            );
            fallback(state.engine.as_ref())
        }
    }
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/health", get(health_check))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        achievements: state.engine.catalog().len(),
    })
}

// ============================================================================
// Achievement Routes
// ============================================================================

pub fn achievement_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/achievements/:user_id", get(get_achievements))
        .route("/v1/achievements/:user_id/summary", get(get_summary))
        .route("/v1/achievements/:user_id/evaluate", post(trigger_evaluation))
}

async fn get_achievements(
    State(state): State<AppStateArc>,
    Path(user_id): Path<String>,
    Query(query): Query<AchievementsQuery>,
) -> Json<AchievementsResponse> {
    let category = query.category;
    let uid = user_id.clone();
    let achievements = read_with_engine(
        &state,
        move |engine| engine.get_achievements(&uid, category),
        |engine| engine.fallback_achievements(category),
    )
    .await;

    Json(AchievementsResponse {
        user_id,
        category,
        achievements,
    })
}

async fn get_summary(
    State(state): State<AppStateArc>,
    Path(user_id): Path<String>,
) -> Json<AchievementSummary> {
    let uid = user_id.clone();
    let summary = read_with_engine(
        &state,
        move |engine| engine.achievement_summary(&uid),
        |engine| engine.fallback_summary(&user_id),
    )
    .await;
    Json(summary)
}

async fn trigger_evaluation(
    State(state): State<AppStateArc>,
    Path(user_id): Path<String>,
) -> ApiResult<EvaluationResponse> {
    let uid = user_id.clone();
    let deadline = Instant::now() + state.request_timeout;
    let newly_unlocked = spawn_engine(&state, move |engine| {
        engine.trigger_unlock_evaluation_by(&uid, deadline)
    })
    .await
    .map_err(task_failed)?
    .map_err(map_engine_error)?;

    if !newly_unlocked.is_empty() {
        info!("  {} newly unlocked: {}", user_id, newly_unlocked.join(", "));
    }

    Ok(Json(EvaluationResponse {
        user_id,
        newly_unlocked,
    }))
}

// ============================================================================
// Points & Leaderboard Routes
// ============================================================================

pub fn points_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/points/:user_id", get(get_points))
}

async fn get_points(
    State(state): State<AppStateArc>,
    Path(user_id): Path<String>,
) -> Json<PointsResponse> {
    let uid = user_id.clone();
    let snapshot = read_with_engine(
        &state,
        move |engine| engine.user_points(&uid),
        |engine| engine.fallback_points(),
    )
    .await;
    Json(PointsResponse { user_id, snapshot })
}

pub fn leaderboard_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/leaderboard", get(get_leaderboard))
}

async fn get_leaderboard(
    State(state): State<AppStateArc>,
    Query(query): Query<LeaderboardQuery>,
) -> Json<LeaderboardResponse> {
    let scope = query.scope.unwrap_or_default();
    let limit = query.limit;
    let board = read_with_engine(
        &state,
        move |engine| engine.get_leaderboard(scope, limit),
        |engine| engine.fallback_leaderboard(scope),
    )
    .await;

    Json(LeaderboardResponse {
        scope: board.scope,
        entries: board.entries,
    })
}

// ============================================================================
// Referral Routes
// ============================================================================

pub fn referral_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/referrals/redeem", post(redeem_referral))
        .route("/v1/referrals/complete", post(complete_referral))
        .route("/v1/referrals/:user_id", get(get_referral_status))
        .route("/v1/referrals/:user_id/code", post(issue_referral_code))
}

async fn get_referral_status(
    State(state): State<AppStateArc>,
    Path(user_id): Path<String>,
) -> Json<ReferralStatusResponse> {
    let uid = user_id.clone();
    let status = read_with_engine(
        &state,
        move |engine| engine.get_referral_status(&uid),
        |engine| engine.fallback_referral_status(&user_id),
    )
    .await;
    Json(status)
}

async fn issue_referral_code(
    State(state): State<AppStateArc>,
    Path(user_id): Path<String>,
) -> ApiResult<ReferralCodeResponse> {
    let uid = user_id.clone();
    let code = with_engine(&state, move |engine| engine.referral_code(&uid))
        .await?
        .map_err(map_engine_error)?;
    Ok(Json(ReferralCodeResponse { user_id, code }))
}

async fn redeem_referral(
    State(state): State<AppStateArc>,
    Json(req): Json<RedeemRequest>,
) -> ApiResult<ReferralRecord> {
    let record = with_engine(&state, move |engine| {
        engine.redeem_referral(&req.code, &req.referred_id)
    })
    .await?
    .map_err(map_engine_error)?;
    Ok(Json(record))
}

async fn complete_referral(
    State(state): State<AppStateArc>,
    Json(req): Json<CompleteRequest>,
) -> ApiResult<ReferralRecord> {
    let record = with_engine(&state, move |engine| {
        engine.complete_referral(&req.referred_id, req.reward_cents)
    })
    .await?
    .map_err(map_engine_error)?;
    Ok(Json(record))
}
