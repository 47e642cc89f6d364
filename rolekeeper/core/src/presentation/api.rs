// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::application::expiry_scheduler::ExpiryScheduler;
use crate::application::grant_lifecycle::{GrantLifecycleService, GrantReceipt, GrantRequest, RevokeOutcome};
use crate::domain::grant::{ActorId, GrantError, GrantId, GrantRecord, ScopeId};

pub struct AppState {
    pub grant_service: Arc<dyn GrantLifecycleService>,
    pub scheduler: Arc<ExpiryScheduler>,
    pub start_time: Instant,
}

pub fn app(grant_service: Arc<dyn GrantLifecycleService>, scheduler: Arc<ExpiryScheduler>) -> Router {
    let state = Arc::new(AppState {
        grant_service,
        scheduler,
        start_time: Instant::now(),
    });

    Router::new()
        .route("/health", get(health))
        .route("/v1/grants", get(list_grants).post(request_grant))
        .route("/v1/grants/{id}", delete(revoke_grant))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

/// `GrantError` rendered as a JSON body with a matching status code.
pub struct ApiError(pub GrantError);

impl From<GrantError> for ApiError {
    fn from(err: GrantError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            GrantError::InvalidDuration(_) => (StatusCode::BAD_REQUEST, "invalid_duration"),
            GrantError::AlreadyGranted(_) => (StatusCode::CONFLICT, "already_granted"),
            GrantError::ApplyFailed(_) => (StatusCode::BAD_GATEWAY, "apply_failed"),
            GrantError::Gateway(_) => (StatusCode::BAD_GATEWAY, "gateway_error"),
            GrantError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error"),
            GrantError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let body = json!({
            "error": kind,
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "pending_timers": state.scheduler.pending_count(),
    }))
}

async fn request_grant(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GrantRequest>,
) -> Result<(StatusCode, Json<GrantReceipt>), ApiError> {
    let receipt = state.grant_service.request_grant(request).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub scope_id: Option<ScopeId>,
}

async fn list_grants(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<GrantRecord>>, ApiError> {
    let grants = state.grant_service.list_grants(query.scope_id.as_ref()).await?;
    Ok(Json(grants))
}

#[derive(Debug, Deserialize)]
pub struct RevokeQuery {
    pub actor_id: ActorId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub id: GrantId,
    pub outcome: RevokeOutcome,
}

async fn revoke_grant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<RevokeQuery>,
) -> Result<Json<RevokeResponse>, ApiError> {
    let id = GrantId(id);
    let outcome = state.grant_service.revoke_grant(id, &query.actor_id).await?;
    Ok(Json(RevokeResponse { id, outcome }))
}
