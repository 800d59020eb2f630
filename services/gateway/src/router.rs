use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use shared::events::project::ProjectDto;
use shared::events::UserId;
use shared::BridgeStatsSnapshot;
use std::sync::Arc;
use std::time::Duration;

use crate::bridges::Bridges;
use crate::directory::{ProjectDirectory, SessionDirectory, UserDirectory, Verification};
use crate::error::ApiError;
use crate::gate::{AuthGate, AuthUser};
use crate::middleware::{request_logging, require_auth};
use crate::session::{SessionCache, SessionEntry};
use crate::token::SessionTokens;

#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AuthGate>,
    pub cache: Arc<SessionCache>,
    pub bridges: Arc<Bridges>,
    pub tokens: Arc<SessionTokens>,
    pub sessions: SessionDirectory,
    pub projects: ProjectDirectory,
}

impl AppState {
    /// Gate lookups use `auth_timeout`, everything else `bridge_timeout`.
    pub fn new(
        bridges: Arc<Bridges>,
        cache: Arc<SessionCache>,
        tokens: Arc<SessionTokens>,
        auth_timeout: Duration,
        bridge_timeout: Duration,
    ) -> Self {
        let sessions = SessionDirectory::new(Arc::clone(&bridges.session), auth_timeout);
        let gate = AuthGate::new(
            Arc::clone(&cache),
            Arc::clone(&tokens),
            sessions.clone(),
            UserDirectory::new(Arc::clone(&bridges.user), auth_timeout),
            ProjectDirectory::new(Arc::clone(&bridges.project), auth_timeout),
        );

        Self {
            gate: Arc::new(gate),
            cache,
            projects: ProjectDirectory::new(Arc::clone(&bridges.project), bridge_timeout),
            bridges,
            tokens,
            sessions,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub cached_sessions: usize,
    pub bridges: Vec<BridgeStatsSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub user_id: UserId,
}

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/me", get(me))
        .route("/api/projects", get(my_projects))
        .route("/api/sessions/current", delete(logout))
        .route_layer(from_fn_with_state(Arc::clone(&state.gate), require_auth));

    Router::new()
        .route("/health", get(health))
        .route("/public/auth", get(public_auth))
        .merge(protected)
        .layer(from_fn(request_logging))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        cached_sessions: state.cache.len(),
        bridges: state.bridges.stats(),
    })
}

/// Exchange an auth-service session id for a bearer token
async fn public_auth(
    State(state): State<AppState>,
    Query(query): Query<AuthQuery>,
) -> Result<Json<TokenResponse>, ApiError> {
    match state.sessions.verify(&query.access_token).await? {
        Verification::Valid(user_id) => {
            let token = state.tokens.issue(&query.access_token, user_id)?;
            Ok(Json(TokenResponse { token, user_id }))
        }
        Verification::Invalid(reason) => Err(ApiError::Forbidden(reason)),
    }
}

async fn me(Extension(user): Extension<AuthUser>) -> Json<SessionEntry> {
    Json(user.session)
}

async fn my_projects(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<ProjectDto>>, ApiError> {
    let projects = state.projects.projects_for_user(user.session.user_id).await?;
    Ok(Json(projects))
}

async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    state
        .sessions
        .expire(&user.session.session_id, user.session.user_id)
        .await?;
    state.cache.remove(&user.token);
    Ok(StatusCode::NO_CONTENT)
}
