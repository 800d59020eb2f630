//! Authentication gate
//!
//! Per-request state machine:
//!
//! ```text
//! Unauthenticated -> TokenPresent -> Authorized                       (cache hit)
//!                                 -> VerifyingSession -> FetchingProfile -> Authorized
//! any state -> Rejected
//! ```
//!
//! Terminal states are final for the request; the next request starts over.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use shared::logger::sanitize_for_log;
use shared::BridgeError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::directory::{ProjectDirectory, SessionDirectory, UserDirectory, Verification};
use crate::session::{SessionCache, SessionEntry};
use crate::token::SessionTokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Unauthenticated,
    TokenPresent,
    VerifyingSession,
    FetchingProfile,
    Authorized,
    Rejected,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GateState::Unauthenticated => "unauthenticated",
            GateState::TokenPresent => "token_present",
            GateState::VerifyingSession => "verifying_session",
            GateState::FetchingProfile => "fetching_profile",
            GateState::Authorized => "authorized",
            GateState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("authentication required")]
    MissingToken,
    #[error("malformed token")]
    MalformedToken,
    #[error("session is not valid: {0}")]
    InvalidSession(String),
    #[error("authentication service unavailable")]
    Unreachable,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::MissingToken | Rejection::MalformedToken | Rejection::Unreachable => {
                StatusCode::UNAUTHORIZED
            }
            Rejection::InvalidSession(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Authorization context attached to a request that passed the gate
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub token: String,
    pub session: SessionEntry,
}

/// Tracks one request's walk through the states
struct Walk {
    state: GateState,
}

impl Walk {
    fn new() -> Self {
        Self {
            state: GateState::Unauthenticated,
        }
    }

    fn advance(&mut self, next: GateState) {
        debug!(from = %self.state, to = %next, "Gate transition");
        self.state = next;
    }

    fn reject(&mut self, rejection: Rejection) -> Rejection {
        warn!(state = %self.state, reason = %rejection, "Request rejected");
        self.state = GateState::Rejected;
        rejection
    }
}

fn bearer(header: Option<&str>) -> Result<&str, Rejection> {
    let header = header.ok_or(Rejection::MissingToken)?;
    let token = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or(Rejection::MalformedToken)?;
    if token.is_empty() {
        return Err(Rejection::MalformedToken);
    }
    Ok(token)
}

pub struct AuthGate {
    cache: Arc<SessionCache>,
    tokens: Arc<SessionTokens>,
    sessions: SessionDirectory,
    users: UserDirectory,
    projects: ProjectDirectory,
}

impl AuthGate {
    pub fn new(
        cache: Arc<SessionCache>,
        tokens: Arc<SessionTokens>,
        sessions: SessionDirectory,
        users: UserDirectory,
        projects: ProjectDirectory,
    ) -> Self {
        Self {
            cache,
            tokens,
            sessions,
            users,
            projects,
        }
    }

    /// Run the gate for one request carrying `authorization` as its
    /// `Authorization` header value.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<AuthUser, Rejection> {
        let mut walk = Walk::new();

        let token = match bearer(authorization) {
            Ok(token) => token,
            Err(rejection) => return Err(walk.reject(rejection)),
        };
        walk.advance(GateState::TokenPresent);

        let claims = match self.tokens.decode(token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(token = %sanitize_for_log(token), error = %e, "Token rejected");
                self.cache.remove(token);
                return Err(walk.reject(Rejection::MalformedToken));
            }
        };

        if let Some(session) = self.cache.get(token) {
            walk.advance(GateState::Authorized);
            return Ok(AuthUser {
                token: token.to_string(),
                session,
            });
        }

        let ticket = self.cache.fill_ticket(claims.user_id);

        walk.advance(GateState::VerifyingSession);
        let user_id = match self.sessions.verify(&claims.session_id).await {
            Ok(Verification::Valid(user_id)) if user_id == claims.user_id => user_id,
            Ok(Verification::Valid(user_id)) => {
                warn!(token_user = claims.user_id, session_user = user_id, "Token subject does not own the session");
                return Err(walk.reject(Rejection::InvalidSession("session belongs to another user".to_string())));
            }
            Ok(Verification::Invalid(reason)) => {
                return Err(walk.reject(Rejection::InvalidSession(reason)));
            }
            Err(e) => return Err(walk.reject(unreachable_or_invalid(e))),
        };

        walk.advance(GateState::FetchingProfile);
        let (profile, grants) = tokio::join!(
            self.users.profile(user_id),
            self.projects.grants_for_user(user_id)
        );
        let profile = match profile {
            Ok(profile) => profile,
            Err(e) => return Err(walk.reject(unreachable_or_invalid(e))),
        };
        let grants = match grants {
            Ok(grants) => grants,
            Err(e) => return Err(walk.reject(unreachable_or_invalid(e))),
        };

        let session = SessionEntry {
            user_id,
            session_id: claims.session_id,
            login: profile.login,
            global_role: profile.global_role,
            project_roles: grants,
            last_active: Utc::now(),
        };
        if !self.cache.put_if_unchanged(token, session.clone(), ticket) {
            info!(user_id = user_id, "Sessions changed while authenticating, not caching");
        }

        walk.advance(GateState::Authorized);
        Ok(AuthUser {
            token: token.to_string(),
            session,
        })
    }
}

fn unreachable_or_invalid(err: BridgeError) -> Rejection {
    match err {
        BridgeError::DomainFailure(message) => Rejection::InvalidSession(message),
        other => {
            warn!(error = %other, "Auth round trip failed");
            Rejection::Unreachable
        }
    }
}
