use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use std::sync::Arc;

use crate::login::{Credentials, LoginError, LoginService, Registration};

impl LoginError {
    pub fn status(&self) -> StatusCode {
        match self {
            LoginError::UnknownUser | LoginError::WrongPassword => StatusCode::FORBIDDEN,
            LoginError::Rejected(_) => StatusCode::BAD_REQUEST,
            LoginError::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            LoginError::Hash(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LoginError {
    fn into_response(self) -> Response {
        if let LoginError::Upstream(e) = &self {
            tracing::warn!(error = %e, "User service round trip failed");
        }
        (self.status(), self.to_string()).into_response()
    }
}

pub fn create_router(logins: Arc<LoginService>) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .with_state(logins)
}

/// Answers with the new session id as plain text
async fn login(
    State(logins): State<Arc<LoginService>>,
    Json(credentials): Json<Credentials>,
) -> Result<String, LoginError> {
    logins.login(&credentials).await.map(|logged_in| logged_in.session_id)
}

async fn register(
    State(logins): State<Arc<LoginService>>,
    Json(registration): Json<Registration>,
) -> Result<&'static str, LoginError> {
    logins.register(&registration).await?;
    Ok("success")
}
