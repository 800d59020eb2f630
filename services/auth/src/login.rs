//! Credential login and registration
//!
//! The user service owns credentials. Login fetches the user by login over
//! the request/reply bridge, checks the password against the stored argon2
//! hash and opens a session in the local store.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::Deserialize;
use shared::events::user::{UserCommandEvent, UserCommandType};
use shared::events::{UserDomain, UserId};
use shared::{BridgeError, CorrelationBridge};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::store::SessionStore;

pub const DEFAULT_GLOBAL_ROLE: &str = "USER";

#[derive(Error, Debug)]
pub enum LoginError {
    #[error("User with such login not found!")]
    UnknownUser,
    #[error("Wrong password!")]
    WrongPassword,
    #[error("Registration rejected: {0}")]
    Rejected(String),
    #[error("User service unavailable: {0}")]
    Upstream(#[from] BridgeError),
    #[error("Password hashing failed: {0}")]
    Hash(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub login: String,
    #[serde(default)]
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub global_role: Option<String>,
}

/// A freshly opened session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedIn {
    pub session_id: String,
    pub user_id: UserId,
}

pub struct LoginService {
    users: Arc<CorrelationBridge<UserDomain>>,
    store: Arc<SessionStore>,
    timeout: Duration,
}

impl LoginService {
    pub fn new(users: Arc<CorrelationBridge<UserDomain>>, store: Arc<SessionStore>, timeout: Duration) -> Self {
        Self { users, store, timeout }
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<LoggedIn, LoginError> {
        let result = self
            .users
            .call(UserCommandEvent::get_by_login(&credentials.login), self.timeout)
            .await?;
        if !result.success {
            debug!(login = %credentials.login, error = ?result.error_message, "User lookup failed");
            return Err(LoginError::UnknownUser);
        }

        let user_id = result
            .users
            .as_ref()
            .and_then(|users| users.first())
            .map(|user| user.id)
            .ok_or(LoginError::UnknownUser)?;
        let hash = result.password_hash.as_deref().ok_or(LoginError::WrongPassword)?;
        if !verify_password(&credentials.password, hash) {
            info!(user_id = user_id, "Login rejected, wrong password");
            return Err(LoginError::WrongPassword);
        }

        let session_id = self.store.create(user_id);
        info!(user_id = user_id, "Session opened");
        Ok(LoggedIn { session_id, user_id })
    }

    /// Ask the user service to create the account with a hashed password
    pub async fn register(&self, registration: &Registration) -> Result<(), LoginError> {
        let command = UserCommandEvent {
            login: Some(registration.login.clone()),
            email: Some(registration.email.clone()),
            password_hash: Some(hash_password(&registration.password)?),
            full_name: registration.full_name.clone(),
            global_role: Some(
                registration
                    .global_role
                    .clone()
                    .unwrap_or_else(|| DEFAULT_GLOBAL_ROLE.to_string()),
            ),
            ..UserCommandEvent::new(UserCommandType::Create)
        };

        let result = self.users.call(command, self.timeout).await?;
        if !result.success {
            let reason = result.error_message.unwrap_or_else(|| "user service refused".to_string());
            return Err(LoginError::Rejected(reason));
        }
        info!(login = %registration.login, "User registered");
        Ok(())
    }
}

pub fn hash_password(password: &str) -> Result<String, LoginError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| LoginError::Hash(e.to_string()))
}

/// False for a mismatch and for a hash that does not parse
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}
