//! Session store
//!
//! Authoritative record of live sessions. Persistence is not modelled; the
//! store lives as long as the process.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use shared::events::UserId;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Sessions live five days from creation
pub const SESSION_LIFETIME_DAYS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    Valid(UserId),
    /// Existed but ran out; it has been deleted
    Expired(UserId),
    Unknown,
}

pub struct SessionStore {
    sessions: DashMap<String, StoredSession>,
    lifetime: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Duration::days(SESSION_LIFETIME_DAYS))
    }
}

impl SessionStore {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            lifetime,
        }
    }

    /// Open a session for `user_id` and return its id
    pub fn create(&self, user_id: UserId) -> String {
        self.create_at(user_id, Utc::now())
    }

    pub fn create_at(&self, user_id: UserId, now: DateTime<Utc>) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(
            session_id.clone(),
            StoredSession {
                user_id,
                created_at: now,
                expires_at: now + self.lifetime,
            },
        );
        session_id
    }

    pub fn check(&self, session_id: &str) -> SessionCheck {
        self.check_at(session_id, Utc::now())
    }

    pub fn check_at(&self, session_id: &str, now: DateTime<Utc>) -> SessionCheck {
        let Some(session) = self.sessions.get(session_id).map(|s| s.clone()) else {
            return SessionCheck::Unknown;
        };
        if session.expires_at > now {
            return SessionCheck::Valid(session.user_id);
        }
        self.sessions
            .remove_if(session_id, |_, stored| stored.expires_at <= now);
        SessionCheck::Expired(session.user_id)
    }

    /// Returns the owner of the removed session, if there was one
    pub fn expire(&self, session_id: &str) -> Option<UserId> {
        self.sessions
            .remove(session_id)
            .map(|(_, session)| session.user_id)
    }

    pub fn expire_all(&self, user_id: UserId) -> usize {
        self.expire_where(|_, session| session.user_id == user_id)
    }

    pub fn expire_all_except(&self, user_id: UserId, current: &str) -> usize {
        self.expire_where(|id, session| session.user_id == user_id && id != current)
    }

    /// Drop every session that ran out as of `now`
    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        self.expire_where(|_, session| session.expires_at <= now)
    }

    /// Periodically drop sessions nobody presented before they ran out
    pub fn spawn_purger(self: &Arc<Self>, interval: std::time::Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.purge_expired_at(Utc::now());
                        debug!(removed = removed, remaining = store.len(), "Expired sessions purged");
                    }
                }
            }
        })
    }

    fn expire_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str, &StoredSession) -> bool,
    {
        let before = self.sessions.len();
        self.sessions.retain(|id, session| !predicate(id, session));
        before.saturating_sub(self.sessions.len())
    }

    pub fn sessions_of(&self, user_id: UserId) -> usize {
        self.sessions
            .iter()
            .filter(|session| session.user_id == user_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
