//! Session cache
//!
//! Read-through, write-invalidated cache of resolved authorization context
//! keyed by bearer token. Entries are dropped by Action-driven invalidation
//! or, failing that, by the idle sweep, which bounds staleness.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use shared::events::project::ProjectRole;
use shared::events::{ProjectId, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectGrant {
    pub project_id: ProjectId,
    pub role: ProjectRole,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub user_id: UserId,
    pub session_id: String,
    pub login: String,
    pub global_role: String,
    pub project_roles: Vec<ProjectGrant>,
    pub last_active: DateTime<Utc>,
}

impl SessionEntry {
    pub fn role_in(&self, project_id: ProjectId) -> Option<ProjectRole> {
        self.project_roles
            .iter()
            .find(|grant| grant.project_id == project_id)
            .map(|grant| grant.role)
    }
}

/// Snapshot of the invalidation counters a cache fill started under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket {
    user_id: UserId,
    subject: u64,
    epoch: u64,
}

pub struct SessionCache {
    entries: DashMap<String, SessionEntry>,
    idle: chrono::Duration,
    /// Per-subject invalidation counter; a slow fill for that subject
    /// compares it to detect that it raced an invalidation
    subject_generations: DashMap<UserId, u64>,
    /// Bumped by invalidations whose subjects are not known up front
    epoch: AtomicU64,
}

impl SessionCache {
    pub fn new(idle: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            idle: chrono::Duration::from_std(idle).unwrap_or_else(|_| chrono::Duration::days(36_500)),
            subject_generations: DashMap::new(),
            epoch: AtomicU64::new(0),
        }
    }

    /// Cached entry for `token`, marking it active now
    pub fn get(&self, token: &str) -> Option<SessionEntry> {
        let mut entry = self.entries.get_mut(token)?;
        entry.last_active = Utc::now();
        Some(entry.clone())
    }

    pub fn put(&self, token: impl Into<String>, entry: SessionEntry) {
        self.entries.insert(token.into(), entry);
    }

    /// Take before resolving `user_id`'s session; hand to `put_if_unchanged`
    pub fn fill_ticket(&self, user_id: UserId) -> FillTicket {
        FillTicket {
            user_id,
            subject: self.subject_generation(user_id),
            epoch: self.epoch.load(Ordering::SeqCst),
        }
    }

    fn subject_generation(&self, user_id: UserId) -> u64 {
        self.subject_generations.get(&user_id).map(|generation| *generation).unwrap_or(0)
    }

    fn is_current(&self, ticket: &FillTicket) -> bool {
        ticket.epoch == self.epoch.load(Ordering::SeqCst)
            && ticket.subject == self.subject_generation(ticket.user_id)
    }

    /// Insert unless `ticket`'s subject was invalidated since it was taken.
    /// Returns whether the entry was kept.
    pub fn put_if_unchanged(&self, token: &str, entry: SessionEntry, ticket: FillTicket) -> bool {
        if !self.is_current(&ticket) {
            return false;
        }
        let session_id = entry.session_id.clone();
        let stamped = entry.last_active;
        self.entries.insert(token.to_string(), entry);
        // An invalidation may have slipped in between the check and the
        // insert. Only take back our own entry, never a fresher fill.
        if !self.is_current(&ticket) {
            self.entries.remove_if(token, |_, cached| {
                cached.session_id == session_id && cached.last_active == stamped
            });
            return false;
        }
        true
    }

    /// Make `user_id`'s fills started before now a no-op
    pub fn invalidate_subject_fills(&self, user_id: UserId) {
        *self.subject_generations.entry(user_id).or_insert(0) += 1;
    }

    /// Make every fill started before now a no-op
    pub fn discard_inflight_fills(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn remove(&self, token: &str) -> Option<SessionEntry> {
        self.entries.remove(token).map(|(_, entry)| entry)
    }

    /// Drop every entry of `user_id`, forcing re-authentication
    pub fn remove_subject(&self, user_id: UserId) -> usize {
        self.invalidate_subject_fills(user_id);
        let tokens = self.tokens_for_subject(user_id);
        let removed = tokens
            .iter()
            .filter(|token| {
                self.entries
                    .remove_if(token.as_str(), |_, entry| entry.user_id == user_id)
                    .is_some()
            })
            .count();
        if removed > 0 {
            debug!(user_id = user_id, removed = removed, "Sessions invalidated");
        }
        removed
    }

    /// Replace the authorization set of `user_id`'s existing entries. Never
    /// creates an entry.
    pub fn refresh_grants(&self, user_id: UserId, grants: &[ProjectGrant]) -> usize {
        self.invalidate_subject_fills(user_id);
        let mut refreshed = 0;
        for mut entry in self.entries.iter_mut() {
            if entry.user_id == user_id {
                entry.project_roles = grants.to_vec();
                refreshed += 1;
            }
        }
        refreshed
    }

    pub fn tokens_for_subject(&self, user_id: UserId) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Distinct subjects with a cached grant on `project_id`
    pub fn subjects_holding_project(&self, project_id: ProjectId) -> Vec<UserId> {
        let mut subjects: Vec<UserId> = self
            .entries
            .iter()
            .filter(|entry| entry.role_in(project_id).is_some())
            .map(|entry| entry.user_id)
            .collect();
        subjects.sort_unstable();
        subjects.dedup();
        subjects
    }

    /// Remove entries idle for longer than the configured window as of `now`
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let idle = self.idle;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| now - entry.last_active > idle)
            .map(|entry| entry.key().clone())
            .collect();

        // Re-checked under the shard lock; a concurrent `get` may have revived it
        expired
            .iter()
            .filter(|token| {
                self.entries
                    .remove_if(token.as_str(), |_, entry| now - entry.last_active > idle)
                    .is_some()
            })
            .count()
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Run `sweep` every `interval` until cancelled
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        info!(removed = removed, remaining = cache.len(), "Session sweep finished");
                    }
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
