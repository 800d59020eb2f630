//! Gateway tests
//!
//! Fake session, user and project processors run over the in-memory bus so
//! the gate, the cache invalidation and the HTTP surface are exercised
//! through real bridge round trips.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use shared::events::project::{
    ProjectActionEvent, ProjectActionType, ProjectCommandEvent, ProjectDto, ProjectEventType,
    ProjectMemberDto, ProjectResultEvent, ProjectRole,
};
use shared::events::session::{
    SessionActionEvent, SessionCommandEvent, SessionCommandType, SessionResultEvent,
};
use shared::events::user::{
    UserActionEvent, UserActionType, UserCommandEvent, UserCommandType, UserDto, UserResultEvent,
};
use shared::events::{Domain, ProjectDomain, SessionDomain, UserDomain, UserId};
use shared::{
    bus::publish_json, BridgeError, CommandHandler, CommandProcessor, EventBus, Handled, MemoryBus,
    DEFAULT_PREFIX,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_test::assert_ok;
use tower::ServiceExt;

use crate::config::{ConfigError, GatewayConfig};
use crate::directory::ProjectDirectory;
use crate::error::ApiError;
use crate::gate::Rejection;
use crate::invalidation::{classify_project, classify_session, classify_user, ActionListener, Decision};
use crate::session::{ProjectGrant, SessionCache, SessionEntry};
use crate::token::{SessionTokens, TokenError};
use crate::{create_router, AppState, Bridges};

const SECRET: &str = "test-secret-0123456789abcdef";

// ============================================================================
// Fake domain processors
// ============================================================================

#[derive(Default)]
struct FakeSessions {
    live: DashMap<String, UserId>,
}

#[async_trait]
impl CommandHandler<SessionDomain> for FakeSessions {
    async fn handle(&self, command: &SessionCommandEvent) -> anyhow::Result<Handled<SessionDomain>> {
        let session_id = command.session_id.clone().unwrap_or_default();
        let result = match command.session_command_type {
            SessionCommandType::Verify => match self.live.get(&session_id) {
                Some(user_id) => SessionResultEvent::ok(command.event_id.clone(), Some(*user_id)),
                None => SessionResultEvent::failed(command.event_id.clone(), "session expired"),
            },
            _ => {
                self.live.remove(&session_id);
                SessionResultEvent::ok(command.event_id.clone(), command.user_id)
            }
        };
        Ok(Handled::result(result))
    }
}

#[derive(Default)]
struct FakeUsers {
    users: DashMap<UserId, UserDto>,
}

#[async_trait]
impl CommandHandler<UserDomain> for FakeUsers {
    async fn handle(&self, command: &UserCommandEvent) -> anyhow::Result<Handled<UserDomain>> {
        anyhow::ensure!(command.command_type == UserCommandType::Get, "unsupported command");
        let user_id = command.user_id.unwrap_or_default();
        let result = match self.users.get(&user_id) {
            Some(user) => UserResultEvent::ok(command.event_id.clone(), vec![user.clone()]),
            None => UserResultEvent::failed(command.event_id.clone(), "user not found"),
        };
        Ok(Handled::result(result))
    }
}

#[derive(Default)]
struct FakeProjects {
    memberships: DashMap<UserId, Vec<(i32, ProjectRole)>>,
}

#[async_trait]
impl CommandHandler<ProjectDomain> for FakeProjects {
    async fn handle(&self, command: &ProjectCommandEvent) -> anyhow::Result<Handled<ProjectDomain>> {
        anyhow::ensure!(command.command_type == ProjectEventType::ForUserList, "unsupported command");
        let user_id = command.user_id.unwrap_or_default();
        let projects: Vec<ProjectDto> = self
            .memberships
            .get(&user_id)
            .map(|grants| grants.iter().map(|(id, role)| project(*id, user_id, *role)).collect())
            .unwrap_or_default();
        Ok(Handled::result(ProjectResultEvent::ok(command.event_id.clone(), projects)))
    }
}

fn project(id: i32, user_id: UserId, role: ProjectRole) -> ProjectDto {
    ProjectDto {
        id: Some(id),
        name: Some(format!("Project {}", id)),
        project_members: Some(vec![ProjectMemberDto { id: id * 100, user_id, role }]),
        ..Default::default()
    }
}

fn user(id: UserId, login: &str) -> UserDto {
    UserDto {
        id,
        login: login.to_string(),
        email: format!("{}@example.com", login),
        full_name: None,
        global_role: "USER".to_string(),
        skill_ids: vec![],
        created_at: "2024-01-01T00:00:00Z".to_string(),
        avatar_url: None,
    }
}

struct Harness {
    bus: MemoryBus,
    state: AppState,
    sessions: Arc<FakeSessions>,
    users: Arc<FakeUsers>,
    projects: Arc<FakeProjects>,
    cancel: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(true, Duration::from_secs(2)).await
    }

    /// `with_sessions = false` leaves the session domain unanswered
    async fn start_with(with_sessions: bool, auth_timeout: Duration) -> Self {
        let bus = MemoryBus::new();
        let shared_bus: Arc<dyn EventBus> = Arc::new(bus.clone());
        let cancel = CancellationToken::new();

        let sessions = Arc::new(FakeSessions::default());
        let users = Arc::new(FakeUsers::default());
        let projects = Arc::new(FakeProjects::default());

        if with_sessions {
            CommandProcessor::spawn::<SessionDomain, _>(
                Arc::clone(&shared_bus),
                SessionDomain::topics(DEFAULT_PREFIX),
                Arc::clone(&sessions),
                cancel.clone(),
            )
            .await
            .unwrap();
        }
        CommandProcessor::spawn::<UserDomain, _>(
            Arc::clone(&shared_bus),
            UserDomain::topics(DEFAULT_PREFIX),
            Arc::clone(&users),
            cancel.clone(),
        )
        .await
        .unwrap();
        CommandProcessor::spawn::<ProjectDomain, _>(
            Arc::clone(&shared_bus),
            ProjectDomain::topics(DEFAULT_PREFIX),
            Arc::clone(&projects),
            cancel.clone(),
        )
        .await
        .unwrap();

        let bridges = Arc::new(
            Bridges::start(shared_bus, DEFAULT_PREFIX, Duration::from_secs(2))
                .await
                .unwrap(),
        );
        let cache = Arc::new(SessionCache::new(Duration::from_secs(2 * 3600)));
        let tokens = Arc::new(SessionTokens::new(SECRET, Duration::from_secs(3600)));
        let state = AppState::new(bridges, cache, tokens, auth_timeout, Duration::from_secs(2));

        Self {
            bus,
            state,
            sessions,
            users,
            projects,
            cancel,
        }
    }

    /// Register a live session for a known user and return its bearer token
    fn login(&self, session_id: &str, user_id: UserId, login: &str) -> String {
        self.sessions.live.insert(session_id.to_string(), user_id);
        self.users.users.insert(user_id, user(user_id, login));
        self.state.tokens.issue(session_id, user_id).unwrap()
    }

    fn verify_calls(&self) -> u64 {
        self.state.bridges.session.stats().sent
    }

    async fn listen(&self) {
        ActionListener::new(Arc::clone(&self.state.cache), self.state.projects.clone())
            .spawn(Arc::new(self.bus.clone()), DEFAULT_PREFIX, self.cancel.clone())
            .await
            .unwrap();
    }
}

fn entry(user_id: UserId, last_active: chrono::DateTime<Utc>) -> SessionEntry {
    SessionEntry {
        user_id,
        session_id: format!("s-{}", user_id),
        login: format!("user{}", user_id),
        global_role: "USER".to_string(),
        project_roles: vec![ProjectGrant {
            project_id: 1,
            role: ProjectRole::Member,
        }],
        last_active,
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_defaults_with_secret() {
    let vars = HashMap::from([("TASKTRACK_JWT_SECRET".to_string(), SECRET.to_string())]);
    let config = assert_ok!(GatewayConfig::from_vars(vars));

    assert_eq!(config.port, 8080);
    assert_eq!(config.topic_prefix, "tasktrack");
    assert_eq!(config.auth_timeout(), Duration::from_secs(3));
    assert_eq!(config.bridge_timeout(), Duration::from_secs(5));
    assert_eq!(config.session_idle(), Duration::from_secs(7200));
    assert_eq!(config.sweep_interval(), Duration::from_secs(3600));
}

#[test]
fn test_config_reads_overrides() {
    let vars = HashMap::from([
        ("TASKTRACK_JWT_SECRET".to_string(), SECRET.to_string()),
        ("TASKTRACK_PORT".to_string(), "9090".to_string()),
        ("TASKTRACK_AUTH_TIMEOUT_MS".to_string(), "4000".to_string()),
    ]);
    let config = GatewayConfig::from_vars(vars).unwrap();
    assert_eq!(config.port, 9090);
    assert_eq!(config.auth_timeout(), Duration::from_secs(4));
}

#[test]
fn test_config_requires_secret() {
    let result = GatewayConfig::from_vars(HashMap::new());
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

// ============================================================================
// Token codec
// ============================================================================

#[test]
fn test_token_round_trip_carries_session_and_subject() {
    let tokens = SessionTokens::new(SECRET, Duration::from_secs(60));
    let token = assert_ok!(tokens.issue("s1", 42));
    let claims = assert_ok!(tokens.decode(&token));
    assert_eq!(claims.session_id, "s1");
    assert_eq!(claims.user_id, 42);
}

#[test]
fn test_token_from_other_secret_is_malformed() {
    let theirs = SessionTokens::new("another-secret-0123456789", Duration::from_secs(60));
    let ours = SessionTokens::new(SECRET, Duration::from_secs(60));
    let token = theirs.issue("s1", 42).unwrap();

    assert!(matches!(ours.decode(&token), Err(TokenError::Malformed(_))));
    assert!(matches!(ours.decode("not-a-jwt"), Err(TokenError::Malformed(_))));
}

// ============================================================================
// Session cache
// ============================================================================

#[test]
fn test_cache_get_returns_put_entry_and_bumps_activity() {
    let cache = SessionCache::new(Duration::from_secs(7200));
    let stale = Utc::now() - ChronoDuration::minutes(30);
    cache.put("t1", entry(7, stale));

    let hit = cache.get("t1").unwrap();
    assert_eq!(hit.user_id, 7);
    assert_eq!(hit.global_role, "USER");
    assert!(hit.last_active > stale);
    assert!(cache.get("missing").is_none());
}

#[test]
fn test_remove_subject_only_touches_that_subject() {
    let cache = SessionCache::new(Duration::from_secs(7200));
    cache.put("t1", entry(7, Utc::now()));
    cache.put("t1b", entry(7, Utc::now()));
    cache.put("t2", entry(9, Utc::now()));

    assert_eq!(cache.remove_subject(7), 2);
    assert!(cache.get("t1").is_none());
    assert!(cache.get("t1b").is_none());
    assert_eq!(cache.get("t2").unwrap().user_id, 9);
}

#[test]
fn test_sweep_removes_idle_entries() {
    let cache = SessionCache::new(Duration::from_secs(2 * 3600));
    let now = Utc::now();
    cache.put("t2", entry(9, now - ChronoDuration::hours(3)));
    cache.put("t3", entry(10, now - ChronoDuration::minutes(10)));

    assert_eq!(cache.sweep_at(now), 1);
    assert!(cache.get("t2").is_none());
    assert!(cache.get("t3").is_some());
}

#[test]
fn test_refresh_never_resurrects() {
    let cache = SessionCache::new(Duration::from_secs(7200));
    cache.put("t1", entry(7, Utc::now()));
    cache.remove_subject(7);

    let grants = vec![ProjectGrant {
        project_id: 5,
        role: ProjectRole::Owner,
    }];
    assert_eq!(cache.refresh_grants(7, &grants), 0);
    assert!(cache.is_empty());
}

#[test]
fn test_refresh_replaces_grants_in_place() {
    let cache = SessionCache::new(Duration::from_secs(7200));
    cache.put("t1", entry(7, Utc::now()));

    let grants = vec![ProjectGrant {
        project_id: 5,
        role: ProjectRole::Manager,
    }];
    assert_eq!(cache.refresh_grants(7, &grants), 1);
    let refreshed = cache.get("t1").unwrap();
    assert_eq!(refreshed.role_in(5), Some(ProjectRole::Manager));
    assert_eq!(refreshed.role_in(1), None);
    assert_eq!(refreshed.session_id, "s-7");
}

#[test]
fn test_fill_racing_invalidation_is_discarded() {
    let cache = SessionCache::new(Duration::from_secs(7200));
    let ticket = cache.fill_ticket(7);
    cache.remove_subject(7);

    assert!(!cache.put_if_unchanged("t1", entry(7, Utc::now()), ticket));
    assert!(cache.get("t1").is_none());

    let ticket = cache.fill_ticket(7);
    assert!(cache.put_if_unchanged("t1", entry(7, Utc::now()), ticket));
}

#[test]
fn test_other_subject_invalidation_does_not_block_fill() {
    let cache = SessionCache::new(Duration::from_secs(7200));
    cache.put("t9", entry(9, Utc::now()));
    let ticket = cache.fill_ticket(7);

    cache.remove_subject(9);
    cache.refresh_grants(11, &[]);

    assert!(cache.put_if_unchanged("t7", entry(7, Utc::now()), ticket));
    assert_eq!(cache.get("t7").unwrap().user_id, 7);
}

#[test]
fn test_stale_fill_leaves_fresh_entry_alone() {
    let cache = SessionCache::new(Duration::from_secs(7200));
    let stale = cache.fill_ticket(7);
    cache.remove_subject(7);

    let fresh_ticket = cache.fill_ticket(7);
    let fresh = entry(7, Utc::now());
    assert!(cache.put_if_unchanged("t1", fresh.clone(), fresh_ticket));

    assert!(!cache.put_if_unchanged("t1", entry(7, Utc::now() - ChronoDuration::seconds(5)), stale));
    assert_eq!(cache.get("t1").unwrap().session_id, fresh.session_id);
}

#[test]
fn test_project_wide_invalidation_discards_every_fill() {
    let cache = SessionCache::new(Duration::from_secs(7200));
    let ticket = cache.fill_ticket(7);
    cache.discard_inflight_fills();

    assert!(!cache.put_if_unchanged("t7", entry(7, Utc::now()), ticket));
    assert!(cache.is_empty());
}

#[test]
fn test_subjects_holding_project() {
    let cache = SessionCache::new(Duration::from_secs(7200));
    cache.put("a", entry(7, Utc::now()));
    cache.put("b", entry(7, Utc::now()));
    cache.put("c", entry(9, Utc::now()));
    let mut outsider = entry(11, Utc::now());
    outsider.project_roles.clear();
    cache.put("d", outsider);

    assert_eq!(cache.subjects_holding_project(1), vec![7, 9]);
    assert!(cache.subjects_holding_project(2).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_runs_on_interval() {
    let cache = Arc::new(SessionCache::new(Duration::from_secs(2 * 3600)));
    cache.put("old", entry(9, Utc::now() - ChronoDuration::hours(3)));
    let cancel = CancellationToken::new();
    let sweeper = cache.spawn_sweeper(Duration::from_secs(3600), cancel.clone());

    tokio::task::yield_now().await;
    assert_eq!(cache.len(), 1);

    tokio::time::advance(Duration::from_secs(3601)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(cache.is_empty());

    cancel.cancel();
    sweeper.await.unwrap();
}

// ============================================================================
// Invalidation policy
// ============================================================================

#[test]
fn test_classify_session_actions() {
    let expire_all = SessionActionEvent::new(SessionCommandType::ExpireAll, Some(7));
    let verify = SessionActionEvent::new(SessionCommandType::Verify, Some(7));
    let anonymous = SessionActionEvent::new(SessionCommandType::Expire, None);

    assert_eq!(classify_session(&expire_all), Decision::Remove(7));
    assert_eq!(classify_session(&verify), Decision::Ignore);
    assert_eq!(classify_session(&anonymous), Decision::Ignore);
}

#[test]
fn test_classify_user_actions() {
    for kind in [
        UserActionType::RoleUpdated,
        UserActionType::PasswordUpdated,
        UserActionType::UserDeleted,
    ] {
        assert_eq!(classify_user(&UserActionEvent::new(kind, 7)), Decision::Remove(7));
    }
    for kind in [
        UserActionType::UserCreated,
        UserActionType::UserUpdated,
        UserActionType::Unknown,
    ] {
        assert_eq!(classify_user(&UserActionEvent::new(kind, 7)), Decision::Ignore);
    }
}

#[test]
fn test_classify_project_actions() {
    let update = ProjectActionEvent::new(ProjectActionType::Update, 3, Some(7));
    let edit_role = ProjectActionEvent::new(ProjectActionType::EditRole, 3, Some(7));
    let delete = ProjectActionEvent::new(ProjectActionType::Delete, 3, None);
    let orphan_discharge = ProjectActionEvent::new(ProjectActionType::Discharge, 3, None);

    assert_eq!(classify_project(&update), Decision::Ignore);
    assert_eq!(
        classify_project(&edit_role),
        Decision::Refresh {
            users: vec![7],
            project: None
        }
    );
    assert_eq!(
        classify_project(&delete),
        Decision::Refresh {
            users: vec![],
            project: Some(3)
        }
    );
    assert_eq!(classify_project(&orphan_discharge), Decision::Ignore);
}

// ============================================================================
// Authentication gate
// ============================================================================

#[tokio::test]
async fn test_gate_rejects_missing_and_malformed_tokens() {
    let harness = Harness::start().await;
    let gate = &harness.state.gate;

    let missing = gate.authenticate(None).await.unwrap_err();
    assert_eq!(missing, Rejection::MissingToken);
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(gate.authenticate(Some("Basic abc")).await.unwrap_err(), Rejection::MalformedToken);
    assert_eq!(gate.authenticate(Some("Bearer ")).await.unwrap_err(), Rejection::MalformedToken);
    assert_eq!(
        gate.authenticate(Some("Bearer garbage")).await.unwrap_err(),
        Rejection::MalformedToken
    );
    assert_eq!(harness.verify_calls(), 0);
}

#[tokio::test]
async fn test_gate_miss_then_hit() {
    let harness = Harness::start().await;
    harness.projects.memberships.insert(42, vec![(3, ProjectRole::Owner)]);
    let token = harness.login("s1", 42, "alice");
    let header = bearer(&token);

    let first = harness.state.gate.authenticate(Some(&header)).await.unwrap();
    assert_eq!(first.session.user_id, 42);
    assert_eq!(first.session.login, "alice");
    assert_eq!(first.session.role_in(3), Some(ProjectRole::Owner));
    assert_eq!(harness.verify_calls(), 1);
    assert_eq!(harness.state.cache.len(), 1);

    let second = harness.state.gate.authenticate(Some(&header)).await.unwrap();
    assert_eq!(second.session.user_id, 42);
    assert_eq!(harness.verify_calls(), 1, "cache hit must not verify again");
}

#[tokio::test]
async fn test_gate_rejects_expired_session_with_403() {
    let harness = Harness::start().await;
    let token = harness.state.tokens.issue("gone", 42).unwrap();

    let rejection = harness
        .state
        .gate
        .authenticate(Some(&bearer(&token)))
        .await
        .unwrap_err();
    assert_eq!(rejection, Rejection::InvalidSession("session expired".to_string()));
    assert_eq!(rejection.status(), StatusCode::FORBIDDEN);
    assert!(harness.state.cache.is_empty());
}

#[tokio::test]
async fn test_gate_rejects_session_owned_by_someone_else() {
    let harness = Harness::start().await;
    harness.login("s1", 42, "alice");
    let forged = harness.state.tokens.issue("s1", 43).unwrap();

    let rejection = harness
        .state
        .gate
        .authenticate(Some(&bearer(&forged)))
        .await
        .unwrap_err();
    assert!(matches!(rejection, Rejection::InvalidSession(_)));
}

#[tokio::test]
async fn test_gate_reports_unreachable_auth_distinctly() {
    let harness = Harness::start_with(false, Duration::from_millis(100)).await;
    let token = harness.state.tokens.issue("s1", 42).unwrap();

    let started = Instant::now();
    let rejection = harness
        .state
        .gate
        .authenticate(Some(&bearer(&token)))
        .await
        .unwrap_err();

    assert_eq!(rejection, Rejection::Unreachable);
    assert_eq!(rejection.status(), StatusCode::UNAUTHORIZED);
    assert_ne!(rejection.to_string(), Rejection::InvalidSession(String::new()).to_string());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(harness.state.bridges.session.pending_count(), 0);
}

#[tokio::test]
async fn test_gate_rejects_unknown_user() {
    let harness = Harness::start().await;
    harness.sessions.live.insert("s1".to_string(), 42);
    let token = harness.state.tokens.issue("s1", 42).unwrap();

    let rejection = harness
        .state
        .gate
        .authenticate(Some(&bearer(&token)))
        .await
        .unwrap_err();
    assert_eq!(rejection, Rejection::InvalidSession("user not found".to_string()));
}

// ============================================================================
// Action-driven invalidation
// ============================================================================

#[tokio::test]
async fn test_role_update_action_evicts_subject() {
    let harness = Harness::start().await;
    harness.listen().await;
    harness.state.cache.put("t1", entry(7, Utc::now()));
    harness.state.cache.put("t2", entry(9, Utc::now()));

    let action = UserActionEvent::new(UserActionType::RoleUpdated, 7);
    let topic = UserDomain::topics(DEFAULT_PREFIX).actions;
    publish_json(&harness.bus, &topic, &action.event_id, &action).await.unwrap();

    let cache = Arc::clone(&harness.state.cache);
    eventually(|| cache.get("t1").is_none()).await;
    assert_eq!(cache.get("t2").unwrap().user_id, 9);
}

#[tokio::test]
async fn test_session_expire_all_action_evicts_subject() {
    let harness = Harness::start().await;
    harness.listen().await;
    harness.state.cache.put("t1", entry(7, Utc::now()));

    let action = SessionActionEvent::new(SessionCommandType::ExpireAll, Some(7));
    let topic = SessionDomain::topics(DEFAULT_PREFIX).actions;
    publish_json(&harness.bus, &topic, &action.event_id, &action).await.unwrap();

    let cache = Arc::clone(&harness.state.cache);
    eventually(|| cache.is_empty()).await;
}

#[tokio::test]
async fn test_membership_change_refreshes_in_place() {
    let harness = Harness::start().await;
    harness.state.cache.put("t1", entry(7, Utc::now()));
    harness.projects.memberships.insert(7, vec![(1, ProjectRole::Manager), (4, ProjectRole::Member)]);

    let listener = ActionListener::new(Arc::clone(&harness.state.cache), harness.state.projects.clone());
    let action = ProjectActionEvent::new(ProjectActionType::EditRole, 1, Some(7));
    let refresh = listener.apply(classify_project(&action)).expect("refresh started");
    refresh.await.unwrap();

    let refreshed = harness.state.cache.get("t1").unwrap();
    assert_eq!(refreshed.role_in(1), Some(ProjectRole::Manager));
    assert_eq!(refreshed.role_in(4), Some(ProjectRole::Member));
}

#[tokio::test]
async fn test_project_delete_refreshes_every_holder() {
    let harness = Harness::start().await;
    harness.state.cache.put("a", entry(7, Utc::now()));
    harness.state.cache.put("b", entry(9, Utc::now()));
    // Project 1 is gone for both
    harness.projects.memberships.insert(7, vec![]);
    harness.projects.memberships.insert(9, vec![(2, ProjectRole::Owner)]);

    let listener = ActionListener::new(Arc::clone(&harness.state.cache), harness.state.projects.clone());
    let action = ProjectActionEvent::new(ProjectActionType::Delete, 1, None);
    listener.apply(classify_project(&action)).unwrap().await.unwrap();

    assert!(harness.state.cache.get("a").unwrap().project_roles.is_empty());
    assert_eq!(harness.state.cache.get("b").unwrap().role_in(2), Some(ProjectRole::Owner));
    assert!(harness.state.cache.subjects_holding_project(1).is_empty());
}

#[tokio::test]
async fn test_failed_refresh_fails_closed() {
    let bus = MemoryBus::new();
    let bridges = Bridges::start(Arc::new(bus), DEFAULT_PREFIX, Duration::from_millis(50))
        .await
        .unwrap();
    let cache = Arc::new(SessionCache::new(Duration::from_secs(7200)));
    cache.put("t1", entry(7, Utc::now()));

    // No project processor: the refresh times out
    let listener = ActionListener::new(
        Arc::clone(&cache),
        ProjectDirectory::new(Arc::clone(&bridges.project), Duration::from_millis(50)),
    );
    let action = ProjectActionEvent::new(ProjectActionType::Discharge, 1, Some(7));
    listener.apply(classify_project(&action)).unwrap().await.unwrap();

    assert!(cache.get("t1").is_none());
}

#[tokio::test]
async fn test_member_refresh_only_discards_that_members_fills() {
    let harness = Harness::start().await;
    let listener = ActionListener::new(Arc::clone(&harness.state.cache), harness.state.projects.clone());
    let bystander = harness.state.cache.fill_ticket(9);
    let member = harness.state.cache.fill_ticket(7);

    // Nobody is cached yet, so no refresh task starts
    assert!(listener.apply(Decision::Refresh { users: vec![7], project: None }).is_none());

    assert!(!harness.state.cache.put_if_unchanged("t7", entry(7, Utc::now()), member));
    assert!(harness.state.cache.put_if_unchanged("t9", entry(9, Utc::now()), bystander));
}

#[tokio::test]
async fn test_refresh_skipped_without_cached_subject() {
    let harness = Harness::start().await;
    let listener = ActionListener::new(Arc::clone(&harness.state.cache), harness.state.projects.clone());
    let action = ProjectActionEvent::new(ProjectActionType::Create, 1, Some(7));
    assert!(listener.apply(classify_project(&action)).is_none());
    assert_eq!(harness.state.bridges.project.stats().sent, 0);
}

// ============================================================================
// HTTP surface
// ============================================================================

#[tokio::test]
async fn test_health_reports_cache_and_bridges() {
    let harness = Harness::start().await;
    harness.state.cache.put("t1", entry(7, Utc::now()));
    let app = create_router(harness.state.clone());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cachedSessions"], 1);
    assert_eq!(body["bridges"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn test_protected_route_without_token_is_401() {
    let harness = Harness::start().await;
    let app = create_router(harness.state.clone());

    let response = app
        .oneshot(Request::builder().uri("/api/me").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "authentication required");
}

#[tokio::test]
async fn test_login_flow_over_http() {
    let harness = Harness::start().await;
    harness.login("s1", 42, "alice");
    harness.projects.memberships.insert(42, vec![(3, ProjectRole::Member)]);

    let app = create_router(harness.state.clone());
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/public/auth?access_token=s1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["userId"], 42);
    let token = body["token"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/me")
                .header(header::AUTHORIZATION, bearer(&token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let me = body_json(response).await;
    assert_eq!(me["login"], "alice");
    assert_eq!(me["projectRoles"][0]["role"], "MEMBER");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/projects")
                .header(header::AUTHORIZATION, bearer(&token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await[0]["id"], 3);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/sessions/current")
                .header(header::AUTHORIZATION, bearer(&token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(harness.state.cache.is_empty());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/me")
                .header(header::AUTHORIZATION, bearer(&token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_public_auth_with_dead_session_is_403() {
    let harness = Harness::start().await;
    let app = create_router(harness.state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/public/auth?access_token=nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[test]
fn test_bridge_errors_map_to_statuses() {
    let timeout = ApiError::from(BridgeError::Timeout {
        event_id: "e1".to_string(),
        timeout: Duration::from_secs(3),
    });
    assert_eq!(timeout.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(timeout.to_string(), "upstream unavailable");

    let domain = ApiError::from(BridgeError::DomainFailure("wrong password".to_string()));
    assert_eq!(domain.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(domain.to_string(), "wrong password");

    let invariant = ApiError::from(BridgeError::InvariantViolation("dup".to_string()));
    assert_eq!(invariant.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(ApiError::from(BridgeError::Closed).status(), StatusCode::INTERNAL_SERVER_ERROR);
}
