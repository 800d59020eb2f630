//! Shared wiring for end-to-end tests
//!
//! The real auth service (session processor and user-action reactor) and the
//! real gateway run over one in-memory bus. User and project processors are
//! fakes whose data the tests mutate directly.

#![allow(dead_code)]

use async_trait::async_trait;
use auth_service::login::hash_password;
use auth_service::{LoginService, SessionCommandHandler, SessionStore, UserActionReactor};
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use dashmap::DashMap;
use gateway_service::{create_router, ActionListener, AppState, Bridges, SessionCache, SessionTokens};
use shared::events::project::{
    ProjectCommandEvent, ProjectDto, ProjectEventType, ProjectMemberDto, ProjectResultEvent, ProjectRole,
};
use shared::events::user::{UserCommandEvent, UserCommandType, UserDto, UserResultEvent};
use shared::events::{Domain, ProjectDomain, SessionDomain, UserDomain, UserId};
use shared::{CommandHandler, CommandProcessor, EventBus, Handled, MemoryBus, DEFAULT_PREFIX};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const SECRET: &str = "integration-secret-0123456789";

#[derive(Default)]
pub struct Users {
    pub users: DashMap<UserId, UserDto>,
    /// login -> argon2 hash
    pub passwords: DashMap<String, String>,
}

#[async_trait]
impl CommandHandler<UserDomain> for Users {
    async fn handle(&self, command: &UserCommandEvent) -> anyhow::Result<Handled<UserDomain>> {
        anyhow::ensure!(command.command_type == UserCommandType::Get, "unsupported command");
        if let Some(login) = command.login.as_deref() {
            let found = self.users.iter().find(|user| user.login == login).map(|user| user.clone());
            let result = match (found, self.passwords.get(login)) {
                (Some(user), Some(hash)) => UserResultEvent {
                    password_hash: Some(hash.clone()),
                    ..UserResultEvent::ok(command.event_id.clone(), vec![user])
                },
                _ => UserResultEvent::failed(command.event_id.clone(), "user not found"),
            };
            return Ok(Handled::result(result));
        }

        let user_id = command.user_id.unwrap_or_default();
        let result = match self.users.get(&user_id) {
            Some(user) => UserResultEvent::ok(command.event_id.clone(), vec![user.clone()]),
            None => UserResultEvent::failed(command.event_id.clone(), "user not found"),
        };
        Ok(Handled::result(result))
    }
}

#[derive(Default)]
pub struct Projects {
    pub memberships: DashMap<UserId, Vec<(i32, ProjectRole)>>,
}

#[async_trait]
impl CommandHandler<ProjectDomain> for Projects {
    async fn handle(&self, command: &ProjectCommandEvent) -> anyhow::Result<Handled<ProjectDomain>> {
        anyhow::ensure!(command.command_type == ProjectEventType::ForUserList, "unsupported command");
        let user_id = command.user_id.unwrap_or_default();
        let projects: Vec<ProjectDto> = self
            .memberships
            .get(&user_id)
            .map(|grants| {
                grants
                    .iter()
                    .map(|(id, role)| ProjectDto {
                        id: Some(*id),
                        name: Some(format!("Project {}", id)),
                        project_members: Some(vec![ProjectMemberDto {
                            id: id * 100,
                            user_id,
                            role: *role,
                        }]),
                        ..Default::default()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Handled::result(ProjectResultEvent::ok(command.event_id.clone(), projects)))
    }
}

pub struct Stack {
    pub bus: MemoryBus,
    pub store: Arc<SessionStore>,
    pub users: Arc<Users>,
    pub projects: Arc<Projects>,
    pub state: AppState,
    pub app: Router,
    /// The auth service's login routes
    pub auth: Router,
    cancel: CancellationToken,
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Stack {
    pub async fn start() -> Self {
        let bus = MemoryBus::new();
        let shared_bus: Arc<dyn EventBus> = Arc::new(bus.clone());
        let cancel = CancellationToken::new();
        let timeout = Duration::from_secs(2);

        let store = Arc::new(SessionStore::default());
        let users = Arc::new(Users::default());
        let projects = Arc::new(Projects::default());

        CommandProcessor::spawn::<SessionDomain, _>(
            Arc::clone(&shared_bus),
            SessionDomain::topics(DEFAULT_PREFIX),
            Arc::new(SessionCommandHandler::new(Arc::clone(&store))),
            cancel.clone(),
        )
        .await
        .unwrap();
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
            Bridges::start(Arc::clone(&shared_bus), DEFAULT_PREFIX, timeout)
                .await
                .unwrap(),
        );
        let cache = Arc::new(SessionCache::new(Duration::from_secs(2 * 3600)));
        let tokens = Arc::new(SessionTokens::new(SECRET, Duration::from_secs(3600)));
        let state = AppState::new(bridges, Arc::clone(&cache), tokens, timeout, timeout);

        ActionListener::new(cache, state.projects.clone())
            .spawn(Arc::clone(&shared_bus), DEFAULT_PREFIX, cancel.clone())
            .await
            .unwrap();

        let app = create_router(state.clone());
        let logins = LoginService::new(Arc::clone(&state.bridges.user), Arc::clone(&store), timeout);
        let auth = auth_service::create_router(Arc::new(logins));
        Self {
            bus,
            store,
            users,
            projects,
            state,
            app,
            auth,
            cancel,
        }
    }

    /// Start the auth service's user-action reactor
    pub async fn start_reactor(&self) {
        UserActionReactor::new(self.shared_bus(), Arc::clone(&self.store), DEFAULT_PREFIX)
            .spawn(DEFAULT_PREFIX, self.cancel.clone())
            .await
            .unwrap();
    }

    pub fn shared_bus(&self) -> Arc<dyn EventBus> {
        Arc::new(self.bus.clone())
    }

    /// Register a user whose password the login route will accept
    pub fn add_user_with_password(&self, user_id: UserId, login: &str, password: &str) {
        self.add_user(user_id, login);
        self.users
            .passwords
            .insert(login.to_string(), hash_password(password).unwrap());
    }

    /// POST credentials to the auth service's login route
    pub async fn login(&self, login: &str, password: &str) -> (StatusCode, String) {
        let body = serde_json::json!({ "login": login, "password": password });
        let request = Request::builder()
            .method(Method::POST)
            .uri("/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = self.auth.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    /// Register a user, open an auth session for them and return its id
    pub fn open_session(&self, user_id: UserId, login: &str) -> String {
        self.add_user(user_id, login);
        self.store.create(user_id)
    }

    pub fn add_user(&self, user_id: UserId, login: &str) {
        self.users.users.insert(
            user_id,
            UserDto {
                id: user_id,
                login: login.to_string(),
                email: format!("{}@example.com", login),
                full_name: None,
                global_role: "USER".to_string(),
                skill_ids: vec![],
                created_at: "2024-01-01T00:00:00Z".to_string(),
                avatar_url: None,
            },
        );
    }

    /// Exchange a session id for a gateway token through the public endpoint
    pub async fn exchange(&self, session_id: &str) -> String {
        let (status, body) = self
            .send(Method::GET, &format!("/public/auth?access_token={}", session_id), None)
            .await;
        assert_eq!(status, StatusCode::OK, "exchange failed: {}", body);
        body["token"].as_str().unwrap().to_string()
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let response = self
            .app
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub fn verify_calls(&self) -> u64 {
        self.state.bridges.session.stats().sent
    }
}

pub async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
