//! End-to-end session tests
//!
//! Login, logout and credential changes travel through the real auth
//! service and the gateway's cache invalidation.

mod common;

use axum::http::{Method, StatusCode};
use common::{eventually, Stack};
use shared::bus::publish_json;
use shared::events::session::SessionCommandEvent;
use shared::events::user::{UserActionEvent, UserActionType};
use shared::events::{Domain, SessionDomain, UserDomain};
use shared::{EventBus, DEFAULT_PREFIX};
use std::time::Duration;

// =============================================================================
// Login and logout
// =============================================================================

#[tokio::test]
async fn test_login_then_cached_requests() {
    let stack = Stack::start().await;
    let session_id = stack.open_session(1, "alice");

    let token = stack.exchange(&session_id).await;
    let (status, body) = stack.send(Method::GET, "/api/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["login"], "alice");
    assert_eq!(body["sessionId"], session_id.as_str());

    let calls = stack.verify_calls();
    for _ in 0..3 {
        let (status, _) = stack.send(Method::GET, "/api/me", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(stack.verify_calls(), calls, "cached session must not be re-verified");
}

#[tokio::test]
async fn test_password_login_reaches_protected_routes() {
    let stack = Stack::start().await;
    stack.add_user_with_password(5, "erin", "correct horse");

    let (status, session_id) = stack.login("erin", "correct horse").await;
    assert_eq!(status, StatusCode::OK);

    let token = stack.exchange(&session_id).await;
    let (status, body) = stack.send(Method::GET, "/api/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], 5);
    assert_eq!(body["login"], "erin");
    assert_eq!(body["sessionId"], session_id.as_str());
}

#[tokio::test]
async fn test_password_login_rejects_bad_credentials() {
    let stack = Stack::start().await;
    stack.add_user_with_password(6, "fay", "right");

    let (status, body) = stack.login("fay", "wrong").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, "Wrong password!");

    let (status, body) = stack.login("nobody", "right").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, "User with such login not found!");
    assert!(stack.store.is_empty());
}

#[tokio::test]
async fn test_unknown_session_cannot_be_exchanged() {
    let stack = Stack::start().await;

    let (status, body) = stack
        .send(Method::GET, "/public/auth?access_token=never-issued", None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("session expired"));
}

#[tokio::test]
async fn test_logout_ends_session_everywhere() {
    let stack = Stack::start().await;
    let session_id = stack.open_session(2, "bob");
    let token = stack.exchange(&session_id).await;
    assert_eq!(stack.send(Method::GET, "/api/me", Some(&token)).await.0, StatusCode::OK);

    let (status, _) = stack
        .send(Method::DELETE, "/api/sessions/current", Some(&token))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(stack.store.sessions_of(2), 0);

    let (status, _) = stack.send(Method::GET, "/api/me", Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// =============================================================================
// Credential changes
// =============================================================================

#[tokio::test]
async fn test_role_update_revokes_cached_session() {
    let stack = Stack::start().await;
    stack.start_reactor().await;
    let session_id = stack.open_session(3, "carol");
    let token = stack.exchange(&session_id).await;
    assert_eq!(stack.send(Method::GET, "/api/me", Some(&token)).await.0, StatusCode::OK);
    assert_eq!(stack.state.cache.len(), 1);

    let bus = stack.shared_bus();
    let action = UserActionEvent::new(UserActionType::RoleUpdated, 3);
    publish_json(
        bus.as_ref(),
        &UserDomain::topics(DEFAULT_PREFIX).actions,
        &action.event_id,
        &action,
    )
    .await
    .unwrap();

    let store = stack.store.clone();
    let cache = stack.state.cache.clone();
    eventually(move || store.sessions_of(3) == 0 && cache.tokens_for_subject(3).is_empty()).await;

    let (status, _) = stack.send(Method::GET, "/api/me", Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_password_change_keeps_other_users() {
    let stack = Stack::start().await;
    stack.start_reactor().await;
    let dave = stack.exchange(&stack.open_session(4, "dave")).await;
    let erin = stack.exchange(&stack.open_session(5, "erin")).await;
    assert_eq!(stack.send(Method::GET, "/api/me", Some(&dave)).await.0, StatusCode::OK);
    assert_eq!(stack.send(Method::GET, "/api/me", Some(&erin)).await.0, StatusCode::OK);

    let bus = stack.shared_bus();
    let action = UserActionEvent::new(UserActionType::PasswordUpdated, 4);
    publish_json(
        bus.as_ref(),
        &UserDomain::topics(DEFAULT_PREFIX).actions,
        &action.event_id,
        &action,
    )
    .await
    .unwrap();

    let store = stack.store.clone();
    eventually(move || store.sessions_of(4) == 0).await;
    assert_eq!(stack.send(Method::GET, "/api/me", Some(&dave)).await.0, StatusCode::FORBIDDEN);

    let calls = stack.verify_calls();
    assert_eq!(stack.send(Method::GET, "/api/me", Some(&erin)).await.0, StatusCode::OK);
    assert_eq!(stack.verify_calls(), calls);
}

// =============================================================================
// Redelivery
// =============================================================================

#[tokio::test]
async fn test_unacked_user_action_is_redelivered_to_reactor() {
    let stack = Stack::start().await;
    let session_id = stack.open_session(6, "frank");
    let bus = stack.shared_bus();
    let topic = UserDomain::topics(DEFAULT_PREFIX).actions;

    // A reactor instance that crashes before acknowledging
    let mut crashed = bus.subscribe(&topic, Some("auth-service")).await.unwrap();
    let action = UserActionEvent::new(UserActionType::RoleUpdated, 6);
    publish_json(bus.as_ref(), &topic, &action.event_id, &action)
        .await
        .unwrap();
    let lost = tokio::time::timeout(Duration::from_secs(1), crashed.next())
        .await
        .unwrap()
        .unwrap();
    drop(lost);
    drop(crashed);
    assert_eq!(stack.store.sessions_of(6), 1);
    assert_eq!(stack.bus.unacked_count(), 1);

    stack.start_reactor().await;
    assert_eq!(stack.bus.redeliver_unacked(), 1);

    let store = stack.store.clone();
    eventually(move || store.sessions_of(6) == 0).await;
    let memory = stack.bus.clone();
    eventually(move || memory.unacked_count() == 0).await;

    let (status, _) = stack
        .send(Method::GET, &format!("/public/auth?access_token={}", session_id), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_replayed_expire_command_is_harmless() {
    let stack = Stack::start().await;
    let session_id = stack.open_session(7, "grace");
    let keep = stack.open_session(7, "grace");
    let bridge = stack.state.bridges.session.clone();

    let first = bridge
        .request(SessionCommandEvent::expire(session_id.clone(), 7), Duration::from_secs(1))
        .await
        .unwrap();
    let replay = bridge
        .request(SessionCommandEvent::expire(session_id, 7), Duration::from_secs(1))
        .await
        .unwrap();

    assert!(first.success && replay.success);
    assert_eq!(replay.user_id, Some(7));
    assert_eq!(stack.store.sessions_of(7), 1);
    assert!(matches!(
        stack.store.check(&keep),
        auth_service::store::SessionCheck::Valid(7)
    ));
    let memory = stack.bus.clone();
    eventually(move || memory.unacked_count() == 0).await;
    assert_eq!(
        SessionDomain::topics(DEFAULT_PREFIX).processor_group(),
        "session-processor"
    );
}
