//! End-to-end flows over the assembled session core with a mock HTTP
//! backend.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde_json::json;

use campuslink::error::ErrorCode;
use campuslink::gate::{AuthGate, RoleGate};
use campuslink::pipeline::MockHttpClient;
use campuslink::{ClientConfig, Credentials, Role, Session, SessionCore, SessionEvent};

use common::make_token;

struct TestClient {
    core: SessionCore,
    http: MockHttpClient,
    _dir: tempfile::TempDir,
}

fn test_client() -> TestClient {
    let dir = tempfile::tempdir().unwrap();
    let config = ClientConfig {
        api_base_url: "http://testserver".to_string(),
        channel_url: "ws://127.0.0.1:1/ws".to_string(),
        data_dir: PathBuf::from(dir.path()),
    };
    let http = MockHttpClient::new();
    let core = SessionCore::with_http(config, Arc::new(http.clone()));
    TestClient {
        core,
        http,
        _dir: dir,
    }
}

async fn stub_login(http: &MockHttpClient, roles: &[&str]) {
    let token = make_token(
        "u-77",
        roles,
        "brookfield",
        Utc::now().timestamp() + 3_600,
    );
    http.add_json_response(
        Method::POST,
        "/auth/login",
        StatusCode::OK,
        &json!({
            "token": token,
            "tokenType": "Bearer",
            "username": "amara.okafor",
            "roles": roles,
            "permissions": [],
            "tenantId": "brookfield",
        }),
    )
    .await
    .unwrap();
}

async fn sign_in(client: &TestClient, roles: &[&str]) {
    stub_login(&client.http, roles).await;
    client
        .core
        .auth
        .login(&Credentials {
            username: "amara.okafor".to_string(),
            password: "correct-horse".to_string(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_login_yields_authenticated_session_with_primary_role() {
    let client = test_client();
    let mut events = client.core.events.subscribe();
    sign_in(&client, &["TEACHER"]).await;

    let session = client.core.session.snapshot();
    assert!(session.authenticated);
    assert!(!session.loading);
    assert_eq!(session.primary_role(), Some(Role::Teacher));
    assert_eq!(session.tenant_id().as_deref(), Some("brookfield"));

    // Token and tenant were persisted together
    assert!(client.core.tokens.read().is_some());
    assert_eq!(client.core.tokens.tenant_id().as_deref(), Some("brookfield"));
    assert!(!client.core.tokens.is_expired());

    let notice = events.recv().await.unwrap();
    assert_eq!(
        notice.event,
        SessionEvent::SignedIn {
            user_id: "u-77".to_string()
        }
    );

    // The sign-in request itself went out without a prior token
    let login = client.http.last_request_to("/auth/login").await.unwrap();
    assert!(!login.headers.contains_key("Authorization"));
}

#[tokio::test]
async fn test_role_gate_rejects_teacher_on_admin_route() {
    let client = test_client();
    sign_in(&client, &["TEACHER"]).await;

    let gate = RoleGate::new(Arc::clone(&client.core.session), vec![Role::Admin]);
    let decision = gate.evaluate("/admin/staff").await;
    assert!(!decision.allowed());
    assert_eq!(
        decision.location().as_deref(),
        Some("/auth/sign-in?redirectUrl=/admin/staff")
    );

    let gate = RoleGate::new(Arc::clone(&client.core.session), vec![Role::Teacher]);
    assert!(gate.evaluate("/classes").await.allowed());
}

#[tokio::test]
async fn test_logout_resets_everything() {
    let client = test_client();
    sign_in(&client, &["TEACHER"]).await;

    client.core.auth.logout().await;

    assert_eq!(client.core.session.snapshot(), Session::default());
    assert_eq!(client.core.tokens.read(), None);
    assert_eq!(client.core.tokens.tenant_id(), None);
    assert!(!client.core.bridge.is_connected());

    // Requests after sign-out carry no identity
    client
        .http
        .add_json_response(Method::GET, "/students", StatusCode::OK, &json!([]))
        .await
        .unwrap();
    client.core.pipeline.get("/students").await.unwrap();
    let request = client.http.last_request_to("/students").await.unwrap();
    assert!(!request.headers.contains_key("Authorization"));
}

#[tokio::test]
async fn test_expired_token_rehydration_clears_storage() {
    let client = test_client();
    let stale = make_token("u-77", &["TEACHER"], "brookfield", Utc::now().timestamp() - 1);
    client.core.tokens.save(&stale).unwrap();
    client.core.tokens.save_tenant("brookfield").unwrap();
    assert!(client.core.tokens.is_expired());

    client.core.auth.check_auth_status().await;

    assert!(!client.core.session.is_authenticated());
    assert_eq!(client.core.tokens.read(), None);
    assert_eq!(client.core.tokens.tenant_id(), None);
}

#[tokio::test]
async fn test_unauthenticated_navigation_redirects_with_origin() {
    let client = test_client();
    let gate = AuthGate::new(Arc::clone(&client.core.session));

    let decision = gate.evaluate("/library/loans");
    assert_eq!(
        decision.location().as_deref(),
        Some("/auth/sign-in?redirectUrl=/library/loans")
    );

    sign_in(&client, &["LIBRARIAN"]).await;
    assert!(gate.evaluate("/library/loans").allowed());
}

#[tokio::test]
async fn test_forced_sign_out_on_401_mid_session() {
    let client = test_client();
    sign_in(&client, &["TEACHER"]).await;
    let mut events = client.core.events.subscribe();

    client
        .http
        .add_response(
            Method::GET,
            "/grades",
            campuslink::pipeline::MockResponse::new(StatusCode::UNAUTHORIZED, ""),
        )
        .await;

    let error = client.core.pipeline.get("/grades").await.unwrap_err();
    assert_eq!(error.code, ErrorCode::Unauthorized);
    assert!(!client.core.session.is_authenticated());
    assert_eq!(client.core.tokens.read(), None);

    let notice = events.recv().await.unwrap();
    assert!(matches!(notice.event, SessionEvent::RedirectToSignIn { .. }));
}

#[tokio::test]
async fn test_second_login_attempt_is_refused_while_loading() {
    let client = test_client();

    // Delay the reply so the second attempt arrives while the first
    // is still in flight
    client
        .http
        .add_response(
            Method::POST,
            "/auth/login",
            campuslink::pipeline::MockResponse::new(
                StatusCode::OK,
                serde_json::to_string(&json!({
                    "token": make_token("u-77", &["TEACHER"], "brookfield", Utc::now().timestamp() + 3_600),
                    "username": "amara.okafor",
                    "roles": ["TEACHER"],
                    "tenantId": "brookfield",
                }))
                .unwrap(),
            )
            .with_delay(std::time::Duration::from_millis(50)),
        )
        .await;

    let credentials = Credentials {
        username: "amara.okafor".to_string(),
        password: "correct-horse".to_string(),
    };

    let (first, second) = tokio::join!(
        client.core.auth.login(&credentials),
        client.core.auth.login(&credentials),
    );

    let outcomes = [first.is_ok(), second.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    assert!(client.core.session.is_authenticated());
}
