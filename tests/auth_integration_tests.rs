use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{Method, Request, StatusCode, Uri, header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use std::{sync::Arc, time::SystemTime};
use training_portal::{
    AppState, PortalError, PortalResult,
    access::{Capability, Role, RoleSet},
    auth::{AuthUser, Claims, decode_token},
    config::{AppConfig, Env},
    error::AuthError,
    models::User,
    repository::InMemoryRepository,
    session::{AuthProvider, Session},
    storage::MockStorageService,
};
use uuid::Uuid;

// --- Helpers ---

struct NoopAuthProvider;

#[async_trait]
impl AuthProvider for NoopAuthProvider {
    async fn sign_in_with_password(&self, _email: &str, _password: &str) -> PortalResult<Session> {
        Err(AuthError::InvalidCredentials.into())
    }
    async fn refresh(&self, _refresh_token: &str) -> PortalResult<Session> {
        Err(AuthError::SessionExpired.into())
    }
    async fn sign_out(&self, _access_token: &str) -> PortalResult<()> {
        Ok(())
    }
}

const TEST_JWT_SECRET: &str = "test-secret-value-1234567890";
const TEST_USER_ID: Uuid = Uuid::from_u128(1);

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// `exp_offset` is relative to now and may be negative.
fn create_token(user_id: Uuid, exp_offset: i64, secret: &str) -> String {
    let now = now_secs();
    let claims = Claims {
        sub: user_id,
        iat: now as usize,
        exp: (now as i64 + exp_offset) as usize,
        aud: Some("authenticated".to_string()),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

async fn create_app_state(env: Env, user: Option<User>) -> AppState {
    let repo = InMemoryRepository::new();
    if let Some(user) = user {
        repo.insert_user(user).await;
    }
    let config = AppConfig {
        env,
        jwt_secret: TEST_JWT_SECRET.to_string(),
        ..AppConfig::default()
    };
    AppState {
        repo: Arc::new(repo),
        storage: Arc::new(MockStorageService::new()),
        auth: Arc::new(NoopAuthProvider),
        config,
    }
}

fn test_user(role: Role) -> User {
    User {
        id: TEST_USER_ID,
        email: "test@example.com".to_string(),
        role,
        created_at: Utc::now(),
    }
}

fn get_request_parts(method: Method, uri: Uri) -> Parts {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let (parts, _) = request.into_parts();
    parts
}

fn with_bearer(token: &str) -> Parts {
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    parts.headers.insert(
        header::AUTHORIZATION,
        header::HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );
    parts
}

// --- Tests ---

#[tokio::test]
async fn test_auth_success_with_valid_jwt() {
    let app_state = create_app_state(Env::Production, Some(test_user(Role::Asm))).await;
    let mut parts = with_bearer(&create_token(TEST_USER_ID, 3600, TEST_JWT_SECRET));

    let user = AuthUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();

    assert_eq!(user.id, TEST_USER_ID);
    assert_eq!(user.role, Role::Asm);
}

#[tokio::test]
async fn test_auth_failure_with_missing_header() {
    let app_state = create_app_state(Env::Production, None).await;
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());

    let err = AuthUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap_err();

    assert!(matches!(err, PortalError::Auth(AuthError::MissingToken)));
    assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_jwt_is_session_expired() {
    let app_state = create_app_state(Env::Production, Some(test_user(Role::Rm))).await;
    // Past the default 60s leeway.
    let mut parts = with_bearer(&create_token(TEST_USER_ID, -600, TEST_JWT_SECRET));

    let err = AuthUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap_err();

    assert!(err.is_session_expired());
    assert_eq!(err.code(), "session_expired");
    assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_forged_jwt_is_invalid_token() {
    let app_state = create_app_state(Env::Production, Some(test_user(Role::Rm))).await;
    let mut parts = with_bearer(&create_token(TEST_USER_ID, 3600, "some-other-secret"));

    let err = AuthUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap_err();

    assert!(matches!(err, PortalError::Auth(AuthError::InvalidToken)));
    assert_eq!(err.code(), "unauthorized");
}

#[tokio::test]
async fn test_valid_jwt_without_user_record() {
    let app_state = create_app_state(Env::Production, None).await;
    let mut parts = with_bearer(&create_token(TEST_USER_ID, 3600, TEST_JWT_SECRET));

    let err = AuthUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap_err();

    assert!(matches!(err, PortalError::Auth(AuthError::UnknownUser)));
}

#[tokio::test]
async fn test_local_bypass_success() {
    let app_state = create_app_state(Env::Local, Some(test_user(Role::Admin))).await;

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    parts.headers.insert(
        header::HeaderName::from_static("x-user-id"),
        header::HeaderValue::from_str(&TEST_USER_ID.to_string()).unwrap(),
    );

    let user = AuthUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();
    assert_eq!(user.id, TEST_USER_ID);
    assert_eq!(user.role, Role::Admin);
}

#[tokio::test]
async fn test_local_bypass_disabled_in_prod() {
    let app_state = create_app_state(Env::Production, Some(test_user(Role::Admin))).await;

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    parts.headers.insert(
        header::HeaderName::from_static("x-user-id"),
        header::HeaderValue::from_str(&TEST_USER_ID.to_string()).unwrap(),
    );

    let err = AuthUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
}

#[test]
fn test_decode_token_ignores_audience() {
    let token = create_token(TEST_USER_ID, 3600, TEST_JWT_SECRET);
    let claims = decode_token(&token, TEST_JWT_SECRET).unwrap();
    assert_eq!(claims.sub, TEST_USER_ID);
}

#[test]
fn test_auth_user_checks() {
    let user = AuthUser {
        id: TEST_USER_ID,
        role: Role::Asm,
    };
    assert!(user.can_access(&RoleSet::only(Role::MarketLead)));
    assert!(!user.can_access(&RoleSet::only(Role::BackOffice)));

    let err = user.require(Capability::ManageContent).unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
}
