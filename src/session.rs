//! Session handling against the auth collaborator (Supabase GoTrue).
//!
//! `AuthProvider` is the wire boundary (password grant, refresh, logout). `SessionManager`
//! keeps the current session of one client, broadcasts auth state changes and performs
//! the forced sign-out when the session turns out to be expired.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use crate::error::{AuthError, PortalError, PortalResult};
use crate::models::User;
use crate::repository::RepositoryState;

/// Session
///
/// Tokens issued by the auth provider for one signed-in user.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Auth state transitions published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(Uuid),
    TokenRefreshed(Uuid),
    SignedOut,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> PortalResult<Session>;
    async fn refresh(&self, refresh_token: &str) -> PortalResult<Session>;
    async fn sign_out(&self, access_token: &str) -> PortalResult<()>;
}

/// AuthProviderState
pub type AuthProviderState = Arc<dyn AuthProvider>;

// --- Supabase GoTrue client ---

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: TokenUser,
}

#[derive(Deserialize)]
struct TokenUser {
    id: Uuid,
}

/// GoTrue reports errors with either `error_description`/`error` or `msg`/`error_code`.
#[derive(Deserialize, Default)]
struct ProviderErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

impl ProviderErrorBody {
    fn text(&self) -> String {
        [
            &self.error,
            &self.error_description,
            &self.error_code,
            &self.msg,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect::<Vec<_>>()
        .join(": ")
    }
}

/// classify_provider_error
///
/// Maps an auth-provider failure to the portal taxonomy. Refresh-token failures mean the
/// session is gone and the client must sign in again.
pub fn classify_provider_error(status: u16, message: &str) -> PortalError {
    let lower = message.to_lowercase();
    if lower.contains("invalid refresh token") || lower.contains("refresh_token_not_found") {
        return AuthError::SessionExpired.into();
    }
    match status {
        400 | 401 | 403 if lower.contains("invalid") || lower.contains("credentials") => {
            AuthError::InvalidCredentials.into()
        }
        400 | 401 | 403 => AuthError::InvalidToken.into(),
        _ => PortalError::Persistence(format!("auth provider returned {status}: {message}")),
    }
}

/// SupabaseAuthProvider
pub struct SupabaseAuthProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SupabaseAuthProvider {
    pub fn new(supabase_url: &str, api_key: &str, timeout: StdDuration) -> PortalResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: format!("{}/auth/v1", supabase_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> PortalResult<Session> {
        let response = self
            .client
            .post(format!("{}/token", self.base_url))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.json::<ProviderErrorBody>().await.unwrap_or_default();
            return Err(classify_provider_error(status.as_u16(), &body.text()));
        }

        let token = response.json::<TokenResponse>().await?;
        Ok(Session {
            user_id: token.user.id,
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuthProvider {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> PortalResult<Session> {
        self.token_grant(
            "password",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> PortalResult<Session> {
        self.token_grant(
            "refresh_token",
            serde_json::json!({ "refresh_token": refresh_token }),
        )
        .await
    }

    async fn sign_out(&self, access_token: &str) -> PortalResult<()> {
        let response = self
            .client
            .post(format!("{}/logout", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.json::<ProviderErrorBody>().await.unwrap_or_default();
        Err(classify_provider_error(status.as_u16(), &body.text()))
    }
}

// --- Session manager ---

/// AuthSubscription
///
/// Receives auth events until dropped; dropping it is the unsubscribe.
pub struct AuthSubscription {
    receiver: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    /// Next event, or `None` once the manager is gone. Lagged events are skipped.
    pub async fn next(&mut self) -> Option<AuthEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "auth subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`next`](Self::next).
    pub fn try_next(&mut self) -> Option<AuthEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// SessionManager
///
/// Client-side session state: the current session, the user record behind it, and the
/// event stream the UI layer subscribes to.
pub struct SessionManager {
    provider: AuthProviderState,
    repo: RepositoryState,
    current: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SessionManager {
    pub fn new(provider: AuthProviderState, repo: RepositoryState) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            provider,
            repo,
            current: RwLock::new(None),
            events,
        }
    }

    pub fn subscribe(&self) -> AuthSubscription {
        AuthSubscription {
            receiver: self.events.subscribe(),
        }
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    /// The user record of the current session, if any.
    pub async fn current_user(&self) -> PortalResult<Option<User>> {
        let Some(session) = self.current_session().await else {
            return Ok(None);
        };
        self.repo.get_user(session.user_id).await
    }

    /// sign_in
    ///
    /// Authenticates and resolves the portal user. An identity without a portal user
    /// record is signed straight back out and reported as `UnknownUser`.
    pub async fn sign_in(&self, email: &str, password: &str) -> PortalResult<User> {
        let session = self.provider.sign_in_with_password(email, password).await?;

        let user = match self.repo.get_user(session.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                if let Err(e) = self.provider.sign_out(&session.access_token).await {
                    tracing::warn!(error = %e, "sign-out of orphan identity failed");
                }
                return Err(AuthError::UnknownUser.into());
            }
            Err(e) => return Err(e),
        };

        *self.current.write().await = Some(session);
        self.publish(AuthEvent::SignedIn(user.id));
        tracing::info!(user = %user.id, "signed in");
        Ok(user)
    }

    /// Exchanges the refresh token for a new session. An expired refresh token triggers
    /// the forced sign-out before the error is returned.
    pub async fn refresh(&self) -> PortalResult<Session> {
        let refresh_token = match self.current_session().await {
            Some(session) => session.refresh_token,
            None => return Err(AuthError::MissingToken.into()),
        };

        match self.provider.refresh(&refresh_token).await {
            Ok(session) => {
                *self.current.write().await = Some(session.clone());
                self.publish(AuthEvent::TokenRefreshed(session.user_id));
                Ok(session)
            }
            Err(e) => {
                self.handle_auth_error(&e).await;
                Err(e)
            }
        }
    }

    /// sign_out
    ///
    /// Local state is cleared even when the provider call fails.
    pub async fn sign_out(&self) {
        let Some(session) = self.current.write().await.take() else {
            return;
        };
        if let Err(e) = self.provider.sign_out(&session.access_token).await {
            tracing::warn!(error = %e, "provider sign-out failed; local session cleared");
        }
        self.publish(AuthEvent::SignedOut);
    }

    /// handle_auth_error
    ///
    /// Forced sign-out on an expired session. Returns `true` only for the call that
    /// actually cleared the session, so concurrent failures produce a single
    /// `SignedOut` event (one redirect to the login entry point).
    pub async fn handle_auth_error(&self, error: &PortalError) -> bool {
        if !error.is_session_expired() {
            return false;
        }
        let cleared = self.current.write().await.take();
        if cleared.is_none() {
            return false;
        }
        tracing::info!("session expired; signed out");
        self.publish(AuthEvent::SignedOut);
        true
    }

    fn publish(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
