use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use jsonwebtoken::{DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    access::{self, Capability, Role, RoleSet},
    config::{AppConfig, Env},
    error::{AuthError, PortalError},
    repository::RepositoryState,
};

/// Claims
///
/// The payload of a Supabase access token. Only `sub` is used to resolve the user;
/// `exp` is always validated.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id (`auth.users.id` = `public.users.id`).
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// AuthUser
///
/// The resolved identity of an authenticated request. The role is read from the user
/// record on every request, so a role change takes effect without re-issuing tokens.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    /// Node-level check (`view_roles` / `edit_roles`).
    pub fn can_access(&self, required: &RoleSet) -> bool {
        access::can_access(self.role, required)
    }

    /// Portal-level check; `Forbidden` when the role is too junior.
    pub fn require(&self, capability: Capability) -> Result<(), PortalError> {
        if access::has_capability(self.role, capability) {
            Ok(())
        } else {
            tracing::warn!(user = %self.id, role = %self.role, ?capability, "capability denied");
            Err(PortalError::forbidden(format!("{capability:?} requires a more senior role")))
        }
    }
}

pub fn bearer_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Extracts the bearer token from an `Authorization` header.
pub fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    bearer_from_headers(&parts.headers).ok_or(AuthError::MissingToken)
}

/// decode_token
///
/// Validates signature and expiry. An expired signature is reported as
/// `SessionExpired` so the client can tell it apart from a forged or malformed token.
pub fn decode_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = true;
    // Supabase sets `aud = "authenticated"`; tokens are scoped by the shared secret instead.
    validation.validate_aud = false;

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::SessionExpired,
            _ => AuthError::InvalidToken,
        })
}

/// AuthUser Extractor Implementation
///
/// 1. Local bypass: in `Env::Local`, an `x-user-id` header naming an existing user is
///    accepted without a token.
/// 2. Bearer token extraction and JWT validation.
/// 3. User lookup: the token is only honoured while the user record exists.
///
/// Rejection: `PortalError::Auth` (401), or the repository error when the lookup fails.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = PortalError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        if config.env == Env::Local {
            let bypass_id = parts
                .headers
                .get("x-user-id")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| Uuid::parse_str(value).ok());
            if let Some(user_id) = bypass_id {
                if let Some(user) = repo.get_user(user_id).await? {
                    return Ok(AuthUser {
                        id: user.id,
                        role: user.role,
                    });
                }
            }
        }

        let token = bearer_token(parts)?;
        let claims = decode_token(token, &config.jwt_secret).inspect_err(|e| {
            tracing::debug!(error = %e, "token rejected");
        })?;

        let user = repo
            .get_user(claims.sub)
            .await?
            .ok_or(AuthError::UnknownUser)?;

        Ok(AuthUser {
            id: user.id,
            role: user.role,
        })
    }
}
