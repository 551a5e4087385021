//! Token validation and request authentication.
//!
//! Identity issuance lives in an external service; this module only
//! validates bearer tokens and resolves them to `{user_id, role}`. The
//! REST surface uses [`auth_middleware`] + the [`AuthUser`] extractor, the
//! realtime gateway calls [`verify_token`] directly at handshake time.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::server::state::AppState;
use crate::store::UserRole;

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Role assigned by the identity service
    pub role: UserRole,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at time (Unix timestamp)
    pub iat: u64,
}

/// Authenticated identity attached to the request extensions.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: UserRole,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Create a bearer token for a user. Used by tests and dev tooling; real
/// tokens come from the identity service with the same claims shape.
pub fn create_token(
    user_id: Uuid,
    role: UserRole,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = unix_now();
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: now + 30 * 24 * 60 * 60,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

/// Verify and decode a bearer token.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Resolve a token to an authenticated user, or `None` if invalid.
pub fn authenticate(token: &str, secret: &str) -> Option<AuthenticatedUser> {
    let claims = verify_token(token, secret).ok()?;
    let user_id = Uuid::parse_str(&claims.sub).ok()?;
    Some(AuthenticatedUser {
        user_id,
        role: claims.role,
    })
}

/// Pull the bearer token out of an Authorization header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ")
}

/// Authentication middleware
///
/// Extracts the bearer token, verifies it and attaches an
/// [`AuthenticatedUser`] to the request extensions. Returns 401 when the
/// token is missing or invalid.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("missing Authorization header");
            StatusCode::UNAUTHORIZED
        })?;

    let token = bearer_token(header).ok_or_else(|| {
        tracing::warn!("invalid Authorization header format");
        StatusCode::UNAUTHORIZED
    })?;

    let user = authenticate(token, &state.config.jwt_secret).ok_or_else(|| {
        tracing::warn!("invalid token");
        StatusCode::UNAUTHORIZED
    })?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Axum extractor for the authenticated user set by [`auth_middleware`].
#[derive(Clone, Debug)]
pub struct AuthUser(pub AuthenticatedUser);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .map(AuthUser)
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn token_round_trip() {
        let user_id = Uuid::new_v4();
        let token = create_token(user_id, UserRole::Client, SECRET).unwrap();
        let claims = verify_token(&token, SECRET).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.role, UserRole::Client);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_token(Uuid::new_v4(), UserRole::Salon, SECRET).unwrap();
        assert!(verify_token(&token, "other-secret").is_err());
        assert!(authenticate(&token, "other-secret").is_none());
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(verify_token("invalid.token.here", SECRET).is_err());
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
    }
}
