//! Authentication boundary.
//!
//! Principals are issued HS256 bearer tokens by an external identity
//! layer; this module only verifies them. A verified token upserts the
//! principal (granting signup credits on first sight) and attaches a
//! [`RequestContext`] to the request. The admin surface uses a separate
//! static token compared in constant time, and fails closed when none
//! is configured.

use crate::errors::AppError;
use crate::handlers::AppState;
use crate::storage::PrincipalUpsert;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

/// Claims carried by the identity layer's tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Stable principal identifier.
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// Terms-of-service consent, recorded at signup.
    #[serde(default)]
    pub terms_accepted: bool,
    /// Privacy-policy consent, recorded at signup.
    #[serde(default)]
    pub privacy_accepted: bool,
    /// Expiration unix seconds.
    pub exp: i64,
}

/// Per-request identity, attached by `require_principal` and read by
/// the handlers downstream.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub principal_id: String,
    pub terms_accepted: bool,
    pub privacy_accepted: bool,
    pub origin: String,
}

/// Verifies the bearer token, upserts the principal and injects a
/// [`RequestContext`]. Rejects with 401 on any token problem.
pub async fn require_principal(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = bearer_token(req.headers());
    if token.is_empty() {
        return AppError::Unauthorized("Missing bearer token".to_string()).into_response();
    }

    let claims = match verify_token(token, &state.config.auth_secret) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!("Token rejected: {}", e);
            return AppError::Unauthorized("Invalid or expired token".to_string()).into_response();
        }
    };

    let origin = client_origin(req.headers(), &addr);

    // Signup credits only apply when the upsert inserts a fresh row.
    let settings = match state.storage.get_settings().await {
        Ok(settings) => settings,
        Err(e) => return e.into_response(),
    };

    let principal = match state
        .storage
        .upsert_principal(PrincipalUpsert {
            id: claims.sub,
            email: claims.email,
            username: claims.username,
            signup_credits: settings.signup_credits,
            origin: Some(origin.clone()),
            terms_accepted: claims.terms_accepted,
            privacy_accepted: claims.privacy_accepted,
        })
        .await
    {
        Ok(principal) => principal,
        Err(e) => return e.into_response(),
    };

    req.extensions_mut().insert(RequestContext {
        principal_id: principal.id,
        terms_accepted: principal.terms_accepted,
        privacy_accepted: principal.privacy_accepted,
        origin,
    });
    next.run(req).await
}

/// Guards the admin surface with the static operator token.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.admin_token.as_deref() else {
        tracing::warn!("Admin request rejected: no admin token configured");
        return AppError::Unauthorized("Admin access is not configured".to_string())
            .into_response();
    };

    let token = bearer_token(req.headers());
    if token.is_empty() || !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        return AppError::Unauthorized("Invalid admin token".to_string()).into_response();
    }
    next.run(req).await
}

fn bearer_token(headers: &HeaderMap) -> &str {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or("")
        .trim()
}

fn verify_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Client address for origin blocking: first hop of `x-forwarded-for`
/// when present (the broker runs behind a proxy), else the socket peer.
fn client_origin(headers: &HeaderMap, addr: &SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
