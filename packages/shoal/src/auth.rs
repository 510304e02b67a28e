//! Identity verification: the seam between transports and the token crate.
//!
//! WebSocket handshakes carry the credential in the query string (the
//! upgrade request cannot set custom headers); the REST surface carries it
//! as a bearer token. Both paths end at the same `IdentityVerifier`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use shoal_auth::{PublicKey, TokenError, TokenVerifier};

/// Verified identity attached to an authenticated request or session.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum VerifyError {
    #[error("invalid credential: {0}")]
    InvalidToken(#[from] TokenError),
}

/// Collaborator seam: turns an opaque credential into a verified subject.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, VerifyError>;
}

/// Token-backed verifier used in production.
pub struct TokenIdentity {
    verifier: TokenVerifier,
}

impl TokenIdentity {
    pub fn new(key: PublicKey) -> Self {
        Self {
            verifier: TokenVerifier::new(key),
        }
    }
}

#[async_trait]
impl IdentityVerifier for TokenIdentity {
    async fn verify(&self, token: &str) -> Result<String, VerifyError> {
        let claims = self
            .verifier
            .verify(token, chrono::Utc::now().timestamp())?;
        Ok(claims.sub)
    }
}

// =============================================================================
// Auth State (shared across middleware and handlers)
// =============================================================================

#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<dyn IdentityVerifier>,
}

// =============================================================================
// Auth Middleware
// =============================================================================

/// Bearer-token middleware for the REST surface. Inserts `AuthUser` into
/// request extensions on success, rejects with 401 otherwise.
pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let Some(token) = token else {
        return unauthorized("Missing bearer token");
    };

    match auth_state.verifier.verify(token).await {
        Ok(user_id) => {
            request.extensions_mut().insert(AuthUser { user_id });
            next.run(request).await
        }
        Err(_) => unauthorized("Invalid bearer token"),
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

// =============================================================================
// Axum Extractors
// =============================================================================

/// Extract AuthUser from request extensions (set by middleware).
/// Returns 401 if not present.
impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthUser>().cloned().ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Authentication required"})),
            )
        })
    }
}
