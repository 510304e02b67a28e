//! Web-push delivery with VAPID authorization.
//!
//! Uses `reqwest` for transport and `jsonwebtoken` for ES256 VAPID JWTs,
//! minted per push-service origin and cached until shortly before expiry.
//! Pushes carry no payload; they wake the client, which then pulls its
//! unread notifications.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PushConfig;
use crate::models::PushEndpoint;

/// Cache window for VAPID JWTs (minted with a 1-hour expiry).
const TOKEN_VALIDITY: Duration = Duration::from_secs(55 * 60);

/// JWT expiry in seconds (push services accept up to 24 hours).
const TOKEN_EXPIRY_SECS: i64 = 3600;

/// Delivery failure for one endpoint attempt.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The push service reports the subscription no longer exists; the
    /// endpoint must be retired.
    #[error("push endpoint gone (status {status})")]
    EndpointGone { status: u16 },

    #[error("push endpoint uri invalid: {reason}")]
    BadEndpoint { reason: String },

    #[error("push provider error: {reason}")]
    Provider { reason: String },
}

/// One-shot wakeup delivery to a push endpoint.
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, endpoint: &PushEndpoint) -> Result<(), PushError>;
}

/// VAPID claims for push-service authentication.
#[derive(Debug, Serialize, Deserialize)]
struct VapidClaims {
    /// Audience: the push service origin.
    aud: String,
    /// Expiry (Unix timestamp).
    exp: i64,
    /// Contact for the push service operator (mailto: or https:).
    sub: String,
}

/// Cached JWT with mint-time tracking, one per push-service origin.
struct CachedToken {
    token: String,
    created_at: Instant,
}

/// VAPID-authenticated web-push client.
pub struct WebPushClient {
    subject: String,
    ttl_secs: u32,
    encoding_key: EncodingKey,
    public_key_b64: String,
    client: reqwest::Client,
    cached_tokens: Mutex<HashMap<String, CachedToken>>,
}

impl std::fmt::Debug for WebPushClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebPushClient")
            .field("subject", &self.subject)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl WebPushClient {
    /// Create a client from config. Reads the VAPID private key (P-256 PEM)
    /// from disk.
    pub fn new(config: &PushConfig) -> Result<Self, PushInitError> {
        let key_pem = std::fs::read(&config.vapid_key_path).map_err(|e| PushInitError::KeyRead {
            path: config.vapid_key_path.display().to_string(),
            reason: e.to_string(),
        })?;

        let encoding_key = EncodingKey::from_ec_pem(&key_pem).map_err(|e| {
            PushInitError::KeyParse {
                reason: e.to_string(),
            }
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PushInitError::ClientBuild {
                reason: e.to_string(),
            })?;

        info!(subject = %config.subject, ttl_secs = config.ttl_secs, "web-push client initialized");

        Ok(Self {
            subject: config.subject.clone(),
            ttl_secs: config.ttl_secs,
            encoding_key,
            public_key_b64: config.vapid_public_key.clone(),
            client,
            cached_tokens: Mutex::new(HashMap::new()),
        })
    }

    /// The push-service origin a subscription endpoint belongs to; VAPID
    /// tokens are scoped to it.
    fn origin_of(endpoint: &str) -> Result<String, PushError> {
        let url = reqwest::Url::parse(endpoint).map_err(|e| PushError::BadEndpoint {
            reason: e.to_string(),
        })?;
        if url.scheme() != "https" {
            return Err(PushError::BadEndpoint {
                reason: format!("scheme must be https, got {}", url.scheme()),
            });
        }
        let host = url.host_str().ok_or_else(|| PushError::BadEndpoint {
            reason: "missing host".into(),
        })?;
        Ok(match url.port() {
            Some(port) => format!("https://{host}:{port}"),
            None => format!("https://{host}"),
        })
    }

    /// `Authorization: vapid t=<jwt>, k=<public key>` for an origin,
    /// reusing a cached JWT when fresh.
    fn authorization_for(&self, origin: &str) -> Result<String, PushError> {
        let mut cached = self
            .cached_tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(token) = cached.get(origin) {
            if token.created_at.elapsed() < TOKEN_VALIDITY {
                return Ok(format!(
                    "vapid t={}, k={}",
                    token.token, self.public_key_b64
                ));
            }
        }

        let jwt = self.mint_jwt(origin)?;
        cached.insert(
            origin.to_string(),
            CachedToken {
                token: jwt.clone(),
                created_at: Instant::now(),
            },
        );
        Ok(format!("vapid t={jwt}, k={}", self.public_key_b64))
    }

    fn mint_jwt(&self, origin: &str) -> Result<String, PushError> {
        let claims = VapidClaims {
            aud: origin.to_string(),
            exp: chrono::Utc::now().timestamp() + TOKEN_EXPIRY_SECS,
            sub: self.subject.clone(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &self.encoding_key).map_err(
            |e| PushError::Provider {
                reason: format!("vapid jwt signing: {e}"),
            },
        )
    }
}

#[async_trait]
impl PushProvider for WebPushClient {
    async fn send(&self, endpoint: &PushEndpoint) -> Result<(), PushError> {
        let origin = Self::origin_of(&endpoint.endpoint)?;
        let authorization = self.authorization_for(&origin)?;

        let result = self
            .client
            .post(&endpoint.endpoint)
            .header("authorization", authorization)
            .header("ttl", self.ttl_secs.to_string())
            .header("urgency", "normal")
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                if response.status().is_success() {
                    Ok(())
                } else if status == 404 || status == 410 {
                    Err(PushError::EndpointGone { status })
                } else {
                    let body = response.text().await.unwrap_or_default();
                    warn!(status, body = %body, "push service rejected delivery");
                    Err(PushError::Provider {
                        reason: format!("status {status}: {body}"),
                    })
                }
            }
            Err(e) => Err(PushError::Provider {
                reason: e.to_string(),
            }),
        }
    }
}

/// Web-push client construction errors.
#[derive(Debug, thiserror::Error)]
pub enum PushInitError {
    /// Failed to read the VAPID private key file.
    #[error("failed to read VAPID key at {path}: {reason}")]
    KeyRead { path: String, reason: String },

    /// Failed to parse the VAPID private key.
    #[error("failed to parse VAPID key: {reason}")]
    KeyParse { reason: String },

    /// Failed to build the HTTP client.
    #[error("failed to build HTTP client: {reason}")]
    ClientBuild { reason: String },
}
