//! Access tokens: compact signed claims carried in the connection handshake.
//!
//! Wire form is `base64url(claims_json) + "." + base64url(signature)`, both
//! unpadded. Verification checks the Ed25519 signature over the raw claims
//! bytes, then the validity window.

use serde::{Deserialize, Serialize};

use crate::encoding::{base64_decode, base64_encode};
use crate::error::TokenError;
use crate::keys::{PublicKey, Signature, SigningKey, verify};

/// Tolerated clock drift between the issuer and this process.
const CLOCK_SKEW_SECS: i64 = 60;

/// Claims carried by a signed access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// Subject: the user identifier this token authenticates.
    pub sub: String,
    /// Issued-at, seconds since the Unix epoch.
    pub iat: i64,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
}

/// Issues tokens. Lives with the credential service; here it also backs
/// tests and local tooling.
pub struct TokenSigner {
    key: SigningKey,
}

impl TokenSigner {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }

    /// Issue a token for `subject` valid from `now` for `ttl_secs`.
    pub fn issue(&self, subject: &str, now: i64, ttl_secs: i64) -> String {
        let claims = AccessToken {
            sub: subject.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };
        // String/i64 claims cannot fail to serialize
        let payload = serde_json::to_vec(&claims).expect("token claims serialize");
        let signature = self.key.sign(&payload);
        format!(
            "{}.{}",
            base64_encode(&payload),
            base64_encode(signature.as_bytes())
        )
    }
}

/// Verifies tokens against the issuer's public key.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    key: PublicKey,
}

impl TokenVerifier {
    pub fn new(key: PublicKey) -> Self {
        Self { key }
    }

    /// Check signature and validity window at time `now` (Unix seconds)
    /// and return the claims.
    pub fn verify(&self, token: &str, now: i64) -> Result<AccessToken, TokenError> {
        let (payload_b64, signature_b64) = token
            .split_once('.')
            .ok_or_else(|| TokenError::Malformed("missing signature separator".into()))?;

        let payload = base64_decode(payload_b64)
            .map_err(|e| TokenError::Malformed(format!("payload: {e}")))?;
        let signature_bytes = base64_decode(signature_b64)
            .map_err(|e| TokenError::Malformed(format!("signature: {e}")))?;
        let signature_arr: [u8; 64] = signature_bytes
            .try_into()
            .map_err(|_| TokenError::Malformed("signature must be 64 bytes".into()))?;

        verify(&self.key, &payload, &Signature::from_bytes(signature_arr))?;

        let claims: AccessToken = serde_json::from_slice(&payload)
            .map_err(|e| TokenError::Malformed(format!("claims: {e}")))?;

        if claims.iat > now + CLOCK_SKEW_SECS {
            return Err(TokenError::NotYetValid);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}
