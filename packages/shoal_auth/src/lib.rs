//! Signed access-token identity primitives for Shoal.
//!
//! Credential issuance lives outside the messaging server; what arrives at
//! a connection handshake is a compact Ed25519-signed token. This crate
//! holds the key material wrappers, the token encoding, and verification.

pub mod encoding;
pub mod error;
pub mod keys;
pub mod token;

pub use error::TokenError;
pub use keys::{PublicKey, Signature, SigningKey};
pub use token::{AccessToken, TokenSigner, TokenVerifier};
