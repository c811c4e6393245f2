//! PKCE (RFC 7636) verifier and challenge generation.
//!
//! The verifier is created once per authorization attempt, kept in memory for
//! the duration of the flow, and discarded after the code exchange. It is
//! never persisted and never transmitted to the authorization server; only
//! the derived challenge is.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// A PKCE code verifier with its derived S256 challenge.
#[derive(Clone)]
pub struct PkcePair {
    verifier: String,
}

impl PkcePair {
    /// Generate a new pair from 32 cryptographically secure random bytes.
    ///
    /// The verifier is the URL-safe base64 encoding (no padding) of those
    /// bytes: 43 characters, 256 bits of entropy, within the 43-128 range
    /// RFC 7636 requires.
    pub fn generate() -> Self {
        let mut verifier_bytes = [0u8; 32];
        rand::thread_rng().fill(&mut verifier_bytes);

        Self {
            verifier: URL_SAFE_NO_PAD.encode(verifier_bytes),
        }
    }

    /// The code verifier, sent only to the token endpoint during exchange.
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    /// The code challenge for the authorization request.
    ///
    /// S256 method: `BASE64URL(SHA256(code_verifier))`, no padding.
    pub fn challenge(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

/// Generate a random `state` parameter for CSRF protection.
///
/// 16 cryptographically secure random bytes, URL-safe base64 without padding.
pub fn generate_state() -> String {
    let mut state_bytes = [0u8; 16];
    rand::thread_rng().fill(&mut state_bytes);
    URL_SAFE_NO_PAD.encode(state_bytes)
}
