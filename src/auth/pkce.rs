//! PKCE (Proof Key for Code Exchange) implementation.
//!
//! - Code verifier: 32 random bytes, base64url encoded without padding
//! - S256 code challenge derivation using SHA-256
//! - Random anti-CSRF `state` values

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// PKCE challenge method constant.
pub const PKCE_METHOD: &str = "S256";

/// Random bytes behind each verifier and state value.
const RANDOM_BYTES: usize = 32;

/// PKCE verifier/challenge pair.
#[derive(Clone)]
pub struct Pkce {
    /// The code verifier (secret, used during token exchange).
    pub verifier: String,

    /// SHA-256 of the verifier, base64url encoded without padding.
    pub challenge: String,

    /// The challenge method (always "S256").
    pub method: &'static str,
}

impl Pkce {
    /// Generate a new PKCE verifier/challenge pair.
    #[must_use]
    pub fn generate() -> Self {
        let verifier = random_token();
        let challenge = Self::compute_challenge(&verifier);

        Self {
            verifier,
            challenge,
            method: PKCE_METHOD,
        }
    }

    /// Verify that a challenge matches a verifier.
    #[must_use]
    pub fn verify(verifier: &str, challenge: &str) -> bool {
        constant_time_eq(&Self::compute_challenge(verifier), challenge)
    }

    /// Compute the S256 challenge from a verifier.
    pub fn compute_challenge(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

impl std::fmt::Debug for Pkce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkce")
            .field("challenge", &self.challenge)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Generate a random anti-CSRF state value.
pub fn generate_state() -> String {
    random_token()
}

/// Compare two secrets without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

fn random_token() -> String {
    let mut bytes = [0u8; RANDOM_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
