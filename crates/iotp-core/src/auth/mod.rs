//! Challenge-response authentication.
//!
//! # How the handshake proves a password (for beginners)
//!
//! The password never crosses the wire.  Instead:
//!
//! 1. The server sends 16 random bytes (the *challenge*).
//! 2. The client derives a secret from its password and runs the challenge
//!    through a keyed transform.  It sends back `username;response`.
//! 3. The server looks up the secret it holds for that username, runs the
//!    same transform, and compares the two results byte for byte.
//!
//! The transform is HMAC-SHA256 keyed with `SHA-256(password)`.  It is
//! deterministic, so the server verifies by recomputing instead of storing
//! anything per attempt, and a fresh challenge per connection keeps an
//! eavesdropped response from being replayed.

pub mod credentials;

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub use credentials::{CredentialStore, Secret, StaticCredentials};

use crate::protocol::messages::RESPONSE_SEPARATOR;

type HmacSha256 = Hmac<Sha256>;

/// Length of every challenge in bytes.
pub const CHALLENGE_LEN: usize = 16;

/// Derives the shared secret for a password.
pub fn derive_secret(password: &str) -> Secret {
    Sha256::digest(password.as_bytes()).into()
}

/// Generates a fresh challenge using the thread-local RNG.
pub fn generate_challenge() -> [u8; CHALLENGE_LEN] {
    generate_challenge_with(&mut rand::thread_rng())
}

/// Generates a challenge from the given RNG, re-rolling until it contains no
/// line terminator byte.
pub fn generate_challenge_with<R: Rng + ?Sized>(rng: &mut R) -> [u8; CHALLENGE_LEN] {
    loop {
        let mut challenge = [0u8; CHALLENGE_LEN];
        rng.fill(&mut challenge[..]);
        if !challenge.iter().any(|b| matches!(b, b'\n' | b'\r')) {
            return challenge;
        }
    }
}

/// Applies the keyed transform to a challenge.
///
/// Identical inputs always produce identical output.
pub fn compute_response(challenge: &[u8], secret: &Secret) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key size");
    mac.update(challenge);
    mac.finalize().into_bytes().to_vec()
}

/// Formats the RESPONSE body: `username;response`.
pub fn build_user_response(username: &str, password: &str, challenge: &[u8]) -> Vec<u8> {
    let response = compute_response(challenge, &derive_secret(password));
    let mut body = Vec::with_capacity(username.len() + 1 + response.len());
    body.extend_from_slice(username.as_bytes());
    body.push(RESPONSE_SEPARATOR);
    body.extend_from_slice(&response);
    body
}

/// Verifies RESPONSE bodies against a credential store.
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn CredentialStore>,
}

impl Authenticator {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Returns `true` only if `candidate` is `username;response` for a known
    /// user and the response matches the recomputed one exactly.
    ///
    /// The body is split at the first `;`, so response bytes may themselves
    /// contain `;`.  Any malformed input yields `false`.
    pub fn verify(&self, challenge: &[u8], candidate: &[u8]) -> bool {
        let Some(split) = candidate.iter().position(|&b| b == RESPONSE_SEPARATOR) else {
            return false;
        };
        let (raw_user, rest) = candidate.split_at(split);
        let response = &rest[1..];

        let Ok(username) = std::str::from_utf8(raw_user) else {
            return false;
        };
        let Some(secret) = self.store.lookup_secret(username) else {
            tracing::debug!("authentication attempt for unknown user {username:?}");
            return false;
        };

        compute_response(challenge, &secret) == response
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("users", &self.store.user_count())
            .finish()
    }
}
