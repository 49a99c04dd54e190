use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Generates a cryptographically random code verifier for PKCE.
///
/// Returns a 64-character URL-safe string (RFC 7636 compliant, 43-128 chars).
#[must_use]
pub fn generate_code_verifier() -> String {
    let random_bytes: [u8; 48] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Computes the S256 code challenge from a code verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generates a cryptographically random state parameter for `OAuth2`.
///
/// Returns a 43-character URL-safe string (32 random bytes → base64url).
#[must_use]
pub fn generate_state() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// State carried between the authorization request and its callback.
///
/// Consumed exactly once by the callback handler, whether or not the
/// login succeeds.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    state: String,
    code_verifier: String,
    code_challenge: String,
}

impl PendingAuthorization {
    /// Fresh `state` nonce and PKCE pair.
    #[must_use]
    pub fn generate() -> Self {
        let code_verifier = generate_code_verifier();
        Self {
            state: generate_state(),
            code_challenge: generate_code_challenge(&code_verifier),
            code_verifier,
        }
    }

    /// Rebuild from a stored `state` and verifier; the challenge is derived.
    #[must_use]
    pub fn from_parts(state: impl Into<String>, code_verifier: impl Into<String>) -> Self {
        let code_verifier = code_verifier.into();
        Self {
            state: state.into(),
            code_challenge: generate_code_challenge(&code_verifier),
            code_verifier,
        }
    }

    /// Compact form for cookie storage: `state.verifier`.
    ///
    /// Both halves are base64url, which never contains `.`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}.{}", self.state, self.code_verifier)
    }

    /// Inverse of [`encode`](Self::encode). `None` if either half is empty.
    #[must_use]
    pub fn decode(value: &str) -> Option<Self> {
        let (state, verifier) = value.split_once('.')?;
        if state.is_empty() || verifier.is_empty() {
            return None;
        }
        Some(Self::from_parts(state, verifier))
    }

    /// Constant-time comparison of the callback's `state` with ours.
    #[must_use]
    pub fn matches_state(&self, received: &str) -> bool {
        self.state.as_bytes().ct_eq(received.as_bytes()).into()
    }

    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    #[must_use]
    pub fn code_verifier(&self) -> &str {
        &self.code_verifier
    }

    #[must_use]
    pub fn code_challenge(&self) -> &str {
        &self.code_challenge
    }
}

impl std::fmt::Debug for PendingAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuthorization")
            .field("code_challenge", &self.code_challenge)
            .finish_non_exhaustive()
    }
}
