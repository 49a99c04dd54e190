use derive_more::{Display, From, Into};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Opaque server-side session identifier.
///
/// 32 random bytes, hex-encoded. This is the only value the browser ever
/// sees (inside an encrypted, `HttpOnly` cookie); it keys the
/// [`TokenStore`](crate::store::TokenStore). Treat it as a bearer credential:
/// `Debug` is redacted and the value is never logged.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Number of random bytes behind each identifier (256 bits).
    pub const ENTROPY_BYTES: usize = 32;

    /// Generate a fresh identifier from the thread-local CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; Self::ENTROPY_BYTES] = rand::rng().random();
        Self(hex::encode(bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionId(<redacted>)")
    }
}
