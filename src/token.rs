use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use crate::jwks::{JwksResolver, KeyResolutionError};

/// Default clock skew tolerated on `exp`/`nbf`.
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(30);

/// Upper bound on configurable clock skew.
pub const MAX_LEEWAY: Duration = Duration::from_secs(60);

/// Verified claims from a JWT access token.
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    inner: JsonValue,
}

impl VerifiedClaims {
    /// Gets a claim value by key.
    #[must_use]
    pub fn get_claim(&self, key: &str) -> Option<&JsonValue> {
        self.inner.get(key)
    }

    /// Gets the inner JSON value.
    #[must_use]
    pub fn as_json(&self) -> &JsonValue {
        &self.inner
    }

    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.inner.get("sub").and_then(JsonValue::as_str)
    }

    /// The `exp` claim. Always present on claims produced by [`JwtVerifier`].
    #[must_use]
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.inner
            .get("exp")
            .and_then(JsonValue::as_i64)
            .and_then(|exp| OffsetDateTime::from_unix_timestamp(exp).ok())
    }

    /// `true` if the token expires within `threshold` of `now`.
    #[must_use]
    pub fn expires_within(&self, threshold: Duration, now: OffsetDateTime) -> bool {
        let threshold = i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX);
        self.expires_at()
            .is_some_and(|exp| (exp - now).whole_seconds() <= threshold)
    }
}

/// Why an access token was rejected.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("token expired")]
    Expired,
    #[error("signature verification failed")]
    BadSignature,
    #[error("issuer mismatch")]
    BadIssuer,
    #[error("audience mismatch")]
    BadAudience,
    #[error("malformed token: {0}")]
    Malformed(String),
    /// The JWKS could not be fetched, even after a retry.
    #[error("signing key unavailable: {0}")]
    KeyUnavailable(#[source] KeyResolutionError),
}

impl VerificationError {
    /// Short reason tag for logs.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::BadSignature => "bad-signature",
            Self::BadIssuer => "bad-issuer",
            Self::BadAudience => "bad-audience",
            Self::Malformed(_) => "malformed",
            Self::KeyUnavailable(_) => "key-unavailable",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for VerificationError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Self::BadSignature,
            ErrorKind::InvalidIssuer => Self::BadIssuer,
            ErrorKind::InvalidAudience => Self::BadAudience,
            _ => Self::Malformed(e.to_string()),
        }
    }
}

/// Verifies IdP-issued JWT access tokens against the IdP's JWKS.
///
/// Checks signature, `exp` (with a small leeway), exact `iss` match, and
/// that `aud` contains at least one of the expected audiences.
#[derive(Debug, Clone)]
pub struct JwtVerifier {
    keys: Arc<JwksResolver>,
    issuer: String,
    audiences: Vec<String>,
    leeway: Duration,
    algorithms: Vec<Algorithm>,
}

impl JwtVerifier {
    #[must_use]
    pub fn new(
        keys: Arc<JwksResolver>,
        issuer: impl Into<String>,
        audiences: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            audiences: audiences.into_iter().map(Into::into).collect(),
            leeway: DEFAULT_LEEWAY,
            algorithms: vec![Algorithm::RS256],
        }
    }

    /// Clock skew tolerance, clamped to [`MAX_LEEWAY`].
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway.min(MAX_LEEWAY);
        self
    }

    /// Accepted signing algorithms (default: `RS256`).
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    /// Verify `token` against the configured issuer and audiences.
    ///
    /// # Errors
    ///
    /// Returns a [`VerificationError`] naming the first check that failed.
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, VerificationError> {
        self.verify_for(token, &self.issuer, &self.audiences).await
    }

    /// Verify `token` against an explicit issuer and audience set.
    ///
    /// # Errors
    ///
    /// Returns a [`VerificationError`] naming the first check that failed.
    pub async fn verify_for(
        &self,
        token: &str,
        expected_issuer: &str,
        expected_audiences: &[String],
    ) -> Result<VerifiedClaims, VerificationError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;

        if !self.algorithms.contains(&header.alg) {
            return Err(VerificationError::Malformed(format!(
                "unsupported algorithm: {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| VerificationError::Malformed("missing header: kid".into()))?;

        let key = self.resolve_key(kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway.as_secs();
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.set_issuer(&[expected_issuer]);
        if expected_audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(expected_audiences);
        }

        let data = jsonwebtoken::decode::<JsonValue>(token, &key, &validation)?;
        Ok(VerifiedClaims { inner: data.claims })
    }

    /// Resolve the signing key, retrying once when the JWKS is unreachable.
    ///
    /// A `kid` that is still unknown after the resolver's forced re-fetch
    /// means the token was not signed by this IdP.
    async fn resolve_key(&self, kid: &str) -> Result<jsonwebtoken::DecodingKey, VerificationError> {
        let first = match self.keys.resolve(kid).await {
            Ok(key) => return Ok(key),
            Err(e) => e,
        };
        if !first.is_transient() {
            tracing::debug!(kid, "Token signed with unknown key");
            return Err(VerificationError::BadSignature);
        }

        tracing::warn!(error = %first, "JWKS unavailable, retrying once");
        match self.keys.resolve(kid).await {
            Ok(key) => Ok(key),
            Err(KeyResolutionError::NotFound { .. }) => Err(VerificationError::BadSignature),
            Err(e) => Err(VerificationError::KeyUnavailable(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::testing::{self, ISSUER, KEY_A, KEY_B};

    async fn verifier(server: &MockServer) -> JwtVerifier {
        testing::mount_jwks(server).await;
        testing::verifier(server)
    }

    #[tokio::test]
    async fn valid_token_is_accepted() {
        let server = MockServer::start().await;
        let verifier = verifier(&server).await;
        let token = testing::access_token(KEY_A, "user-1", 300);

        let claims = verifier.verify(&token).await.unwrap();

        assert_eq!(claims.subject(), Some("user-1"));
        assert_eq!(claims.get_claim("iss"), Some(&json!(ISSUER)));
        assert!(claims.expires_at().is_some());
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let server = MockServer::start().await;
        let verifier = verifier(&server).await;
        let token = testing::access_token(KEY_A, "user-1", -120);

        let err = verifier.verify(&token).await.unwrap_err();

        assert!(matches!(err, VerificationError::Expired));
        assert_eq!(err.reason(), "expired");
    }

    #[tokio::test]
    async fn recently_expired_token_is_within_leeway() {
        let server = MockServer::start().await;
        let verifier = verifier(&server).await;
        let token = testing::access_token(KEY_A, "user-1", -5);

        assert!(verifier.verify(&token).await.is_ok());

        let strict = verifier.with_leeway(Duration::ZERO);
        assert!(matches!(
            strict.verify(&token).await,
            Err(VerificationError::Expired)
        ));
    }

    #[test]
    fn leeway_is_clamped() {
        let resolver = Arc::new(JwksResolver::new(
            reqwest::Client::new(),
            "http://idp.invalid/jwks".parse().unwrap(),
        ));
        let verifier =
            JwtVerifier::new(resolver, ISSUER, ["c"]).with_leeway(Duration::from_secs(3600));
        assert_eq!(verifier.leeway(), MAX_LEEWAY);
    }

    #[tokio::test]
    async fn wrong_issuer_is_rejected() {
        let server = MockServer::start().await;
        let verifier = verifier(&server).await;
        let token = testing::sign(
            KEY_A,
            &json!({
                "sub": "user-1",
                "iss": "https://evil.example.com",
                "aud": testing::CLIENT_ID,
                "exp": testing::now() + 300,
            }),
        );

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerificationError::BadIssuer));
    }

    #[tokio::test]
    async fn audience_must_be_contained() {
        let server = MockServer::start().await;
        let verifier = verifier(&server).await;

        let shared = testing::sign(
            KEY_A,
            &json!({
                "sub": "user-1",
                "iss": ISSUER,
                "aud": ["other-frontend", testing::CLIENT_ID],
                "exp": testing::now() + 300,
            }),
        );
        assert!(verifier.verify(&shared).await.is_ok());

        let foreign = testing::sign(
            KEY_A,
            &json!({
                "sub": "user-1",
                "iss": ISSUER,
                "aud": ["other-frontend"],
                "exp": testing::now() + 300,
            }),
        );
        let err = verifier.verify(&foreign).await.unwrap_err();
        assert!(matches!(err, VerificationError::BadAudience));
    }

    #[tokio::test]
    async fn token_signed_by_unknown_key_is_bad_signature() {
        let server = MockServer::start().await;
        let verifier = verifier(&server).await;
        // key B is not published in the initial JWKS
        let token = testing::access_token(KEY_B, "user-1", 300);

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerificationError::BadSignature));
    }

    #[tokio::test]
    async fn forged_signature_is_bad_signature() {
        let server = MockServer::start().await;
        let verifier = verifier(&server).await;
        // signed with key B but claiming key A's kid
        let token = testing::sign_with_kid(
            KEY_B,
            testing::KID_A,
            &testing::claims("user-1", 300),
        );

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerificationError::BadSignature));
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let server = MockServer::start().await;
        let verifier = verifier(&server).await;

        let err = verifier.verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, VerificationError::Malformed(_)));
        assert_eq!(err.reason(), "malformed");
    }

    #[tokio::test]
    async fn jwks_outage_is_key_unavailable_after_one_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(testing::JWKS_PATH))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;
        let verifier = testing::verifier(&server);
        let token = testing::access_token(KEY_A, "user-1", 300);

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerificationError::KeyUnavailable(_)));
    }

    #[tokio::test]
    async fn jwks_blip_recovers_on_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(testing::JWKS_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        testing::mount_jwks(&server).await;
        let verifier = testing::verifier(&server);
        let token = testing::access_token(KEY_A, "user-1", 300);

        assert!(verifier.verify(&token).await.is_ok());
    }

    #[test]
    fn expires_within_threshold() {
        let now = OffsetDateTime::now_utc();
        let claims = VerifiedClaims {
            inner: json!({ "exp": (now + Duration::from_secs(120)).unix_timestamp() }),
        };
        assert!(!claims.expires_within(Duration::from_secs(60), now));
        assert!(claims.expires_within(Duration::from_secs(180), now));
    }
}
