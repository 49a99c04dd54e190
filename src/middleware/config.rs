use std::time::Duration;

use axum_extra::extract::cookie::Key;
use url::Url;

use super::error::AuthError;
use crate::jwks::DEFAULT_JWKS_TTL;
use crate::oauth::OAuthConfig;
use crate::refresh::DEFAULT_REFRESH_THRESHOLD;
use crate::store::DEFAULT_IDLE_TTL;
use crate::token::DEFAULT_LEEWAY;

/// Shared auth settings used by both config and runtime state.
#[derive(Clone)]
pub(crate) struct AuthSettings {
    pub(crate) cookie_key: Key,
    pub(crate) session_cookie_name: String,
    pub(crate) pending_cookie_name: String,
    pub(crate) idle_ttl: Duration,
    pub(crate) secure_cookies: bool,
    pub(crate) auth_path: String,
    pub(crate) frontend_url: Url,
    pub(crate) audiences: Vec<String>,
    pub(crate) leeway: Duration,
    pub(crate) refresh_threshold: Duration,
    pub(crate) jwks_ttl: Duration,
}

impl AuthSettings {
    fn defaults(frontend_url: Url) -> Self {
        Self {
            cookie_key: Key::generate(),
            session_cookie_name: "s".into(),
            pending_cookie_name: "p".into(),
            idle_ttl: DEFAULT_IDLE_TTL,
            secure_cookies: true,
            auth_path: "/auth".into(),
            frontend_url,
            audiences: Vec::new(),
            leeway: DEFAULT_LEEWAY,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            jwks_ttl: DEFAULT_JWKS_TTL,
        }
    }
}

/// Session authentication configuration.
///
/// Required fields (IdP settings, frontend URL) are constructor parameters.
///
/// Use [`from_env()`](SessionAuthConfig::from_env) for convention-based setup,
/// or [`new()`](SessionAuthConfig::new) with `with_*` methods for full control.
pub struct SessionAuthConfig {
    pub(super) oauth: OAuthConfig,
    pub(super) settings: AuthSettings,
}

impl SessionAuthConfig {
    /// Create config for the given IdP; the browser is sent to
    /// `frontend_url` after login and logout.
    #[must_use]
    pub fn new(oauth: OAuthConfig, frontend_url: Url) -> Self {
        Self {
            oauth,
            settings: AuthSettings::defaults(frontend_url),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `CLIENT_ID`, `CLIENT_SECRET`: OAuth2 client credentials
    /// - `IDP_URL`: IdP base URL; endpoints are derived from it
    /// - `FRONTEND_URL`: where the browser lands after login/logout
    /// - `BACKEND_URL`: public URL of this backend; the callback is
    ///   `{BACKEND_URL}/auth/callback`
    ///
    /// # Optional env vars
    /// - `IDP_ISSUER`: expected `iss` if it differs from `IDP_URL`
    /// - `SCOPES`: space- or comma-separated OAuth2 scopes
    /// - `COOKIE_KEY`: cookie encryption key bytes (at least 64)
    /// - `APP_ENV`: `production` enables `Secure` cookies
    /// - `SESSION_IDLE_TTL_SECS`, `REFRESH_THRESHOLD_SECS`, `JWT_LEEWAY_SECS`,
    ///   `IDP_TIMEOUT_SECS`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if required env vars are missing or values are invalid.
    pub fn from_env() -> Result<Self, AuthError> {
        let client_id = required("CLIENT_ID")?;
        let client_secret = required("CLIENT_SECRET")?;
        let idp_url = required_url("IDP_URL")?;
        let frontend_url = required_url("FRONTEND_URL")?;
        let backend_url = required_url("BACKEND_URL")?;

        let config = Self::new(
            OAuthConfig::new(
                client_id,
                client_secret,
                idp_url,
                backend_url.clone(),
            )
            .map_err(|e| AuthError::Config(e.to_string()))?,
            frontend_url,
        );
        let mut config = config.with_backend_url(&backend_url)?;

        if let Ok(issuer) = std::env::var("IDP_ISSUER") {
            config.oauth = config.oauth.with_issuer(issuer);
        }
        if let Ok(scopes) = std::env::var("SCOPES") {
            config.oauth = config.oauth.with_scopes(
                scopes
                    .split([',', ' '])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            );
        }
        if let Some(secs) = optional_secs("IDP_TIMEOUT_SECS")? {
            config.oauth = config.oauth.with_timeout(secs);
        }

        let production = std::env::var("APP_ENV").is_ok_and(|v| v == "production");

        let cookie_key = match std::env::var("COOKIE_KEY") {
            Ok(k) => Key::try_from(k.as_bytes()).map_err(|_| {
                AuthError::Config(
                    "COOKIE_KEY is set but invalid (must be at least 64 bytes). \
                     Remove the env var to use an ephemeral key, or provide a valid key."
                        .into(),
                )
            })?,
            Err(_) => {
                tracing::warn!("COOKIE_KEY not set, sessions will not survive a restart");
                Key::generate()
            }
        };

        let mut config = config
            .with_cookie_key(cookie_key)
            .with_secure_cookies(production);
        if let Some(ttl) = optional_secs("SESSION_IDLE_TTL_SECS")? {
            config = config.with_idle_ttl(ttl);
        }
        if let Some(threshold) = optional_secs("REFRESH_THRESHOLD_SECS")? {
            config = config.with_refresh_threshold(threshold);
        }
        if let Some(leeway) = optional_secs("JWT_LEEWAY_SECS")? {
            config = config.with_leeway(leeway);
        }
        Ok(config)
    }

    /// Derive the callback and post-logout URIs from this backend's public
    /// URL and the current auth path.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the URL cannot be joined.
    pub fn with_backend_url(mut self, backend_url: &Url) -> Result<Self, AuthError> {
        let auth_path = self.settings.auth_path.trim_matches('/');
        let join = |path: &str| {
            backend_url
                .join(&format!("/{auth_path}/{path}"))
                .map_err(|e| AuthError::Config(format!("BACKEND_URL: {e}")))
        };
        self.oauth.redirect_uri = join("callback")?;
        self.oauth = self
            .oauth
            .with_post_logout_redirect_uri(join("logout/callback")?);
        Ok(self)
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.settings.cookie_key = key;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.settings.session_cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_pending_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.settings.pending_cookie_name = name.into();
        self
    }

    /// Idle timeout for sessions and the session cookie's `Max-Age`.
    #[must_use]
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.settings.idle_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.settings.auth_path = path.into();
        self
    }

    /// Accepted `aud` values (default: the client ID).
    #[must_use]
    pub fn with_audiences(mut self, audiences: Vec<String>) -> Self {
        self.settings.audiences = audiences;
        self
    }

    /// Clock skew tolerated when checking `exp`, clamped to 60 seconds.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.settings.leeway = leeway;
        self
    }

    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.settings.refresh_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_jwks_ttl(mut self, ttl: Duration) -> Self {
        self.settings.jwks_ttl = ttl;
        self
    }

    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        self.settings.idle_ttl
    }

    #[must_use]
    pub fn oauth(&self) -> &OAuthConfig {
        &self.oauth
    }
}

fn required(name: &str) -> Result<String, AuthError> {
    std::env::var(name).map_err(|_| AuthError::Config(format!("{name} is required")))
}

fn required_url(name: &str) -> Result<Url, AuthError> {
    required(name)?
        .parse()
        .map_err(|e| AuthError::Config(format!("{name}: {e}")))
}

fn optional_secs(name: &str) -> Result<Option<Duration>, AuthError> {
    std::env::var(name)
        .ok()
        .map(|v| {
            v.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| AuthError::Config(format!("{name}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionAuthConfig {
        let oauth = OAuthConfig::new(
            "client",
            "secret",
            "https://idp.example.com".parse().unwrap(),
            "http://placeholder.invalid/".parse().unwrap(),
        )
        .unwrap();
        SessionAuthConfig::new(oauth, "https://app.example.com".parse().unwrap())
    }

    #[test]
    fn defaults() {
        let config = config();
        assert_eq!(config.idle_ttl(), Duration::from_secs(12 * 60 * 60));
        assert_eq!(config.settings.session_cookie_name, "s");
        assert_eq!(config.settings.pending_cookie_name, "p");
        assert_eq!(config.settings.auth_path, "/auth");
        assert!(config.settings.secure_cookies);
    }

    #[test]
    fn backend_url_derives_callbacks() {
        let config = config()
            .with_backend_url(&"https://api.example.com".parse().unwrap())
            .unwrap();
        assert_eq!(
            config.oauth().redirect_uri().as_str(),
            "https://api.example.com/auth/callback"
        );
        assert_eq!(
            config
                .oauth
                .post_logout_redirect_uri
                .as_ref()
                .map(Url::as_str),
            Some("https://api.example.com/auth/logout/callback")
        );
    }

    #[test]
    fn backend_url_follows_auth_path() {
        let config = config()
            .with_auth_path("/api/auth")
            .with_backend_url(&"https://api.example.com".parse().unwrap())
            .unwrap();
        assert_eq!(
            config.oauth().redirect_uri().as_str(),
            "https://api.example.com/api/auth/callback"
        );
    }
}
