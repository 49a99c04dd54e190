use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::pkce::PendingAuthorization;

/// Default timeout applied to every call to the identity provider.
pub const DEFAULT_IDP_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity provider `OAuth2` configuration.
///
/// Endpoints are derived from the IdP base URL using the standard paths
/// (`/oauth2/authorize`, `/oauth2/token`, `/oauth2/userinfo`,
/// `/oauth2/logout`, `/.well-known/jwks.json`) and can be overridden.
///
/// ```rust,ignore
/// use bff_session::OAuthConfig;
///
/// let config = OAuthConfig::new(
///     "client-id",
///     "client-secret",
///     "https://idp.example.com".parse()?,
///     "https://app.example.com/auth/callback".parse()?,
/// )?
/// .with_issuer("https://idp.example.com/tenant");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OAuthConfig {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) issuer: String,
    pub(crate) auth_url: Url,
    pub(crate) token_url: Url,
    pub(crate) userinfo_url: Url,
    pub(crate) logout_url: Url,
    pub(crate) jwks_url: Url,
    pub(crate) redirect_uri: Url,
    pub(crate) post_logout_redirect_uri: Option<Url>,
    pub(crate) scopes: Vec<String>,
    pub(crate) timeout: Duration,
}

impl OAuthConfig {
    /// Create a configuration for the IdP hosted at `idp_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `idp_url` cannot be used as a base URL.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        idp_url: Url,
        redirect_uri: Url,
    ) -> Result<Self, Error> {
        if idp_url.cannot_be_a_base() {
            return Err(Error::Config(format!("IdP URL is not a base URL: {idp_url}")));
        }
        let issuer = idp_url.as_str().trim_end_matches('/').to_string();

        Ok(Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: endpoint(&idp_url, "oauth2/authorize")?,
            token_url: endpoint(&idp_url, "oauth2/token")?,
            userinfo_url: endpoint(&idp_url, "oauth2/userinfo")?,
            logout_url: endpoint(&idp_url, "oauth2/logout")?,
            jwks_url: endpoint(&idp_url, ".well-known/jwks.json")?,
            issuer,
            redirect_uri,
            post_logout_redirect_uri: None,
            scopes: ["offline_access", "openid", "profile", "email"]
                .into_iter()
                .map(String::from)
                .collect(),
            timeout: DEFAULT_IDP_TIMEOUT,
        })
    }

    /// Override the expected token issuer (default: the IdP base URL).
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_auth_url(mut self, url: Url) -> Self {
        self.auth_url = url;
        self
    }

    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    #[must_use]
    pub fn with_userinfo_url(mut self, url: Url) -> Self {
        self.userinfo_url = url;
        self
    }

    #[must_use]
    pub fn with_logout_url(mut self, url: Url) -> Self {
        self.logout_url = url;
        self
    }

    #[must_use]
    pub fn with_jwks_url(mut self, url: Url) -> Self {
        self.jwks_url = url;
        self
    }

    /// Where the IdP sends the browser after logout.
    #[must_use]
    pub fn with_post_logout_redirect_uri(mut self, url: Url) -> Self {
        self.post_logout_redirect_uri = Some(url);
        self
    }

    /// Override the `OAuth2` scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Timeout for each IdP request (token, userinfo, JWKS).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn jwks_url(&self) -> &Url {
        &self.jwks_url
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// HTTP client with the configured per-request timeout.
    pub(crate) fn http_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout.min(Duration::from_secs(5)))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            })
    }
}

fn endpoint(base: &Url, path: &str) -> Result<Url, Error> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path)
        .map_err(|e| Error::Config(format!("invalid endpoint {path}: {e}")))
}

/// `OAuth2` client for the identity provider's hosted endpoints.
#[derive(Clone)]
pub struct AuthClient {
    config: OAuthConfig,
    http: reqwest::Client,
}

/// Token response from the IdP token endpoint.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Profile claims from the IdP userinfo endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct UserInfo {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Any other claims the IdP returns.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserInfo {
    /// Create a new `UserInfo` with only the required `sub` field.
    #[must_use]
    pub fn new(sub: impl Into<String>) -> Self {
        Self {
            sub: sub.into(),
            email: None,
            email_verified: None,
            name: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl AuthClient {
    /// Create a new client; the HTTP client carries the configured timeout.
    #[must_use]
    pub fn new(config: OAuthConfig) -> Self {
        let http = config.http_client();
        Self { config, http }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Authorization endpoint URL for a pending authorization.
    #[must_use]
    pub fn authorization_url(&self, pending: &PendingAuthorization) -> Url {
        let scope = self.config.scopes.join(" ");

        let mut url = self.config.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("state", pending.state())
            .append_pair("code_challenge", pending.code_challenge())
            .append_pair("code_challenge_method", "S256")
            .append_pair("scope", &scope);
        url
    }

    /// IdP logout endpoint URL.
    #[must_use]
    pub fn logout_url(&self) -> Url {
        let mut url = self.config.logout_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            if let Some(redirect) = &self.config.post_logout_redirect_uri {
                query.append_pair("redirect_uri", redirect.as_str());
            }
        }
        url
    }

    /// Exchange an authorization code for tokens using PKCE.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure or timeout, or
    /// [`Error::OAuth`] if the token endpoint rejects the code.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, Error> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code_verifier", code_verifier),
        ];

        let response = self
            .http
            .post(self.config.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let response = Self::ensure_success(response, "token exchange").await?;
        response.json::<TokenResponse>().await.map_err(Into::into)
    }

    /// Exchange a refresh token for a new token set.
    ///
    /// The refresh token is single-use on rotating IdPs: after this call
    /// returns (successfully or not) it must not be presented again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure or timeout, or
    /// [`Error::OAuth`] if the IdP rejects the grant (`invalid_grant`).
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, Error> {
        let scope = self.config.scopes.join(" ");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let response = self
            .http
            .post(self.config.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let response = Self::ensure_success(response, "refresh").await?;
        response.json::<TokenResponse>().await.map_err(Into::into)
    }

    /// Fetch user info using an access token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::OAuth`] if the userinfo endpoint returns an error.
    pub async fn get_user_info(&self, access_token: &str) -> Result<UserInfo, Error> {
        let response = self
            .http
            .get(self.config.userinfo_url.clone())
            .bearer_auth(access_token)
            .send()
            .await?;

        let response = Self::ensure_success(response, "userinfo request").await?;
        response.json::<UserInfo>().await.map_err(Into::into)
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::OAuth {
            operation,
            status: Some(status),
            detail: body,
        })
    }
}
