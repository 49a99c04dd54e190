#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, header};
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::get;
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, Key};
use http_body_util::BodyExt;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bff_session::middleware::{SessionAuth, SessionAuthConfig, require_session};
use bff_session::{
    AuthenticatedSession, MemoryTokenStore, OAuthConfig, Session, SessionId, TokenResponse,
    TokenStore, UserInfo,
};

pub const ISSUER: &str = "https://idp.example.com";
pub const CLIENT_ID: &str = "test-client";
pub const FRONTEND_URL: &str = "https://app.example.com/";
pub const BACKEND_URL: &str = "https://api.example.com";
pub const JWKS_PATH: &str = "/.well-known/jwks.json";
pub const TOKEN_PATH: &str = "/oauth2/token";
pub const USERINFO_PATH: &str = "/oauth2/userinfo";

const KEY_PEM: &str = include_str!("../fixtures/idp_rsa_a.pem");
const KID: &str = "test-key-a";
const JWKS: &str = include_str!("../fixtures/jwks.json");

pub fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// RS256 access token for `sub`, expiring `expires_in` seconds from now.
pub fn access_token(sub: &str, expires_in: i64) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.to_string());
    let claims = json!({
        "sub": sub,
        "iss": ISSUER,
        "aud": CLIENT_ID,
        "iat": now(),
        "exp": now() + expires_in,
        // keeps tokens minted in the same second distinct
        "jti": SessionId::generate().to_string(),
    });
    let key = EncodingKey::from_rsa_pem(KEY_PEM.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, &claims, &key).unwrap()
}

pub async fn mount_jwks(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(JWKS, "application/json"))
        .mount(server)
        .await;
}

pub fn token_response(access_token: &str, refresh_token: Option<&str>) -> ResponseTemplate {
    let mut body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3600,
    });
    if let Some(refresh_token) = refresh_token {
        body["refresh_token"] = json!(refresh_token);
    }
    ResponseTemplate::new(200).set_body_json(body)
}

pub fn userinfo_response(sub: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "sub": sub,
        "email": format!("{sub}@example.com"),
        "name": "Test User",
    }))
}

pub fn invalid_grant() -> ResponseTemplate {
    ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" }))
}

/// A backend wired to a fake IdP, with direct access to its store.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryTokenStore>,
    pub key: Key,
}

impl TestApp {
    pub fn new(server: &MockServer) -> Self {
        let oauth = OAuthConfig::new(
            CLIENT_ID,
            "test-secret",
            server.uri().parse().unwrap(),
            BACKEND_URL.parse().unwrap(),
        )
        .unwrap()
        .with_issuer(ISSUER);
        let key = Key::generate();
        let config = SessionAuthConfig::new(oauth, FRONTEND_URL.parse().unwrap())
            .with_backend_url(&BACKEND_URL.parse().unwrap())
            .unwrap()
            .with_cookie_key(key.clone())
            .with_secure_cookies(false);

        let store = Arc::new(MemoryTokenStore::new(config.idle_ttl()));
        let auth = SessionAuth::with_store(config, Arc::clone(&store));

        let api = Router::new()
            .route("/api/protected-data", get(protected_data))
            .route_layer(from_fn_with_state(
                auth.clone(),
                require_session::<MemoryTokenStore>,
            ));

        Self {
            router: Router::new().merge(auth.routes()).merge(api),
            store,
            key,
        }
    }

    pub async fn get(&self, uri: &str, cookies: &[String]) -> Response<Body> {
        use tower::ServiceExt;

        let mut request = Request::builder().uri(uri);
        if !cookies.is_empty() {
            request = request.header(header::COOKIE, cookies.join("; "));
        }
        self.router
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    /// Store a session and return the encrypted cookie the browser would send.
    pub async fn seed_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> (SessionId, String) {
        let tokens: TokenResponse = serde_json::from_value(json!({
            "access_token": access_token,
            "refresh_token": refresh_token,
            "expires_in": 300,
        }))
        .unwrap();
        let session = Session::new(SessionId::generate(), tokens, Some(UserInfo::new("user-1")));
        let id = session.id.clone();
        self.store.put(session).await.unwrap();
        (id.clone(), self.encrypted_cookie("s", id.as_str()))
    }

    /// `name=<ciphertext>` as produced by the backend's cookie key.
    pub fn encrypted_cookie(&self, name: &str, value: &str) -> String {
        let jar = PrivateCookieJar::new(self.key.clone())
            .add(Cookie::new(name.to_string(), value.to_string()));
        let response = jar.into_response();
        set_cookies(response.headers())
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(n, v)| format!("{n}={v}"))
            .unwrap()
    }

    /// Decrypt a cookie value set by the backend.
    pub fn decrypt(&self, name: &str, value: &str) -> Option<String> {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, format!("{name}={value}").parse().unwrap());
        PrivateCookieJar::from_headers(&headers, self.key.clone())
            .get(name)
            .map(|c| c.value().to_string())
    }
}

async fn protected_data(session: AuthenticatedSession) -> axum::Json<Value> {
    axum::Json(json!({
        "message": "This is protected data that only authenticated users can access.",
        "sub": session.claims.subject(),
    }))
}

/// `(name, value)` of every `Set-Cookie` header.
pub fn set_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| Cookie::parse(v.to_string()).ok())
        .map(|c| (c.name().to_string(), c.value().to_string()))
        .collect()
}

/// Value of the named `Set-Cookie`, if the response set one.
pub fn set_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    set_cookies(headers)
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v)
}

pub fn location(headers: &HeaderMap) -> String {
    headers
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
