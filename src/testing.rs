//! Shared fixtures for unit tests: a fake IdP on `wiremock` and JWTs
//! signed with the fixture RSA keys.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::jwks::JwksResolver;
use crate::oauth::{AuthClient, OAuthConfig};
use crate::token::JwtVerifier;

pub const ISSUER: &str = "https://idp.example.com";
pub const CLIENT_ID: &str = "test-client";
pub const JWKS_PATH: &str = "/.well-known/jwks.json";
pub const TOKEN_PATH: &str = "/oauth2/token";
pub const USERINFO_PATH: &str = "/oauth2/userinfo";

pub const KID_A: &str = "test-key-a";
pub const KID_B: &str = "test-key-b";

#[derive(Clone, Copy)]
pub struct TestKey {
    pem: &'static str,
    kid: &'static str,
}

pub const KEY_A: TestKey = TestKey {
    pem: include_str!("../tests/fixtures/idp_rsa_a.pem"),
    kid: KID_A,
};

pub const KEY_B: TestKey = TestKey {
    pem: include_str!("../tests/fixtures/idp_rsa_b.pem"),
    kid: KID_B,
};

const JWKS: &str = include_str!("../tests/fixtures/jwks.json");

pub fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

pub fn claims(sub: &str, expires_in: i64) -> Value {
    json!({
        "sub": sub,
        "iss": ISSUER,
        "aud": CLIENT_ID,
        "iat": now(),
        "exp": now() + expires_in,
    })
}

pub fn sign_with_kid(key: TestKey, kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(key.pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

pub fn sign(key: TestKey, claims: &Value) -> String {
    sign_with_kid(key, key.kid, claims)
}

/// Access token for `sub` expiring `expires_in` seconds from now
/// (negative for an already expired token).
pub fn access_token(key: TestKey, sub: &str, expires_in: i64) -> String {
    sign(key, &claims(sub, expires_in))
}

pub async fn mount_jwks(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(JWKS, "application/json"))
        .mount(server)
        .await;
}

pub fn oauth_config(server: &MockServer) -> OAuthConfig {
    OAuthConfig::new(
        CLIENT_ID,
        "test-secret",
        server.uri().parse().unwrap(),
        "https://app.example.com/auth/callback".parse().unwrap(),
    )
    .unwrap()
    .with_issuer(ISSUER)
}

pub fn client(server: &MockServer) -> AuthClient {
    AuthClient::new(oauth_config(server))
}

pub fn verifier(server: &MockServer) -> JwtVerifier {
    let jwks_url = format!("{}{JWKS_PATH}", server.uri()).parse().unwrap();
    let resolver = Arc::new(JwksResolver::new(reqwest::Client::new(), jwks_url));
    JwtVerifier::new(resolver, ISSUER, [CLIENT_ID])
}

/// Token endpoint response carrying a fresh token pair.
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
    ResponseTemplate::new(400).set_body_json(json!({
        "error": "invalid_grant",
        "error_description": "refresh token revoked",
    }))
}
