use std::convert::Infallible;

use axum::extract::{FromRequestParts, OptionalFromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::PrivateCookieJar;

use super::cookies;
use super::error::AuthError;
use super::state::SessionAuth;
use crate::refresh::{AuthenticatedSession, SessionCheck};
use crate::store::TokenStore;

/// Middleware gating routes on a live session.
///
/// Reads the session cookie, runs the session check (refreshing if
/// needed) and attaches the [`AuthenticatedSession`] to the request.
/// Missing or dead sessions get `401 {"status":401,"message":"Unauthorized"}`;
/// a dead session's cookie is cleared. During a JWKS outage the request is
/// rejected but the cookie is kept.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/api/protected-data", get(handler))
///     .route_layer(middleware::from_fn_with_state(auth.clone(), require_session));
/// ```
pub async fn require_session<S: TokenStore>(
    State(auth): State<SessionAuth<S>>,
    jar: PrivateCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(session_id) = cookies::get_session_id(&jar, &auth.settings) else {
        return AuthError::Unauthenticated.into_response();
    };

    match auth.coordinator.check(&session_id).await {
        Ok(SessionCheck::Valid(session) | SessionCheck::Refreshed(session)) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Ok(SessionCheck::Unauthenticated(reason)) => {
            tracing::debug!(reason = %reason, "Rejecting request");
            if reason.is_transient() {
                return AuthError::Unauthenticated.into_response();
            }
            let jar = jar.remove(cookies::clear_session_cookie(&auth.settings));
            (jar, AuthError::Unauthenticated).into_response()
        }
        Err(e) => AuthError::from(e).into_response(),
    }
}

/// The session attached by [`require_session`].
///
/// Use as an Axum extractor in handlers behind the middleware. Returns
/// `401 Unauthorized` if the route is not gated.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected(session: AuthenticatedSession) -> impl IntoResponse {
///     format!("Hello, {}", session.claims.subject().unwrap_or("anonymous"))
/// }
///
/// // Optional: accessible to both authenticated and anonymous users
/// async fn public(session: Option<AuthenticatedSession>) -> impl IntoResponse {
///     match session {
///         Some(s) => format!("Hello, {:?}", s.claims.subject()),
///         None => "Hello, guest".to_string(),
///     }
/// }
/// ```
impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedSession {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedSession>()
            .cloned()
            .ok_or(AuthError::Unauthenticated)
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for AuthenticatedSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<AuthenticatedSession>().cloned())
    }
}
