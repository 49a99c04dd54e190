use axum::Json;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::PrivateCookieJar;
use serde::Deserialize;

use super::cookies;
use super::error::AuthError;
use super::state::SessionAuth;
use super::types::{CheckSessionResponse, UserInfoResponse};
use crate::pkce::PendingAuthorization;
use crate::refresh::{AuthenticatedSession, SessionCheck};
use crate::session::Session;
use crate::store::TokenStore;
use crate::types::SessionId;

// ── Check session ──────────────────────────────────────────────────

/// Reports whether the browser has a live session. When it does not, a
/// fresh pending authorization is stored so `/login` can redirect at once.
pub(super) async fn checksession<S: TokenStore>(
    State(auth): State<SessionAuth<S>>,
    jar: PrivateCookieJar,
) -> Response {
    let mut jar = jar;

    if let Some(session_id) = cookies::get_session_id(&jar, &auth.settings) {
        match auth.coordinator.check(&session_id).await {
            Ok(SessionCheck::Valid(session) | SessionCheck::Refreshed(session)) => {
                let body = CheckSessionResponse {
                    logged_in: true,
                    user: session.user_info,
                };
                return (jar, Json(body)).into_response();
            }
            Ok(SessionCheck::Unauthenticated(reason)) => {
                tracing::debug!(reason = %reason, "Session check failed");
                if !reason.is_transient() {
                    jar = jar.remove(cookies::clear_session_cookie(&auth.settings));
                }
            }
            Err(e) => return AuthError::from(e).into_response(),
        }
    }

    let pending = PendingAuthorization::generate();
    let jar = jar.add(cookies::pending_cookie(&auth.settings, &pending));
    let body = CheckSessionResponse {
        logged_in: false,
        user: None,
    };
    (jar, Json(body)).into_response()
}

// ── Login ──────────────────────────────────────────────────────────

pub(super) async fn login<S: TokenStore>(
    State(auth): State<SessionAuth<S>>,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, Redirect) {
    let (jar, pending) = match cookies::get_pending(&jar, &auth.settings) {
        Some(pending) => (jar, pending),
        None => {
            let pending = PendingAuthorization::generate();
            let jar = jar.add(cookies::pending_cookie(&auth.settings, &pending));
            (jar, pending)
        }
    };

    let url = auth.coordinator.client().authorization_url(&pending);
    (jar, Redirect::to(url.as_str()))
}

// ── Callback ───────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub(super) async fn callback<S: TokenStore>(
    State(auth): State<SessionAuth<S>>,
    jar: PrivateCookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    // The pending authorization is single-use whatever happens next.
    let pending = cookies::get_pending(&jar, &auth.settings);
    let previous = cookies::get_session_id(&jar, &auth.settings);
    let jar = jar.remove(cookies::clear_pending_cookie(&auth.settings));
    let home = Redirect::to(auth.settings.frontend_url.as_str());

    match complete_login(&auth, pending, params).await {
        Ok(session) => {
            if let Some(previous) = previous {
                if let Err(e) = auth.coordinator.terminate(&previous).await {
                    tracing::warn!(error = %e, "Previous session deletion failed during login");
                }
            }
            let jar = jar.add(cookies::session_cookie(&auth.settings, &session.id));
            (jar, home).into_response()
        }
        Err(e) if e.is_login_failure() => {
            tracing::warn!(error = %e, "Login failed");
            (jar, home).into_response()
        }
        Err(e) => (jar, e).into_response(),
    }
}

async fn complete_login<S: TokenStore>(
    auth: &SessionAuth<S>,
    pending: Option<PendingAuthorization>,
    params: CallbackParams,
) -> Result<Session, AuthError> {
    if let Some(error) = &params.error {
        let desc = params.error_description.as_deref().unwrap_or("Unknown error");
        tracing::warn!(error = %error, description = %desc, "OAuth2 error from IdP");
        return Err(AuthError::CodeExchangeFailure(error.clone()));
    }

    let pending = pending.ok_or(AuthError::CsrfStateMismatch)?;
    let received_state = params.state.ok_or(AuthError::CsrfStateMismatch)?;
    if !pending.matches_state(&received_state) {
        return Err(AuthError::CsrfStateMismatch);
    }

    let code = params
        .code
        .ok_or_else(|| AuthError::CodeExchangeFailure("missing code".into()))?;

    let client = auth.coordinator.client();
    let tokens = client.exchange_code(&code, pending.code_verifier()).await?;

    let claims = auth
        .coordinator
        .verifier()
        .verify(&tokens.access_token)
        .await
        .map_err(|e| AuthError::CodeExchangeFailure(format!("access token rejected: {e}")))?;

    let user_info = client.get_user_info(&tokens.access_token).await?;

    let session = Session::new(SessionId::generate(), tokens, Some(user_info));
    auth.coordinator.store().put(session.clone()).await?;

    tracing::info!(sub = claims.subject(), "OAuth2 login successful");
    Ok(session)
}

// ── Logout ─────────────────────────────────────────────────────────

pub(super) async fn logout<S: TokenStore>(
    State(auth): State<SessionAuth<S>>,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, Redirect) {
    if let Some(session_id) = cookies::get_session_id(&jar, &auth.settings) {
        match auth.coordinator.terminate(&session_id).await {
            Ok(()) => tracing::info!("Session ended by logout"),
            Err(e) => tracing::warn!(error = %e, "Session deletion failed during logout"),
        }
    }

    let jar = jar.remove(cookies::clear_session_cookie(&auth.settings));
    let url = auth.coordinator.client().logout_url();
    (jar, Redirect::to(url.as_str()))
}

pub(super) async fn logout_callback<S: TokenStore>(
    State(auth): State<SessionAuth<S>>,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, Redirect) {
    let jar = jar
        .remove(cookies::clear_session_cookie(&auth.settings))
        .remove(cookies::clear_pending_cookie(&auth.settings));
    (jar, Redirect::to(auth.settings.frontend_url.as_str()))
}

// ── User info ──────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct UserInfoParams {
    #[serde(default)]
    refresh: bool,
}

pub(super) async fn userinfo<S: TokenStore>(
    State(auth): State<SessionAuth<S>>,
    session: AuthenticatedSession,
    Query(params): Query<UserInfoParams>,
) -> Result<Json<UserInfoResponse>, AuthError> {
    let user_info = if params.refresh {
        auth.coordinator
            .reload_user_info(&session.session_id)
            .await?
    } else {
        session.user_info
    };
    Ok(Json(UserInfoResponse { user_info }))
}
