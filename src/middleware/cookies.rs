use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use super::config::AuthSettings;
use crate::pkce::PendingAuthorization;
use crate::types::SessionId;

/// Lifetime of a pending authorization; a login must finish within it.
const PENDING_TTL: Duration = Duration::minutes(10);

/// Create the pending-authorization cookie (`state` + PKCE verifier).
pub(super) fn pending_cookie(
    settings: &AuthSettings,
    pending: &PendingAuthorization,
) -> Cookie<'static> {
    Cookie::build((settings.pending_cookie_name.clone(), pending.encode()))
        .http_only(true)
        .secure(settings.secure_cookies)
        .same_site(SameSite::Lax)
        .path(settings.auth_path.clone())
        .max_age(PENDING_TTL)
        .build()
}

/// Create removal cookie for the pending authorization.
pub(super) fn clear_pending_cookie(settings: &AuthSettings) -> Cookie<'static> {
    Cookie::build((settings.pending_cookie_name.clone(), ""))
        .path(settings.auth_path.clone())
        .build()
}

/// Create session cookie. Only the opaque session ID goes to the browser.
pub(super) fn session_cookie(settings: &AuthSettings, session_id: &SessionId) -> Cookie<'static> {
    let max_age = Duration::try_from(settings.idle_ttl).unwrap_or(Duration::MAX);
    Cookie::build((settings.session_cookie_name.clone(), session_id.to_string()))
        .http_only(true)
        .secure(settings.secure_cookies)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age)
        .build()
}

/// Create removal cookie for session.
pub(super) fn clear_session_cookie(settings: &AuthSettings) -> Cookie<'static> {
    Cookie::build((settings.session_cookie_name.clone(), ""))
        .path("/")
        .build()
}

/// Get the pending authorization from cookies.
pub(super) fn get_pending(
    jar: &PrivateCookieJar,
    settings: &AuthSettings,
) -> Option<PendingAuthorization> {
    jar.get(&settings.pending_cookie_name)
        .and_then(|c| PendingAuthorization::decode(c.value()))
}

/// Get the session ID from cookies.
pub(super) fn get_session_id(jar: &PrivateCookieJar, settings: &AuthSettings) -> Option<SessionId> {
    jar.get(&settings.session_cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .map(SessionId::from)
}
