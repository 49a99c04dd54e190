//! Per-request session check and refresh-token rotation.
//!
//! [`RefreshCoordinator::check`] decides, for one session, whether the
//! cached access token can be trusted, whether it must be refreshed, or
//! whether the session is dead:
//!
//! ```text
//!            ┌─ access token ──► verify ─┬─ ok ─────────────────────────► Valid
//!  start ────┤                           ├─ ok, expiring + refresh token ─┐
//!            │                           └─ rejected + refresh token ─────┤
//!            ├─ refresh token only ───────────────────────────────────────┤
//!            │                                                            ▼
//!            │                      single flight per session ◄── refresh grant
//!            │                                    ├─ ok ──► rotate, userinfo ──► Refreshed
//!            │                                    └─ error ──────────────────┐
//!            └─ nothing ─────────────────────────────────────────────────────┴► Unauthenticated
//! ```
//!
//! Unauthenticated sessions are deleted from the store so a dead refresh
//! token is never presented again. The exception is a JWKS outage: the
//! session is kept and the request is rejected until the keys are back.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::error::Error;
use crate::oauth::{AuthClient, UserInfo};
use crate::session::Session;
use crate::store::{StoreError, TokenStore};
use crate::token::{JwtVerifier, VerificationError, VerifiedClaims};
use crate::types::SessionId;

/// Default window before `exp` in which a still-valid token is refreshed.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(60);

/// When to refresh a token that still verifies.
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    /// Refresh pre-emptively when the access token expires within this
    /// window. Zero disables pre-emptive refresh.
    pub refresh_threshold: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
        }
    }
}

/// A session that passed [`RefreshCoordinator::check`].
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub session_id: SessionId,
    pub claims: VerifiedClaims,
    pub user_info: Option<UserInfo>,
}

/// Outcome of a session check.
#[derive(Debug)]
pub enum SessionCheck {
    /// The stored access token verified and is not about to expire.
    Valid(AuthenticatedSession),
    /// The session was refreshed (by this check or a concurrent one).
    Refreshed(AuthenticatedSession),
    /// The session is unusable. It has been removed from the store unless
    /// the reason [is transient](UnauthenticatedReason::is_transient).
    Unauthenticated(UnauthenticatedReason),
}

impl SessionCheck {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::Unauthenticated(_))
    }

    #[must_use]
    pub fn into_authenticated(self) -> Option<AuthenticatedSession> {
        match self {
            Self::Valid(session) | Self::Refreshed(session) => Some(session),
            Self::Unauthenticated(_) => None,
        }
    }
}

/// Why a session check failed. Only used for logging; clients see a
/// generic 401.
#[derive(Debug, thiserror::Error)]
pub enum UnauthenticatedReason {
    #[error("session not found")]
    SessionNotFound,
    #[error("session holds no tokens")]
    NoCredentials,
    #[error("access token rejected: {0}")]
    Verification(#[source] VerificationError),
    #[error("refresh exchange failed: {0}")]
    RefreshExchangeFailure(#[source] Error),
    #[error("userinfo unavailable after refresh: {0}")]
    UserInfoUnavailable(#[source] Error),
}

impl UnauthenticatedReason {
    /// `true` when the IdP's signing keys could not be fetched. The session
    /// is left in the store and may pass a later check.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Verification(VerificationError::KeyUnavailable(_))
        )
    }
}

/// Tokens a check saw before queueing for a refresh. If the stored pair
/// differs once the flight lock is held, another check already refreshed.
struct Observed {
    access_token: Option<String>,
    refresh_token: String,
}

impl Observed {
    fn is_current(&self, session: &Session) -> bool {
        session.refresh_token.as_deref() == Some(self.refresh_token.as_str())
            && session.access_token == self.access_token
    }
}

type Flight = Arc<tokio::sync::Mutex<()>>;

struct Inner<S> {
    store: Arc<S>,
    client: AuthClient,
    verifier: JwtVerifier,
    policy: RefreshPolicy,
    flights: Mutex<HashMap<SessionId, Flight>>,
}

/// Drives the session state machine and serializes refreshes per session.
pub struct RefreshCoordinator<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for RefreshCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: TokenStore> RefreshCoordinator<S> {
    #[must_use]
    pub fn new(
        store: Arc<S>,
        client: AuthClient,
        verifier: JwtVerifier,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                verifier,
                policy,
                flights: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    #[must_use]
    pub fn client(&self) -> &AuthClient {
        &self.inner.client
    }

    #[must_use]
    pub fn verifier(&self) -> &JwtVerifier {
        &self.inner.verifier
    }

    /// Number of sessions with a refresh queued or running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.flights.lock().len()
    }

    /// Authorize one request for session `id`.
    ///
    /// # Errors
    ///
    /// Only store failures are errors; every IdP or token failure ends in
    /// [`SessionCheck::Unauthenticated`].
    pub async fn check(&self, id: &SessionId) -> Result<SessionCheck, StoreError> {
        let Some(session) = self.inner.store.get(id).await? else {
            return Ok(SessionCheck::Unauthenticated(
                UnauthenticatedReason::SessionNotFound,
            ));
        };

        let rejection = match &session.access_token {
            Some(access_token) => match self.inner.verifier.verify(access_token).await {
                Ok(claims) => {
                    let expiring = claims.expires_within(
                        self.inner.policy.refresh_threshold,
                        OffsetDateTime::now_utc(),
                    );
                    if !expiring || session.refresh_token.is_none() {
                        self.inner.store.touch(id).await?;
                        return Ok(SessionCheck::Valid(AuthenticatedSession {
                            session_id: session.id,
                            claims,
                            user_info: session.user_info,
                        }));
                    }
                    tracing::debug!(
                        sub = claims.subject(),
                        "Access token near expiry, refreshing"
                    );
                    None
                }
                Err(e) => {
                    tracing::debug!(reason = e.reason(), "Access token rejected");
                    Some(e)
                }
            },
            None => None,
        };

        let Some(refresh_token) = session.refresh_token.clone() else {
            let reason = rejection.map_or(
                UnauthenticatedReason::NoCredentials,
                UnauthenticatedReason::Verification,
            );
            if !reason.is_transient() {
                self.inner.store.delete(id).await?;
            }
            return Ok(SessionCheck::Unauthenticated(reason));
        };

        let observed = Observed {
            access_token: session.access_token,
            refresh_token,
        };
        self.serialized(id, move |inner, id| async move {
            inner.refresh_locked(&id, observed).await
        })
        .await
    }

    /// Re-fetch the session's user info from the IdP and store it.
    ///
    /// Runs under the same per-session serialization as refresh so it never
    /// overwrites a concurrent rotation. If the IdP cannot be reached, the
    /// cached user info is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns the store's error if reading or writing the session fails.
    pub async fn reload_user_info(&self, id: &SessionId) -> Result<Option<UserInfo>, StoreError> {
        self.serialized(id, |inner, id| async move { inner.reload_user_info(&id).await })
            .await
    }

    /// Remove a session (logout).
    ///
    /// Waits for a refresh or user info reload already running for the
    /// session, so it cannot write the session back after the delete.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the delete fails.
    pub async fn terminate(&self, id: &SessionId) -> Result<(), StoreError> {
        self.serialized(id, |inner, id| async move { inner.store.delete(&id).await })
            .await
    }

    /// Run `op` while holding the flight lock for `id`.
    ///
    /// The operation runs on its own task: a caller that goes away while
    /// waiting does not abandon a rotation halfway through.
    async fn serialized<T, F, Fut>(&self, id: &SessionId, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Inner<S>>, SessionId) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let flight = self.inner.join_flight(id);
        let inner = Arc::clone(&self.inner);
        let id = id.clone();

        let task = tokio::spawn(async move {
            let guard = flight.lock().await;
            let result = op(Arc::clone(&inner), id.clone()).await;
            drop(guard);
            drop(flight);
            inner.leave_flight(&id);
            result
        });

        task.await.map_err(|e| Box::new(e) as StoreError)?
    }
}

impl<S: TokenStore> Inner<S> {
    fn join_flight(&self, id: &SessionId) -> Flight {
        Arc::clone(self.flights.lock().entry(id.clone()).or_default())
    }

    fn leave_flight(&self, id: &SessionId) {
        let mut flights = self.flights.lock();
        if flights.get(id).is_some_and(|f| Arc::strong_count(f) == 1) {
            flights.remove(id);
        }
    }

    /// Write `session` back unless it was deleted while the flight lock was
    /// held, which happens when a store is shared with code that deletes
    /// without going through the coordinator. Returns whether it was written.
    async fn write_back(&self, session: &Session) -> Result<bool, StoreError> {
        if self.store.get(&session.id).await?.is_none() {
            tracing::info!("Session ended while it was being updated, discarding changes");
            return Ok(false);
        }
        self.store.put(session.clone()).await?;
        Ok(true)
    }

    async fn refresh_locked(
        &self,
        id: &SessionId,
        observed: Observed,
    ) -> Result<SessionCheck, StoreError> {
        let Some(mut session) = self.store.get(id).await? else {
            // a concurrent refresh failed and removed it
            return Ok(SessionCheck::Unauthenticated(
                UnauthenticatedReason::SessionNotFound,
            ));
        };

        if !observed.is_current(&session) {
            if let Some(access_token) = &session.access_token {
                if let Ok(claims) = self.verifier.verify(access_token).await {
                    self.store.touch(id).await?;
                    return Ok(SessionCheck::Refreshed(AuthenticatedSession {
                        session_id: session.id,
                        claims,
                        user_info: session.user_info,
                    }));
                }
            }
        }

        let Some(refresh_token) = session.refresh_token.clone() else {
            self.store.delete(id).await?;
            return Ok(SessionCheck::Unauthenticated(
                UnauthenticatedReason::NoCredentials,
            ));
        };

        let tokens = match self.client.refresh(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    invalid_grant = e.is_invalid_grant(),
                    "Refresh exchange failed, ending session"
                );
                self.store.delete(id).await?;
                return Ok(SessionCheck::Unauthenticated(
                    UnauthenticatedReason::RefreshExchangeFailure(e),
                ));
            }
        };

        // Persist the rotated pair before anything else can fail; the old
        // refresh token is already spent at the IdP.
        session.rotate(tokens, None);
        if !self.write_back(&session).await? {
            return Ok(SessionCheck::Unauthenticated(
                UnauthenticatedReason::SessionNotFound,
            ));
        }

        let Some(access_token) = session.access_token.clone() else {
            self.store.delete(id).await?;
            return Ok(SessionCheck::Unauthenticated(
                UnauthenticatedReason::NoCredentials,
            ));
        };

        let claims = match self.verifier.verify(&access_token).await {
            Ok(claims) => claims,
            Err(e) => {
                let reason = UnauthenticatedReason::Verification(e);
                if reason.is_transient() {
                    // the rotated pair is stored; it verifies once keys are back
                    tracing::warn!(error = %reason, "Refreshed access token not verifiable yet");
                } else {
                    tracing::warn!(error = %reason, "Refreshed access token rejected");
                    self.store.delete(id).await?;
                }
                return Ok(SessionCheck::Unauthenticated(reason));
            }
        };

        let user_info = match self.client.get_user_info(&access_token).await {
            Ok(user_info) => user_info,
            Err(e) => {
                tracing::warn!(error = %e, "Userinfo fetch after refresh failed, ending session");
                self.store.delete(id).await?;
                return Ok(SessionCheck::Unauthenticated(
                    UnauthenticatedReason::UserInfoUnavailable(e),
                ));
            }
        };

        session.user_info = Some(user_info.clone());
        if !self.write_back(&session).await? {
            return Ok(SessionCheck::Unauthenticated(
                UnauthenticatedReason::SessionNotFound,
            ));
        }

        tracing::info!(sub = claims.subject(), "Session refreshed");
        Ok(SessionCheck::Refreshed(AuthenticatedSession {
            session_id: session.id,
            claims,
            user_info: Some(user_info),
        }))
    }

    async fn reload_user_info(&self, id: &SessionId) -> Result<Option<UserInfo>, StoreError> {
        let Some(mut session) = self.store.get(id).await? else {
            return Ok(None);
        };
        let Some(access_token) = session.access_token.as_deref() else {
            return Ok(session.user_info);
        };

        match self.client.get_user_info(access_token).await {
            Ok(user_info) => {
                session.user_info = Some(user_info.clone());
                if !self.write_back(&session).await? {
                    return Ok(None);
                }
                Ok(Some(user_info))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Userinfo reload failed, serving cached profile");
                Ok(session.user_info)
            }
        }
    }
}
