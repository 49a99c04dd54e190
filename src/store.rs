use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::session::Session;
use crate::types::SessionId;

/// Error surfaced by a [`TokenStore`] backend.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Default idle timeout after which a session is evicted (12 hours).
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Server-side session persistence keyed by [`SessionId`].
///
/// Each call must be atomic per key. Token rotation (read, refresh,
/// write back) is serialized per session by the
/// [`RefreshCoordinator`](crate::refresh::RefreshCoordinator), so a backend
/// only has to make individual operations atomic.
///
/// # Example
///
/// ```rust,ignore
/// impl TokenStore for RedisStore {
///     async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
///         let raw: Option<String> = self.conn().get(id.as_str()).await?;
///         Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
///     }
///     // ...
/// }
/// ```
pub trait TokenStore: Send + Sync + 'static {
    /// Look up a live session. Idle-expired sessions are reported as `None`.
    fn get(
        &self,
        id: &SessionId,
    ) -> impl Future<Output = Result<Option<Session>, StoreError>> + Send;

    /// Insert or overwrite the session stored under `session.id`.
    fn put(&self, session: Session) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove a session. Removing a missing session is not an error.
    fn delete(&self, id: &SessionId) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Mark the session as used now, extending its idle lifetime.
    fn touch(&self, id: &SessionId) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// In-process [`TokenStore`].
///
/// Expiry is passive: an idle session is dropped when it is next read.
/// Call [`purge_expired`](Self::purge_expired) periodically to reclaim
/// sessions that are never read again.
#[derive(Debug)]
pub struct MemoryTokenStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
    idle_ttl: Duration,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_ttl,
        }
    }

    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    /// Drop every idle session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_idle(self.idle_ttl, now));
        before - sessions.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TTL)
    }
}

impl TokenStore for MemoryTokenStore {
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let mut sessions = self.sessions.lock();
        let expired = sessions
            .get(id)
            .is_some_and(|s| s.is_idle(self.idle_ttl, OffsetDateTime::now_utc()));
        if expired {
            sessions.remove(id);
            return Ok(None);
        }
        Ok(sessions.get(id).cloned())
    }

    async fn put(&self, session: Session) -> Result<(), StoreError> {
        self.sessions.lock().insert(session.id.clone(), session);
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.sessions.lock().remove(id);
        Ok(())
    }

    async fn touch(&self, id: &SessionId) -> Result<(), StoreError> {
        if let Some(session) = self.sessions.lock().get_mut(id) {
            session.last_accessed_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }
}
