use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::oauth::{TokenResponse, UserInfo};
use crate::types::SessionId;

/// One browser's authenticated relationship with the backend.
///
/// Holds at most one refresh token: [`rotate`](Self::rotate) overwrites
/// it, it is never appended to.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_info: Option<UserInfo>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_accessed_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub access_token_expires_at: Option<OffsetDateTime>,
}

impl Session {
    /// New session from a successful code exchange.
    #[must_use]
    pub fn new(id: SessionId, tokens: TokenResponse, user_info: Option<UserInfo>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            access_token_expires_at: expires_at(&tokens, now),
            access_token: Some(tokens.access_token),
            refresh_token: tokens.refresh_token,
            user_info,
            created_at: now,
            last_accessed_at: now,
        }
    }

    /// Apply a refresh-grant response.
    ///
    /// The access token is always replaced. The refresh token is replaced
    /// when the IdP issued a new one; an IdP that does not rotate omits it
    /// and the current value stays valid.
    pub fn rotate(&mut self, tokens: TokenResponse, user_info: Option<UserInfo>) {
        let now = OffsetDateTime::now_utc();
        self.access_token_expires_at = expires_at(&tokens, now);
        self.access_token = Some(tokens.access_token);
        if let Some(refresh_token) = tokens.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        if user_info.is_some() {
            self.user_info = user_info;
        }
        self.last_accessed_at = now;
    }

    /// `true` if the session has not been used for longer than `idle_ttl`.
    #[must_use]
    pub fn is_idle(&self, idle_ttl: Duration, now: OffsetDateTime) -> bool {
        let idle_ttl = time::Duration::try_from(idle_ttl).unwrap_or(time::Duration::MAX);
        now - self.last_accessed_at > idle_ttl
    }
}

fn expires_at(tokens: &TokenResponse, now: OffsetDateTime) -> Option<OffsetDateTime> {
    tokens
        .expires_in
        .map(|secs| now + Duration::from_secs(secs))
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("sub", &self.user_info.as_ref().map(|u| u.sub.as_str()))
            .field("last_accessed_at", &self.last_accessed_at)
            .field("access_token_expires_at", &self.access_token_expires_at)
            .finish_non_exhaustive()
    }
}
