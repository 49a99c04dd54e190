/// Failures talking to the identity provider.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The IdP answered with a non-success status.
    #[error("{operation} failed (status {status:?}): {detail}")]
    OAuth {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// `true` when the IdP rejected a grant (`invalid_grant`), e.g. a reused
    /// or revoked refresh token.
    #[must_use]
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, Self::OAuth { detail, .. } if detail.contains("invalid_grant"))
    }

    /// `true` for network-level failures, including timeouts.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}
