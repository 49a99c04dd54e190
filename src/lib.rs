#![doc = include_str!("../README.md")]

pub mod error;
pub mod jwks;
pub mod oauth;
pub mod pkce;
pub mod refresh;
pub mod session;
pub mod store;
pub mod token;
pub mod types;

#[cfg(feature = "middleware")]
pub mod middleware;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use error::Error;
pub use jwks::{JwksResolver, KeyResolutionError};
pub use oauth::{AuthClient, OAuthConfig, TokenResponse, UserInfo};
pub use pkce::{
    PendingAuthorization, generate_code_challenge, generate_code_verifier, generate_state,
};
pub use refresh::{
    AuthenticatedSession, RefreshCoordinator, RefreshPolicy, SessionCheck, UnauthenticatedReason,
};
pub use session::Session;
pub use store::{MemoryTokenStore, StoreError, TokenStore};
pub use token::{JwtVerifier, VerificationError, VerifiedClaims};
pub use types::SessionId;
