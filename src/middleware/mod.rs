//! Session authentication middleware for Axum.
//!
//! Mounts the browser-facing auth routes and gates API routes on a live
//! server-side session. Only an opaque session ID ever reaches the browser,
//! in an encrypted `HttpOnly` cookie.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bff_session::middleware::{SessionAuth, SessionAuthConfig, require_session};
//! use bff_session::MemoryTokenStore;
//!
//! // 1. Configure from environment
//! let config = SessionAuthConfig::from_env()?;
//! let store = MemoryTokenStore::new(config.idle_ttl());
//!
//! // 2. Build the auth state
//! let auth = SessionAuth::new(config, store);
//!
//! // 3. Gate API routes and mount the auth routes
//! let app = axum::Router::new()
//!     .route("/api/protected-data", get(protected))
//!     .route_layer(axum::middleware::from_fn_with_state(auth.clone(), require_session))
//!     .merge(auth.routes());
//! ```

mod config;
mod cookies;
mod error;
mod extractor;
mod routes;
mod state;
mod types;

pub use config::SessionAuthConfig;
pub use error::AuthError;
pub use extractor::require_session;
pub use state::SessionAuth;
pub use types::{CheckSessionResponse, ErrorBody, UserInfoResponse};

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
