use std::sync::Arc;

use axum::Router;
use axum::extract::FromRef;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum_extra::extract::cookie::Key;

use super::config::{AuthSettings, SessionAuthConfig};
use super::extractor::require_session;
use super::routes;
use crate::jwks::JwksResolver;
use crate::oauth::AuthClient;
use crate::refresh::{RefreshCoordinator, RefreshPolicy};
use crate::store::TokenStore;
use crate::token::JwtVerifier;

/// Session authentication for an axum application.
///
/// Owns the IdP client, the JWKS cache and the refresh coordinator for one
/// [`TokenStore`]. Cheap to clone; clones share all state.
///
/// ```rust,ignore
/// let auth = SessionAuth::new(config, MemoryTokenStore::new(idle_ttl));
///
/// let app = Router::new()
///     .route("/api/protected-data", get(protected))
///     .route_layer(middleware::from_fn_with_state(auth.clone(), require_session))
///     .merge(auth.routes());
/// ```
pub struct SessionAuth<S> {
    pub(super) coordinator: RefreshCoordinator<S>,
    pub(super) settings: Arc<AuthSettings>,
}

// Manual Clone: avoid derive adding an `S: Clone` bound.
impl<S> Clone for SessionAuth<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            settings: Arc::clone(&self.settings),
        }
    }
}

// PrivateCookieJar requires Key to be extractable from state
impl<S> FromRef<SessionAuth<S>> for Key {
    fn from_ref(state: &SessionAuth<S>) -> Self {
        state.settings.cookie_key.clone()
    }
}

impl<S: TokenStore> SessionAuth<S> {
    #[must_use]
    pub fn new(config: SessionAuthConfig, store: S) -> Self {
        Self::with_store(config, Arc::new(store))
    }

    /// Like [`new`](Self::new) for a store that is shared elsewhere.
    #[must_use]
    pub fn with_store(config: SessionAuthConfig, store: Arc<S>) -> Self {
        let SessionAuthConfig { oauth, settings } = config;

        let client = AuthClient::new(oauth);
        let keys = JwksResolver::new(client.http().clone(), client.config().jwks_url().clone())
            .with_ttl(settings.jwks_ttl);

        let audiences = if settings.audiences.is_empty() {
            vec![client.config().client_id().to_string()]
        } else {
            settings.audiences.clone()
        };
        let verifier = JwtVerifier::new(Arc::new(keys), client.config().issuer(), audiences)
            .with_leeway(settings.leeway);

        let policy = RefreshPolicy {
            refresh_threshold: settings.refresh_threshold,
        };

        Self {
            coordinator: RefreshCoordinator::new(store, client, verifier, policy),
            settings: Arc::new(settings),
        }
    }

    #[must_use]
    pub fn coordinator(&self) -> &RefreshCoordinator<S> {
        &self.coordinator
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        self.coordinator.store()
    }

    /// The auth routes under the configured auth path (default `/auth`):
    ///
    /// - `GET checksession`, `GET login`, `GET callback`
    /// - `GET logout`, `GET logout/callback`
    /// - `GET userinfo` (requires a session, `?refresh=true` re-fetches)
    pub fn routes(&self) -> Router {
        let auth_path = self.settings.auth_path.trim_end_matches('/');

        let protected = Router::new()
            .route(&format!("{auth_path}/userinfo"), get(routes::userinfo::<S>))
            .route_layer(from_fn_with_state(self.clone(), require_session::<S>));

        Router::new()
            .route(
                &format!("{auth_path}/checksession"),
                get(routes::checksession::<S>),
            )
            .route(&format!("{auth_path}/login"), get(routes::login::<S>))
            .route(&format!("{auth_path}/callback"), get(routes::callback::<S>))
            .route(
                &format!("{auth_path}/logout"),
                get(routes::logout::<S>).post(routes::logout::<S>),
            )
            .route(
                &format!("{auth_path}/logout/callback"),
                get(routes::logout_callback::<S>),
            )
            .merge(protected)
            .with_state(self.clone())
    }
}
