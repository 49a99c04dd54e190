use std::net::SocketAddr;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::response::Redirect;
use axum::routing::get;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bff_session::middleware::{SessionAuth, SessionAuthConfig, require_session};
use bff_session::{AuthenticatedSession, MemoryTokenStore};

/// How often idle sessions are swept from memory.
const PURGE_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SessionAuthConfig::from_env()?;
    let frontend_url = std::env::var("FRONTEND_URL")?;
    let store = MemoryTokenStore::new(config.idle_ttl());
    let auth = SessionAuth::new(config, store);
    tracing::info!("Configuration loaded");

    let api = Router::new()
        .route("/api/protected-data", get(protected_data))
        .route_layer(from_fn_with_state(
            auth.clone(),
            require_session::<MemoryTokenStore>,
        ));

    let app = Router::new()
        .merge(auth.routes())
        .merge(api)
        .fallback(move || async move { Redirect::to(&frontend_url) });

    let purge_store = auth.store().clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(PURGE_INTERVAL).await;
            let purged = purge_store.purge_expired();
            if purged > 0 {
                tracing::info!(purged, remaining = purge_store.len(), "Purged idle sessions");
            }
        }
    });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(4001);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn protected_data(session: AuthenticatedSession) -> Json<serde_json::Value> {
    tracing::debug!(sub = session.claims.subject(), "Serving protected data");
    Json(json!({
        "message": "This is protected data that only authenticated users can access."
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
