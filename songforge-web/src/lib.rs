//! Web front end for SongForge: a single page that turns lyrics and a
//! genre into a MusicGen clip.

pub mod error;
pub mod handlers;
pub mod page;
pub mod state;

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;

use songforge_core::{AppConfig, Error, Result};

pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/generate", post(handlers::generate))
        .route("/audio/:name", get(handlers::audio))
        .route("/api/status", get(handlers::status))
        .route("/api/info", get(handlers::info))
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// Build the application from `config` and serve it until the process ends.
pub async fn serve(config: AppConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| Error::Config(format!("invalid host/port: {e}")))?;

    let state = tokio::task::spawn_blocking(move || AppState::from_config(&config))
        .await
        .map_err(|e| Error::Inference(format!("startup task failed: {e}")))??;
    tracing::info!(
        model = %state.model_label,
        output = %state.store.dir().display(),
        "state ready"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
