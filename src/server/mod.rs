pub mod handlers;
pub mod routes;
mod state;

pub use state::AppState;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::common::{AppConfig, StorageBackend};
use crate::index::SessionIndex;
use crate::inference::HttpInference;
use crate::session::{spawn_sweeper, SessionController};
use crate::store::{FsBlobStore, ResultStore, StagingStore};

/// Wire stores, inference client and index into a controller
pub async fn build_controller(config: &AppConfig) -> Result<SessionController> {
    let (staging, results) = match config.storage.backend {
        StorageBackend::Memory => (StagingStore::in_memory(), ResultStore::in_memory()),
        StorageBackend::Filesystem => {
            let staging = FsBlobStore::open(&config.storage.staging_dir)
                .await
                .context("open staging store")?;
            let results = FsBlobStore::open(&config.storage.results_dir)
                .await
                .context("open result store")?;
            (
                StagingStore::new(Arc::new(staging)),
                ResultStore::new(Arc::new(results)),
            )
        }
    };

    if config.inference.account_id.is_empty() {
        tracing::warn!("inference.account_id is not set; generation requests will fail");
    }
    let inference = HttpInference::new(&config.inference).context("build inference client")?;

    Ok(SessionController::new(
        staging,
        results,
        SessionIndex::new(),
        Arc::new(inference),
        config.session.clone(),
    ))
}

/// Serve until ctrl-c
pub async fn run(config: AppConfig) -> Result<()> {
    let controller = Arc::new(build_controller(&config).await?);

    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(
        controller.clone(),
        config.session.sweep_interval(),
        cancel.clone(),
    );

    let state = AppState::new(controller, config.max_upload_bytes);
    let app = routes::create_router(&state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        backend = ?config.storage.backend,
        expiry_secs = config.session.expiry_secs,
        "artdrop listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("shutting down");
        })
        .await
        .context("server error")?;

    cancel.cancel();
    let _ = sweeper.await;
    Ok(())
}
