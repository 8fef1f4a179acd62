// HTTP front end and lifecycle. On shutdown the ordering matters: stop
// accepting, delete the cached-content handles, then give in-flight
// connections a short deadline to drain.

use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::constants::{LISTEN_ADDR, SHUTDOWN_DEADLINE};
use crate::error::RelayResult;
use crate::proxy::handlers;
use crate::proxy::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/*path", post(handlers::handle_relay))
        .with_state(state)
}

pub async fn run(state: AppState) -> RelayResult<()> {
    let listener = TcpListener::bind(LISTEN_ADDR).await?;
    info!(
        "Relaying the {} API on http://{}",
        state.config.upstream.label(),
        LISTEN_ADDR
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = result {
            error!("HTTP server error: {}", e);
        }
    });

    shutdown_signal().await;
    info!("Shutdown signal received, closing down");

    // Stop accepting before deleting handles so no request re-creates one.
    let _ = shutdown_tx.send(());
    if state.config.cache_mode {
        state.context_cache.cleanup(&state.upstream).await;
    }

    if tokio::time::timeout(SHUTDOWN_DEADLINE, server).await.is_err() {
        warn!(
            "HTTP server did not drain within {}s, exiting anyway",
            SHUTDOWN_DEADLINE.as_secs()
        );
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
