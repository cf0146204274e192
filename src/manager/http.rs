// ABOUTME: Shared HTTP server hosting adapter webhooks, adapter health paths, and the global health mux.
// ABOUTME: One axum Router per process; adapters contribute routes through capability discovery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::adapter::ChannelAdapter;

/// Read/write budget per request.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Graceful-shutdown budget used by `stop_all`.
pub const HTTP_SHUTDOWN: Duration = Duration::from_secs(5);

/// Build the shared router: the caller's health mux plus every webhook and
/// health path discovered on the started adapters.
pub(crate) fn build_router(
    health_router: Option<Router>,
    adapters: &HashMap<String, Arc<dyn ChannelAdapter>>,
) -> Router {
    let mut router = health_router.unwrap_or_default();

    for (name, adapter) in adapters {
        if let Some(webhook) = adapter.webhook() {
            let path = webhook.webhook_path();
            if !path.is_empty() {
                tracing::info!(channel = %name, path = %path, "mounting adapter webhook");
                let owner = Arc::clone(adapter);
                router = router.route(
                    &path,
                    any(move |request: Request| {
                        let owner = Arc::clone(&owner);
                        async move {
                            match owner.webhook() {
                                Some(handler) => handler.handle_webhook(request).await,
                                None => StatusCode::NOT_FOUND.into_response(),
                            }
                        }
                    }),
                );
            }
        }

        if let Some(health) = adapter.health() {
            let path = health.health_path();
            if !path.is_empty() {
                tracing::info!(channel = %name, path = %path, "mounting adapter health check");
                let owner = Arc::clone(adapter);
                router = router.route(
                    &path,
                    any(move |request: Request| {
                        let owner = Arc::clone(&owner);
                        async move {
                            match owner.health() {
                                Some(handler) => handler.handle_health(request).await,
                                None => StatusCode::NOT_FOUND.into_response(),
                            }
                        }
                    }),
                );
            }
        }
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(HTTP_TIMEOUT))
}

/// Bind and serve until `cancel` fires.
pub(crate) async fn start_server(
    addr: &str,
    router: Router,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind shared HTTP server on {}", addr))?;
    tracing::info!(addr = %addr, "shared HTTP server listening");

    let handle = tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "shared HTTP server failed");
        }
    });
    Ok(handle)
}
