//! Axum server setup and router construction.

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post, put};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::StubState;
use crate::api;

/// Build the full axum router.
///
/// The recording routes are mounted under `/api` and, when `proxy` is set,
/// again under `/api-proxy`.
pub fn build_router(state: StubState, proxy: bool) -> Router {
    let routes = Router::new()
        .route("/ping", get(api::ping))
        .route("/auth", get(api::auth))
        .route("/preflight", post(api::preflight))
        .route("/runs", post(api::create_run))
        .route("/runs/{run_id}/instances", post(api::create_instance))
        .route("/instances/{instance_id}/tests", post(api::instance_tests))
        .route("/instances/{instance_id}/stdout", put(api::instance_stdout))
        .route("/instances/{instance_id}/results", post(api::instance_results))
        .route("/exceptions", post(api::exceptions))
        .route("/logout", post(api::logout))
        .with_state(state.clone());

    let mut router = Router::new()
        .route("/_stub/requests", get(api::recorded_requests))
        .with_state(state)
        .nest("/api", routes.clone());
    if proxy {
        router = router.nest("/api-proxy", routes);
    }
    router.layer(TraceLayer::new_for_http())
}

pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Serve `router` on `listener` in a background task.
pub fn serve(listener: TcpListener, router: Router) {
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "stub server stopped");
        }
    });
}
