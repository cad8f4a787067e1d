//! Health and readiness probe endpoints.
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use axum::{Router, extract::State, http::StatusCode, routing::get};
use snafu::{ResultExt, Snafu};
use tokio::net::TcpListener;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to bind probe listener to {socket_addr}"))]
    BindListener {
        source: std::io::Error,
        socket_addr: SocketAddr,
    },

    #[snafu(display("failed to serve probe endpoints"))]
    Serve { source: std::io::Error },
}

/// Shared probe state.
///
/// Liveness is unconditional, readiness is flipped on exactly once after the
/// startup sequence (including webhook certificate provisioning) completed.
#[derive(Debug, Default)]
pub struct Health {
    ready: AtomicBool,
}

impl Health {
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

pub fn router(health: Arc<Health>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .with_state(health)
}

async fn readyz(State(health): State<Arc<Health>>) -> (StatusCode, &'static str) {
    if health.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Serves the probe endpoints on `socket_addr` until the process terminates.
pub async fn run(socket_addr: SocketAddr, health: Arc<Health>) -> Result<(), Error> {
    let listener = TcpListener::bind(socket_addr)
        .await
        .context(BindListenerSnafu { socket_addr })?;

    tracing::info!(%socket_addr, "serving health probes");
    axum::serve(listener, router(health)).await.context(ServeSnafu)
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;

    fn probe_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn healthz_always_reports_ok() {
        let app = router(Arc::new(Health::default()));

        let response = app.oneshot(probe_request("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_reports_unavailable_until_startup_completed() {
        let health = Arc::new(Health::default());
        let app = router(health.clone());

        let response = app.clone().oneshot(probe_request("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        health.set_ready();

        let response = app.oneshot(probe_request("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
