//! Basic counters exposed in the Prometheus text format.
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use axum::{Router, extract::State, http::header, response::IntoResponse, routing::get};
use snafu::{ResultExt, Snafu};
use tokio::net::TcpListener;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to bind metrics listener to {socket_addr}"))]
    BindListener {
        source: std::io::Error,
        socket_addr: SocketAddr,
    },

    #[snafu(display("failed to serve metrics endpoint"))]
    Serve { source: std::io::Error },
}

#[derive(Debug, Default)]
pub struct Metrics {
    reconciliations: AtomicU64,
    conversions: AtomicU64,
}

impl Metrics {
    pub fn inc_reconciliations(&self) {
        self.reconciliations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_conversions(&self) {
        self.conversions.fetch_add(1, Ordering::Relaxed);
    }

    /// Renders all counters in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        format!(
            "# HELP conversion_demo_reconciliations_total Total number of CronJob reconcile runs.\n\
             # TYPE conversion_demo_reconciliations_total counter\n\
             conversion_demo_reconciliations_total {reconciliations}\n\
             # HELP conversion_demo_conversions_total Total number of handled conversion reviews.\n\
             # TYPE conversion_demo_conversions_total counter\n\
             conversion_demo_conversions_total {conversions}\n",
            reconciliations = self.reconciliations.load(Ordering::Relaxed),
            conversions = self.conversions.load(Ordering::Relaxed),
        )
    }
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

/// Serves the metrics endpoint on `socket_addr` until the process terminates.
pub async fn run(socket_addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), Error> {
    let listener = TcpListener::bind(socket_addr)
        .await
        .context(BindListenerSnafu { socket_addr })?;

    tracing::info!(%socket_addr, "serving metrics");
    axum::serve(listener, router(metrics)).await.context(ServeSnafu)
}
