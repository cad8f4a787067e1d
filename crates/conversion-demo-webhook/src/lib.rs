//! Utility types and functions to easily create ready-to-use webhook servers
//! which can handle different tasks, for example CRD conversions. All webhook
//! servers use HTTPS and provision their own TLS certificates. This library
//! is fully compatible with the [`tracing`] crate and emits debug level
//! tracing data.
//!
//! Most users will only use the top-level exported generic [`WebhookServer`]
//! which enables complete control over the [`Router`] which handles
//! registering routes and their handler functions.
//!
//! For some usages, complete end-to-end [`WebhookServer`] implementations
//! exist. One such implementation is the [`ConversionWebhookServer`][1].
//!
//! [1]: crate::servers::ConversionWebhookServer
use axum::{Router, routing::get};
use futures_util::{FutureExt as _, pin_mut, select};
use snafu::{ResultExt, Snafu};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::mpsc,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::tls::{TlsServer, WebhookCertificate};

pub mod constants;
pub mod maintainer;
pub mod options;
pub mod servers;
pub mod tls;

// Selected re-exports
pub use crate::options::Options;

/// A generic webhook handler receiving a request and sending back a response.
///
/// This trait is not intended to be implemented by external crates and this
/// library provides various ready-to-use implementations for it. One such an
/// implementation is part of the [`ConversionWebhookServer`][1].
///
/// [1]: crate::servers::ConversionWebhookServer
pub trait WebhookHandler<Req, Res> {
    fn call(self, req: Req) -> Res;
}

/// A result type alias with the [`WebhookError`] type as the default error type.
pub type Result<T, E = WebhookError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum WebhookError {
    #[snafu(display("failed to create TLS server"))]
    CreateTlsServer { source: tls::TlsServerError },

    #[snafu(display("failed to run TLS server"))]
    RunTlsServer { source: tls::TlsServerError },
}

/// A ready-to-use webhook server.
///
/// This server abstracts away lower-level details like TLS termination
/// and certificate provisioning. The routes and their handlers are completely
/// customizable by bringing your own Axum [`Router`].
///
/// For complete end-to-end implementations, see [`ConversionWebhookServer`][1].
///
/// [1]: crate::servers::ConversionWebhookServer
pub struct WebhookServer {
    tls_server: TlsServer,
}

impl WebhookServer {
    /// Creates a new ready-to-use webhook server.
    ///
    /// The server listens on `options.socket_addr` and handles routing based
    /// on the provided Axum `router`. Most of the time it is sufficient to
    /// use [`Options::default()`].
    ///
    /// Creating the server also provisions the first TLS certificate, which
    /// is handed out through the returned channel. Only after that succeeded
    /// can the server be started with [`WebhookServer::run()`].
    pub async fn new(
        router: Router,
        options: Options,
    ) -> Result<(Self, mpsc::Receiver<WebhookCertificate>)> {
        tracing::trace!("create new webhook server");

        // Use a service builder to provide multiple layers at once. Recommended
        // by the Axum project.
        //
        // See https://docs.rs/axum/latest/axum/middleware/index.html#applying-multiple-middleware
        let service_builder = ServiceBuilder::new().layer(TraceLayer::new_for_http());

        // Create the root router and merge the provided router into it.
        tracing::debug!("create core router and merge provided router");
        let router = router
            .layer(service_builder)
            // The health route is below the TraceLayer so as not to be instrumented
            .route("/health", get(|| async { "ok" }));

        tracing::debug!("create TLS server");
        let (tls_server, certificate_rx) = TlsServer::new(
            options.socket_addr,
            router,
            options.subject_alternative_dns_names,
        )
        .await
        .context(CreateTlsServerSnafu)?;

        Ok((Self { tls_server }, certificate_rx))
    }

    /// Runs the webhook server and sets up signal handlers for shutting down.
    ///
    /// This does not implement graceful shutdown of the underlying server.
    pub async fn run(self) -> Result<()> {
        let future_server = self.run_server();
        let future_signal = async {
            let mut sigint = signal(SignalKind::interrupt()).expect("create SIGINT listener");
            let mut sigterm = signal(SignalKind::terminate()).expect("create SIGTERM listener");

            tracing::debug!("created unix signal handlers");

            select! {
                signal = sigint.recv().fuse() => {
                    if signal.is_some() {
                        tracing::debug!("received SIGINT");
                    }
                },
                signal = sigterm.recv().fuse() => {
                    if signal.is_some() {
                        tracing::debug!("received SIGTERM");
                    }
                },
            };
        };

        // select requires Future + Unpin
        pin_mut!(future_server);
        pin_mut!(future_signal);

        futures_util::future::select(future_server, future_signal).await;

        Ok(())
    }

    /// Runs the webhook server by creating a TCP listener and binding it to
    /// the specified socket address.
    async fn run_server(self) -> Result<()> {
        tracing::debug!("run webhook server");

        self.tls_server.run().await.context(RunTlsServerSnafu)
    }
}
