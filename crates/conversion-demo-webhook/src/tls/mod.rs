//! This module contains structs and functions to easily create a TLS termination
//! server, which can be used in combination with an Axum [`Router`].
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{Router, extract::Request};
use futures_util::pin_mut;
use hyper::{body::Incoming, service::service_fn};
use hyper_util::rt::{TokioExecutor, TokioIo};
use snafu::{ResultExt, Snafu};
use tokio::{net::TcpListener, sync::mpsc, time::interval};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        crypto::ring::default_provider,
        version::{TLS12, TLS13},
    },
};
use tower::{Service, ServiceExt};
use x509_cert::Certificate;

use crate::tls::cert_resolver::{CertificateResolver, CertificateResolverError};

mod cert_resolver;
pub mod certs;

/// How long the in-process CA certificate is valid. It must outlive the leaf
/// certificates it signs.
pub const WEBHOOK_CA_LIFETIME: Duration = Duration::from_secs(2 * 60 * 60);

/// How long a single serving certificate is valid.
pub const WEBHOOK_CERTIFICATE_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// How often the serving certificate is replaced with a fresh one.
pub const WEBHOOK_CERTIFICATE_ROTATION_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub type Result<T, E = TlsServerError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum TlsServerError {
    #[snafu(display("failed to create certificate resolver"))]
    CreateCertificateResolver { source: CertificateResolverError },

    #[snafu(display("failed to create TCP listener by binding to socket address {socket_addr:?}"))]
    BindTcpListener {
        source: std::io::Error,
        socket_addr: SocketAddr,
    },

    #[snafu(display("failed to rotate certificate"))]
    RotateCertificate { source: CertificateResolverError },

    #[snafu(display("failed to set safe TLS protocol versions"))]
    SetSafeTlsProtocolVersions { source: tokio_rustls::rustls::Error },
}

/// The certificate material published for every generated serving certificate.
///
/// Consumers like the CRD maintainer use this to reconcile objects which
/// embed the certificate, eg. the CRD conversion caBundle and the TLS secret.
#[derive(Clone, Debug)]
pub struct WebhookCertificate {
    /// The CA certificate clients need to trust when calling the webhook.
    pub ca_certificate: Certificate,

    /// The PEM-encoded serving certificate.
    pub certificate_pem: String,

    /// The PEM-encoded PKCS8 private key belonging to the serving certificate.
    pub private_key_pem: String,
}

/// A server which terminates TLS connections and allows clients to communicate
/// via HTTPS with the underlying HTTP router.
pub struct TlsServer {
    config: ServerConfig,
    cert_resolver: Arc<CertificateResolver>,

    socket_addr: SocketAddr,
    router: Router,
}

impl TlsServer {
    /// Creates a new TLS server.
    ///
    /// The returned [`mpsc::Receiver`] is guaranteed to already contain the
    /// first [`WebhookCertificate`], because the certificate resolver
    /// generates it before its constructor returns. Provisioning therefore
    /// always completes before the server can accept a single connection.
    pub async fn new(
        socket_addr: SocketAddr,
        router: Router,
        subject_alternative_dns_names: Vec<String>,
    ) -> Result<(Self, mpsc::Receiver<WebhookCertificate>)> {
        let (certificate_tx, certificate_rx) = mpsc::channel(1);
        let cert_resolver = Arc::new(
            CertificateResolver::new(subject_alternative_dns_names, certificate_tx)
                .await
                .context(CreateCertificateResolverSnafu)?,
        );

        let tls_provider = default_provider();
        let mut config = ServerConfig::builder_with_provider(tls_provider.into())
            .with_protocol_versions(&[&TLS12, &TLS13])
            .context(SetSafeTlsProtocolVersionsSnafu)?
            .with_no_client_auth()
            .with_cert_resolver(cert_resolver.clone());
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        Ok((
            Self {
                config,
                cert_resolver,
                socket_addr,
                router,
            },
            certificate_rx,
        ))
    }

    /// Runs the TLS server by listening for incoming TCP connections on the
    /// bound socket address. It only accepts TLS connections. Internally each
    /// TLS stream gets handled by a Hyper service, which in turn is an Axum
    /// router.
    pub async fn run(self) -> Result<()> {
        tokio::spawn(async { Self::run_certificate_rotation_loop(self.cert_resolver).await });

        let tls_acceptor = TlsAcceptor::from(Arc::new(self.config));
        let tcp_listener =
            TcpListener::bind(self.socket_addr)
                .await
                .context(BindTcpListenerSnafu {
                    socket_addr: self.socket_addr,
                })?;

        // To be able to extract the connect info from incoming requests, it is
        // required to turn the router into a Tower service which is capable of
        // doing that. Calling `into_make_service_with_connect_info` returns a
        // new struct `IntoMakeServiceWithConnectInfo` which implements the
        // Tower Service trait. This service is called after the TCP connection
        // has been accepted.
        let mut router = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        pin_mut!(tcp_listener);
        loop {
            let tls_acceptor = tls_acceptor.clone();

            // Wait for a new tcp connection
            let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
                Ok((stream, addr)) => (stream, addr),
                Err(err) => {
                    tracing::trace!(%err, "failed to accept incoming TCP connection");
                    continue;
                }
            };

            // Here, the connect info is extracted by calling Tower's Service
            // trait function on `IntoMakeServiceWithConnectInfo`. The call is
            // infallible.
            let tower_service = match router.call(remote_addr).await {
                Ok(service) => service,
                Err(err) => match err {},
            };

            tokio::spawn(async move {
                // Wait for the tls handshake to happen
                let tls_stream = match tls_acceptor.accept(tcp_stream).await {
                    Ok(tls_stream) => tls_stream,
                    Err(err) => {
                        tracing::trace!(%err, %remote_addr, "error during tls handshake");
                        return;
                    }
                };

                // Hyper has its own `AsyncRead` and `AsyncWrite` traits and doesn't use tokio.
                // `TokioIo` converts between them.
                let tls_stream = TokioIo::new(tls_stream);

                // Hyper also has its own `Service` trait and doesn't use tower. We can use
                // `hyper::service::service_fn` to create a hyper `Service` that calls our app
                // through `tower::Service::call`.
                let hyper_service = service_fn(move |request: Request<Incoming>| {
                    // We need to clone here, because oneshot consumes self
                    tower_service.clone().oneshot(request)
                });

                hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection_with_upgrades(tls_stream, hyper_service)
                    .await
                    .unwrap_or_else(|err| {
                        tracing::warn!(%err, %remote_addr, "failed to serve connection");
                    })
            });
        }
    }

    async fn run_certificate_rotation_loop(cert_resolver: Arc<CertificateResolver>) -> Result<()> {
        let mut interval = interval(WEBHOOK_CERTIFICATE_ROTATION_INTERVAL);
        // Let the interval tick once, so that the first loop iteration does not start immediately,
        // thus generating a new cert.
        interval.tick().await;

        loop {
            interval.tick().await;

            cert_resolver
                .rotate_certificate()
                .await
                .context(RotateCertificateSnafu)?;
        }
    }
}
