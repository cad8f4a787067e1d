use std::sync::Arc;

use arc_swap::ArcSwap;
use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;
use tokio_rustls::rustls::{
    crypto::ring::default_provider, server::ResolvesServerCert, sign::CertifiedKey,
};

use super::{
    WEBHOOK_CA_LIFETIME, WEBHOOK_CERTIFICATE_LIFETIME, WebhookCertificate,
    certs::{self, CertificateAuthority},
};

type Result<T, E = CertificateResolverError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum CertificateResolverError {
    #[snafu(display("failed to send certificate to channel"))]
    SendCertificateToChannel,

    #[snafu(display("failed to generate new certificate"))]
    GenerateNewCertificate {
        #[snafu(source(from(CertificateResolverError, Box::new)))]
        source: Box<CertificateResolverError>,
    },

    #[snafu(display("failed to create CA to generate and sign webhook leaf certificate"))]
    CreateCertificateAuthority { source: certs::Error },

    #[snafu(display("failed to generate webhook leaf certificate"))]
    GenerateLeafCertificate { source: certs::Error },

    #[snafu(display("failed to encode leaf certificate as DER"))]
    EncodeCertificateDer { source: certs::Error },

    #[snafu(display("failed to encode leaf certificate as PEM"))]
    EncodeCertificatePem { source: certs::Error },

    #[snafu(display("failed to encode private key as DER"))]
    EncodePrivateKeyDer { source: certs::Error },

    #[snafu(display("failed to encode private key as PEM"))]
    EncodePrivateKeyPem { source: certs::Error },

    #[snafu(display("failed to decode CertifiedKey from DER"))]
    DecodeCertifiedKeyFromDer { source: tokio_rustls::rustls::Error },

    #[snafu(display("failed to run task in blocking thread"))]
    TokioSpawnBlocking { source: tokio::task::JoinError },
}

/// This struct serves as [`ResolvesServerCert`] to always hand out the current certificate for TLS
/// client connections.
///
/// It offers the [`Self::rotate_certificate`] function to create a fresh certificate and basically
/// hot-reload the certificate in the running webhook.
///
/// The first certificate is generated inside [`Self::new`], so a fully
/// constructed resolver always holds a usable certificate and the channel
/// already contains the matching [`WebhookCertificate`].
#[derive(Debug)]
pub struct CertificateResolver {
    /// Using a [`ArcSwap`] (over e.g. [`tokio::sync::RwLock`]), so that we can easily
    /// (and performant) bridge between async write and sync read.
    current_certified_key: ArcSwap<CertifiedKey>,
    subject_alternative_dns_names: Arc<Vec<String>>,

    certificate_tx: mpsc::Sender<WebhookCertificate>,
}

impl CertificateResolver {
    pub async fn new(
        subject_alternative_dns_names: Vec<String>,
        certificate_tx: mpsc::Sender<WebhookCertificate>,
    ) -> Result<Self> {
        let subject_alternative_dns_names = Arc::new(subject_alternative_dns_names);
        let (certificate, certified_key) =
            Self::generate_new_cert(subject_alternative_dns_names.clone())
                .await
                .context(GenerateNewCertificateSnafu)?;

        certificate_tx
            .send(certificate)
            .await
            .map_err(|_err| CertificateResolverError::SendCertificateToChannel)?;

        Ok(Self {
            subject_alternative_dns_names,
            current_certified_key: ArcSwap::new(certified_key),
            certificate_tx,
        })
    }

    pub async fn rotate_certificate(&self) -> Result<()> {
        let (certificate, certified_key) =
            Self::generate_new_cert(self.subject_alternative_dns_names.clone())
                .await
                .context(GenerateNewCertificateSnafu)?;

        self.certificate_tx
            .send(certificate)
            .await
            .map_err(|_err| CertificateResolverError::SendCertificateToChannel)?;

        self.current_certified_key.store(certified_key);

        Ok(())
    }

    async fn generate_new_cert(
        subject_alternative_dns_names: Arc<Vec<String>>,
    ) -> Result<(WebhookCertificate, Arc<CertifiedKey>)> {
        // The certificate generation can take a while, so we use `spawn_blocking`
        tokio::task::spawn_blocking(move || {
            let tls_provider = default_provider();

            let ca = CertificateAuthority::new(WEBHOOK_CA_LIFETIME)
                .context(CreateCertificateAuthoritySnafu)?;
            let leaf = ca
                .generate_leaf_certificate(
                    "Webhook serving certificate",
                    subject_alternative_dns_names
                        .iter()
                        .map(|san| san.as_str()),
                    WEBHOOK_CERTIFICATE_LIFETIME,
                )
                .context(GenerateLeafCertificateSnafu)?;

            let certificate_der = leaf.certificate_der().context(EncodeCertificateDerSnafu)?;
            let private_key_der = leaf.private_key_der().context(EncodePrivateKeyDerSnafu)?;
            let certified_key =
                CertifiedKey::from_der(vec![certificate_der], private_key_der, &tls_provider)
                    .context(DecodeCertifiedKeyFromDerSnafu)?;

            let certificate = WebhookCertificate {
                ca_certificate: ca.certificate().clone(),
                certificate_pem: leaf.certificate_pem().context(EncodeCertificatePemSnafu)?,
                private_key_pem: leaf.private_key_pem().context(EncodePrivateKeyPemSnafu)?,
            };

            Ok((certificate, Arc::new(certified_key)))
        })
        .await
        .context(TokioSpawnBlockingSnafu)?
    }
}

impl ResolvesServerCert for CertificateResolver {
    fn resolve(
        &self,
        _client_hello: tokio_rustls::rustls::server::ClientHello<'_>,
    ) -> Option<Arc<CertifiedKey>> {
        Some(self.current_certified_key.load().clone())
    }
}
