//! Keeps Kubernetes objects which embed the webhook certificate up to date.
use std::collections::BTreeMap;

use k8s_openapi::{
    ByteString,
    api::core::v1::Secret,
    apiextensions_apiserver::pkg::apis::apiextensions::v1::{
        CustomResourceConversion, CustomResourceDefinition, ServiceReference, WebhookClientConfig,
        WebhookConversion,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::{
    Api, Client, ResourceExt,
    api::{Patch, PatchParams},
};
use snafu::{ResultExt, Snafu, ensure};
use tokio::sync::{mpsc, oneshot};
use x509_cert::der::{EncodePem, pem::LineEnding};

use crate::tls::WebhookCertificate;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to encode CA certificate as PEM format"))]
    EncodeCertificateAuthorityAsPem { source: x509_cert::der::Error },

    #[snafu(display("failed to send initial reconcile heartbeat"))]
    SendInitialReconcileHeartbeat,

    #[snafu(display("failed to patch CRD {crd_name:?}"))]
    PatchCrd {
        source: kube::Error,
        crd_name: String,
    },

    #[snafu(display("failed to patch TLS secret {secret_name:?}"))]
    PatchTlsSecret {
        source: kube::Error,
        secret_name: String,
    },
}

/// Maintains the objects which depend on the conversion webhook certificate.
///
/// When running this, the following operations are done:
///
/// - Apply the CRDs (with the conversion section pointing at the webhook
///   service and the current caBundle) when starting up
/// - Apply a `kubernetes.io/tls` secret holding the current serving
///   certificate
/// - Reconcile both whenever the conversion webhook certificate is rotated
pub struct CustomResourceDefinitionMaintainer<'a> {
    client: Client,
    certificate_rx: mpsc::Receiver<WebhookCertificate>,

    definitions: Vec<CustomResourceDefinition>,
    options: CustomResourceDefinitionMaintainerOptions<'a>,

    initial_reconcile_tx: oneshot::Sender<()>,
}

impl<'a> CustomResourceDefinitionMaintainer<'a> {
    /// Creates and returns a new [`CustomResourceDefinitionMaintainer`] which manages one or more
    /// custom resource definitions.
    ///
    /// ## Parameters
    ///
    /// - `client`: A [`Client`] to interact with the Kubernetes API server. It continuously
    ///   patches the CRDs and the TLS secret when the certificate is rotated.
    /// - `certificate_rx`: A [`mpsc::Receiver`] to receive newly generated TLS certificates.
    /// - `definitions`: An iterator of [`CustomResourceDefinition`]s which should be maintained.
    ///   If the iterator is empty, the maintainer returns early without doing any work.
    /// - `options`: Provides [`CustomResourceDefinitionMaintainerOptions`] to customize various
    ///   parts of the maintainer.
    ///
    /// ## Return Values
    ///
    /// This function returns a 2-tuple (pair) of values:
    ///
    /// - The [`CustomResourceDefinitionMaintainer`] itself. This is used to run the maintainer.
    ///   See [`CustomResourceDefinitionMaintainer::run`] for more details.
    /// - The [`oneshot::Receiver`] which will be used to send out a message once the initial
    ///   reconciliation ran.
    pub fn new(
        client: Client,
        certificate_rx: mpsc::Receiver<WebhookCertificate>,
        definitions: impl IntoIterator<Item = CustomResourceDefinition>,
        options: CustomResourceDefinitionMaintainerOptions<'a>,
    ) -> (Self, oneshot::Receiver<()>) {
        let (initial_reconcile_tx, initial_reconcile_rx) = oneshot::channel();

        let maintainer = Self {
            definitions: definitions.into_iter().collect(),
            initial_reconcile_tx,
            certificate_rx,
            options,
            client,
        };

        (maintainer, initial_reconcile_rx)
    }

    /// Runs the [`CustomResourceDefinitionMaintainer`] asynchronously.
    ///
    /// This needs to be polled in parallel with other parts of the operator, like controllers or
    /// webhook servers.
    pub async fn run(mut self) -> Result<(), Error> {
        let CustomResourceDefinitionMaintainerOptions {
            operator_namespace,
            operator_service_name,
            operator_name,
            secret_name,
            webhook_https_port,
        } = self.options;

        // Without any custom resource definitions there is no work to do.
        if self.definitions.is_empty() {
            return Ok(());
        }

        // This channel can only be used exactly once. The sender's send method consumes self, and
        // as such, the sender is wrapped in an Option to be able to call take to consume the inner
        // value.
        let mut initial_reconcile_tx = Some(self.initial_reconcile_tx);

        // This gets polled by the async runtime on a regular basis (or when woken up). Once we
        // receive a message containing the newly generated TLS certificate for the conversion
        // webhook, we need to update the caBundle in the CRDs and the TLS secret contents.
        while let Some(certificate) = self.certificate_rx.recv().await {
            tracing::info!(
                k8s.crd.names = ?self.definitions.iter().map(CustomResourceDefinition::name_any).collect::<Vec<_>>(),
                "reconciling custom resource definitions"
            );

            // The caBundle needs to be provided as a base64-encoded PEM envelope.
            let ca_bundle = certificate
                .ca_certificate
                .to_pem(LineEnding::LF)
                .context(EncodeCertificateAuthorityAsPemSnafu)?;

            let crd_api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
            let patch_params = PatchParams::apply(operator_name);

            for crd in self.definitions.iter_mut() {
                let crd_name = crd.name_any();

                tracing::debug!(
                    k8s.crd.kind = crd.spec.names.kind,
                    k8s.crd.name = crd_name,
                    "reconciling custom resource definition"
                );

                crd.spec.conversion = Some(CustomResourceConversion {
                    strategy: "Webhook".to_owned(),
                    webhook: Some(WebhookConversion {
                        // conversionReviewVersions indicates what ConversionReview versions are
                        // supported by the webhook. The first version in the list understood by the
                        // API server is sent to the webhook. The webhook must respond with a
                        // ConversionReview object in the same version it received. We only support
                        // the stable v1 ConversionReview to keep the implementation as simple as
                        // possible.
                        conversion_review_versions: vec!["v1".to_owned()],
                        client_config: Some(WebhookClientConfig {
                            service: Some(ServiceReference {
                                name: operator_service_name.to_owned(),
                                namespace: operator_namespace.to_owned(),
                                path: Some(format!("/convert/{crd_name}")),
                                port: Some(webhook_https_port.into()),
                            }),
                            // Here, ByteString takes care of encoding the provided content as
                            // base64.
                            ca_bundle: Some(ByteString(ca_bundle.as_bytes().to_vec())),
                            url: None,
                        }),
                    }),
                });

                // Deploy the updated CRDs using a server-side apply.
                let patch = Patch::Apply(&crd);
                crd_api
                    .patch(&crd_name, &patch_params, &patch)
                    .await
                    .with_context(|_| PatchCrdSnafu { crd_name })?;
            }

            // The serving certificate is additionally stored in a TLS secret,
            // so that other cluster components can mount and trust it.
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(secret_name.to_owned()),
                    namespace: Some(operator_namespace.to_owned()),
                    ..ObjectMeta::default()
                },
                type_: Some("kubernetes.io/tls".to_owned()),
                string_data: Some(BTreeMap::from([
                    ("tls.crt".to_owned(), certificate.certificate_pem.clone()),
                    ("tls.key".to_owned(), certificate.private_key_pem.clone()),
                    ("ca.crt".to_owned(), ca_bundle),
                ])),
                ..Secret::default()
            };

            let secret_api: Api<Secret> = Api::namespaced(self.client.clone(), operator_namespace);
            secret_api
                .patch(secret_name, &patch_params, &Patch::Apply(&secret))
                .await
                .context(PatchTlsSecretSnafu { secret_name })?;

            // After the reconciliation, the initial reconcile heartbeat is sent out via the
            // oneshot channel.
            if let Some(initial_reconcile_tx) = initial_reconcile_tx.take() {
                ensure!(
                    initial_reconcile_tx.send(()).is_ok(),
                    SendInitialReconcileHeartbeatSnafu
                );
            }
        }

        Ok(())
    }
}

/// This contains required options to customize a [`CustomResourceDefinitionMaintainer`].
pub struct CustomResourceDefinitionMaintainerOptions<'a> {
    /// The operator name, used as the server-side apply field manager.
    pub operator_name: &'a str,

    /// The namespace the operator/conversion webhook runs in.
    pub operator_namespace: &'a str,

    /// The name of the Kubernetes service which points to the conversion webhook.
    pub operator_service_name: &'a str,

    /// The name of the TLS secret holding the current serving certificate.
    pub secret_name: &'a str,

    /// The HTTPS port the conversion webhook listens on.
    pub webhook_https_port: u16,
}
