//! Operator binary serving the CronJob conversion webhook.
//!
//! Startup provisions the webhook TLS certificate before anything is served,
//! applies the merged CRD (with the conversion section and caBundle) and then
//! runs the webhook server, the CRD maintainer, a stub controller and the
//! probe/metrics endpoints concurrently. Any setup error is fatal.
use std::{net::SocketAddr, sync::Arc};

use clap::{Parser, Subcommand};
use conversion_demo_crd::{CronJob, CronJobVersion};
use conversion_demo_webhook::{
    maintainer::{self, CustomResourceDefinitionMaintainer, CustomResourceDefinitionMaintainerOptions},
    servers::{ConversionWebhookError, ConversionWebhookOptions, ConversionWebhookServer},
};
use kube::Client;
use snafu::{ResultExt, Snafu};
use tracing_subscriber::EnvFilter;

use crate::{health::Health, metrics::Metrics};

mod controller;
mod health;
mod leader;
mod metrics;

const OPERATOR_NAME: &str = "conversion-demo-operator";
const OPERATOR_NAMESPACE: &str = "demo-system";
const WEBHOOK_SERVICE_NAME: &str = "demo-webhook-service";
const WEBHOOK_SECRET_NAME: &str = "demo-webhook-secret";
const LEASE_NAME: &str = "78788174.demo.example.com";

#[derive(Debug, Parser)]
#[command(about = "Runs the CronJob conversion demo operator", version)]
struct Cli {
    /// The address the metric endpoint binds to.
    #[arg(long, default_value = "0.0.0.0:8080", env = "METRICS_BIND_ADDRESS")]
    metrics_bind_address: SocketAddr,

    /// The address the probe endpoint binds to.
    #[arg(long, default_value = "0.0.0.0:8081", env = "HEALTH_PROBE_BIND_ADDRESS")]
    health_probe_bind_address: SocketAddr,

    /// Enable leader election to ensure there is only one active operator.
    #[arg(long)]
    leader_elect: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the merged CustomResourceDefinition as YAML and exit
    Crd,
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to merge CRD versions"))]
    MergeCrd { source: kube::core::crd::MergeError },

    #[snafu(display("failed to serialize CRD as YAML"))]
    SerializeCrd { source: serde_yaml::Error },

    #[snafu(display("failed to create Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("failed to acquire leadership lease"))]
    AcquireLease { source: leader::Error },

    #[snafu(display("failed to create conversion webhook server"))]
    CreateConversionWebhookServer { source: ConversionWebhookError },

    #[snafu(display("failed to run conversion webhook server"))]
    RunConversionWebhookServer { source: ConversionWebhookError },

    #[snafu(display("failed to run CRD maintainer"))]
    RunMaintainer { source: maintainer::Error },

    #[snafu(display("failed to run probe server"))]
    RunProbeServer { source: health::Error },

    #[snafu(display("failed to run metrics server"))]
    RunMetricsServer { source: metrics::Error },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(cli).await {
        tracing::error!("{}", snafu::Report::from_error(err));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    // v2 is the storage version, v1 is only served.
    let crd = CronJob::merged_crd(CronJobVersion::V2).context(MergeCrdSnafu)?;

    if let Some(Command::Crd) = cli.command {
        let yaml = serde_yaml::to_string(&crd).context(SerializeCrdSnafu)?;
        print!("{yaml}");
        return Ok(());
    }

    tracing::info!("starting {OPERATOR_NAME}");

    let client = Client::try_default().await.context(CreateClientSnafu)?;

    if cli.leader_elect {
        let identity = std::env::var("HOSTNAME")
            .unwrap_or_else(|_| format!("{OPERATOR_NAME}-{:08x}", rand::random::<u32>()));
        leader::acquire(client.clone(), LEASE_NAME, OPERATOR_NAMESPACE, &identity)
            .await
            .context(AcquireLeaseSnafu)?;
    }

    let metrics = Arc::new(Metrics::default());

    let conversion_metrics = metrics.clone();
    let crds_and_handlers = vec![(crd.clone(), move |review| {
        conversion_metrics.inc_conversions();
        CronJob::try_convert(review)
    })];

    let options = ConversionWebhookOptions {
        socket_addr: ConversionWebhookServer::DEFAULT_SOCKET_ADDRESS,
        namespace: OPERATOR_NAMESPACE.to_owned(),
        service_name: WEBHOOK_SERVICE_NAME.to_owned(),
    };

    // Creating the server provisions the first serving certificate. Nothing
    // is bound or served until this returned successfully.
    let (conversion_webhook_server, certificate_rx) =
        ConversionWebhookServer::new(crds_and_handlers, options)
            .await
            .context(CreateConversionWebhookServerSnafu)?;

    let (crd_maintainer, initial_reconcile_rx) = CustomResourceDefinitionMaintainer::new(
        client.clone(),
        certificate_rx,
        vec![crd],
        CustomResourceDefinitionMaintainerOptions {
            operator_name: OPERATOR_NAME,
            operator_namespace: OPERATOR_NAMESPACE,
            operator_service_name: WEBHOOK_SERVICE_NAME,
            secret_name: WEBHOOK_SECRET_NAME,
            webhook_https_port: ConversionWebhookServer::DEFAULT_SOCKET_ADDRESS.port(),
        },
    );

    tokio::spawn(async move {
        if initial_reconcile_rx.await.is_ok() {
            tracing::info!("initial CRD reconciliation complete");
        }
    });

    // Certificate provisioning and webhook creation are done, the operator
    // can report readiness.
    let health = Arc::new(Health::default());
    health.set_ready();

    tokio::try_join!(
        async {
            conversion_webhook_server
                .run()
                .await
                .context(RunConversionWebhookServerSnafu)
        },
        async { crd_maintainer.run().await.context(RunMaintainerSnafu) },
        async {
            health::run(cli.health_probe_bind_address, health.clone())
                .await
                .context(RunProbeServerSnafu)
        },
        async {
            metrics::run(cli.metrics_bind_address, metrics.clone())
                .await
                .context(RunMetricsServerSnafu)
        },
        async {
            controller::run(client.clone(), metrics.clone()).await;
            Ok::<_, Error>(())
        },
    )?;

    Ok(())
}
