//! A minimal reconciler over `v2` CronJobs.
//!
//! The demo has no reconciliation business logic. The controller only logs
//! every observed object and bumps a counter, so that the full operator wiring
//! (watch, reconcile, requeue) is in place.
use std::{sync::Arc, time::Duration};

use conversion_demo_crd::v2::CronJob;
use futures_util::StreamExt;
use kube::{
    Api, Client, ResourceExt,
    runtime::{Controller, controller::Action, watcher},
};
use snafu::Snafu;

use crate::metrics::Metrics;

#[derive(Debug, Snafu)]
pub enum Error {}

pub struct Context {
    pub metrics: Arc<Metrics>,
}

/// Runs the controller until its watch stream ends.
pub async fn run(client: Client, metrics: Arc<Metrics>) {
    let cron_jobs: Api<CronJob> = Api::all(client);
    let context = Arc::new(Context { metrics });

    Controller::new(cron_jobs, watcher::Config::default())
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok(object) => tracing::debug!(?object, "reconciled CronJob"),
                Err(err) => tracing::warn!(%err, "reconciliation error"),
            }
        })
        .await;
}

async fn reconcile(cron_job: Arc<CronJob>, ctx: Arc<Context>) -> Result<Action, Error> {
    ctx.metrics.inc_reconciliations();
    tracing::info!(
        name = cron_job.name_any(),
        namespace = cron_job.namespace().unwrap_or_default(),
        "reconciling CronJob"
    );

    // Nothing to do, the demo only cares about version conversion. The
    // watcher wakes us up again when the object changes or is deleted.
    Ok(Action::await_change())
}

fn error_policy(_cron_job: Arc<CronJob>, error: &Error, _ctx: Arc<Context>) -> Action {
    tracing::error!(%error, "reconciliation failed");
    Action::requeue(Duration::from_secs(60))
}
