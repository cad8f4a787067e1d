//! Minimal Lease-based leader election.
//!
//! [`acquire`] blocks until the lease is held and then keeps renewing it in a
//! background task. There is no graceful hand-over: a crashed leader is
//! replaced once its lease expires. An instance which finds its lease taken
//! over by another candidate shuts down, two active leaders must never run
//! at the same time.
use std::time::Duration;

use k8s_openapi::{
    api::coordination::v1::{Lease, LeaseSpec},
    apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta},
    jiff::{SignedDuration, Timestamp},
};
use kube::{Api, Client, api::PostParams};
use snafu::{ResultExt, Snafu};
use tokio::time::sleep;

const LEASE_DURATION_SECONDS: i32 = 15;
const RETRY_INTERVAL: Duration = Duration::from_secs(5);
const RENEW_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to get lease {lease_name:?}"))]
    GetLease {
        source: kube::Error,
        lease_name: String,
    },

    #[snafu(display("failed to create lease {lease_name:?}"))]
    CreateLease {
        source: kube::Error,
        lease_name: String,
    },

    #[snafu(display("failed to update lease {lease_name:?}"))]
    UpdateLease {
        source: kube::Error,
        lease_name: String,
    },
}

/// Blocks until the named lease is held by `identity`, then spawns a renew
/// loop and returns.
pub async fn acquire(
    client: Client,
    lease_name: &str,
    namespace: &str,
    identity: &str,
) -> Result<(), Error> {
    let api: Api<Lease> = Api::namespaced(client, namespace);

    loop {
        if try_acquire(&api, lease_name, identity).await? {
            break;
        }

        tracing::debug!(lease_name, "lease is held by another instance, retrying");
        sleep(RETRY_INTERVAL).await;
    }

    tracing::info!(lease_name, identity, "acquired leadership lease");

    // Keep renewing in the background so other candidates see us as alive.
    let renew_api = api.clone();
    let lease_name = lease_name.to_owned();
    let identity = identity.to_owned();
    tokio::spawn(async move {
        loop {
            sleep(RENEW_INTERVAL).await;

            match try_acquire(&renew_api, &lease_name, &identity).await {
                Ok(true) => {}
                // Another candidate took the lease over, eg. after this
                // instance failed to renew for longer than the lease
                // duration. It must stop leading immediately.
                Ok(false) => {
                    tracing::error!(lease_name, identity, "lost leadership lease, shutting down");
                    std::process::exit(1);
                }
                Err(err) => {
                    tracing::warn!(%err, lease_name, "failed to renew leadership lease");
                }
            }
        }
    });

    Ok(())
}

/// Tries to take or renew the lease. Returns false when another holder still
/// has an unexpired claim.
async fn try_acquire(api: &Api<Lease>, lease_name: &str, identity: &str) -> Result<bool, Error> {
    let now = Timestamp::now();

    let Some(mut lease) = api
        .get_opt(lease_name)
        .await
        .context(GetLeaseSnafu { lease_name })?
    else {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(lease_name.to_owned()),
                ..ObjectMeta::default()
            },
            spec: Some(held_spec(identity, now, 1)),
        };
        api.create(&PostParams::default(), &lease)
            .await
            .context(CreateLeaseSnafu { lease_name })?;

        return Ok(true);
    };

    let spec = lease.spec.clone().unwrap_or_default();
    let held_by_us = spec.holder_identity.as_deref() == Some(identity);

    if !held_by_us && !is_expired(&spec, now) {
        return Ok(false);
    }

    let transitions = spec.lease_transitions.unwrap_or_default() + i32::from(!held_by_us);
    let mut next = held_spec(identity, now, transitions);
    if held_by_us {
        // A renewal keeps the original acquisition timestamp.
        next.acquire_time = spec.acquire_time;
    }
    lease.spec = Some(next);

    api.replace(lease_name, &PostParams::default(), &lease)
        .await
        .context(UpdateLeaseSnafu { lease_name })?;

    Ok(true)
}

fn held_spec(identity: &str, now: Timestamp, transitions: i32) -> LeaseSpec {
    LeaseSpec {
        holder_identity: Some(identity.to_owned()),
        lease_duration_seconds: Some(LEASE_DURATION_SECONDS),
        acquire_time: Some(MicroTime(now)),
        renew_time: Some(MicroTime(now)),
        lease_transitions: Some(transitions),
        ..LeaseSpec::default()
    }
}

/// A lease with no renew timestamp counts as expired.
fn is_expired(spec: &LeaseSpec, now: Timestamp) -> bool {
    let Some(renew_time) = &spec.renew_time else {
        return true;
    };

    let duration =
        SignedDuration::from_secs(spec.lease_duration_seconds.unwrap_or_default().into());

    renew_time.0 + duration < now
}
