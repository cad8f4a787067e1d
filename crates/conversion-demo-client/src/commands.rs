//! The demo operations issued against the Kubernetes apiserver.
//!
//! Every operation targets the single CronJob resource by name in the
//! `default` namespace, shaped as either the `v1` or `v2` API version. The
//! payloads are fixed, so that it is easy to observe which payload survives
//! (or does not survive) a conversion.
use std::time::Duration;

use conversion_demo_crd::{v1, v2};
use kube::{
    Api, Client,
    api::{DeleteParams, PostParams},
};
use snafu::{ResultExt, Snafu};
use strum::{Display, EnumString};

/// All demo resources live in the default namespace.
pub const NAMESPACE: &str = "default";

/// Every remote call is bounded by this deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const V1_PAYLOAD: &str = "lala";
const V2_PAYLOAD: &str = "wawa";

/// The operations the demo client supports.
#[derive(Clone, Copy, Debug, Display, EnumString, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum DemoCommand {
    CreateV1,
    GetV1,
    DeleteV1,
    CreateV2,
    GetV2,
    DeleteV2,
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("the request did not complete within {timeout:?}"))]
    RequestTimeout {
        source: tokio::time::error::Elapsed,
        timeout: Duration,
    },

    #[snafu(display("failed to create CronJob {name:?}"))]
    CreateCronJob { source: kube::Error, name: String },

    #[snafu(display("failed to get CronJob {name:?}"))]
    GetCronJob { source: kube::Error, name: String },

    #[snafu(display("failed to delete CronJob {name:?}"))]
    DeleteCronJob { source: kube::Error, name: String },
}

/// Runs the given operation, bounded by the request deadline.
pub async fn run(client: Client, command: DemoCommand, name: &str) -> Result<(), Error> {
    tokio::time::timeout(REQUEST_TIMEOUT, execute(client, command, name))
        .await
        .context(RequestTimeoutSnafu {
            timeout: REQUEST_TIMEOUT,
        })?
}

async fn execute(client: Client, command: DemoCommand, name: &str) -> Result<(), Error> {
    match command {
        DemoCommand::CreateV1 => {
            let api = Api::<v1::CronJob>::namespaced(client, NAMESPACE);
            let cron_job = v1::CronJob::new(
                name,
                v1::CronJobSpec {
                    foo: V1_PAYLOAD.to_owned(),
                },
            );
            api.create(&PostParams::default(), &cron_job)
                .await
                .context(CreateCronJobSnafu { name })?;
            tracing::info!(name, payload = V1_PAYLOAD, "created v1 CronJob");
        }
        DemoCommand::GetV1 => {
            let api = Api::<v1::CronJob>::namespaced(client, NAMESPACE);
            let cron_job = api.get(name).await.context(GetCronJobSnafu { name })?;
            tracing::info!(name, payload = cron_job.spec.foo, "fetched v1 CronJob");
        }
        DemoCommand::DeleteV1 => {
            let api = Api::<v1::CronJob>::namespaced(client, NAMESPACE);
            api.delete(name, &DeleteParams::default())
                .await
                .context(DeleteCronJobSnafu { name })?;
            tracing::info!(name, "deleted CronJob via the v1 API");
        }
        DemoCommand::CreateV2 => {
            let api = Api::<v2::CronJob>::namespaced(client, NAMESPACE);
            let cron_job = v2::CronJob::new(
                name,
                v2::CronJobSpec {
                    foo: V2_PAYLOAD.to_owned(),
                },
            );
            api.create(&PostParams::default(), &cron_job)
                .await
                .context(CreateCronJobSnafu { name })?;
            tracing::info!(name, payload = V2_PAYLOAD, "created v2 CronJob");
        }
        DemoCommand::GetV2 => {
            let api = Api::<v2::CronJob>::namespaced(client, NAMESPACE);
            let cron_job = api.get(name).await.context(GetCronJobSnafu { name })?;
            tracing::info!(name, payload = cron_job.spec.foo, "fetched v2 CronJob");
        }
        DemoCommand::DeleteV2 => {
            let api = Api::<v2::CronJob>::namespaced(client, NAMESPACE);
            api.delete(name, &DeleteParams::default())
                .await
                .context(DeleteCronJobSnafu { name })?;
            tracing::info!(name, "deleted CronJob via the v2 API");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        str::FromStr,
        sync::{Arc, Mutex},
        task::{Context, Poll},
    };

    use http::{Request, Response};
    use kube::client::Body;
    use serde_json::json;
    use tower::{BoxError, Service};

    use super::*;

    /// A mock apiserver returning predefined responses based on request
    /// method and path, and recording every request it sees.
    #[derive(Clone, Default)]
    struct MockApiServer {
        responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
        requests: Arc<Mutex<Vec<(String, String)>>>,
        delay: Option<Duration>,
    }

    impl MockApiServer {
        fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
            self.responses.lock().unwrap().insert(
                (method.to_owned(), path.to_owned()),
                (status, body.to_owned()),
            );
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn into_client(self) -> Client {
            Client::new(self, NAMESPACE)
        }

        fn seen_requests(&self) -> Vec<(String, String)> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Service<Request<Body>> for MockApiServer {
        type Response = Response<Body>;
        type Error = BoxError;
        type Future = std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
        >;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Body>) -> Self::Future {
            let method = req.method().to_string();
            let path = req.uri().path().to_string();

            self.requests
                .lock()
                .unwrap()
                .push((method.clone(), path.clone()));

            let response = self.responses.lock().unwrap().get(&(method, path)).cloned();
            let delay = self.delay;

            Box::pin(async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }

                let (status, body) = response.unwrap_or((
                    404,
                    json!({
                        "kind": "Status",
                        "apiVersion": "v1",
                        "status": "Failure",
                        "message": "not found",
                        "reason": "NotFound",
                        "code": 404,
                    })
                    .to_string(),
                ));

                Ok(Response::builder()
                    .status(status)
                    .header("content-type", "application/json")
                    .body(Body::from(body.into_bytes()))
                    .unwrap())
            })
        }
    }

    fn cron_job_json(api_version: &str, name: &str, foo: &str) -> String {
        json!({
            "apiVersion": api_version,
            "kind": "CronJob",
            "metadata": { "name": name, "namespace": NAMESPACE, "uid": "test-uid" },
            "spec": { "foo": foo },
        })
        .to_string()
    }

    #[test]
    fn subcommands_parse_case_sensitively() {
        assert_eq!(
            DemoCommand::from_str("createv1").unwrap(),
            DemoCommand::CreateV1
        );
        assert_eq!(
            DemoCommand::from_str("deletev2").unwrap(),
            DemoCommand::DeleteV2
        );
        assert!(DemoCommand::from_str("create").is_err());
        assert!(DemoCommand::from_str("CREATEV1").is_err());
    }

    #[tokio::test]
    async fn createv1_posts_to_the_v1_endpoint() {
        let server = MockApiServer::default().on(
            "POST",
            "/apis/batch.demo.example.com/v1/namespaces/default/cronjobs",
            201,
            &cron_job_json("batch.demo.example.com/v1", "test", "lala"),
        );

        run(server.clone().into_client(), DemoCommand::CreateV1, "test")
            .await
            .unwrap();

        assert_eq!(
            server.seen_requests(),
            vec![(
                "POST".to_owned(),
                "/apis/batch.demo.example.com/v1/namespaces/default/cronjobs".to_owned()
            )]
        );
    }

    #[tokio::test]
    async fn getv2_fetches_from_the_v2_endpoint() {
        let server = MockApiServer::default().on(
            "GET",
            "/apis/batch.demo.example.com/v2/namespaces/default/cronjobs/test",
            200,
            &cron_job_json("batch.demo.example.com/v2", "test", "wawa"),
        );

        run(server.clone().into_client(), DemoCommand::GetV2, "test")
            .await
            .unwrap();

        assert_eq!(
            server.seen_requests(),
            vec![(
                "GET".to_owned(),
                "/apis/batch.demo.example.com/v2/namespaces/default/cronjobs/test".to_owned()
            )]
        );
    }

    #[tokio::test]
    async fn deletev1_deletes_the_named_resource() {
        let server = MockApiServer::default().on(
            "DELETE",
            "/apis/batch.demo.example.com/v1/namespaces/default/cronjobs/test",
            200,
            r#"{"kind":"Status","apiVersion":"v1","status":"Success"}"#,
        );

        run(server.into_client(), DemoCommand::DeleteV1, "test")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_of_a_missing_resource_fails() {
        let server = MockApiServer::default();

        let err = run(server.into_client(), DemoCommand::GetV1, "missing")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::GetCronJob { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn requests_time_out_after_five_seconds() {
        let server = MockApiServer::default()
            .on(
                "GET",
                "/apis/batch.demo.example.com/v1/namespaces/default/cronjobs/test",
                200,
                &cron_job_json("batch.demo.example.com/v1", "test", "lala"),
            )
            .with_delay(Duration::from_secs(10));

        let err = run(server.into_client(), DemoCommand::GetV1, "test")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RequestTimeout { .. }));
    }
}
