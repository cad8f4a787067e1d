//! Conversion between the served `CronJob` versions.
//!
//! Only identity metadata ([`kube::core::ObjectMeta`]) is carried across
//! versions. The `foo` payload means something different in each version, so
//! it is deliberately reset to its zero value instead of being copied. This
//! makes cross-version conversion lossy by design, which is exactly what the
//! demo wants to show.

use std::error::Error;

use kube::core::{
    conversion::{ConversionRequest, ConversionResponse, ConversionReview},
    response::{Status, StatusSummary},
};
use snafu::{ResultExt, Snafu, ensure};

use crate::{CronJob, CronJobVersion, KIND, UnknownDesiredApiVersionError, v1, v2};

/// Converts a `v1` CronJob into its `v2` representation.
///
/// Infallible: metadata is moved over verbatim, the payload starts out at
/// its default. The input is never validated or rejected.
pub fn convert_up(cron_job: v1::CronJob) -> v2::CronJob {
    tracing::info!(
        name = cron_job.metadata.name.as_deref().unwrap_or_default(),
        "converting CronJob from v1 to v2"
    );

    v2::CronJob {
        metadata: cron_job.metadata,
        spec: v2::CronJobSpec::default(),
    }
}

/// Converts a `v2` CronJob into its `v1` representation.
///
/// Symmetric to [`convert_up`].
pub fn convert_down(cron_job: v2::CronJob) -> v1::CronJob {
    tracing::info!(
        name = cron_job.metadata.name.as_deref().unwrap_or_default(),
        "converting CronJob from v2 to v1"
    );

    v1::CronJob {
        metadata: cron_job.metadata,
        spec: v1::CronJobSpec::default(),
    }
}

/// Errors which can occur when deserializing an object embedded in a
/// [`ConversionRequest`].
#[derive(Debug, Snafu)]
pub enum ParseObjectError {
    #[snafu(display("the object has no \"apiVersion\" field"))]
    FieldNotPresent,

    #[snafu(display("the object's \"apiVersion\" field is not a string"))]
    FieldNotStr,

    #[snafu(display("the object has no \"kind\" field"))]
    KindFieldNotPresent,

    #[snafu(display("the object's \"kind\" field is not a string"))]
    KindFieldNotStr,

    #[snafu(display("unexpected object kind {kind:?}, expected {expected:?}"))]
    UnexpectedKind { kind: String, expected: String },

    #[snafu(display("failed to deserialize object"))]
    Deserialize { source: serde_json::Error },

    #[snafu(display("unknown object api version {api_version:?}"))]
    UnknownApiVersion { api_version: String },
}

/// Errors which can occur when converting objects from a
/// [`ConversionRequest`] to the desired api version.
#[derive(Debug, Snafu)]
pub enum ConvertObjectError {
    #[snafu(display("failed to parse the desired api version"))]
    ParseDesiredApiVersion { source: UnknownDesiredApiVersionError },

    #[snafu(display("failed to parse object"))]
    ParseObject { source: ParseObjectError },

    #[snafu(display("failed to serialize converted object"))]
    SerializeObject { source: serde_json::Error },
}

impl ConvertObjectError {
    /// Joins the error and all its sources into a single human-readable
    /// message, suitable for the `message` field of a failed conversion
    /// response.
    pub fn join_errors(&self) -> String {
        let mut message = self.to_string();

        let mut current: &dyn Error = self;
        while let Some(source) = current.source() {
            message.push_str(&format!(": {source}"));
            current = source;
        }

        message
    }

    /// The HTTP status code the failure maps to. Client-supplied garbage is a
    /// 400, our own inability to serialize a converted object is a 500.
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::ParseDesiredApiVersion { .. } | Self::ParseObject { .. } => 400,
            Self::SerializeObject { .. } => 500,
        }
    }
}

impl CronJob {
    /// Deserializes a raw object from a [`ConversionRequest`] into the
    /// version indicated by its `apiVersion` field. Objects of a foreign
    /// kind are rejected.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, ParseObjectError> {
        let kind = value
            .get("kind")
            .ok_or(ParseObjectError::KindFieldNotPresent)?
            .as_str()
            .ok_or(ParseObjectError::KindFieldNotStr)?;
        ensure!(
            kind == KIND,
            UnexpectedKindSnafu {
                kind,
                expected: KIND
            }
        );

        let api_version = value
            .get("apiVersion")
            .ok_or(ParseObjectError::FieldNotPresent)?
            .as_str()
            .ok_or(ParseObjectError::FieldNotStr)?;

        match api_version {
            "batch.demo.example.com/v1" => {
                let cron_job = serde_json::from_value(value).context(DeserializeSnafu)?;
                Ok(Self::V1(cron_job))
            }
            "batch.demo.example.com/v2" => {
                let cron_job = serde_json::from_value(value).context(DeserializeSnafu)?;
                Ok(Self::V2(cron_job))
            }
            unknown => UnknownApiVersionSnafu {
                api_version: unknown,
            }
            .fail(),
        }
    }

    /// Serializes the contained object back into a raw JSON value, ready to
    /// be embedded in a [`ConversionResponse`].
    pub fn into_json_value(self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::V1(cron_job) => serde_json::to_value(cron_job),
            Self::V2(cron_job) => serde_json::to_value(cron_job),
        }
    }

    /// Handles a complete [`ConversionReview`] as sent by the Kubernetes
    /// apiserver and returns the review with its `response` filled in.
    ///
    /// This function never fails from the caller's point of view. Malformed
    /// reviews and objects are reported through a failure
    /// [`ConversionResponse`] carrying the appropriate HTTP status code and a
    /// message assembled from the full error source chain.
    pub fn try_convert(review: ConversionReview) -> ConversionReview {
        let request = match ConversionRequest::from_review(review) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "received invalid ConversionReview");

                return ConversionResponse::invalid(Status {
                    metadata: Default::default(),
                    status: Some(StatusSummary::Failure),
                    message: format!("the ConversionReview contains an invalid request: {err}"),
                    reason: "ConversionReviewInvalid".to_owned(),
                    details: None,
                    code: 400,
                })
                .into_review();
            }
        };

        let response = match Self::convert_objects(request.objects, &request.desired_api_version) {
            Ok(converted_objects) => ConversionResponse {
                result: Status::success(),
                types: request.types,
                uid: request.uid,
                converted_objects,
            },
            Err(err) => {
                let code = err.http_status_code();
                let message = err.join_errors();
                tracing::warn!(error = message, "failed to convert objects");

                ConversionResponse {
                    result: Status {
                        metadata: Default::default(),
                        status: Some(StatusSummary::Failure),
                        message,
                        reason: "ConversionFailed".to_owned(),
                        details: None,
                        code,
                    },
                    types: request.types,
                    uid: request.uid,
                    converted_objects: Vec::new(),
                }
            }
        };

        response.into_review()
    }

    fn convert_objects(
        objects: Vec<serde_json::Value>,
        desired_api_version: &str,
    ) -> Result<Vec<serde_json::Value>, ConvertObjectError> {
        let desired = CronJobVersion::from_api_version(desired_api_version)
            .context(ParseDesiredApiVersionSnafu)?;

        let mut converted_objects = Vec::with_capacity(objects.len());

        for object in objects {
            let cron_job = Self::from_json_value(object.clone()).context(ParseObjectSnafu)?;

            // The apiserver can ask for the version an object already has,
            // in which case it must pass through untouched.
            if cron_job.version() == desired {
                converted_objects.push(object);
                continue;
            }

            let converted = cron_job
                .into_version(desired)
                .into_json_value()
                .context(SerializeObjectSnafu)?;
            converted_objects.push(converted);
        }

        Ok(converted_objects)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use kube::core::ObjectMeta;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn object_meta() -> ObjectMeta {
        ObjectMeta {
            name: Some("replicate-danube".to_owned()),
            namespace: Some("default".to_owned()),
            uid: Some("34d78a96-2e43-4958-8fa3-7a03581204e4".to_owned()),
            resource_version: Some("8675".to_owned()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/name".to_owned(),
                "cronjob".to_owned(),
            )])),
            ..ObjectMeta::default()
        }
    }

    #[test]
    fn convert_up_copies_metadata_and_drops_payload() {
        let cron_job = v1::CronJob {
            metadata: object_meta(),
            spec: v1::CronJobSpec {
                foo: "lala".to_owned(),
            },
        };

        let converted = convert_up(cron_job);

        assert_eq!(converted.metadata, object_meta());
        assert_eq!(converted.spec.foo, "");
    }

    #[test]
    fn convert_down_copies_metadata_and_drops_payload() {
        let cron_job = v2::CronJob {
            metadata: object_meta(),
            spec: v2::CronJobSpec {
                foo: "wawa".to_owned(),
            },
        };

        let converted = convert_down(cron_job);

        assert_eq!(converted.metadata, object_meta());
        assert_eq!(converted.spec.foo, "");
    }

    #[test]
    fn metadata_survives_a_full_round_trip() {
        let cron_job = v1::CronJob {
            metadata: object_meta(),
            spec: v1::CronJobSpec {
                foo: "lala".to_owned(),
            },
        };

        let round_tripped = convert_down(convert_up(cron_job));

        assert_eq!(round_tripped.metadata, object_meta());
        // The payload is gone after the first hop already.
        assert_eq!(round_tripped.spec.foo, "");
    }

    fn review(desired_api_version: &str, objects: serde_json::Value) -> ConversionReview {
        serde_json::from_value(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "ConversionReview",
            "request": {
                "uid": "705ab4f5-6393-4ca1-af09-8c6d979eb766",
                "desiredAPIVersion": desired_api_version,
                "objects": objects,
            },
        }))
        .expect("the review must deserialize")
    }

    #[rstest]
    #[case("batch.demo.example.com/v2")]
    #[case("v2")]
    fn try_convert_converts_v1_to_v2(#[case] desired_api_version: &str) {
        let review = review(
            desired_api_version,
            json!([{
                "apiVersion": "batch.demo.example.com/v1",
                "kind": "CronJob",
                "metadata": {
                    "name": "replicate-danube",
                    "namespace": "default",
                    "uid": "34d78a96-2e43-4958-8fa3-7a03581204e4",
                },
                "spec": { "foo": "lala" },
            }]),
        );

        let response = CronJob::try_convert(review)
            .response
            .expect("the response must be filled in");

        assert_eq!(response.uid, "705ab4f5-6393-4ca1-af09-8c6d979eb766");
        assert!(matches!(response.result.status, Some(StatusSummary::Success)));

        let converted = &response.converted_objects[0];
        assert_eq!(converted["apiVersion"], "batch.demo.example.com/v2");
        assert_eq!(converted["kind"], "CronJob");
        assert_eq!(converted["metadata"]["name"], "replicate-danube");
        assert_eq!(
            converted["metadata"]["uid"],
            "34d78a96-2e43-4958-8fa3-7a03581204e4"
        );
        // The payload must not leak across versions.
        assert_eq!(converted["spec"]["foo"], "");
    }

    #[test]
    fn try_convert_passes_through_objects_already_at_the_desired_version() {
        let review = review(
            "batch.demo.example.com/v1",
            json!([{
                "apiVersion": "batch.demo.example.com/v1",
                "kind": "CronJob",
                "metadata": { "name": "replicate-danube", "namespace": "default" },
                "spec": { "foo": "lala" },
            }]),
        );

        let response = CronJob::try_convert(review)
            .response
            .expect("the response must be filled in");

        assert!(matches!(response.result.status, Some(StatusSummary::Success)));
        // Noop conversions keep the payload.
        assert_eq!(response.converted_objects[0]["spec"]["foo"], "lala");
    }

    #[test]
    fn try_convert_rejects_unknown_object_api_versions() {
        let review = review(
            "batch.demo.example.com/v2",
            json!([{
                "apiVersion": "batch.demo.example.com/v3",
                "kind": "CronJob",
                "metadata": { "name": "replicate-danube" },
                "spec": {},
            }]),
        );

        let response = CronJob::try_convert(review)
            .response
            .expect("the response must be filled in");

        assert_eq!(response.uid, "705ab4f5-6393-4ca1-af09-8c6d979eb766");
        assert!(matches!(response.result.status, Some(StatusSummary::Failure)));
        assert_eq!(response.result.code, 400);
        assert_eq!(
            response.result.message,
            "failed to parse object: unknown object api version \"batch.demo.example.com/v3\""
        );
        assert!(response.converted_objects.is_empty());
    }

    #[test]
    fn try_convert_rejects_objects_of_a_foreign_kind() {
        let review = review(
            "batch.demo.example.com/v2",
            json!([{
                "apiVersion": "batch.demo.example.com/v1",
                "kind": "NotACronJob",
                "metadata": { "name": "replicate-danube" },
                "spec": { "foo": "lala" },
            }]),
        );

        let response = CronJob::try_convert(review)
            .response
            .expect("the response must be filled in");

        assert_eq!(response.uid, "705ab4f5-6393-4ca1-af09-8c6d979eb766");
        assert!(matches!(response.result.status, Some(StatusSummary::Failure)));
        assert_eq!(response.result.code, 400);
        assert_eq!(
            response.result.message,
            "failed to parse object: unexpected object kind \"NotACronJob\", expected \"CronJob\""
        );
        assert!(response.converted_objects.is_empty());
    }

    #[test]
    fn try_convert_rejects_objects_without_a_kind() {
        let review = review(
            "batch.demo.example.com/v2",
            json!([{
                "apiVersion": "batch.demo.example.com/v1",
                "metadata": { "name": "replicate-danube" },
                "spec": { "foo": "lala" },
            }]),
        );

        let response = CronJob::try_convert(review)
            .response
            .expect("the response must be filled in");

        assert!(matches!(response.result.status, Some(StatusSummary::Failure)));
        assert_eq!(response.result.code, 400);
        assert_eq!(
            response.result.message,
            "failed to parse object: the object has no \"kind\" field"
        );
    }

    #[test]
    fn try_convert_rejects_reviews_without_a_request() {
        let review: ConversionReview = serde_json::from_value(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "ConversionReview",
        }))
        .expect("the review must deserialize");

        let response = CronJob::try_convert(review)
            .response
            .expect("the response must be filled in");

        assert!(matches!(response.result.status, Some(StatusSummary::Failure)));
        assert_eq!(response.result.code, 400);
    }
}
