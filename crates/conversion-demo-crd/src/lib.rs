//! Versioned `CronJob` custom resource types for the conversion demo.
//!
//! The same logical resource is served at two API versions, `v1` and `v2`.
//! Both carry a single payload field `foo` which is *not* semantically
//! related between versions, so conversion copies identity metadata only and
//! leaves the payload at its zero value. See [`conversion`] for the actual
//! conversion logic and the [`CronJob::try_convert`] webhook entry point.

use std::fmt::Display;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::crd::MergeError;
use snafu::Snafu;

pub mod conversion;

/// The API group all versions of the resource belong to.
pub const GROUP: &str = "batch.demo.example.com";

/// The kind shared by all versions of the resource.
pub const KIND: &str = "CronJob";

pub mod v1 {
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    /// Specification of the `v1` CronJob.
    #[derive(
        Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize,
    )]
    #[kube(
        group = "batch.demo.example.com",
        version = "v1",
        kind = "CronJob",
        namespaced
    )]
    #[serde(rename_all = "camelCase")]
    pub struct CronJobSpec {
        /// Demo payload. Not carried over when converting to other versions.
        #[serde(default)]
        pub foo: String,
    }
}

pub mod v2 {
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    /// Specification of the `v2` CronJob.
    #[derive(
        Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize,
    )]
    #[kube(
        group = "batch.demo.example.com",
        version = "v2",
        kind = "CronJob",
        namespaced
    )]
    #[serde(rename_all = "camelCase")]
    pub struct CronJobSpec {
        /// Demo payload. Not carried over when converting to other versions.
        #[serde(default)]
        pub foo: String,
    }
}

/// A `CronJob` at any of the served API versions.
///
/// This tagged union is the single dispatch point for version handling. All
/// conversions are explicit via [`CronJob::into_version`], there is no
/// version registry. Deserialization from and serialization back to JSON
/// values lives in [`conversion`].
#[derive(Clone, Debug)]
pub enum CronJob {
    V1(v1::CronJob),
    V2(v2::CronJob),
}

impl CronJob {
    /// Returns the merged [`CustomResourceDefinition`] containing all served
    /// versions, with `stored_apiversion` marked as the storage version.
    pub fn merged_crd(
        stored_apiversion: CronJobVersion,
    ) -> Result<CustomResourceDefinition, MergeError> {
        let crds = vec![
            <v1::CronJob as kube::CustomResourceExt>::crd(),
            <v2::CronJob as kube::CustomResourceExt>::crd(),
        ];

        kube::core::crd::merge_crds(crds, stored_apiversion.as_str())
    }

    /// The version of the contained object.
    pub fn version(&self) -> CronJobVersion {
        match self {
            Self::V1(_) => CronJobVersion::V1,
            Self::V2(_) => CronJobVersion::V2,
        }
    }

    /// Converts the contained object into `desired`. Converting into the
    /// version it already has is a noop.
    pub fn into_version(self, desired: CronJobVersion) -> Self {
        match (self, desired) {
            (Self::V1(cron_job), CronJobVersion::V2) => Self::V2(conversion::convert_up(cron_job)),
            (Self::V2(cron_job), CronJobVersion::V1) => {
                Self::V1(conversion::convert_down(cron_job))
            }
            (unchanged, _) => unchanged,
        }
    }
}

/// All served versions of the [`CronJob`] resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CronJobVersion {
    V1,
    V2,
}

impl CronJobVersion {
    /// The bare version string, eg. `v1`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }

    /// The fully qualified api version, eg. `batch.demo.example.com/v1`.
    pub fn as_api_version(&self) -> &'static str {
        match self {
            Self::V1 => "batch.demo.example.com/v1",
            Self::V2 => "batch.demo.example.com/v2",
        }
    }

    /// Parses either the fully qualified or the bare form of a version.
    pub fn from_api_version(api_version: &str) -> Result<Self, UnknownDesiredApiVersionError> {
        match api_version {
            "batch.demo.example.com/v1" | "v1" => Ok(Self::V1),
            "batch.demo.example.com/v2" | "v2" => Ok(Self::V2),
            unknown => UnknownDesiredApiVersionSnafu {
                api_version: unknown,
            }
            .fail(),
        }
    }
}

impl Display for CronJobVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("unknown desired api version {api_version:?}"))]
pub struct UnknownDesiredApiVersionError {
    pub api_version: String,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("v1", CronJobVersion::V1)]
    #[case("batch.demo.example.com/v1", CronJobVersion::V1)]
    #[case("v2", CronJobVersion::V2)]
    #[case("batch.demo.example.com/v2", CronJobVersion::V2)]
    fn version_from_api_version(#[case] input: &str, #[case] expected: CronJobVersion) {
        assert_eq!(CronJobVersion::from_api_version(input).unwrap(), expected);
    }

    #[test]
    fn version_from_unknown_api_version() {
        let err = CronJobVersion::from_api_version("batch.demo.example.com/v3").unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown desired api version \"batch.demo.example.com/v3\""
        );
    }

    #[test]
    fn merged_crd_contains_both_versions() {
        let crd = CronJob::merged_crd(CronJobVersion::V2).unwrap();

        assert_eq!(
            crd.metadata.name.as_deref(),
            Some("cronjobs.batch.demo.example.com")
        );
        assert_eq!(crd.spec.group, "batch.demo.example.com");

        let versions = &crd.spec.versions;
        assert_eq!(versions.len(), 2);
        assert!(versions.iter().any(|v| v.name == "v1" && !v.storage));
        assert!(versions.iter().any(|v| v.name == "v2" && v.storage));
    }

    #[test]
    fn umbrella_enum_dispatches_on_api_version() {
        let value = serde_json::json!({
            "apiVersion": "batch.demo.example.com/v1",
            "kind": "CronJob",
            "metadata": { "name": "test", "namespace": "default" },
            "spec": { "foo": "lala" },
        });

        let cron_job = CronJob::from_json_value(value).unwrap();
        assert_eq!(cron_job.version(), CronJobVersion::V1);

        let CronJob::V1(cron_job) = cron_job else {
            panic!("expected a v1 object");
        };
        assert_eq!(cron_job.spec.foo, "lala");
    }
}
