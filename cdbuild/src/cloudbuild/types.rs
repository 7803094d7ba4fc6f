use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::config;

/// Cloud Build v1 `Build` resource, reduced to the fields cdbuild reads or writes.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BuildStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<BuildStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_bucket: Option<String>,
}

impl Build {
    /// A single `dockerizer` step building `image` from the uploaded archive.
    pub fn dockerize(bucket: &str, object: &str, image: &str) -> Self {
        Build {
            source: Some(Source {
                storage_source: Some(StorageSource {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                }),
            }),
            steps: vec![BuildStep {
                name: config::DOCKERIZER_BUILDER.to_string(),
                args: vec![image.to_string()],
            }],
            images: vec![image.to_string()],
            logs_bucket: Some(bucket.to_string()),
            ..Default::default()
        }
    }

    pub fn status(&self) -> BuildStatus {
        self.status.unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_source: Option<StorageSource>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSource {
    pub bucket: String,
    pub object: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Pending,
    Queued,
    Working,
    Success,
    Failure,
    InternalError,
    Timeout,
    Cancelled,
    Expired,
    /// Also stands in for any status this client does not know.
    #[default]
    #[serde(other)]
    StatusUnknown,
}

impl BuildStatus {
    /// Anything that is not waiting or running is final.
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            BuildStatus::Pending | BuildStatus::Queued | BuildStatus::Working
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::StatusUnknown => "STATUS_UNKNOWN",
            BuildStatus::Pending => "PENDING",
            BuildStatus::Queued => "QUEUED",
            BuildStatus::Working => "WORKING",
            BuildStatus::Success => "SUCCESS",
            BuildStatus::Failure => "FAILURE",
            BuildStatus::InternalError => "INTERNAL_ERROR",
            BuildStatus::Timeout => "TIMEOUT",
            BuildStatus::Cancelled => "CANCELLED",
            BuildStatus::Expired => "EXPIRED",
        }
    }
}

impl Display for BuildStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Long-running operation returned by `projects.builds.create`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub metadata: Option<BuildOperationMetadata>,
}

/// `google.devtools.cloudbuild.v1.BuildOperationMetadata`
///
/// Only this typed shape (`metadata.build.id`) is read. Responses that carry
/// the build as an untyped map under another key are not supported.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildOperationMetadata {
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    pub type_url: Option<String>,
    #[serde(default)]
    pub build: Option<Build>,
}

impl Operation {
    pub fn build_id(&self) -> Option<&str> {
        self.metadata
            .as_ref()?
            .build
            .as_ref()?
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}
