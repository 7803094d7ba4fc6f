use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::http::ApiError;

/// Process exit code for missing or malformed flags (clap usage errors).
pub const EXIT_USAGE: i32 = 2;
/// Process exit code when the Cloud Build API is not enabled for the project.
pub const EXIT_API_DISABLED: i32 = 1;
pub const EXIT_FATAL: i32 = 1;

#[derive(Error, Debug)]
pub enum CdbuildError {
    #[error("could not get authenticated HTTP client: {0}")]
    Credentials(String),

    // Provisioning
    #[error("could not look up bucket {bucket}: {source}")]
    BucketLookup {
        bucket: String,
        #[source]
        source: ApiError,
    },

    #[error(
        "could not create bucket {bucket}: permission denied. Is billing enabled for project {project}? \
         Check https://console.cloud.google.com/billing?project={project}"
    )]
    BillingDisabled { project: String, bucket: String },

    #[error("could not create bucket {bucket}: {source}")]
    BucketCreate {
        bucket: String,
        #[source]
        source: ApiError,
    },

    // Upload
    #[error("could not archive {root}: {source}")]
    Archive {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not upload source to gs://{bucket}/{object}: {source}")]
    Upload {
        bucket: String,
        object: String,
        #[source]
        source: ApiError,
    },

    // Build
    #[error(
        "the Cloud Build API is not enabled for project {project}. Enable it at \
         https://console.developers.google.com/apis/api/cloudbuild.googleapis.com/overview?project={project}"
    )]
    BuildApiDisabled { project: String },

    #[error("could not create build: {0}")]
    Submit(#[source] ApiError),

    #[error("could not get build ID from operation: {0}")]
    MissingBuildId(String),

    #[error("could not get status of build {build_id}: {source}")]
    StatusFetch {
        build_id: String,
        #[source]
        source: ApiError,
    },

    #[error("interrupted while waiting for build {build_id}")]
    Interrupted { build_id: String },

    #[error("build {build_id} did not finish within {waited:?}")]
    TimedOut { build_id: String, waited: Duration },

    // Cleanup
    #[error("could not delete source gs://{bucket}/{object}: {source}")]
    Cleanup {
        bucket: String,
        object: String,
        #[source]
        source: ApiError,
    },

    #[error("orphan ledger error: {0}")]
    Ledger(#[from] confy::ConfyError),

    #[error(transparent)]
    Http(#[from] ApiError),
}

impl CdbuildError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BuildApiDisabled { .. } => EXIT_API_DISABLED,
            _ => EXIT_FATAL,
        }
    }
}
