use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::args::Args;
use crate::poll::PollPolicy;

pub static STAGING_BUCKET_PREFIX: &str = "cdbuild-";
pub static BUILD_OBJECT_DIR: &str = "build";
pub static IMAGE_REGISTRY: &str = "gcr.io";
pub static DOCKERIZER_BUILDER: &str = "gcr.io/cloud-builders/dockerizer";
pub static DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
pub static DEFAULT_BUILD_ENDPOINT: &str = "https://cloudbuild.googleapis.com";

/// What to do when the uploaded archive cannot be deleted after the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupPolicy {
    /// Report the failure and exit with the fatal code.
    #[default]
    Strict,
    /// Log a warning and carry on; the object stays in the orphan ledger.
    Lenient,
}

/// Everything one invocation needs, resolved from the command line.
#[derive(Debug, Clone)]
pub struct Config {
    pub project: String,
    pub name: String,
    pub source_dir: PathBuf,
    pub staging_bucket: String,
    pub build_object: String,
    pub image: String,
    pub poll: PollPolicy,
    pub cleanup: CleanupPolicy,
    pub sweep_orphans: bool,
    pub orphan_ledger: Option<PathBuf>,
    pub storage_endpoint: String,
    pub build_endpoint: String,
}

impl Config {
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        let project = project.into();
        let name = name.into();
        Self {
            staging_bucket: staging_bucket(&project),
            build_object: build_object(&name),
            image: image_ref(&project, &name),
            project,
            name,
            source_dir: PathBuf::from("."),
            poll: PollPolicy::default(),
            cleanup: CleanupPolicy::default(),
            sweep_orphans: false,
            orphan_ledger: None,
            storage_endpoint: DEFAULT_STORAGE_ENDPOINT.to_string(),
            build_endpoint: DEFAULT_BUILD_ENDPOINT.to_string(),
        }
    }

    pub fn from_args(args: &Args) -> Self {
        let poll = PollPolicy {
            interval: Duration::from_secs(args.poll_interval),
            max_interval: Duration::from_secs(args.poll_max_interval),
            multiplier: args.poll_multiplier,
            timeout: args.timeout.map(Duration::from_secs),
        };
        let cleanup = if args.lenient_cleanup {
            CleanupPolicy::Lenient
        } else {
            CleanupPolicy::Strict
        };

        Self {
            source_dir: args.source.clone(),
            poll,
            cleanup,
            sweep_orphans: args.sweep_orphans,
            orphan_ledger: args.orphan_ledger.clone(),
            storage_endpoint: args.storage_endpoint.clone(),
            build_endpoint: args.build_endpoint.clone(),
            ..Self::new(&args.project, &args.name)
        }
    }
}

pub fn staging_bucket(project: &str) -> String {
    format!("{STAGING_BUCKET_PREFIX}{project}")
}

/// A fresh object key; the UUID keeps concurrent runs of the same image apart.
pub fn build_object(name: &str) -> String {
    format!("{BUILD_OBJECT_DIR}/{name}-{}.tar.gz", Uuid::new_v4())
}

pub fn image_ref(project: &str, name: &str) -> String {
    format!("{IMAGE_REGISTRY}/{project}/{name}")
}

pub fn logs_url(bucket: &str, build_id: &str) -> String {
    format!("https://console.cloud.google.com/m/cloudstorage/b/{bucket}/o/log-{build_id}.txt")
}
