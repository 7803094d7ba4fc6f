use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use std::path::PathBuf;

use crate::config::{DEFAULT_BUILD_ENDPOINT, DEFAULT_STORAGE_ENDPOINT};

#[derive(Parser, Debug)]
#[command(
    name = "cdbuild",
    version,
    about = "Build a docker image from a local directory with Google Cloud Build"
)]
pub struct Args {
    /// Project ID
    #[arg(long, env = "CDBUILD_PROJECT", value_parser = NonEmptyStringValueParser::new())]
    pub project: String,

    /// Image name, optionally `name:tag`
    #[arg(long, value_name = "IMAGE", value_parser = NonEmptyStringValueParser::new())]
    pub name: String,

    /// Directory to upload as the build context
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub source: PathBuf,

    /// Seconds between the first and second status poll
    #[arg(
        long,
        value_name = "SECS",
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval: u64,

    /// Upper bound for the poll interval
    #[arg(
        long,
        value_name = "SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_max_interval: u64,

    /// Growth factor of the poll interval; 1 polls at a fixed rate
    #[arg(long, value_name = "FACTOR", default_value_t = 2.0)]
    pub poll_multiplier: f64,

    /// Give up on the build after this many seconds and cancel it
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Only warn when the uploaded source cannot be deleted
    #[arg(long)]
    pub lenient_cleanup: bool,

    /// Retry deleting sources left behind by earlier runs before building
    #[arg(long)]
    pub sweep_orphans: bool,

    /// Ledger of undeleted sources (defaults to the user config directory)
    #[arg(long, value_name = "PATH")]
    pub orphan_ledger: Option<PathBuf>,

    /// Cloud Storage JSON API endpoint
    #[arg(long, env = "CDBUILD_STORAGE_ENDPOINT", default_value = DEFAULT_STORAGE_ENDPOINT)]
    pub storage_endpoint: String,

    /// Cloud Build API endpoint
    #[arg(long, env = "CDBUILD_BUILD_ENDPOINT", default_value = DEFAULT_BUILD_ENDPOINT)]
    pub build_endpoint: String,

    /// Turn verbose logging on
    #[arg(short, long)]
    pub verbose: bool,
}
