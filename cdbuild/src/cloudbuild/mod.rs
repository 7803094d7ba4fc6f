pub mod client;
pub mod types;

pub use client::{BuildService, CloudBuildClient};
pub use types::{Build, BuildStatus, BuildStep, Operation, Source, StorageSource};
