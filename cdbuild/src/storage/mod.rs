use serde::Deserialize;

use crate::compressor::ArchiveStream;
use crate::http::ApiError;

pub mod gcs;

pub use gcs::GcsStorage;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub bucket: String,
    pub name: String,
}

/// The object storage operations the pipeline needs.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_bucket(&self, bucket: &str) -> Result<Bucket, ApiError>;

    async fn create_bucket(&self, project: &str, bucket: &str) -> Result<Bucket, ApiError>;

    /// Stream `body` into `bucket/object`.
    ///
    /// The object is only committed once the stream ends cleanly. An `Err`
    /// item aborts the request and nothing is written.
    async fn upload_stream(
        &self,
        bucket: &str,
        object: &str,
        body: ArchiveStream,
    ) -> Result<ObjectMeta, ApiError>;

    async fn delete_object(&self, bucket: &str, object: &str) -> Result<(), ApiError>;
}
