use reqwest::header::CONTENT_TYPE;
use reqwest::{Body, Client, Url};
use serde_json::json;

use crate::compressor::ArchiveStream;
use crate::http::{ApiError, RequestBuilderExt, endpoint_url};
use crate::storage::{Bucket, ObjectMeta, ObjectStore};

/// Google Cloud Storage through its JSON API.
pub struct GcsStorage {
    client: Client,
    endpoint: Url,
}

impl GcsStorage {
    pub fn new(client: Client, endpoint: Url) -> Self {
        GcsStorage { client, endpoint }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        endpoint_url(&self.endpoint, segments)
    }
}

#[async_trait::async_trait]
impl ObjectStore for GcsStorage {
    async fn get_bucket(&self, bucket: &str) -> Result<Bucket, ApiError> {
        let url = self.url(&["storage", "v1", "b", bucket])?;
        self.client.get(url).send_and_json().await
    }

    async fn create_bucket(&self, project: &str, bucket: &str) -> Result<Bucket, ApiError> {
        let url = self.url(&["storage", "v1", "b"])?;
        self.client
            .post(url)
            .query(&[("project", project)])
            .json(&json!({ "name": bucket }))
            .send_and_json()
            .await
    }

    async fn upload_stream(
        &self,
        bucket: &str,
        object: &str,
        body: ArchiveStream,
    ) -> Result<ObjectMeta, ApiError> {
        // simple media upload with a chunked body; GCS only creates the object
        // once the request completes
        let url = self.url(&["upload", "storage", "v1", "b", bucket, "o"])?;
        self.client
            .post(url)
            .query(&[("uploadType", "media"), ("name", object)])
            .header(CONTENT_TYPE, "application/gzip")
            .body(Body::wrap_stream(body))
            .send_and_json()
            .await
    }

    async fn delete_object(&self, bucket: &str, object: &str) -> Result<(), ApiError> {
        let url = self.url(&["storage", "v1", "b", bucket, "o", object])?;
        self.client.delete(url).send_and_check().await?;
        Ok(())
    }
}
