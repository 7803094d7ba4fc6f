use reqwest::{Client, Url};
use serde_json::json;

use crate::cloudbuild::types::{Build, Operation};
use crate::http::{ApiError, RequestBuilderExt, endpoint_url};

/// The Cloud Build operations the pipeline needs.
#[async_trait::async_trait]
pub trait BuildService: Send + Sync {
    async fn create_build(&self, project: &str, build: &Build) -> Result<Operation, ApiError>;

    async fn get_build(&self, project: &str, build_id: &str) -> Result<Build, ApiError>;

    async fn cancel_build(&self, project: &str, build_id: &str) -> Result<Build, ApiError>;
}

/// Cloud Build v1 REST client.
pub struct CloudBuildClient {
    client: Client,
    endpoint: Url,
}

impl CloudBuildClient {
    pub fn new(client: Client, endpoint: Url) -> Self {
        CloudBuildClient { client, endpoint }
    }

    fn builds_url(&self, project: &str, tail: Option<&str>) -> Result<Url, ApiError> {
        match tail {
            Some(tail) => endpoint_url(&self.endpoint, &["v1", "projects", project, "builds", tail]),
            None => endpoint_url(&self.endpoint, &["v1", "projects", project, "builds"]),
        }
    }
}

#[async_trait::async_trait]
impl BuildService for CloudBuildClient {
    async fn create_build(&self, project: &str, build: &Build) -> Result<Operation, ApiError> {
        let url = self.builds_url(project, None)?;
        self.client.post(url).json(build).send_and_json().await
    }

    async fn get_build(&self, project: &str, build_id: &str) -> Result<Build, ApiError> {
        let url = self.builds_url(project, Some(build_id))?;
        self.client.get(url).send_and_json().await
    }

    async fn cancel_build(&self, project: &str, build_id: &str) -> Result<Build, ApiError> {
        let url = self.builds_url(project, Some(&format!("{build_id}:cancel")))?;
        self.client
            .post(url)
            .json(&json!({}))
            .send_and_json()
            .await
    }
}
