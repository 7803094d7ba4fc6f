//! In-process stand-in for the Cloud Storage and Cloud Build JSON APIs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cdbuild::cloudbuild::CloudBuildClient;
use cdbuild::config::Config;
use cdbuild::credentials::AccessToken;
use cdbuild::http::{client_with_authentication, parse_endpoint};
use cdbuild::pipeline::Pipeline;
use cdbuild::poll::PollPolicy;
use cdbuild::storage::GcsStorage;
use serde::Deserialize;
use serde_json::{Value, json};

pub const TEST_TOKEN: &str = "test-token";

#[derive(Default)]
pub struct FakeState {
    pub buckets: HashSet<String>,
    pub objects: HashMap<(String, String), Vec<u8>>,
    /// Every completed upload, kept after the object is deleted.
    pub uploads: Vec<(String, String, Vec<u8>)>,
    pub bucket_creates: usize,
    pub create_bucket_failure: Option<StatusCode>,
    pub submit_failure: Option<StatusCode>,
    pub omit_build_id: bool,
    pub submitted: Vec<Value>,
    /// Statuses handed out by successive polls; the last one repeats.
    pub statuses: VecDeque<&'static str>,
    pub polls: usize,
    pub poll_failure: Option<StatusCode>,
    pub cancelled: Vec<String>,
    pub delete_failure: Option<StatusCode>,
    pub authorizations: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeGoogle {
    state: Arc<Mutex<FakeState>>,
}

#[allow(dead_code)]
impl FakeGoogle {
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn with_statuses(self, statuses: &[&'static str]) -> Self {
        self.state().statuses = statuses.iter().copied().collect();
        self
    }

    pub async fn serve(self) -> SocketAddr {
        let app = Router::new()
            .route("/storage/v1/b", post(create_bucket))
            .route("/storage/v1/b/{bucket}", get(get_bucket))
            .route(
                "/storage/v1/b/{bucket}/o/{object}",
                axum::routing::delete(delete_object),
            )
            .route("/upload/storage/v1/b/{bucket}/o", post(upload_object))
            .route("/v1/projects/{project}/builds", post(create_build))
            .route(
                "/v1/projects/{project}/builds/{build}",
                get(get_build).post(cancel_build),
            )
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

fn api_error(status: StatusCode, reason: &str) -> Response {
    let body = json!({
        "error": {
            "code": status.as_u16(),
            "message": format!("fake {reason}"),
            "errors": [{ "reason": reason }],
        }
    });
    (status, Json(body)).into_response()
}

async fn get_bucket(State(fake): State<FakeGoogle>, UrlPath(bucket): UrlPath<String>) -> Response {
    if fake.state().buckets.contains(&bucket) {
        Json(json!({ "name": bucket, "location": "US" })).into_response()
    } else {
        api_error(StatusCode::NOT_FOUND, "notFound")
    }
}

#[derive(Deserialize)]
struct CreateBucketQuery {
    project: String,
}

#[derive(Deserialize)]
struct CreateBucketBody {
    name: String,
}

async fn create_bucket(
    State(fake): State<FakeGoogle>,
    Query(query): Query<CreateBucketQuery>,
    Json(body): Json<CreateBucketBody>,
) -> Response {
    let mut state = fake.state();
    state.bucket_creates += 1;
    assert!(!query.project.is_empty());
    if let Some(status) = state.create_bucket_failure {
        if status == StatusCode::CONFLICT {
            // another invocation won the race
            state.buckets.insert(body.name.clone());
            return api_error(status, "conflict");
        }
        return api_error(status, "forbidden");
    }
    if !state.buckets.insert(body.name.clone()) {
        return api_error(StatusCode::CONFLICT, "conflict");
    }
    Json(json!({ "name": body.name })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadQuery {
    upload_type: String,
    name: String,
}

async fn upload_object(
    State(fake): State<FakeGoogle>,
    UrlPath(bucket): UrlPath<String>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Response {
    assert_eq!(query.upload_type, "media");
    let mut state = fake.state();
    if !state.buckets.contains(&bucket) {
        return api_error(StatusCode::NOT_FOUND, "notFound");
    }
    state
        .objects
        .insert((bucket.clone(), query.name.clone()), body.to_vec());
    state
        .uploads
        .push((bucket.clone(), query.name.clone(), body.to_vec()));
    Json(json!({
        "bucket": bucket,
        "name": query.name,
        "size": body.len().to_string(),
        "generation": "1",
    }))
    .into_response()
}

async fn delete_object(
    State(fake): State<FakeGoogle>,
    UrlPath((bucket, object)): UrlPath<(String, String)>,
) -> Response {
    let mut state = fake.state();
    if let Some(status) = state.delete_failure {
        return api_error(status, "backendError");
    }
    match state.objects.remove(&(bucket, object)) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => api_error(StatusCode::NOT_FOUND, "notFound"),
    }
}

async fn create_build(
    State(fake): State<FakeGoogle>,
    UrlPath(project): UrlPath<String>,
    headers: HeaderMap,
    Json(build): Json<Value>,
) -> Response {
    let mut state = fake.state();
    if let Some(auth) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        state.authorizations.push(auth.to_string());
    }
    if let Some(status) = state.submit_failure {
        return api_error(status, "accessNotConfigured");
    }
    state.submitted.push(build);

    let build_id = format!("build-{}", state.submitted.len());
    let operation = if state.omit_build_id {
        json!({ "name": format!("operations/build/{project}/{build_id}") })
    } else {
        json!({
            "name": format!("operations/build/{project}/{build_id}"),
            "metadata": {
                "@type": "type.googleapis.com/google.devtools.cloudbuild.v1.BuildOperationMetadata",
                "build": { "id": build_id, "projectId": project, "status": "QUEUED" },
            },
        })
    };
    Json(operation).into_response()
}

async fn get_build(
    State(fake): State<FakeGoogle>,
    UrlPath((project, build_id)): UrlPath<(String, String)>,
) -> Response {
    let mut state = fake.state();
    state.polls += 1;
    if let Some(status) = state.poll_failure {
        return api_error(status, "backendError");
    }
    let status = if state.statuses.len() > 1 {
        state.statuses.pop_front().unwrap_or("SUCCESS")
    } else {
        state.statuses.front().copied().unwrap_or("SUCCESS")
    };
    Json(json!({ "id": build_id, "projectId": project, "status": status })).into_response()
}

async fn cancel_build(
    State(fake): State<FakeGoogle>,
    UrlPath((project, target)): UrlPath<(String, String)>,
) -> Response {
    let Some(build_id) = target.strip_suffix(":cancel") else {
        return api_error(StatusCode::NOT_FOUND, "notFound");
    };
    fake.state().cancelled.push(build_id.to_string());
    Json(json!({ "id": build_id, "projectId": project, "status": "CANCELLED" })).into_response()
}

/// A config pointed at the fake, with fast polling and a private ledger.
#[allow(dead_code)]
pub fn test_config(addr: SocketAddr, source_dir: &Path, ledger_dir: &Path) -> Config {
    let endpoint = format!("http://{addr}");
    let mut config = Config::new("demo", "app");
    config.source_dir = source_dir.to_path_buf();
    config.poll = PollPolicy::fixed(Duration::from_millis(10));
    config.orphan_ledger = Some(ledger_dir.join("orphans.toml"));
    config.storage_endpoint = endpoint.clone();
    config.build_endpoint = endpoint;
    config
}

#[allow(dead_code)]
pub fn test_storage(addr: SocketAddr) -> GcsStorage {
    let client = client_with_authentication(&AccessToken::new(TEST_TOKEN)).unwrap();
    GcsStorage::new(client, parse_endpoint(&format!("http://{addr}")).unwrap())
}

#[allow(dead_code)]
pub fn test_pipeline(config: Config) -> Pipeline {
    let client = client_with_authentication(&AccessToken::new(TEST_TOKEN)).unwrap();
    let storage = GcsStorage::new(
        client.clone(),
        parse_endpoint(&config.storage_endpoint).unwrap(),
    );
    let builds = CloudBuildClient::new(client, parse_endpoint(&config.build_endpoint).unwrap());
    Pipeline::new(config, Arc::new(storage), Arc::new(builds))
}

/// A minimal docker build context.
#[allow(dead_code)]
pub fn write_context(dir: &Path) {
    std::fs::write(dir.join("Dockerfile"), "FROM scratch\nCOPY app /app\n").unwrap();
    std::fs::create_dir(dir.join("app")).unwrap();
    std::fs::write(dir.join("app/main.sh"), "echo hello\n").unwrap();
}
