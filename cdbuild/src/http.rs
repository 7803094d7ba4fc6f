use crate::credentials::AccessToken;
use crate::error::CdbuildError;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failure talking to a Google JSON API.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{url} returned {status}: {message}")]
    Status {
        status: StatusCode,
        url: Url,
        message: String,
        reason: Option<String>,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid endpoint `{0}`")]
    InvalidEndpoint(String),
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Status { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(StatusCode::CONFLICT)
    }

    pub fn is_permission_denied(&self) -> bool {
        self.status() == Some(StatusCode::FORBIDDEN)
    }

    async fn from_response(res: Response) -> Self {
        let status = res.status();
        let url = res.url().clone();
        let body = res.text().await.unwrap_or_default();

        match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => {
                let reason = envelope
                    .error
                    .errors
                    .into_iter()
                    .find_map(|detail| detail.reason)
                    .or(envelope.error.status);
                Self::Status {
                    status,
                    url,
                    message: envelope.error.message,
                    reason,
                }
            }
            Err(_) => Self::Status {
                status,
                url,
                message: body.trim().to_string(),
                reason: None,
            },
        }
    }
}

// {"error": {"code": 404, "message": "...", "status": "NOT_FOUND", "errors": [{"reason": "notFound"}]}}
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: Option<String>,
}

#[async_trait::async_trait]
pub trait RequestBuilderExt {
    /// Send the request, turning any non-2xx response into an [`ApiError`].
    async fn send_and_check(self) -> Result<Response, ApiError>;

    async fn send_and_json<U>(self) -> Result<U, ApiError>
    where
        U: DeserializeOwned;
}

#[async_trait::async_trait]
impl RequestBuilderExt for RequestBuilder {
    async fn send_and_check(self) -> Result<Response, ApiError> {
        let res = self.send().await?;
        if res.status().is_success() {
            Ok(res)
        } else {
            Err(ApiError::from_response(res).await)
        }
    }

    async fn send_and_json<U>(self) -> Result<U, ApiError>
    where
        U: DeserializeOwned,
    {
        let bytes = self.send_and_check().await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

pub fn client_with_authentication(token: &AccessToken) -> Result<reqwest::Client, CdbuildError> {
    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token.secret()))
        .map_err(|_| CdbuildError::Credentials("access token is not a valid header".into()))?;
    bearer.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    Ok(reqwest::Client::builder()
        .default_headers(headers)
        .user_agent(concat!("cdbuild/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(ApiError::from)?)
}

/// Append `segments` to the endpoint path. Each segment is percent-encoded on
/// its own, so object names containing `/` stay a single segment.
pub fn endpoint_url(endpoint: &Url, segments: &[&str]) -> Result<Url, ApiError> {
    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::InvalidEndpoint(endpoint.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub fn parse_endpoint(endpoint: &str) -> Result<Url, ApiError> {
    let url =
        Url::parse(endpoint).map_err(|_| ApiError::InvalidEndpoint(endpoint.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(ApiError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(url)
}
