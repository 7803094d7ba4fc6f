//! Ambient OAuth2 access tokens.
//!
//! Nothing is read from the command line. Sources are tried in order: the
//! token environment variables, the GCE metadata server, then the `gcloud`
//! CLI of the logged-in user.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;
use tokio::process::Command;

use crate::error::CdbuildError;

pub const TOKEN_ENV_VARS: [&str; 2] = ["CDBUILD_ACCESS_TOKEN", "GOOGLE_OAUTH_ACCESS_TOKEN"];

static METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
}

pub async fn ambient_token() -> Result<AccessToken, CdbuildError> {
    if let Some(token) = token_from_env() {
        tracing::debug!("Using access token from the environment");
        return Ok(token);
    }

    match token_from_metadata_server().await {
        Ok(token) => {
            tracing::debug!("Using access token from the metadata server");
            return Ok(token);
        }
        Err(err) => tracing::debug!("Metadata server unavailable: {err:#}"),
    }

    match token_from_gcloud().await {
        Ok(token) => {
            tracing::debug!("Using access token from gcloud");
            Ok(token)
        }
        Err(err) => Err(CdbuildError::Credentials(format!(
            "no ambient credentials found (set {} or run `gcloud auth login`): {err:#}",
            TOKEN_ENV_VARS[0]
        ))),
    }
}

fn token_from_env() -> Option<AccessToken> {
    TOKEN_ENV_VARS.iter().find_map(|key| {
        std::env::var(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(AccessToken::new)
    })
}

async fn token_from_metadata_server() -> anyhow::Result<AccessToken> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(500))
        .timeout(Duration::from_secs(3))
        .build()?;
    let token = client
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await?
        .error_for_status()?
        .json::<MetadataToken>()
        .await
        .context("Failed to deserialize metadata token")?;
    Ok(AccessToken::new(token.access_token))
}

async fn token_from_gcloud() -> anyhow::Result<AccessToken> {
    let output = Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .await
        .context("Failed to run `gcloud auth print-access-token`")?;
    if !output.status.success() {
        bail!(
            "gcloud exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    let token = String::from_utf8(output.stdout)?.trim().to_string();
    if token.is_empty() {
        bail!("gcloud printed an empty access token");
    }
    Ok(AccessToken::new(token))
}
