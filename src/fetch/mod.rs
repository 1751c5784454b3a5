//! Loading raw input bytes from disk or over HTTP.

mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result, bail};
use auth::{ApiKey, UrlParam};
use tracing::{debug, info};

/// How an API key is attached to a download request.
#[derive(Debug, Clone)]
pub enum Credential {
    Header { name: String, key: String },
    QueryParam { name: String, key: String },
}

/// Issues a GET for `url` and returns the body, failing on non-success statuses.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        bail!("GET {url} returned status {status}");
    }
    Ok(resp.bytes().await?.to_vec())
}

/// Loads input data from a local file path or fetches it over HTTP.
#[tracing::instrument(skip(credential), fields(authenticated = credential.is_some()))]
pub async fn load_source(source: &str, credential: Option<&Credential>) -> Result<Vec<u8>> {
    let bytes = if source.starts_with("http") {
        let client = BasicClient::new()?;
        match credential {
            Some(Credential::Header { name, key }) => {
                fetch_bytes(&ApiKey::new(client, name, key)?, source).await?
            }
            Some(Credential::QueryParam { name, key }) => {
                let client = UrlParam {
                    inner: client,
                    param_name: name.clone(),
                    key: key.clone(),
                };
                fetch_bytes(&client, source).await?
            }
            None => fetch_bytes(&client, source).await?,
        }
    } else {
        std::fs::read(source).with_context(|| format!("failed to read {source}"))?
    };
    info!(bytes = bytes.len(), "Source loaded");
    debug!(source, "Load finished");
    Ok(bytes)
}
