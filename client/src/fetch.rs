//! Remote API access.

use crate::error::SyncError;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Longest response excerpt kept in an HTTP error message.
const ERROR_BODY_LIMIT: usize = 200;

/// Source of raw endpoint payloads.
///
/// `path` is the request path with `/`-separated segments, as produced by
/// [`stockpile_engine::ApiDescriptor::request_path`]. Returns `None` when
/// the server has no content for the request.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, path: &str, cancel: &CancellationToken)
        -> Result<Option<Value>, SyncError>;
}

/// [`Fetcher`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::Network(format!("invalid base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Network(format!(
                "base URL '{}' cannot carry a path",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            auth_token,
            timeout,
        })
    }

    /// Full URL for a request path. Every segment is percent-encoded.
    pub fn url_for(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
        }
        url
    }

    async fn get(&self, url: Url) -> Result<Option<Value>, SyncError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                message: excerpt(&body),
            });
        }

        if body.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&body).map(Some).map_err(|e| {
            SyncError::InvalidResponse(stockpile_engine::Error::InvalidResponseShape(format!(
                "{} returned invalid JSON: {}",
                url.path(),
                e
            )))
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.timeout)
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let url = self.url_for(path);
        tracing::debug!(url = %url, "Fetching");

        tokio::select! {
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            result = self.get(url) => result,
        }
    }
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}
