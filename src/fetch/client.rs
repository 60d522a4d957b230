// src/fetch/client.rs

use reqwest::{header::CONTENT_TYPE, redirect::Policy, Client};
use std::{error::Error as _, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{DatasetRequest, FetchError, RawPayload};

/// Issues exactly one GET per [`fetch`](HttpFetcher::fetch) call.
///
/// The client is built per request so the request's own timeout and redirect
/// limit apply instead of library defaults.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher;

impl HttpFetcher {
    pub fn new() -> Self {
        Self
    }

    /// Fetch the dataset, aborting as soon as `cancel` fires.
    ///
    /// A cancelled fetch drops the in-flight request and any partial body.
    #[instrument(level = "info", skip(self, request, cancel), fields(url = %request.url()))]
    pub async fn fetch(
        &self,
        request: &DatasetRequest,
        cancel: &CancellationToken,
    ) -> Result<RawPayload, FetchError> {
        let cancelled = || FetchError::Cancelled {
            url: request.url().to_string(),
        };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("fetch cancelled");
                Err(cancelled())
            }
            res = self.send(request) => res,
        }
    }

    async fn send(&self, request: &DatasetRequest) -> Result<RawPayload, FetchError> {
        let url = request.full_url();
        let client = build_client(request)?;

        let mut builder = client.get(url.clone());
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = request.auth_token() {
            builder = builder.bearer_auth(token);
        }

        let start = Instant::now();
        debug!(timeout = ?request.timeout(), max_redirects = request.max_redirects(), "sending request");
        let resp = builder
            .send()
            .await
            .map_err(|e| network_error(request.url(), e))?;

        let status = resp.status();
        let final_url = resp.url().clone();
        if !status.is_success() {
            warn!(status = status.as_u16(), url = %final_url, "non-success status");
            return Err(FetchError::HttpStatus {
                url: final_url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .bytes()
            .await
            .map_err(|e| network_error(request.url(), e))?;

        info!(
            status = status.as_u16(),
            bytes = body.len(),
            content_type = content_type.as_deref().unwrap_or("-"),
            elapsed = ?start.elapsed(),
            "fetched"
        );
        Ok(RawPayload::new(body.to_vec(), content_type, final_url))
    }
}

fn build_client(request: &DatasetRequest) -> Result<Client, FetchError> {
    let redirect = match request.max_redirects() {
        0 => Policy::none(),
        n => Policy::limited(n),
    };
    let mut builder = Client::builder().timeout(request.timeout()).redirect(redirect);
    if let Some(agent) = request.user_agent() {
        builder = builder.user_agent(agent);
    }
    builder.build().map_err(|e| FetchError::InvalidRequest {
        url: request.url().to_string(),
        reason: format!("building HTTP client: {}", e),
    })
}

fn network_error(url: &Url, err: reqwest::Error) -> FetchError {
    let timed_out = err.is_timeout();
    let mut reason = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }
    if err.is_builder() {
        return FetchError::InvalidRequest {
            url: url.to_string(),
            reason,
        };
    }
    FetchError::Network {
        url: url.to_string(),
        timed_out,
        reason,
    }
}
