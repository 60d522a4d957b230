// src/fetch/mod.rs

//! Retrieval of a single dataset resource over HTTP(S).
//!
//! [`HttpFetcher::fetch`] performs exactly one request per call. Retrying
//! ([`retry::fetch_with_retry`]) and de-duplicating concurrent fetches
//! ([`cache::PayloadCache`]) are opt-in wrappers owned by the caller.

pub mod cache;
pub mod client;
pub mod payload;
pub mod request;
pub mod retry;

pub use cache::PayloadCache;
pub use client::HttpFetcher;
pub use payload::RawPayload;
pub use request::{DatasetRequest, DatasetRequestBuilder};
pub use retry::{fetch_with_retry, RetryPolicy};

use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("invalid dataset request {url:?}: {reason}")]
    InvalidRequest { url: String, reason: String },

    #[error("network error fetching {url}: {reason}")]
    Network {
        url: String,
        timed_out: bool,
        reason: String,
    },

    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("fetch of {url} was cancelled")]
    Cancelled { url: String },
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            FetchError::Network { .. } => ErrorKind::NetworkError,
            FetchError::HttpStatus { .. } => ErrorKind::HttpStatusError,
            FetchError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    pub fn url(&self) -> &str {
        match self {
            FetchError::InvalidRequest { url, .. }
            | FetchError::Network { url, .. }
            | FetchError::HttpStatus { url, .. }
            | FetchError::Cancelled { url } => url,
        }
    }
}
