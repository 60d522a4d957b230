// src/fetch/payload.rs

use std::sync::Arc;
use url::Url;

/// Unparsed response body of one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    body: Arc<[u8]>,
    content_type: Option<String>,
    source: Url,
}

impl RawPayload {
    pub fn new(body: impl Into<Arc<[u8]>>, content_type: Option<String>, source: Url) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.map(|ct| media_type(&ct)).filter(|ct| !ct.is_empty()),
            source,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn shared_body(&self) -> Arc<[u8]> {
        Arc::clone(&self.body)
    }

    /// Lower-cased media type from `Content-Type`, parameters stripped.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Final URL after redirects.
    pub fn source(&self) -> &Url {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// `"text/CSV; charset=utf-8"` → `"text/csv"`
pub fn media_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
