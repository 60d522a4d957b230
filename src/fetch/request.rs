// src/fetch/request.rs

use reqwest::header::{HeaderName, HeaderValue};
use std::{
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher},
    time::Duration,
};
use url::Url;

use super::FetchError;
use crate::config::FetchSettings;

/// Identifies one remote dataset and how to retrieve it.
///
/// Constructed through [`DatasetRequest::builder`]; immutable afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct DatasetRequest {
    url: Url,
    query: Vec<(String, String)>,
    auth_token: Option<String>,
    timeout: Duration,
    max_redirects: usize,
    headers: Vec<(String, String)>,
    user_agent: Option<String>,
}

impl DatasetRequest {
    pub fn builder(url: impl Into<String>) -> DatasetRequestBuilder {
        DatasetRequestBuilder::new(url)
    }

    /// The resource URL as given, without the extra query parameters.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// URL with the query parameters appended after any already present.
    pub fn full_url(&self) -> Url {
        let mut url = self.url.clone();
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.query {
                pairs.append_pair(k, v);
            }
        }
        url
    }

    /// Key identifying the fetched resource. The token only contributes a fingerprint.
    pub fn cache_key(&self) -> String {
        match &self.auth_token {
            Some(token) => {
                let mut hasher = DefaultHasher::new();
                token.hash(&mut hasher);
                format!("{}#auth={:016x}", self.full_url(), hasher.finish())
            }
            None => self.full_url().to_string(),
        }
    }
}

impl fmt::Debug for DatasetRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetRequest")
            .field("url", &self.url.as_str())
            .field("query", &self.query)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("max_redirects", &self.max_redirects)
            .field("headers", &self.headers)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DatasetRequestBuilder {
    url: String,
    query: Vec<(String, String)>,
    auth_token: Option<String>,
    timeout: Duration,
    max_redirects: usize,
    headers: Vec<(String, String)>,
    user_agent: Option<String>,
}

impl DatasetRequestBuilder {
    fn new(url: impl Into<String>) -> Self {
        let defaults = FetchSettings::default();
        Self {
            url: url.into(),
            query: Vec::new(),
            auth_token: None,
            timeout: defaults.timeout(),
            max_redirects: defaults.max_redirects,
            headers: Vec::new(),
            user_agent: Some(defaults.user_agent),
        }
    }

    /// Take timeout, redirect limit, user agent and headers from configuration.
    pub fn settings(mut self, settings: &FetchSettings) -> Self {
        self.timeout = settings.timeout();
        self.max_redirects = settings.max_redirects;
        self.user_agent = Some(settings.user_agent.clone());
        self.headers.extend(settings.headers.iter().cloned());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `0` disables redirects; a 3xx response then surfaces as an HTTP status error.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<DatasetRequest, FetchError> {
        let invalid = |reason: String| FetchError::InvalidRequest {
            url: self.url.clone(),
            reason,
        };

        let url = Url::parse(self.url.trim()).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("URL has no host".into()));
        }
        if self.timeout.is_zero() {
            return Err(invalid("timeout must be greater than zero".into()));
        }
        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| invalid(format!("invalid header name {:?}", name)))?;
            HeaderValue::from_str(value)
                .map_err(|_| invalid(format!("invalid value for header {:?}", name)))?;
        }
        if let Some(agent) = &self.user_agent {
            HeaderValue::from_str(agent).map_err(|_| invalid("invalid user agent".into()))?;
        }
        if let Some(token) = &self.auth_token {
            HeaderValue::from_str(token).map_err(|_| invalid("invalid auth token".into()))?;
        }

        Ok(DatasetRequest {
            url,
            query: self.query,
            auth_token: self.auth_token.filter(|t| !t.is_empty()),
            timeout: self.timeout,
            max_redirects: self.max_redirects,
            headers: self.headers,
            user_agent: self.user_agent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_urls_are_rejected() {
        let err = DatasetRequest::builder("data/sales.csv").build().unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest { .. }));
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        let err = DatasetRequest::builder("file:///tmp/sales.csv")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = DatasetRequest::builder("https://example.com/a.csv")
            .timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn bad_header_names_are_rejected() {
        let err = DatasetRequest::builder("https://example.com/a.csv")
            .header("bad header", "x")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("header"));
    }

    #[test]
    fn bad_header_values_are_rejected() {
        let err = DatasetRequest::builder("https://example.com/a.csv")
            .header("X-Note", "line\nbreak")
            .build()
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest { .. }));
        assert!(!err.is_transient());
        assert!(err.to_string().contains("X-Note"));

        let err = DatasetRequest::builder("https://example.com/a.csv")
            .auth_token("abc\r\n")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("auth token"));
        assert!(!err.to_string().contains("abc"));
    }

    #[test]
    fn query_parameters_append_to_existing_ones() {
        let req = DatasetRequest::builder("https://example.com/export?id=7")
            .query("format", "csv")
            .query("sheet", "Q1 2024")
            .build()
            .unwrap();
        assert_eq!(
            req.full_url().as_str(),
            "https://example.com/export?id=7&format=csv&sheet=Q1+2024"
        );
    }

    #[test]
    fn cache_key_fingerprints_token_without_leaking_it() {
        let base = DatasetRequest::builder("https://example.com/a.csv")
            .build()
            .unwrap();
        let with_token = DatasetRequest::builder("https://example.com/a.csv")
            .auth_token("s3cret")
            .build()
            .unwrap();
        let other_token = DatasetRequest::builder("https://example.com/a.csv")
            .auth_token("other")
            .build()
            .unwrap();

        assert_eq!(base.cache_key(), "https://example.com/a.csv");
        assert_ne!(with_token.cache_key(), base.cache_key());
        assert_ne!(with_token.cache_key(), other_token.cache_key());
        assert!(!with_token.cache_key().contains("s3cret"));
        assert!(!format!("{:?}", with_token).contains("s3cret"));
    }

    #[test]
    fn settings_apply_to_builder() {
        let settings = FetchSettings {
            timeout_secs: 3,
            max_redirects: 0,
            user_agent: "probe/1".into(),
            headers: vec![("Accept".into(), "text/csv".into())],
        };
        let req = DatasetRequest::builder("http://localhost:8080/a.csv")
            .settings(&settings)
            .build()
            .unwrap();
        assert_eq!(req.timeout(), Duration::from_secs(3));
        assert_eq!(req.max_redirects(), 0);
        assert_eq!(req.user_agent(), Some("probe/1"));
        assert_eq!(req.headers().len(), 1);
    }
}
