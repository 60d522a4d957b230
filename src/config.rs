// src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, time::Duration};
use tracing::{debug, warn};

use crate::parse::{Format, ParseOptions, DEFAULT_NA_VALUES};

pub const ENV_TIMEOUT_SECS: &str = "DATAPLOT_TIMEOUT_SECS";
pub const ENV_MAX_REDIRECTS: &str = "DATAPLOT_MAX_REDIRECTS";
pub const ENV_USER_AGENT: &str = "DATAPLOT_USER_AGENT";

/// Top-level configuration, usually read from a YAML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub fetch: FetchSettings,
    pub retry: RetrySettings,
    pub parse: ParseSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub max_redirects: usize,
    pub user_agent: String,
    /// Extra headers sent with every request, in order.
    pub headers: Vec<(String, String)>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_redirects: 5,
            user_agent: concat!("dataplot/", env!("CARGO_PKG_VERSION")).to_string(),
            headers: Vec::new(),
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub enabled: bool,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: 3,
            initial_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseSettings {
    pub na_values: Vec<String>,
    /// Zero-based header row; `None` means the data has no header.
    pub header_row: Option<usize>,
    pub sheet: Option<String>,
    /// Forces a format instead of detecting it: `csv`, `tsv`, `xlsx`, ...
    pub format: Option<String>,
}

impl Default for ParseSettings {
    fn default() -> Self {
        Self {
            na_values: DEFAULT_NA_VALUES.iter().map(|s| s.to_string()).collect(),
            header_row: Some(0),
            sheet: None,
            format: None,
        }
    }
}

impl ParseSettings {
    pub fn to_options(&self) -> Result<ParseOptions> {
        let format = self
            .format
            .as_deref()
            .map(|f| f.parse::<Format>())
            .transpose()
            .context("invalid parse.format")?;
        Ok(ParseOptions {
            format,
            header_row: self.header_row,
            sheet: self.sheet.clone(),
            na_values: self.na_values.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
}

impl Settings {
    /// Load settings from an optional YAML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => {
                let text = fs::read_to_string(p)
                    .with_context(|| format!("reading config {}", p.display()))?;
                Self::from_yaml(&text).with_context(|| format!("parsing config {}", p.display()))?
            }
            None => Self::default(),
        };
        settings.apply_env();
        debug!(?settings, "loaded settings");
        Ok(settings)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = env::var(ENV_TIMEOUT_SECS) {
            match v.trim().parse() {
                Ok(secs) => self.fetch.timeout_secs = secs,
                Err(_) => warn!(value = %v, "ignoring invalid {}", ENV_TIMEOUT_SECS),
            }
        }
        if let Ok(v) = env::var(ENV_MAX_REDIRECTS) {
            match v.trim().parse() {
                Ok(n) => self.fetch.max_redirects = n,
                Err(_) => warn!(value = %v, "ignoring invalid {}", ENV_MAX_REDIRECTS),
            }
        }
        if let Ok(v) = env::var(ENV_USER_AGENT) {
            if !v.trim().is_empty() {
                self.fetch.user_agent = v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_yaml_keeps_defaults() -> Result<()> {
        let settings = Settings::from_yaml(
            r#"
fetch:
  timeout_secs: 5
  headers:
    - ["Accept", "text/csv"]
parse:
  header_row: 2
  format: tsv
cache:
  enabled: true
"#,
        )?;
        assert_eq!(settings.fetch.timeout(), Duration::from_secs(5));
        assert_eq!(settings.fetch.max_redirects, 5);
        assert_eq!(
            settings.fetch.headers,
            vec![("Accept".to_string(), "text/csv".to_string())]
        );
        assert!(!settings.retry.enabled);
        assert!(settings.cache.enabled);

        let opts = settings.parse.to_options()?;
        assert_eq!(opts.header_row, Some(2));
        assert_eq!(opts.format, Some(Format::Delimited { delimiter: b'\t' }));
        assert!(opts.na_values.iter().any(|v| v == "NA"));
        Ok(())
    }

    #[test]
    fn null_header_row_means_headerless() -> Result<()> {
        let settings = Settings::from_yaml("parse:\n  header_row: null\n")?;
        assert_eq!(settings.parse.header_row, None);
        Ok(())
    }

    #[test]
    fn unknown_format_is_rejected() {
        let settings = Settings::from_yaml("parse:\n  format: parquet\n").unwrap();
        assert!(settings.parse.to_options().is_err());
    }

    #[test]
    fn load_reads_file() -> Result<()> {
        let mut tmp = NamedTempFile::new()?;
        writeln!(tmp, "retry:\n  enabled: true\n  max_retries: 7")?;
        let settings = Settings::load(Some(tmp.path()))?;
        assert!(settings.retry.enabled);
        assert_eq!(settings.retry.max_retries, 7);
        Ok(())
    }

    #[test]
    fn load_missing_file_fails_with_path() {
        let err = Settings::load(Some(Path::new("/nonexistent/dataplot.yaml"))).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/dataplot.yaml"));
    }
}
