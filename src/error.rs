// src/error.rs

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::chart::ChartError;
use crate::fetch::FetchError;
use crate::parse::ParseError;

/// Coarse error classes the presentation layer renders instead of a table/chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    NetworkError,
    HttpStatusError,
    UnsupportedFormatError,
    MalformedDataError,
    EmptyDatasetError,
    UnknownColumnError,
    TypeMismatchError,
    InvalidRequest,
    MissingBinding,
    SheetNotFound,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "NetworkError",
            ErrorKind::HttpStatusError => "HttpStatusError",
            ErrorKind::UnsupportedFormatError => "UnsupportedFormatError",
            ErrorKind::MalformedDataError => "MalformedDataError",
            ErrorKind::EmptyDatasetError => "EmptyDatasetError",
            ErrorKind::UnknownColumnError => "UnknownColumnError",
            ErrorKind::TypeMismatchError => "TypeMismatchError",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::MissingBinding => "MissingBinding",
            ErrorKind::SheetNotFound => "SheetNotFound",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        }
    }

    /// Network failures are the only class worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::NetworkError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any failure of a single import run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Chart(#[from] ChartError),

    #[error("import superseded by a newer import")]
    Superseded,

    #[error("parser task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Fetch(e) => e.kind(),
            PipelineError::Parse(e) => e.kind(),
            PipelineError::Chart(e) => e.kind(),
            PipelineError::Superseded => ErrorKind::Cancelled,
            PipelineError::Join(_) => ErrorKind::Internal,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// What the presentation layer shows in place of a failed import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}
