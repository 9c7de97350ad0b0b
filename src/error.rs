//! Error types at the boundaries of the adapters and the controller.

use std::path::PathBuf;
use thiserror::Error;

/// Reasons a submit request is refused before any network activity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("no file selected")]
    NoFileSelected,
    #[error("an upload is already in progress")]
    UploadInFlight,
}

#[derive(Debug, Error)]
#[error("cannot use {}: {reason}", path.display())]
pub struct InvalidFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Failures of the one-shot ingestion request.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server rejected upload with {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// A push message that could not be turned into a notification.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("'{status}' message is missing a valid '{field}' field")]
    MissingField { status: String, field: &'static str },
    #[error("unexpected binary frame ({0} bytes)")]
    NonText(usize),
}
