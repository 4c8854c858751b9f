// src/error.rs

use crate::state_manager::StateError;
use thiserror::Error;

/// Every failure a caller of the download manager can observe.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("could not validate url: {0}")]
    Probe(String),
    #[error("another download is already in progress")]
    Conflict,
    #[error("destination already exists: {0}")]
    DestinationConflict(String),
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("download cancelled")]
    Cancelled,
    #[error("file exceeds the maximum allowed size of {max} bytes ({actual} bytes)")]
    SizeExceeded { actual: u64, max: u64 },
    #[error("state store error: {0}")]
    State(#[from] StateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// Status code the host's web layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            JobError::InvalidUrl(_) | JobError::Probe(_) | JobError::Transfer(_) => 400,
            JobError::Conflict | JobError::DestinationConflict(_) => 409,
            JobError::SizeExceeded { .. } => 413,
            JobError::Cancelled => 499,
            JobError::State(_) | JobError::Io(_) => 500,
        }
    }

    /// Short machine-readable kind, used in logs and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::InvalidUrl(_) => "invalid_url",
            JobError::Probe(_) => "probe_error",
            JobError::Conflict => "conflict",
            JobError::DestinationConflict(_) => "destination_conflict",
            JobError::Transfer(_) => "transfer_error",
            JobError::Cancelled => "cancelled",
            JobError::SizeExceeded { .. } => "size_exceeded",
            JobError::State(_) => "state_error",
            JobError::Io(_) => "io_error",
        }
    }
}

/// Readable one-line cause for a transport failure, including its source chain.
pub(crate) fn transport_cause(e: &reqwest::Error) -> String {
    let what = if e.is_timeout() {
        "timed out"
    } else if e.is_connect() {
        "connection failed"
    } else if e.is_status() {
        "unexpected status"
    } else if e.is_body() || e.is_decode() {
        "response body error"
    } else {
        "request failed"
    };
    match e.status() {
        Some(status) => format!("{what}: HTTP {status}"),
        None => {
            let mut cause = format!("{what}: {e}");
            let mut source = std::error::Error::source(e);
            while let Some(inner) = source {
                cause.push_str(": ");
                cause.push_str(&inner.to_string());
                source = inner.source();
            }
            cause
        }
    }
}
