//! Typed failures raised while downloading prices for a single instrument.

use thiserror::Error;

/// A failed download for one instrument.
///
/// These never escape a run. The orchestrator records them against the
/// instrument they belong to and moves on to the next one.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("No ticker symbol for {instrument}")]
    MissingSymbol { instrument: String },

    #[error("Request error: {source} for {instrument}")]
    Request {
        instrument: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error: {status} for {instrument}")]
    HttpStatus {
        instrument: String,
        status: reqwest::StatusCode,
    },

    #[error("Request timed out for {instrument}")]
    Timeout { instrument: String },

    #[error("Download cancelled for {instrument}")]
    Cancelled { instrument: String },

    #[error("Failed to parse response for {instrument}: {message}")]
    Parse { instrument: String, message: String },

    #[error("{provider} does not support {operation}")]
    NotSupported {
        instrument: String,
        provider: String,
        operation: &'static str,
    },

    #[error("No connection available: {connection}")]
    ConnectionUnavailable {
        instrument: String,
        connection: String,
    },
}

impl DownloadError {
    /// Name of the instrument or currency the failure belongs to.
    pub fn instrument(&self) -> &str {
        match self {
            Self::MissingSymbol { instrument }
            | Self::Request { instrument, .. }
            | Self::HttpStatus { instrument, .. }
            | Self::Timeout { instrument }
            | Self::Cancelled { instrument }
            | Self::Parse { instrument, .. }
            | Self::NotSupported { instrument, .. }
            | Self::ConnectionUnavailable { instrument, .. } => instrument,
        }
    }

    pub(crate) fn from_request(instrument: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                instrument: instrument.to_string(),
            }
        } else {
            Self::Request {
                instrument: instrument.to_string(),
                source,
            }
        }
    }

    pub(crate) fn parse(instrument: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            instrument: instrument.to_string(),
            message: message.into(),
        }
    }
}
