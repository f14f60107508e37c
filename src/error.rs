//! Error types surfaced by the SDK.
//!
//! Record validation failures for spans, events and logs are returned to
//! the caller; metric validation failures are logged and the metric is
//! dropped. Configuration problems surface at construction, everything
//! discovered during harvest or delivery is logged through the configured
//! sinks and never blocks producers.

use thiserror::Error;

/// A record was rejected at the entry point.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("span id must be set")]
    SpanIdUnset,
    #[error("trace id must be set")]
    TraceIdUnset,
    #[error("eventType must be set")]
    EventTypeUnset,
    #[error("log message must be set")]
    LogMessageUnset,
}

/// Invalid harvester or request-factory configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("api key must be specified (one of insert_key, license_key, or no_default_key)")]
    ApiKeyMissing,
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("api key is not a valid header value")]
    InvalidApiKey,
    #[error("user agent is not a valid header value")]
    InvalidUserAgent,
}

/// Request assembly failed.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("failed to compress payload: {0}")]
    Compression(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Request splitting failed.
#[derive(Debug, Error)]
pub enum SplitError {
    /// A minimum-indivisible payload still exceeds the size bound.
    #[error("unable to split large payload further")]
    UnableToSplit,
    #[error(transparent)]
    Request(#[from] RequestError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(RecordError::SpanIdUnset.to_string(), "span id must be set");
        assert_eq!(
            SplitError::UnableToSplit.to_string(),
            "unable to split large payload further"
        );
        assert!(ConfigError::ApiKeyMissing.to_string().contains("api key"));
    }

    #[test]
    fn test_request_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = RequestError::from(io);
        assert!(err.to_string().contains("compress"));
    }
}
