use thiserror::Error;

use crate::application::transport::NetworkError;

use super::keys::CacheKey;
use super::normalize::RecordError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("unknown endpoint `{0}`")]
    UnknownEndpoint(String),
    #[error("endpoint `{endpoint}` is not a {expected}")]
    WrongEndpointKind {
        endpoint: String,
        expected: &'static str,
    },
    #[error("invalid arguments for `{endpoint}`: {reason}")]
    InvalidArgs { endpoint: String, reason: String },
    #[error("malformed response from `{endpoint}`: {source}")]
    MalformedResponse {
        endpoint: String,
        #[source]
        source: RecordError,
    },
    #[error("no cache entry for `{0}`")]
    MissingEntry(CacheKey),
    #[error("cache entry `{0}` does not hold a collection")]
    NotACollection(CacheKey),
    #[error("push stream for `{0}` is closed")]
    StreamClosed(CacheKey),
    #[error("no async runtime is available to issue requests")]
    NoRuntime,
}

impl CacheError {
    pub fn invalid_args(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgs {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed(endpoint: impl Into<String>, source: RecordError) -> Self {
        Self::MalformedResponse {
            endpoint: endpoint.into(),
            source,
        }
    }
}
