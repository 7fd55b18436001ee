//! Error types for the classification engine.
//!
//! Only [`ClassifyError`] ever reaches a caller of the pipeline. Remote failures
//! are absorbed by the feature provider and show up as an estimated
//! [`FeatureOrigin`](crate::features::FeatureOrigin) instead.

use thiserror::Error;

/// Why a batch could not be classified.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The caller supplied no songs.
    #[error("no songs to classify")]
    EmptyBatch,

    /// The clustering stage failed and the whole batch was aborted.
    #[error("classification failed: {source}")]
    ClassificationFailed {
        #[source]
        source: ClusterError,
    },

    /// A [`CancelToken`](crate::pipeline::CancelToken) was triggered mid-batch.
    #[error("classification cancelled")]
    Cancelled,
}

impl From<ClusterError> for ClassifyError {
    fn from(source: ClusterError) -> Self {
        Self::ClassificationFailed { source }
    }
}

/// Failures of the clusterer itself.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClusterError {
    #[error("cannot cluster an empty set of vectors")]
    EmptyInput,

    #[error("invalid cluster count {k} for {n} vectors")]
    InvalidK { k: usize, n: usize },

    #[error("vector {index} contains a non-finite value")]
    NonFiniteValue { index: usize },

    /// The clusterer's result does not describe `n` points in `k` clusters.
    #[error("malformed clustering: {0}")]
    MalformedOutput(String),

    /// Raised by clusterers other than the built-in k-means.
    #[error("{0}")]
    Other(String),
}

/// Failures talking to the remote metadata source.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    /// The access token was rejected (expired or revoked).
    #[error("remote source denied authorization")]
    Unauthorized,

    #[error("remote source is not configured")]
    NotConfigured,

    #[error("remote source unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected response from remote source: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}
