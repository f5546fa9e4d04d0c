//! Error types for log-dict operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("key {key} does not exist in dict {keyspace}")]
    NotFound { keyspace: String, key: String },

    #[error("log unreachable: {0}")]
    Unreachable(String),

    #[error("write to {path} rejected: {reason}")]
    WriteRejected { path: String, reason: String },

    #[error("dict {0} is closed")]
    Closed(String),

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("gRPC status error: {0}")]
    Status(#[from] tonic::Status),
}
