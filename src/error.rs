//! Error types for Esflow.
//!
//! All errors in Esflow are represented by the `EsflowError` enum. The
//! variants map onto where in a node's life the failure happened: input
//! validation, external command execution, or a logical error reported by
//! the remote service after the command itself succeeded.

use std::string::FromUtf8Error;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Esflow operations.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum EsflowError {
    /// Construction-time contract violations. Surfaced synchronously,
    /// never retried, and never preceded by a remote call.
    #[error("{0}")]
    Validation(String),

    /// An external command failed: it could not be spawned or exited
    /// nonzero. Carries the captured diagnostic output.
    #[error("{0}")]
    Execution(String),

    /// The remote call succeeded at the transport level but the service
    /// reported a logical error (malformed document, duplicate resource).
    #[error("{0}")]
    Remote(String),

    /// Data conversion errors (JSON, YAML, base64, UTF-8).
    #[error("{0}")]
    Convert(String),

    /// I/O errors while staging local files.
    #[error("{0}")]
    Io(String),
}

impl From<EsflowError> for String {
    fn from(val: EsflowError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for EsflowError {
    fn from(error: std::io::Error) -> Self {
        EsflowError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for EsflowError {
    fn from(error: serde_json::Error) -> Self {
        EsflowError::Convert(error.to_string())
    }
}

impl From<serde_yaml::Error> for EsflowError {
    fn from(error: serde_yaml::Error) -> Self {
        EsflowError::Convert(error.to_string())
    }
}

impl From<FromUtf8Error> for EsflowError {
    fn from(_: FromUtf8Error) -> Self {
        EsflowError::Convert("Error with utf-8 string convert".to_string())
    }
}
