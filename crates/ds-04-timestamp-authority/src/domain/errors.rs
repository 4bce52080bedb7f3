//! # TSA Errors
//!
//! Every failure of the timestamp protocol layer maps to one of these.

use shared_crypto::CryptoError;
use thiserror::Error;

/// Timestamp authority errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TsaError {
    /// The TSA could not be reached, the HTTP exchange failed, or the call
    /// timed out.
    #[error("TSA connection error ({url}): {message}")]
    Connection { url: String, message: String },

    /// The TSA answered with a status other than granted or
    /// granted-with-mods.
    #[error("TSA {url} returned status {status}: {message}")]
    Response {
        url: String,
        status: u32,
        message: String,
    },

    /// The token does not match the request or cannot be verified.
    #[error("Timestamp validation failed: {0}")]
    Validation(String),

    /// Request or response could not be encoded or decoded.
    #[error("Timestamp encoding error: {0}")]
    Encoding(String),

    /// A failover configuration without any server.
    #[error("No timestamp servers configured")]
    NoServers,
}

impl TsaError {
    pub fn connection(url: &str, message: impl Into<String>) -> Self {
        TsaError::Connection {
            url: url.to_string(),
            message: message.into(),
        }
    }

    /// The PKI status code carried by a protocol rejection.
    pub fn status(&self) -> Option<u32> {
        match self {
            TsaError::Response { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<der::Error> for TsaError {
    fn from(err: der::Error) -> Self {
        TsaError::Encoding(err.to_string())
    }
}

impl From<CryptoError> for TsaError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Encoding(msg) => TsaError::Encoding(msg),
            other => TsaError::Validation(other.to_string()),
        }
    }
}
