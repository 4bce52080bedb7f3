//! # Error Types
//!
//! Errors raised while parsing certificate and key material.

use thiserror::Error;

/// Malformed or unparsable certificate/key material.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CertificateError {
    /// DER structure could not be decoded.
    #[error("Malformed certificate data: {0}")]
    Malformed(String),

    /// PEM armor is missing, has the wrong label, or contains no blocks.
    #[error("Invalid PEM: {0}")]
    InvalidPem(String),

    /// Key or signature algorithm is not RSA or EC.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Elliptic curve is not one of P-256, P-384, P-521.
    #[error("Unsupported curve: {0}")]
    UnsupportedCurve(String),

    /// Chain building exceeded the link limit or looped.
    #[error("Certificate chain too long or cyclic (limit {limit})")]
    ChainTooLong { limit: usize },
}

impl From<der::Error> for CertificateError {
    fn from(err: der::Error) -> Self {
        CertificateError::Malformed(err.to_string())
    }
}
