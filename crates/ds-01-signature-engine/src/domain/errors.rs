//! # Signature Engine Errors
//!
//! Validation never fails for expected invalidity (expired certificate, bad
//! signature, tampered content); those are reported in the result. These
//! errors cover everything that prevents producing a result at all.

use ds_04_timestamp_authority::TsaError;
use shared_crypto::CryptoError;
use shared_types::CertificateError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// Signing or CMS assembly failed, or the key does not belong to the
    /// certificate.
    #[error("Signature creation failed: {0}")]
    SignatureCreation(String),

    /// The signature cannot be decoded or checked at all.
    #[error("Signature validation failed: {0}")]
    SignatureValidation(String),

    /// Timestamping was requested and failed. No signature is returned.
    #[error("Timestamp server error: {0}")]
    TimestampServer(#[from] TsaError),

    /// Malformed certificate or key material.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// The document assembler rejected an embed or extract call.
    #[error("Document error: {0}")]
    Document(String),
}

impl SignatureError {
    pub fn creation(err: impl std::fmt::Display) -> Self {
        SignatureError::SignatureCreation(err.to_string())
    }

    pub fn validation(err: impl std::fmt::Display) -> Self {
        SignatureError::SignatureValidation(err.to_string())
    }
}

impl From<CryptoError> for SignatureError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Certificate(inner) => SignatureError::Certificate(inner),
            other => SignatureError::SignatureCreation(other.to_string()),
        }
    }
}
