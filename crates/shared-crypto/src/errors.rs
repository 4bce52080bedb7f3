//! Crypto error types.

use shared_types::CertificateError;
use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Signature verification failed
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Signature bytes are not a valid encoding for the algorithm
    #[error("Invalid signature format")]
    InvalidSignatureFormat,

    /// Invalid public key
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Invalid private key
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Digest length does not match the algorithm's hash
    #[error("Invalid digest length: expected {expected}, got {actual}")]
    InvalidDigestLength {
        /// Expected digest length in bytes
        expected: usize,
        /// Actual digest length in bytes
        actual: usize,
    },

    /// Key type or size cannot be used with the algorithm
    #[error("Algorithm {algorithm} is not compatible with {key}")]
    IncompatibleKey {
        /// Requested algorithm
        algorithm: String,
        /// Key description, e.g. `RSA-2048`
        key: String,
    },

    /// Algorithm is recognised but has no local implementation
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Signing operation failed
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// ASN.1 encoding or decoding failed
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Certificate or key material could not be parsed
    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

impl From<der::Error> for CryptoError {
    fn from(err: der::Error) -> Self {
        CryptoError::Encoding(err.to_string())
    }
}
