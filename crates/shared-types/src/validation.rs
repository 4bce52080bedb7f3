//! # Validation Reports
//!
//! Derived verdicts. These are recomputed from a signature and a set of
//! trust anchors whenever needed and are never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of certificate chain validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateValidationResult {
    pub is_valid: bool,
    /// Every link's issuer/subject and signature checks passed.
    pub chain_valid: bool,
    /// The leaf validity window contains the validation time.
    pub not_expired: bool,
    /// The chain ends at, or is issued by, a supplied trust anchor.
    pub trusted_root: bool,
    /// `None` when revocation was not checked.
    pub not_revoked: Option<bool>,
    pub chain_length: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl CertificateValidationResult {
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Outcome of signature validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureValidationResult {
    pub is_valid: bool,
    /// The document digest matches the signed message-digest attribute.
    pub document_integrity_valid: bool,
    /// The SignerInfo signature verifies under the signer's public key.
    pub signature_valid: bool,
    pub certificate: CertificateValidationResult,
    /// `None` when no timestamp is embedded.
    pub timestamp_valid: Option<bool>,
    pub signer_subject: Option<String>,
    pub signing_time: Option<DateTime<Utc>>,
    pub timestamp_time: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SignatureValidationResult {
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}
