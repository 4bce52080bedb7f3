//! # Signature Engine Entities

use chrono::{DateTime, Utc};
use cms::signed_data::SignedAttributes;
use serde::{Deserialize, Serialize};
use shared_types::{
    CmsSignature, HashAlgorithm, KeyAlgorithm, PublicKey, SigningAlgorithm, X509Certificate,
};

use crate::domain::errors::SignatureError;

/// How to build a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureOptions {
    /// Digest for RSA keys when `algorithm` is unset. EC keys always use the
    /// curve-matched digest.
    pub hash_algorithm: HashAlgorithm,
    /// Explicit algorithm; must be compatible with the certificate key.
    pub algorithm: Option<SigningAlgorithm>,
    /// Leave the document out of the CMS structure. On by default, which is
    /// what document formats embedding signatures expect.
    pub detached: bool,
    /// Intermediate certificates to bundle after the signer.
    pub extra_certificates: Vec<X509Certificate>,
    /// Overrides the signing-time attribute. Defaults to now.
    pub signing_time: Option<DateTime<Utc>>,
    /// Timestamp the signature value after signing.
    pub timestamp: bool,
    /// Single TSA to use instead of the configured failover list.
    pub tsa_url: Option<String>,
}

impl Default for SignatureOptions {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::Sha256,
            algorithm: None,
            detached: true,
            extra_certificates: Vec::new(),
            signing_time: None,
            timestamp: false,
            tsa_url: None,
        }
    }
}

impl SignatureOptions {
    pub fn attached() -> Self {
        Self {
            detached: false,
            ..Default::default()
        }
    }

    pub fn with_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn with_timestamp(mut self, tsa_url: Option<String>) -> Self {
        self.timestamp = true;
        self.tsa_url = tsa_url;
        self
    }

    /// Pick the algorithm for a certificate key.
    pub fn resolve_algorithm(&self, key: &PublicKey) -> Result<SigningAlgorithm, SignatureError> {
        let algorithm = match self.algorithm {
            Some(algorithm) => algorithm,
            None => match key.algorithm {
                KeyAlgorithm::Rsa => match self.hash_algorithm {
                    HashAlgorithm::Sha256 => SigningAlgorithm::RsaPkcs1Sha256,
                    HashAlgorithm::Sha384 => SigningAlgorithm::RsaPkcs1Sha384,
                    HashAlgorithm::Sha512 => SigningAlgorithm::RsaPkcs1Sha512,
                },
                KeyAlgorithm::Ec => SigningAlgorithm::default_for(key.algorithm, key.bits)
                    .ok_or_else(|| {
                        SignatureError::creation(format!("no ECDSA algorithm for P-{}", key.bits))
                    })?,
            },
        };
        if !algorithm.is_compatible_with(key.algorithm, key.bits) {
            return Err(SignatureError::creation(format!(
                "{algorithm} cannot be used with a {}-{} certificate key",
                key.algorithm, key.bits
            )));
        }
        Ok(algorithm)
    }
}

/// Everything needed to finish a signature once the raw signature value
/// exists.
///
/// The signer (local key or HSM) signs [`PreparedSignature::digest`]. The
/// engine then assembles CMS from the prepared attributes, so the value
/// signed and the value encoded are always the same bytes.
#[derive(Debug, Clone)]
pub struct PreparedSignature {
    pub certificate: X509Certificate,
    pub algorithm: SigningAlgorithm,
    pub signing_time: DateTime<Utc>,
    /// Digest of the document.
    pub content_digest: Vec<u8>,
    /// Digest of the DER signed attributes. This is what gets signed.
    pub digest: Vec<u8>,
    pub(crate) signed_attributes: SignedAttributes,
    pub(crate) content: Option<Vec<u8>>,
    pub(crate) extra_certificates: Vec<X509Certificate>,
    pub(crate) timestamp: Option<Option<String>>,
}

impl PreparedSignature {
    pub fn wants_timestamp(&self) -> bool {
        self.timestamp.is_some()
    }
}

/// Where a signature appears in a document. Units are those of the document
/// model; pages are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignaturePlacement {
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SignaturePlacement {
    pub fn new(page: u32, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            page,
            x,
            y,
            width,
            height,
        }
    }

    /// Finite, non-negative origin and a positive extent.
    pub fn validate(&self) -> Result<(), SignatureError> {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.x < 0.0 || self.y < 0.0 {
            return Err(SignatureError::Document(format!(
                "invalid signature position ({}, {})",
                self.x, self.y
            )));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(SignatureError::Document(format!(
                "invalid signature size {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    pub fn overlaps(&self, other: &SignaturePlacement) -> bool {
        self.page == other.page
            && self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

/// What the engine hands the document model to embed.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRequest {
    pub field_name: String,
    pub placement: SignaturePlacement,
    pub cms_der: Vec<u8>,
    /// Common name of the signer, for the visible appearance.
    pub signer_name: String,
    pub signing_time: Option<DateTime<Utc>>,
}

/// What the document model hands back for each embedded signature.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedSignature {
    pub field_name: String,
    pub placement: SignaturePlacement,
    pub cms_der: Vec<u8>,
    /// The document bytes the signature covers.
    pub signed_content: Vec<u8>,
}

/// A parsed signature extracted from a document.
#[derive(Debug, Clone)]
pub struct ExtractedSignature {
    pub field_name: String,
    pub placement: SignaturePlacement,
    pub signature: CmsSignature,
    pub signed_content: Vec<u8>,
}

/// `CN` of a distinguished name string, falling back to the full name.
pub fn common_name(subject: &str) -> String {
    subject
        .split(',')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("CN="))
        .map(str::to_string)
        .unwrap_or_else(|| subject.to_string())
}
