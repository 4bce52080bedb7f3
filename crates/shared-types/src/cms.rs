//! # CMS Signatures
//!
//! Value model of a CMS/PKCS#7 signed-data signature with a single signer.
//!
//! A `CmsSignature` is created once per signing operation. Embedding a
//! timestamp produces a new value; nothing here is mutated in place.

use crate::algorithms::{HashAlgorithm, SigningAlgorithm};
use crate::certificate::X509Certificate;
use crate::errors::CertificateError;
use crate::timestamp::Timestamp;
use chrono::{DateTime, Utc};

/// A signed or unsigned attribute of a SignerInfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmsAttribute {
    /// Content type OID of the signed content (dotted form).
    ContentType(String),
    /// Digest of the signed content.
    MessageDigest(Vec<u8>),
    SigningTime(DateTime<Utc>),
    /// DER `TimeStampToken` over the signature value.
    SignatureTimeStampToken(Vec<u8>),
    /// Any attribute this model does not interpret; values are raw DER.
    Other { oid: String, values: Vec<Vec<u8>> },
}

/// The single signer of a `CmsSignature`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerInfo {
    pub certificate: X509Certificate,
    pub signed_attributes: Vec<CmsAttribute>,
    pub unsigned_attributes: Vec<CmsAttribute>,
    pub digest_algorithm: HashAlgorithm,
    pub signature_algorithm: SigningAlgorithm,
    pub signature: Vec<u8>,
}

impl SignerInfo {
    /// The signed message-digest attribute.
    pub fn message_digest(&self) -> Option<&[u8]> {
        self.signed_attributes.iter().find_map(|attr| match attr {
            CmsAttribute::MessageDigest(digest) => Some(digest.as_slice()),
            _ => None,
        })
    }

    /// The signed signing-time attribute.
    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        self.signed_attributes.iter().find_map(|attr| match attr {
            CmsAttribute::SigningTime(time) => Some(*time),
            _ => None,
        })
    }

    /// The unsigned signature timestamp token, if embedded.
    pub fn timestamp_token(&self) -> Option<&[u8]> {
        self.unsigned_attributes.iter().find_map(|attr| match attr {
            CmsAttribute::SignatureTimeStampToken(token) => Some(token.as_slice()),
            _ => None,
        })
    }
}

/// A complete CMS signed-data signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmsSignature {
    pub signer_info: SignerInfo,
    /// Certificates bundled for chain verification, signer first.
    pub certificates: Vec<X509Certificate>,
    /// Encapsulated content. `None` for detached signatures.
    pub content: Option<Vec<u8>>,
    pub timestamp: Option<Timestamp>,
    /// DER `ContentInfo` encoding.
    pub der: Vec<u8>,
}

impl CmsSignature {
    /// PEM encoding with the `CMS` label.
    pub fn to_pem(&self) -> Result<String, CertificateError> {
        der::pem::encode_string("CMS", der::pem::LineEnding::LF, &self.der)
            .map_err(|e| CertificateError::InvalidPem(e.to_string()))
    }

    pub fn to_der(&self) -> &[u8] {
        &self.der
    }

    /// Whether the signer certificate is among the bundled certificates.
    pub fn includes_signer_certificate(&self) -> bool {
        self.certificates
            .iter()
            .any(|cert| cert == &self.signer_info.certificate)
    }

    /// Bundled certificates ordered with the signer first.
    pub fn chain(&self) -> Vec<X509Certificate> {
        let mut chain = vec![self.signer_info.certificate.clone()];
        chain.extend(
            self.certificates
                .iter()
                .filter(|cert| *cert != &self.signer_info.certificate)
                .cloned(),
        );
        chain
    }
}
