//! # Signature Validation
//!
//! A signature is valid iff the content digest matches the signed
//! message-digest, the SignerInfo signature verifies, the certificate chain
//! is valid, and any embedded timestamp verifies. Each failing check adds
//! its own error; missing optional evidence adds a warning.

use chrono::{DateTime, Utc};
use ds_04_timestamp_authority::domain::verification::verify_timestamp;
use shared_crypto::cms as cms_codec;
use shared_crypto::digest;
use shared_types::{CmsSignature, SignatureValidationResult, X509Certificate};
use tracing::debug;

use crate::domain::chain::{build_chain, validate_certificate_chain};
use crate::domain::cms::decode;
use crate::domain::errors::SignatureError;

pub const NO_TIMESTAMP: &str = "no timestamp present; signing time is self-asserted";

/// Validate `signature` over `content`, or over its encapsulated content
/// when `content` is `None`.
///
/// Fails only when the CMS structure itself cannot be decoded.
pub fn validate_signature(
    signature: &CmsSignature,
    content: Option<&[u8]>,
    trust_anchors: &[X509Certificate],
    at: DateTime<Utc>,
) -> Result<SignatureValidationResult, SignatureError> {
    let signer = &signature.signer_info;
    let mut result = SignatureValidationResult {
        signer_subject: Some(signer.certificate.subject.clone()),
        signing_time: signer.signing_time(),
        ..Default::default()
    };

    // Integrity
    let content_digest = match content.or(signature.content.as_deref()) {
        Some(bytes) => {
            let computed = digest(signer.digest_algorithm, bytes);
            match signer.message_digest() {
                Some(signed) if signed == computed.as_slice() => {
                    result.document_integrity_valid = true;
                }
                Some(_) => result.error("document digest does not match the signed message digest"),
                None => result.error("signature has no message-digest attribute"),
            }
            computed
        }
        None => {
            result.error("detached signature: original document required to check integrity");
            Vec::new()
        }
    };

    // SignerInfo signature over the exact encoded attributes
    let signed_data = decode(&signature.der)?;
    let signer_asn1 = cms_codec::first_signer(&signed_data).map_err(SignatureError::validation)?;
    match cms_codec::verify_signer(signer_asn1, &signer.certificate, &content_digest) {
        Ok(_) => result.signature_valid = true,
        Err(e) => result.error(format!("signature value invalid: {e}")),
    }

    // Certificate chain
    let pool: Vec<X509Certificate> = signature
        .certificates
        .iter()
        .chain(trust_anchors.iter())
        .cloned()
        .collect();
    result.certificate = match build_chain(&signer.certificate, &pool) {
        Ok(chain) => validate_certificate_chain(&without_anchor_duplicates(chain, trust_anchors), trust_anchors, at),
        Err(e) => {
            let mut failed = validate_certificate_chain(&[signer.certificate.clone()], trust_anchors, at);
            failed.error(e.to_string());
            failed.is_valid = false;
            failed
        }
    };
    for error in &result.certificate.errors {
        result.errors.push(format!("certificate: {error}"));
    }
    for warning in &result.certificate.warnings {
        result.warnings.push(format!("certificate: {warning}"));
    }

    // Timestamp over the signature value
    match (&signature.timestamp, signer.timestamp_token()) {
        (Some(timestamp), _) => {
            result.timestamp_time = Some(timestamp.issued_at);
            match verify_timestamp(timestamp, &signer.signature) {
                Ok(check) => {
                    result.timestamp_valid = Some(check.is_valid);
                    for error in check.errors {
                        result.errors.push(format!("timestamp: {error}"));
                    }
                    for warning in check.warnings {
                        result.warnings.push(format!("timestamp: {warning}"));
                    }
                }
                Err(e) => {
                    result.timestamp_valid = Some(false);
                    result.error(format!("timestamp: {e}"));
                }
            }
        }
        (None, Some(_)) => {
            result.timestamp_valid = Some(false);
            result.error("timestamp: embedded token cannot be decoded");
        }
        (None, None) => result.warn(NO_TIMESTAMP),
    }

    result.is_valid = result.document_integrity_valid
        && result.signature_valid
        && result.certificate.is_valid
        && result.timestamp_valid != Some(false);

    debug!(
        signer = %signer.certificate.subject,
        valid = result.is_valid,
        integrity = result.document_integrity_valid,
        chain = result.certificate.is_valid,
        "Signature validated"
    );
    Ok(result)
}

/// When the chain was completed from the anchor set, keep the anchor as the
/// chain's last element only once.
fn without_anchor_duplicates(
    mut chain: Vec<X509Certificate>,
    trust_anchors: &[X509Certificate],
) -> Vec<X509Certificate> {
    if let Some(position) = chain.iter().position(|c| trust_anchors.contains(c)) {
        chain.truncate(position + 1);
    }
    chain
}
