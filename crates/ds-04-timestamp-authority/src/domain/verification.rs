//! # Token Verification
//!
//! Checks a timestamp against the data it claims to cover. An imprint
//! mismatch is always an error in the verification result.

use crate::domain::codec::{decode_token, parse_gen_time};
use crate::domain::entities::{TimestampRequest, TimestampVerification};
use crate::domain::errors::TsaError;
use shared_crypto::cms as cms_codec;
use shared_crypto::digest;
use shared_types::{oids, HashAlgorithm, Timestamp};

/// Verify `timestamp` against `original_data`.
///
/// Returns `Err` only when the token cannot be decoded at all.
pub fn verify_timestamp(
    timestamp: &Timestamp,
    original_data: &[u8],
) -> Result<TimestampVerification, TsaError> {
    let mut result = TimestampVerification::default();
    let decoded = decode_token(&timestamp.token_der)?;
    let tst = &decoded.tst_info;

    // 1. Imprint: recompute from the data, compare with the token's bytes.
    match HashAlgorithm::from_oid(&tst.message_imprint.hash_algorithm.oid) {
        Some(hash) => {
            let expected = digest(hash, original_data);
            result.imprint_valid = expected == tst.message_imprint.hashed_message.as_bytes();
            if !result.imprint_valid {
                result
                    .errors
                    .push("message imprint mismatch: timestamp does not cover this data".into());
            }
        }
        None => result.errors.push(format!(
            "unsupported imprint hash algorithm {}",
            tst.message_imprint.hash_algorithm.oid
        )),
    }

    // 2. Token signature under the TSA certificate.
    let signer = cms_codec::first_signer(&decoded.signed_data)?;
    let mut certificates = cms_codec::embedded_certificates(&decoded.signed_data)?;
    if let Some(cert) = &timestamp.tsa_certificate {
        certificates.push(cert.clone());
    }

    match cms_codec::find_signer_certificate(signer, &certificates) {
        None => {
            result.warnings.push(
                "TSA certificate not included; token signature not verified".into(),
            );
        }
        Some(cert) => {
            let signed_ok = check_signed_content(signer, &decoded.tst_info_der, &mut result)
                && cms_codec::verify_signer(signer, cert, &[])
                    .map_err(|e| result.errors.push(format!("token signature invalid: {e}")))
                    .is_ok();
            result.signature_valid = Some(signed_ok);

            let issued_at = parse_gen_time(&tst.gen_time)?;
            if !cert.is_valid_at(issued_at) {
                result
                    .errors
                    .push("TSA certificate was not valid at the time of issue".into());
            }
        }
    }

    result.is_valid = result.errors.is_empty();
    Ok(result)
}

/// Check that the signed message-digest attribute covers the `TSTInfo`.
fn check_signed_content(
    signer: &cms::signed_data::SignerInfo,
    tst_info_der: &[u8],
    result: &mut TimestampVerification,
) -> bool {
    let Some(hash) = HashAlgorithm::from_oid(&signer.digest_alg.oid) else {
        result
            .errors
            .push(format!("unsupported token digest {}", signer.digest_alg.oid));
        return false;
    };
    let signed_digest = cms_codec::find_attribute(signer.signed_attrs.as_ref(), oids::ID_MESSAGE_DIGEST)
        .and_then(|value| cms_codec::attribute_octets(value).ok());
    match signed_digest {
        Some(value) if value == digest(hash, tst_info_der) => true,
        Some(_) => {
            result
                .errors
                .push("token message-digest does not match TSTInfo".into());
            false
        }
        None => {
            result
                .errors
                .push("token has no signed message-digest attribute".into());
            false
        }
    }
}

/// A granted response must echo the request's imprint and nonce.
pub fn check_matches_request(
    request: &TimestampRequest,
    timestamp: &Timestamp,
) -> Result<(), TsaError> {
    if timestamp.message_imprint != request.message_imprint {
        return Err(TsaError::Validation(
            "response message imprint does not match the request".into(),
        ));
    }
    if let Some(nonce) = &request.nonce {
        if timestamp.nonce.as_ref() != Some(nonce) {
            return Err(TsaError::Validation(
                "response nonce does not match the request".into(),
            ));
        }
    }
    Ok(())
}
