//! # Request/Response Codec
//!
//! Builds `TimeStampReq` values and decodes `TimeStampResp` values and the
//! timestamp tokens they carry.

use crate::domain::asn1::{MessageImprintAsn1, TimeStampReq, TimeStampResp, TstInfo};
use crate::domain::entities::{PkiStatus, TimestampRequest, TimestampRequestOptions};
use crate::domain::errors::TsaError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use cms::signed_data::SignedData;
use der::asn1::{ObjectIdentifier, OctetString, Uint};
use der::{Any, Decode, Encode, Tag, Tagged};
use rand::RngCore;
use shared_crypto::cms as cms_codec;
use shared_types::{oids, HashAlgorithm, MessageImprint, Timestamp};
use spki::AlgorithmIdentifierOwned;
use x509_cert::ext::pkix::name::GeneralName;

/// Decoded `TimeStampResp`.
#[derive(Debug, Clone)]
pub struct DecodedResponse {
    pub status: PkiStatus,
    pub status_text: Vec<String>,
    /// DER `TimeStampToken`, present for granted responses.
    pub token: Option<Vec<u8>>,
}

/// A decoded token: signed-data, `TSTInfo`, and the exact `TSTInfo` bytes
/// the signature covers.
pub struct DecodedToken {
    pub signed_data: SignedData,
    pub tst_info: TstInfo,
    pub tst_info_der: Vec<u8>,
}

/// Build a `TimeStampReq` over a pre-computed digest.
pub fn build_request(
    digest: Vec<u8>,
    options: &TimestampRequestOptions,
) -> Result<TimestampRequest, TsaError> {
    let hash = options.hash_algorithm;
    if digest.len() != hash.output_len() {
        return Err(TsaError::Encoding(format!(
            "{hash} imprint must be {} bytes, got {}",
            hash.output_len(),
            digest.len()
        )));
    }

    let req_policy = options
        .policy_oid
        .as_deref()
        .map(|oid| {
            ObjectIdentifier::new(oid)
                .map_err(|e| TsaError::Encoding(format!("invalid policy OID {oid}: {e}")))
        })
        .transpose()?;

    let nonce = if options.include_nonce {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[0] |= 0x01;
        Some(Uint::new(&bytes)?)
    } else {
        None
    };

    let request = TimeStampReq {
        version: 1,
        message_imprint: imprint_asn1(hash, &digest)?,
        req_policy,
        nonce: nonce.clone(),
        cert_req: options.cert_req,
        extensions: None,
    };

    Ok(TimestampRequest {
        message_imprint: MessageImprint {
            hash_algorithm: hash,
            digest,
        },
        nonce: nonce.map(|n| n.as_bytes().to_vec()),
        policy_oid: options.policy_oid.clone(),
        cert_req: options.cert_req,
        der: request.to_der()?,
    })
}

/// `MessageImprint` with `NULL` hash parameters, which every deployed TSA
/// accepts.
pub fn imprint_asn1(hash: HashAlgorithm, digest: &[u8]) -> Result<MessageImprintAsn1, TsaError> {
    Ok(MessageImprintAsn1 {
        hash_algorithm: AlgorithmIdentifierOwned {
            oid: hash.oid(),
            parameters: Some(Any::null()),
        },
        hashed_message: OctetString::new(digest)?,
    })
}

/// Decode a DER `TimeStampResp`.
pub fn decode_response(der: &[u8]) -> Result<DecodedResponse, TsaError> {
    let response = TimeStampResp::from_der(der)?;
    let token = response
        .time_stamp_token
        .map(|info| info.to_der())
        .transpose()?;
    Ok(DecodedResponse {
        status: PkiStatus::from_code(response.status.status),
        status_text: response.status.status_string.unwrap_or_default(),
        token,
    })
}

/// Decode a `TimeStampToken` down to its `TSTInfo`.
pub fn decode_token(token_der: &[u8]) -> Result<DecodedToken, TsaError> {
    let signed_data = cms_codec::decode_signed_data(token_der)?;
    if signed_data.encap_content_info.econtent_type != oids::ID_CT_TST_INFO {
        return Err(TsaError::Encoding(format!(
            "token content type {} is not id-ct-TSTInfo",
            signed_data.encap_content_info.econtent_type
        )));
    }
    let tst_info_der = cms_codec::encapsulated_content(&signed_data)?
        .ok_or_else(|| TsaError::Encoding("token carries no TSTInfo".into()))?;
    let tst_info = TstInfo::from_der(&tst_info_der)?;
    Ok(DecodedToken {
        signed_data,
        tst_info,
        tst_info_der,
    })
}

/// Parse a `TimeStampToken` into a [`Timestamp`].
pub fn parse_timestamp_token(token_der: &[u8], tsa_url: Option<&str>) -> Result<Timestamp, TsaError> {
    let decoded = decode_token(token_der)?;
    let tst = &decoded.tst_info;

    let hash_algorithm = HashAlgorithm::from_oid(&tst.message_imprint.hash_algorithm.oid)
        .ok_or_else(|| {
            TsaError::Encoding(format!(
                "unsupported imprint hash {}",
                tst.message_imprint.hash_algorithm.oid
            ))
        })?;

    let certificates = cms_codec::embedded_certificates(&decoded.signed_data)?;
    let signer = cms_codec::first_signer(&decoded.signed_data)?;
    let tsa_certificate = cms_codec::find_signer_certificate(signer, &certificates).cloned();

    let tsa_name = match (&tst.tsa, &tsa_certificate) {
        (Some(GeneralName::DirectoryName(name)), _) => name.to_string(),
        (_, Some(cert)) => cert.subject.clone(),
        _ => tsa_url.unwrap_or("unknown TSA").to_string(),
    };

    Ok(Timestamp {
        tsa_name,
        tsa_url: tsa_url.map(str::to_string),
        issued_at: parse_gen_time(&tst.gen_time)?,
        serial_number: tst.serial_number.as_bytes().to_vec(),
        policy_oid: tst.policy.to_string(),
        nonce: tst.nonce.as_ref().map(|n| n.as_bytes().to_vec()),
        message_imprint: MessageImprint {
            hash_algorithm,
            digest: tst.message_imprint.hashed_message.as_bytes().to_vec(),
        },
        tsa_certificate,
        signature: signer.signature.as_bytes().to_vec(),
        token_der: token_der.to_vec(),
    })
}

/// Parse `genTime`, accepting fractional seconds.
pub fn parse_gen_time(value: &Any) -> Result<DateTime<Utc>, TsaError> {
    if value.tag() != Tag::GeneralizedTime {
        return Err(TsaError::Encoding(format!(
            "genTime has tag {}, expected GeneralizedTime",
            value.tag()
        )));
    }
    let text = std::str::from_utf8(value.value())
        .map_err(|_| TsaError::Encoding("genTime is not ASCII".into()))?;
    let text = text
        .strip_suffix('Z')
        .ok_or_else(|| TsaError::Encoding(format!("genTime {text} is not UTC")))?;
    let naive = NaiveDateTime::parse_from_str(text, "%Y%m%d%H%M%S%.f")
        .map_err(|e| TsaError::Encoding(format!("genTime {text}: {e}")))?;
    Ok(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::asn1::GeneralizedTime;

    #[test]
    fn test_request_includes_nonce_and_cert_req_by_default() {
        let digest = vec![0x11; 32];
        let request = build_request(digest.clone(), &TimestampRequestOptions::default()).unwrap();
        let decoded = TimeStampReq::from_der(&request.der).unwrap();

        assert_eq!(decoded.version, 1);
        assert!(decoded.cert_req);
        assert!(decoded.nonce.is_some());
        assert_eq!(
            decoded.nonce.unwrap().as_bytes(),
            request.nonce.as_deref().unwrap()
        );
        assert_eq!(decoded.message_imprint.hashed_message.as_bytes(), &digest[..]);
        assert_eq!(decoded.message_imprint.hash_algorithm.oid, oids::ID_SHA256);
    }

    #[test]
    fn test_request_without_nonce_and_with_policy() {
        let options = TimestampRequestOptions {
            hash_algorithm: HashAlgorithm::Sha512,
            include_nonce: false,
            policy_oid: Some("1.3.6.1.4.1.4146.2.3".into()),
            cert_req: false,
        };
        let request = build_request(vec![0u8; 64], &options).unwrap();
        let decoded = TimeStampReq::from_der(&request.der).unwrap();
        assert!(decoded.nonce.is_none());
        assert!(!decoded.cert_req);
        assert_eq!(decoded.req_policy.unwrap().to_string(), "1.3.6.1.4.1.4146.2.3");
    }

    #[test]
    fn test_nonces_differ_between_requests() {
        let a = build_request(vec![0u8; 32], &TimestampRequestOptions::default()).unwrap();
        let b = build_request(vec![0u8; 32], &TimestampRequestOptions::default()).unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_wrong_digest_length_rejected() {
        let err = build_request(vec![0u8; 20], &TimestampRequestOptions::default()).unwrap_err();
        assert!(matches!(err, TsaError::Encoding(_)));
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let options = TimestampRequestOptions {
            policy_oid: Some("not-an-oid".into()),
            ..Default::default()
        };
        assert!(build_request(vec![0u8; 32], &options).is_err());
    }

    #[test]
    fn test_gen_time_with_and_without_fraction() {
        let whole = Any::new(Tag::GeneralizedTime, b"20260115093000Z".to_vec()).unwrap();
        let frac = Any::new(Tag::GeneralizedTime, b"20260115093000.125Z".to_vec()).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 1, 15, 9, 30, 0).unwrap();
        assert_eq!(parse_gen_time(&whole).unwrap(), expected);
        let parsed = parse_gen_time(&frac).unwrap();
        assert_eq!(parsed.timestamp(), expected.timestamp());
        assert_eq!(parsed.timestamp_subsec_millis(), 125);
    }

    #[test]
    fn test_gen_time_from_der_encoder() {
        let time = GeneralizedTime::from_unix_duration(std::time::Duration::from_secs(1_800_000_000))
            .unwrap();
        let any = Any::encode_from(&time).unwrap();
        assert_eq!(parse_gen_time(&any).unwrap().timestamp(), 1_800_000_000);
    }

    #[test]
    fn test_rejection_response_decodes_without_token() {
        let response = TimeStampResp {
            status: crate::domain::asn1::PkiStatusInfo {
                status: 2,
                status_string: Some(vec!["bad alg".into()]),
                fail_info: None,
            },
            time_stamp_token: None,
        };
        let decoded = decode_response(&response.to_der().unwrap()).unwrap();
        assert_eq!(decoded.status, PkiStatus::Rejection);
        assert_eq!(decoded.status_text, vec!["bad alg".to_string()]);
        assert!(decoded.token.is_none());
    }

    #[test]
    fn test_garbage_response_is_encoding_error() {
        assert!(matches!(
            decode_response(&[0x30, 0x03, 0x02, 0x01]),
            Err(TsaError::Encoding(_))
        ));
    }
}
