//! # CMS Assembly and Parsing
//!
//! Signing is split in two so that the raw signature can come from
//! anywhere (local key, cloud KMS, token):
//!
//! ```text
//! prepare_signature ──► digest ──► [signer] ──► signature value
//!                                                     │
//!                      CmsSignature ◄── assemble_signature
//! ```

use chrono::{DateTime, Timelike, Utc};
use cms::signed_data::SignedData;
use der::asn1::{ObjectIdentifier, SetOfVec};
use der::{Any, Decode, Encode};
use ds_04_timestamp_authority::parse_timestamp_token;
use shared_crypto::cms::{self as cms_codec, SignedDataParts};
use shared_crypto::{digest, verify_digest};
use shared_types::{
    oids, CmsAttribute, CmsSignature, HashAlgorithm, SignerInfo, Timestamp, X509Certificate,
};
use tracing::warn;
use x509_cert::attr::Attribute;

use crate::domain::entities::{PreparedSignature, SignatureOptions};
use crate::domain::errors::SignatureError;

/// Hash the document and build the signed attributes.
pub fn prepare_signature(
    document: &[u8],
    certificate: &X509Certificate,
    options: &SignatureOptions,
    now: DateTime<Utc>,
) -> Result<PreparedSignature, SignatureError> {
    let algorithm = options.resolve_algorithm(&certificate.public_key)?;
    let hash = algorithm.hash_algorithm();
    let signing_time = options.signing_time.unwrap_or(now);
    let signing_time = signing_time.with_nanosecond(0).unwrap_or(signing_time);

    let content_digest = digest(hash, document);
    let signed_attributes =
        cms_codec::build_signed_attributes(oids::ID_DATA, &content_digest, signing_time)
            .map_err(SignatureError::creation)?;
    let digest = cms_codec::signed_attributes_digest(&signed_attributes, hash)
        .map_err(SignatureError::creation)?;

    Ok(PreparedSignature {
        certificate: certificate.clone(),
        algorithm,
        signing_time,
        content_digest,
        digest,
        signed_attributes,
        content: (!options.detached).then(|| document.to_vec()),
        extra_certificates: options.extra_certificates.clone(),
        timestamp: options.timestamp.then(|| options.tsa_url.clone()),
    })
}

/// Wrap a raw signature value into CMS signed-data.
///
/// The value must verify under the certificate key over the prepared
/// digest; a signer holding the wrong key fails here, before anything is
/// returned.
pub fn assemble_signature(
    prepared: &PreparedSignature,
    signature_value: &[u8],
) -> Result<CmsSignature, SignatureError> {
    verify_digest(
        &prepared.certificate.public_key,
        &prepared.digest,
        signature_value,
        prepared.algorithm,
    )
    .map_err(|e| {
        SignatureError::creation(format!(
            "signature value does not verify under the certificate key: {e}"
        ))
    })?;

    let der = cms_codec::encode_signed_data(SignedDataParts {
        content_type: oids::ID_DATA,
        content: prepared.content.as_deref(),
        signer: &prepared.certificate,
        extra_certificates: &prepared.extra_certificates,
        algorithm: prepared.algorithm,
        signed_attributes: prepared.signed_attributes.clone(),
        signature: signature_value,
        unsigned_attributes: None,
    })
    .map_err(SignatureError::creation)?;

    parse_cms(&der).map_err(SignatureError::creation)
}

/// Add `timestamp` as the `signatureTimeStampToken` unsigned attribute.
/// Returns a new signature; an existing token is replaced.
pub fn embed_timestamp(
    signature: &CmsSignature,
    timestamp: &Timestamp,
) -> Result<CmsSignature, SignatureError> {
    let signed_data = decode(&signature.der)?;
    let token = Any::from_der(&timestamp.token_der).map_err(SignatureError::creation)?;
    let attribute = cms_codec::attribute(oids::ID_AA_SIGNATURE_TIME_STAMP_TOKEN, token)
        .map_err(SignatureError::creation)?;
    let updated = cms_codec::with_unsigned_attribute(&signed_data, attribute)
        .map_err(SignatureError::creation)?;
    let der = cms_codec::encode_content_info(&updated).map_err(SignatureError::creation)?;

    let mut timestamped = parse_cms(&der)?;
    timestamped.timestamp = Some(timestamp.clone());
    Ok(timestamped)
}

/// Decode a DER or PEM (`CMS`/`PKCS7`) signature.
pub fn parse_cms(bytes: &[u8]) -> Result<CmsSignature, SignatureError> {
    let der = if bytes.starts_with(b"-----BEGIN") {
        let (label, der) = der::pem::decode_vec(bytes)
            .map_err(|e| SignatureError::validation(format!("invalid PEM: {e}")))?;
        if !matches!(label, "CMS" | "PKCS7") {
            return Err(SignatureError::validation(format!(
                "unexpected PEM label {label}"
            )));
        }
        der
    } else {
        bytes.to_vec()
    };

    let signed_data = decode(&der)?;
    let signer = cms_codec::first_signer(&signed_data).map_err(SignatureError::validation)?;
    let certificates =
        cms_codec::embedded_certificates(&signed_data).map_err(SignatureError::validation)?;
    let certificate = cms_codec::find_signer_certificate(signer, &certificates)
        .cloned()
        .ok_or_else(|| {
            SignatureError::validation("signer certificate is not included in the signature")
        })?;

    let digest_algorithm = HashAlgorithm::from_oid(&signer.digest_alg.oid).ok_or_else(|| {
        SignatureError::validation(format!("unsupported digest {}", signer.digest_alg.oid))
    })?;
    let signature_algorithm =
        cms_codec::signer_algorithm(signer).map_err(SignatureError::validation)?;
    let content =
        cms_codec::encapsulated_content(&signed_data).map_err(SignatureError::validation)?;

    let signer_info = SignerInfo {
        certificate,
        signed_attributes: convert_attributes(signer.signed_attrs.as_ref()),
        unsigned_attributes: convert_attributes(signer.unsigned_attrs.as_ref()),
        digest_algorithm,
        signature_algorithm,
        signature: signer.signature.as_bytes().to_vec(),
    };

    let timestamp = signer_info
        .timestamp_token()
        .and_then(|token| match parse_timestamp_token(token, None) {
            Ok(timestamp) => Some(timestamp),
            Err(e) => {
                warn!(error = %e, "Embedded timestamp token cannot be decoded");
                None
            }
        });

    Ok(CmsSignature {
        signer_info,
        certificates,
        content,
        timestamp,
        der,
    })
}

pub(crate) fn decode(der: &[u8]) -> Result<SignedData, SignatureError> {
    cms_codec::decode_signed_data(der).map_err(SignatureError::validation)
}

fn convert_attributes(attributes: Option<&SetOfVec<Attribute>>) -> Vec<CmsAttribute> {
    attributes
        .map(|attrs| attrs.iter().map(convert_attribute).collect())
        .unwrap_or_default()
}

fn convert_attribute(attribute: &Attribute) -> CmsAttribute {
    let value = attribute.values.get(0);
    let oid = attribute.oid;
    let known = value.and_then(|value| {
        if oid == oids::ID_CONTENT_TYPE {
            cms_codec::decode_any::<ObjectIdentifier>(value)
                .ok()
                .map(|ct| CmsAttribute::ContentType(ct.to_string()))
        } else if oid == oids::ID_MESSAGE_DIGEST {
            cms_codec::attribute_octets(value)
                .ok()
                .map(CmsAttribute::MessageDigest)
        } else if oid == oids::ID_SIGNING_TIME {
            cms_codec::attribute_time(value)
                .ok()
                .map(CmsAttribute::SigningTime)
        } else if oid == oids::ID_AA_SIGNATURE_TIME_STAMP_TOKEN {
            value.to_der().ok().map(CmsAttribute::SignatureTimeStampToken)
        } else {
            None
        }
    });
    known.unwrap_or_else(|| CmsAttribute::Other {
        oid: oid.to_string(),
        values: attribute
            .values
            .iter()
            .filter_map(|v| v.to_der().ok())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::test_support::{p256_leaf, rsa_leaf};
    use shared_types::SigningAlgorithm;

    fn sign_locally(prepared: &PreparedSignature, fixture: &shared_crypto::test_support::SignerFixture) -> Vec<u8> {
        fixture
            .key
            .sign_digest(&prepared.digest, prepared.algorithm)
            .unwrap()
    }

    #[test]
    fn test_prepare_then_assemble_detached() {
        let fixture = rsa_leaf();
        let prepared = prepare_signature(
            b"invoice #42",
            &fixture.certificate,
            &SignatureOptions::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(prepared.algorithm, SigningAlgorithm::RsaPkcs1Sha256);

        let signature = assemble_signature(&prepared, &sign_locally(&prepared, fixture)).unwrap();
        assert!(signature.content.is_none());
        assert!(signature.includes_signer_certificate());
        assert_eq!(signature.signer_info.certificate, fixture.certificate);
        assert_eq!(signature.signer_info.message_digest(), Some(&prepared.content_digest[..]));
        assert_eq!(signature.signer_info.signing_time(), Some(prepared.signing_time));
        assert!(signature
            .signer_info
            .signed_attributes
            .contains(&CmsAttribute::ContentType(oids::ID_DATA.to_string())));
    }

    #[test]
    fn test_attached_signature_carries_content() {
        let fixture = p256_leaf();
        let prepared = prepare_signature(
            b"attached body",
            &fixture.certificate,
            &SignatureOptions::attached(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(prepared.algorithm, SigningAlgorithm::EcdsaSha256);
        let signature = assemble_signature(&prepared, &sign_locally(&prepared, fixture)).unwrap();
        assert_eq!(signature.content.as_deref(), Some(&b"attached body"[..]));
    }

    #[test]
    fn test_assemble_rejects_foreign_signature_value() {
        let prepared = prepare_signature(
            b"doc",
            &rsa_leaf().certificate,
            &SignatureOptions::default(),
            Utc::now(),
        )
        .unwrap();
        let foreign = shared_crypto::test_support::rsa_other()
            .sign_digest(&prepared.digest, prepared.algorithm)
            .unwrap();
        assert!(matches!(
            assemble_signature(&prepared, &foreign),
            Err(SignatureError::SignatureCreation(_))
        ));
    }

    #[test]
    fn test_pem_roundtrip() {
        let fixture = p256_leaf();
        let prepared =
            prepare_signature(b"pem", &fixture.certificate, &SignatureOptions::default(), Utc::now())
                .unwrap();
        let signature = assemble_signature(&prepared, &sign_locally(&prepared, fixture)).unwrap();
        let pem = signature.to_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN CMS-----"));
        assert_eq!(parse_cms(pem.as_bytes()).unwrap(), signature);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_cms(b"\x30\x03\x02\x01\x00"),
            Err(SignatureError::SignatureValidation(_))
        ));
        assert!(parse_cms(b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n").is_err());
    }
}
