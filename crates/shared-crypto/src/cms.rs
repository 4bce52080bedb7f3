//! # CMS Codec Helpers
//!
//! Encoding and decoding of CMS signed-data (RFC 5652) shared by document
//! signatures and RFC 3161 timestamp tokens.
//!
//! Only the single-signer, `IssuerAndSerialNumber` form is produced. Parsing
//! accepts any number of signers but callers look at the first.

use crate::hashing::digest;
use crate::signatures::verify_digest;
use crate::CryptoError;
use chrono::{DateTime, TimeZone, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedAttributes, SignedData, SignerIdentifier,
    SignerInfo, SignerInfos, UnsignedAttributes,
};
use der::asn1::{GeneralizedTime, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Any, Decode, Encode};
use sha2::{Sha256, Sha384, Sha512};
use shared_types::{oids, HashAlgorithm, SigningAlgorithm, X509Certificate};
use spki::AlgorithmIdentifierOwned;
use std::time::Duration;
use x509_cert::attr::Attribute;
use x509_cert::time::Time;

/// Inputs for one signed-data structure with a single signer.
pub struct SignedDataParts<'a> {
    /// `eContentType`; `id-data` for documents, `id-ct-TSTInfo` for tokens.
    pub content_type: ObjectIdentifier,
    /// Encapsulated content; `None` produces a detached signature.
    pub content: Option<&'a [u8]>,
    /// Signer certificate.
    pub signer: &'a X509Certificate,
    /// Additional certificates to bundle.
    pub extra_certificates: &'a [X509Certificate],
    /// Signature algorithm used.
    pub algorithm: SigningAlgorithm,
    /// Signed attributes the signature covers.
    pub signed_attributes: SignedAttributes,
    /// Signature value.
    pub signature: &'a [u8],
    /// Optional unsigned attributes.
    pub unsigned_attributes: Option<UnsignedAttributes>,
}

/// Build `content-type`, `signing-time` and `message-digest` signed attributes.
pub fn build_signed_attributes(
    content_type: ObjectIdentifier,
    message_digest: &[u8],
    signing_time: DateTime<Utc>,
) -> Result<SignedAttributes, CryptoError> {
    let attributes = vec![
        attribute(oids::ID_CONTENT_TYPE, Any::encode_from(&content_type)?)?,
        attribute(
            oids::ID_SIGNING_TIME,
            Any::encode_from(&encode_time(signing_time)?)?,
        )?,
        attribute(
            oids::ID_MESSAGE_DIGEST,
            Any::encode_from(&OctetString::new(message_digest)?)?,
        )?,
    ];
    Ok(SetOfVec::try_from(attributes)?)
}

/// Single-valued attribute.
pub fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute, CryptoError> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value])?,
    })
}

/// Digest of the DER `SET OF` encoding of the signed attributes.
///
/// This is the value actually signed.
pub fn signed_attributes_digest(
    attributes: &SignedAttributes,
    hash: HashAlgorithm,
) -> Result<Vec<u8>, CryptoError> {
    Ok(digest(hash, &attributes.to_der()?))
}

/// Encode a complete `ContentInfo { id-signedData, SignedData }`.
pub fn encode_signed_data(parts: SignedDataParts<'_>) -> Result<Vec<u8>, CryptoError> {
    let hash = parts.algorithm.hash_algorithm();
    let digest_alg = digest_algorithm_identifier(hash);

    let econtent = parts
        .content
        .map(|bytes| OctetString::new(bytes).and_then(|octets| Any::encode_from(&octets)))
        .transpose()?;

    let mut certs = vec![CertificateChoices::Certificate(parts.signer.as_x509().clone())];
    for cert in parts.extra_certificates {
        if cert != parts.signer {
            certs.push(CertificateChoices::Certificate(cert.as_x509().clone()));
        }
    }

    let signer_info = SignerInfo {
        version: CmsVersion::V1,
        sid: signer_identifier(parts.signer),
        digest_alg: digest_alg.clone(),
        signed_attrs: Some(parts.signed_attributes),
        signature_algorithm: signature_algorithm_identifier(parts.algorithm)?,
        signature: OctetString::new(parts.signature)?,
        unsigned_attrs: parts.unsigned_attributes,
    };

    let version = if parts.content_type == oids::ID_DATA {
        CmsVersion::V1
    } else {
        CmsVersion::V3
    };

    let signed_data = SignedData {
        version,
        digest_algorithms: SetOfVec::try_from(vec![digest_alg])?,
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: parts.content_type,
            econtent,
        },
        certificates: Some(CertificateSet(SetOfVec::try_from(certs)?)),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info])?),
    };

    encode_content_info(&signed_data)
}

/// Wrap a `SignedData` in its `ContentInfo` and encode.
pub fn encode_content_info(signed_data: &SignedData) -> Result<Vec<u8>, CryptoError> {
    let info = ContentInfo {
        content_type: oids::ID_SIGNED_DATA,
        content: Any::encode_from(signed_data)?,
    };
    Ok(info.to_der()?)
}

/// Decode a `ContentInfo` that must carry signed-data.
pub fn decode_signed_data(der: &[u8]) -> Result<SignedData, CryptoError> {
    let info = ContentInfo::from_der(der)?;
    if info.content_type != oids::ID_SIGNED_DATA {
        return Err(CryptoError::Encoding(format!(
            "expected signed-data content, found {}",
            info.content_type
        )));
    }
    decode_any(&info.content)
}

/// Re-decode an `Any` as a concrete type.
pub fn decode_any<T: for<'a> Decode<'a>>(any: &Any) -> Result<T, CryptoError> {
    Ok(T::from_der(&any.to_der()?)?)
}

/// Encapsulated content bytes, if attached.
pub fn encapsulated_content(signed_data: &SignedData) -> Result<Option<Vec<u8>>, CryptoError> {
    signed_data
        .encap_content_info
        .econtent
        .as_ref()
        .map(|any| decode_any::<OctetString>(any).map(|octets| octets.as_bytes().to_vec()))
        .transpose()
}

/// First signer of a signed-data structure.
pub fn first_signer(signed_data: &SignedData) -> Result<&SignerInfo, CryptoError> {
    signed_data
        .signer_infos
        .0
        .get(0)
        .ok_or_else(|| CryptoError::Encoding("signed-data contains no SignerInfo".into()))
}

/// Certificates bundled in a signed-data structure, in encoded order.
pub fn embedded_certificates(
    signed_data: &SignedData,
) -> Result<Vec<X509Certificate>, CryptoError> {
    let mut certs = Vec::new();
    for choice in signed_data.certificates.iter().flat_map(|set| set.0.iter()) {
        if let CertificateChoices::Certificate(cert) = choice {
            certs.push(X509Certificate::from_der(&cert.to_der()?)?);
        }
    }
    Ok(certs)
}

/// Locate the certificate named by a SignerInfo's `sid`.
pub fn find_signer_certificate<'c>(
    signer: &SignerInfo,
    certificates: &'c [X509Certificate],
) -> Option<&'c X509Certificate> {
    match &signer.sid {
        SignerIdentifier::IssuerAndSerialNumber(sid) => certificates.iter().find(|cert| {
            let tbs = &cert.as_x509().tbs_certificate;
            tbs.issuer == sid.issuer && tbs.serial_number == sid.serial_number
        }),
        SignerIdentifier::SubjectKeyIdentifier(ski) => certificates.iter().find(|cert| {
            cert.extensions
                .iter()
                .any(|ext| ext.oid == "2.5.29.14" && ext.value.ends_with(ski.0.as_bytes()))
        }),
    }
}

/// Values of the first attribute with `oid`.
pub fn find_attribute<'s>(
    attributes: Option<&'s SetOfVec<Attribute>>,
    oid: ObjectIdentifier,
) -> Option<&'s Any> {
    attributes?
        .iter()
        .find(|attr| attr.oid == oid)
        .and_then(|attr| attr.values.get(0))
}

/// Decode an `OCTET STRING` attribute value.
pub fn attribute_octets(value: &Any) -> Result<Vec<u8>, CryptoError> {
    Ok(decode_any::<OctetString>(value)?.as_bytes().to_vec())
}

/// Decode a `Time` attribute value.
pub fn attribute_time(value: &Any) -> Result<DateTime<Utc>, CryptoError> {
    let time = decode_any::<Time>(value)?;
    unix_to_datetime(time.to_unix_duration())
}

/// Resolve the abstract algorithm of a SignerInfo.
pub fn signer_algorithm(signer: &SignerInfo) -> Result<SigningAlgorithm, CryptoError> {
    let hash = HashAlgorithm::from_oid(&signer.digest_alg.oid).ok_or_else(|| {
        CryptoError::UnsupportedAlgorithm(format!("digest {}", signer.digest_alg.oid))
    })?;
    signing_algorithm_from_identifier(&signer.signature_algorithm, Some(hash))
}

/// Resolve a signature `AlgorithmIdentifier`.
///
/// `hash` is used for bare key-type OIDs. RSA-PSS takes its hash from the
/// parameters.
pub fn signing_algorithm_from_identifier(
    identifier: &AlgorithmIdentifierOwned,
    hash: Option<HashAlgorithm>,
) -> Result<SigningAlgorithm, CryptoError> {
    let unsupported = || CryptoError::UnsupportedAlgorithm(identifier.oid.to_string());
    let hash = if identifier.oid == oids::ID_RSASSA_PSS {
        let params = identifier.parameters.as_ref().ok_or_else(unsupported)?;
        let params_der = params.to_der()?;
        let pss = rsa::pkcs1::RsaPssParams::from_der(&params_der)?;
        HashAlgorithm::from_oid(&pss.hash.oid).ok_or_else(unsupported)?
    } else {
        hash.unwrap_or_default()
    };
    SigningAlgorithm::from_oid(&identifier.oid, hash).ok_or_else(unsupported)
}

/// Verify a SignerInfo signature against the signer's certificate.
///
/// With signed attributes present the signature covers their DER `SET OF`
/// encoding; otherwise it covers `content_digest` directly.
pub fn verify_signer(
    signer: &SignerInfo,
    certificate: &X509Certificate,
    content_digest: &[u8],
) -> Result<SigningAlgorithm, CryptoError> {
    let algorithm = signer_algorithm(signer)?;
    let signed_digest = match &signer.signed_attrs {
        Some(attrs) => signed_attributes_digest(attrs, algorithm.hash_algorithm())?,
        None => content_digest.to_vec(),
    };
    verify_digest(
        &certificate.public_key,
        &signed_digest,
        signer.signature.as_bytes(),
        algorithm,
    )?;
    Ok(algorithm)
}

/// Return a copy of `signed_data` whose first signer carries `attribute` as
/// an unsigned attribute, replacing any attribute with the same OID.
pub fn with_unsigned_attribute(
    signed_data: &SignedData,
    new_attribute: Attribute,
) -> Result<SignedData, CryptoError> {
    let mut signers: Vec<SignerInfo> = signed_data.signer_infos.0.iter().cloned().collect();
    let first = signers
        .first_mut()
        .ok_or_else(|| CryptoError::Encoding("signed-data contains no SignerInfo".into()))?;

    let mut unsigned: Vec<Attribute> = first
        .unsigned_attrs
        .iter()
        .flat_map(|attrs| attrs.iter())
        .filter(|attr| attr.oid != new_attribute.oid)
        .cloned()
        .collect();
    unsigned.push(new_attribute);
    first.unsigned_attrs = Some(SetOfVec::try_from(unsigned)?);

    let mut updated = signed_data.clone();
    updated.signer_infos = SignerInfos(SetOfVec::try_from(signers)?);
    Ok(updated)
}

/// `AlgorithmIdentifier` for a digest, parameters absent.
pub fn digest_algorithm_identifier(hash: HashAlgorithm) -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: hash.oid(),
        parameters: None,
    }
}

/// `AlgorithmIdentifier` for a signature algorithm.
pub fn signature_algorithm_identifier(
    algorithm: SigningAlgorithm,
) -> Result<AlgorithmIdentifierOwned, CryptoError> {
    use shared_types::KeyAlgorithm;
    if algorithm.is_pss() {
        let id = match algorithm.hash_algorithm() {
            HashAlgorithm::Sha256 => rsa::pss::get_default_pss_signature_algo_id::<Sha256>(),
            HashAlgorithm::Sha384 => rsa::pss::get_default_pss_signature_algo_id::<Sha384>(),
            HashAlgorithm::Sha512 => rsa::pss::get_default_pss_signature_algo_id::<Sha512>(),
        };
        return id.map_err(|e| CryptoError::Encoding(e.to_string()));
    }
    let parameters = match algorithm.key_algorithm() {
        KeyAlgorithm::Rsa => Some(Any::null()),
        KeyAlgorithm::Ec => None,
    };
    Ok(AlgorithmIdentifierOwned {
        oid: algorithm.oid(),
        parameters,
    })
}

fn signer_identifier(cert: &X509Certificate) -> SignerIdentifier {
    let tbs = &cert.as_x509().tbs_certificate;
    SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
        issuer: tbs.issuer.clone(),
        serial_number: tbs.serial_number.clone(),
    })
}

/// `UTCTime` through 2049, `GeneralizedTime` after.
pub fn encode_time(time: DateTime<Utc>) -> Result<Time, CryptoError> {
    let secs = u64::try_from(time.timestamp())
        .map_err(|_| CryptoError::Encoding("time before 1970".into()))?;
    let date_time = der::DateTime::from_unix_duration(Duration::from_secs(secs))?;
    Ok(match UtcTime::from_date_time(date_time) {
        Ok(utc) => Time::UtcTime(utc),
        Err(_) => Time::GeneralTime(GeneralizedTime::from_date_time(date_time)),
    })
}

/// Convert a duration since the Unix epoch.
pub fn unix_to_datetime(since_epoch: Duration) -> Result<DateTime<Utc>, CryptoError> {
    Utc.timestamp_opt(since_epoch.as_secs() as i64, 0)
        .single()
        .ok_or_else(|| CryptoError::Encoding("time out of range".into()))
}
