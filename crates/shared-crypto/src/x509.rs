//! Certificate signature verification.

use crate::cms::signing_algorithm_from_identifier;
use crate::signatures::verify_message;
use crate::CryptoError;
use der::Encode;
use shared_types::X509Certificate;

/// Verify that `issuer`'s key signed `certificate`.
pub fn verify_certificate_signature(
    certificate: &X509Certificate,
    issuer: &X509Certificate,
) -> Result<(), CryptoError> {
    let cert = certificate.as_x509();
    let algorithm = signing_algorithm_from_identifier(&cert.signature_algorithm, None)?;
    let tbs = cert.tbs_certificate.to_der()?;
    let signature = cert
        .signature
        .as_bytes()
        .ok_or(CryptoError::InvalidSignatureFormat)?;
    verify_message(&issuer.public_key, &tbs, signature, algorithm)
}
