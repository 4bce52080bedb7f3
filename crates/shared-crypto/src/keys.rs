//! # Public Key Construction
//!
//! Builds `SubjectPublicKeyInfo` encodings from the component forms that
//! key custodians report (RSA modulus/exponent, SEC1 EC points).

use crate::CryptoError;
use der::asn1::BitString;
use der::{Any, Encode};
use rsa::pkcs8::EncodePublicKey;
use rsa::{BigUint, RsaPublicKey};
use shared_types::{oids, PublicKey};
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

/// Public key from big-endian RSA modulus and exponent.
pub fn public_key_from_rsa_components(n: &[u8], e: &[u8]) -> Result<PublicKey, CryptoError> {
    let key = RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let der = key
        .to_public_key_der()
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    Ok(PublicKey::from_spki_der(der.as_bytes())?)
}

/// Public key from an uncompressed SEC1 point on a NIST prime curve.
pub fn public_key_from_ec_point(curve_bits: u32, point: &[u8]) -> Result<PublicKey, CryptoError> {
    let curve = oids::curve_oid(curve_bits)
        .ok_or_else(|| CryptoError::InvalidPublicKey(format!("unsupported curve P-{curve_bits}")))?;
    let expected = 1 + 2 * crate::ecdsa::scalar_len(curve_bits);
    if point.len() != expected || point[0] != 0x04 {
        return Err(CryptoError::InvalidPublicKey(format!(
            "expected {expected}-byte uncompressed point"
        )));
    }
    let spki = SubjectPublicKeyInfoOwned {
        algorithm: AlgorithmIdentifierOwned {
            oid: oids::ID_EC_PUBLIC_KEY,
            parameters: Some(Any::encode_from(&curve)?),
        },
        subject_public_key: BitString::from_bytes(point)?,
    };
    Ok(PublicKey::from_spki_der(&spki.to_der()?)?)
}

/// Uncompressed SEC1 point of an EC public key.
pub fn ec_point(public_key: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    use der::Decode;
    let spki = SubjectPublicKeyInfoOwned::from_der(&public_key.der)?;
    spki.subject_public_key
        .as_bytes()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| CryptoError::InvalidPublicKey("unaligned EC point".into()))
}
