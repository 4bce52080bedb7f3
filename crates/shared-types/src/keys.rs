//! # Key Values
//!
//! Public and private key material as encoded bytes plus the algorithm tag
//! and size needed for algorithm negotiation.
//!
//! A `PrivateKey` only ever exists for locally held keys. Hardware-backed
//! keys are addressed through [`crate::HsmKeyReference`] instead.

use crate::errors::CertificateError;
use crate::oids;
use der::asn1::ObjectIdentifier;
use der::{Decode, Encode};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey};
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use spki::SubjectPublicKeyInfoOwned;
use std::fmt;
use zeroize::Zeroizing;

/// Asymmetric key family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa => f.write_str("RSA"),
            KeyAlgorithm::Ec => f.write_str("EC"),
        }
    }
}

/// Public key: algorithm, size in bits, and DER `SubjectPublicKeyInfo`.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub algorithm: KeyAlgorithm,
    pub bits: u32,
    pub der: Vec<u8>,
}

impl PublicKey {
    /// Parse a DER-encoded `SubjectPublicKeyInfo`.
    pub fn from_spki_der(der: &[u8]) -> Result<Self, CertificateError> {
        let spki = SubjectPublicKeyInfoOwned::from_der(der)?;
        let (algorithm, bits) = classify_spki(&spki, der)?;
        Ok(Self {
            algorithm,
            bits,
            der: der.to_vec(),
        })
    }

    /// Parse a PEM `PUBLIC KEY` block.
    pub fn from_pem(pem: &str) -> Result<Self, CertificateError> {
        let (label, der) = der::pem::decode_vec(pem.as_bytes())
            .map_err(|e| CertificateError::InvalidPem(e.to_string()))?;
        if label != "PUBLIC KEY" {
            return Err(CertificateError::InvalidPem(format!(
                "expected PUBLIC KEY, found {label}"
            )));
        }
        Self::from_spki_der(&der)
    }

    /// Curve OID for EC keys.
    pub fn curve(&self) -> Option<ObjectIdentifier> {
        match self.algorithm {
            KeyAlgorithm::Ec => oids::curve_oid(self.bits),
            KeyAlgorithm::Rsa => None,
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("algorithm", &self.algorithm)
            .field("bits", &self.bits)
            .field("der_len", &self.der.len())
            .finish()
    }
}

fn classify_spki(
    spki: &SubjectPublicKeyInfoOwned,
    der: &[u8],
) -> Result<(KeyAlgorithm, u32), CertificateError> {
    let oid = spki.algorithm.oid;
    if oid == oids::RSA_ENCRYPTION {
        let key = rsa::RsaPublicKey::from_public_key_der(der)
            .map_err(|e| CertificateError::Malformed(e.to_string()))?;
        return Ok((KeyAlgorithm::Rsa, key.n().bits() as u32));
    }
    if oid == oids::ID_EC_PUBLIC_KEY {
        let params = spki
            .algorithm
            .parameters
            .as_ref()
            .ok_or_else(|| CertificateError::Malformed("EC key without curve".into()))?;
        let curve = ObjectIdentifier::from_der(&params.to_der()?)?;
        let bits = oids::curve_bits(&curve)
            .ok_or_else(|| CertificateError::UnsupportedCurve(curve.to_string()))?;
        return Ok((KeyAlgorithm::Ec, bits));
    }
    Err(CertificateError::UnsupportedAlgorithm(oid.to_string()))
}

/// Locally held private key as DER PKCS#8 `PrivateKeyInfo`.
///
/// The encoded bytes are zeroized on drop and never printed.
#[derive(Clone)]
pub struct PrivateKey {
    pub algorithm: KeyAlgorithm,
    pub bits: u32,
    der: Zeroizing<Vec<u8>>,
}

impl PrivateKey {
    /// Parse a DER PKCS#8 private key.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CertificateError> {
        let info = pkcs8::PrivateKeyInfo::from_der(der)?;
        let oid = info.algorithm.oid;
        let (algorithm, bits) = if oid == oids::RSA_ENCRYPTION {
            let key = rsa::RsaPrivateKey::from_pkcs8_der(der)
                .map_err(|e| CertificateError::Malformed(e.to_string()))?;
            (KeyAlgorithm::Rsa, key.n().bits() as u32)
        } else if oid == oids::ID_EC_PUBLIC_KEY {
            let curve = info
                .algorithm
                .parameters_oid()
                .map_err(|e| CertificateError::Malformed(e.to_string()))?;
            let bits = oids::curve_bits(&curve)
                .ok_or_else(|| CertificateError::UnsupportedCurve(curve.to_string()))?;
            (KeyAlgorithm::Ec, bits)
        } else {
            return Err(CertificateError::UnsupportedAlgorithm(oid.to_string()));
        };

        Ok(Self {
            algorithm,
            bits,
            der: Zeroizing::new(der.to_vec()),
        })
    }

    /// Parse a PEM `PRIVATE KEY` (PKCS#8) or `RSA PRIVATE KEY` (PKCS#1) block.
    pub fn from_pem(pem: &str) -> Result<Self, CertificateError> {
        let (label, der) = der::pem::decode_vec(pem.as_bytes())
            .map_err(|e| CertificateError::InvalidPem(e.to_string()))?;
        let der = Zeroizing::new(der);
        match label {
            "PRIVATE KEY" => Self::from_pkcs8_der(&der),
            "RSA PRIVATE KEY" => {
                let key = rsa::RsaPrivateKey::from_pkcs1_der(&der)
                    .map_err(|e| CertificateError::Malformed(e.to_string()))?;
                let pkcs8 = key
                    .to_pkcs8_der()
                    .map_err(|e| CertificateError::Malformed(e.to_string()))?;
                Self::from_pkcs8_der(pkcs8.as_bytes())
            }
            other => Err(CertificateError::InvalidPem(format!(
                "unsupported private key label {other}; convert to PKCS#8"
            ))),
        }
    }

    /// DER PKCS#8 encoding.
    pub fn pkcs8_der(&self) -> &[u8] {
        &self.der
    }

    /// PEM `PRIVATE KEY` block.
    pub fn to_pem(&self) -> Result<Zeroizing<String>, CertificateError> {
        der::pem::encode_string("PRIVATE KEY", der::pem::LineEnding::LF, &self.der)
            .map(Zeroizing::new)
            .map_err(|e| CertificateError::InvalidPem(e.to_string()))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("algorithm", &self.algorithm)
            .field("bits", &self.bits)
            .field("der", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_garbage_spki() {
        let err = PublicKey::from_spki_der(&[0x30, 0x03, 0x02, 0x01, 0x00]).unwrap_err();
        assert!(matches!(err, CertificateError::Malformed(_)));
    }

    #[test]
    fn test_rejects_wrong_pem_label() {
        let pem = "-----BEGIN CERTIFICATE-----\nMAA=\n-----END CERTIFICATE-----\n";
        assert!(matches!(
            PublicKey::from_pem(pem),
            Err(CertificateError::InvalidPem(_))
        ));
    }
}
