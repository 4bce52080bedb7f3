//! # ECDSA Signature Encoding
//!
//! CMS carries ECDSA signatures as a DER `Ecdsa-Sig-Value`. Some key
//! custodians (PKCS#11 `CKM_ECDSA`, JOSE-style vault APIs) return the fixed
//! width `r || s` form instead; these helpers convert between the two.

use crate::CryptoError;
use der::asn1::UintRef;
use der::{Decode, Encode, Sequence};

/// `Ecdsa-Sig-Value ::= SEQUENCE { r INTEGER, s INTEGER }`
#[derive(Sequence)]
struct EcdsaSigValue<'a> {
    r: UintRef<'a>,
    s: UintRef<'a>,
}

/// Convert a raw `r || s` signature to DER.
pub fn ecdsa_raw_to_der(raw: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return Err(CryptoError::InvalidSignatureFormat);
    }
    let (r, s) = raw.split_at(raw.len() / 2);
    let value = EcdsaSigValue {
        r: UintRef::new(r)?,
        s: UintRef::new(s)?,
    };
    Ok(value.to_der()?)
}

/// Convert a DER signature to raw `r || s`, each left-padded to `scalar_len`.
pub fn ecdsa_der_to_raw(der: &[u8], scalar_len: usize) -> Result<Vec<u8>, CryptoError> {
    let value = EcdsaSigValue::from_der(der).map_err(|_| CryptoError::InvalidSignatureFormat)?;
    let mut raw = Vec::with_capacity(scalar_len * 2);
    for part in [value.r.as_bytes(), value.s.as_bytes()] {
        if part.len() > scalar_len {
            return Err(CryptoError::InvalidSignatureFormat);
        }
        raw.extend(std::iter::repeat(0u8).take(scalar_len - part.len()));
        raw.extend_from_slice(part);
    }
    Ok(raw)
}

/// Scalar width in bytes for a NIST prime curve.
pub fn scalar_len(curve_bits: u32) -> usize {
    (curve_bits as usize + 7) / 8
}
