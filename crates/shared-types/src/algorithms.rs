//! # Algorithms
//!
//! Digest and signing algorithm enumerations.
//!
//! `SigningAlgorithm` is a closed set: RSA PKCS#1 v1.5, RSA-PSS and ECDSA, each
//! crossed with SHA-256/384/512. It is used both as a request parameter and as
//! a compatibility filter against a key's type and size.

use crate::keys::KeyAlgorithm;
use crate::oids;
use der::asn1::ObjectIdentifier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// SHA-2 digest algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// All supported digest algorithms.
    pub const ALL: [HashAlgorithm; 3] = [Self::Sha256, Self::Sha384, Self::Sha512];

    /// Digest output length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Algorithm identifier OID.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::Sha256 => oids::ID_SHA256,
            Self::Sha384 => oids::ID_SHA384,
            Self::Sha512 => oids::ID_SHA512,
        }
    }

    /// Resolve a digest OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.oid() == *oid)
    }

    /// DER `DigestInfo` prefix for PKCS#1 v1.5 padding over a raw digest.
    pub fn digest_info_prefix(&self) -> &'static [u8] {
        match self {
            Self::Sha256 => &[
                0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04,
                0x02, 0x01, 0x05, 0x00, 0x04, 0x20,
            ],
            Self::Sha384 => &[
                0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04,
                0x02, 0x02, 0x05, 0x00, 0x04, 0x30,
            ],
            Self::Sha512 => &[
                0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04,
                0x02, 0x03, 0x05, 0x00, 0x04, 0x40,
            ],
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        };
        f.write_str(name)
    }
}

/// Abstract signing algorithm requested from a local key or an HSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SigningAlgorithm {
    RsaPkcs1Sha256,
    RsaPkcs1Sha384,
    RsaPkcs1Sha512,
    RsaPssSha256,
    RsaPssSha384,
    RsaPssSha512,
    EcdsaSha256,
    EcdsaSha384,
    EcdsaSha512,
}

impl SigningAlgorithm {
    /// Every enum value, in declaration order.
    pub const ALL: [SigningAlgorithm; 9] = [
        Self::RsaPkcs1Sha256,
        Self::RsaPkcs1Sha384,
        Self::RsaPkcs1Sha512,
        Self::RsaPssSha256,
        Self::RsaPssSha384,
        Self::RsaPssSha512,
        Self::EcdsaSha256,
        Self::EcdsaSha384,
        Self::EcdsaSha512,
    ];

    /// Digest algorithm the signature is computed over.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            Self::RsaPkcs1Sha256 | Self::RsaPssSha256 | Self::EcdsaSha256 => HashAlgorithm::Sha256,
            Self::RsaPkcs1Sha384 | Self::RsaPssSha384 | Self::EcdsaSha384 => HashAlgorithm::Sha384,
            Self::RsaPkcs1Sha512 | Self::RsaPssSha512 | Self::EcdsaSha512 => HashAlgorithm::Sha512,
        }
    }

    /// Key type this algorithm requires.
    pub fn key_algorithm(&self) -> KeyAlgorithm {
        match self {
            Self::EcdsaSha256 | Self::EcdsaSha384 | Self::EcdsaSha512 => KeyAlgorithm::Ec,
            _ => KeyAlgorithm::Rsa,
        }
    }

    /// Whether this is an RSA-PSS variant.
    pub fn is_pss(&self) -> bool {
        matches!(
            self,
            Self::RsaPssSha256 | Self::RsaPssSha384 | Self::RsaPssSha512
        )
    }

    /// Whether a key of the given type and size can produce this signature.
    ///
    /// RSA variants accept any modulus of at least 2048 bits. ECDSA variants
    /// are bound to their matching curve: SHA-256 to P-256, SHA-384 to P-384,
    /// SHA-512 to P-521.
    pub fn is_compatible_with(&self, key_algorithm: KeyAlgorithm, key_bits: u32) -> bool {
        if self.key_algorithm() != key_algorithm {
            return false;
        }
        match self {
            Self::EcdsaSha256 => key_bits == 256,
            Self::EcdsaSha384 => key_bits == 384,
            Self::EcdsaSha512 => key_bits == 521,
            _ => key_bits >= 2048,
        }
    }

    /// Default algorithm for a key: PKCS#1 v1.5 with SHA-256 for RSA, the
    /// curve-matched ECDSA variant for EC.
    pub fn default_for(key_algorithm: KeyAlgorithm, key_bits: u32) -> Option<Self> {
        match key_algorithm {
            KeyAlgorithm::Rsa if key_bits >= 2048 => Some(Self::RsaPkcs1Sha256),
            KeyAlgorithm::Rsa => None,
            KeyAlgorithm::Ec => match key_bits {
                256 => Some(Self::EcdsaSha256),
                384 => Some(Self::EcdsaSha384),
                521 => Some(Self::EcdsaSha512),
                _ => None,
            },
        }
    }

    /// Signature algorithm OID as carried in CMS and X.509 structures.
    ///
    /// All RSA-PSS variants share `id-RSASSA-PSS`; the hash is carried in the
    /// algorithm parameters.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::RsaPkcs1Sha256 => oids::SHA256_WITH_RSA,
            Self::RsaPkcs1Sha384 => oids::SHA384_WITH_RSA,
            Self::RsaPkcs1Sha512 => oids::SHA512_WITH_RSA,
            Self::RsaPssSha256 | Self::RsaPssSha384 | Self::RsaPssSha512 => oids::ID_RSASSA_PSS,
            Self::EcdsaSha256 => oids::ECDSA_WITH_SHA256,
            Self::EcdsaSha384 => oids::ECDSA_WITH_SHA384,
            Self::EcdsaSha512 => oids::ECDSA_WITH_SHA512,
        }
    }

    /// Resolve a signature algorithm OID.
    ///
    /// `hash` disambiguates RSA-PSS and may also stand in for a bare
    /// `rsaEncryption`/`id-ecPublicKey` OID that some producers emit.
    pub fn from_oid(oid: &ObjectIdentifier, hash: HashAlgorithm) -> Option<Self> {
        if *oid == oids::ID_RSASSA_PSS {
            return Some(Self::from_parts(KeyAlgorithm::Rsa, true, hash));
        }
        if *oid == oids::RSA_ENCRYPTION {
            return Some(Self::from_parts(KeyAlgorithm::Rsa, false, hash));
        }
        if *oid == oids::ID_EC_PUBLIC_KEY {
            return Some(Self::from_parts(KeyAlgorithm::Ec, false, hash));
        }
        Self::ALL
            .into_iter()
            .find(|alg| !alg.is_pss() && alg.oid() == *oid)
    }

    fn from_parts(key: KeyAlgorithm, pss: bool, hash: HashAlgorithm) -> Self {
        match (key, pss, hash) {
            (KeyAlgorithm::Rsa, false, HashAlgorithm::Sha256) => Self::RsaPkcs1Sha256,
            (KeyAlgorithm::Rsa, false, HashAlgorithm::Sha384) => Self::RsaPkcs1Sha384,
            (KeyAlgorithm::Rsa, false, HashAlgorithm::Sha512) => Self::RsaPkcs1Sha512,
            (KeyAlgorithm::Rsa, true, HashAlgorithm::Sha256) => Self::RsaPssSha256,
            (KeyAlgorithm::Rsa, true, HashAlgorithm::Sha384) => Self::RsaPssSha384,
            (KeyAlgorithm::Rsa, true, HashAlgorithm::Sha512) => Self::RsaPssSha512,
            (KeyAlgorithm::Ec, _, HashAlgorithm::Sha256) => Self::EcdsaSha256,
            (KeyAlgorithm::Ec, _, HashAlgorithm::Sha384) => Self::EcdsaSha384,
            (KeyAlgorithm::Ec, _, HashAlgorithm::Sha512) => Self::EcdsaSha512,
        }
    }

    /// Canonical name, e.g. `RSA_PKCS1_SHA256`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RsaPkcs1Sha256 => "RSA_PKCS1_SHA256",
            Self::RsaPkcs1Sha384 => "RSA_PKCS1_SHA384",
            Self::RsaPkcs1Sha512 => "RSA_PKCS1_SHA512",
            Self::RsaPssSha256 => "RSA_PSS_SHA256",
            Self::RsaPssSha384 => "RSA_PSS_SHA384",
            Self::RsaPssSha512 => "RSA_PSS_SHA512",
            Self::EcdsaSha256 => "ECDSA_SHA256",
            Self::EcdsaSha384 => "ECDSA_SHA384",
            Self::EcdsaSha512 => "ECDSA_SHA512",
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|alg| alg.as_str() == normalized)
            .ok_or_else(|| format!("unknown signing algorithm: {s}"))
    }
}
