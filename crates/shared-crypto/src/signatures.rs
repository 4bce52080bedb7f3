//! # Digest Signatures (RSA, ECDSA)
//!
//! Sign and verify pre-computed digests with locally held keys.
//!
//! ## Encodings
//!
//! - RSA PKCS#1 v1.5: `DigestInfo` padding for the algorithm's hash
//! - RSA-PSS: MGF1 with the same hash, salt length equal to the digest length
//! - ECDSA: DER `Ecdsa-Sig-Value` (P-256, P-384, P-521)

use crate::CryptoError;
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};
use shared_types::{HashAlgorithm, KeyAlgorithm, PrivateKey, PublicKey, SigningAlgorithm};

/// Locally held signing key.
pub enum LocalSigningKey {
    /// RSA key of any supported size
    Rsa(Box<RsaPrivateKey>),
    /// NIST P-256 key
    P256(p256::ecdsa::SigningKey),
    /// NIST P-384 key
    P384(p384::ecdsa::SigningKey),
    /// NIST P-521 key
    P521(p521::SecretKey),
}

impl LocalSigningKey {
    /// Load from a parsed PKCS#8 private key.
    pub fn from_private_key(key: &PrivateKey) -> Result<Self, CryptoError> {
        let der = key.pkcs8_der();
        let invalid = |e: String| CryptoError::InvalidPrivateKey(e);
        match (key.algorithm, key.bits) {
            (KeyAlgorithm::Rsa, _) => RsaPrivateKey::from_pkcs8_der(der)
                .map(|k| Self::Rsa(Box::new(k)))
                .map_err(|e| invalid(e.to_string())),
            (KeyAlgorithm::Ec, 256) => p256::ecdsa::SigningKey::from_pkcs8_der(der)
                .map(Self::P256)
                .map_err(|e| invalid(e.to_string())),
            (KeyAlgorithm::Ec, 384) => p384::ecdsa::SigningKey::from_pkcs8_der(der)
                .map(Self::P384)
                .map_err(|e| invalid(e.to_string())),
            (KeyAlgorithm::Ec, 521) => p521::SecretKey::from_pkcs8_der(der)
                .map(Self::P521)
                .map_err(|e| invalid(e.to_string())),
            (KeyAlgorithm::Ec, bits) => Err(CryptoError::UnsupportedAlgorithm(format!(
                "local ECDSA on P-{bits}"
            ))),
        }
    }

    /// Key family and size.
    pub fn key_type(&self) -> (KeyAlgorithm, u32) {
        use rsa::traits::PublicKeyParts;
        match self {
            Self::Rsa(k) => (KeyAlgorithm::Rsa, k.n().bits() as u32),
            Self::P256(_) => (KeyAlgorithm::Ec, 256),
            Self::P384(_) => (KeyAlgorithm::Ec, 384),
            Self::P521(_) => (KeyAlgorithm::Ec, 521),
        }
    }

    /// Matching public key.
    pub fn public_key(&self) -> Result<PublicKey, CryptoError> {
        let der = match self {
            Self::Rsa(k) => k.to_public_key().to_public_key_der(),
            Self::P256(k) => k.verifying_key().to_public_key_der(),
            Self::P384(k) => k.verifying_key().to_public_key_der(),
            Self::P521(k) => k.public_key().to_public_key_der(),
        }
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(PublicKey::from_spki_der(der.as_bytes())?)
    }

    /// Sign a pre-computed digest.
    pub fn sign_digest(
        &self,
        digest: &[u8],
        algorithm: SigningAlgorithm,
    ) -> Result<Vec<u8>, CryptoError> {
        let (key_alg, bits) = self.key_type();
        if !algorithm.is_compatible_with(key_alg, bits) {
            return Err(CryptoError::IncompatibleKey {
                algorithm: algorithm.to_string(),
                key: format!("{key_alg}-{bits}"),
            });
        }
        check_digest_len(digest, algorithm.hash_algorithm())?;
        let failed = |e: String| CryptoError::SigningFailed(e);

        match self {
            Self::Rsa(key) => {
                let hash = algorithm.hash_algorithm();
                if algorithm.is_pss() {
                    let mut rng = rand::thread_rng();
                    key.sign_with_rng(&mut rng, pss_scheme(hash), digest)
                        .map_err(|e| failed(e.to_string()))
                } else {
                    key.sign(pkcs1v15_scheme(hash), digest)
                        .map_err(|e| failed(e.to_string()))
                }
            }
            Self::P256(key) => {
                let sig: p256::ecdsa::Signature =
                    key.sign_prehash(digest).map_err(|e| failed(e.to_string()))?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
            Self::P384(key) => {
                let sig: p384::ecdsa::Signature =
                    key.sign_prehash(digest).map_err(|e| failed(e.to_string()))?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
            Self::P521(secret) => {
                let key = p521::ecdsa::SigningKey::from_bytes(&secret.to_bytes())
                    .map_err(|e| failed(e.to_string()))?;
                let sig: p521::ecdsa::Signature =
                    key.sign_prehash(digest).map_err(|e| failed(e.to_string()))?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
        }
    }
}

/// Verify a signature over a pre-computed digest.
pub fn verify_digest(
    public_key: &PublicKey,
    digest: &[u8],
    signature: &[u8],
    algorithm: SigningAlgorithm,
) -> Result<(), CryptoError> {
    if !algorithm.is_compatible_with(public_key.algorithm, public_key.bits) {
        return Err(CryptoError::IncompatibleKey {
            algorithm: algorithm.to_string(),
            key: format!("{}-{}", public_key.algorithm, public_key.bits),
        });
    }
    let hash = algorithm.hash_algorithm();
    check_digest_len(digest, hash)?;
    let invalid_key = |e: String| CryptoError::InvalidPublicKey(e);

    match (public_key.algorithm, public_key.bits) {
        (KeyAlgorithm::Rsa, _) => {
            let key = RsaPublicKey::from_public_key_der(&public_key.der)
                .map_err(|e| invalid_key(e.to_string()))?;
            let result = if algorithm.is_pss() {
                key.verify(pss_scheme(hash), digest, signature)
            } else {
                key.verify(pkcs1v15_scheme(hash), digest, signature)
            };
            result.map_err(|_| CryptoError::SignatureVerificationFailed)
        }
        (KeyAlgorithm::Ec, 256) => {
            let key = p256::ecdsa::VerifyingKey::from_public_key_der(&public_key.der)
                .map_err(|e| invalid_key(e.to_string()))?;
            let sig = p256::ecdsa::Signature::from_der(signature)
                .map_err(|_| CryptoError::InvalidSignatureFormat)?;
            key.verify_prehash(digest, &sig)
                .map_err(|_| CryptoError::SignatureVerificationFailed)
        }
        (KeyAlgorithm::Ec, 384) => {
            let key = p384::ecdsa::VerifyingKey::from_public_key_der(&public_key.der)
                .map_err(|e| invalid_key(e.to_string()))?;
            let sig = p384::ecdsa::Signature::from_der(signature)
                .map_err(|_| CryptoError::InvalidSignatureFormat)?;
            key.verify_prehash(digest, &sig)
                .map_err(|_| CryptoError::SignatureVerificationFailed)
        }
        (KeyAlgorithm::Ec, 521) => {
            let point = p521::PublicKey::from_public_key_der(&public_key.der)
                .map_err(|e| invalid_key(e.to_string()))?;
            let key = p521::ecdsa::VerifyingKey::from_affine(*point.as_affine())
                .map_err(|e| invalid_key(e.to_string()))?;
            let sig = p521::ecdsa::Signature::from_der(signature)
                .map_err(|_| CryptoError::InvalidSignatureFormat)?;
            key.verify_prehash(digest, &sig)
                .map_err(|_| CryptoError::SignatureVerificationFailed)
        }
        (KeyAlgorithm::Ec, bits) => Err(CryptoError::UnsupportedAlgorithm(format!(
            "ECDSA verification on P-{bits}"
        ))),
    }
}

/// Verify a signature over a message, hashing it first.
pub fn verify_message(
    public_key: &PublicKey,
    message: &[u8],
    signature: &[u8],
    algorithm: SigningAlgorithm,
) -> Result<(), CryptoError> {
    let digest = crate::hashing::digest(algorithm.hash_algorithm(), message);
    verify_digest(public_key, &digest, signature, algorithm)
}

fn check_digest_len(digest: &[u8], hash: HashAlgorithm) -> Result<(), CryptoError> {
    if digest.len() != hash.output_len() {
        return Err(CryptoError::InvalidDigestLength {
            expected: hash.output_len(),
            actual: digest.len(),
        });
    }
    Ok(())
}

fn pkcs1v15_scheme(hash: HashAlgorithm) -> Pkcs1v15Sign {
    match hash {
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        HashAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
        HashAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
    }
}

fn pss_scheme(hash: HashAlgorithm) -> Pss {
    match hash {
        HashAlgorithm::Sha256 => Pss::new::<Sha256>(),
        HashAlgorithm::Sha384 => Pss::new::<Sha384>(),
        HashAlgorithm::Sha512 => Pss::new::<Sha512>(),
    }
}
