//! # Shared Crypto - Local Signing and CMS Primitives
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `hashing` | SHA-256/384/512 | Document and attribute digests |
//! | `signatures` | RSA PKCS#1 v1.5, RSA-PSS, ECDSA P-256/P-384/P-521 | Local digest signing and verification |
//! | `ecdsa` | `Ecdsa-Sig-Value` | Raw `r‖s` to DER conversion |
//! | `keys` | SPKI | Public keys from provider-reported components |
//! | `cms` | RFC 5652 signed-data | Signature and timestamp token codec |
//! | `x509` | X.509 | Certificate signature checks |
//!
//! Hardware-backed keys never pass through this crate; only their public
//! halves do, for verification.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cms;
pub mod ecdsa;
pub mod errors;
pub mod hashing;
pub mod keys;
pub mod signatures;
pub mod x509;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

// Re-exports
pub use ecdsa::{ecdsa_der_to_raw, ecdsa_raw_to_der};
pub use errors::CryptoError;
pub use hashing::{digest, sha256, DocumentHasher};
pub use keys::{ec_point, public_key_from_ec_point, public_key_from_rsa_components};
pub use signatures::{verify_digest, verify_message, LocalSigningKey};
pub use x509::verify_certificate_signature;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
