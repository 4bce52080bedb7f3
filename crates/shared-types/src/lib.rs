//! # Shared Types Crate
//!
//! The key and certificate model used by every DocSeal component.
//!
//! ## Design Principles
//!
//! - **Immutable values**: certificates, CMS signatures and timestamps are
//!   parsed once and never mutated. Adding a timestamp produces a new
//!   `CmsSignature`.
//! - **No key material across provider boundaries**: hardware-backed keys are
//!   only ever addressed through an `HsmKeyReference`.
//! - **Derived reports**: validation results are recomputed on demand and are
//!   never a source of truth.

pub mod algorithms;
pub mod certificate;
pub mod cms;
pub mod errors;
pub mod hsm;
pub mod keys;
pub mod oids;
pub mod timestamp;
pub mod validation;

pub use algorithms::{HashAlgorithm, SigningAlgorithm};
pub use certificate::{CertificateExtension, X509Certificate};
pub use cms::{CmsAttribute, CmsSignature, SignerInfo};
pub use errors::*;
pub use hsm::{
    DeletionState, HsmKeyInfo, HsmKeyReference, HsmSigningRequest, HsmSigningResult,
    KeyDeletionStatus, KeyPurpose, ProviderTag,
};
pub use keys::{KeyAlgorithm, PrivateKey, PublicKey};
pub use timestamp::{MessageImprint, Timestamp};
pub use validation::{CertificateValidationResult, SignatureValidationResult};
