//! # Digital Signature Engine (DS-01)
//!
//! Builds and validates CMS/PKCS#7 signed-data signatures.
//!
//! ## Architecture
//!
//! - **Domain Layer** (`domain/`): CMS assembly and parsing, chain and
//!   signature validation, no I/O
//! - **Ports Layer** (`ports/`): the engine API, plus the timestamp and
//!   document-model dependencies
//! - **Service Layer** (`service.rs`): wires domain logic to ports
//!
//! ## Signing with an external key
//!
//! ```text
//! prepare_signature ─► PreparedSignature.digest ─► HSM / token
//!                                                      │
//! CmsSignature ◄─ complete_signature ◄─ signature value ┘
//! ```
//!
//! The engine never talks to key custodians itself.
//!
//! ## Validation policy
//!
//! Expected invalidity (tampering, expiry, untrusted root, bad timestamp)
//! is reported in the result. Only undecodable input is an error.
//! Revocation is never checked and always reported as a warning.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use adapters::TsaTimestampGateway;
pub use domain::chain::{build_chain, validate_certificate_chain, MAX_CHAIN_LENGTH};
pub use domain::cms::parse_cms;
pub use domain::entities::{
    common_name, EmbeddedSignature, EmbeddingRequest, ExtractedSignature, PreparedSignature,
    SignatureOptions, SignaturePlacement,
};
pub use domain::errors::SignatureError;
pub use ports::inbound::SignatureEngineApi;
pub use ports::outbound::{DocumentAssembler, TimestampGateway};
pub use service::SignatureEngine;
