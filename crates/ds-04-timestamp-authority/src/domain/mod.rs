//! # Domain Layer
//!
//! RFC 3161 encoding, decoding and verification. No I/O.

pub mod asn1;
pub mod codec;
pub mod entities;
pub mod errors;
pub mod verification;
