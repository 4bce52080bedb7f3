//! # Timestamp Authority Client (DS-04)
//!
//! RFC 3161 trusted timestamps for document signatures.
//!
//! ## Protocol
//!
//! ```text
//! client ── TimeStampReq (messageImprint, nonce, certReq) ──► TSA
//! client ◄── TimeStampResp (PKIStatusInfo, TimeStampToken) ── TSA
//! ```
//!
//! A granted token must echo the request's imprint and nonce; anything else
//! is a validation failure.
//!
//! ## Failover
//!
//! Servers are tried strictly in declared order, each at most once, until
//! one grants. If all fail, the last failure is returned.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use adapters::HttpTsaTransport;
pub use domain::codec::parse_timestamp_token;
pub use domain::entities::{
    FailoverConfig, PkiStatus, RequestState, TimestampRequest, TimestampRequestOptions,
    TimestampResponse, TimestampVerification, TsaConfig, DEFAULT_TSA_TIMEOUT,
};
pub use domain::errors::TsaError;
pub use ports::inbound::TimestampAuthorityApi;
pub use ports::outbound::TsaTransport;
pub use service::TsaClient;
