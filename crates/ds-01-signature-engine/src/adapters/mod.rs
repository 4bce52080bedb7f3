//! # Adapters

pub mod tsa;

pub use tsa::TsaTimestampGateway;
