//! # Adapters
//!
//! Concrete transports for the outbound port.

pub mod http;

pub use http::HttpTsaTransport;
