//! # Inbound Ports (Driving Ports / API)
//!
//! The timestamp authority client API.

use crate::domain::entities::{
    FailoverConfig, TimestampRequest, TimestampRequestOptions, TimestampResponse,
    TimestampVerification, TsaConfig,
};
use crate::domain::errors::TsaError;
use async_trait::async_trait;
use shared_types::Timestamp;

/// RFC 3161 client.
#[async_trait]
pub trait TimestampAuthorityApi: Send + Sync {
    /// Hash `data` and build a request over the digest.
    fn create_timestamp_request(
        &self,
        data: &[u8],
        options: &TimestampRequestOptions,
    ) -> Result<TimestampRequest, TsaError>;

    /// Build a request over an already computed digest.
    fn create_timestamp_request_for_digest(
        &self,
        digest: &[u8],
        options: &TimestampRequestOptions,
    ) -> Result<TimestampRequest, TsaError>;

    /// One attempt against one TSA, bounded by `config.timeout`.
    ///
    /// # Errors
    /// * `TsaError::Connection` - transport failure or timeout
    /// * `TsaError::Response` - any status other than granted/granted-with-mods
    /// * `TsaError::Validation` - token does not echo the request imprint or nonce
    async fn request_timestamp(
        &self,
        request: &TimestampRequest,
        config: &TsaConfig,
    ) -> Result<TimestampResponse, TsaError>;

    /// Try the primary then each fallback in declared order, stopping at the
    /// first granted response. When every server fails, the last failure is
    /// returned.
    async fn request_timestamp_with_failover(
        &self,
        request: &TimestampRequest,
        failover: &FailoverConfig,
    ) -> Result<TimestampResponse, TsaError>;

    /// Recompute the imprint of `original_data` and check the token.
    fn verify_timestamp_response(
        &self,
        response: &TimestampResponse,
        original_data: &[u8],
    ) -> Result<TimestampVerification, TsaError>;

    /// Check an already parsed timestamp, e.g. one embedded in a signature.
    fn verify_timestamp(
        &self,
        timestamp: &Timestamp,
        original_data: &[u8],
    ) -> Result<TimestampVerification, TsaError>;
}
