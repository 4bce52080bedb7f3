//! # Outbound Ports (Driven Ports / SPI)
//!
//! The wire exchange with a timestamp server.

use crate::domain::entities::TsaConfig;
use crate::domain::errors::TsaError;
use async_trait::async_trait;
use std::sync::Arc;

/// Delivers a DER `TimeStampReq` to one TSA and returns the DER
/// `TimeStampResp` body.
///
/// Implementations report transport failures as `TsaError::Connection`.
/// They do not interpret the response and never retry.
#[async_trait]
pub trait TsaTransport: Send + Sync {
    async fn send(&self, config: &TsaConfig, request_der: &[u8]) -> Result<Vec<u8>, TsaError>;
}

#[async_trait]
impl<T: TsaTransport + ?Sized> TsaTransport for Arc<T> {
    async fn send(&self, config: &TsaConfig, request_der: &[u8]) -> Result<Vec<u8>, TsaError> {
        (**self).send(config, request_der).await
    }
}
