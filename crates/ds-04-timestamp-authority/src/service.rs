//! # Timestamp Authority Service
//!
//! Implements [`TimestampAuthorityApi`] over any [`TsaTransport`].
//!
//! One request to one server walks the [`RequestState`] machine. Failover
//! walks the configured servers in order and never retries a server.

use crate::adapters::HttpTsaTransport;
use crate::domain::codec::{build_request, decode_response, parse_timestamp_token};
use crate::domain::entities::{
    FailoverConfig, RequestState, TimestampRequest, TimestampRequestOptions, TimestampResponse,
    TimestampVerification, TsaConfig,
};
use crate::domain::errors::TsaError;
use crate::domain::verification::{check_matches_request, verify_timestamp};
use crate::ports::inbound::TimestampAuthorityApi;
use crate::ports::outbound::TsaTransport;
use async_trait::async_trait;
use shared_crypto::digest;
use shared_types::Timestamp;
use tracing::{debug, info, warn};

/// RFC 3161 client.
pub struct TsaClient<T: TsaTransport> {
    transport: T,
}

impl TsaClient<HttpTsaTransport> {
    /// Client that talks HTTP(S).
    pub fn http() -> Result<Self, TsaError> {
        Ok(Self::new(HttpTsaTransport::new()?))
    }
}

impl<T: TsaTransport> TsaClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn exchange(&self, request: &TimestampRequest, config: &TsaConfig) -> Result<Vec<u8>, TsaError> {
        match tokio::time::timeout(config.timeout, self.transport.send(config, &request.der)).await {
            Ok(result) => result,
            Err(_) => Err(TsaError::connection(
                &config.url,
                format!("timed out after {:?}", config.timeout),
            )),
        }
    }
}

#[async_trait]
impl<T: TsaTransport> TimestampAuthorityApi for TsaClient<T> {
    fn create_timestamp_request(
        &self,
        data: &[u8],
        options: &TimestampRequestOptions,
    ) -> Result<TimestampRequest, TsaError> {
        build_request(digest(options.hash_algorithm, data), options)
    }

    fn create_timestamp_request_for_digest(
        &self,
        digest: &[u8],
        options: &TimestampRequestOptions,
    ) -> Result<TimestampRequest, TsaError> {
        build_request(digest.to_vec(), options)
    }

    async fn request_timestamp(
        &self,
        request: &TimestampRequest,
        config: &TsaConfig,
    ) -> Result<TimestampResponse, TsaError> {
        let state = RequestState::Building.send();
        debug!(url = %config.url, bytes = request.der.len(), "Sending timestamp request");

        let body = self.exchange(request, config).await.inspect_err(|e| {
            warn!(url = %config.url, state = ?state.fail(), error = %e, "Timestamp request failed");
        })?;

        let decoded = decode_response(&body)?;
        let state = state.on_status(decoded.status);
        if !state.is_success() {
            let message = if decoded.status_text.is_empty() {
                decoded.status.to_string()
            } else {
                decoded.status_text.join("; ")
            };
            warn!(url = %config.url, status = %decoded.status, state = ?state, "TSA refused request");
            return Err(TsaError::Response {
                url: config.url.clone(),
                status: decoded.status.code(),
                message,
            });
        }

        let token = decoded
            .token
            .ok_or_else(|| TsaError::Validation("granted response carries no token".into()))?;
        let timestamp = parse_timestamp_token(&token, Some(&config.url))?;
        check_matches_request(request, &timestamp)?;

        info!(
            url = %config.url,
            tsa = %timestamp.tsa_name,
            serial = %timestamp.serial_hex(),
            issued_at = %timestamp.issued_at,
            "Timestamp granted"
        );

        Ok(TimestampResponse {
            status: decoded.status,
            state,
            status_text: decoded.status_text,
            timestamp,
            der: body,
        })
    }

    async fn request_timestamp_with_failover(
        &self,
        request: &TimestampRequest,
        failover: &FailoverConfig,
    ) -> Result<TimestampResponse, TsaError> {
        let mut last_error = None;
        for (attempt, server) in failover.servers().enumerate() {
            match self.request_timestamp(request, server).await {
                Ok(response) => {
                    if attempt > 0 {
                        info!(url = %server.url, attempt, "Timestamp obtained from fallback TSA");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    warn!(url = %server.url, attempt, error = %e, "TSA failed, trying next");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(TsaError::NoServers))
    }

    fn verify_timestamp_response(
        &self,
        response: &TimestampResponse,
        original_data: &[u8],
    ) -> Result<TimestampVerification, TsaError> {
        verify_timestamp(&response.timestamp, original_data)
    }

    fn verify_timestamp(
        &self,
        timestamp: &Timestamp,
        original_data: &[u8],
    ) -> Result<TimestampVerification, TsaError> {
        verify_timestamp(timestamp, original_data)
    }
}
