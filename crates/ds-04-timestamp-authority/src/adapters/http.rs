//! HTTP transport for RFC 3161 (section 3.4, "Time-Stamp Protocol via HTTP").

use crate::domain::entities::TsaConfig;
use crate::domain::errors::TsaError;
use crate::ports::outbound::TsaTransport;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

pub const TIMESTAMP_QUERY: &str = "application/timestamp-query";
pub const TIMESTAMP_REPLY: &str = "application/timestamp-reply";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts DER requests to a TSA over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTsaTransport {
    client: Client,
}

impl HttpTsaTransport {
    pub fn new() -> Result<Self, TsaError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("docseal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TsaError::connection("<client>", e.to_string()))?;
        Ok(Self { client })
    }

    /// Reuse an existing client, e.g. one shared with the HSM providers.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TsaTransport for HttpTsaTransport {
    async fn send(&self, config: &TsaConfig, request_der: &[u8]) -> Result<Vec<u8>, TsaError> {
        let mut builder = self
            .client
            .post(&config.url)
            .timeout(config.timeout)
            .header(CONTENT_TYPE, TIMESTAMP_QUERY)
            .header(ACCEPT, TIMESTAMP_REPLY)
            .body(request_der.to_vec());
        if let Some(username) = &config.username {
            builder = builder.basic_auth(username, config.password.as_ref());
        }

        let response = builder.send().await.map_err(|e| {
            let message = if e.is_connect() {
                format!("cannot connect: {e}")
            } else if e.is_timeout() {
                format!("timed out after {:?}", config.timeout)
            } else {
                e.to_string()
            };
            TsaError::connection(&config.url, message)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TsaError::connection(&config.url, format!("HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with(TIMESTAMP_REPLY) {
            warn!(url = %config.url, content_type = %content_type, "Unexpected TSA content type");
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TsaError::connection(&config.url, e.to_string()))?;
        debug!(url = %config.url, bytes = body.len(), "TSA response received");
        Ok(body.to_vec())
    }
}
