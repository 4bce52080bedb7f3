//! reqwest-backed [`KmsTransport`].

use crate::domain::errors::ProviderFault;
use crate::ports::outbound::{HttpMethod, KmsRequest, KmsResponse, KmsTransport};
use async_trait::async_trait;
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends provider requests over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpKmsTransport {
    client: Client,
}

impl HttpKmsTransport {
    pub fn new() -> Result<Self, ProviderFault> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("docseal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderFault::dependency_missing(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Reuse an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KmsTransport for HttpKmsTransport {
    async fn execute(&self, request: KmsRequest) -> Result<KmsResponse, ProviderFault> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Delete => Method::DELETE,
        };
        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() {
                ProviderFault::transport(format!("cannot connect to {}: {e}", request.url))
            } else if e.is_timeout() {
                ProviderFault::transport(format!("timed out after {:?}", request.timeout))
            } else {
                ProviderFault::transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderFault::transport(format!("reading response body: {e}")))?;
        debug!(
            method = request.method.as_str(),
            url = %request.url,
            status,
            bytes = body.len(),
            "Provider exchange"
        );
        Ok(KmsResponse::new(status, body.to_vec()))
    }
}
