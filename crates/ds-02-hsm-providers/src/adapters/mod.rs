//! # Adapters
//!
//! One [`HsmProvider`](crate::ports::inbound::HsmProvider) per key custodian,
//! plus the HTTP transport and SigV4 signer the cloud adapters share.

pub mod aws;
pub mod azure;
pub mod gcp;
pub mod http;
pub mod pkcs11;
pub(crate) mod sigv4;

pub use aws::AwsKmsProvider;
pub use azure::AzureKeyVaultProvider;
pub use gcp::GcpKmsProvider;
pub use http::HttpKmsTransport;
pub use pkcs11::Pkcs11Provider;

#[cfg(feature = "pkcs11")]
pub use pkcs11::CryptokiBackend;

use crate::domain::errors::HsmError;
use crate::ports::outbound::KmsTransport;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use shared_types::ProviderTag;
use std::sync::Arc;
use tracing::warn;

/// Default HTTPS transport, or `None` if the client cannot be built on this
/// host. Adapters report the absence on `initialize`.
pub(crate) fn http_transport(provider: ProviderTag) -> Option<Arc<dyn KmsTransport>> {
    match HttpKmsTransport::new() {
        Ok(transport) => Some(Arc::new(transport)),
        Err(fault) => {
            warn!(provider = %provider, error = %fault, "HTTP client unavailable");
            None
        }
    }
}

pub(crate) fn decode_base64(
    provider: ProviderTag,
    engine: &impl Engine,
    value: &str,
    what: &str,
) -> Result<Vec<u8>, HsmError> {
    engine
        .decode(value)
        .map_err(|e| HsmError::invalid_response(provider, format!("{what} is not base64: {e}")))
}

/// Fractional Unix seconds, as AWS reports dates.
pub(crate) fn epoch_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds.trunc() as i64, 0).single()
}

/// RFC 3339 timestamp, as GCP and Azure report dates.
pub(crate) fn rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
