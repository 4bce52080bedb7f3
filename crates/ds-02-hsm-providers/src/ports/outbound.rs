//! # Outbound Ports (Driven Ports / SPI)
//!
//! - [`KmsTransport`]: one HTTP exchange with a cloud key service
//! - [`TokenBackend`]: blocking session primitives of a PKCS#11 token

use crate::domain::entities::TokenMechanism;
use crate::domain::errors::ProviderFault;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use shared_types::KeyAlgorithm;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// HTTP
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// A fully prepared request, credentials included.
#[derive(Clone, PartialEq, Eq)]
pub struct KmsRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

impl KmsRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
            timeout,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// JSON body with a matching content type.
    pub fn json(self, value: &serde_json::Value) -> Self {
        self.header("content-type", "application/json")
            .body(value.to_string().into_bytes())
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body parsed as JSON, if it is JSON.
    pub fn body_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

impl fmt::Debug for KmsRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<_> = self
            .headers
            .iter()
            .map(|(name, value)| {
                if name.eq_ignore_ascii_case("authorization")
                    || name.eq_ignore_ascii_case("x-amz-security-token")
                {
                    (name.as_str(), "<redacted>")
                } else {
                    (name.as_str(), value.as_str())
                }
            })
            .collect();
        f.debug_struct("KmsRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body_len", &self.body.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl KmsResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ProviderFault> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ProviderFault::malformed(format!("HTTP {} body: {e}", self.status)))
    }
}

/// Executes one HTTP exchange.
///
/// Implementations report only transport failures as faults; any HTTP
/// status, including errors, is returned as a response for the adapter to
/// interpret. No retries.
#[async_trait]
pub trait KmsTransport: Send + Sync {
    async fn execute(&self, request: KmsRequest) -> Result<KmsResponse, ProviderFault>;
}

#[async_trait]
impl<T: KmsTransport + ?Sized> KmsTransport for Arc<T> {
    async fn execute(&self, request: KmsRequest) -> Result<KmsResponse, ProviderFault> {
        (**self).execute(request).await
    }
}

// =============================================================================
// PKCS#11
// =============================================================================

/// Identity of the token a session is open on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub slot_id: u64,
    pub label: String,
    pub manufacturer: String,
}

/// A private key object on the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenKey {
    /// `CKA_LABEL`, the key identifier callers use.
    pub label: String,
    /// `CKA_ID`, shared by the private and public halves.
    pub id: Vec<u8>,
    pub algorithm: KeyAlgorithm,
    pub bits: u32,
    pub can_sign: bool,
    pub can_decrypt: bool,
}

/// Public half of a token key as stored on the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPublicKey {
    Rsa { modulus: Vec<u8>, exponent: Vec<u8> },
    /// Uncompressed SEC1 point.
    Ec { curve_bits: u32, point: Vec<u8> },
}

/// Blocking token primitives. The adapter moves every call onto the
/// blocking thread pool.
pub trait TokenBackend: Send + Sync {
    /// Load the module, open a session and log in.
    fn open(&self) -> Result<TokenInfo, ProviderFault>;

    /// Sign a digest. ECDSA results are raw `r || s`.
    fn sign(&self, label: &str, mechanism: TokenMechanism, digest: &[u8]) -> Result<Vec<u8>, ProviderFault>;

    fn public_key(&self, label: &str) -> Result<TokenPublicKey, ProviderFault>;

    fn list_private_keys(&self) -> Result<Vec<TokenKey>, ProviderFault>;

    fn generate_key_pair(&self, label: &str, algorithm: KeyAlgorithm, bits: u32) -> Result<TokenKey, ProviderFault>;

    /// Destroy both halves of the key pair.
    fn destroy_key_pair(&self, label: &str) -> Result<(), ProviderFault>;

    /// Session still usable.
    fn probe(&self) -> Result<(), ProviderFault>;
}
