//! # Outbound Ports (Driven Ports / SPI)

use crate::domain::entities::{EmbeddedSignature, EmbeddingRequest};
use crate::domain::errors::SignatureError;
use async_trait::async_trait;
use shared_types::{HashAlgorithm, Timestamp};

/// Source of RFC 3161 timestamps.
#[async_trait]
pub trait TimestampGateway: Send + Sync {
    /// Timestamp a digest. With `tsa_url` set only that server is asked;
    /// otherwise the configured servers are tried in order.
    ///
    /// # Errors
    /// * `SignatureError::TimestampServer` - every attempted server failed
    async fn timestamp_digest(
        &self,
        hash: HashAlgorithm,
        digest: &[u8],
        tsa_url: Option<&str>,
    ) -> Result<Timestamp, SignatureError>;
}

/// The document model that places signature bytes into a document.
///
/// Everything format-specific (byte ranges, widgets, incremental updates)
/// lives behind this trait.
#[async_trait]
pub trait DocumentAssembler: Send + Sync {
    /// Return a new document with the signature embedded.
    async fn embed_signature(
        &self,
        document: &[u8],
        request: &EmbeddingRequest,
    ) -> Result<Vec<u8>, SignatureError>;

    /// Every signature in the document, in document order.
    async fn extract_signatures(
        &self,
        document: &[u8],
    ) -> Result<Vec<EmbeddedSignature>, SignatureError>;
}
