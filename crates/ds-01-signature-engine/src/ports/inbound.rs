//! # Inbound Ports (Driving Ports / API)

use crate::domain::entities::{
    ExtractedSignature, PreparedSignature, SignatureOptions, SignaturePlacement,
};
use crate::domain::errors::SignatureError;
use crate::ports::outbound::DocumentAssembler;
use async_trait::async_trait;
use shared_types::{
    CertificateValidationResult, CmsSignature, PrivateKey, SignatureValidationResult, Timestamp,
    X509Certificate,
};

/// Digital signature engine API.
#[async_trait]
pub trait SignatureEngineApi: Send + Sync {
    /// Sign `document` with a local key.
    ///
    /// # Errors
    /// * `SignatureError::SignatureCreation` - the key's algorithm does not
    ///   match the certificate's, or the key is not the certificate's key
    /// * `SignatureError::TimestampServer` - a requested timestamp failed
    async fn create_signature(
        &self,
        document: &[u8],
        certificate: &X509Certificate,
        private_key: &PrivateKey,
        options: &SignatureOptions,
    ) -> Result<CmsSignature, SignatureError>;

    /// First half of signing with an external signer: digest and signed
    /// attributes. The caller signs `PreparedSignature::digest`.
    fn prepare_signature(
        &self,
        document: &[u8],
        certificate: &X509Certificate,
        options: &SignatureOptions,
    ) -> Result<PreparedSignature, SignatureError>;

    /// Second half: assemble CMS around an externally produced signature
    /// value, then timestamp it if the options asked for it.
    async fn complete_signature(
        &self,
        prepared: &PreparedSignature,
        signature_value: &[u8],
    ) -> Result<CmsSignature, SignatureError>;

    /// Validate an attached signature over its encapsulated content.
    fn validate_signature(
        &self,
        signature: &CmsSignature,
    ) -> Result<SignatureValidationResult, SignatureError>;

    /// Validate a signature over externally supplied content.
    fn validate_detached_signature(
        &self,
        signature: &CmsSignature,
        content: &[u8],
    ) -> Result<SignatureValidationResult, SignatureError>;

    /// Validate a leaf-first certificate chain against the configured trust
    /// anchors. Never fails; invalidity is in the result.
    fn validate_certificate_chain(
        &self,
        certificates: &[X509Certificate],
    ) -> CertificateValidationResult;

    /// Obtain a timestamp over `document`.
    async fn timestamp_document(
        &self,
        document: &[u8],
        tsa_url: Option<&str>,
    ) -> Result<Timestamp, SignatureError>;

    /// Timestamp an existing signature, returning a new value.
    async fn add_timestamp(
        &self,
        signature: &CmsSignature,
        tsa_url: Option<&str>,
    ) -> Result<CmsSignature, SignatureError>;

    /// Hand a signature and its position to the document model.
    async fn add_signature_to_document(
        &self,
        assembler: &dyn DocumentAssembler,
        document: &[u8],
        signature: &CmsSignature,
        placement: SignaturePlacement,
        field_name: &str,
    ) -> Result<Vec<u8>, SignatureError>;

    /// Parse every signature the document model finds.
    async fn extract_signatures(
        &self,
        assembler: &dyn DocumentAssembler,
        document: &[u8],
    ) -> Result<Vec<ExtractedSignature>, SignatureError>;

    /// Extract and validate every signature in a document.
    async fn validate_document(
        &self,
        assembler: &dyn DocumentAssembler,
        document: &[u8],
    ) -> Result<Vec<SignatureValidationResult>, SignatureError>;
}
