//! # Signature Engine Service
//!
//! Implements [`SignatureEngineApi`]. Within one signature the steps are
//! strictly sequential: digest, sign, assemble, then optionally timestamp.
//! Any failure discards the partial result.

use crate::domain::chain::validate_certificate_chain;
use crate::domain::cms::{assemble_signature, embed_timestamp, parse_cms, prepare_signature};
use crate::domain::entities::{
    common_name, EmbeddingRequest, ExtractedSignature, PreparedSignature, SignatureOptions,
    SignaturePlacement,
};
use crate::domain::errors::SignatureError;
use crate::domain::validation::validate_signature;
use crate::ports::inbound::SignatureEngineApi;
use crate::ports::outbound::{DocumentAssembler, TimestampGateway};
use async_trait::async_trait;
use chrono::Utc;
use ds_04_timestamp_authority::TsaError;
use shared_crypto::{digest, LocalSigningKey};
use shared_types::{
    CertificateValidationResult, CmsSignature, HashAlgorithm, PrivateKey,
    SignatureValidationResult, Timestamp, X509Certificate,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Digital signature engine.
pub struct SignatureEngine {
    trust_anchors: Vec<X509Certificate>,
    timestamps: Option<Arc<dyn TimestampGateway>>,
    /// Digest for document timestamps.
    timestamp_hash: HashAlgorithm,
}

impl Default for SignatureEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureEngine {
    pub fn new() -> Self {
        Self {
            trust_anchors: Vec::new(),
            timestamps: None,
            timestamp_hash: HashAlgorithm::Sha256,
        }
    }

    /// Roots that chains must lead to. Without any, trust is reported as
    /// unverified rather than failed.
    pub fn with_trust_anchors(mut self, anchors: Vec<X509Certificate>) -> Self {
        self.trust_anchors = anchors;
        self
    }

    pub fn with_timestamp_gateway(mut self, gateway: Arc<dyn TimestampGateway>) -> Self {
        self.timestamps = Some(gateway);
        self
    }

    pub fn with_timestamp_hash(mut self, hash: HashAlgorithm) -> Self {
        self.timestamp_hash = hash;
        self
    }

    pub fn trust_anchors(&self) -> &[X509Certificate] {
        &self.trust_anchors
    }

    fn gateway(&self) -> Result<&Arc<dyn TimestampGateway>, SignatureError> {
        self.timestamps
            .as_ref()
            .ok_or(SignatureError::TimestampServer(TsaError::NoServers))
    }
}

#[async_trait]
impl SignatureEngineApi for SignatureEngine {
    async fn create_signature(
        &self,
        document: &[u8],
        certificate: &X509Certificate,
        private_key: &PrivateKey,
        options: &SignatureOptions,
    ) -> Result<CmsSignature, SignatureError> {
        let key = LocalSigningKey::from_private_key(private_key).map_err(SignatureError::creation)?;
        let (key_algorithm, _) = key.key_type();
        if key_algorithm != certificate.public_key.algorithm {
            return Err(SignatureError::creation(format!(
                "private key algorithm {key_algorithm} does not match certificate key algorithm {}",
                certificate.public_key.algorithm
            )));
        }
        if key.public_key().map_err(SignatureError::creation)? != certificate.public_key {
            return Err(SignatureError::creation(
                "private key does not belong to the certificate",
            ));
        }

        let prepared = self.prepare_signature(document, certificate, options)?;
        let value = key
            .sign_digest(&prepared.digest, prepared.algorithm)
            .map_err(SignatureError::creation)?;
        self.complete_signature(&prepared, &value).await
    }

    fn prepare_signature(
        &self,
        document: &[u8],
        certificate: &X509Certificate,
        options: &SignatureOptions,
    ) -> Result<PreparedSignature, SignatureError> {
        prepare_signature(document, certificate, options, Utc::now())
    }

    async fn complete_signature(
        &self,
        prepared: &PreparedSignature,
        signature_value: &[u8],
    ) -> Result<CmsSignature, SignatureError> {
        let signature = assemble_signature(prepared, signature_value)?;
        info!(
            signer = %prepared.certificate.subject,
            algorithm = %prepared.algorithm,
            detached = signature.content.is_none(),
            "Signature created"
        );
        match &prepared.timestamp {
            Some(tsa_url) => self.add_timestamp(&signature, tsa_url.as_deref()).await,
            None => Ok(signature),
        }
    }

    fn validate_signature(
        &self,
        signature: &CmsSignature,
    ) -> Result<SignatureValidationResult, SignatureError> {
        validate_signature(signature, None, &self.trust_anchors, Utc::now())
    }

    fn validate_detached_signature(
        &self,
        signature: &CmsSignature,
        content: &[u8],
    ) -> Result<SignatureValidationResult, SignatureError> {
        validate_signature(signature, Some(content), &self.trust_anchors, Utc::now())
    }

    fn validate_certificate_chain(
        &self,
        certificates: &[X509Certificate],
    ) -> CertificateValidationResult {
        validate_certificate_chain(certificates, &self.trust_anchors, Utc::now())
    }

    async fn timestamp_document(
        &self,
        document: &[u8],
        tsa_url: Option<&str>,
    ) -> Result<Timestamp, SignatureError> {
        let hash = self.timestamp_hash;
        self.gateway()?
            .timestamp_digest(hash, &digest(hash, document), tsa_url)
            .await
    }

    async fn add_timestamp(
        &self,
        signature: &CmsSignature,
        tsa_url: Option<&str>,
    ) -> Result<CmsSignature, SignatureError> {
        let hash = signature.signer_info.digest_algorithm;
        let imprint = digest(hash, &signature.signer_info.signature);
        let timestamp = self
            .gateway()?
            .timestamp_digest(hash, &imprint, tsa_url)
            .await?;
        debug!(tsa = %timestamp.tsa_name, issued_at = %timestamp.issued_at, "Embedding timestamp");
        embed_timestamp(signature, &timestamp)
    }

    async fn add_signature_to_document(
        &self,
        assembler: &dyn DocumentAssembler,
        document: &[u8],
        signature: &CmsSignature,
        placement: SignaturePlacement,
        field_name: &str,
    ) -> Result<Vec<u8>, SignatureError> {
        placement.validate()?;
        if field_name.trim().is_empty() {
            return Err(SignatureError::Document("field name must not be empty".into()));
        }
        let request = EmbeddingRequest {
            field_name: field_name.to_string(),
            placement,
            cms_der: signature.der.clone(),
            signer_name: common_name(&signature.signer_info.certificate.subject),
            signing_time: signature.signer_info.signing_time(),
        };
        assembler.embed_signature(document, &request).await
    }

    async fn extract_signatures(
        &self,
        assembler: &dyn DocumentAssembler,
        document: &[u8],
    ) -> Result<Vec<ExtractedSignature>, SignatureError> {
        assembler
            .extract_signatures(document)
            .await?
            .into_iter()
            .map(|embedded| -> Result<ExtractedSignature, SignatureError> {
                Ok(ExtractedSignature {
                    signature: parse_cms(&embedded.cms_der)?,
                    field_name: embedded.field_name,
                    placement: embedded.placement,
                    signed_content: embedded.signed_content,
                })
            })
            .collect()
    }

    async fn validate_document(
        &self,
        assembler: &dyn DocumentAssembler,
        document: &[u8],
    ) -> Result<Vec<SignatureValidationResult>, SignatureError> {
        self.extract_signatures(assembler, document)
            .await?
            .iter()
            .map(|extracted| {
                self.validate_detached_signature(&extracted.signature, &extracted.signed_content)
            })
            .collect()
    }
}
