//! # In-Memory Document Model
//!
//! A [`DocumentAssembler`] that records embedded signatures instead of
//! writing them into a file format. Each signature covers the document
//! bytes it was embedded into.

#![allow(missing_docs)]

use crate::domain::entities::{EmbeddedSignature, EmbeddingRequest};
use crate::domain::errors::SignatureError;
use crate::ports::outbound::DocumentAssembler;
use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(Default)]
pub struct InMemoryDocumentAssembler {
    signatures: Mutex<Vec<EmbeddedSignature>>,
}

impl InMemoryDocumentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.lock().is_empty()
    }
}

#[async_trait]
impl DocumentAssembler for InMemoryDocumentAssembler {
    async fn embed_signature(
        &self,
        document: &[u8],
        request: &EmbeddingRequest,
    ) -> Result<Vec<u8>, SignatureError> {
        let mut signatures = self.signatures.lock();
        if let Some(existing) = signatures.iter().find(|s| {
            s.field_name == request.field_name || s.placement.overlaps(&request.placement)
        }) {
            return Err(SignatureError::Document(format!(
                "signature field '{}' conflicts with existing field '{}'",
                request.field_name, existing.field_name
            )));
        }
        signatures.push(EmbeddedSignature {
            field_name: request.field_name.clone(),
            placement: request.placement,
            cms_der: request.cms_der.clone(),
            signed_content: document.to_vec(),
        });
        Ok(document.to_vec())
    }

    async fn extract_signatures(
        &self,
        _document: &[u8],
    ) -> Result<Vec<EmbeddedSignature>, SignatureError> {
        Ok(self.signatures.lock().clone())
    }
}
