//! # Integration Errors
//!
//! Provider failures arrive already mapped by their adapter; the manager
//! only adds the routing failure.

use ds_01_signature_engine::SignatureError;
use ds_02_hsm_providers::HsmError;
use shared_types::{ProviderTag, SigningAlgorithm};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrationError {
    /// No adapter registered for the key reference's provider.
    #[error("HSM provider not registered: {0}")]
    ProviderNotRegistered(ProviderTag),

    /// The provider answered for a different algorithm than requested.
    #[error("{provider} signed with {returned}, expected {requested}")]
    AlgorithmMismatch {
        provider: ProviderTag,
        requested: SigningAlgorithm,
        returned: SigningAlgorithm,
    },

    #[error(transparent)]
    Hsm(#[from] HsmError),

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

impl IntegrationError {
    /// Provider the failure concerns, where there is one.
    pub fn provider(&self) -> Option<ProviderTag> {
        match self {
            IntegrationError::ProviderNotRegistered(tag) => Some(*tag),
            IntegrationError::AlgorithmMismatch { provider, .. } => Some(*provider),
            IntegrationError::Hsm(err) => Some(err.provider()),
            IntegrationError::Signature(_) => None,
        }
    }
}
