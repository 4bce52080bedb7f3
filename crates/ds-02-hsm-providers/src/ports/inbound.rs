//! # Inbound Port (Driving Port / API)
//!
//! The uniform signing-provider contract. One implementation per backend;
//! callers hold them as `Arc<dyn HsmProvider>`.

use crate::domain::errors::HsmError;
use async_trait::async_trait;
use shared_types::{
    HsmKeyInfo, HsmKeyReference, HsmSigningRequest, HsmSigningResult, KeyAlgorithm,
    KeyDeletionStatus, ProviderTag, PublicKey, SigningAlgorithm,
};

/// A key custodian that signs digests without exposing key material.
///
/// Adapters are constructed from their configuration without touching the
/// network or loading native libraries. `initialize` establishes the
/// session; every other call fails with [`HsmError::NotInitialized`] until
/// it has succeeded.
#[async_trait]
pub trait HsmProvider: Send + Sync {
    /// Backend this adapter speaks to.
    fn provider(&self) -> ProviderTag;

    /// Native identifier for an abstract algorithm. Total over
    /// [`SigningAlgorithm`] and injective per provider.
    fn native_algorithm(&self, algorithm: SigningAlgorithm) -> &'static str;

    /// Resolve credentials and open a session.
    async fn initialize(&self) -> Result<(), HsmError>;

    /// Sign a pre-computed digest. ECDSA results are DER `Ecdsa-Sig-Value`.
    async fn sign(&self, request: &HsmSigningRequest) -> Result<HsmSigningResult, HsmError>;

    async fn get_public_key(&self, key: &HsmKeyReference) -> Result<PublicKey, HsmError>;

    /// Every key usable for signing, across all result pages. Keys limited
    /// to encryption are never returned.
    async fn list_keys(&self) -> Result<Vec<HsmKeyInfo>, HsmError>;

    /// Create a signing key of at least the requested strength.
    async fn create_key(
        &self,
        key_type: KeyAlgorithm,
        key_size: u32,
        key_id: Option<&str>,
    ) -> Result<HsmKeyInfo, HsmError>;

    /// Schedule deletion per provider policy.
    async fn delete_key(&self, key: &HsmKeyReference) -> Result<KeyDeletionStatus, HsmError>;

    /// Cheap, side-effect-free liveness probe.
    async fn test_connection(&self) -> bool;
}
