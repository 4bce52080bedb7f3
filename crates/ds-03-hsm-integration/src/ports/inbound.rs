//! # Inbound Port (Driving Port / API)

use crate::domain::entities::ProviderStatus;
use crate::domain::errors::IntegrationError;
use async_trait::async_trait;
use ds_01_signature_engine::SignatureOptions;
use ds_02_hsm_providers::HsmProvider;
use shared_types::{CmsSignature, HsmKeyInfo, HsmKeyReference, ProviderTag, PublicKey, X509Certificate};
use std::sync::Arc;

/// Routes HSM-backed signing to the adapter named by a key reference.
#[async_trait]
pub trait HsmIntegrationApi: Send + Sync {
    /// Register `provider` under `tag`, replacing any earlier registration.
    fn register_provider(&self, tag: ProviderTag, provider: Arc<dyn HsmProvider>);

    fn get_provider(&self, tag: ProviderTag) -> Option<Arc<dyn HsmProvider>>;

    /// Registered tags in stable order, whether reachable or not.
    fn registered_providers(&self) -> Vec<ProviderTag>;

    /// Sign `document` with the referenced key and assemble CMS around the
    /// result. The certificate must hold the key's public half.
    ///
    /// # Errors
    /// * `IntegrationError::ProviderNotRegistered` - nothing registered for
    ///   `key_reference.provider`
    /// * `IntegrationError::Hsm` - the provider failed the signing call
    /// * `IntegrationError::Signature` - CMS assembly or timestamping failed
    async fn sign_with_hsm(
        &self,
        document: &[u8],
        key_reference: &HsmKeyReference,
        certificate: &X509Certificate,
        options: &SignatureOptions,
    ) -> Result<CmsSignature, IntegrationError>;

    /// Registered providers whose connectivity probe passes right now.
    async fn get_available_providers(&self) -> Vec<ProviderTag>;

    /// Probe every registered provider.
    async fn provider_status(&self) -> Vec<ProviderStatus>;

    async fn get_public_key(&self, key_reference: &HsmKeyReference) -> Result<PublicKey, IntegrationError>;

    async fn list_keys(&self, tag: ProviderTag) -> Result<Vec<HsmKeyInfo>, IntegrationError>;
}
