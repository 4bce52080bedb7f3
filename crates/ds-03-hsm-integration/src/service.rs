//! # HSM Integration Service
//!
//! Registry of provider adapters keyed by [`ProviderTag`]. Signing goes
//! through the signature engine in two halves around the provider call, so
//! the manager never touches CMS encoding itself.
//!
//! Availability is probed on demand: every call to
//! [`HsmIntegrationApi::get_available_providers`] runs `test_connection` on
//! each registered adapter concurrently. Nothing is cached.

use crate::domain::entities::ProviderStatus;
use crate::domain::errors::IntegrationError;
use crate::ports::inbound::HsmIntegrationApi;
use async_trait::async_trait;
use chrono::Utc;
use ds_01_signature_engine::{SignatureEngineApi, SignatureOptions};
use ds_02_hsm_providers::HsmProvider;
use futures::future::join_all;
use parking_lot::RwLock;
use shared_types::{
    CmsSignature, HsmKeyInfo, HsmKeyReference, HsmSigningRequest, ProviderTag, PublicKey, X509Certificate,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct HsmIntegrationManager {
    providers: RwLock<HashMap<ProviderTag, Arc<dyn HsmProvider>>>,
    engine: Arc<dyn SignatureEngineApi>,
}

impl HsmIntegrationManager {
    pub fn new(engine: Arc<dyn SignatureEngineApi>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            engine,
        }
    }

    pub fn engine(&self) -> &Arc<dyn SignatureEngineApi> {
        &self.engine
    }

    fn require(&self, tag: ProviderTag) -> Result<Arc<dyn HsmProvider>, IntegrationError> {
        self.get_provider(tag)
            .ok_or(IntegrationError::ProviderNotRegistered(tag))
    }

    /// Registered adapters, sorted by tag. The lock is released before any
    /// provider call.
    fn snapshot(&self) -> Vec<(ProviderTag, Arc<dyn HsmProvider>)> {
        let mut providers: Vec<_> = self
            .providers
            .read()
            .iter()
            .map(|(tag, provider)| (*tag, Arc::clone(provider)))
            .collect();
        providers.sort_by_key(|(tag, _)| *tag);
        providers
    }
}

#[async_trait]
impl HsmIntegrationApi for HsmIntegrationManager {
    fn register_provider(&self, tag: ProviderTag, provider: Arc<dyn HsmProvider>) {
        if provider.provider() != tag {
            warn!(tag = %tag, adapter = %provider.provider(), "Provider registered under a foreign tag");
        }
        match self.providers.write().insert(tag, provider) {
            Some(_) => info!(provider = %tag, "HSM provider re-registered, replacing previous adapter"),
            None => info!(provider = %tag, "HSM provider registered"),
        }
    }

    fn get_provider(&self, tag: ProviderTag) -> Option<Arc<dyn HsmProvider>> {
        self.providers.read().get(&tag).cloned()
    }

    fn registered_providers(&self) -> Vec<ProviderTag> {
        self.snapshot().into_iter().map(|(tag, _)| tag).collect()
    }

    async fn sign_with_hsm(
        &self,
        document: &[u8],
        key_reference: &HsmKeyReference,
        certificate: &X509Certificate,
        options: &SignatureOptions,
    ) -> Result<CmsSignature, IntegrationError> {
        let provider = self.require(key_reference.provider)?;
        let prepared = self.engine.prepare_signature(document, certificate, options)?;

        let request = HsmSigningRequest {
            key_reference: key_reference.clone(),
            digest: prepared.digest.clone(),
            algorithm: prepared.algorithm,
        };
        debug!(
            provider = %key_reference.provider,
            key_id = %key_reference.key_id,
            algorithm = %prepared.algorithm,
            native = provider.native_algorithm(prepared.algorithm),
            "Routing digest to HSM"
        );
        let result = provider.sign(&request).await.inspect_err(|e| {
            warn!(provider = %key_reference.provider, key_id = %key_reference.key_id, error = %e, "HSM signing failed");
        })?;
        if result.algorithm != prepared.algorithm {
            return Err(IntegrationError::AlgorithmMismatch {
                provider: key_reference.provider,
                requested: prepared.algorithm,
                returned: result.algorithm,
            });
        }

        let signature = self.engine.complete_signature(&prepared, &result.signature).await?;
        info!(
            provider = %key_reference.provider,
            key_id = %result.key_id,
            signer = %certificate.subject,
            timestamped = signature.timestamp.is_some(),
            "HSM-backed signature created"
        );
        Ok(signature)
    }

    async fn get_available_providers(&self) -> Vec<ProviderTag> {
        self.provider_status()
            .await
            .into_iter()
            .filter(|status| status.available)
            .map(|status| status.provider)
            .collect()
    }

    async fn provider_status(&self) -> Vec<ProviderStatus> {
        let providers = self.snapshot();
        let probes = providers.iter().map(|(_, provider)| provider.test_connection());
        let results = join_all(probes).await;

        providers
            .iter()
            .zip(results)
            .map(|((tag, _), available)| {
                debug!(provider = %tag, available, "Provider probed");
                ProviderStatus {
                    provider: *tag,
                    available,
                    checked_at: Utc::now(),
                }
            })
            .collect()
    }

    async fn get_public_key(&self, key_reference: &HsmKeyReference) -> Result<PublicKey, IntegrationError> {
        let provider = self.require(key_reference.provider)?;
        Ok(provider.get_public_key(key_reference).await?)
    }

    async fn list_keys(&self, tag: ProviderTag) -> Result<Vec<HsmKeyInfo>, IntegrationError> {
        let provider = self.require(tag)?;
        Ok(provider.list_keys().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_01_signature_engine::SignatureEngine;
    use ds_02_hsm_providers::test_support::SoftToken;
    use ds_02_hsm_providers::{HsmError, Pkcs11Config, Pkcs11Provider};
    use shared_crypto::test_support::{p256_leaf, rsa_leaf, rsa_other};
    use shared_crypto::LocalSigningKey;
    use shared_types::{
        DeletionState, HsmSigningResult, KeyAlgorithm, KeyDeletionStatus, SigningAlgorithm,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider over a local key that counts calls.
    struct LocalProvider {
        tag: ProviderTag,
        key: &'static LocalSigningKey,
        reachable: bool,
        reported_algorithm: Option<SigningAlgorithm>,
        sign_calls: AtomicUsize,
    }

    impl LocalProvider {
        fn new(tag: ProviderTag, key: &'static LocalSigningKey) -> Self {
            Self {
                tag,
                key,
                reachable: true,
                reported_algorithm: None,
                sign_calls: AtomicUsize::new(0),
            }
        }

        fn unreachable(mut self) -> Self {
            self.reachable = false;
            self
        }
    }

    #[async_trait]
    impl HsmProvider for LocalProvider {
        fn provider(&self) -> ProviderTag {
            self.tag
        }

        fn native_algorithm(&self, algorithm: SigningAlgorithm) -> &'static str {
            algorithm.as_str()
        }

        async fn initialize(&self) -> Result<(), HsmError> {
            Ok(())
        }

        async fn sign(&self, request: &HsmSigningRequest) -> Result<HsmSigningResult, HsmError> {
            self.sign_calls.fetch_add(1, Ordering::SeqCst);
            if request.key_reference.key_id == "missing" {
                return Err(HsmError::KeyNotFound {
                    provider: self.tag,
                    key_id: "missing".into(),
                });
            }
            let signature = self
                .key
                .sign_digest(&request.digest, request.algorithm)
                .map_err(|e| HsmError::Signing {
                    provider: self.tag,
                    message: e.to_string(),
                })?;
            Ok(HsmSigningResult {
                signature,
                algorithm: self.reported_algorithm.unwrap_or(request.algorithm),
                key_id: request.key_reference.key_id.clone(),
                provider: self.tag,
                signed_at: Utc::now(),
            })
        }

        async fn get_public_key(&self, _key: &HsmKeyReference) -> Result<PublicKey, HsmError> {
            self.key.public_key().map_err(|e| HsmError::Signing {
                provider: self.tag,
                message: e.to_string(),
            })
        }

        async fn list_keys(&self) -> Result<Vec<HsmKeyInfo>, HsmError> {
            Ok(Vec::new())
        }

        async fn create_key(
            &self,
            _key_type: KeyAlgorithm,
            _key_size: u32,
            _key_id: Option<&str>,
        ) -> Result<HsmKeyInfo, HsmError> {
            Err(HsmError::NotInitialized(self.tag))
        }

        async fn delete_key(&self, key: &HsmKeyReference) -> Result<KeyDeletionStatus, HsmError> {
            Ok(KeyDeletionStatus {
                key_id: key.key_id.clone(),
                state: DeletionState::PendingDeletion,
                effective_at: None,
            })
        }

        async fn test_connection(&self) -> bool {
            self.reachable
        }
    }

    fn manager() -> HsmIntegrationManager {
        HsmIntegrationManager::new(Arc::new(SignatureEngine::new()))
    }

    #[tokio::test]
    async fn test_sign_with_registered_provider_validates() {
        let manager = manager();
        manager.register_provider(
            ProviderTag::AwsKms,
            Arc::new(LocalProvider::new(ProviderTag::AwsKms, &rsa_leaf().key)),
        );
        let document = b"Master services agreement";

        let signature = manager
            .sign_with_hsm(
                document,
                &HsmKeyReference::new(ProviderTag::AwsKms, "alias/alice"),
                &rsa_leaf().certificate,
                &SignatureOptions::default(),
            )
            .await
            .unwrap();

        let report = manager
            .engine()
            .validate_detached_signature(&signature, document)
            .unwrap();
        assert!(report.document_integrity_valid);
        assert!(report.signature_valid);
    }

    #[tokio::test]
    async fn test_unregistered_provider_fails_before_signing() {
        let manager = manager();
        let err = manager
            .sign_with_hsm(
                b"doc",
                &HsmKeyReference::new(ProviderTag::GcpKms, "k"),
                &rsa_leaf().certificate,
                &SignatureOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, IntegrationError::ProviderNotRegistered(ProviderTag::GcpKms));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let manager = manager();
        let first = Arc::new(LocalProvider::new(ProviderTag::AwsKms, rsa_other()));
        let second = Arc::new(LocalProvider::new(ProviderTag::AwsKms, &rsa_leaf().key));
        manager.register_provider(ProviderTag::AwsKms, first.clone());
        manager.register_provider(ProviderTag::AwsKms, second.clone());
        assert_eq!(manager.registered_providers(), vec![ProviderTag::AwsKms]);

        manager
            .sign_with_hsm(
                b"doc",
                &HsmKeyReference::new(ProviderTag::AwsKms, "k"),
                &rsa_leaf().certificate,
                &SignatureOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(first.sign_calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.sign_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provider_errors_pass_through() {
        let manager = manager();
        manager.register_provider(
            ProviderTag::AzureKeyVault,
            Arc::new(LocalProvider::new(ProviderTag::AzureKeyVault, &rsa_leaf().key)),
        );
        let err = manager
            .sign_with_hsm(
                b"doc",
                &HsmKeyReference::new(ProviderTag::AzureKeyVault, "missing"),
                &rsa_leaf().certificate,
                &SignatureOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::Hsm(HsmError::KeyNotFound { .. })));
    }

    #[tokio::test]
    async fn test_key_not_matching_certificate_is_signature_error() {
        let manager = manager();
        manager.register_provider(
            ProviderTag::AwsKms,
            Arc::new(LocalProvider::new(ProviderTag::AwsKms, rsa_other())),
        );
        let err = manager
            .sign_with_hsm(
                b"doc",
                &HsmKeyReference::new(ProviderTag::AwsKms, "k"),
                &rsa_leaf().certificate,
                &SignatureOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::Signature(_)));
    }

    #[tokio::test]
    async fn test_algorithm_mismatch_rejected() {
        let manager = manager();
        let mut provider = LocalProvider::new(ProviderTag::AwsKms, &rsa_leaf().key);
        provider.reported_algorithm = Some(SigningAlgorithm::RsaPssSha256);
        manager.register_provider(ProviderTag::AwsKms, Arc::new(provider));
        let err = manager
            .sign_with_hsm(
                b"doc",
                &HsmKeyReference::new(ProviderTag::AwsKms, "k"),
                &rsa_leaf().certificate,
                &SignatureOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::AlgorithmMismatch { .. }));
    }

    #[tokio::test]
    async fn test_available_providers_probe_on_demand() {
        let manager = manager();
        manager.register_provider(
            ProviderTag::GcpKms,
            Arc::new(LocalProvider::new(ProviderTag::GcpKms, &rsa_leaf().key).unreachable()),
        );
        manager.register_provider(
            ProviderTag::AwsKms,
            Arc::new(LocalProvider::new(ProviderTag::AwsKms, &rsa_leaf().key)),
        );
        assert_eq!(manager.get_available_providers().await, vec![ProviderTag::AwsKms]);

        let status = manager.provider_status().await;
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].provider, ProviderTag::AwsKms);
        assert!(status[0].available);
        assert!(!status[1].available);

        // an uninitialized token is registered but unavailable
        manager.register_provider(
            ProviderTag::Pkcs11,
            Arc::new(Pkcs11Provider::with_backend(
                Pkcs11Config::new("/usr/lib/softhsm/libsofthsm2.so", "1234"),
                Arc::new(SoftToken::new()),
            )),
        );
        assert_eq!(manager.registered_providers().len(), 3);
        assert_eq!(manager.get_available_providers().await, vec![ProviderTag::AwsKms]);
    }

    #[tokio::test]
    async fn test_ecdsa_token_signature_through_manager() {
        let token = Arc::new(SoftToken::new().with_key("bob", &p256_leaf().private_key));
        let provider = Pkcs11Provider::with_backend(
            Pkcs11Config::new("/usr/lib/softhsm/libsofthsm2.so", "1234"),
            token,
        );
        provider.initialize().await.unwrap();
        let manager = manager();
        manager.register_provider(ProviderTag::Pkcs11, Arc::new(provider));

        let reference = HsmKeyReference::new(ProviderTag::Pkcs11, "bob");
        let signature = manager
            .sign_with_hsm(b"purchase order", &reference, &p256_leaf().certificate, &SignatureOptions::default())
            .await
            .unwrap();
        assert_eq!(signature.signer_info.signature_algorithm, SigningAlgorithm::EcdsaSha256);

        let public = manager.get_public_key(&reference).await.unwrap();
        assert_eq!(public, p256_leaf().certificate.public_key);
        assert_eq!(manager.list_keys(ProviderTag::Pkcs11).await.unwrap().len(), 1);
    }
}
