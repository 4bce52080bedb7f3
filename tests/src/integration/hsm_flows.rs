//! # HSM Signing Flows
//!
//! The integration manager routing to real adapters over emulated custodians:
//!
//! 1. **AWS KMS**: SigV4 requests answered by an in-process KMS that signs
//! 2. **PKCS#11**: a software token behind the token backend port
//! 3. **Routing**: unregistered tags, unavailable providers, re-registration
//!
//! Every produced signature is validated by the engine against the test root.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ds_01_signature_engine::{SignatureEngine, SignatureEngineApi, SignatureOptions, TsaTimestampGateway};
    use ds_02_hsm_providers::test_support::SoftToken;
    use ds_02_hsm_providers::{AwsKmsConfig, AwsKmsProvider, HsmError, HsmProvider, Pkcs11Config, Pkcs11Provider};
    use ds_03_hsm_integration::{HsmIntegrationApi, HsmIntegrationManager, IntegrationError};
    use ds_04_timestamp_authority::test_support::FakeTsa;
    use ds_04_timestamp_authority::{FailoverConfig, TsaClient, TsaConfig};
    use shared_crypto::test_support::{p256_leaf, rsa_leaf, test_ca};
    use shared_crypto::LocalSigningKey;
    use shared_types::{HsmKeyReference, KeyAlgorithm, ProviderTag, SigningAlgorithm};

    use crate::support::EmulatedKms;

    const TSA: &str = "https://tsa.test/tsr";

    // =============================================================================
    // FIXTURES
    // =============================================================================

    fn engine() -> Arc<SignatureEngine> {
        let gateway = TsaTimestampGateway::new(
            TsaClient::new(FakeTsa::new()),
            FailoverConfig::new(TsaConfig::new(TSA)),
        );
        Arc::new(
            SignatureEngine::new()
                .with_trust_anchors(vec![test_ca().certificate.clone()])
                .with_timestamp_gateway(Arc::new(gateway)),
        )
    }

    fn manager(engine: &Arc<SignatureEngine>) -> HsmIntegrationManager {
        HsmIntegrationManager::new(Arc::clone(engine) as Arc<dyn SignatureEngineApi>)
    }

    async fn aws_provider(kms: Arc<EmulatedKms>) -> Arc<AwsKmsProvider> {
        let provider = AwsKmsProvider::with_transport(AwsKmsConfig::new("us-east-1", "AKIDTEST", "secret"), kms);
        provider.initialize().await.unwrap();
        Arc::new(provider)
    }

    async fn token_provider(token: SoftToken) -> Arc<Pkcs11Provider> {
        let provider = Pkcs11Provider::with_backend(Pkcs11Config::new("softtoken", "1234"), Arc::new(token));
        provider.initialize().await.unwrap();
        Arc::new(provider)
    }

    // =============================================================================
    // AWS KMS
    // =============================================================================

    #[tokio::test]
    async fn test_aws_signature_with_timestamp_validates() {
        let fixture = rsa_leaf();
        let kms = Arc::new(
            EmulatedKms::new().with_key("doc-key", LocalSigningKey::from_private_key(&fixture.private_key).unwrap()),
        );
        let engine = engine();
        let manager = manager(&engine);
        manager.register_provider(ProviderTag::AwsKms, aws_provider(kms.clone()).await);

        let signature = manager
            .sign_with_hsm(
                b"board minutes",
                &HsmKeyReference::new(ProviderTag::AwsKms, "doc-key"),
                &fixture.certificate,
                &SignatureOptions::default().with_timestamp(None),
            )
            .await
            .unwrap();

        assert_eq!(kms.operations(), vec!["ListKeys".to_string(), "Sign".to_string()]);
        assert_eq!(signature.signer_info.signature_algorithm, SigningAlgorithm::RsaPkcs1Sha256);
        let result = engine.validate_detached_signature(&signature, b"board minutes").unwrap();
        assert!(result.is_valid, "{:?}", result.errors);
        assert_eq!(result.timestamp_valid, Some(true));
    }

    #[tokio::test]
    async fn test_aws_pss_request_honoured() {
        let fixture = rsa_leaf();
        let kms = Arc::new(
            EmulatedKms::new().with_key("doc-key", LocalSigningKey::from_private_key(&fixture.private_key).unwrap()),
        );
        let engine = engine();
        let manager = manager(&engine);
        manager.register_provider(ProviderTag::AwsKms, aws_provider(kms).await);

        let options = SignatureOptions {
            algorithm: Some(SigningAlgorithm::RsaPssSha256),
            ..SignatureOptions::default()
        };
        let signature = manager
            .sign_with_hsm(
                b"pss",
                &HsmKeyReference::new(ProviderTag::AwsKms, "doc-key"),
                &fixture.certificate,
                &options,
            )
            .await
            .unwrap();
        assert_eq!(signature.signer_info.signature_algorithm, SigningAlgorithm::RsaPssSha256);
        assert!(engine.validate_detached_signature(&signature, b"pss").unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_aws_unknown_key_is_key_not_found() {
        let engine = engine();
        let manager = manager(&engine);
        manager.register_provider(ProviderTag::AwsKms, aws_provider(Arc::new(EmulatedKms::new())).await);

        let err = manager
            .sign_with_hsm(
                b"doc",
                &HsmKeyReference::new(ProviderTag::AwsKms, "missing"),
                &rsa_leaf().certificate,
                &SignatureOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::Hsm(HsmError::KeyNotFound { .. })));
        assert_eq!(err.provider(), Some(ProviderTag::AwsKms));
    }

    // =============================================================================
    // PKCS#11
    // =============================================================================

    #[tokio::test]
    async fn test_token_ecdsa_signature_validates() {
        let fixture = p256_leaf();
        let engine = engine();
        let manager = manager(&engine);
        manager.register_provider(
            ProviderTag::Pkcs11,
            token_provider(SoftToken::new().with_key("seal", &fixture.private_key)).await,
        );

        let signature = manager
            .sign_with_hsm(
                b"deed of transfer",
                &HsmKeyReference::new(ProviderTag::Pkcs11, "seal"),
                &fixture.certificate,
                &SignatureOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(signature.signer_info.signature_algorithm, SigningAlgorithm::EcdsaSha256);

        let result = engine.validate_detached_signature(&signature, b"deed of transfer").unwrap();
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[tokio::test]
    async fn test_token_key_not_matching_certificate_rejected() {
        let engine = engine();
        let manager = manager(&engine);
        manager.register_provider(
            ProviderTag::Pkcs11,
            token_provider(SoftToken::new().with_key("other", &p256_leaf().private_key)).await,
        );

        let err = manager
            .sign_with_hsm(
                b"doc",
                &HsmKeyReference::new(ProviderTag::Pkcs11, "other"),
                &shared_crypto::test_support::new_p256_leaf("CN=Dave Signer,O=DocSeal Test").certificate,
                &SignatureOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::Signature(_)));
    }

    #[tokio::test]
    async fn test_generated_p521_token_key_signs_with_sha512() {
        let token = Arc::new(SoftToken::new());
        let provider = Pkcs11Provider::with_backend(Pkcs11Config::new("softtoken", "1234"), token);
        provider.initialize().await.unwrap();
        let info = provider.create_key(KeyAlgorithm::Ec, 521, Some("archive")).await.unwrap();
        assert_eq!(info.key_size, 521);

        let engine = engine();
        let manager = manager(&engine);
        manager.register_provider(ProviderTag::Pkcs11, Arc::new(provider));
        let reference = HsmKeyReference::new(ProviderTag::Pkcs11, "archive");
        let public_key = manager.get_public_key(&reference).await.unwrap();
        let certificate = test_ca().issue_leaf("CN=Archive Seal,O=DocSeal Test", &public_key);

        let signature = manager
            .sign_with_hsm(b"ledger 2031", &reference, &certificate, &SignatureOptions::default())
            .await
            .unwrap();
        assert_eq!(signature.signer_info.signature_algorithm, SigningAlgorithm::EcdsaSha512);
        let result = engine.validate_detached_signature(&signature, b"ledger 2031").unwrap();
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[tokio::test]
    async fn test_token_key_of_other_type_fails_at_provider() {
        let engine = engine();
        let manager = manager(&engine);
        manager.register_provider(
            ProviderTag::Pkcs11,
            token_provider(SoftToken::new().with_key("rsa", &rsa_leaf().private_key)).await,
        );

        // P-256 certificate selects ECDSA; the token holds an RSA key
        let err = manager
            .sign_with_hsm(
                b"doc",
                &HsmKeyReference::new(ProviderTag::Pkcs11, "rsa"),
                &p256_leaf().certificate,
                &SignatureOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::Hsm(_)), "{err:?}");
        assert_eq!(err.provider(), Some(ProviderTag::Pkcs11));
    }

    // =============================================================================
    // ROUTING
    // =============================================================================

    #[tokio::test]
    async fn test_unregistered_provider_rejected() {
        let engine = engine();
        let manager = manager(&engine);
        let err = manager
            .sign_with_hsm(
                b"doc",
                &HsmKeyReference::new(ProviderTag::GcpKms, "projects/p/keys/k"),
                &rsa_leaf().certificate,
                &SignatureOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::ProviderNotRegistered(ProviderTag::GcpKms)));
    }

    #[tokio::test]
    async fn test_availability_tracks_each_provider() {
        let engine = engine();
        let manager = manager(&engine);
        let token = SoftToken::new().with_key("seal", &p256_leaf().private_key);
        let pkcs11 = token_provider(token).await;
        manager.register_provider(ProviderTag::Pkcs11, pkcs11);
        manager.register_provider(
            ProviderTag::AwsKms,
            Arc::new(AwsKmsProvider::with_transport(
                AwsKmsConfig::new("us-east-1", "AKIDTEST", "secret"),
                Arc::new(EmulatedKms::new()),
            )),
        );

        assert_eq!(
            manager.registered_providers(),
            vec![ProviderTag::AwsKms, ProviderTag::Pkcs11]
        );
        assert_eq!(manager.get_available_providers().await, vec![ProviderTag::Pkcs11]);

        let statuses = manager.provider_status().await;
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().any(|s| s.provider == ProviderTag::AwsKms && !s.available));
    }

    #[tokio::test]
    async fn test_reregistration_replaces_adapter() {
        let engine = engine();
        let manager = manager(&engine);
        let first = token_provider(SoftToken::new().with_key("a", &p256_leaf().private_key)).await;
        let second = token_provider(SoftToken::new().with_key("b", &rsa_leaf().private_key)).await;
        manager.register_provider(ProviderTag::Pkcs11, first);
        manager.register_provider(ProviderTag::Pkcs11, second);

        let keys = manager.list_keys(ProviderTag::Pkcs11).await.unwrap();
        let ids: Vec<_> = keys.iter().map(|k| k.key_id.as_str()).collect();
        assert_eq!(ids, ["b"]);
        assert_eq!(manager.registered_providers().len(), 1);
    }

    #[tokio::test]
    async fn test_public_key_matches_certificate() {
        let fixture = rsa_leaf();
        let engine = engine();
        let manager = manager(&engine);
        manager.register_provider(
            ProviderTag::Pkcs11,
            token_provider(SoftToken::new().with_key("doc", &fixture.private_key)).await,
        );

        let public_key = manager
            .get_public_key(&HsmKeyReference::new(ProviderTag::Pkcs11, "doc"))
            .await
            .unwrap();
        assert_eq!(public_key, fixture.certificate.public_key);
    }
}
