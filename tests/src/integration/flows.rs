//! # Signing Flows
//!
//! Local-key signing through the engine with a recording TSA:
//!
//! 1. **Sign → timestamp → validate**: embedded tokens verify and cover the
//!    signature value
//! 2. **Failover**: an unreachable primary falls through to the next server
//! 3. **Tampering**: modified content or a foreign root is reported, never
//!    raised

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ds_01_signature_engine::{
        parse_cms, SignatureEngine, SignatureEngineApi, SignatureError, SignatureOptions, TsaTimestampGateway,
    };
    use ds_04_timestamp_authority::test_support::{FakeTsa, TsaBehavior};
    use ds_04_timestamp_authority::{FailoverConfig, TsaClient, TsaConfig, TsaError};
    use shared_crypto::test_support::{p256_leaf, rsa_leaf, test_ca, TestCa};
    use shared_crypto::{digest, sha256};
    use shared_types::HashAlgorithm;

    const PRIMARY: &str = "https://tsa-primary.test/tsr";
    const SECONDARY: &str = "https://tsa-secondary.test/tsr";

    // =============================================================================
    // FIXTURES
    // =============================================================================

    fn engine(tsa: Arc<FakeTsa>) -> SignatureEngine {
        let servers = FailoverConfig::new(TsaConfig::new(PRIMARY)).with_fallback(TsaConfig::new(SECONDARY));
        let gateway = TsaTimestampGateway::new(TsaClient::new(tsa), servers);
        SignatureEngine::new()
            .with_trust_anchors(vec![test_ca().certificate.clone()])
            .with_timestamp_gateway(Arc::new(gateway))
    }

    // =============================================================================
    // SIGN → TIMESTAMP → VALIDATE
    // =============================================================================

    #[tokio::test]
    async fn test_rsa_signature_with_timestamp_validates() {
        let tsa = Arc::new(FakeTsa::new());
        let engine = engine(tsa.clone());
        let fixture = rsa_leaf();

        let signature = engine
            .create_signature(
                b"master services agreement",
                &fixture.certificate,
                &fixture.private_key,
                &SignatureOptions::default().with_timestamp(None),
            )
            .await
            .unwrap();

        let timestamp = signature.timestamp.as_ref().unwrap();
        assert_eq!(
            timestamp.message_imprint.digest,
            sha256(&signature.signer_info.signature).to_vec()
        );
        assert_eq!(tsa.calls_to(PRIMARY), 1);

        let result = engine
            .validate_detached_signature(&signature, b"master services agreement")
            .unwrap();
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.certificate.trusted_root);
        assert_eq!(result.timestamp_valid, Some(true));
        assert_eq!(result.timestamp_time, Some(timestamp.issued_at));
    }

    #[tokio::test]
    async fn test_signature_survives_der_and_pem_round_trip() {
        let engine = engine(Arc::new(FakeTsa::new()));
        let fixture = p256_leaf();
        let signature = engine
            .create_signature(
                b"invoice 2291",
                &fixture.certificate,
                &fixture.private_key,
                &SignatureOptions::default().with_timestamp(None),
            )
            .await
            .unwrap();

        let from_pem = parse_cms(signature.to_pem().unwrap().as_bytes()).unwrap();
        let from_der = parse_cms(&signature.der).unwrap();
        assert_eq!(from_pem.der, from_der.der);

        let result = engine.validate_detached_signature(&from_pem, b"invoice 2291").unwrap();
        assert!(result.is_valid, "{:?}", result.errors);
        assert_eq!(result.timestamp_valid, Some(true));
    }

    #[tokio::test]
    async fn test_attached_signature_carries_content() {
        let engine = engine(Arc::new(FakeTsa::new()));
        let fixture = rsa_leaf();
        let options = SignatureOptions {
            detached: false,
            ..SignatureOptions::default()
        };
        let signature = engine
            .create_signature(b"attached body", &fixture.certificate, &fixture.private_key, &options)
            .await
            .unwrap();

        assert_eq!(signature.content.as_deref(), Some(&b"attached body"[..]));
        let result = engine.validate_signature(&parse_cms(&signature.der).unwrap()).unwrap();
        assert!(result.is_valid, "{:?}", result.errors);
        assert_eq!(result.timestamp_valid, None);
    }

    #[tokio::test]
    async fn test_later_timestamp_added_to_existing_signature() {
        let tsa = Arc::new(FakeTsa::new());
        let engine = engine(tsa.clone());
        let fixture = rsa_leaf();
        let plain = engine
            .create_signature(b"archive", &fixture.certificate, &fixture.private_key, &SignatureOptions::default())
            .await
            .unwrap();
        assert_eq!(tsa.calls().len(), 0);

        let stamped = engine.add_timestamp(&plain, Some(SECONDARY)).await.unwrap();
        assert_eq!(tsa.calls(), vec![SECONDARY.to_string()]);
        assert!(plain.timestamp.is_none());

        let result = engine.validate_detached_signature(&stamped, b"archive").unwrap();
        assert!(result.is_valid, "{:?}", result.errors);
        assert_eq!(result.timestamp_valid, Some(true));
    }

    #[tokio::test]
    async fn test_document_timestamp_uses_configured_hash() {
        let tsa = Arc::new(FakeTsa::new());
        let servers = FailoverConfig::new(TsaConfig::new(PRIMARY));
        let engine = SignatureEngine::new()
            .with_timestamp_gateway(Arc::new(TsaTimestampGateway::new(TsaClient::new(tsa), servers)))
            .with_timestamp_hash(HashAlgorithm::Sha512);

        let timestamp = engine.timestamp_document(b"ledger page", None).await.unwrap();
        assert_eq!(timestamp.message_imprint.hash_algorithm, HashAlgorithm::Sha512);
        assert_eq!(timestamp.message_imprint.digest, digest(HashAlgorithm::Sha512, b"ledger page"));
        assert!(!timestamp.token_der.is_empty());
    }

    // =============================================================================
    // FAILOVER
    // =============================================================================

    #[tokio::test]
    async fn test_unreachable_primary_fails_over() {
        let tsa = Arc::new(FakeTsa::new().with_behavior(PRIMARY, TsaBehavior::Unreachable));
        let engine = engine(tsa.clone());

        let timestamp = engine.timestamp_document(b"contract", None).await.unwrap();
        assert_eq!(timestamp.tsa_url.as_deref(), Some(SECONDARY));
        assert_eq!(tsa.calls(), vec![PRIMARY.to_string(), SECONDARY.to_string()]);
    }

    #[tokio::test]
    async fn test_rejection_from_every_server_is_reported() {
        let tsa = Arc::new(
            FakeTsa::new()
                .with_behavior(PRIMARY, TsaBehavior::Unreachable)
                .with_behavior(SECONDARY, TsaBehavior::Reject(2)),
        );
        let engine = engine(tsa);
        let fixture = rsa_leaf();

        let err = engine
            .create_signature(
                b"contract",
                &fixture.certificate,
                &fixture.private_key,
                &SignatureOptions::default().with_timestamp(None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SignatureError::TimestampServer(TsaError::Response { status: 2, .. })));
    }

    #[tokio::test]
    async fn test_single_url_skips_failover_list() {
        let tsa = Arc::new(FakeTsa::new().with_behavior(PRIMARY, TsaBehavior::Unreachable));
        let engine = engine(tsa.clone());

        let err = engine.timestamp_document(b"contract", Some(PRIMARY)).await.unwrap_err();
        assert!(matches!(err, SignatureError::TimestampServer(TsaError::Connection { .. })));
        assert_eq!(tsa.calls_to(SECONDARY), 0);
    }

    // =============================================================================
    // REPORTED INVALIDITY
    // =============================================================================

    #[tokio::test]
    async fn test_tampered_content_reported_not_raised() {
        let engine = engine(Arc::new(FakeTsa::new()));
        let fixture = p256_leaf();
        let signature = engine
            .create_signature(b"pay 100", &fixture.certificate, &fixture.private_key, &SignatureOptions::default())
            .await
            .unwrap();

        let result = engine.validate_detached_signature(&signature, b"pay 900").unwrap();
        assert!(!result.is_valid);
        assert!(!result.document_integrity_valid);
        assert!(result.signature_valid);
    }

    #[tokio::test]
    async fn test_foreign_root_is_untrusted_but_reported_as_warning() {
        let fixture = rsa_leaf();
        let stranger = TestCa::new_root("CN=Stranger Root,O=Elsewhere");
        let engine = SignatureEngine::new().with_trust_anchors(vec![stranger.certificate.clone()]);
        let signature = engine
            .create_signature(b"memo", &fixture.certificate, &fixture.private_key, &SignatureOptions::default())
            .await
            .unwrap();

        let result = engine.validate_detached_signature(&signature, b"memo").unwrap();
        assert!(result.signature_valid);
        assert!(!result.certificate.trusted_root);
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("does not lead to a trusted anchor")));
    }

    #[tokio::test]
    async fn test_intermediate_chain_validates() {
        let intermediate = test_ca().issue_sub_ca("CN=DocSeal Issuing CA,O=DocSeal Test");
        let leaf = shared_crypto::test_support::new_p256_leaf("CN=Carol Signer,O=DocSeal Test");
        let key = shared_crypto::LocalSigningKey::from_private_key(&leaf.private_key).unwrap();
        let certificate = intermediate.issue_leaf("CN=Carol Signer,O=DocSeal Test", &key.public_key().unwrap());

        let engine = SignatureEngine::new().with_trust_anchors(vec![test_ca().certificate.clone()]);
        let options = SignatureOptions {
            extra_certificates: vec![intermediate.certificate.clone()],
            ..SignatureOptions::default()
        };
        let signature = engine
            .create_signature(b"chained", &certificate, &leaf.private_key, &options)
            .await
            .unwrap();

        let result = engine.validate_detached_signature(&signature, b"chained").unwrap();
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.certificate.chain_valid);
    }
}
