//! # DocSeal Signing Benchmarks
//!
//! | Path | What is measured |
//! |------|------------------|
//! | digest signing | raw RSA-2048 / P-256 signature over a SHA-256 digest |
//! | CMS creation | full detached signature, signed attributes included |
//! | CMS validation | integrity, signature and chain checks |
//! | HSM round trip | manager → PKCS#11 adapter → software token |

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ds_01_signature_engine::{SignatureEngine, SignatureEngineApi, SignatureOptions};
use ds_02_hsm_providers::test_support::SoftToken;
use ds_02_hsm_providers::{HsmProvider, Pkcs11Config, Pkcs11Provider};
use ds_03_hsm_integration::{HsmIntegrationApi, HsmIntegrationManager};
use shared_crypto::test_support::{p256_leaf, rsa_leaf, test_ca, SignerFixture};
use shared_crypto::{sha256, LocalSigningKey};
use shared_types::{HsmKeyReference, ProviderTag, SigningAlgorithm};

fn fixtures() -> [(&'static str, &'static SignerFixture, SigningAlgorithm); 2] {
    [
        ("rsa-2048", rsa_leaf(), SigningAlgorithm::RsaPkcs1Sha256),
        ("p-256", p256_leaf(), SigningAlgorithm::EcdsaSha256),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

// ============================================================================
// Digest signing
// ============================================================================

fn bench_digest_signing(c: &mut Criterion) {
    let mut group = c.benchmark_group("digest-signing");
    let digest = sha256(b"benchmark document");

    for (name, fixture, algorithm) in fixtures() {
        let key = LocalSigningKey::from_private_key(&fixture.private_key).expect("signing key");
        group.bench_function(BenchmarkId::new("sign", name), |b| {
            b.iter(|| key.sign_digest(black_box(&digest), algorithm).expect("sign"))
        });
    }
    group.finish();
}

// ============================================================================
// CMS creation and validation
// ============================================================================

fn bench_cms(c: &mut Criterion) {
    let rt = runtime();
    let engine = SignatureEngine::new().with_trust_anchors(vec![test_ca().certificate.clone()]);
    let options = SignatureOptions::default();

    let mut group = c.benchmark_group("cms");
    group.measurement_time(Duration::from_secs(10));

    for size in [1024usize, 1024 * 1024] {
        let document = vec![0x5Au8; size];
        group.throughput(Throughput::Bytes(size as u64));

        for (name, fixture, _) in fixtures() {
            group.bench_with_input(BenchmarkId::new(format!("create/{name}"), size), &document, |b, doc| {
                b.iter(|| {
                    rt.block_on(engine.create_signature(doc, &fixture.certificate, &fixture.private_key, &options))
                        .expect("signature")
                })
            });

            let signature = rt
                .block_on(engine.create_signature(&document, &fixture.certificate, &fixture.private_key, &options))
                .expect("signature");
            group.bench_with_input(BenchmarkId::new(format!("validate/{name}"), size), &document, |b, doc| {
                b.iter(|| {
                    let result = engine.validate_detached_signature(&signature, doc).expect("validation");
                    assert!(result.signature_valid);
                })
            });
        }
    }
    group.finish();
}

// ============================================================================
// HSM round trip
// ============================================================================

fn bench_hsm_round_trip(c: &mut Criterion) {
    let rt = runtime();
    let engine: Arc<dyn SignatureEngineApi> = Arc::new(SignatureEngine::new());
    let manager = HsmIntegrationManager::new(engine);

    let mut token = SoftToken::new();
    for (name, fixture, _) in fixtures() {
        token = token.with_key(name, &fixture.private_key);
    }
    let provider = Pkcs11Provider::with_backend(Pkcs11Config::new("softtoken", "0000"), Arc::new(token));
    rt.block_on(provider.initialize()).expect("token login");
    manager.register_provider(ProviderTag::Pkcs11, Arc::new(provider));

    let mut group = c.benchmark_group("hsm-round-trip");
    let options = SignatureOptions::default();
    for (name, fixture, _) in fixtures() {
        let reference = HsmKeyReference::new(ProviderTag::Pkcs11, name);
        group.bench_function(BenchmarkId::new("pkcs11", name), |b| {
            b.iter(|| {
                rt.block_on(manager.sign_with_hsm(b"benchmark", &reference, &fixture.certificate, &options))
                    .expect("hsm signature")
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_digest_signing, bench_cms, bench_hsm_round_trip);
criterion_main!(benches);
