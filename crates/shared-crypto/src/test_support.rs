//! # Test Fixtures
//!
//! Keys and certificates for tests. RSA key generation is slow in debug
//! builds, so the RSA fixtures are generated once per process.

#![allow(missing_docs)]

use crate::signatures::LocalSigningKey;
use p256::ecdsa::{DerSignature, SigningKey};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use shared_types::{KeyAlgorithm, PrivateKey, PublicKey, X509Certificate};
use spki::SubjectPublicKeyInfoOwned;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::{Decode, Encode};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};

const DAY: Duration = Duration::from_secs(86_400);

/// A signing key with a certificate issued by [`TestCa`].
pub struct SignerFixture {
    pub key: LocalSigningKey,
    pub private_key: PrivateKey,
    pub certificate: X509Certificate,
    pub issuer: X509Certificate,
}

/// A P-256 certificate authority.
pub struct TestCa {
    pub key: SigningKey,
    pub certificate: X509Certificate,
}

impl TestCa {
    /// Self-signed root.
    pub fn new_root(subject: &str) -> Self {
        let key = SigningKey::random(&mut rand::thread_rng());
        let name = Name::from_str(subject).expect("subject");
        let spki = spki_of(&verifying_public_key(&key));
        let builder = CertificateBuilder::new(
            Profile::Root,
            random_serial(),
            Validity::from_now(365 * DAY).expect("validity"),
            name,
            spki,
            &key,
        )
        .expect("root builder");
        let certificate = finish(builder);
        Self { key, certificate }
    }

    /// Intermediate CA issued by this CA.
    pub fn issue_sub_ca(&self, subject: &str) -> TestCa {
        let key = SigningKey::random(&mut rand::thread_rng());
        let profile = Profile::SubCA {
            issuer: self.name(),
            path_len_constraint: None,
        };
        let certificate = self.issue(
            profile,
            subject,
            &verifying_public_key(&key),
            Validity::from_now(180 * DAY).expect("validity"),
        );
        TestCa { key, certificate }
    }

    /// End-entity certificate with digitalSignature/nonRepudiation usage.
    pub fn issue_leaf(&self, subject: &str, public_key: &PublicKey) -> X509Certificate {
        self.issue(
            self.leaf_profile(),
            subject,
            public_key,
            Validity::from_now(90 * DAY).expect("validity"),
        )
    }

    /// End-entity certificate whose validity ended yesterday.
    pub fn issue_expired_leaf(&self, subject: &str, public_key: &PublicKey) -> X509Certificate {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock");
        let validity = Validity {
            not_before: Time::try_from(UNIX_EPOCH + now - 30 * DAY).expect("time"),
            not_after: Time::try_from(UNIX_EPOCH + now - DAY).expect("time"),
        };
        self.issue(self.leaf_profile(), subject, public_key, validity)
    }

    /// End-entity certificate without any extensions.
    pub fn issue_without_key_usage(&self, subject: &str, public_key: &PublicKey) -> X509Certificate {
        let profile = Profile::Manual {
            issuer: Some(self.name()),
        };
        self.issue(
            profile,
            subject,
            public_key,
            Validity::from_now(90 * DAY).expect("validity"),
        )
    }

    fn leaf_profile(&self) -> Profile {
        Profile::Leaf {
            issuer: self.name(),
            enable_key_agreement: false,
            enable_key_encipherment: false,
            include_subject_key_identifier: true,
        }
    }

    fn name(&self) -> Name {
        self.certificate.as_x509().tbs_certificate.subject.clone()
    }

    fn issue(
        &self,
        profile: Profile,
        subject: &str,
        public_key: &PublicKey,
        validity: Validity,
    ) -> X509Certificate {
        let builder = CertificateBuilder::new(
            profile,
            random_serial(),
            validity,
            Name::from_str(subject).expect("subject"),
            spki_of(public_key),
            &self.key,
        )
        .expect("certificate builder");
        finish(builder)
    }
}

/// Shared root CA.
pub fn test_ca() -> &'static TestCa {
    static CA: OnceLock<TestCa> = OnceLock::new();
    CA.get_or_init(|| TestCa::new_root("CN=DocSeal Test Root,O=DocSeal Test"))
}

/// RSA-2048 signer certified by [`test_ca`].
pub fn rsa_leaf() -> &'static SignerFixture {
    static LEAF: OnceLock<SignerFixture> = OnceLock::new();
    LEAF.get_or_init(|| {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("rsa keygen");
        let der = key.to_pkcs8_der().expect("pkcs8");
        signer_fixture(
            PrivateKey::from_pkcs8_der(der.as_bytes()).expect("private key"),
            "CN=Alice Signer,O=DocSeal Test",
        )
    })
}

/// P-256 signer certified by [`test_ca`].
pub fn p256_leaf() -> &'static SignerFixture {
    static LEAF: OnceLock<SignerFixture> = OnceLock::new();
    LEAF.get_or_init(|| new_p256_leaf("CN=Bob Signer,O=DocSeal Test"))
}

/// Fresh P-256 signer certified by [`test_ca`].
pub fn new_p256_leaf(subject: &str) -> SignerFixture {
    let secret = p256::SecretKey::random(&mut rand::thread_rng());
    let der = secret.to_pkcs8_der().expect("pkcs8");
    signer_fixture(
        PrivateKey::from_pkcs8_der(der.as_bytes()).expect("private key"),
        subject,
    )
}

/// Fresh P-521 signer certified by [`test_ca`].
pub fn new_p521_leaf(subject: &str) -> SignerFixture {
    signer_fixture(generate_private_key(KeyAlgorithm::Ec, 521), subject)
}

/// The RSA-2048 signing key of [`rsa_leaf`].
pub fn rsa_signer() -> &'static LocalSigningKey {
    &rsa_leaf().key
}

/// A second, unrelated RSA-2048 key.
pub fn rsa_other() -> &'static LocalSigningKey {
    static OTHER: OnceLock<LocalSigningKey> = OnceLock::new();
    OTHER.get_or_init(|| {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("rsa keygen");
        LocalSigningKey::Rsa(Box::new(key))
    })
}

/// The P-256 signing key of [`p256_leaf`].
pub fn p256_signer() -> &'static LocalSigningKey {
    &p256_leaf().key
}

/// Fresh private key of the given type. RSA-2048 reuses the key of
/// [`rsa_leaf`] to keep debug-build tests fast.
pub fn generate_private_key(algorithm: KeyAlgorithm, bits: u32) -> PrivateKey {
    let der = match (algorithm, bits) {
        (KeyAlgorithm::Rsa, 2048) => return rsa_leaf().private_key.clone(),
        (KeyAlgorithm::Rsa, bits) => RsaPrivateKey::new(&mut rand::thread_rng(), bits as usize)
            .expect("rsa keygen")
            .to_pkcs8_der()
            .expect("pkcs8"),
        (KeyAlgorithm::Ec, 256) => p256::SecretKey::random(&mut rand::thread_rng())
            .to_pkcs8_der()
            .expect("pkcs8"),
        (KeyAlgorithm::Ec, 384) => p384::SecretKey::random(&mut rand::thread_rng())
            .to_pkcs8_der()
            .expect("pkcs8"),
        (KeyAlgorithm::Ec, 521) => p521::SecretKey::random(&mut rand::thread_rng())
            .to_pkcs8_der()
            .expect("pkcs8"),
        (alg, bits) => panic!("no key fixture for {alg}-{bits}"),
    };
    PrivateKey::from_pkcs8_der(der.as_bytes()).expect("private key")
}

fn signer_fixture(private_key: PrivateKey, subject: &str) -> SignerFixture {
    let key = LocalSigningKey::from_private_key(&private_key).expect("signing key");
    let public = key.public_key().expect("public key");
    let ca = test_ca();
    SignerFixture {
        certificate: ca.issue_leaf(subject, &public),
        issuer: ca.certificate.clone(),
        key,
        private_key,
    }
}

fn verifying_public_key(key: &SigningKey) -> PublicKey {
    use p256::pkcs8::EncodePublicKey;
    let der = key
        .verifying_key()
        .to_public_key_der()
        .expect("public key der");
    PublicKey::from_spki_der(der.as_bytes()).expect("public key")
}

fn spki_of(public_key: &PublicKey) -> SubjectPublicKeyInfoOwned {
    SubjectPublicKeyInfoOwned::from_der(&public_key.der).expect("spki")
}

fn random_serial() -> SerialNumber {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] = (bytes[0] & 0x7F) | 0x01;
    SerialNumber::new(&bytes).expect("serial")
}

fn finish(builder: CertificateBuilder<'_, SigningKey>) -> X509Certificate {
    let cert = builder.build::<DerSignature>().expect("certificate");
    X509Certificate::from_der(&cert.to_der().expect("der")).expect("parse")
}
