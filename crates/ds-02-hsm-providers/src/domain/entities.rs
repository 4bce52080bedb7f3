//! # Provider Configuration and Key Specs
//!
//! Per-provider connection settings, the key-spec tables used by
//! `create_key`, and the token mechanisms used by PKCS#11.

use crate::domain::errors::HsmError;
use serde::Deserialize;
use shared_types::{HashAlgorithm, HsmSigningRequest, KeyAlgorithm, ProviderTag, SigningAlgorithm};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default per-call timeout for remote providers.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

fn default_timeout() -> Duration {
    DEFAULT_PROVIDER_TIMEOUT
}

fn redact<T>(secret: &Option<T>) -> Option<&'static str> {
    secret.as_ref().map(|_| "<redacted>")
}

// =============================================================================
// AWS KMS
// =============================================================================

fn default_pending_window() -> u32 {
    30
}

#[derive(Clone, Deserialize)]
pub struct AwsKmsConfig {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
    /// Overrides `https://kms.{region}.amazonaws.com`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Days before a scheduled deletion takes effect (7 to 30).
    #[serde(default = "default_pending_window")]
    pub pending_window_days: u32,
    #[serde(skip, default = "default_timeout")]
    pub timeout: Duration,
}

impl AwsKmsConfig {
    pub fn new(
        region: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            endpoint: None,
            pending_window_days: default_pending_window(),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Service endpoint for `region`, honouring an explicit override.
    pub fn endpoint_for(&self, region: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://kms.{region}.amazonaws.com"),
        }
    }
}

impl fmt::Debug for AwsKmsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsKmsConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &redact(&self.session_token))
            .field("endpoint", &self.endpoint)
            .field("pending_window_days", &self.pending_window_days)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// =============================================================================
// GCP Cloud KMS
// =============================================================================

fn default_protection_level() -> String {
    "HSM".to_string()
}

#[derive(Clone, Deserialize)]
pub struct GcpKmsConfig {
    pub project_id: String,
    pub location: String,
    pub key_ring: String,
    /// OAuth2 bearer token with the `cloudkms` scope.
    pub access_token: String,
    /// Overrides `https://cloudkms.googleapis.com/v1`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// `HSM` or `SOFTWARE`, applied to created keys.
    #[serde(default = "default_protection_level")]
    pub protection_level: String,
    #[serde(skip, default = "default_timeout")]
    pub timeout: Duration,
}

impl GcpKmsConfig {
    pub fn new(
        project_id: impl Into<String>,
        location: impl Into<String>,
        key_ring: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            location: location.into(),
            key_ring: key_ring.into(),
            access_token: access_token.into(),
            endpoint: None,
            protection_level: default_protection_level(),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn base_url(&self) -> String {
        self.endpoint
            .as_deref()
            .unwrap_or("https://cloudkms.googleapis.com/v1")
            .trim_end_matches('/')
            .to_string()
    }
}

impl fmt::Debug for GcpKmsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpKmsConfig")
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .field("key_ring", &self.key_ring)
            .field("access_token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("protection_level", &self.protection_level)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// =============================================================================
// Azure Key Vault
// =============================================================================

fn default_authority() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_api_version() -> String {
    "7.4".to_string()
}

#[derive(Clone, Deserialize)]
pub struct AzureKeyVaultConfig {
    /// e.g. `https://my-vault.vault.azure.net`
    pub vault_url: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_authority")]
    pub authority: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Create software-protected keys (`RSA`, `EC`) instead of `-HSM` ones.
    #[serde(default)]
    pub software_keys: bool,
    #[serde(skip, default = "default_timeout")]
    pub timeout: Duration,
}

impl AzureKeyVaultConfig {
    pub fn new(
        vault_url: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            vault_url: vault_url.into(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authority: default_authority(),
            api_version: default_api_version(),
            software_keys: false,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

impl fmt::Debug for AzureKeyVaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureKeyVaultConfig")
            .field("vault_url", &self.vault_url)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("authority", &self.authority)
            .field("api_version", &self.api_version)
            .field("software_keys", &self.software_keys)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// =============================================================================
// PKCS#11
// =============================================================================

#[derive(Clone, Deserialize)]
pub struct Pkcs11Config {
    /// Path to the vendor module, e.g. `/usr/lib/softhsm/libsofthsm2.so`.
    pub library_path: PathBuf,
    /// Slot id; the first slot with a token when absent.
    #[serde(default)]
    pub slot: Option<u64>,
    pub pin: String,
}

impl Pkcs11Config {
    pub fn new(library_path: impl Into<PathBuf>, pin: impl Into<String>) -> Self {
        Self {
            library_path: library_path.into(),
            slot: None,
            pin: pin.into(),
        }
    }

    pub fn with_slot(mut self, slot: u64) -> Self {
        self.slot = Some(slot);
        self
    }
}

impl fmt::Debug for Pkcs11Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pkcs11Config")
            .field("library_path", &self.library_path)
            .field("slot", &self.slot)
            .field("pin", &"<redacted>")
            .finish()
    }
}

/// Signing mechanism on a token, applied to a pre-computed digest.
///
/// Named after the combined PKCS#11 mechanism it stands for; backends
/// invoke the raw counterpart (`CKM_RSA_PKCS` over a `DigestInfo`,
/// `CKM_RSA_PKCS_PSS`, `CKM_ECDSA`) since hashing already happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenMechanism {
    RsaPkcs(HashAlgorithm),
    RsaPss(HashAlgorithm),
    Ecdsa(HashAlgorithm),
}

impl TokenMechanism {
    pub fn for_algorithm(algorithm: SigningAlgorithm) -> Self {
        match algorithm {
            SigningAlgorithm::RsaPkcs1Sha256 => Self::RsaPkcs(HashAlgorithm::Sha256),
            SigningAlgorithm::RsaPkcs1Sha384 => Self::RsaPkcs(HashAlgorithm::Sha384),
            SigningAlgorithm::RsaPkcs1Sha512 => Self::RsaPkcs(HashAlgorithm::Sha512),
            SigningAlgorithm::RsaPssSha256 => Self::RsaPss(HashAlgorithm::Sha256),
            SigningAlgorithm::RsaPssSha384 => Self::RsaPss(HashAlgorithm::Sha384),
            SigningAlgorithm::RsaPssSha512 => Self::RsaPss(HashAlgorithm::Sha512),
            SigningAlgorithm::EcdsaSha256 => Self::Ecdsa(HashAlgorithm::Sha256),
            SigningAlgorithm::EcdsaSha384 => Self::Ecdsa(HashAlgorithm::Sha384),
            SigningAlgorithm::EcdsaSha512 => Self::Ecdsa(HashAlgorithm::Sha512),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RsaPkcs(HashAlgorithm::Sha256) => "CKM_SHA256_RSA_PKCS",
            Self::RsaPkcs(HashAlgorithm::Sha384) => "CKM_SHA384_RSA_PKCS",
            Self::RsaPkcs(HashAlgorithm::Sha512) => "CKM_SHA512_RSA_PKCS",
            Self::RsaPss(HashAlgorithm::Sha256) => "CKM_SHA256_RSA_PKCS_PSS",
            Self::RsaPss(HashAlgorithm::Sha384) => "CKM_SHA384_RSA_PKCS_PSS",
            Self::RsaPss(HashAlgorithm::Sha512) => "CKM_SHA512_RSA_PKCS_PSS",
            Self::Ecdsa(HashAlgorithm::Sha256) => "CKM_ECDSA_SHA256",
            Self::Ecdsa(HashAlgorithm::Sha384) => "CKM_ECDSA_SHA384",
            Self::Ecdsa(HashAlgorithm::Sha512) => "CKM_ECDSA_SHA512",
        }
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            Self::RsaPkcs(hash) | Self::RsaPss(hash) | Self::Ecdsa(hash) => *hash,
        }
    }

    pub fn signing_algorithm(&self) -> SigningAlgorithm {
        match self {
            Self::RsaPkcs(HashAlgorithm::Sha256) => SigningAlgorithm::RsaPkcs1Sha256,
            Self::RsaPkcs(HashAlgorithm::Sha384) => SigningAlgorithm::RsaPkcs1Sha384,
            Self::RsaPkcs(HashAlgorithm::Sha512) => SigningAlgorithm::RsaPkcs1Sha512,
            Self::RsaPss(HashAlgorithm::Sha256) => SigningAlgorithm::RsaPssSha256,
            Self::RsaPss(HashAlgorithm::Sha384) => SigningAlgorithm::RsaPssSha384,
            Self::RsaPss(HashAlgorithm::Sha512) => SigningAlgorithm::RsaPssSha512,
            Self::Ecdsa(HashAlgorithm::Sha256) => SigningAlgorithm::EcdsaSha256,
            Self::Ecdsa(HashAlgorithm::Sha384) => SigningAlgorithm::EcdsaSha384,
            Self::Ecdsa(HashAlgorithm::Sha512) => SigningAlgorithm::EcdsaSha512,
        }
    }
}

// =============================================================================
// Key specs
// =============================================================================

/// One row of a provider's key-spec table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpecEntry {
    pub algorithm: KeyAlgorithm,
    pub bits: u32,
    /// Provider-native spec name.
    pub native: &'static str,
}

impl KeySpecEntry {
    pub const fn new(algorithm: KeyAlgorithm, bits: u32, native: &'static str) -> Self {
        Self {
            algorithm,
            bits,
            native,
        }
    }
}

/// The weakest supported spec that is at least as strong as requested.
///
/// Never rounds down: a request above the largest supported size fails.
pub fn round_up_key_spec(
    provider: ProviderTag,
    table: &'static [KeySpecEntry],
    algorithm: KeyAlgorithm,
    bits: u32,
) -> Result<&'static KeySpecEntry, HsmError> {
    table
        .iter()
        .filter(|entry| entry.algorithm == algorithm && entry.bits >= bits)
        .min_by_key(|entry| entry.bits)
        .ok_or_else(|| HsmError::UnsupportedKeySpec {
            provider,
            message: format!("no {algorithm} key spec of at least {bits} bits"),
        })
}

/// Reverse lookup of a native spec name.
pub fn lookup_key_spec(table: &'static [KeySpecEntry], native: &str) -> Option<&'static KeySpecEntry> {
    table.iter().find(|entry| entry.native == native)
}

/// Reject a digest whose length does not fit the requested algorithm
/// before anything is sent to a provider.
pub fn check_signing_request(provider: ProviderTag, request: &HsmSigningRequest) -> Result<(), HsmError> {
    let expected = request.algorithm.hash_algorithm().output_len();
    if request.digest.len() != expected {
        return Err(HsmError::Signing {
            provider,
            message: format!(
                "{} needs a {expected}-byte digest, got {} bytes",
                request.algorithm,
                request.digest.len()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::HsmKeyReference;
    use std::collections::HashSet;

    const TABLE: &[KeySpecEntry] = &[
        KeySpecEntry::new(KeyAlgorithm::Rsa, 2048, "RSA_2048"),
        KeySpecEntry::new(KeyAlgorithm::Rsa, 3072, "RSA_3072"),
        KeySpecEntry::new(KeyAlgorithm::Rsa, 4096, "RSA_4096"),
        KeySpecEntry::new(KeyAlgorithm::Ec, 256, "P256"),
    ];

    #[test]
    fn test_round_up_never_weakens() {
        let tag = ProviderTag::AwsKms;
        assert_eq!(round_up_key_spec(tag, TABLE, KeyAlgorithm::Rsa, 3000).unwrap().native, "RSA_3072");
        assert_eq!(round_up_key_spec(tag, TABLE, KeyAlgorithm::Rsa, 1024).unwrap().native, "RSA_2048");
        assert_eq!(round_up_key_spec(tag, TABLE, KeyAlgorithm::Rsa, 4096).unwrap().native, "RSA_4096");
        assert!(matches!(
            round_up_key_spec(tag, TABLE, KeyAlgorithm::Rsa, 8192),
            Err(HsmError::UnsupportedKeySpec { .. })
        ));
        assert!(round_up_key_spec(tag, TABLE, KeyAlgorithm::Ec, 384).is_err());
    }

    #[test]
    fn test_round_up_is_monotonic_over_requests() {
        for bits in (1024..=4096).step_by(128) {
            let entry = round_up_key_spec(ProviderTag::AwsKms, TABLE, KeyAlgorithm::Rsa, bits).unwrap();
            assert!(entry.bits >= bits);
        }
    }

    #[test]
    fn test_token_mechanisms_total_and_injective() {
        let names: HashSet<_> = SigningAlgorithm::ALL
            .iter()
            .map(|alg| TokenMechanism::for_algorithm(*alg).name())
            .collect();
        assert_eq!(names.len(), SigningAlgorithm::ALL.len());
        for alg in SigningAlgorithm::ALL {
            let mechanism = TokenMechanism::for_algorithm(alg);
            assert_eq!(mechanism.signing_algorithm(), alg);
            assert_eq!(mechanism.hash_algorithm(), alg.hash_algorithm());
        }
    }

    #[test]
    fn test_digest_length_checked() {
        let request = HsmSigningRequest {
            key_reference: HsmKeyReference::new(ProviderTag::GcpKms, "k"),
            digest: vec![0u8; 32],
            algorithm: SigningAlgorithm::EcdsaSha384,
        };
        let err = check_signing_request(ProviderTag::GcpKms, &request).unwrap_err();
        assert!(err.to_string().contains("48-byte digest"));
    }

    #[test]
    fn test_secrets_redacted() {
        let aws = AwsKmsConfig::new("eu-west-1", "AKIA", "s3cr3t").with_session_token("tok3n");
        let debug = format!("{aws:?}");
        assert!(!debug.contains("s3cr3t") && !debug.contains("tok3n"));

        let azure = AzureKeyVaultConfig::new("https://v.vault.azure.net", "t", "c", "hunter2");
        assert!(!format!("{azure:?}").contains("hunter2"));

        let pkcs11 = Pkcs11Config::new("/usr/lib/softhsm/libsofthsm2.so", "1234");
        assert!(!format!("{pkcs11:?}").contains("1234"));
    }

    #[test]
    fn test_endpoints() {
        let aws = AwsKmsConfig::new("eu-west-1", "a", "s");
        assert_eq!(aws.endpoint_for("us-east-2"), "https://kms.us-east-2.amazonaws.com");
        let local = aws.with_endpoint("http://localhost:4566/");
        assert_eq!(local.endpoint_for("us-east-2"), "http://localhost:4566");

        let azure = AzureKeyVaultConfig::new("https://v", "tenant-1", "c", "s");
        assert_eq!(
            azure.token_url(),
            "https://login.microsoftonline.com/tenant-1/oauth2/v2.0/token"
        );
    }
}
