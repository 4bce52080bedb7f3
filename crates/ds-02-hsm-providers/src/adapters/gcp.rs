//! # GCP Cloud KMS Adapter
//!
//! REST v1 over a bearer token. Keys are addressed by resource name,
//! `projects/*/locations/*/keyRings/*/cryptoKeys/*/cryptoKeyVersions/*`;
//! a bare key id is resolved against the configured key ring.
//!
//! Cloud KMS bakes the key size and digest into each version's algorithm
//! (`RSA_SIGN_PSS_3072_SHA256`), so signing first checks that the version
//! can produce the requested abstract algorithm.

use crate::adapters::{decode_base64, http_transport, rfc3339};
use crate::domain::entities::{check_signing_request, round_up_key_spec, GcpKmsConfig, KeySpecEntry};
use crate::domain::errors::{FaultKind, HsmError, Operation, ProviderFault};
use crate::ports::inbound::HsmProvider;
use crate::ports::outbound::{HttpMethod, KmsRequest, KmsResponse, KmsTransport};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use shared_types::{
    DeletionState, HashAlgorithm, HsmKeyInfo, HsmKeyReference, HsmSigningRequest, HsmSigningResult,
    KeyAlgorithm, KeyDeletionStatus, KeyPurpose, ProviderTag, PublicKey, SigningAlgorithm,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const TAG: ProviderTag = ProviderTag::GcpKms;
const LIST_PAGE_SIZE: u32 = 100;

/// Version algorithms `create_key` can request.
pub const GCP_KEY_SPECS: &[KeySpecEntry] = &[
    KeySpecEntry::new(KeyAlgorithm::Rsa, 2048, "RSA_SIGN_PKCS1_2048_SHA256"),
    KeySpecEntry::new(KeyAlgorithm::Rsa, 3072, "RSA_SIGN_PKCS1_3072_SHA256"),
    KeySpecEntry::new(KeyAlgorithm::Rsa, 4096, "RSA_SIGN_PKCS1_4096_SHA256"),
    KeySpecEntry::new(KeyAlgorithm::Ec, 256, "EC_SIGN_P256_SHA256"),
    KeySpecEntry::new(KeyAlgorithm::Ec, 384, "EC_SIGN_P384_SHA384"),
];

/// Size-independent algorithm family and digest for each abstract
/// algorithm, rendered `{family}_{digest}`.
pub fn gcp_signing_algorithm(algorithm: SigningAlgorithm) -> &'static str {
    match algorithm {
        SigningAlgorithm::RsaPkcs1Sha256 => "RSA_SIGN_PKCS1_SHA256",
        SigningAlgorithm::RsaPkcs1Sha384 => "RSA_SIGN_PKCS1_SHA384",
        SigningAlgorithm::RsaPkcs1Sha512 => "RSA_SIGN_PKCS1_SHA512",
        SigningAlgorithm::RsaPssSha256 => "RSA_SIGN_PSS_SHA256",
        SigningAlgorithm::RsaPssSha384 => "RSA_SIGN_PSS_SHA384",
        SigningAlgorithm::RsaPssSha512 => "RSA_SIGN_PSS_SHA512",
        SigningAlgorithm::EcdsaSha256 => "EC_SIGN_SHA256",
        SigningAlgorithm::EcdsaSha384 => "EC_SIGN_SHA384",
        SigningAlgorithm::EcdsaSha512 => "EC_SIGN_SHA512",
    }
}

/// Whether a key version with algorithm `version_algorithm` signs
/// `algorithm` digests.
pub fn version_supports(version_algorithm: &str, algorithm: SigningAlgorithm) -> bool {
    let Some((family, digest)) = gcp_signing_algorithm(algorithm).rsplit_once('_') else {
        return false;
    };
    version_algorithm.starts_with(&format!("{family}_"))
        && version_algorithm.ends_with(&format!("_{digest}"))
        && parse_version_algorithm(version_algorithm).is_some()
}

/// Key family and size encoded in a version algorithm name.
///
/// RSA sizes are the first all-digit segment; EC keys are named by curve.
/// Curves outside P-256/P-384 (e.g. `SECP256K1`) are not usable here.
pub fn parse_version_algorithm(name: &str) -> Option<(KeyAlgorithm, u32)> {
    if name.starts_with("RSA_") {
        return name
            .split('_')
            .find(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|bits| bits.parse().ok())
            .map(|bits| (KeyAlgorithm::Rsa, bits));
    }
    match name.split('_').nth(2) {
        Some("P256") if name.starts_with("EC_SIGN_") => Some((KeyAlgorithm::Ec, 256)),
        Some("P384") if name.starts_with("EC_SIGN_") => Some((KeyAlgorithm::Ec, 384)),
        _ => None,
    }
}

fn digest_field(hash: HashAlgorithm) -> &'static str {
    match hash {
        HashAlgorithm::Sha256 => "sha256",
        HashAlgorithm::Sha384 => "sha384",
        HashAlgorithm::Sha512 => "sha512",
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CryptoKeyVersion {
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    algorithm: String,
    destroy_time: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AsymmetricSignResponse {
    signature: String,
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyResponse {
    pem: String,
    #[serde(default)]
    algorithm: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionTemplate {
    #[serde(default)]
    algorithm: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CryptoKey {
    name: String,
    #[serde(default)]
    purpose: String,
    create_time: Option<String>,
    version_template: Option<VersionTemplate>,
    primary: Option<CryptoKeyVersion>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListCryptoKeysResponse {
    #[serde(default)]
    crypto_keys: Vec<CryptoKey>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

fn purpose(purpose: &str) -> KeyPurpose {
    match purpose {
        "ASYMMETRIC_SIGN" => KeyPurpose::SignVerify,
        "ASYMMETRIC_DECRYPT" | "ENCRYPT_DECRYPT" => KeyPurpose::EncryptDecrypt,
        _ => KeyPurpose::Other,
    }
}

fn key_info(key: CryptoKey) -> Option<HsmKeyInfo> {
    let algorithm = key.version_template.as_ref()?.algorithm.as_str();
    let (key_algorithm, key_size) = parse_version_algorithm(algorithm)?;
    Some(HsmKeyInfo {
        purpose: purpose(&key.purpose),
        key_algorithm,
        key_size,
        created_at: key.create_time.as_deref().and_then(rfc3339),
        // asymmetric keys have no primary; state lives on each version
        enabled: key.primary.map_or(true, |v| v.state == "ENABLED"),
        label: key.name.rsplit('/').next().map(str::to_string),
        key_id: key.name,
        provider: TAG,
    })
}

/// Classify a `google.rpc.Status` error body.
fn fault(response: &KmsResponse) -> ProviderFault {
    let detail = serde_json::from_slice::<ErrorEnvelope>(&response.body)
        .map(|envelope| envelope.error)
        .unwrap_or(ErrorDetail {
            message: String::from_utf8_lossy(&response.body).into_owned(),
            status: String::new(),
        });
    let kind = match detail.status.as_str() {
        "NOT_FOUND" => FaultKind::NotFound,
        "PERMISSION_DENIED" => FaultKind::Forbidden,
        "UNAUTHENTICATED" => FaultKind::Unauthenticated,
        "INVALID_ARGUMENT" | "FAILED_PRECONDITION" | "OUT_OF_RANGE" => FaultKind::Rejected,
        "RESOURCE_EXHAUSTED" => FaultKind::Throttled,
        "UNAVAILABLE" | "INTERNAL" | "DEADLINE_EXCEEDED" => FaultKind::Unavailable,
        _ => FaultKind::from_http_status(response.status),
    };
    ProviderFault::new(kind, detail.status, detail.message)
}

// =============================================================================
// Adapter
// =============================================================================

/// GCP Cloud KMS signing provider.
pub struct GcpKmsProvider {
    config: GcpKmsConfig,
    transport: Option<Arc<dyn KmsTransport>>,
    initialized: AtomicBool,
}

impl GcpKmsProvider {
    pub fn new(config: GcpKmsConfig) -> Self {
        Self {
            transport: http_transport(TAG),
            config,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn with_transport(config: GcpKmsConfig, transport: Arc<dyn KmsTransport>) -> Self {
        Self {
            config,
            transport: Some(transport),
            initialized: AtomicBool::new(false),
        }
    }

    fn transport(&self) -> Result<&Arc<dyn KmsTransport>, HsmError> {
        self.transport
            .as_ref()
            .ok_or_else(|| HsmError::DependencyUnavailable {
                provider: TAG,
                dependency: "HTTP client".into(),
            })
    }

    fn ensure_initialized(&self) -> Result<(), HsmError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(HsmError::NotInitialized(TAG))
        }
    }

    fn key_ring(&self, key: Option<&HsmKeyReference>) -> String {
        let project = key
            .and_then(|k| k.project_id.as_deref())
            .unwrap_or(&self.config.project_id);
        let location = key
            .and_then(|k| k.location.as_deref())
            .unwrap_or(&self.config.location);
        let ring = key
            .and_then(|k| k.key_ring.as_deref())
            .unwrap_or(&self.config.key_ring);
        format!("projects/{project}/locations/{location}/keyRings/{ring}")
    }

    fn key_name(&self, key: &HsmKeyReference) -> String {
        if key.key_id.starts_with("projects/") {
            key.key_id.clone()
        } else {
            format!("{}/cryptoKeys/{}", self.key_ring(Some(key)), key.key_id)
        }
    }

    /// Version resource name; version `1` unless the reference says otherwise.
    fn version_name(&self, key: &HsmKeyReference) -> String {
        let name = self.key_name(key);
        if name.contains("/cryptoKeyVersions/") {
            name
        } else {
            format!(
                "{name}/cryptoKeyVersions/{}",
                key.key_version.as_deref().unwrap_or("1")
            )
        }
    }

    async fn call_raw(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
        operation: Operation,
        key_id: Option<&str>,
    ) -> Result<KmsResponse, HsmError> {
        let url = format!("{}/{path}", self.config.base_url());
        let mut request = KmsRequest::new(method, url, self.config.timeout)
            .header("authorization", format!("Bearer {}", self.config.access_token));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = self
            .transport()?
            .execute(request)
            .await
            .map_err(|f| f.into_error(TAG, operation, key_id))?;
        if !response.is_success() {
            return Err(fault(&response).into_error(TAG, operation, key_id));
        }
        Ok(response)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
        operation: Operation,
        key_id: Option<&str>,
    ) -> Result<T, HsmError> {
        self.call_raw(method, path, body, operation, key_id)
            .await?
            .json()
            .map_err(|f| f.into_error(TAG, operation, key_id))
    }

    async fn probe(&self, operation: Operation) -> Result<(), HsmError> {
        let path = format!("{}/cryptoKeys?pageSize=1", self.key_ring(None));
        self.call_raw(HttpMethod::Get, &path, None, operation, None)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl HsmProvider for GcpKmsProvider {
    fn provider(&self) -> ProviderTag {
        TAG
    }

    fn native_algorithm(&self, algorithm: SigningAlgorithm) -> &'static str {
        gcp_signing_algorithm(algorithm)
    }

    async fn initialize(&self) -> Result<(), HsmError> {
        if self.config.access_token.is_empty() {
            return Err(HsmError::Connection {
                provider: TAG,
                message: "missing OAuth2 access token".into(),
            });
        }
        self.transport()?;
        self.probe(Operation::Initialize).await?;
        self.initialized.store(true, Ordering::Release);
        info!(provider = %TAG, key_ring = %self.key_ring(None), "HSM provider initialized");
        Ok(())
    }

    async fn sign(&self, request: &HsmSigningRequest) -> Result<HsmSigningResult, HsmError> {
        self.ensure_initialized()?;
        check_signing_request(TAG, request)?;
        let key = &request.key_reference;
        let version_name = self.version_name(key);

        let version: CryptoKeyVersion = self
            .call(HttpMethod::Get, &version_name, None, Operation::Sign, Some(&key.key_id))
            .await?;
        if version.state != "ENABLED" {
            return Err(HsmError::Signing {
                provider: TAG,
                message: format!("key version {} is {}", version.name, version.state),
            });
        }
        if !version_supports(&version.algorithm, request.algorithm) {
            return Err(HsmError::Signing {
                provider: TAG,
                message: format!(
                    "key version algorithm {} cannot produce {}",
                    version.algorithm, request.algorithm
                ),
            });
        }

        let hash = request.algorithm.hash_algorithm();
        let body = json!({ "digest": { digest_field(hash): STANDARD.encode(&request.digest) } });
        let response: AsymmetricSignResponse = self
            .call(
                HttpMethod::Post,
                &format!("{version_name}:asymmetricSign"),
                Some(body),
                Operation::Sign,
                Some(&key.key_id),
            )
            .await?;
        let signature = decode_base64(TAG, &STANDARD, &response.signature, "signature")?;

        info!(provider = %TAG, key_id = %version_name, algorithm = %request.algorithm, "Digest signed");
        Ok(HsmSigningResult {
            signature,
            algorithm: request.algorithm,
            key_id: response.name.unwrap_or(version_name),
            provider: TAG,
            signed_at: Utc::now(),
        })
    }

    async fn get_public_key(&self, key: &HsmKeyReference) -> Result<PublicKey, HsmError> {
        self.ensure_initialized()?;
        let path = format!("{}/publicKey", self.version_name(key));
        let response: PublicKeyResponse = self
            .call(HttpMethod::Get, &path, None, Operation::GetPublicKey, Some(&key.key_id))
            .await?;

        let (algorithm, bits) = parse_version_algorithm(&response.algorithm).ok_or_else(|| {
            HsmError::invalid_response(TAG, format!("unsupported key algorithm {:?}", response.algorithm))
        })?;
        let public_key = PublicKey::from_pem(&response.pem)
            .map_err(|e| HsmError::invalid_response(TAG, e.to_string()))?;
        if public_key.algorithm != algorithm || public_key.bits != bits {
            return Err(HsmError::invalid_response(
                TAG,
                format!("{} disagrees with key material", response.algorithm),
            ));
        }
        Ok(public_key)
    }

    async fn list_keys(&self) -> Result<Vec<HsmKeyInfo>, HsmError> {
        self.ensure_initialized()?;
        let ring = self.key_ring(None);
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut path = format!("{ring}/cryptoKeys?pageSize={LIST_PAGE_SIZE}");
            if let Some(token) = &page_token {
                path.push_str("&pageToken=");
                path.push_str(&url::form_urlencoded::byte_serialize(token.as_bytes()).collect::<String>());
            }
            let page: ListCryptoKeysResponse = self
                .call(HttpMethod::Get, &path, None, Operation::ListKeys, None)
                .await?;

            for key in page.crypto_keys {
                if purpose(&key.purpose) != KeyPurpose::SignVerify {
                    continue;
                }
                let name = key.name.clone();
                match key_info(key) {
                    Some(info) => keys.push(info),
                    None => debug!(provider = %TAG, key_id = %name, "Skipping key with unsupported algorithm"),
                }
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => {
                    if page_token.as_deref() == Some(next.as_str()) {
                        return Err(HsmError::invalid_response(TAG, "page token repeated"));
                    }
                    page_token = Some(next);
                }
                None => break,
            }
        }

        debug!(provider = %TAG, count = keys.len(), "Listed signing keys");
        Ok(keys)
    }

    async fn create_key(
        &self,
        key_type: KeyAlgorithm,
        key_size: u32,
        key_id: Option<&str>,
    ) -> Result<HsmKeyInfo, HsmError> {
        self.ensure_initialized()?;
        let spec = round_up_key_spec(TAG, GCP_KEY_SPECS, key_type, key_size)?;
        let crypto_key_id = key_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("docseal-{}", uuid::Uuid::new_v4()));
        let path = format!("{}/cryptoKeys?cryptoKeyId={crypto_key_id}", self.key_ring(None));
        let body = json!({
            "purpose": "ASYMMETRIC_SIGN",
            "versionTemplate": {
                "algorithm": spec.native,
                "protectionLevel": self.config.protection_level,
            },
            "labels": { "created-by": "docseal" },
        });
        let created: CryptoKey = self
            .call(HttpMethod::Post, &path, Some(body), Operation::CreateKey, None)
            .await?;
        let name = created.name.clone();
        let info = key_info(created)
            .filter(|info| info.key_algorithm == key_type && info.key_size >= key_size)
            .ok_or_else(|| HsmError::invalid_response(TAG, format!("created key {name} has unexpected algorithm")))?;

        info!(provider = %TAG, key_id = %info.key_id, algorithm = spec.native, requested_bits = key_size, "Signing key created");
        Ok(info)
    }

    async fn delete_key(&self, key: &HsmKeyReference) -> Result<KeyDeletionStatus, HsmError> {
        self.ensure_initialized()?;
        let version_name = self.version_name(key);
        let version: CryptoKeyVersion = self
            .call(
                HttpMethod::Post,
                &format!("{version_name}:destroy"),
                Some(json!({})),
                Operation::DeleteKey,
                Some(&key.key_id),
            )
            .await?;

        warn!(provider = %TAG, key_id = %version_name, state = %version.state, "Key version destruction scheduled");
        Ok(KeyDeletionStatus {
            key_id: version.name,
            state: DeletionState::PendingDeletion,
            effective_at: version.destroy_time.as_deref().and_then(rfc3339),
        })
    }

    async fn test_connection(&self) -> bool {
        if self.ensure_initialized().is_err() {
            return false;
        }
        match self.probe(Operation::Probe).await {
            Ok(()) => true,
            Err(e) => {
                debug!(provider = %TAG, error = %e, "Connection probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedTransport;
    use shared_crypto::test_support::p256_signer;
    use std::collections::HashSet;

    const RING: &str = "https://cloudkms.googleapis.com/v1/projects/p/locations/global/keyRings/docs";

    fn config() -> GcpKmsConfig {
        GcpKmsConfig::new("p", "global", "docs", "ya29.token")
    }

    async fn initialized(transport: &Arc<ScriptedTransport>) -> GcpKmsProvider {
        transport.push_json(200, json!({}));
        let provider = GcpKmsProvider::with_transport(config(), transport.clone());
        provider.initialize().await.unwrap();
        transport.take_requests();
        provider
    }

    fn version(algorithm: &str, state: &str) -> Value {
        json!({
            "name": "projects/p/locations/global/keyRings/docs/cryptoKeys/signer/cryptoKeyVersions/1",
            "state": state,
            "algorithm": algorithm,
        })
    }

    #[test]
    fn test_algorithm_table_total_and_injective() {
        let names: HashSet<_> = SigningAlgorithm::ALL
            .iter()
            .map(|alg| gcp_signing_algorithm(*alg))
            .collect();
        assert_eq!(names.len(), SigningAlgorithm::ALL.len());
    }

    #[test]
    fn test_version_algorithm_parser() {
        assert_eq!(
            parse_version_algorithm("RSA_SIGN_PSS_3072_SHA256"),
            Some((KeyAlgorithm::Rsa, 3072))
        );
        assert_eq!(
            parse_version_algorithm("RSA_SIGN_PKCS1_4096_SHA512"),
            Some((KeyAlgorithm::Rsa, 4096))
        );
        assert_eq!(parse_version_algorithm("EC_SIGN_P384_SHA384"), Some((KeyAlgorithm::Ec, 384)));
        assert_eq!(parse_version_algorithm("EC_SIGN_SECP256K1_SHA256"), None);
        assert_eq!(parse_version_algorithm("GOOGLE_SYMMETRIC_ENCRYPTION"), None);
    }

    #[test]
    fn test_version_compatibility() {
        assert!(version_supports("RSA_SIGN_PKCS1_2048_SHA256", SigningAlgorithm::RsaPkcs1Sha256));
        assert!(!version_supports("RSA_SIGN_PKCS1_2048_SHA256", SigningAlgorithm::RsaPssSha256));
        assert!(!version_supports("RSA_SIGN_PKCS1_2048_SHA256", SigningAlgorithm::RsaPkcs1Sha384));
        assert!(version_supports("EC_SIGN_P256_SHA256", SigningAlgorithm::EcdsaSha256));
        assert!(!version_supports("EC_SIGN_SECP256K1_SHA256", SigningAlgorithm::EcdsaSha256));
        assert!(!version_supports("RSA_DECRYPT_OAEP_2048_SHA256", SigningAlgorithm::RsaPkcs1Sha256));
    }

    #[tokio::test]
    async fn test_initialize_probes_key_ring_with_bearer_token() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(200, json!({}));
        let provider = GcpKmsProvider::with_transport(config(), transport.clone());
        provider.initialize().await.unwrap();

        let probe = transport.requests().remove(0);
        assert_eq!(probe.method, HttpMethod::Get);
        assert_eq!(probe.url, format!("{RING}/cryptoKeys?pageSize=1"));
        assert_eq!(probe.header_value("authorization"), Some("Bearer ya29.token"));
    }

    #[tokio::test]
    async fn test_initialize_denied_is_connection_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(
            403,
            json!({ "error": { "code": 403, "message": "denied", "status": "PERMISSION_DENIED" } }),
        );
        let provider = GcpKmsProvider::with_transport(config(), transport);
        assert!(matches!(provider.initialize().await, Err(HsmError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_sign_checks_version_then_signs_digest() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = initialized(&transport).await;
        transport.push_json(200, version("EC_SIGN_P256_SHA256", "ENABLED"));
        transport.push_json(200, json!({ "signature": STANDARD.encode([0x30u8, 0x06]) }));

        let request = HsmSigningRequest {
            key_reference: HsmKeyReference::new(TAG, "signer"),
            digest: vec![7; 32],
            algorithm: SigningAlgorithm::EcdsaSha256,
        };
        let result = provider.sign(&request).await.unwrap();
        assert_eq!(result.signature, vec![0x30, 0x06]);

        let requests = transport.requests();
        assert_eq!(requests[0].url, format!("{RING}/cryptoKeys/signer/cryptoKeyVersions/1"));
        assert_eq!(
            requests[1].url,
            format!("{RING}/cryptoKeys/signer/cryptoKeyVersions/1:asymmetricSign")
        );
        assert_eq!(requests[1].body_json().unwrap()["digest"]["sha256"], STANDARD.encode([7u8; 32]));
    }

    #[tokio::test]
    async fn test_sign_with_incompatible_version_fails_before_signing() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = initialized(&transport).await;
        transport.push_json(200, version("RSA_SIGN_PKCS1_2048_SHA256", "ENABLED"));

        let request = HsmSigningRequest {
            key_reference: HsmKeyReference::new(TAG, "signer").with_version("1"),
            digest: vec![7; 32],
            algorithm: SigningAlgorithm::RsaPssSha256,
        };
        assert!(matches!(provider.sign(&request).await, Err(HsmError::Signing { .. })));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_sign_missing_key_and_disabled_version() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = initialized(&transport).await;
        let request = HsmSigningRequest {
            key_reference: HsmKeyReference::new(TAG, "gone"),
            digest: vec![7; 32],
            algorithm: SigningAlgorithm::EcdsaSha256,
        };

        transport.push_json(
            404,
            json!({ "error": { "code": 404, "message": "not found", "status": "NOT_FOUND" } }),
        );
        assert!(matches!(provider.sign(&request).await, Err(HsmError::KeyNotFound { .. })));

        transport.push_json(200, version("EC_SIGN_P256_SHA256", "DISABLED"));
        assert!(matches!(provider.sign(&request).await, Err(HsmError::Signing { .. })));
    }

    #[tokio::test]
    async fn test_full_resource_name_used_verbatim() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = initialized(&transport).await;
        let name = "projects/other/locations/eu/keyRings/r/cryptoKeys/k/cryptoKeyVersions/4";
        transport.push_json(
            200,
            json!({ "pem": "not a pem", "algorithm": "EC_SIGN_P256_SHA256" }),
        );
        let key = HsmKeyReference::new(TAG, name);
        assert!(matches!(
            provider.get_public_key(&key).await,
            Err(HsmError::InvalidResponse { .. })
        ));
        assert_eq!(
            transport.requests()[0].url,
            format!("https://cloudkms.googleapis.com/v1/{name}/publicKey")
        );
    }

    #[tokio::test]
    async fn test_get_public_key_from_pem() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = initialized(&transport).await;
        let public = p256_signer().public_key().unwrap();
        let pem = der::pem::encode_string("PUBLIC KEY", der::pem::LineEnding::LF, &public.der).unwrap();
        transport.push_json(200, json!({ "pem": pem, "algorithm": "EC_SIGN_P256_SHA256" }));

        let key = HsmKeyReference::new(TAG, "signer").with_version("2");
        assert_eq!(provider.get_public_key(&key).await.unwrap(), public);
        assert!(transport.requests()[0].url.ends_with("cryptoKeys/signer/cryptoKeyVersions/2/publicKey"));
    }

    #[tokio::test]
    async fn test_list_keys_paginates_and_filters_purpose() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = initialized(&transport).await;
        transport.push_json(
            200,
            json!({
                "cryptoKeys": [
                    { "name": "projects/p/locations/global/keyRings/docs/cryptoKeys/a", "purpose": "ASYMMETRIC_SIGN",
                      "createTime": "2026-01-02T03:04:05.123Z", "versionTemplate": { "algorithm": "RSA_SIGN_PSS_3072_SHA256" } },
                    { "name": "projects/p/locations/global/keyRings/docs/cryptoKeys/b", "purpose": "ENCRYPT_DECRYPT",
                      "versionTemplate": { "algorithm": "GOOGLE_SYMMETRIC_ENCRYPTION" } },
                ],
                "nextPageToken": "page/2",
            }),
        );
        transport.push_json(
            200,
            json!({
                "cryptoKeys": [
                    { "name": "projects/p/locations/global/keyRings/docs/cryptoKeys/c", "purpose": "ASYMMETRIC_DECRYPT",
                      "versionTemplate": { "algorithm": "RSA_DECRYPT_OAEP_2048_SHA256" } },
                    { "name": "projects/p/locations/global/keyRings/docs/cryptoKeys/d", "purpose": "ASYMMETRIC_SIGN",
                      "versionTemplate": { "algorithm": "EC_SIGN_P256_SHA256" } },
                ],
            }),
        );

        let keys = provider.list_keys().await.unwrap();
        let labels: Vec<_> = keys.iter().filter_map(|k| k.label.as_deref()).collect();
        assert_eq!(labels, vec!["a", "d"]);
        assert_eq!(keys[0].key_size, 3072);
        assert!(keys[0].created_at.is_some());
        assert!(transport.requests()[1].url.ends_with("&pageToken=page%2F2"));
    }

    #[tokio::test]
    async fn test_create_key_rounds_up() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = initialized(&transport).await;
        transport.push_json(
            200,
            json!({ "name": "projects/p/locations/global/keyRings/docs/cryptoKeys/invoices", "purpose": "ASYMMETRIC_SIGN",
                    "versionTemplate": { "algorithm": "EC_SIGN_P384_SHA384", "protectionLevel": "HSM" } }),
        );

        let info = provider.create_key(KeyAlgorithm::Ec, 300, Some("invoices")).await.unwrap();
        assert_eq!((info.key_algorithm, info.key_size), (KeyAlgorithm::Ec, 384));

        let sent = transport.requests().remove(0);
        assert_eq!(sent.url, format!("{RING}/cryptoKeys?cryptoKeyId=invoices"));
        let body = sent.body_json().unwrap();
        assert_eq!(body["purpose"], "ASYMMETRIC_SIGN");
        assert_eq!(body["versionTemplate"]["algorithm"], "EC_SIGN_P384_SHA384");
        assert_eq!(body["versionTemplate"]["protectionLevel"], "HSM");

        assert!(matches!(
            provider.create_key(KeyAlgorithm::Ec, 521, None).await,
            Err(HsmError::UnsupportedKeySpec { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_destroys_version_with_schedule() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = initialized(&transport).await;
        transport.push_json(
            200,
            json!({ "name": "projects/p/locations/global/keyRings/docs/cryptoKeys/k/cryptoKeyVersions/1",
                    "state": "DESTROY_SCHEDULED", "destroyTime": "2026-11-01T00:00:00Z" }),
        );

        let status = provider.delete_key(&HsmKeyReference::new(TAG, "k")).await.unwrap();
        assert_eq!(status.state, DeletionState::PendingDeletion);
        assert!(status.effective_at.is_some());
        assert!(transport.requests()[0].url.ends_with("cryptoKeys/k/cryptoKeyVersions/1:destroy"));
    }
}
