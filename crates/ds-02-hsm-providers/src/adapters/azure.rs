//! # Azure Key Vault Adapter
//!
//! Key Vault REST over a client-credentials token from Microsoft Entra ID.
//! The token is cached until a minute before it expires.
//!
//! Key Vault returns ECDSA signatures as raw `r || s`; they are re-encoded
//! as DER before leaving the adapter.

use crate::adapters::{decode_base64, http_transport};
use crate::domain::entities::{check_signing_request, round_up_key_spec, AzureKeyVaultConfig, KeySpecEntry};
use crate::domain::errors::{FaultKind, HsmError, Operation, ProviderFault};
use crate::ports::inbound::HsmProvider;
use crate::ports::outbound::{HttpMethod, KmsRequest, KmsResponse, KmsTransport};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use shared_crypto::{ecdsa_raw_to_der, public_key_from_ec_point, public_key_from_rsa_components};
use shared_types::{
    DeletionState, HsmKeyInfo, HsmKeyReference, HsmSigningRequest, HsmSigningResult, KeyAlgorithm,
    KeyDeletionStatus, KeyPurpose, ProviderTag, PublicKey, SigningAlgorithm,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const TAG: ProviderTag = ProviderTag::AzureKeyVault;
const VAULT_SCOPE: &str = "https://vault.azure.net/.default";
const LIST_PAGE_SIZE: u32 = 25;
/// Refresh the token this long before it expires.
const TOKEN_SKEW_SECS: i64 = 60;

/// Key sizes and curves `create_key` can request.
pub const AZURE_KEY_SPECS: &[KeySpecEntry] = &[
    KeySpecEntry::new(KeyAlgorithm::Rsa, 2048, "RSA-2048"),
    KeySpecEntry::new(KeyAlgorithm::Rsa, 3072, "RSA-3072"),
    KeySpecEntry::new(KeyAlgorithm::Rsa, 4096, "RSA-4096"),
    KeySpecEntry::new(KeyAlgorithm::Ec, 256, "P-256"),
    KeySpecEntry::new(KeyAlgorithm::Ec, 384, "P-384"),
    KeySpecEntry::new(KeyAlgorithm::Ec, 521, "P-521"),
];

/// JWA algorithm name for each abstract algorithm.
pub fn azure_signing_algorithm(algorithm: SigningAlgorithm) -> &'static str {
    match algorithm {
        SigningAlgorithm::RsaPkcs1Sha256 => "RS256",
        SigningAlgorithm::RsaPkcs1Sha384 => "RS384",
        SigningAlgorithm::RsaPkcs1Sha512 => "RS512",
        SigningAlgorithm::RsaPssSha256 => "PS256",
        SigningAlgorithm::RsaPssSha384 => "PS384",
        SigningAlgorithm::RsaPssSha512 => "PS512",
        SigningAlgorithm::EcdsaSha256 => "ES256",
        SigningAlgorithm::EcdsaSha384 => "ES384",
        SigningAlgorithm::EcdsaSha512 => "ES512",
    }
}

fn curve_bits(crv: &str) -> Option<u32> {
    match crv {
        "P-256" => Some(256),
        "P-384" => Some(384),
        "P-521" => Some(521),
        _ => None,
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

#[derive(Deserialize)]
struct JsonWebKey {
    kid: String,
    kty: String,
    #[serde(default)]
    key_ops: Vec<String>,
    n: Option<String>,
    e: Option<String>,
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

#[derive(Deserialize, Default)]
struct KeyAttributes {
    #[serde(default)]
    enabled: bool,
    created: Option<i64>,
}

#[derive(Deserialize)]
struct KeyBundle {
    key: JsonWebKey,
    #[serde(default)]
    attributes: KeyAttributes,
}

#[derive(Deserialize)]
struct KeyListItem {
    kid: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyListResult {
    #[serde(default)]
    value: Vec<KeyListItem>,
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct SignResult {
    kid: Option<String>,
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeletedKeyBundle {
    recovery_id: Option<String>,
    scheduled_purge_date: Option<i64>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    innererror: Option<Box<ErrorDetail>>,
}

/// Token endpoint errors use the OAuth2 shape instead.
#[derive(Deserialize)]
struct OAuthError {
    error: String,
    #[serde(default)]
    error_description: String,
}

fn fault(response: &KmsResponse) -> ProviderFault {
    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(&response.body) {
        let detail = envelope.error;
        let inner = detail.innererror.as_ref().map(|e| e.code.as_str()).unwrap_or_default();
        let kind = match (detail.code.as_str(), inner) {
            // key exists but does not allow the operation
            (_, "KeyOperationForbidden") => FaultKind::Rejected,
            ("KeyNotFound", _) => FaultKind::NotFound,
            ("Unauthorized", _) => FaultKind::Unauthenticated,
            ("Forbidden", _) => FaultKind::Forbidden,
            ("Throttled", _) => FaultKind::Throttled,
            _ => FaultKind::from_http_status(response.status),
        };
        return ProviderFault::new(kind, detail.code, detail.message);
    }
    if let Ok(oauth) = serde_json::from_slice::<OAuthError>(&response.body) {
        let kind = match response.status {
            400 | 401 => FaultKind::Unauthenticated,
            status => FaultKind::from_http_status(status),
        };
        return ProviderFault::new(kind, oauth.error, oauth.error_description);
    }
    ProviderFault::new(
        FaultKind::from_http_status(response.status),
        "",
        format!("HTTP {}", response.status),
    )
}

fn unix_time(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

fn decode_b64url(value: &str, what: &str) -> Result<Vec<u8>, HsmError> {
    decode_base64(TAG, &URL_SAFE_NO_PAD, value.trim_end_matches('='), what)
}

/// Public key from a JSON Web Key.
fn jwk_public_key(jwk: &JsonWebKey) -> Result<PublicKey, HsmError> {
    let missing = |field: &str| HsmError::invalid_response(TAG, format!("{} key without {field}", jwk.kty));
    let invalid = |e: shared_crypto::CryptoError| HsmError::invalid_response(TAG, e.to_string());
    match jwk.kty.as_str() {
        "RSA" | "RSA-HSM" => {
            let n = decode_b64url(jwk.n.as_deref().ok_or_else(|| missing("n"))?, "modulus")?;
            let e = decode_b64url(jwk.e.as_deref().ok_or_else(|| missing("e"))?, "exponent")?;
            public_key_from_rsa_components(&n, &e).map_err(invalid)
        }
        "EC" | "EC-HSM" => {
            let crv = jwk.crv.as_deref().ok_or_else(|| missing("crv"))?;
            let bits = curve_bits(crv)
                .ok_or_else(|| HsmError::invalid_response(TAG, format!("unsupported curve {crv}")))?;
            let scalar = shared_crypto::ecdsa::scalar_len(bits);
            let x = decode_b64url(jwk.x.as_deref().ok_or_else(|| missing("x"))?, "x coordinate")?;
            let y = decode_b64url(jwk.y.as_deref().ok_or_else(|| missing("y"))?, "y coordinate")?;
            if x.len() > scalar || y.len() > scalar {
                return Err(HsmError::invalid_response(TAG, "EC coordinate longer than the curve"));
            }
            let mut point = Vec::with_capacity(1 + 2 * scalar);
            point.push(0x04);
            point.extend(std::iter::repeat(0).take(scalar - x.len()));
            point.extend_from_slice(&x);
            point.extend(std::iter::repeat(0).take(scalar - y.len()));
            point.extend_from_slice(&y);
            public_key_from_ec_point(bits, &point).map_err(invalid)
        }
        other => Err(HsmError::invalid_response(TAG, format!("unsupported key type {other}"))),
    }
}

/// Key name from a key identifier URL, `{vault}/keys/{name}[/{version}]`.
fn kid_name(kid: &str) -> &str {
    kid.split_once("/keys/")
        .map(|(_, rest)| rest.split('/').next().unwrap_or(rest))
        .unwrap_or(kid)
}

fn key_info(bundle: &KeyBundle) -> Result<HsmKeyInfo, HsmError> {
    let public_key = jwk_public_key(&bundle.key)?;
    let can_sign = bundle.key.key_ops.iter().any(|op| op == "sign");
    let can_decrypt = bundle.key.key_ops.iter().any(|op| op == "decrypt" || op == "unwrapKey");
    Ok(HsmKeyInfo {
        key_id: kid_name(&bundle.key.kid).to_string(),
        provider: TAG,
        key_algorithm: public_key.algorithm,
        key_size: public_key.bits,
        purpose: match (can_sign, can_decrypt) {
            (true, _) => KeyPurpose::SignVerify,
            (false, true) => KeyPurpose::EncryptDecrypt,
            (false, false) => KeyPurpose::Other,
        },
        created_at: bundle.attributes.created.and_then(unix_time),
        enabled: bundle.attributes.enabled,
        label: Some(bundle.key.kid.clone()),
    })
}

fn with_api_version(url: &str, api_version: &str) -> String {
    if url.contains("api-version=") {
        url.to_string()
    } else if url.contains('?') {
        format!("{url}&api-version={api_version}")
    } else {
        format!("{url}?api-version={api_version}")
    }
}

// =============================================================================
// Adapter
// =============================================================================

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Azure Key Vault signing provider.
pub struct AzureKeyVaultProvider {
    config: AzureKeyVaultConfig,
    transport: Option<Arc<dyn KmsTransport>>,
    token: RwLock<Option<CachedToken>>,
    initialized: AtomicBool,
}

/// Where a key lives: vault, name and optional version.
struct KeyLocation {
    vault: String,
    name: String,
    version: Option<String>,
}

impl KeyLocation {
    fn base(&self) -> String {
        format!("{}/keys/{}", self.vault, self.name)
    }

    fn versioned(&self) -> String {
        match &self.version {
            Some(version) => format!("{}/{version}", self.base()),
            None => self.base(),
        }
    }
}

impl AzureKeyVaultProvider {
    pub fn new(config: AzureKeyVaultConfig) -> Self {
        Self {
            transport: http_transport(TAG),
            config,
            token: RwLock::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn with_transport(config: AzureKeyVaultConfig, transport: Arc<dyn KmsTransport>) -> Self {
        Self {
            config,
            transport: Some(transport),
            token: RwLock::new(None),
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

    fn vault(&self) -> &str {
        self.config.vault_url.trim_end_matches('/')
    }

    /// Accepts a bare key name or a full key identifier URL.
    fn locate(&self, key: &HsmKeyReference) -> KeyLocation {
        if key.key_id.starts_with("https://") {
            if let Some((vault, rest)) = key.key_id.split_once("/keys/") {
                let mut parts = rest.trim_end_matches('/').splitn(2, '/');
                let name = parts.next().unwrap_or_default().to_string();
                let version = parts.next().map(str::to_string).or_else(|| key.key_version.clone());
                return KeyLocation {
                    vault: vault.to_string(),
                    name,
                    version,
                };
            }
        }
        KeyLocation {
            vault: key
                .vault_url
                .as_deref()
                .unwrap_or(self.vault())
                .trim_end_matches('/')
                .to_string(),
            name: key.key_id.clone(),
            version: key.key_version.clone(),
        }
    }

    /// Cached bearer token, refreshed when close to expiry.
    async fn bearer(&self, operation: Operation) -> Result<String, HsmError> {
        {
            let cached = self.token.read();
            if let Some(token) = cached.as_ref() {
                if token.expires_at - ChronoDuration::seconds(TOKEN_SKEW_SECS) > Utc::now() {
                    return Ok(token.value.clone());
                }
            }
        }

        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("client_secret", &self.config.client_secret)
            .append_pair("scope", VAULT_SCOPE)
            .finish();
        let request = KmsRequest::new(HttpMethod::Post, self.config.token_url(), self.config.timeout)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(form.into_bytes());
        let response = self
            .transport()?
            .execute(request)
            .await
            .map_err(|f| f.into_error(TAG, operation, None))?;
        if !response.is_success() {
            // a token the directory refuses is a session failure whatever the call
            let fault = fault(&response);
            return Err(HsmError::Connection {
                provider: TAG,
                message: format!("token request failed: {fault}"),
            });
        }
        let token: TokenResponse = response
            .json()
            .map_err(|f| f.into_error(TAG, operation, None))?;

        debug!(provider = %TAG, expires_in = token.expires_in, "Access token acquired");
        let value = token.access_token.clone();
        *self.token.write() = Some(CachedToken {
            value: token.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in.max(0)),
        });
        Ok(value)
    }

    async fn call_raw(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
        operation: Operation,
        key_id: Option<&str>,
    ) -> Result<KmsResponse, HsmError> {
        let token = self.bearer(operation).await?;
        let mut request = KmsRequest::new(
            method,
            with_api_version(url, &self.config.api_version),
            self.config.timeout,
        )
        .header("authorization", format!("Bearer {token}"));
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
        url: &str,
        body: Option<Value>,
        operation: Operation,
        key_id: Option<&str>,
    ) -> Result<T, HsmError> {
        self.call_raw(method, url, body, operation, key_id)
            .await?
            .json()
            .map_err(|f| f.into_error(TAG, operation, key_id))
    }

    async fn probe(&self, operation: Operation) -> Result<(), HsmError> {
        let url = format!("{}/keys?maxresults=1", self.vault());
        self.call_raw(HttpMethod::Get, &url, None, operation, None)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl HsmProvider for AzureKeyVaultProvider {
    fn provider(&self) -> ProviderTag {
        TAG
    }

    fn native_algorithm(&self, algorithm: SigningAlgorithm) -> &'static str {
        azure_signing_algorithm(algorithm)
    }

    async fn initialize(&self) -> Result<(), HsmError> {
        if self.config.client_id.is_empty() || self.config.client_secret.is_empty() {
            return Err(HsmError::Connection {
                provider: TAG,
                message: "missing client credentials".into(),
            });
        }
        self.transport()?;
        self.probe(Operation::Initialize).await?;
        self.initialized.store(true, Ordering::Release);
        info!(provider = %TAG, vault = %self.vault(), "HSM provider initialized");
        Ok(())
    }

    async fn sign(&self, request: &HsmSigningRequest) -> Result<HsmSigningResult, HsmError> {
        self.ensure_initialized()?;
        check_signing_request(TAG, request)?;
        let key = &request.key_reference;
        let location = self.locate(key);
        let body = json!({
            "alg": azure_signing_algorithm(request.algorithm),
            "value": URL_SAFE_NO_PAD.encode(&request.digest),
        });
        let response: SignResult = self
            .call(
                HttpMethod::Post,
                &format!("{}/sign", location.versioned()),
                Some(body),
                Operation::Sign,
                Some(&key.key_id),
            )
            .await?;

        let raw = decode_b64url(&response.value, "signature")?;
        let signature = if request.algorithm.key_algorithm() == KeyAlgorithm::Ec {
            ecdsa_raw_to_der(&raw).map_err(|e| HsmError::invalid_response(TAG, e.to_string()))?
        } else {
            raw
        };

        info!(provider = %TAG, key_id = %location.name, algorithm = %request.algorithm, "Digest signed");
        Ok(HsmSigningResult {
            signature,
            algorithm: request.algorithm,
            key_id: response.kid.unwrap_or_else(|| location.versioned()),
            provider: TAG,
            signed_at: Utc::now(),
        })
    }

    async fn get_public_key(&self, key: &HsmKeyReference) -> Result<PublicKey, HsmError> {
        self.ensure_initialized()?;
        let bundle: KeyBundle = self
            .call(
                HttpMethod::Get,
                &self.locate(key).versioned(),
                None,
                Operation::GetPublicKey,
                Some(&key.key_id),
            )
            .await?;
        jwk_public_key(&bundle.key)
    }

    async fn list_keys(&self) -> Result<Vec<HsmKeyInfo>, HsmError> {
        self.ensure_initialized()?;
        let mut keys = Vec::new();
        let mut next = Some(format!("{}/keys?maxresults={LIST_PAGE_SIZE}", self.vault()));
        let mut seen_links = Vec::new();

        while let Some(url) = next.take() {
            let page: KeyListResult = self
                .call(HttpMethod::Get, &url, None, Operation::ListKeys, None)
                .await?;
            seen_links.push(url);

            for item in page.value {
                // list entries carry no key material or operations
                let fetched = self
                    .call::<KeyBundle>(HttpMethod::Get, &item.kid, None, Operation::ListKeys, Some(&item.kid))
                    .await;
                let bundle = match fetched {
                    Ok(bundle) => bundle,
                    Err(HsmError::KeyNotFound { .. }) => continue,
                    Err(e) => return Err(e),
                };
                match key_info(&bundle) {
                    Ok(info) if info.purpose == KeyPurpose::SignVerify => keys.push(info),
                    Ok(_) => {}
                    Err(e) => debug!(provider = %TAG, key_id = %item.kid, error = %e, "Skipping unreadable key"),
                }
            }

            if let Some(link) = page.next_link.filter(|l| !l.is_empty()) {
                if seen_links.contains(&link) {
                    return Err(HsmError::invalid_response(TAG, "nextLink repeated"));
                }
                next = Some(link);
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
        let spec = round_up_key_spec(TAG, AZURE_KEY_SPECS, key_type, key_size)?;
        let name = key_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("docseal-{}", uuid::Uuid::new_v4()));
        let suffix = if self.config.software_keys { "" } else { "-HSM" };
        let body = match key_type {
            KeyAlgorithm::Rsa => json!({
                "kty": format!("RSA{suffix}"),
                "key_size": spec.bits,
                "key_ops": ["sign", "verify"],
                "tags": { "created-by": "docseal" },
            }),
            KeyAlgorithm::Ec => json!({
                "kty": format!("EC{suffix}"),
                "crv": spec.native,
                "key_ops": ["sign", "verify"],
                "tags": { "created-by": "docseal" },
            }),
        };
        let bundle: KeyBundle = self
            .call(
                HttpMethod::Post,
                &format!("{}/keys/{name}/create", self.vault()),
                Some(body),
                Operation::CreateKey,
                None,
            )
            .await?;
        let info = key_info(&bundle)?;
        if info.key_algorithm != key_type || info.key_size < key_size {
            return Err(HsmError::invalid_response(
                TAG,
                format!("created key {name} is {}-{}", info.key_algorithm, info.key_size),
            ));
        }

        info!(provider = %TAG, key_id = %info.key_id, key_spec = spec.native, requested_bits = key_size, "Signing key created");
        Ok(info)
    }

    async fn delete_key(&self, key: &HsmKeyReference) -> Result<KeyDeletionStatus, HsmError> {
        self.ensure_initialized()?;
        let location = self.locate(key);
        let deleted: DeletedKeyBundle = self
            .call(
                HttpMethod::Delete,
                &location.base(),
                None,
                Operation::DeleteKey,
                Some(&key.key_id),
            )
            .await?;

        let status = match deleted.recovery_id {
            Some(_) => KeyDeletionStatus {
                key_id: location.name.clone(),
                state: DeletionState::SoftDeleted,
                effective_at: deleted.scheduled_purge_date.and_then(unix_time),
            },
            None => KeyDeletionStatus {
                key_id: location.name.clone(),
                state: DeletionState::PendingDeletion,
                effective_at: None,
            },
        };
        warn!(provider = %TAG, key_id = %location.name, state = ?status.state, "Key deleted from vault");
        Ok(status)
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
    use shared_crypto::test_support::{p256_signer, rsa_signer};
    use shared_crypto::{ec_point, ecdsa_der_to_raw};
    use std::collections::HashSet;

    const VAULT: &str = "https://docs.vault.azure.net";

    fn config() -> AzureKeyVaultConfig {
        AzureKeyVaultConfig::new(VAULT, "tenant-1", "client-1", "s3cret")
    }

    fn token_reply(transport: &ScriptedTransport) {
        transport.push_json(200, json!({ "access_token": "eyJ.token", "expires_in": 3600, "token_type": "Bearer" }));
    }

    async fn initialized(transport: &Arc<ScriptedTransport>) -> AzureKeyVaultProvider {
        token_reply(transport);
        transport.push_json(200, json!({ "value": [] }));
        let provider = AzureKeyVaultProvider::with_transport(config(), transport.clone());
        provider.initialize().await.unwrap();
        transport.take_requests();
        provider
    }

    fn p256_jwk(kid: &str, ops: &[&str]) -> Value {
        let point = ec_point(&p256_signer().public_key().unwrap()).unwrap();
        json!({
            "key": {
                "kid": kid,
                "kty": "EC-HSM",
                "crv": "P-256",
                "key_ops": ops,
                "x": URL_SAFE_NO_PAD.encode(&point[1..33]),
                "y": URL_SAFE_NO_PAD.encode(&point[33..]),
            },
            "attributes": { "enabled": true, "created": 1_760_000_000 },
        })
    }

    fn rsa_jwk(kid: &str, ops: &[&str]) -> Value {
        use rsa::traits::PublicKeyParts;
        let shared_crypto::LocalSigningKey::Rsa(key) = rsa_signer() else {
            unreachable!("fixture is RSA")
        };
        json!({
            "key": {
                "kid": kid,
                "kty": "RSA-HSM",
                "key_ops": ops,
                "n": URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
                "e": URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
            },
            "attributes": { "enabled": true },
        })
    }

    #[test]
    fn test_algorithm_table_total_and_injective() {
        let names: HashSet<_> = SigningAlgorithm::ALL
            .iter()
            .map(|alg| azure_signing_algorithm(*alg))
            .collect();
        assert_eq!(names.len(), SigningAlgorithm::ALL.len());
    }

    #[test]
    fn test_kid_name() {
        assert_eq!(kid_name("https://v.vault.azure.net/keys/signer/abc123"), "signer");
        assert_eq!(kid_name("https://v.vault.azure.net/keys/signer"), "signer");
    }

    #[tokio::test]
    async fn test_initialize_fetches_token_then_probes() {
        let transport = Arc::new(ScriptedTransport::new());
        token_reply(&transport);
        transport.push_json(200, json!({ "value": [] }));
        let provider = AzureKeyVaultProvider::with_transport(config(), transport.clone());
        provider.initialize().await.unwrap();

        let requests = transport.requests();
        assert_eq!(
            requests[0].url,
            "https://login.microsoftonline.com/tenant-1/oauth2/v2.0/token"
        );
        let form = String::from_utf8(requests[0].body.clone()).unwrap();
        assert!(form.contains("grant_type=client_credentials"));
        assert!(form.contains("scope=https%3A%2F%2Fvault.azure.net%2F.default"));
        assert_eq!(requests[1].url, format!("{VAULT}/keys?maxresults=1&api-version=7.4"));
        assert_eq!(requests[1].header_value("authorization"), Some("Bearer eyJ.token"));
    }

    #[tokio::test]
    async fn test_rejected_client_secret_is_connection_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(
            401,
            json!({ "error": "invalid_client", "error_description": "AADSTS7000215: Invalid client secret" }),
        );
        let provider = AzureKeyVaultProvider::with_transport(config(), transport);
        let err = provider.initialize().await.unwrap_err();
        assert!(matches!(err, HsmError::Connection { .. }));
        assert!(err.to_string().contains("invalid_client"));
    }

    #[tokio::test]
    async fn test_token_is_cached_between_calls() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = initialized(&transport).await;
        transport.push_json(200, json!({ "value": [] }));
        assert!(provider.test_connection().await);
        // no second token request
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_ecdsa_signature_converted_to_der() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = initialized(&transport).await;

        let digest = [0x42u8; 32];
        let der = p256_signer().sign_digest(&digest, SigningAlgorithm::EcdsaSha256).unwrap();
        let raw = ecdsa_der_to_raw(&der, 32).unwrap();
        transport.push_json(
            200,
            json!({ "kid": format!("{VAULT}/keys/signer/v1"), "value": URL_SAFE_NO_PAD.encode(&raw) }),
        );

        let request = HsmSigningRequest {
            key_reference: HsmKeyReference::new(TAG, "signer").with_version("v1"),
            digest: digest.to_vec(),
            algorithm: SigningAlgorithm::EcdsaSha256,
        };
        let result = provider.sign(&request).await.unwrap();
        assert_eq!(result.signature, der);
        assert_eq!(result.key_id, format!("{VAULT}/keys/signer/v1"));

        let sent = transport.requests().remove(0);
        assert_eq!(sent.url, format!("{VAULT}/keys/signer/v1/sign?api-version=7.4"));
        let body = sent.body_json().unwrap();
        assert_eq!(body["alg"], "ES256");
        assert_eq!(body["value"], URL_SAFE_NO_PAD.encode(digest));
    }

    #[tokio::test]
    async fn test_sign_error_mapping() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = initialized(&transport).await;
        let request = HsmSigningRequest {
            key_reference: HsmKeyReference::new(TAG, "signer"),
            digest: vec![0; 32],
            algorithm: SigningAlgorithm::RsaPkcs1Sha256,
        };

        transport.push_json(404, json!({ "error": { "code": "KeyNotFound", "message": "A key with (name/id) signer was not found" } }));
        assert!(matches!(provider.sign(&request).await, Err(HsmError::KeyNotFound { .. })));

        transport.push_json(403, json!({ "error": { "code": "Forbidden", "message": "caller lacks keys/sign" } }));
        assert!(matches!(provider.sign(&request).await, Err(HsmError::Authentication { .. })));

        transport.push_json(
            403,
            json!({ "error": { "code": "Forbidden", "message": "Operation sign is not permitted", "innererror": { "code": "KeyOperationForbidden" } } }),
        );
        assert!(matches!(provider.sign(&request).await, Err(HsmError::Signing { .. })));
    }

    #[tokio::test]
    async fn test_get_public_key_from_jwk() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = initialized(&transport).await;

        transport.push_json(200, p256_jwk(&format!("{VAULT}/keys/ec/1"), &["sign", "verify"]));
        let key = provider.get_public_key(&HsmKeyReference::new(TAG, "ec")).await.unwrap();
        assert_eq!(key, p256_signer().public_key().unwrap());

        transport.push_json(200, rsa_jwk(&format!("{VAULT}/keys/rsa/1"), &["sign"]));
        let key = provider.get_public_key(&HsmKeyReference::new(TAG, "rsa")).await.unwrap();
        assert_eq!(key, rsa_signer().public_key().unwrap());
    }

    #[tokio::test]
    async fn test_list_keys_follows_next_link_and_filters_ops() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = initialized(&transport).await;
        let next = format!("{VAULT}/keys?api-version=7.4&$skiptoken=abc&maxresults=25");

        transport.push_json(
            200,
            json!({ "value": [{ "kid": format!("{VAULT}/keys/signer") }, { "kid": format!("{VAULT}/keys/wrapper") }], "nextLink": next }),
        );
        transport.push_json(200, p256_jwk(&format!("{VAULT}/keys/signer/1"), &["sign", "verify"]));
        transport.push_json(200, rsa_jwk(&format!("{VAULT}/keys/wrapper/1"), &["wrapKey", "unwrapKey"]));
        transport.push_json(200, json!({ "value": [{ "kid": format!("{VAULT}/keys/rsa") }] }));
        transport.push_json(200, rsa_jwk(&format!("{VAULT}/keys/rsa/2"), &["sign"]));

        let keys = provider.list_keys().await.unwrap();
        let names: Vec<_> = keys.iter().map(|k| k.key_id.as_str()).collect();
        assert_eq!(names, vec!["signer", "rsa"]);
        assert_eq!((keys[1].key_algorithm, keys[1].key_size), (KeyAlgorithm::Rsa, 2048));

        let requests = transport.requests();
        assert_eq!(requests[3].url, next);
    }

    #[tokio::test]
    async fn test_create_key_rounds_up_to_hsm_curve() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = initialized(&transport).await;
        transport.push_json(200, p256_jwk(&format!("{VAULT}/keys/stamp/1"), &["sign", "verify"]));

        let info = provider.create_key(KeyAlgorithm::Ec, 200, Some("stamp")).await.unwrap();
        assert_eq!(info.key_size, 256);

        let sent = transport.requests().remove(0);
        assert_eq!(sent.url, format!("{VAULT}/keys/stamp/create?api-version=7.4"));
        let body = sent.body_json().unwrap();
        assert_eq!(body["kty"], "EC-HSM");
        assert_eq!(body["crv"], "P-256");
    }

    #[tokio::test]
    async fn test_delete_reports_soft_delete() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = initialized(&transport).await;
        transport.push_json(
            200,
            json!({ "recoveryId": format!("{VAULT}/deletedkeys/signer"), "scheduledPurgeDate": 1_800_000_000, "deletedDate": 1_790_000_000 }),
        );

        let key = HsmKeyReference::new(TAG, format!("{VAULT}/keys/signer/v3"));
        let status = provider.delete_key(&key).await.unwrap();
        assert_eq!(status.state, DeletionState::SoftDeleted);
        assert_eq!(status.key_id, "signer");
        assert_eq!(status.effective_at.unwrap().timestamp(), 1_800_000_000);

        let sent = transport.requests().remove(0);
        assert_eq!(sent.method, HttpMethod::Delete);
        assert_eq!(sent.url, format!("{VAULT}/keys/signer?api-version=7.4"));
    }
}
