//! # AWS KMS Adapter
//!
//! Speaks the KMS JSON 1.1 protocol (`X-Amz-Target: TrentService.*`),
//! signed with SigV4. Signing always sends `MessageType: DIGEST`; KMS
//! returns ECDSA signatures DER-encoded already.

use crate::adapters::sigv4::{self, CanonicalRequest, Scope};
use crate::adapters::{decode_base64, epoch_seconds, http_transport};
use crate::domain::entities::{check_signing_request, lookup_key_spec, round_up_key_spec, AwsKmsConfig, KeySpecEntry};
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
    DeletionState, HsmKeyInfo, HsmKeyReference, HsmSigningRequest, HsmSigningResult, KeyAlgorithm,
    KeyDeletionStatus, KeyPurpose, ProviderTag, PublicKey, SigningAlgorithm,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

const TAG: ProviderTag = ProviderTag::AwsKms;
const SERVICE: &str = "kms";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const LIST_PAGE_LIMIT: u32 = 100;

/// Key specs KMS can create for signing.
pub const AWS_KEY_SPECS: &[KeySpecEntry] = &[
    KeySpecEntry::new(KeyAlgorithm::Rsa, 2048, "RSA_2048"),
    KeySpecEntry::new(KeyAlgorithm::Rsa, 3072, "RSA_3072"),
    KeySpecEntry::new(KeyAlgorithm::Rsa, 4096, "RSA_4096"),
    KeySpecEntry::new(KeyAlgorithm::Ec, 256, "ECC_NIST_P256"),
    KeySpecEntry::new(KeyAlgorithm::Ec, 384, "ECC_NIST_P384"),
    KeySpecEntry::new(KeyAlgorithm::Ec, 521, "ECC_NIST_P521"),
];

/// KMS `SigningAlgorithmSpec` for each abstract algorithm.
pub fn aws_signing_algorithm(algorithm: SigningAlgorithm) -> &'static str {
    match algorithm {
        SigningAlgorithm::RsaPkcs1Sha256 => "RSASSA_PKCS1_V1_5_SHA_256",
        SigningAlgorithm::RsaPkcs1Sha384 => "RSASSA_PKCS1_V1_5_SHA_384",
        SigningAlgorithm::RsaPkcs1Sha512 => "RSASSA_PKCS1_V1_5_SHA_512",
        SigningAlgorithm::RsaPssSha256 => "RSASSA_PSS_SHA_256",
        SigningAlgorithm::RsaPssSha384 => "RSASSA_PSS_SHA_384",
        SigningAlgorithm::RsaPssSha512 => "RSASSA_PSS_SHA_512",
        SigningAlgorithm::EcdsaSha256 => "ECDSA_SHA_256",
        SigningAlgorithm::EcdsaSha384 => "ECDSA_SHA_384",
        SigningAlgorithm::EcdsaSha512 => "ECDSA_SHA_512",
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SignResponse {
    key_id: Option<String>,
    signature: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PublicKeyResponse {
    public_key: String,
    key_spec: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListKeysResponse {
    #[serde(default)]
    keys: Vec<KeyListEntry>,
    next_marker: Option<String>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyListEntry {
    key_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyMetadataResponse {
    key_metadata: KeyMetadata,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyMetadata {
    key_id: String,
    creation_date: Option<f64>,
    #[serde(default)]
    enabled: bool,
    key_usage: Option<String>,
    key_spec: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ScheduleDeletionResponse {
    key_id: Option<String>,
    deletion_date: Option<f64>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(alias = "Message", default)]
    message: String,
}

fn purpose(usage: Option<&str>) -> KeyPurpose {
    match usage {
        Some("SIGN_VERIFY") => KeyPurpose::SignVerify,
        Some("ENCRYPT_DECRYPT") => KeyPurpose::EncryptDecrypt,
        _ => KeyPurpose::Other,
    }
}

fn key_info(meta: KeyMetadata) -> Option<HsmKeyInfo> {
    let spec = lookup_key_spec(AWS_KEY_SPECS, meta.key_spec.as_deref()?)?;
    Some(HsmKeyInfo {
        purpose: purpose(meta.key_usage.as_deref()),
        key_algorithm: spec.algorithm,
        key_size: spec.bits,
        created_at: meta.creation_date.and_then(epoch_seconds),
        enabled: meta.enabled,
        label: meta.description.filter(|d| !d.is_empty()),
        key_id: meta.key_id,
        provider: TAG,
    })
}

/// Classify a KMS error body. `__type` may carry a namespace prefix,
/// e.g. `com.amazonaws.kms#NotFoundException`.
fn fault(response: &KmsResponse) -> ProviderFault {
    let body: ErrorBody = serde_json::from_slice(&response.body).unwrap_or(ErrorBody {
        kind: String::new(),
        message: String::from_utf8_lossy(&response.body).into_owned(),
    });
    let code = body.kind.rsplit('#').next().unwrap_or_default().to_string();
    let kind = match code.as_str() {
        "NotFoundException" => FaultKind::NotFound,
        "AccessDeniedException" => FaultKind::Forbidden,
        "UnrecognizedClientException"
        | "InvalidSignatureException"
        | "IncompleteSignature"
        | "MissingAuthenticationToken"
        | "ExpiredTokenException" => FaultKind::Unauthenticated,
        "ThrottlingException" | "LimitExceededException" => FaultKind::Throttled,
        "KMSInternalException" | "DependencyTimeoutException" => FaultKind::Unavailable,
        _ => FaultKind::from_http_status(response.status),
    };
    let message = if body.message.is_empty() {
        format!("HTTP {}", response.status)
    } else {
        body.message
    };
    ProviderFault::new(kind, code, message)
}

// =============================================================================
// Adapter
// =============================================================================

/// AWS KMS signing provider.
pub struct AwsKmsProvider {
    config: AwsKmsConfig,
    transport: Option<Arc<dyn KmsTransport>>,
    initialized: AtomicBool,
}

impl AwsKmsProvider {
    /// Provider over HTTPS. Never fails; a missing HTTP client is reported
    /// by `initialize`.
    pub fn new(config: AwsKmsConfig) -> Self {
        Self {
            transport: http_transport(TAG),
            config,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn with_transport(config: AwsKmsConfig, transport: Arc<dyn KmsTransport>) -> Self {
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

    fn region<'a>(&'a self, key: &'a HsmKeyReference) -> &'a str {
        key.region.as_deref().unwrap_or(&self.config.region)
    }

    /// SigV4-signed `TrentService.{target}` request.
    fn signed_request(&self, target: &str, region: &str, body: &Value) -> Result<KmsRequest, HsmError> {
        let endpoint = self.config.endpoint_for(region);
        let url = Url::parse(&endpoint).map_err(|e| HsmError::Connection {
            provider: TAG,
            message: format!("invalid endpoint {endpoint}: {e}"),
        })?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(HsmError::Connection {
                    provider: TAG,
                    message: format!("endpoint {endpoint} has no host"),
                })
            }
        };
        let payload = body.to_string().into_bytes();
        let (amz_date, date) = sigv4::timestamps(Utc::now());

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), CONTENT_TYPE.to_string());
        headers.insert("host".to_string(), host);
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        headers.insert("x-amz-target".to_string(), format!("TrentService.{target}"));
        if let Some(token) = &self.config.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }

        let scope = Scope {
            date: &date,
            region,
            service: SERVICE,
        };
        let canonical = CanonicalRequest {
            method: HttpMethod::Post.as_str(),
            path: url.path(),
            query: "",
            headers,
            payload: &payload,
        };
        let authorization = sigv4::authorization(
            &self.config.access_key_id,
            &self.config.secret_access_key,
            &amz_date,
            &scope,
            &canonical,
        );

        let mut request = KmsRequest::new(HttpMethod::Post, url.as_str(), self.config.timeout);
        for (name, value) in canonical.headers {
            // the HTTP client derives Host from the URL
            if name != "host" {
                request = request.header(name, value);
            }
        }
        Ok(request.header("authorization", authorization).body(payload))
    }

    async fn call_raw(
        &self,
        target: &str,
        region: &str,
        body: Value,
        operation: Operation,
        key_id: Option<&str>,
    ) -> Result<KmsResponse, HsmError> {
        let request = self.signed_request(target, region, &body)?;
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
        target: &str,
        region: &str,
        body: Value,
        operation: Operation,
        key_id: Option<&str>,
    ) -> Result<T, HsmError> {
        self.call_raw(target, region, body, operation, key_id)
            .await?
            .json()
            .map_err(|f| f.into_error(TAG, operation, key_id))
    }

    async fn probe(&self, operation: Operation) -> Result<(), HsmError> {
        self.call::<ListKeysResponse>(
            "ListKeys",
            &self.config.region,
            json!({ "Limit": 1 }),
            operation,
            None,
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl HsmProvider for AwsKmsProvider {
    fn provider(&self) -> ProviderTag {
        TAG
    }

    fn native_algorithm(&self, algorithm: SigningAlgorithm) -> &'static str {
        aws_signing_algorithm(algorithm)
    }

    async fn initialize(&self) -> Result<(), HsmError> {
        if self.config.access_key_id.is_empty() || self.config.secret_access_key.is_empty() {
            return Err(HsmError::Connection {
                provider: TAG,
                message: "missing AWS access key credentials".into(),
            });
        }
        self.transport()?;
        self.probe(Operation::Initialize).await?;
        self.initialized.store(true, Ordering::Release);
        info!(provider = %TAG, region = %self.config.region, "HSM provider initialized");
        Ok(())
    }

    async fn sign(&self, request: &HsmSigningRequest) -> Result<HsmSigningResult, HsmError> {
        self.ensure_initialized()?;
        check_signing_request(TAG, request)?;
        let key = &request.key_reference;
        let body = json!({
            "KeyId": key.key_id,
            "Message": STANDARD.encode(&request.digest),
            "MessageType": "DIGEST",
            "SigningAlgorithm": aws_signing_algorithm(request.algorithm),
        });
        let response: SignResponse = self
            .call("Sign", self.region(key), body, Operation::Sign, Some(&key.key_id))
            .await?;
        let signature = decode_base64(TAG, &STANDARD, &response.signature, "signature")?;

        info!(provider = %TAG, key_id = %key.key_id, algorithm = %request.algorithm, "Digest signed");
        Ok(HsmSigningResult {
            signature,
            algorithm: request.algorithm,
            key_id: response.key_id.unwrap_or_else(|| key.key_id.clone()),
            provider: TAG,
            signed_at: Utc::now(),
        })
    }

    async fn get_public_key(&self, key: &HsmKeyReference) -> Result<PublicKey, HsmError> {
        self.ensure_initialized()?;
        let response: PublicKeyResponse = self
            .call(
                "GetPublicKey",
                self.region(key),
                json!({ "KeyId": key.key_id }),
                Operation::GetPublicKey,
                Some(&key.key_id),
            )
            .await?;

        let spec_name = response.key_spec.unwrap_or_default();
        let spec = lookup_key_spec(AWS_KEY_SPECS, &spec_name).ok_or_else(|| {
            HsmError::invalid_response(TAG, format!("unsupported key spec {spec_name:?}"))
        })?;
        let der = decode_base64(TAG, &STANDARD, &response.public_key, "public key")?;
        let public_key = PublicKey::from_spki_der(&der)
            .map_err(|e| HsmError::invalid_response(TAG, e.to_string()))?;
        if public_key.algorithm != spec.algorithm || public_key.bits != spec.bits {
            return Err(HsmError::invalid_response(
                TAG,
                format!(
                    "key spec {spec_name} disagrees with key material {}-{}",
                    public_key.algorithm, public_key.bits
                ),
            ));
        }
        Ok(public_key)
    }

    async fn list_keys(&self) -> Result<Vec<HsmKeyInfo>, HsmError> {
        self.ensure_initialized()?;
        let region = self.config.region.clone();
        let mut keys = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut body = json!({ "Limit": LIST_PAGE_LIMIT });
            if let Some(marker) = &marker {
                body["Marker"] = json!(marker);
            }
            let page: ListKeysResponse = self
                .call("ListKeys", &region, body, Operation::ListKeys, None)
                .await?;

            for entry in page.keys {
                let described = self
                    .call::<KeyMetadataResponse>(
                        "DescribeKey",
                        &region,
                        json!({ "KeyId": entry.key_id }),
                        Operation::ListKeys,
                        Some(&entry.key_id),
                    )
                    .await;
                let meta = match described {
                    Ok(response) => response.key_metadata,
                    // deleted between the two calls
                    Err(HsmError::KeyNotFound { .. }) => continue,
                    Err(e) => return Err(e),
                };
                if purpose(meta.key_usage.as_deref()) != KeyPurpose::SignVerify {
                    continue;
                }
                let key_id = meta.key_id.clone();
                match key_info(meta) {
                    Some(info) => keys.push(info),
                    None => debug!(provider = %TAG, key_id = %key_id, "Skipping key with unsupported spec"),
                }
            }

            match page.next_marker {
                Some(next) if page.truncated => {
                    if marker.as_deref() == Some(next.as_str()) {
                        return Err(HsmError::invalid_response(TAG, "pagination marker repeated"));
                    }
                    marker = Some(next);
                }
                _ => break,
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
        let spec = round_up_key_spec(TAG, AWS_KEY_SPECS, key_type, key_size)?;
        let mut body = json!({
            "KeySpec": spec.native,
            "KeyUsage": "SIGN_VERIFY",
            "Description": key_id.unwrap_or("DocSeal signing key"),
        });
        if let Some(id) = key_id {
            body["Tags"] = json!([{ "TagKey": "docseal:key-id", "TagValue": id }]);
        }
        let created: KeyMetadataResponse = self
            .call("CreateKey", &self.config.region, body, Operation::CreateKey, None)
            .await?;
        let kms_key_id = created.key_metadata.key_id.clone();

        let mut info = key_info(created.key_metadata).ok_or_else(|| {
            HsmError::invalid_response(TAG, format!("created key {kms_key_id} reports no usable spec"))
        })?;

        // KMS assigns its own identifier; a requested one becomes an alias
        if let Some(id) = key_id {
            let alias = format!("alias/{id}");
            self.call_raw(
                "CreateAlias",
                &self.config.region,
                json!({ "AliasName": alias, "TargetKeyId": kms_key_id }),
                Operation::CreateKey,
                None,
            )
            .await?;
            info.label = Some(alias);
        }

        info!(
            provider = %TAG,
            key_id = %info.key_id,
            key_spec = spec.native,
            requested_bits = key_size,
            "Signing key created"
        );
        Ok(info)
    }

    async fn delete_key(&self, key: &HsmKeyReference) -> Result<KeyDeletionStatus, HsmError> {
        self.ensure_initialized()?;
        let days = self.config.pending_window_days.clamp(7, 30);
        let response: ScheduleDeletionResponse = self
            .call(
                "ScheduleKeyDeletion",
                self.region(key),
                json!({ "KeyId": key.key_id, "PendingWindowInDays": days }),
                Operation::DeleteKey,
                Some(&key.key_id),
            )
            .await?;

        warn!(provider = %TAG, key_id = %key.key_id, pending_days = days, "Key deletion scheduled");
        Ok(KeyDeletionStatus {
            key_id: response.key_id.unwrap_or_else(|| key.key_id.clone()),
            state: DeletionState::PendingDeletion,
            effective_at: response.deletion_date.and_then(epoch_seconds),
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
