//! # Shared Fixtures
//!
//! An in-process AWS KMS stand-in that really signs, so HSM-backed
//! signatures produced through the adapter validate end to end.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ds_02_hsm_providers::adapters::aws::aws_signing_algorithm;
use ds_02_hsm_providers::{KmsRequest, KmsResponse, KmsTransport, ProviderFault};
use parking_lot::Mutex;
use serde_json::{json, Value};
use shared_crypto::LocalSigningKey;
use shared_types::SigningAlgorithm;
use std::collections::HashMap;

/// Answers `ListKeys` and `Sign` for the keys it holds.
pub struct EmulatedKms {
    keys: HashMap<String, LocalSigningKey>,
    targets: Mutex<Vec<String>>,
}

impl EmulatedKms {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            targets: Mutex::new(Vec::new()),
        }
    }

    pub fn with_key(mut self, key_id: &str, key: LocalSigningKey) -> Self {
        self.keys.insert(key_id.to_string(), key);
        self
    }

    /// `X-Amz-Target` operations received so far, without the service prefix.
    pub fn operations(&self) -> Vec<String> {
        self.targets.lock().clone()
    }

    fn error(kind: &str, message: &str) -> KmsResponse {
        KmsResponse::new(400, json!({ "__type": kind, "message": message }).to_string())
    }

    fn sign(&self, body: &Value) -> KmsResponse {
        let key_id = body["KeyId"].as_str().unwrap_or_default();
        let Some(key) = self.keys.get(key_id) else {
            return Self::error("NotFoundException", "no such key");
        };
        let requested = body["SigningAlgorithm"].as_str().unwrap_or_default();
        let Some(algorithm) = SigningAlgorithm::ALL
            .into_iter()
            .find(|alg| aws_signing_algorithm(*alg) == requested)
        else {
            return Self::error("ValidationException", "unknown algorithm");
        };
        let digest = match STANDARD.decode(body["Message"].as_str().unwrap_or_default()) {
            Ok(digest) => digest,
            Err(_) => return Self::error("ValidationException", "message is not base64"),
        };
        match key.sign_digest(&digest, algorithm) {
            Ok(signature) => KmsResponse::new(
                200,
                json!({
                    "KeyId": format!("arn:aws:kms:us-east-1:000000000000:key/{key_id}"),
                    "Signature": STANDARD.encode(signature),
                    "SigningAlgorithm": requested,
                })
                .to_string(),
            ),
            Err(e) => Self::error("InvalidKeyUsageException", &e.to_string()),
        }
    }
}

impl Default for EmulatedKms {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KmsTransport for EmulatedKms {
    async fn execute(&self, request: KmsRequest) -> Result<KmsResponse, ProviderFault> {
        let target = request
            .header_value("x-amz-target")
            .unwrap_or_default()
            .trim_start_matches("TrentService.")
            .to_string();
        self.targets.lock().push(target.clone());
        let body = request.body_json().unwrap_or(Value::Null);

        Ok(match target.as_str() {
            "ListKeys" => KmsResponse::new(200, json!({ "Keys": [], "Truncated": false }).to_string()),
            "Sign" => self.sign(&body),
            other => Self::error("UnsupportedOperationException", other),
        })
    }
}
