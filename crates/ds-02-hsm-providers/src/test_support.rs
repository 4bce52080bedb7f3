//! # Scripted Backends
//!
//! [`ScriptedTransport`] replays queued HTTP replies and records what was
//! sent. [`SoftToken`] is an in-memory token holding ordinary software keys.

#![allow(missing_docs)]

use crate::domain::entities::TokenMechanism;
use crate::domain::errors::{FaultKind, ProviderFault};
use crate::ports::outbound::{KmsRequest, KmsResponse, KmsTransport, TokenBackend, TokenInfo, TokenKey, TokenPublicKey};
use async_trait::async_trait;
use parking_lot::Mutex;
use rsa::traits::PublicKeyParts;
use shared_crypto::test_support::generate_private_key;
use shared_crypto::{ec_point, ecdsa, ecdsa_der_to_raw, LocalSigningKey};
use shared_types::{KeyAlgorithm, PrivateKey};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

// =============================================================================
// HTTP
// =============================================================================

/// Replies in FIFO order; an empty queue is a transport failure.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<KmsResponse, ProviderFault>>>,
    requests: Mutex<Vec<KmsRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: KmsResponse) {
        self.replies.lock().push_back(Ok(response));
    }

    pub fn push_json(&self, status: u16, body: serde_json::Value) {
        self.push_response(KmsResponse::new(status, body.to_string().into_bytes()));
    }

    pub fn push_fault(&self, fault: ProviderFault) {
        self.replies.lock().push_back(Err(fault));
    }

    /// Requests sent so far.
    pub fn requests(&self) -> Vec<KmsRequest> {
        self.requests.lock().clone()
    }

    /// Requests sent so far, clearing the log.
    pub fn take_requests(&self) -> Vec<KmsRequest> {
        std::mem::take(&mut *self.requests.lock())
    }
}

#[async_trait]
impl KmsTransport for ScriptedTransport {
    async fn execute(&self, request: KmsRequest) -> Result<KmsResponse, ProviderFault> {
        let url = request.url.clone();
        self.requests.lock().push(request);
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderFault::transport(format!("no scripted reply for {url}"))))
    }
}

// =============================================================================
// PKCS#11
// =============================================================================

struct SoftKey {
    key: LocalSigningKey,
    id: Vec<u8>,
    can_sign: bool,
}

impl SoftKey {
    fn describe(&self, label: &str) -> TokenKey {
        let (algorithm, bits) = self.key.key_type();
        TokenKey {
            label: label.to_string(),
            id: self.id.clone(),
            algorithm,
            bits,
            can_sign: self.can_sign,
            can_decrypt: !self.can_sign,
        }
    }
}

/// Token whose objects are software keys addressed by label.
pub struct SoftToken {
    keys: Mutex<BTreeMap<String, SoftKey>>,
    open_fault: Option<ProviderFault>,
    connected: AtomicBool,
}

impl Default for SoftToken {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftToken {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(BTreeMap::new()),
            open_fault: None,
            connected: AtomicBool::new(true),
        }
    }

    pub fn with_key(self, label: &str, key: &PrivateKey) -> Self {
        self.insert(label, key, true);
        self
    }

    /// A key whose `CKA_SIGN` is false.
    pub fn with_decrypt_only_key(self, label: &str, key: &PrivateKey) -> Self {
        self.insert(label, key, false);
        self
    }

    /// `open` fails with this fault, as a bad PIN or missing slot would.
    pub fn failing_open(mut self, fault: ProviderFault) -> Self {
        self.open_fault = Some(fault);
        self
    }

    pub fn contains(&self, label: &str) -> bool {
        self.keys.lock().contains_key(label)
    }

    /// Simulate the device going away; later calls fail.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn insert(&self, label: &str, key: &PrivateKey, can_sign: bool) {
        let key = LocalSigningKey::from_private_key(key).expect("soft token key");
        let id = uuid::Uuid::new_v4().as_bytes().to_vec();
        self.keys
            .lock()
            .insert(label.to_string(), SoftKey { key, id, can_sign });
    }

    fn check_connected(&self) -> Result<(), ProviderFault> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderFault::new(FaultKind::Unavailable, "CKR_DEVICE_REMOVED", "token removed"))
        }
    }
}

fn not_found(label: &str) -> ProviderFault {
    ProviderFault::new(FaultKind::NotFound, "", format!("no object labelled {label}"))
}

impl TokenBackend for SoftToken {
    fn open(&self) -> Result<TokenInfo, ProviderFault> {
        if let Some(fault) = &self.open_fault {
            return Err(fault.clone());
        }
        self.check_connected()?;
        Ok(TokenInfo {
            slot_id: 0,
            label: "DocSeal SoftToken".into(),
            manufacturer: "DocSeal".into(),
        })
    }

    fn sign(&self, label: &str, mechanism: TokenMechanism, digest: &[u8]) -> Result<Vec<u8>, ProviderFault> {
        self.check_connected()?;
        let keys = self.keys.lock();
        let entry = keys.get(label).ok_or_else(|| not_found(label))?;
        if !entry.can_sign {
            return Err(ProviderFault::new(
                FaultKind::Rejected,
                "CKR_KEY_FUNCTION_NOT_PERMITTED",
                format!("{label} cannot sign"),
            ));
        }
        let signature = entry
            .key
            .sign_digest(digest, mechanism.signing_algorithm())
            .map_err(|e| ProviderFault::new(FaultKind::Rejected, "CKR_KEY_TYPE_INCONSISTENT", e.to_string()))?;
        match entry.key.key_type() {
            (KeyAlgorithm::Ec, bits) => ecdsa_der_to_raw(&signature, ecdsa::scalar_len(bits))
                .map_err(|e| ProviderFault::malformed(e.to_string())),
            (KeyAlgorithm::Rsa, _) => Ok(signature),
        }
    }

    fn public_key(&self, label: &str) -> Result<TokenPublicKey, ProviderFault> {
        self.check_connected()?;
        let keys = self.keys.lock();
        let entry = keys.get(label).ok_or_else(|| not_found(label))?;
        match &entry.key {
            LocalSigningKey::Rsa(key) => Ok(TokenPublicKey::Rsa {
                modulus: key.n().to_bytes_be(),
                exponent: key.e().to_bytes_be(),
            }),
            ec => {
                let public = ec.public_key().map_err(|e| ProviderFault::malformed(e.to_string()))?;
                Ok(TokenPublicKey::Ec {
                    curve_bits: public.bits,
                    point: ec_point(&public).map_err(|e| ProviderFault::malformed(e.to_string()))?,
                })
            }
        }
    }

    fn list_private_keys(&self) -> Result<Vec<TokenKey>, ProviderFault> {
        self.check_connected()?;
        Ok(self
            .keys
            .lock()
            .iter()
            .map(|(label, key)| key.describe(label))
            .collect())
    }

    fn generate_key_pair(&self, label: &str, algorithm: KeyAlgorithm, bits: u32) -> Result<TokenKey, ProviderFault> {
        self.check_connected()?;
        if self.contains(label) {
            return Err(ProviderFault::new(
                FaultKind::Rejected,
                "",
                format!("a key labelled {label} already exists"),
            ));
        }
        if algorithm == KeyAlgorithm::Ec && !matches!(bits, 256 | 384 | 521) {
            return Err(ProviderFault::new(
                FaultKind::Rejected,
                "CKR_CURVE_NOT_SUPPORTED",
                format!("P-{bits}"),
            ));
        }
        self.insert(label, &generate_private_key(algorithm, bits), true);
        let keys = self.keys.lock();
        keys.get(label)
            .map(|key| key.describe(label))
            .ok_or_else(|| not_found(label))
    }

    fn destroy_key_pair(&self, label: &str) -> Result<(), ProviderFault> {
        self.check_connected()?;
        self.keys
            .lock()
            .remove(label)
            .map(|_| ())
            .ok_or_else(|| not_found(label))
    }

    fn probe(&self) -> Result<(), ProviderFault> {
        self.check_connected()
    }
}
