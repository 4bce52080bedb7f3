//! # PKCS#11 Token Adapter
//!
//! Drives a local token through a [`TokenBackend`]. Keys are addressed by
//! `CKA_LABEL`. Token calls block, so each one runs on the blocking pool.
//!
//! The native backend ([`CryptokiBackend`]) needs the `pkcs11` feature.
//! Without it the adapter still constructs; `initialize` then reports the
//! missing dependency.

use crate::domain::entities::{check_signing_request, round_up_key_spec, KeySpecEntry, Pkcs11Config, TokenMechanism};
use crate::domain::errors::{HsmError, Operation, ProviderFault};
use crate::ports::inbound::HsmProvider;
use crate::ports::outbound::{TokenBackend, TokenInfo, TokenKey, TokenPublicKey};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use shared_crypto::{ecdsa_raw_to_der, public_key_from_ec_point, public_key_from_rsa_components};
use shared_types::{
    DeletionState, HsmKeyInfo, HsmKeyReference, HsmSigningRequest, HsmSigningResult, KeyAlgorithm,
    KeyDeletionStatus, KeyPurpose, ProviderTag, PublicKey, SigningAlgorithm,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

const TAG: ProviderTag = ProviderTag::Pkcs11;

/// Key sizes the token is asked to generate.
pub const PKCS11_KEY_SPECS: &[KeySpecEntry] = &[
    KeySpecEntry::new(KeyAlgorithm::Rsa, 2048, "RSA-2048"),
    KeySpecEntry::new(KeyAlgorithm::Rsa, 3072, "RSA-3072"),
    KeySpecEntry::new(KeyAlgorithm::Rsa, 4096, "RSA-4096"),
    KeySpecEntry::new(KeyAlgorithm::Ec, 256, "P-256"),
    KeySpecEntry::new(KeyAlgorithm::Ec, 384, "P-384"),
    KeySpecEntry::new(KeyAlgorithm::Ec, 521, "P-521"),
];

fn key_info(key: TokenKey) -> HsmKeyInfo {
    HsmKeyInfo {
        provider: TAG,
        key_algorithm: key.algorithm,
        key_size: key.bits,
        purpose: match (key.can_sign, key.can_decrypt) {
            (true, _) => KeyPurpose::SignVerify,
            (false, true) => KeyPurpose::EncryptDecrypt,
            (false, false) => KeyPurpose::Other,
        },
        created_at: None,
        enabled: true,
        label: (!key.id.is_empty()).then(|| hex::encode(&key.id)),
        key_id: key.label,
    }
}

/// PKCS#11 token signing provider.
pub struct Pkcs11Provider {
    config: Pkcs11Config,
    backend: Option<Arc<dyn TokenBackend>>,
    session: RwLock<Option<TokenInfo>>,
}

impl Pkcs11Provider {
    /// Provider over the native `cryptoki` backend when compiled in.
    pub fn new(config: Pkcs11Config) -> Self {
        Self {
            backend: native_backend(&config),
            config,
            session: RwLock::new(None),
        }
    }

    pub fn with_backend(config: Pkcs11Config, backend: Arc<dyn TokenBackend>) -> Self {
        Self {
            config,
            backend: Some(backend),
            session: RwLock::new(None),
        }
    }

    /// Token the session is open on, once initialized.
    pub fn token_info(&self) -> Option<TokenInfo> {
        self.session.read().clone()
    }

    fn backend(&self) -> Result<&Arc<dyn TokenBackend>, HsmError> {
        self.backend
            .as_ref()
            .ok_or_else(|| HsmError::DependencyUnavailable {
                provider: TAG,
                dependency: "cryptoki (built without the `pkcs11` feature)".into(),
            })
    }

    fn ensure_initialized(&self) -> Result<(), HsmError> {
        if self.session.read().is_some() {
            Ok(())
        } else {
            Err(HsmError::NotInitialized(TAG))
        }
    }

    /// Run one token call on the blocking pool.
    async fn run<T, F>(&self, operation: Operation, key_id: Option<&str>, call: F) -> Result<T, HsmError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TokenBackend) -> Result<T, ProviderFault> + Send + 'static,
    {
        let backend = Arc::clone(self.backend()?);
        tokio::task::spawn_blocking(move || call(backend.as_ref()))
            .await
            .map_err(|e| HsmError::Connection {
                provider: TAG,
                message: format!("token worker failed: {e}"),
            })?
            .map_err(|fault| fault.into_error(TAG, operation, key_id))
    }
}

#[cfg(feature = "pkcs11")]
fn native_backend(config: &Pkcs11Config) -> Option<Arc<dyn TokenBackend>> {
    Some(Arc::new(CryptokiBackend::new(config.clone())))
}

#[cfg(not(feature = "pkcs11"))]
fn native_backend(_config: &Pkcs11Config) -> Option<Arc<dyn TokenBackend>> {
    None
}

#[async_trait]
impl HsmProvider for Pkcs11Provider {
    fn provider(&self) -> ProviderTag {
        TAG
    }

    fn native_algorithm(&self, algorithm: SigningAlgorithm) -> &'static str {
        TokenMechanism::for_algorithm(algorithm).name()
    }

    async fn initialize(&self) -> Result<(), HsmError> {
        let token = self
            .run(Operation::Initialize, None, |backend| backend.open())
            .await?;
        info!(
            provider = %TAG,
            library = %self.config.library_path.display(),
            slot = token.slot_id,
            token = %token.label,
            "HSM provider initialized"
        );
        *self.session.write() = Some(token);
        Ok(())
    }

    async fn sign(&self, request: &HsmSigningRequest) -> Result<HsmSigningResult, HsmError> {
        self.ensure_initialized()?;
        check_signing_request(TAG, request)?;
        let label = request.key_reference.key_id.clone();
        let mechanism = TokenMechanism::for_algorithm(request.algorithm);
        let digest = request.digest.clone();

        let raw = {
            let label = label.clone();
            self.run(Operation::Sign, Some(&request.key_reference.key_id), move |backend| {
                backend.sign(&label, mechanism, &digest)
            })
            .await?
        };
        let signature = match mechanism {
            TokenMechanism::Ecdsa(_) => {
                ecdsa_raw_to_der(&raw).map_err(|e| HsmError::invalid_response(TAG, e.to_string()))?
            }
            TokenMechanism::RsaPkcs(_) | TokenMechanism::RsaPss(_) => raw,
        };

        info!(provider = %TAG, key_id = %label, mechanism = mechanism.name(), "Digest signed");
        Ok(HsmSigningResult {
            signature,
            algorithm: request.algorithm,
            key_id: label,
            provider: TAG,
            signed_at: Utc::now(),
        })
    }

    async fn get_public_key(&self, key: &HsmKeyReference) -> Result<PublicKey, HsmError> {
        self.ensure_initialized()?;
        let label = key.key_id.clone();
        let public = self
            .run(Operation::GetPublicKey, Some(&key.key_id), move |backend| {
                backend.public_key(&label)
            })
            .await?;
        match public {
            TokenPublicKey::Rsa { modulus, exponent } => public_key_from_rsa_components(&modulus, &exponent),
            TokenPublicKey::Ec { curve_bits, point } => public_key_from_ec_point(curve_bits, &point),
        }
        .map_err(|e| HsmError::invalid_response(TAG, e.to_string()))
    }

    async fn list_keys(&self) -> Result<Vec<HsmKeyInfo>, HsmError> {
        self.ensure_initialized()?;
        let keys = self
            .run(Operation::ListKeys, None, |backend| backend.list_private_keys())
            .await?;
        let total = keys.len();
        let signing: Vec<_> = keys
            .into_iter()
            .filter(|key| key.can_sign)
            .map(key_info)
            .collect();
        debug!(provider = %TAG, total, signing = signing.len(), "Listed token keys");
        Ok(signing)
    }

    async fn create_key(
        &self,
        key_type: KeyAlgorithm,
        key_size: u32,
        key_id: Option<&str>,
    ) -> Result<HsmKeyInfo, HsmError> {
        self.ensure_initialized()?;
        let spec = round_up_key_spec(TAG, PKCS11_KEY_SPECS, key_type, key_size)?;
        let label = key_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("docseal-{}", uuid::Uuid::new_v4()));
        let bits = spec.bits;

        let created = {
            let label = label.clone();
            self.run(Operation::CreateKey, None, move |backend| {
                backend.generate_key_pair(&label, key_type, bits)
            })
            .await?
        };
        if created.algorithm != key_type || created.bits < key_size {
            return Err(HsmError::invalid_response(
                TAG,
                format!("token generated {}-{} for {label}", created.algorithm, created.bits),
            ));
        }

        info!(provider = %TAG, key_id = %label, key_spec = spec.native, requested_bits = key_size, "Signing key created");
        Ok(key_info(created))
    }

    async fn delete_key(&self, key: &HsmKeyReference) -> Result<KeyDeletionStatus, HsmError> {
        self.ensure_initialized()?;
        let label = key.key_id.clone();
        self.run(Operation::DeleteKey, Some(&key.key_id), move |backend| {
            backend.destroy_key_pair(&label)
        })
        .await?;

        warn!(provider = %TAG, key_id = %key.key_id, "Key pair destruction requested");
        Ok(KeyDeletionStatus {
            key_id: key.key_id.clone(),
            state: DeletionState::DestroyRequested,
            effective_at: None,
        })
    }

    async fn test_connection(&self) -> bool {
        if self.ensure_initialized().is_err() {
            return false;
        }
        match self.run(Operation::Probe, None, |backend| backend.probe()).await {
            Ok(()) => true,
            Err(e) => {
                debug!(provider = %TAG, error = %e, "Token probe failed");
                false
            }
        }
    }
}

// =============================================================================
// Native backend
// =============================================================================

#[cfg(feature = "pkcs11")]
pub use native::CryptokiBackend;

#[cfg(feature = "pkcs11")]
mod native {
    use super::*;
    use crate::domain::errors::FaultKind;
    use cryptoki::context::{CInitializeArgs, Pkcs11};
    use cryptoki::error::{Error as CryptokiError, RvError};
    use cryptoki::mechanism::rsa::{PkcsMgfType, PkcsPssParams};
    use cryptoki::mechanism::{Mechanism, MechanismType};
    use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle};
    use cryptoki::session::{Session, UserType};
    use cryptoki::types::{AuthPin, Ulong};
    use der::asn1::{ObjectIdentifier, OctetString};
    use der::{Decode, Encode};
    use parking_lot::Mutex;
    use shared_types::{oids, HashAlgorithm};

    fn fault(context: &str, error: CryptokiError) -> ProviderFault {
        let kind = match &error {
            CryptokiError::Pkcs11(rv, _) => match rv {
                RvError::PinIncorrect | RvError::PinExpired | RvError::PinLocked | RvError::UserNotLoggedIn => {
                    FaultKind::Unauthenticated
                }
                RvError::DeviceError
                | RvError::DeviceRemoved
                | RvError::TokenNotPresent
                | RvError::SessionClosed
                | RvError::SessionHandleInvalid => FaultKind::Unavailable,
                _ => FaultKind::Rejected,
            },
            CryptokiError::LibraryLoading(_) => FaultKind::DependencyMissing,
            _ => FaultKind::Rejected,
        };
        ProviderFault::new(kind, "", format!("{context}: {error}"))
    }

    struct OpenSession {
        // keeps the module loaded for the session's lifetime
        _context: Pkcs11,
        session: Session,
    }

    /// `cryptoki`-backed token session, serialized behind one lock.
    pub struct CryptokiBackend {
        config: Pkcs11Config,
        open: Mutex<Option<OpenSession>>,
    }

    impl CryptokiBackend {
        pub fn new(config: Pkcs11Config) -> Self {
            Self {
                config,
                open: Mutex::new(None),
            }
        }

        fn with_session<T>(&self, call: impl FnOnce(&Session) -> Result<T, ProviderFault>) -> Result<T, ProviderFault> {
            let guard = self.open.lock();
            let open = guard
                .as_ref()
                .ok_or_else(|| ProviderFault::new(FaultKind::Unavailable, "", "session not open"))?;
            call(&open.session)
        }

        fn find_one(session: &Session, template: &[Attribute], what: &str) -> Result<ObjectHandle, ProviderFault> {
            session
                .find_objects(template)
                .map_err(|e| fault("find objects", e))?
                .into_iter()
                .next()
                .ok_or_else(|| ProviderFault::new(FaultKind::NotFound, "", format!("{what} not found")))
        }

        fn private_key(session: &Session, label: &str) -> Result<ObjectHandle, ProviderFault> {
            Self::find_one(
                session,
                &[
                    Attribute::Class(ObjectClass::PRIVATE_KEY),
                    Attribute::Label(label.as_bytes().to_vec()),
                ],
                &format!("private key {label}"),
            )
        }

        fn public_key_handle(session: &Session, label: &str) -> Result<ObjectHandle, ProviderFault> {
            Self::find_one(
                session,
                &[
                    Attribute::Class(ObjectClass::PUBLIC_KEY),
                    Attribute::Label(label.as_bytes().to_vec()),
                ],
                &format!("public key {label}"),
            )
        }

        fn describe(session: &Session, handle: ObjectHandle) -> Result<Option<TokenKey>, ProviderFault> {
            let attributes = session
                .get_attributes(
                    handle,
                    &[
                        AttributeType::Label,
                        AttributeType::Id,
                        AttributeType::KeyType,
                        AttributeType::Sign,
                        AttributeType::Decrypt,
                        AttributeType::EcParams,
                    ],
                )
                .map_err(|e| fault("read key attributes", e))?;

            let mut label = String::new();
            let mut id = Vec::new();
            let mut key_type = None;
            let mut can_sign = false;
            let mut can_decrypt = false;
            let mut ec_params = None;
            for attribute in attributes {
                match attribute {
                    Attribute::Label(value) => label = String::from_utf8_lossy(&value).into_owned(),
                    Attribute::Id(value) => id = value,
                    Attribute::KeyType(value) => key_type = Some(value),
                    Attribute::Sign(value) => can_sign = value,
                    Attribute::Decrypt(value) => can_decrypt = value,
                    Attribute::EcParams(value) => ec_params = Some(value),
                    _ => {}
                }
            }

            let (algorithm, bits) = match key_type {
                Some(KeyType::RSA) => {
                    let public = Self::public_key_handle(session, &label)?;
                    let modulus = Self::rsa_components(session, public)?.0;
                    (KeyAlgorithm::Rsa, modulus_bits(&modulus))
                }
                Some(KeyType::EC) => match ec_params.as_deref().and_then(curve_from_params) {
                    Some(bits) => (KeyAlgorithm::Ec, bits),
                    None => return Ok(None),
                },
                _ => return Ok(None),
            };
            Ok(Some(TokenKey {
                label,
                id,
                algorithm,
                bits,
                can_sign,
                can_decrypt,
            }))
        }

        fn rsa_components(session: &Session, public: ObjectHandle) -> Result<(Vec<u8>, Vec<u8>), ProviderFault> {
            let attributes = session
                .get_attributes(public, &[AttributeType::Modulus, AttributeType::PublicExponent])
                .map_err(|e| fault("read RSA public key", e))?;
            let mut modulus = None;
            let mut exponent = None;
            for attribute in attributes {
                match attribute {
                    Attribute::Modulus(value) => modulus = Some(value),
                    Attribute::PublicExponent(value) => exponent = Some(value),
                    _ => {}
                }
            }
            match (modulus, exponent) {
                (Some(modulus), Some(exponent)) => Ok((modulus, exponent)),
                _ => Err(ProviderFault::malformed("RSA public key without modulus or exponent")),
            }
        }
    }

    fn modulus_bits(modulus: &[u8]) -> u32 {
        let significant: Vec<_> = modulus.iter().skip_while(|b| **b == 0).collect();
        match significant.first() {
            Some(first) => significant.len() as u32 * 8 - first.leading_zeros(),
            None => 0,
        }
    }

    fn curve_from_params(params: &[u8]) -> Option<u32> {
        ObjectIdentifier::from_der(params)
            .ok()
            .and_then(|oid| oids::curve_bits(&oid))
    }

    /// `CKA_EC_POINT` is normally a DER OCTET STRING around the point; some
    /// modules return the bare point.
    fn unwrap_ec_point(value: Vec<u8>) -> Vec<u8> {
        match OctetString::from_der(&value) {
            Ok(octets) if octets.as_bytes().first() == Some(&0x04) => octets.as_bytes().to_vec(),
            _ => value,
        }
    }

    fn mechanism_type(hash: HashAlgorithm) -> (MechanismType, PkcsMgfType) {
        match hash {
            HashAlgorithm::Sha256 => (MechanismType::SHA256, PkcsMgfType::MGF1_SHA256),
            HashAlgorithm::Sha384 => (MechanismType::SHA384, PkcsMgfType::MGF1_SHA384),
            HashAlgorithm::Sha512 => (MechanismType::SHA512, PkcsMgfType::MGF1_SHA512),
        }
    }

    impl TokenBackend for CryptokiBackend {
        fn open(&self) -> Result<TokenInfo, ProviderFault> {
            let path = &self.config.library_path;
            if !path.exists() {
                return Err(ProviderFault::dependency_missing(format!(
                    "PKCS#11 module {} not found",
                    path.display()
                )));
            }
            let context = Pkcs11::new(path).map_err(|e| {
                ProviderFault::dependency_missing(format!("load {}: {e}", path.display()))
            })?;
            context
                .initialize(CInitializeArgs::OsThreads)
                .map_err(|e| fault("C_Initialize", e))?;

            let slots = context
                .get_slots_with_token()
                .map_err(|e| fault("list slots", e))?;
            let slot = match self.config.slot {
                Some(id) => slots.into_iter().find(|slot| slot.id() == id),
                None => slots.into_iter().next(),
            }
            .ok_or_else(|| ProviderFault::new(FaultKind::Unavailable, "", "no slot with a token"))?;

            let token = context.get_token_info(slot).map_err(|e| fault("token info", e))?;
            let session = context
                .open_rw_session(slot)
                .map_err(|e| fault("open session", e))?;
            session
                .login(UserType::User, Some(&AuthPin::new(self.config.pin.clone())))
                .map_err(|e| fault("login", e))?;

            let info = TokenInfo {
                slot_id: slot.id(),
                label: token.label().trim().to_string(),
                manufacturer: token.manufacturer_id().trim().to_string(),
            };
            *self.open.lock() = Some(OpenSession {
                _context: context,
                session,
            });
            Ok(info)
        }

        fn sign(&self, label: &str, mechanism: TokenMechanism, digest: &[u8]) -> Result<Vec<u8>, ProviderFault> {
            self.with_session(|session| {
                let key = Self::private_key(session, label)?;
                let (native, input) = match mechanism {
                    TokenMechanism::RsaPkcs(hash) => {
                        let mut info = hash.digest_info_prefix().to_vec();
                        info.extend_from_slice(digest);
                        (Mechanism::RsaPkcs, info)
                    }
                    TokenMechanism::RsaPss(hash) => {
                        let (hash_alg, mgf) = mechanism_type(hash);
                        let params = PkcsPssParams {
                            hash_alg,
                            mgf,
                            s_len: Ulong::from(hash.output_len() as u64),
                        };
                        (Mechanism::RsaPkcsPss(params), digest.to_vec())
                    }
                    TokenMechanism::Ecdsa(_) => (Mechanism::Ecdsa, digest.to_vec()),
                };
                session
                    .sign(&native, key, &input)
                    .map_err(|e| fault(mechanism.name(), e))
            })
        }

        fn public_key(&self, label: &str) -> Result<TokenPublicKey, ProviderFault> {
            self.with_session(|session| {
                let handle = Self::public_key_handle(session, label)?;
                let attributes = session
                    .get_attributes(handle, &[AttributeType::KeyType, AttributeType::EcParams, AttributeType::EcPoint])
                    .map_err(|e| fault("read public key", e))?;
                let mut key_type = None;
                let mut params = None;
                let mut point = None;
                for attribute in attributes {
                    match attribute {
                        Attribute::KeyType(value) => key_type = Some(value),
                        Attribute::EcParams(value) => params = Some(value),
                        Attribute::EcPoint(value) => point = Some(value),
                        _ => {}
                    }
                }
                match key_type {
                    Some(KeyType::RSA) => {
                        let (modulus, exponent) = Self::rsa_components(session, handle)?;
                        Ok(TokenPublicKey::Rsa { modulus, exponent })
                    }
                    Some(KeyType::EC) => {
                        let curve_bits = params
                            .as_deref()
                            .and_then(curve_from_params)
                            .ok_or_else(|| ProviderFault::malformed("EC key on an unsupported curve"))?;
                        let point = point.ok_or_else(|| ProviderFault::malformed("EC key without CKA_EC_POINT"))?;
                        Ok(TokenPublicKey::Ec {
                            curve_bits,
                            point: unwrap_ec_point(point),
                        })
                    }
                    _ => Err(ProviderFault::malformed(format!("{label} is not an RSA or EC key"))),
                }
            })
        }

        fn list_private_keys(&self) -> Result<Vec<TokenKey>, ProviderFault> {
            self.with_session(|session| {
                let handles = session
                    .find_objects(&[Attribute::Class(ObjectClass::PRIVATE_KEY)])
                    .map_err(|e| fault("find private keys", e))?;
                let mut keys = Vec::with_capacity(handles.len());
                for handle in handles {
                    if let Some(key) = Self::describe(session, handle)? {
                        keys.push(key);
                    }
                }
                Ok(keys)
            })
        }

        fn generate_key_pair(&self, label: &str, algorithm: KeyAlgorithm, bits: u32) -> Result<TokenKey, ProviderFault> {
            self.with_session(|session| {
                if Self::private_key(session, label).is_ok() {
                    return Err(ProviderFault::new(
                        FaultKind::Rejected,
                        "",
                        format!("a key labelled {label} already exists"),
                    ));
                }
                let id = uuid::Uuid::new_v4().as_bytes().to_vec();
                let label_bytes = label.as_bytes().to_vec();
                let common = |extra: Vec<Attribute>| {
                    let mut template = vec![
                        Attribute::Label(label_bytes.clone()),
                        Attribute::Id(id.clone()),
                        Attribute::Token(true),
                    ];
                    template.extend(extra);
                    template
                };

                let (mechanism, public_template) = match algorithm {
                    KeyAlgorithm::Rsa => (
                        Mechanism::RsaPkcsKeyPairGen,
                        common(vec![
                            Attribute::ModulusBits(Ulong::from(u64::from(bits))),
                            Attribute::PublicExponent(vec![0x01, 0x00, 0x01]),
                            Attribute::Verify(true),
                        ]),
                    ),
                    KeyAlgorithm::Ec => {
                        let curve = oids::curve_oid(bits).ok_or_else(|| {
                            ProviderFault::new(FaultKind::Rejected, "", format!("no curve of {bits} bits"))
                        })?;
                        let params = curve
                            .to_der()
                            .map_err(|e| ProviderFault::malformed(e.to_string()))?;
                        (
                            Mechanism::EccKeyPairGen,
                            common(vec![Attribute::EcParams(params), Attribute::Verify(true)]),
                        )
                    }
                };
                let private_template = common(vec![
                    Attribute::Private(true),
                    Attribute::Sensitive(true),
                    Attribute::Extractable(false),
                    Attribute::Sign(true),
                ]);

                let (_, private) = session
                    .generate_key_pair(&mechanism, &public_template, &private_template)
                    .map_err(|e| fault("generate key pair", e))?;
                Self::describe(session, private)?
                    .ok_or_else(|| ProviderFault::malformed("generated key has an unknown type"))
            })
        }

        fn destroy_key_pair(&self, label: &str) -> Result<(), ProviderFault> {
            self.with_session(|session| {
                let private = Self::private_key(session, label)?;
                session
                    .destroy_object(private)
                    .map_err(|e| fault("destroy private key", e))?;
                if let Ok(public) = Self::public_key_handle(session, label) {
                    session
                        .destroy_object(public)
                        .map_err(|e| fault("destroy public key", e))?;
                }
                Ok(())
            })
        }

        fn probe(&self) -> Result<(), ProviderFault> {
            self.with_session(|session| {
                session
                    .get_session_info()
                    .map(|_| ())
                    .map_err(|e| fault("session info", e))
            })
        }
    }

}
