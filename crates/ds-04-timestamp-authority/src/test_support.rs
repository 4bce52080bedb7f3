//! # Scripted TSA
//!
//! An in-process [`TsaTransport`] that answers like a real RFC 3161 server,
//! signing tokens with a P-256 test certificate. Behavior is scripted per
//! URL so failover paths can be exercised.

#![allow(missing_docs)]

use crate::domain::asn1::{PkiStatusInfo, TimeStampReq, TimeStampResp, TstInfo};
use crate::domain::codec::imprint_asn1;
use crate::domain::entities::TsaConfig;
use crate::domain::errors::TsaError;
use crate::ports::outbound::TsaTransport;
use async_trait::async_trait;
use chrono::Utc;
use cms::content_info::ContentInfo;
use der::asn1::{GeneralizedTime, ObjectIdentifier, Uint};
use der::{Any, Decode, Encode};
use parking_lot::Mutex;
use shared_crypto::cms::{self as cms_codec, SignedDataParts};
use shared_crypto::test_support::{new_p256_leaf, SignerFixture};
use shared_crypto::digest;
use shared_types::{oids, HashAlgorithm, SigningAlgorithm, X509Certificate};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const TEST_POLICY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.59999.1.1");

/// What the fake TSA does for one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsaBehavior {
    Grant,
    GrantWithMods,
    /// Answer with this PKI status and no token.
    Reject(u32),
    Unreachable,
    /// A body that is not a `TimeStampResp`.
    Garbage,
    /// Granted, but the nonce differs from the request.
    WrongNonce,
    /// Granted, but over a different imprint.
    WrongImprint,
    /// Never answers.
    Hang,
}

pub struct FakeTsa {
    signer: SignerFixture,
    behaviors: Mutex<HashMap<String, TsaBehavior>>,
    calls: Mutex<Vec<String>>,
    serial: AtomicU64,
}

impl Default for FakeTsa {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTsa {
    /// Every URL grants unless scripted otherwise.
    pub fn new() -> Self {
        Self {
            signer: new_p256_leaf("CN=DocSeal Test TSA,O=DocSeal Test"),
            behaviors: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            serial: AtomicU64::new(1),
        }
    }

    pub fn with_behavior(self, url: &str, behavior: TsaBehavior) -> Self {
        self.behaviors.lock().insert(url.to_string(), behavior);
        self
    }

    /// URLs contacted, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|u| *u == url).count()
    }

    pub fn tsa_certificate(&self) -> &X509Certificate {
        &self.signer.certificate
    }

    /// A DER `TimeStampToken` over `digest`.
    pub fn issue_token(
        &self,
        hash: HashAlgorithm,
        message_digest: &[u8],
        nonce: Option<&[u8]>,
    ) -> Result<Vec<u8>, TsaError> {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TsaError::Encoding(e.to_string()))?;
        let gen_time = GeneralizedTime::from_unix_duration(Duration::from_secs(now.as_secs()))?;

        let tst_info = TstInfo {
            version: 1,
            policy: TEST_POLICY,
            message_imprint: imprint_asn1(hash, message_digest)?,
            serial_number: Uint::new(&serial.to_be_bytes())?,
            gen_time: Any::encode_from(&gen_time)?,
            accuracy: None,
            ordering: false,
            nonce: nonce.map(Uint::new).transpose()?,
            tsa: None,
            extensions: None,
        };
        let tst_der = tst_info.to_der()?;

        let algorithm = SigningAlgorithm::EcdsaSha256;
        let attrs = cms_codec::build_signed_attributes(
            oids::ID_CT_TST_INFO,
            &digest(HashAlgorithm::Sha256, &tst_der),
            Utc::now(),
        )?;
        let to_sign = cms_codec::signed_attributes_digest(&attrs, HashAlgorithm::Sha256)?;
        let signature = self.signer.key.sign_digest(&to_sign, algorithm)?;

        Ok(cms_codec::encode_signed_data(SignedDataParts {
            content_type: oids::ID_CT_TST_INFO,
            content: Some(&tst_der),
            signer: &self.signer.certificate,
            extra_certificates: &[],
            algorithm,
            signed_attributes: attrs,
            signature: &signature,
            unsigned_attributes: None,
        })?)
    }

    fn respond(&self, request_der: &[u8], behavior: TsaBehavior) -> Result<Vec<u8>, TsaError> {
        let request = TimeStampReq::from_der(request_der)?;
        let hash = HashAlgorithm::from_oid(&request.message_imprint.hash_algorithm.oid)
            .ok_or_else(|| TsaError::Encoding("unsupported imprint hash".into()))?;
        let mut imprint = request.message_imprint.hashed_message.as_bytes().to_vec();
        let mut nonce = request.nonce.as_ref().map(|n| n.as_bytes().to_vec());

        let status = match behavior {
            TsaBehavior::Reject(code) => {
                return Ok(TimeStampResp {
                    status: PkiStatusInfo {
                        status: code,
                        status_string: Some(vec!["request rejected by policy".into()]),
                        fail_info: None,
                    },
                    time_stamp_token: None,
                }
                .to_der()?);
            }
            TsaBehavior::GrantWithMods => 1,
            TsaBehavior::WrongNonce => {
                nonce = Some(vec![0x7F, 0x01, 0x02, 0x03]);
                0
            }
            TsaBehavior::WrongImprint => {
                imprint.iter_mut().for_each(|b| *b ^= 0xFF);
                0
            }
            _ => 0,
        };

        let token = self.issue_token(hash, &imprint, nonce.as_deref())?;
        Ok(TimeStampResp {
            status: PkiStatusInfo {
                status,
                status_string: None,
                fail_info: None,
            },
            time_stamp_token: Some(ContentInfo::from_der(&token)?),
        }
        .to_der()?)
    }
}

#[async_trait]
impl TsaTransport for FakeTsa {
    async fn send(&self, config: &TsaConfig, request_der: &[u8]) -> Result<Vec<u8>, TsaError> {
        self.calls.lock().push(config.url.clone());
        let behavior = self
            .behaviors
            .lock()
            .get(&config.url)
            .copied()
            .unwrap_or(TsaBehavior::Grant);
        match behavior {
            TsaBehavior::Unreachable => Err(TsaError::connection(&config.url, "connection refused")),
            TsaBehavior::Garbage => Ok(b"<html>502 Bad Gateway</html>".to_vec()),
            TsaBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TsaError::connection(&config.url, "hung"))
            }
            other => self.respond(request_der, other),
        }
    }
}
