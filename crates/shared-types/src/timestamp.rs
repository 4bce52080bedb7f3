//! # Timestamps
//!
//! RFC 3161 timestamp values. A `Timestamp` is only ever produced from a
//! granted TSA response and is never modified afterwards.

use crate::algorithms::HashAlgorithm;
use crate::certificate::X509Certificate;
use chrono::{DateTime, Utc};

/// Hash algorithm and digest of the timestamped data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageImprint {
    pub hash_algorithm: HashAlgorithm,
    pub digest: Vec<u8>,
}

/// A granted RFC 3161 timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamp {
    /// TSA name from the token, or the signer subject when absent.
    pub tsa_name: String,
    /// Endpoint that issued the token, when known.
    pub tsa_url: Option<String>,
    pub issued_at: DateTime<Utc>,
    /// Big-endian serial number bytes.
    pub serial_number: Vec<u8>,
    pub policy_oid: String,
    pub nonce: Option<Vec<u8>>,
    pub message_imprint: MessageImprint,
    pub tsa_certificate: Option<X509Certificate>,
    /// Signature bytes of the token's SignerInfo.
    pub signature: Vec<u8>,
    /// DER `TimeStampToken` (a CMS `ContentInfo`).
    pub token_der: Vec<u8>,
}

impl Timestamp {
    pub fn serial_hex(&self) -> String {
        hex::encode_upper(&self.serial_number)
    }
}
