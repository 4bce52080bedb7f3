//! # Certificate Chain Validation
//!
//! Chains are ordered leaf first. Checks run in a fixed order:
//!
//! 1. the chain is non-empty
//! 2. the leaf validity window contains the validation time
//! 3. each link: issuer name equals the next subject, and the next key
//!    verifies the signature
//! 4. the last certificate is, or is issued by, a trust anchor
//! 5. revocation (never checked, always reported)
//!
//! With no trust anchors at all, step 4 degrades to a warning.

use chrono::{DateTime, Utc};
use shared_crypto::verify_certificate_signature;
use shared_types::{CertificateError, CertificateValidationResult, X509Certificate};
use tracing::debug;

/// Longest chain that will be built or accepted.
pub const MAX_CHAIN_LENGTH: usize = 10;

pub const REVOCATION_NOT_CHECKED: &str = "revocation status not checked";
pub const NO_TRUST_ANCHORS: &str = "no trust anchors supplied; chain built but trust unverified";

fn issued_by(certificate: &X509Certificate, issuer: &X509Certificate) -> bool {
    certificate.as_x509().tbs_certificate.issuer == issuer.as_x509().tbs_certificate.subject
}

/// Order `leaf` and an unordered pool of certificates into a leaf-first
/// chain by following issuer names.
///
/// Stops at a self-issued certificate or when no issuer is in the pool.
/// Candidates whose key verifies the link are preferred over a bare name
/// match.
pub fn build_chain(
    leaf: &X509Certificate,
    pool: &[X509Certificate],
) -> Result<Vec<X509Certificate>, CertificateError> {
    let mut chain = vec![leaf.clone()];
    loop {
        let Some(current) = chain.last() else { break };
        if current.is_self_issued() {
            break;
        }
        let candidates: Vec<&X509Certificate> = pool
            .iter()
            .filter(|c| issued_by(current, c) && !chain.contains(c))
            .collect();
        let next = candidates
            .iter()
            .find(|c| verify_certificate_signature(current, c).is_ok())
            .or_else(|| candidates.first())
            .map(|c| (*c).clone());
        match next {
            Some(issuer) => {
                if chain.len() >= MAX_CHAIN_LENGTH {
                    return Err(CertificateError::ChainTooLong {
                        limit: MAX_CHAIN_LENGTH,
                    });
                }
                chain.push(issuer);
            }
            None => break,
        }
    }
    Ok(chain)
}

/// Validate a leaf-first chain at `at`.
pub fn validate_certificate_chain(
    certificates: &[X509Certificate],
    trust_anchors: &[X509Certificate],
    at: DateTime<Utc>,
) -> CertificateValidationResult {
    let mut result = CertificateValidationResult {
        chain_length: certificates.len(),
        ..Default::default()
    };

    // 1.
    let Some(leaf) = certificates.first() else {
        result.error("no certificates provided");
        return result;
    };
    if certificates.len() > MAX_CHAIN_LENGTH {
        result.error(format!(
            "chain of {} certificates exceeds the limit of {MAX_CHAIN_LENGTH}",
            certificates.len()
        ));
        return result;
    }

    // 2.
    result.not_expired = leaf.is_valid_at(at);
    if !result.not_expired {
        result.error(format!(
            "certificate '{}' is outside its validity period ({} to {})",
            leaf.subject, leaf.not_before, leaf.not_after
        ));
    }

    // 3.
    let mut links_ok = true;
    for (index, pair) in certificates.windows(2).enumerate() {
        let (cert, issuer) = (&pair[0], &pair[1]);
        if !issued_by(cert, issuer) {
            links_ok = false;
            result.error(format!(
                "certificate {index} issuer '{}' does not match certificate {} subject '{}'",
                cert.issuer,
                index + 1,
                issuer.subject
            ));
            continue;
        }
        if let Err(e) = verify_certificate_signature(cert, issuer) {
            links_ok = false;
            result.error(format!(
                "certificate {index} signature does not verify under certificate {}: {e}",
                index + 1
            ));
        }
        if !issuer.is_valid_at(at) {
            links_ok = false;
            result.error(format!(
                "issuing certificate '{}' is outside its validity period",
                issuer.subject
            ));
        }
    }
    result.chain_valid = links_ok;

    // 4.
    if trust_anchors.is_empty() {
        result.warn(NO_TRUST_ANCHORS);
    } else {
        let last = &certificates[certificates.len() - 1];
        result.trusted_root = trust_anchors.iter().any(|anchor| {
            anchor == last
                || (issued_by(last, anchor) && verify_certificate_signature(last, anchor).is_ok())
        });
        if !result.trusted_root {
            result.warn(format!(
                "chain ending at '{}' does not lead to a trusted anchor; trust unverified",
                last.subject
            ));
        }
    }

    // 5.
    result.not_revoked = None;
    result.warn(REVOCATION_NOT_CHECKED);

    if !leaf.allows_signing() {
        result.warn(format!(
            "certificate '{}' key usage does not include digitalSignature or nonRepudiation",
            leaf.subject
        ));
    }

    result.is_valid = result.errors.is_empty();
    debug!(
        chain_length = result.chain_length,
        valid = result.is_valid,
        trusted = result.trusted_root,
        "Certificate chain validated"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::test_support::{new_p256_leaf, p256_leaf, test_ca, TestCa};

    #[test]
    fn test_empty_chain_is_invalid() {
        let result = validate_certificate_chain(&[], &[], Utc::now());
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["no certificates provided".to_string()]);
    }

    #[test]
    fn test_valid_chain_with_anchor() {
        let leaf = p256_leaf();
        let chain = vec![leaf.certificate.clone(), leaf.issuer.clone()];
        let result = validate_certificate_chain(&chain, &[leaf.issuer.clone()], Utc::now());

        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.chain_valid && result.not_expired && result.trusted_root);
        assert_eq!(result.not_revoked, None);
        assert!(result.warnings.iter().any(|w| w == REVOCATION_NOT_CHECKED));
    }

    #[test]
    fn test_leaf_issued_directly_by_anchor() {
        let leaf = p256_leaf();
        let result =
            validate_certificate_chain(&[leaf.certificate.clone()], &[leaf.issuer.clone()], Utc::now());
        assert!(result.trusted_root);
        assert!(result.is_valid);
    }

    #[test]
    fn test_no_anchor_is_warning_not_error() {
        let leaf = p256_leaf();
        let chain = vec![leaf.certificate.clone(), leaf.issuer.clone()];
        let result = validate_certificate_chain(&chain, &[], Utc::now());

        assert!(result.chain_valid);
        assert!(!result.trusted_root);
        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| w == NO_TRUST_ANCHORS));
    }

    #[test]
    fn test_untrusted_root_with_anchors_supplied() {
        let leaf = p256_leaf();
        let other_root = TestCa::new_root("CN=Other Root");
        let chain = vec![leaf.certificate.clone(), leaf.issuer.clone()];
        let result = validate_certificate_chain(&chain, &[other_root.certificate], Utc::now());
        assert!(result.chain_valid);
        assert!(!result.trusted_root);
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.errors.is_empty());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("does not lead to a trusted anchor")));
    }

    #[test]
    fn test_expired_leaf() {
        let fixture = new_p256_leaf("CN=Expired Holder");
        let expired = test_ca().issue_expired_leaf("CN=Expired Holder", &fixture.certificate.public_key);
        let chain = vec![expired, fixture.issuer.clone()];
        let result = validate_certificate_chain(&chain, &[fixture.issuer.clone()], Utc::now());

        assert!(!result.not_expired);
        assert!(result.chain_valid);
        assert!(!result.is_valid);
    }

    #[test]
    fn test_broken_link_names_index() {
        let leaf = p256_leaf();
        let stranger = TestCa::new_root("CN=Stranger");
        let chain = vec![leaf.certificate.clone(), stranger.certificate.clone()];
        let result = validate_certificate_chain(&chain, &[], Utc::now());

        assert!(!result.chain_valid);
        assert!(result.errors[0].starts_with("certificate 0 issuer"));
    }

    #[test]
    fn test_forged_link_signature_fails() {
        // same subject name as the real root, different key
        let impostor = TestCa::new_root("CN=DocSeal Test Root,O=DocSeal Test");
        let leaf = p256_leaf();
        let chain = vec![leaf.certificate.clone(), impostor.certificate.clone()];
        let result = validate_certificate_chain(&chain, &[], Utc::now());
        assert!(!result.chain_valid);
        assert!(result.errors[0].contains("signature does not verify"));
    }

    #[test]
    fn test_missing_key_usage_is_warning() {
        let fixture = new_p256_leaf("CN=No Usage");
        let bare = test_ca().issue_without_key_usage("CN=No Usage", &fixture.certificate.public_key);
        let result = validate_certificate_chain(&[bare], &[fixture.issuer.clone()], Utc::now());
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.warnings.iter().any(|w| w.contains("key usage")));
    }

    #[test]
    fn test_build_chain_orders_pool() {
        let root = test_ca();
        let sub = root.issue_sub_ca("CN=DocSeal Issuing CA,O=DocSeal Test");
        let fixture = new_p256_leaf("CN=Dave");
        let leaf = sub.issue_leaf("CN=Dave", &fixture.certificate.public_key);

        let pool = vec![root.certificate.clone(), sub.certificate.clone()];
        let chain = build_chain(&leaf, &pool).unwrap();
        assert_eq!(chain, vec![leaf.clone(), sub.certificate.clone(), root.certificate.clone()]);

        let result = validate_certificate_chain(&chain, &[root.certificate.clone()], Utc::now());
        assert!(result.is_valid, "{:?}", result.errors);
        assert_eq!(result.chain_length, 3);
    }

    #[test]
    fn test_build_chain_without_issuer_returns_leaf() {
        let leaf = p256_leaf();
        let chain = build_chain(&leaf.certificate, &[]).unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_build_chain_length_limit() {
        let mut ca = test_ca().issue_sub_ca("CN=Level 1");
        let mut pool = vec![test_ca().certificate.clone(), ca.certificate.clone()];
        for level in 2..=MAX_CHAIN_LENGTH {
            ca = ca.issue_sub_ca(&format!("CN=Level {level}"));
            pool.push(ca.certificate.clone());
        }
        let fixture = new_p256_leaf("CN=Deep Leaf");
        let leaf = ca.issue_leaf("CN=Deep Leaf", &fixture.certificate.public_key);

        let err = build_chain(&leaf, &pool).unwrap_err();
        assert_eq!(err, CertificateError::ChainTooLong { limit: MAX_CHAIN_LENGTH });
    }
}
