//! Verification of one RRSIG over one RRset under a DNSKEY set
//! (RFC 4035 section 5.3). An RRset is SECURE when at least one of its
//! signatures verifies under at least one zone key of the signer.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use ring::signature::{self, RsaPublicKeyComponents, UnparsedPublicKey};
use tracing::{debug, trace};

use crate::dns::name::Name;
use crate::dns::rdata::RrsigData;
use crate::smessage::{SRRset, SecurityStatus};

use super::algorithm::Algorithm;
use super::canonical::{signed_data, signed_owner};
use super::key_tag::key_tag;

/// Why a single signature check failed. The verifier reports the last
/// failure when no signature in the set verifies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SigError {
    /// Signer name is not an ancestor of the owner or differs from the key
    /// owner.
    SignerMismatch,
    Expired,
    NotYetValid,
    /// RRSIG labels field exceeds the owner's label count.
    LabelCount,
    UnsupportedAlgorithm(u8),
    /// No key in the set matched the signature's key tag and algorithm.
    NoApplicableKey,
    CryptoFailure,
    Malformed,
    /// The per-response signature budget was exhausted.
    BudgetExceeded,
    /// The RRset carried no signatures at all.
    Unsigned,
}

impl fmt::Display for SigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignerMismatch => write!(f, "signer name does not match RRset owner"),
            Self::Expired => write!(f, "signature has expired"),
            Self::NotYetValid => write!(f, "signature is not yet valid"),
            Self::LabelCount => write!(f, "RRSIG labels exceed owner labels"),
            Self::UnsupportedAlgorithm(alg) => write!(f, "unsupported algorithm {}", alg),
            Self::NoApplicableKey => write!(f, "no DNSKEY matches key tag and algorithm"),
            Self::CryptoFailure => write!(f, "signature verification failed"),
            Self::Malformed => write!(f, "malformed signature or key"),
            Self::BudgetExceeded => write!(f, "signature validation budget exhausted"),
            Self::Unsigned => write!(f, "RRset has no signatures"),
        }
    }
}

/// Per-response cap on cryptographic verifications, a guard against
/// responses crafted to burn CPU.
#[derive(Debug)]
pub struct SigBudget {
    remaining: usize,
}

impl SigBudget {
    pub fn new(limit: usize) -> Self {
        SigBudget { remaining: limit }
    }

    fn consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn exhausted(&self) -> bool {
        self.remaining == 0
    }
}

/// RFC 1982 serial-number "greater than" for 32-bit timestamps.
fn serial_gt(a: u32, b: u32) -> bool {
    a != b && b.wrapping_sub(a) > 0x8000_0000
}

#[derive(Clone, Debug)]
pub struct SigVerifier {
    /// Symmetric allowance around the validity window, in seconds.
    clock_skew: u32,
    /// Fixed clock for tests; wall clock when unset.
    override_time: Option<u32>,
}

impl SigVerifier {
    pub fn new(clock_skew: u32) -> Self {
        SigVerifier {
            clock_skew,
            override_time: None,
        }
    }

    pub fn with_time(clock_skew: u32, now: u32) -> Self {
        SigVerifier {
            clock_skew,
            override_time: Some(now),
        }
    }

    fn now(&self) -> u32 {
        self.override_time.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as u32
        })
    }

    /// Verify `rrset` under the zone keys in `keys` (an SRRset of DNSKEYs
    /// owned by the signer zone). Stamps the verdict on the set and records
    /// wildcard synthesis when the proving signature shows it.
    pub fn verify_rrset(
        &self,
        rrset: &mut SRRset,
        keys: &SRRset,
        budget: &mut SigBudget,
    ) -> SecurityStatus {
        if rrset.sigs().is_empty() {
            rrset.set_bogus(&SigError::Unsigned.to_string());
            return SecurityStatus::Bogus;
        }

        let mut last_error = SigError::NoApplicableKey;
        for sig_record in rrset.sigs().to_vec() {
            let rrsig = match sig_record.rrsig() {
                Ok(rrsig) => rrsig,
                Err(_) => {
                    last_error = SigError::Malformed;
                    continue;
                }
            };

            match self.check_one(rrset, &rrsig, keys, budget) {
                Ok(wildcard_base) => {
                    if let Some(base) = wildcard_base {
                        trace!("rrset {} proved via wildcard at *.{}", rrset.name(), base);
                        rrset.set_wildcard_base(base);
                    }
                    rrset.set_security(SecurityStatus::Secure);
                    return SecurityStatus::Secure;
                }
                Err(error) => {
                    trace!(
                        "rrsig tag={} over {} {} rejected: {}",
                        rrsig.key_tag,
                        rrset.name(),
                        rrset.rtype(),
                        error
                    );
                    last_error = error;
                }
            }
        }

        rrset.set_bogus(&last_error.to_string());
        SecurityStatus::Bogus
    }

    /// All checks for a single signature, in order; the first failure wins.
    /// On success returns the closest encloser when the owner was wildcard
    /// synthesized.
    fn check_one(
        &self,
        rrset: &SRRset,
        rrsig: &RrsigData,
        keys: &SRRset,
        budget: &mut SigBudget,
    ) -> Result<Option<Name>, SigError> {
        let owner = rrset.name();

        // 1. The signer must be an ancestor of the owner and the owner of
        //    the key set we were handed.
        if !owner.is_subdomain_of(&rrsig.signer_name) || keys.name() != &rrsig.signer_name {
            return Err(SigError::SignerMismatch);
        }
        if rrsig.type_covered != rrset.rtype() {
            return Err(SigError::SignerMismatch);
        }

        // 2. Validity window, inclusive, with skew, in serial arithmetic.
        let now = self.now();
        let inception = rrsig.inception.wrapping_sub(self.clock_skew);
        let expiration = rrsig.expiration.wrapping_add(self.clock_skew);
        if serial_gt(inception, now) {
            return Err(SigError::NotYetValid);
        }
        if serial_gt(now, expiration) {
            return Err(SigError::Expired);
        }

        // 3. Labels field; fewer labels than the owner means wildcard
        //    synthesis, more is malformed.
        let owner_labels = owner.label_count() - usize::from(owner.is_wildcard());
        if usize::from(rrsig.labels) > owner_labels {
            return Err(SigError::LabelCount);
        }
        let (_, expanded) = signed_owner(owner, rrsig.labels);

        // 4. Algorithm support and key selection.
        let algorithm =
            Algorithm::from_u8(rrsig.algorithm).ok_or(SigError::UnsupportedAlgorithm(rrsig.algorithm))?;
        if !algorithm.is_supported() {
            return Err(SigError::UnsupportedAlgorithm(rrsig.algorithm));
        }

        let data = signed_data(rrset, rrsig).map_err(|_| SigError::Malformed)?;

        let mut tried_any = false;
        for key_record in keys.records() {
            let key = match key_record.dnskey() {
                Ok(key) => key,
                Err(_) => continue,
            };
            if key.algorithm != rrsig.algorithm
                || key_tag(&key) != rrsig.key_tag
                || !key.is_zone_key()
                || key.is_revoked()
            {
                continue;
            }

            tried_any = true;

            // 5. The cryptographic check, against the budget.
            if !budget.consume() {
                return Err(SigError::BudgetExceeded);
            }
            if crypto_verify(algorithm, &key.public_key, &data, &rrsig.signature).is_ok() {
                debug!(
                    "verified {} {} with {} key tag {}",
                    rrset.name(),
                    rrset.rtype(),
                    algorithm,
                    rrsig.key_tag
                );
                let base = if expanded {
                    let (wc, _) = signed_owner(owner, rrsig.labels);
                    Some(wc.parent())
                } else {
                    None
                };
                return Ok(base);
            }
        }

        if tried_any {
            Err(SigError::CryptoFailure)
        } else {
            Err(SigError::NoApplicableKey)
        }
    }
}

/// Raw cryptographic verification of a DNSSEC wire-format signature.
/// DNSKEY public keys need per-family massaging before ring accepts them.
pub fn crypto_verify(
    algorithm: Algorithm,
    public_key: &[u8],
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<(), SigError> {
    match algorithm {
        Algorithm::RsaSha1 | Algorithm::RsaSha1Nsec3Sha1 | Algorithm::RsaSha256 | Algorithm::RsaSha512 => {
            // RFC 3110 wire form: exponent length (1 or 3 octets),
            // exponent, modulus.
            let (prefix, exp_len) = match public_key.first() {
                Some(0) if public_key.len() >= 3 => (
                    3usize,
                    (usize::from(public_key[1]) << 8) | usize::from(public_key[2]),
                ),
                Some(&len) if len != 0 => (1usize, usize::from(len)),
                _ => return Err(SigError::Malformed),
            };
            if public_key.len() < prefix + exp_len {
                return Err(SigError::Malformed);
            }
            let (e, n) = public_key[prefix..].split_at(exp_len);

            #[allow(deprecated)]
            let alg = match algorithm {
                Algorithm::RsaSha1 | Algorithm::RsaSha1Nsec3Sha1 => {
                    &signature::RSA_PKCS1_1024_8192_SHA1_FOR_LEGACY_USE_ONLY
                }
                Algorithm::RsaSha256 => &signature::RSA_PKCS1_1024_8192_SHA256_FOR_LEGACY_USE_ONLY,
                _ => &signature::RSA_PKCS1_1024_8192_SHA512_FOR_LEGACY_USE_ONLY,
            };

            RsaPublicKeyComponents { n, e }
                .verify(alg, message, signature_bytes)
                .map_err(|_| SigError::CryptoFailure)
        }
        Algorithm::EcdsaP256Sha256 | Algorithm::EcdsaP384Sha384 => {
            // DNSKEY stores the bare x||y point; ring wants the SEC 1
            // uncompressed form with the 0x04 prefix.
            let mut prefixed = Vec::with_capacity(public_key.len() + 1);
            prefixed.push(0x04);
            prefixed.extend_from_slice(public_key);

            let alg = match algorithm {
                Algorithm::EcdsaP256Sha256 => &signature::ECDSA_P256_SHA256_FIXED,
                _ => &signature::ECDSA_P384_SHA384_FIXED,
            };

            UnparsedPublicKey::new(alg, &prefixed)
                .verify(message, signature_bytes)
                .map_err(|_| SigError::CryptoFailure)
        }
        Algorithm::Ed25519 => UnparsedPublicKey::new(&signature::ED25519, public_key)
            .verify(message, signature_bytes)
            .map_err(|_| SigError::CryptoFailure),
        _ => Err(SigError::UnsupportedAlgorithm(algorithm.to_u8())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_arithmetic() {
        assert!(serial_gt(2, 1));
        assert!(!serial_gt(1, 2));
        assert!(!serial_gt(5, 5));
        // Wraparound: 1 is "after" u32::MAX.
        assert!(serial_gt(1, u32::MAX));
        assert!(!serial_gt(u32::MAX, 1));
    }

    #[test]
    fn budget_exhaustion() {
        let mut budget = SigBudget::new(2);
        assert!(budget.consume());
        assert!(budget.consume());
        assert!(!budget.consume());
        assert!(budget.exhausted());
    }
}
