//! DS to DNSKEY binding (RFC 4034 section 5) and the digest policy that
//! decides which DS records in a set are usable.

use tracing::{debug, trace};

use crate::dns::name::Name;
use crate::dns::rdata::{DnskeyData, DsData};

use super::algorithm::Algorithm;
use super::digest::DigestType;
use super::key_tag::key_tag;

/// The digest a DS record should carry for `key` at `owner`:
/// `digest(canonical owner wire form || DNSKEY rdata)`.
pub fn ds_digest(owner: &Name, key: &DnskeyData, digest_type: DigestType) -> Option<Vec<u8>> {
    let mut data = owner.to_wire(true);
    data.extend_from_slice(&key.to_wire());
    digest_type.digest(&data)
}

/// True if `ds` commits to `key` at `owner`: key tag, algorithm and digest
/// must all agree.
pub fn ds_matches_key(ds: &DsData, owner: &Name, key: &DnskeyData) -> bool {
    if ds.algorithm != key.algorithm || ds.key_tag != key_tag(key) {
        return false;
    }

    let Some(digest_type) = DigestType::from_u8(ds.digest_type) else {
        return false;
    };

    match ds_digest(owner, key, digest_type) {
        Some(digest) => digest == ds.digest,
        None => false,
    }
}

/// Filtering policy for DS sets: digest preference order plus optional
/// algorithm-downgrade hardening.
#[derive(Clone, Debug)]
pub struct DigestPolicy {
    /// DS digest types in descending preference.
    pub preference: Vec<DigestType>,
    /// When set, only DS records using the most preferred digest type
    /// present in the set are considered; weaker digests are ignored.
    pub harden_downgrade: bool,
}

impl Default for DigestPolicy {
    fn default() -> Self {
        DigestPolicy {
            preference: vec![DigestType::Sha384, DigestType::Sha256, DigestType::Sha1],
            harden_downgrade: false,
        }
    }
}

impl DigestPolicy {
    /// The subset of a DS set this validator will try to chain through.
    ///
    /// DS records with unknown or unsupported digest or signing algorithms
    /// are ignored, they are not an error. An empty result for a non-empty
    /// input means the zone must be treated as insecure.
    pub fn usable_ds<'a>(&self, ds_set: &'a [DsData]) -> Vec<&'a DsData> {
        let supported: Vec<&DsData> = ds_set
            .iter()
            .filter(|ds| {
                let digest_ok = DigestType::from_u8(ds.digest_type)
                    .map(|d| d.is_supported() && self.preference.contains(&d))
                    .unwrap_or(false);
                let algorithm_ok = Algorithm::from_u8(ds.algorithm)
                    .map(Algorithm::is_supported)
                    .unwrap_or(false);
                if !digest_ok || !algorithm_ok {
                    trace!(
                        "ignoring DS tag={} alg={} digest={}",
                        ds.key_tag,
                        ds.algorithm,
                        ds.digest_type
                    );
                }
                digest_ok && algorithm_ok
            })
            .collect();

        if supported.is_empty() {
            debug!("no usable DS record in set of {}", ds_set.len());
            return supported;
        }

        if !self.harden_downgrade {
            return supported;
        }

        let best = self
            .preference
            .iter()
            .find(|preferred| {
                supported
                    .iter()
                    .any(|ds| ds.digest_type == preferred.to_u8())
            })
            .copied();

        match best {
            Some(best) => supported
                .into_iter()
                .filter(|ds| ds.digest_type == best.to_u8())
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Estimated public key size in bits, used to pick the NSEC3 iteration
/// ceiling bucket (RFC 5155 section 10.3).
pub fn key_length_bits(key: &DnskeyData) -> usize {
    match Algorithm::from_u8(key.algorithm) {
        Some(Algorithm::EcdsaP256Sha256) | Some(Algorithm::Ed25519) => 256,
        Some(Algorithm::EcdsaP384Sha384) => 384,
        Some(algorithm) if algorithm.is_rsa() => {
            // RFC 3110 wire form: exponent length (1 or 3 octets),
            // exponent, modulus.
            let pk = &key.public_key;
            let (prefix, exp_len) = match pk.first() {
                Some(0) if pk.len() >= 3 => (3usize, (usize::from(pk[1]) << 8) | usize::from(pk[2])),
                Some(&len) if len != 0 => (1usize, usize::from(len)),
                _ => return 0,
            };
            pk.len().saturating_sub(prefix + exp_len) * 8
        }
        _ => key.public_key.len() * 8,
    }
}
