//! Non-existence proofs from NSEC3 records (RFC 5155 section 8). Proofs run
//! over hashed names: a name *matches* an NSEC3 when its hash equals the
//! owner hash, and is *covered* when its hash falls strictly between the
//! owner hash and the next-hashed-owner, with wraparound at the zone ring.

use ring::digest;
use tracing::{debug, trace};

use crate::dns::enums::RecordType;
use crate::dns::name::Name;
use crate::dns::rdata::Nsec3Data;
use crate::smessage::{SRRset, SecurityStatus};

use super::nsec::NoDsProof;

/// The one hash algorithm RFC 5155 defines.
pub const NSEC3_HASH_SHA1: u8 = 1;

/// Per-key-size ceilings on the NSEC3 iteration count. A zone exceeding its
/// ceiling is treated as insecure, not bogus: the proof is too expensive to
/// trust, but the zone operator is not an attacker.
#[derive(Clone, Copy, Debug)]
pub struct IterationPolicy {
    pub max_1024: u16,
    pub max_2048: u16,
    pub max_4096: u16,
}

impl Default for IterationPolicy {
    fn default() -> Self {
        IterationPolicy {
            max_1024: 150,
            max_2048: 500,
            max_4096: 2500,
        }
    }
}

impl IterationPolicy {
    pub fn ceiling_for(&self, key_bits: usize) -> u16 {
        if key_bits <= 1024 {
            self.max_1024
        } else if key_bits <= 2048 {
            self.max_2048
        } else {
            self.max_4096
        }
    }

    pub fn exceeded(&self, iterations: u16, key_bits: usize) -> bool {
        iterations > self.ceiling_for(key_bits)
    }
}

/// RFC 5155 section 5: `H(x) = SHA1(x || salt)` iterated.
pub fn hash_name(name: &Name, salt: &[u8], iterations: u16) -> Vec<u8> {
    let mut input = name.to_wire(true);
    input.extend_from_slice(salt);
    let mut hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &input)
        .as_ref()
        .to_vec();

    for _ in 0..iterations {
        let mut next = hash;
        next.extend_from_slice(salt);
        hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &next)
            .as_ref()
            .to_vec();
    }

    hash
}

/// Base32hex without padding (RFC 4648), the encoding NSEC3 owner labels use.
pub fn encode_hash(hash: &[u8]) -> String {
    base32::encode(base32::Alphabet::Rfc4648Hex { padding: false }, hash).to_lowercase()
}

fn decode_owner_label(label: &str) -> Option<Vec<u8>> {
    base32::decode(
        base32::Alphabet::Rfc4648Hex { padding: false },
        &label.to_uppercase(),
    )
}

struct Nsec3View<'a> {
    owner_hash: Vec<u8>,
    data: &'a Nsec3Data,
}

/// The outcome of collecting a usable NSEC3 set.
enum Gather<'a> {
    Usable(Vec<Nsec3View<'a>>, Vec<u8>, u16),
    /// Parameters unusable for this validator (unknown hash algorithm or
    /// iterations over the ceiling): the proof degrades to insecure.
    Unusable,
    /// Mixed parameter sets or no decodable records: bogus.
    Broken,
}

/// Collect NSEC3 views for one zone. All records must share one parameter
/// set; owners must sit directly below `zone`.
fn gather<'a>(
    nsec3s: &'a [(&'a Name, Nsec3Data)],
    zone: &Name,
    key_bits: usize,
    policy: &IterationPolicy,
) -> Gather<'a> {
    if nsec3s.is_empty() {
        return Gather::Broken;
    }

    let first = &nsec3s[0].1;
    let (alg, iterations, salt) = (first.hash_algorithm, first.iterations, first.salt.clone());

    if nsec3s
        .iter()
        .any(|(_, d)| d.hash_algorithm != alg || d.iterations != iterations || d.salt != salt)
    {
        debug!("nsec3 records mix parameter sets");
        return Gather::Broken;
    }

    if alg != NSEC3_HASH_SHA1 {
        debug!("nsec3 hash algorithm {} unknown, treating as insecure", alg);
        return Gather::Unusable;
    }

    if policy.exceeded(iterations, key_bits) {
        debug!(
            "nsec3 iterations {} above ceiling {} for {}-bit keys",
            iterations,
            policy.ceiling_for(key_bits),
            key_bits
        );
        return Gather::Unusable;
    }

    let views: Vec<Nsec3View<'_>> = nsec3s
        .iter()
        .filter_map(|(owner, data)| {
            if &owner.parent() != zone {
                return None;
            }
            let label = owner.labels().first()?;
            Some(Nsec3View {
                owner_hash: decode_owner_label(label)?,
                data,
            })
        })
        .collect();

    if views.is_empty() {
        Gather::Broken
    } else {
        Gather::Usable(views, salt, iterations)
    }
}

/// Pull (owner, data) pairs out of validated NSEC3 RRsets.
pub fn collect<'a>(sets: &'a [&'a SRRset]) -> Vec<(&'a Name, Nsec3Data)> {
    sets.iter()
        .filter_map(|set| {
            let record = set.first()?;
            Some((set.name(), record.nsec3().ok()?))
        })
        .collect()
}

fn find_matching<'a>(views: &'a [Nsec3View<'a>], hash: &[u8]) -> Option<&'a Nsec3View<'a>> {
    views.iter().find(|v| v.owner_hash == hash)
}

fn find_covering<'a>(views: &'a [Nsec3View<'a>], hash: &[u8]) -> Option<&'a Nsec3View<'a>> {
    views.iter().find(|v| {
        let owner = v.owner_hash.as_slice();
        let next = v.data.next_hashed_owner.as_slice();
        if owner < next {
            owner < hash && hash < next
        } else {
            // Wraparound at the end of the hash ring.
            owner < hash || hash < next
        }
    })
}

struct CeProof<'a> {
    closest_encloser: Name,
    next_closer: Name,
    ce_view: &'a Nsec3View<'a>,
    next_closer_covering: Option<&'a Nsec3View<'a>>,
}

/// RFC 5155 section 8.3: walk ancestors of `qname` up to `zone`; the
/// deepest with a matching NSEC3 is the closest encloser, and the candidate
/// one label below it is the next closer.
fn closest_encloser_proof<'a>(
    qname: &Name,
    zone: &Name,
    views: &'a [Nsec3View<'a>],
    salt: &[u8],
    iterations: u16,
) -> Option<CeProof<'a>> {
    let mut candidate = qname.clone();
    let mut below = None;

    loop {
        let hash = hash_name(&candidate, salt, iterations);
        if let Some(ce_view) = find_matching(views, &hash) {
            let next_closer: Name = below?;
            let nc_hash = hash_name(&next_closer, salt, iterations);
            return Some(CeProof {
                closest_encloser: candidate,
                next_closer: next_closer.clone(),
                ce_view,
                next_closer_covering: find_covering(views, &nc_hash),
            });
        }

        if &candidate == zone {
            return None;
        }
        below = Some(candidate.clone());
        candidate = candidate.parent();
    }
}

/// A closest encloser below a zone cut proves nothing: NSEC3s of the parent
/// zone have no authority there (the cut shows as NS without SOA), and a
/// DNAME at the encloser rewrites the query away entirely.
fn ce_is_usable(proof: &CeProof<'_>) -> bool {
    let bitmap = &proof.ce_view.data;
    !(bitmap.has_type(RecordType::Ns) && !bitmap.has_type(RecordType::Soa))
        && !bitmap.has_type(RecordType::Dname)
}

/// NXDOMAIN proof (RFC 5155 section 8.4): closest encloser proven, next
/// closer covered, and the wildcard at the closest encloser covered too.
/// An opt-out span over the next closer downgrades the proof to insecure:
/// the name may exist as an unsigned delegation.
pub fn prove_nameerror(
    nsec3s: &[(&Name, Nsec3Data)],
    qname: &Name,
    zone: &Name,
    key_bits: usize,
    policy: &IterationPolicy,
) -> SecurityStatus {
    let (views, salt, iterations) = match gather(nsec3s, zone, key_bits, policy) {
        Gather::Usable(v, s, i) => (v, s, i),
        Gather::Unusable => return SecurityStatus::Insecure,
        Gather::Broken => return SecurityStatus::Bogus,
    };

    // An owner match for qname contradicts NXDOMAIN outright.
    let qname_hash = hash_name(qname, &salt, iterations);
    if find_matching(&views, &qname_hash).is_some() {
        debug!("nxdomain response but {} has a matching NSEC3", qname);
        return SecurityStatus::Bogus;
    }

    let Some(proof) = closest_encloser_proof(qname, zone, &views, &salt, iterations) else {
        debug!("nxdomain: no closest encloser proof for {}", qname);
        return SecurityStatus::Bogus;
    };
    if !ce_is_usable(&proof) {
        debug!(
            "nxdomain: closest encloser {} is a delegation or DNAME",
            proof.closest_encloser
        );
        return SecurityStatus::Bogus;
    }
    let Some(next_cover) = proof.next_closer_covering else {
        debug!("nxdomain: next closer {} not covered", proof.next_closer);
        return SecurityStatus::Bogus;
    };

    let wildcard = proof.closest_encloser.to_wildcard();
    let wildcard_hash = hash_name(&wildcard, &salt, iterations);
    if find_covering(&views, &wildcard_hash).is_none() {
        debug!("nxdomain: wildcard {} not covered", wildcard);
        return SecurityStatus::Bogus;
    }

    if next_cover.data.opt_out() {
        trace!(
            "nxdomain for {} proven across an opt-out span, insecure",
            qname
        );
        return SecurityStatus::Insecure;
    }

    SecurityStatus::Secure
}

/// NODATA proof (RFC 5155 sections 8.5 to 8.7).
pub fn prove_nodata(
    nsec3s: &[(&Name, Nsec3Data)],
    qname: &Name,
    qtype: RecordType,
    zone: &Name,
    key_bits: usize,
    policy: &IterationPolicy,
) -> SecurityStatus {
    let (views, salt, iterations) = match gather(nsec3s, zone, key_bits, policy) {
        Gather::Usable(v, s, i) => (v, s, i),
        Gather::Unusable => return SecurityStatus::Insecure,
        Gather::Broken => return SecurityStatus::Bogus,
    };

    let qname_hash = hash_name(qname, &salt, iterations);
    if let Some(matching) = find_matching(&views, &qname_hash) {
        if matching.data.has_type(qtype) || matching.data.has_type(RecordType::Cname) {
            debug!("nodata: bitmap at {} includes {} or CNAME", qname, qtype);
            return SecurityStatus::Bogus;
        }
        return SecurityStatus::Secure;
    }

    let Some(proof) = closest_encloser_proof(qname, zone, &views, &salt, iterations) else {
        debug!("nodata: no closest encloser proof for {}", qname);
        return SecurityStatus::Bogus;
    };
    if !ce_is_usable(&proof) {
        return SecurityStatus::Bogus;
    }

    let Some(next_cover) = proof.next_closer_covering else {
        return SecurityStatus::Bogus;
    };

    // Wildcard NODATA: *.ce exists but lacks the type.
    let wildcard = proof.closest_encloser.to_wildcard();
    let wildcard_hash = hash_name(&wildcard, &salt, iterations);
    if let Some(wc_match) = find_matching(&views, &wildcard_hash) {
        if wc_match.data.has_type(qtype) || wc_match.data.has_type(RecordType::Cname) {
            return SecurityStatus::Bogus;
        }
        return SecurityStatus::Secure;
    }

    // The closest encloser is an empty non-terminal on the query's path:
    // its matching NSEC3 carries no types at all. Accepted as an ENT
    // NODATA; some signers answer this way instead of NXDOMAIN.
    if proof.ce_view.data.types.is_empty() {
        trace!(
            "nodata: closest encloser {} is an empty non-terminal",
            proof.closest_encloser
        );
        return SecurityStatus::Secure;
    }

    // DS at an opt-out span: provably insecure delegation.
    if qtype == RecordType::Ds && next_cover.data.opt_out() {
        return SecurityStatus::Insecure;
    }

    debug!("nodata proof failed for {} {}", qname, qtype);
    SecurityStatus::Bogus
}

/// Wildcard-expansion proof: the RRSIG said the answer came from
/// `*.<wildcard_base>`; the next closer under that base must be covered,
/// proving the query name itself does not exist.
pub fn prove_wildcard_expansion(
    nsec3s: &[(&Name, Nsec3Data)],
    qname: &Name,
    zone: &Name,
    wildcard_base: &Name,
    key_bits: usize,
    policy: &IterationPolicy,
) -> SecurityStatus {
    if !qname.is_strict_subdomain_of(wildcard_base) {
        return SecurityStatus::Bogus;
    }

    let (views, salt, iterations) = match gather(nsec3s, zone, key_bits, policy) {
        Gather::Usable(v, s, i) => (v, s, i),
        Gather::Unusable => return SecurityStatus::Insecure,
        Gather::Broken => return SecurityStatus::Bogus,
    };

    let next_closer = qname.suffix(wildcard_base.label_count() + 1);
    let nc_hash = hash_name(&next_closer, &salt, iterations);
    if find_covering(&views, &nc_hash).is_some() {
        SecurityStatus::Secure
    } else {
        debug!(
            "wildcard expansion: next closer {} not covered",
            next_closer
        );
        SecurityStatus::Bogus
    }
}

/// Judge a NODATA answer to a DS query (RFC 5155 section 8.6), for the
/// chain-of-trust walk.
pub fn prove_no_ds(
    nsec3s: &[(&Name, Nsec3Data)],
    name: &Name,
    zone: &Name,
    key_bits: usize,
    policy: &IterationPolicy,
) -> NoDsProof {
    let (views, salt, iterations) = match gather(nsec3s, zone, key_bits, policy) {
        Gather::Usable(v, s, i) => (v, s, i),
        // Unusable parameters end the chain as insecure either way.
        Gather::Unusable => return NoDsProof::InsecureDelegation,
        Gather::Broken => return NoDsProof::Broken,
    };

    let hash = hash_name(name, &salt, iterations);
    if let Some(matching) = find_matching(&views, &hash) {
        if matching.data.has_type(RecordType::Ds) || matching.data.has_type(RecordType::Soa) {
            return NoDsProof::Broken;
        }
        if matching.data.has_type(RecordType::Ns) {
            return NoDsProof::InsecureDelegation;
        }
        return NoDsProof::NotDelegation;
    }

    // Opt-out: a covering span with the flag set admits unsigned
    // delegations inside it.
    if let Some(proof) = closest_encloser_proof(name, zone, &views, &salt, iterations) {
        if let Some(cover) = proof.next_closer_covering {
            if cover.data.opt_out() {
                return NoDsProof::InsecureDelegation;
            }
        }
    }

    NoDsProof::Broken
}
