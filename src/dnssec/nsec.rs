//! Non-existence proofs from NSEC records (RFC 4035 section 5.4). All
//! functions expect NSEC RRsets that already validated as SECURE; they judge
//! only what the records prove about the query.

use std::cmp::Ordering;

use tracing::{debug, trace};

use crate::dns::enums::RecordType;
use crate::dns::name::Name;
use crate::dns::rdata::NsecData;
use crate::smessage::{SRRset, SecurityStatus};

/// One NSEC viewed with its owner, after rdata parsing.
struct NsecView<'a> {
    owner: &'a Name,
    data: NsecData,
}

fn views<'a>(nsecs: &'a [&SRRset]) -> Vec<NsecView<'a>> {
    nsecs
        .iter()
        .filter_map(|set| {
            let record = set.first()?;
            let data = record.nsec().ok()?;
            Some(NsecView {
                owner: set.name(),
                data,
            })
        })
        .collect()
}

/// True if `name` falls strictly inside the interval (owner, next). The
/// last NSEC of a zone wraps: its next name is the apex and everything
/// after the owner is covered.
fn covers(view: &NsecView<'_>, name: &Name) -> bool {
    let after_owner = view.owner.canonical_cmp(name) == Ordering::Less;
    let wraps = view.data.next_name.canonical_cmp(view.owner) != Ordering::Greater;

    if wraps {
        after_owner || name.canonical_cmp(&view.data.next_name) == Ordering::Less
    } else {
        after_owner && name.canonical_cmp(&view.data.next_name) == Ordering::Less
    }
}

/// The closest encloser this NSEC demonstrates for `name`: the longest
/// common suffix of `name` with either the owner or the next name.
fn closest_encloser(view: &NsecView<'_>, name: &Name) -> Name {
    let from_owner = name.common_ancestor(view.owner);
    let from_next = name.common_ancestor(&view.data.next_name);
    if from_owner.label_count() >= from_next.label_count() {
        from_owner
    } else {
        from_next
    }
}

/// NXDOMAIN proof: some NSEC covers `qname` and some NSEC covers the source
/// of synthesis `*.<closest encloser>`.
pub fn prove_nameerror(nsecs: &[&SRRset], qname: &Name) -> SecurityStatus {
    let views = views(nsecs);

    let Some(covering) = views.iter().find(|v| covers(v, qname)) else {
        debug!("nsec nameerror: no NSEC covers {}", qname);
        return SecurityStatus::Bogus;
    };

    let ce = closest_encloser(covering, qname);
    let wildcard = ce.to_wildcard();
    if views.iter().any(|v| covers(v, &wildcard)) {
        trace!("nsec nameerror proven, closest encloser {}", ce);
        SecurityStatus::Secure
    } else {
        debug!("nsec nameerror: wildcard {} not covered", wildcard);
        SecurityStatus::Bogus
    }
}

/// NODATA proof: an NSEC matching `qname` whose bitmap lacks the qtype and
/// CNAME; or the wildcard variant; or an empty-non-terminal proof where the
/// next name descends below `qname`.
pub fn prove_nodata(nsecs: &[&SRRset], qname: &Name, qtype: RecordType) -> SecurityStatus {
    let views = views(nsecs);

    for view in &views {
        if view.owner == qname {
            if view.data.has_type(qtype) || view.data.has_type(RecordType::Cname) {
                debug!("nsec nodata: bitmap at {} has {} or CNAME", qname, qtype);
                return SecurityStatus::Bogus;
            }
            return SecurityStatus::Secure;
        }

        // An NSEC whose next name is below qname proves qname is an empty
        // non-terminal: it exists, with no data of any type.
        if covers(view, qname) && view.data.next_name.is_strict_subdomain_of(qname) {
            trace!("nsec nodata: {} is an empty non-terminal", qname);
            return SecurityStatus::Secure;
        }

        // Wildcard NODATA: an NSEC at *.<ancestor of qname> lacking qtype.
        if view.owner.is_wildcard() && qname.is_strict_subdomain_of(&view.owner.parent()) {
            if view.data.has_type(qtype) || view.data.has_type(RecordType::Cname) {
                return SecurityStatus::Bogus;
            }
            // The wildcard answers for qname only if qname itself does not
            // exist; that needs a covering NSEC too.
            if views.iter().any(|v| covers(v, qname)) {
                return SecurityStatus::Secure;
            }
        }
    }

    debug!("nsec nodata proof failed for {} {}", qname, qtype);
    SecurityStatus::Bogus
}

/// Proof that a positive answer synthesized from `*.<wildcard_base>` was
/// legitimate: `qname` itself must be proven not to exist.
pub fn prove_wildcard_expansion(
    nsecs: &[&SRRset],
    qname: &Name,
    wildcard_base: &Name,
) -> SecurityStatus {
    if !qname.is_strict_subdomain_of(wildcard_base) {
        return SecurityStatus::Bogus;
    }

    let views = views(nsecs);
    if views.iter().any(|v| covers(v, qname)) {
        SecurityStatus::Secure
    } else {
        debug!("wildcard expansion for {} lacks covering NSEC", qname);
        SecurityStatus::Bogus
    }
}

/// What a validated NSEC says about DS at `name`, used while walking the
/// chain of trust down through a delegation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoDsProof {
    /// A delegation exists and provably has no DS: the child is insecure.
    InsecureDelegation,
    /// The name is no zone cut (an ENT or plain name); the current zone
    /// continues below it.
    NotDelegation,
    /// The records prove nothing useful; treat as bogus.
    Broken,
}

/// Judge a NODATA answer to a DS query (RFC 4035 section 5.2).
pub fn prove_no_ds(nsecs: &[&SRRset], name: &Name) -> NoDsProof {
    for view in &views(nsecs) {
        if view.owner == name {
            if view.data.has_type(RecordType::Ds) || view.data.has_type(RecordType::Soa) {
                // DS present, or we are looking at the apex itself; either
                // way this NSEC cannot prove an insecure delegation.
                return NoDsProof::Broken;
            }
            if view.data.has_type(RecordType::Ns) {
                return NoDsProof::InsecureDelegation;
            }
            return NoDsProof::NotDelegation;
        }

        if covers(view, name) && view.data.next_name.is_strict_subdomain_of(name) {
            // Empty non-terminal on the way down; no cut here.
            return NoDsProof::NotDelegation;
        }
    }

    NoDsProof::Broken
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::enums::RecordClass;
    use crate::dns::record::DnsRecord;

    fn nsec(owner: &str, next: &str, types: &[RecordType]) -> SRRset {
        let data = NsecData {
            next_name: Name::parse(next).unwrap(),
            types: types.iter().map(|t| t.to_u16()).collect(),
        };
        SRRset::new(DnsRecord::new(
            Name::parse(owner).unwrap(),
            RecordType::Nsec,
            RecordClass::In,
            300,
            data.to_wire(),
        ))
    }

    fn name(s: &str) -> Name {
        Name::parse(s).unwrap()
    }

    #[test]
    fn nameerror_needs_both_proofs() {
        // Zone example.com with alpha and zulu; query for "m.example.com".
        let cover_q = nsec(
            "alpha.example.com",
            "zulu.example.com",
            &[RecordType::A, RecordType::Rrsig],
        );
        // The wildcard *.example.com sorts before alpha; the apex NSEC
        // chains apex -> alpha and covers it.
        let cover_wc = nsec(
            "example.com",
            "alpha.example.com",
            &[RecordType::Soa, RecordType::Ns],
        );

        assert_eq!(
            prove_nameerror(&[&cover_q, &cover_wc], &name("m.example.com")),
            SecurityStatus::Secure
        );
        // Without the wildcard cover the proof collapses.
        assert_eq!(
            prove_nameerror(&[&cover_q], &name("m.example.com")),
            SecurityStatus::Bogus
        );
    }

    #[test]
    fn nodata_by_bitmap() {
        let set = nsec(
            "host.example.com",
            "next.example.com",
            &[RecordType::A, RecordType::Rrsig],
        );
        assert_eq!(
            prove_nodata(&[&set], &name("host.example.com"), RecordType::Aaaa),
            SecurityStatus::Secure
        );
        assert_eq!(
            prove_nodata(&[&set], &name("host.example.com"), RecordType::A),
            SecurityStatus::Bogus
        );
    }

    #[test]
    fn nodata_rejects_cname_presence() {
        let set = nsec(
            "host.example.com",
            "next.example.com",
            &[RecordType::Cname],
        );
        assert_eq!(
            prove_nodata(&[&set], &name("host.example.com"), RecordType::Aaaa),
            SecurityStatus::Bogus
        );
    }

    #[test]
    fn empty_non_terminal_nodata() {
        // NSEC from the name before "ent" straight to a leaf below it
        // proves "ent.example.com" exists as an ENT.
        let set = nsec(
            "apex.example.com",
            "leaf.ent.example.com",
            &[RecordType::A],
        );
        assert_eq!(
            prove_nodata(&[&set], &name("ent.example.com"), RecordType::A),
            SecurityStatus::Secure
        );
    }

    #[test]
    fn wraparound_cover() {
        // Last NSEC in the zone: next name is the apex.
        let set = nsec("zulu.example.com", "example.com", &[RecordType::A]);
        let set_refs = [&set];
        let views = super::views(&set_refs);
        assert!(covers(&views[0], &name("zzz.example.com")));
        assert!(!covers(&views[0], &name("aaa.example.com")));
    }

    #[test]
    fn wildcard_expansion_proof() {
        let cover = nsec("a.example.com", "z.example.com", &[RecordType::A]);
        assert_eq!(
            prove_wildcard_expansion(&[&cover], &name("m.example.com"), &name("example.com")),
            SecurityStatus::Secure
        );
        assert_eq!(
            prove_wildcard_expansion(&[&cover], &name("a.example.com"), &name("example.com")),
            SecurityStatus::Bogus
        );
    }

    #[test]
    fn no_ds_judgements() {
        let insecure = nsec(
            "child.example.com",
            "next.example.com",
            &[RecordType::Ns],
        );
        assert_eq!(
            prove_no_ds(&[&insecure], &name("child.example.com")),
            NoDsProof::InsecureDelegation
        );

        let signed_cut = nsec(
            "child.example.com",
            "next.example.com",
            &[RecordType::Ns, RecordType::Ds],
        );
        assert_eq!(
            prove_no_ds(&[&signed_cut], &name("child.example.com")),
            NoDsProof::Broken
        );

        let ent = nsec(
            "child.example.com",
            "next.example.com",
            &[RecordType::A],
        );
        assert_eq!(
            prove_no_ds(&[&ent], &name("child.example.com")),
            NoDsProof::NotDelegation
        );
    }
}
