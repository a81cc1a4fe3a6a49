//! Canonical RRset form (RFC 4034 section 6) and the byte string an RRSIG
//! actually signs (RFC 4035 section 5.3.2).

use crate::dns::enums::RecordType;
use crate::dns::name::{read_name, Name};
use crate::dns::rdata::RrsigData;
use crate::dns::ParseError;
use crate::smessage::SRRset;

/// Canonical rdata: embedded domain names lowercased for the RR types of
/// RFC 4034 section 6.2. Newer DNSSEC types (NSEC, RRSIG) are left as-is per
/// the RFC 6840 section 5.1 revision.
pub fn canonical_rdata(rtype: RecordType, rdata: &[u8]) -> Result<Vec<u8>, ParseError> {
    if !rtype.has_embedded_name() {
        return Ok(rdata.to_vec());
    }

    let mut out = Vec::with_capacity(rdata.len());
    match rtype {
        RecordType::Ns | RecordType::Cname | RecordType::Ptr | RecordType::Dname => {
            let (name, _) = read_name(rdata, 0)?;
            out.extend_from_slice(&name.to_wire(true));
        }
        RecordType::Mx => {
            if rdata.len() < 2 {
                return Err(ParseError::InvalidRecord);
            }
            out.extend_from_slice(&rdata[..2]);
            let (name, _) = read_name(rdata, 2)?;
            out.extend_from_slice(&name.to_wire(true));
        }
        RecordType::Soa => {
            let (mname, pos) = read_name(rdata, 0)?;
            let (rname, pos) = read_name(rdata, pos)?;
            let fixed = rdata.get(pos..pos + 20).ok_or(ParseError::InvalidRecord)?;
            out.extend_from_slice(&mname.to_wire(true));
            out.extend_from_slice(&rname.to_wire(true));
            out.extend_from_slice(fixed);
        }
        _ => unreachable!("has_embedded_name covers the match"),
    }

    Ok(out)
}

/// The owner name the signature was computed over. When the RRSIG labels
/// field is smaller than the owner's label count the RRset was synthesized
/// from a wildcard and the signed owner is `*.<rightmost labels>`
/// (RFC 4035 section 5.3.2). Returns the signed name and whether reduction
/// happened.
pub fn signed_owner(owner: &Name, rrsig_labels: u8) -> (Name, bool) {
    let mut count = owner.label_count();
    let mut significant = owner.clone();
    // A leading `*` does not count towards the RRSIG labels field.
    if owner.is_wildcard() {
        significant = owner.parent();
        count -= 1;
    }

    if usize::from(rrsig_labels) < count {
        let base = significant.suffix(rrsig_labels.into());
        (base.to_wildcard(), true)
    } else {
        (owner.clone(), false)
    }
}

/// Build the byte string covered by `rrsig` over `rrset`: the RRSIG rdata
/// without the signature, followed by every record in canonical form with
/// the original TTL substituted, sorted by canonical rdata.
pub fn signed_data(rrset: &SRRset, rrsig: &RrsigData) -> Result<Vec<u8>, ParseError> {
    let mut out = rrsig.to_presignature_wire();

    let (owner, _) = signed_owner(rrset.name(), rrsig.labels);
    let owner_wire = owner.to_wire(true);

    let mut rdatas: Vec<Vec<u8>> = rrset
        .records()
        .iter()
        .map(|record| canonical_rdata(record.rtype, &record.rdata))
        .collect::<Result<_, _>>()?;
    rdatas.sort();
    rdatas.dedup();

    let rclass = rrset.rclass().to_u16();
    let rtype = rrset.rtype().to_u16();
    for rdata in &rdatas {
        out.extend_from_slice(&owner_wire);
        out.extend_from_slice(&rtype.to_be_bytes());
        out.extend_from_slice(&rclass.to_be_bytes());
        out.extend_from_slice(&rrsig.original_ttl.to_be_bytes());
        let len = u16::try_from(rdata.len()).map_err(|_| ParseError::InvalidRecord)?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(rdata);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::enums::RecordClass;
    use crate::dns::record::DnsRecord;

    fn rrsig(labels: u8, original_ttl: u32) -> RrsigData {
        RrsigData {
            type_covered: RecordType::A,
            algorithm: 15,
            labels,
            original_ttl,
            expiration: 2_000_000_000,
            inception: 1_900_000_000,
            key_tag: 42,
            signer_name: Name::parse("example.com").unwrap(),
            signature: Vec::new(),
        }
    }

    #[test]
    fn wildcard_owner_reduction() {
        let owner = Name::parse("a.b.example.com").unwrap();
        let (signed, expanded) = signed_owner(&owner, 3);
        assert!(expanded);
        assert_eq!(signed, Name::parse("*.b.example.com").unwrap());

        let (signed, expanded) = signed_owner(&owner, 4);
        assert!(!expanded);
        assert_eq!(signed, owner);
    }

    #[test]
    fn wildcard_owner_not_recounted() {
        let owner = Name::parse("*.example.com").unwrap();
        let (signed, expanded) = signed_owner(&owner, 2);
        assert!(!expanded);
        assert_eq!(signed, owner);
    }

    #[test]
    fn signed_data_sorts_and_substitutes_ttl() {
        let name = Name::parse("Host.Example.Com").unwrap();
        let mut set = SRRset::new(DnsRecord::new(
            name.clone(),
            RecordType::A,
            RecordClass::In,
            17,
            vec![192, 0, 2, 9],
        ));
        set.add_record(DnsRecord::new(
            name,
            RecordType::A,
            RecordClass::In,
            17,
            vec![192, 0, 2, 1],
        ));

        let sig = rrsig(3, 300);
        let data = signed_data(&set, &sig).unwrap();

        // Owner is lowercased in the signed form.
        let owner_wire = Name::parse("host.example.com").unwrap().to_wire(true);
        let prefix_len = sig.to_presignature_wire().len();
        assert_eq!(&data[prefix_len..prefix_len + owner_wire.len()], &owner_wire[..]);

        // The lower rdata sorts first and the original TTL is used.
        let first_record = &data[prefix_len..];
        let ttl_offset = owner_wire.len() + 4;
        assert_eq!(&first_record[ttl_offset..ttl_offset + 4], &300u32.to_be_bytes());
        let rdata_offset = ttl_offset + 6;
        assert_eq!(&first_record[rdata_offset..rdata_offset + 4], &[192, 0, 2, 1]);
    }

    #[test]
    fn canonical_rdata_lowercases_cname_target() {
        let target = Name::parse("WWW.Example.COM").unwrap();
        let canonical = canonical_rdata(RecordType::Cname, &target.to_wire(false)).unwrap();
        assert_eq!(canonical, target.to_wire(true));
    }
}
