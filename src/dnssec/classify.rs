//! Response classification: every message gets exactly one subtype, and
//! each subtype carries its own proof obligations downstream. Unrecognized
//! shapes stay UNKNOWN and validate to bogus; the validator never guesses.

use std::fmt;

use tracing::trace;

use crate::dns::enums::{RecordType, ResponseCode};
use crate::smessage::{SMessage, Section};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseClassification {
    /// Not a recognized subtype.
    Unknown,
    /// A positive, direct answer.
    Positive,
    /// A positive answer reached through a CNAME chain.
    Cname,
    /// NOERROR with no data for the query type.
    Nodata,
    /// NXDOMAIN.
    Nameerror,
    /// Answer to a qtype=ANY query.
    Any,
    /// A CNAME chain ending in a name with no data of the query type.
    CnameNodata,
    /// A CNAME chain pointing into a non-existent name.
    CnameNameerror,
    /// A delegation: NS in authority, no SOA, empty answer.
    Referral,
}

impl fmt::Display for ResponseClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "UNKNOWN",
            Self::Positive => "POSITIVE",
            Self::Cname => "CNAME",
            Self::Nodata => "NODATA",
            Self::Nameerror => "NAMEERROR",
            Self::Any => "ANY",
            Self::CnameNodata => "CNAME_NODATA",
            Self::CnameNameerror => "CNAME_NAMEERROR",
            Self::Referral => "REFERRAL",
        };
        f.write_str(s)
    }
}

/// Classify a response message against its own question.
pub fn classify(message: &SMessage) -> ResponseClassification {
    let Some(question) = &message.question else {
        return ResponseClassification::Unknown;
    };
    let qname = &question.name;
    let qtype = question.qtype;

    let rcode = message.response_code();
    if rcode != ResponseCode::NoError && rcode != ResponseCode::NxDomain {
        return ResponseClassification::Unknown;
    }

    // Walk the answer section from qname, following CNAMEs.
    let mut current = qname.clone();
    let mut followed_cname = false;
    for rrset in message.section(Section::Answer) {
        if rrset.name() != &current {
            continue;
        }

        if rrset.rtype() == RecordType::Cname && qtype != RecordType::Cname && qtype != RecordType::Any {
            if let Some(record) = rrset.first() {
                if let Ok(target) = record.target_name() {
                    trace!("classify: CNAME {} -> {}", current, target);
                    current = target;
                    followed_cname = true;
                    continue;
                }
            }
            return ResponseClassification::Unknown;
        }

        if qtype == RecordType::Any {
            return ResponseClassification::Any;
        }

        if rrset.rtype() == qtype {
            return if followed_cname {
                ResponseClassification::Cname
            } else {
                ResponseClassification::Positive
            };
        }
    }

    // No terminal answer. NXDOMAIN splits on whether a chain led us away
    // from the original name first.
    if rcode == ResponseCode::NxDomain {
        return if followed_cname {
            ResponseClassification::CnameNameerror
        } else {
            ResponseClassification::Nameerror
        };
    }

    if followed_cname {
        return ResponseClassification::CnameNodata;
    }

    let authority = message.section(Section::Authority);
    let has_soa = authority.iter().any(|s| s.rtype() == RecordType::Soa);
    let has_ns = authority.iter().any(|s| s.rtype() == RecordType::Ns);
    let has_denial = authority
        .iter()
        .any(|s| matches!(s.rtype(), RecordType::Nsec | RecordType::Nsec3));

    if !has_soa && has_ns {
        return ResponseClassification::Referral;
    }
    if has_soa || has_denial {
        return ResponseClassification::Nodata;
    }

    ResponseClassification::Unknown
}
