//! Configured trust anchors: DS or DNSKEY sets that terminate every
//! authentication chain. Lookup walks labels off the query name until an
//! anchor matches; the root anchor matches everything.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use crate::dns::enums::{RecordClass, RecordType};
use crate::dns::name::Name;
use crate::dns::rdata::{DnskeyData, DsData};
use crate::dns::record::DnsRecord;
use crate::smessage::{SRRset, SecurityStatus};

#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("trust anchor line {line}: {message}")]
    BadLine { line: usize, message: String },
    #[error("trust anchor file contains no usable anchors")]
    Empty,
}

/// Anchors keyed by (class, owner). Mutated only while configuration loads;
/// read-only afterwards.
#[derive(Debug, Default)]
pub struct TrustAnchorStore {
    anchors: RwLock<HashMap<(RecordClass, Name), SRRset>>,
}

impl TrustAnchorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an anchor RRset; it is marked SECURE, anchors are axioms.
    pub fn store(&self, mut rrset: SRRset) {
        rrset.set_security(SecurityStatus::Secure);
        let key = (rrset.rclass(), rrset.name().to_lowercase());
        debug!("trust anchor for {} ({})", key.1, rrset.rtype());
        self.anchors.write().insert(key, rrset);
    }

    /// Longest-suffix anchor for `name`, if any.
    pub fn find(&self, name: &Name, rclass: RecordClass) -> Option<SRRset> {
        let anchors = self.anchors.read();
        let mut candidate = name.to_lowercase();
        loop {
            if let Some(anchor) = anchors.get(&(rclass, candidate.clone())) {
                return Some(anchor.clone());
            }
            if candidate.is_root() {
                return None;
            }
            candidate = candidate.parent();
        }
    }

    pub fn len(&self) -> usize {
        self.anchors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.read().is_empty()
    }

    /// Load anchors from zone-file-format text: DS and DNSKEY lines,
    /// comments and blank lines ignored. Records sharing (owner, type)
    /// merge into one anchor set.
    pub fn load(&self, content: &str) -> Result<usize, AnchorError> {
        let mut sets: Vec<SRRset> = Vec::new();

        for (index, raw_line) in content.lines().enumerate() {
            let line = raw_line.split(';').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let record = parse_anchor_line(line).map_err(|message| AnchorError::BadLine {
                line: index + 1,
                message,
            })?;

            if let Some(set) = sets.iter_mut().find(|s| {
                s.rtype() == record.rtype && s.name() == &record.name && s.rclass() == record.rclass
            }) {
                set.add_record(record);
            } else {
                sets.push(SRRset::new(record));
            }
        }

        if sets.is_empty() {
            return Err(AnchorError::Empty);
        }

        let count = sets.len();
        for set in sets {
            self.store(set);
        }
        info!("loaded {} trust anchor set(s)", count);
        Ok(count)
    }
}

/// One `name [ttl] [class] TYPE rdata...` line with TYPE DS or DNSKEY.
fn parse_anchor_line(line: &str) -> Result<DnsRecord, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        return Err("too few fields".to_string());
    }

    let name = Name::parse(tokens[0]).map_err(|e| format!("bad owner name: {}", e))?;

    let mut index = 1;
    let mut ttl = 0u32;
    if let Ok(value) = tokens[index].parse::<u32>() {
        ttl = value;
        index += 1;
    }
    let mut rclass = RecordClass::In;
    if tokens.get(index).map(|t| t.eq_ignore_ascii_case("IN")) == Some(true) {
        rclass = RecordClass::In;
        index += 1;
    }

    let rtype_token = tokens
        .get(index)
        .ok_or_else(|| "missing record type".to_string())?;
    index += 1;
    let fields = &tokens[index..];

    match rtype_token.to_ascii_uppercase().as_str() {
        "DS" => {
            if fields.len() < 4 {
                return Err("DS needs key tag, algorithm, digest type, digest".to_string());
            }
            let ds = DsData {
                key_tag: fields[0].parse().map_err(|_| "bad key tag".to_string())?,
                algorithm: fields[1].parse().map_err(|_| "bad algorithm".to_string())?,
                digest_type: fields[2].parse().map_err(|_| "bad digest type".to_string())?,
                digest: hex::decode(fields[3..].concat())
                    .map_err(|_| "bad hex digest".to_string())?,
            };
            Ok(DnsRecord::new(name, RecordType::Ds, rclass, ttl, ds.to_wire()))
        }
        "DNSKEY" => {
            if fields.len() < 4 {
                return Err("DNSKEY needs flags, protocol, algorithm, key".to_string());
            }
            use base64::Engine;
            let key = DnskeyData {
                flags: fields[0].parse().map_err(|_| "bad flags".to_string())?,
                protocol: fields[1].parse().map_err(|_| "bad protocol".to_string())?,
                algorithm: fields[2].parse().map_err(|_| "bad algorithm".to_string())?,
                public_key: base64::engine::general_purpose::STANDARD
                    .decode(fields[3..].concat())
                    .map_err(|_| "bad base64 key".to_string())?,
            };
            Ok(DnsRecord::new(
                name,
                RecordType::Dnskey,
                rclass,
                ttl,
                key.to_wire(),
            ))
        }
        other => Err(format!("unsupported anchor type {}", other)),
    }
}
