//! Shared fixtures: zone keys that really sign, a canned priming resolver,
//! and builders for the response shapes the validator judges.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};

use vordr::dns::edns::EdnsOpt;
use vordr::dns::enums::{RecordClass, RecordType};
use vordr::dns::name::Name;
use vordr::dns::question::DnsQuestion;
use vordr::dns::rdata::{DnskeyData, DsData, NsecData, Nsec3Data, RrsigData, SoaData};
use vordr::dns::record::DnsRecord;
use vordr::dns::DnsPacket;
use vordr::dnssec::canonical::signed_data;
use vordr::dnssec::digest::DigestType;
use vordr::dnssec::ds::ds_digest;
use vordr::dnssec::key_tag::key_tag;
use vordr::dnssec::nsec3::{encode_hash, hash_name, NSEC3_HASH_SHA1};
use vordr::dnssec::validator::PrimingResolver;
use vordr::error::ResolveError;
use vordr::smessage::SRRset;

pub const TTL: u32 = 3600;

pub fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as u32
}

pub fn name(s: &str) -> Name {
    Name::parse(s).unwrap()
}

/// An Ed25519 zone key that signs fixture RRsets for real.
pub struct ZoneKey {
    pub zone: Name,
    keypair: Ed25519KeyPair,
    pub dnskey: DnskeyData,
}

impl ZoneKey {
    pub fn generate(zone: &str) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let keypair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let dnskey = DnskeyData {
            flags: 257,
            protocol: 3,
            algorithm: 15,
            public_key: keypair.public_key().as_ref().to_vec(),
        };

        ZoneKey {
            zone: name(zone),
            keypair,
            dnskey,
        }
    }

    pub fn key_tag(&self) -> u16 {
        key_tag(&self.dnskey)
    }

    pub fn dnskey_record(&self) -> DnsRecord {
        DnsRecord::new(
            self.zone.clone(),
            RecordType::Dnskey,
            RecordClass::In,
            TTL,
            self.dnskey.to_wire(),
        )
    }

    pub fn ds_data(&self) -> DsData {
        DsData {
            key_tag: self.key_tag(),
            algorithm: self.dnskey.algorithm,
            digest_type: DigestType::Sha256.to_u8(),
            digest: ds_digest(&self.zone, &self.dnskey, DigestType::Sha256).unwrap(),
        }
    }

    pub fn ds_record(&self) -> DnsRecord {
        DnsRecord::new(
            self.zone.clone(),
            RecordType::Ds,
            RecordClass::In,
            TTL,
            self.ds_data().to_wire(),
        )
    }

    /// A `zone. IN DS ...` line for the trust-anchor file/loader.
    pub fn anchor_line(&self) -> String {
        let ds = self.ds_data();
        format!(
            "{} IN DS {} {} {} {}",
            self.zone,
            ds.key_tag,
            ds.algorithm,
            ds.digest_type,
            hex::encode_upper(&ds.digest)
        )
    }

    /// Sign an RRset, returning the RRSIG record to attach.
    pub fn sign(&self, rrset: &SRRset) -> DnsRecord {
        self.sign_with_validity(rrset, now() - 3600, now() + 30 * 86400)
    }

    pub fn sign_with_validity(
        &self,
        rrset: &SRRset,
        inception: u32,
        expiration: u32,
    ) -> DnsRecord {
        let owner = rrset.name();
        let labels = (owner.label_count() - usize::from(owner.is_wildcard())) as u8;

        let mut rrsig = RrsigData {
            type_covered: rrset.rtype(),
            algorithm: self.dnskey.algorithm,
            labels,
            original_ttl: TTL,
            expiration,
            inception,
            key_tag: self.key_tag(),
            signer_name: self.zone.clone(),
            signature: Vec::new(),
        };

        let data = signed_data(rrset, &rrsig).unwrap();
        rrsig.signature = self.keypair.sign(&data).as_ref().to_vec();

        DnsRecord::new(
            owner.clone(),
            RecordType::Rrsig,
            RecordClass::In,
            TTL,
            rrsig.to_wire(),
        )
    }
}

/// Build an SRRset from records and attach this key's signature.
pub fn signed_set(key: &ZoneKey, records: Vec<DnsRecord>) -> Vec<DnsRecord> {
    let set = SRRset::from_records(records.clone());
    let sig = key.sign(&set);
    let mut out = records;
    out.push(sig);
    out
}

/// Sign a set but hand back records whose owner was rewritten afterwards,
/// for wildcard-synthesis fixtures: the signature stays the wildcard's.
pub fn wildcard_expanded_set(key: &ZoneKey, wildcard: &Name, owner: &Name, records: Vec<DnsRecord>) -> Vec<DnsRecord> {
    let mut source_records = records.clone();
    for record in source_records.iter_mut() {
        record.name = wildcard.clone();
    }
    let source = SRRset::from_records(source_records);
    let mut sig = key.sign(&source);
    sig.name = owner.clone();

    let mut out = records;
    for record in out.iter_mut() {
        record.name = owner.clone();
    }
    out.push(sig);
    out
}

pub fn a_record(owner: &str, address: [u8; 4]) -> DnsRecord {
    DnsRecord::new(
        name(owner),
        RecordType::A,
        RecordClass::In,
        TTL,
        address.to_vec(),
    )
}

pub fn cname_record(owner: &str, target: &str) -> DnsRecord {
    DnsRecord::new(
        name(owner),
        RecordType::Cname,
        RecordClass::In,
        TTL,
        name(target).to_wire(false),
    )
}

pub fn ns_record(owner: &str, target: &str) -> DnsRecord {
    DnsRecord::new(
        name(owner),
        RecordType::Ns,
        RecordClass::In,
        TTL,
        name(target).to_wire(false),
    )
}

pub fn soa_record(zone: &str) -> DnsRecord {
    let data = SoaData {
        mname: name(&format!("ns1.{}", zone)),
        rname: name(&format!("hostmaster.{}", zone)),
        serial: 2024080101,
        refresh: 7200,
        retry: 3600,
        expire: 1209600,
        minimum: 300,
    };
    DnsRecord::new(name(zone), RecordType::Soa, RecordClass::In, TTL, data.to_wire())
}

pub fn nsec_record(owner: &str, next: &str, types: &[RecordType]) -> DnsRecord {
    let data = NsecData {
        next_name: name(next),
        types: types.iter().map(|t| t.to_u16()).collect(),
    };
    DnsRecord::new(name(owner), RecordType::Nsec, RecordClass::In, TTL, data.to_wire())
}

/// NSEC3 fixture parameters shared by a whole test zone.
pub const NSEC3_SALT: &[u8] = &[0xAB, 0xCD];
pub const NSEC3_ITERATIONS: u16 = 10;

/// An NSEC3 record matching `owner_of` (hash-owner) with a next pointer at
/// `next_of`'s hash.
pub fn nsec3_matching(
    zone: &Name,
    owner_of: &Name,
    next_of: &Name,
    flags: u8,
    types: &[RecordType],
) -> DnsRecord {
    let owner_hash = hash_name(owner_of, NSEC3_SALT, NSEC3_ITERATIONS);
    let next_hash = hash_name(next_of, NSEC3_SALT, NSEC3_ITERATIONS);
    nsec3_raw(zone, &owner_hash, next_hash, flags, types)
}

/// An NSEC3 record that matches `owner_of` but whose span covers nothing:
/// the next hash sits immediately after the owner hash in ring order, so
/// the record cannot shadow any covering span in the same response.
pub fn nsec3_matching_only(
    zone: &Name,
    owner_of: &Name,
    flags: u8,
    types: &[RecordType],
) -> DnsRecord {
    let owner_hash = hash_name(owner_of, NSEC3_SALT, NSEC3_ITERATIONS);
    let mut next_hash = owner_hash.clone();
    next_hash.push(0x00);
    nsec3_raw(zone, &owner_hash, next_hash, flags, types)
}

/// An NSEC3 record whose hash span covers every real hash: owner at the
/// bottom of the ring, next at the top.
pub fn nsec3_covering_all(zone: &Name, flags: u8) -> DnsRecord {
    nsec3_raw(zone, &[0u8; 20], vec![0xFF; 20], flags, &[])
}

fn nsec3_raw(
    zone: &Name,
    owner_hash: &[u8],
    next_hash: Vec<u8>,
    flags: u8,
    types: &[RecordType],
) -> DnsRecord {
    let data = Nsec3Data {
        hash_algorithm: NSEC3_HASH_SHA1,
        flags,
        iterations: NSEC3_ITERATIONS,
        salt: NSEC3_SALT.to_vec(),
        next_hashed_owner: next_hash,
        types: types.iter().map(|t| t.to_u16()).collect(),
    };
    DnsRecord::new(
        zone.prepend(&encode_hash(owner_hash)),
        RecordType::Nsec3,
        RecordClass::In,
        TTL,
        data.to_wire(),
    )
}

/// Response builder in the shape the upstream would return.
pub struct ResponseBuilder {
    packet: DnsPacket,
}

impl ResponseBuilder {
    pub fn new(qname: &str, qtype: RecordType) -> Self {
        let mut packet = DnsPacket::default();
        packet.header.qr = true;
        packet.header.rd = true;
        packet.header.ra = true;
        packet.questions.push(DnsQuestion::new(
            name(qname),
            qtype,
            RecordClass::In,
        ));
        packet.edns = Some(EdnsOpt::dnssec_ok(4096));
        ResponseBuilder { packet }
    }

    pub fn rcode(mut self, rcode: u8) -> Self {
        self.packet.header.rcode = rcode;
        self
    }

    pub fn answer(mut self, records: Vec<DnsRecord>) -> Self {
        self.packet.answers.extend(records);
        self
    }

    pub fn authority(mut self, records: Vec<DnsRecord>) -> Self {
        self.packet.authorities.extend(records);
        self
    }

    pub fn build(self) -> DnsPacket {
        self.packet
    }
}

/// Canned priming resolver: responses keyed by (name, type). Unknown
/// queries answer NXDOMAIN without proofs so mistakes fail loudly.
#[derive(Default)]
pub struct MockResolver {
    responses: Mutex<HashMap<(Name, u16), DnsPacket>>,
}

impl MockResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, qname: &str, qtype: RecordType, packet: DnsPacket) {
        self.responses
            .lock()
            .insert((name(qname), qtype.to_u16()), packet);
    }
}

#[async_trait]
impl PrimingResolver for MockResolver {
    async fn send(
        &self,
        qname: Name,
        rtype: RecordType,
        _rclass: RecordClass,
    ) -> Result<DnsPacket, ResolveError> {
        if let Some(packet) = self.responses.lock().get(&(qname.clone(), rtype.to_u16())) {
            return Ok(packet.clone());
        }

        let mut fallback = DnsPacket::default();
        fallback.header.qr = true;
        fallback.header.rcode = 3;
        fallback
            .questions
            .push(DnsQuestion::new(qname, rtype, RecordClass::In));
        Ok(fallback)
    }
}

/// A fully wired signed test zone: its key, its DNSKEY response, and the
/// upstream fixtures the chain walk needs.
pub fn install_zone(resolver: &MockResolver, key: &ZoneKey) {
    let dnskey_response = ResponseBuilder::new(&key.zone.to_string(), RecordType::Dnskey)
        .answer(signed_set(key, vec![key.dnskey_record()]))
        .build();
    resolver.respond(&key.zone.to_string(), RecordType::Dnskey, dnskey_response);
}

/// Wire a delegation: the parent serves a signed DS set for the child.
pub fn install_delegation(resolver: &MockResolver, parent: &ZoneKey, child: &ZoneKey) {
    let ds_response = ResponseBuilder::new(&child.zone.to_string(), RecordType::Ds)
        .answer(signed_set(parent, vec![child.ds_record()]))
        .build();
    resolver.respond(&child.zone.to_string(), RecordType::Ds, ds_response);
}

/// Wire an insecure delegation: the parent proves with NSEC that the child
/// has NS but no DS.
pub fn install_insecure_delegation(resolver: &MockResolver, parent: &ZoneKey, child: &str) {
    let nsec = nsec_record(child, &format!("zzz.{}", parent.zone), &[RecordType::Ns]);
    let ds_response = ResponseBuilder::new(child, RecordType::Ds)
        .authority(signed_set(parent, vec![soa_record(&parent.zone.to_string())]))
        .authority(signed_set(parent, vec![nsec]))
        .build();
    resolver.respond(child, RecordType::Ds, ds_response);
}
