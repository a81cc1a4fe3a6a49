//! DNS messages annotated with validator state: every RRset carries a
//! security status, and the message itself carries the aggregate verdict
//! plus the reason when it is bogus.

use std::fmt;

use tracing::debug;

use crate::dns::edns::EdnsOpt;
use crate::dns::enums::{RecordClass, RecordType, ResponseCode};
use crate::dns::header::DnsHeader;
use crate::dns::name::Name;
use crate::dns::question::DnsQuestion;
use crate::dns::record::DnsRecord;
use crate::dns::DnsPacket;

/// RFC 4033 validator verdicts, plus the pre-validation state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SecurityStatus {
    #[default]
    Unchecked,
    Bogus,
    Insecure,
    Secure,
    Indeterminate,
}

impl fmt::Display for SecurityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchecked => write!(f, "UNCHECKED"),
            Self::Bogus => write!(f, "BOGUS"),
            Self::Insecure => write!(f, "INSECURE"),
            Self::Secure => write!(f, "SECURE"),
            Self::Indeterminate => write!(f, "INDETERMINATE"),
        }
    }
}

/// An RRset bundled with its covering RRSIGs and the verdict the validator
/// assigned to it. All records share owner, type and class; the effective
/// TTL is the minimum seen.
#[derive(Clone, Debug)]
pub struct SRRset {
    name: Name,
    rtype: RecordType,
    rclass: RecordClass,
    records: Vec<DnsRecord>,
    sigs: Vec<DnsRecord>,
    status: SecurityStatus,
    bogus_reason: Option<String>,
    /// Set when an RRSIG proved this set was synthesized from a wildcard;
    /// holds the closest encloser the wildcard hangs off.
    wildcard_base: Option<Name>,
}

impl SRRset {
    pub fn new(record: DnsRecord) -> Self {
        SRRset {
            name: record.name.clone(),
            rtype: record.rtype,
            rclass: record.rclass,
            records: vec![record],
            sigs: Vec::new(),
            status: SecurityStatus::Unchecked,
            bogus_reason: None,
            wildcard_base: None,
        }
    }

    pub fn from_records(records: Vec<DnsRecord>) -> Self {
        let mut set = Self::new(records[0].clone());
        set.records = records;
        set
    }

    /// A set that so far only holds a covering signature.
    fn sig_only(name: Name, rtype: RecordType, sig: DnsRecord) -> Self {
        SRRset {
            name,
            rtype,
            rclass: sig.rclass,
            records: Vec::new(),
            sigs: vec![sig],
            status: SecurityStatus::Unchecked,
            bogus_reason: None,
            wildcard_base: None,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn rtype(&self) -> RecordType {
        self.rtype
    }

    pub fn rclass(&self) -> RecordClass {
        self.rclass
    }

    /// Minimum TTL across data records and signatures.
    pub fn ttl(&self) -> u32 {
        self.records
            .iter()
            .chain(self.sigs.iter())
            .map(|r| r.ttl)
            .min()
            .unwrap_or(0)
    }

    /// True if `record` belongs in this set.
    pub fn matches(&self, record: &DnsRecord) -> bool {
        record.rtype == self.rtype && record.rclass == self.rclass && record.name == self.name
    }

    pub fn add_record(&mut self, record: DnsRecord) {
        self.records.push(record);
    }

    pub fn add_sig(&mut self, sig: DnsRecord) {
        self.sigs.push(sig);
    }

    pub fn records(&self) -> &[DnsRecord] {
        &self.records
    }

    pub fn sigs(&self) -> &[DnsRecord] {
        &self.sigs
    }

    pub fn first(&self) -> Option<&DnsRecord> {
        self.records.first()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn security(&self) -> SecurityStatus {
        self.status
    }

    pub fn set_security(&mut self, status: SecurityStatus) {
        self.status = status;
    }

    pub fn set_bogus(&mut self, reason: &str) {
        self.status = SecurityStatus::Bogus;
        self.bogus_reason = Some(reason.to_string());
        debug!("rrset {} {} bogus: {}", self.name, self.rtype, reason);
    }

    pub fn bogus_reason(&self) -> Option<&str> {
        self.bogus_reason.as_deref()
    }

    pub fn set_wildcard_base(&mut self, base: Name) {
        self.wildcard_base = Some(base);
    }

    pub fn wildcard_base(&self) -> Option<&Name> {
        self.wildcard_base.as_ref()
    }
}

/// Message sections holding validated RRsets. The question section is kept
/// as a plain question; OPT lives outside all sections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section {
    Answer,
    Authority,
    Additional,
}

impl Section {
    fn index(self) -> usize {
        match self {
            Section::Answer => 0,
            Section::Authority => 1,
            Section::Additional => 2,
        }
    }
}

/// A DNS message with validator state.
#[derive(Clone, Debug, Default)]
pub struct SMessage {
    pub header: DnsHeader,
    pub question: Option<DnsQuestion>,
    pub edns: Option<EdnsOpt>,
    sections: [Vec<SRRset>; 3],
    status: SecurityStatus,
    bogus_reason: Option<String>,
}

impl SMessage {
    /// Wrap a wire packet, grouping each section into RRsets and attaching
    /// RRSIGs to the set whose type they cover.
    pub fn from_packet(packet: &DnsPacket) -> Self {
        let mut message = SMessage {
            header: packet.header.clone(),
            question: packet.questions.first().cloned(),
            edns: packet.edns.clone(),
            ..Default::default()
        };

        for (section, records) in [
            (Section::Answer, &packet.answers),
            (Section::Authority, &packet.authorities),
            (Section::Additional, &packet.additionals),
        ] {
            for record in records {
                message.add_record(record.clone(), section);
            }
        }

        message
    }

    fn add_record(&mut self, record: DnsRecord, section: Section) {
        let sets = &mut self.sections[section.index()];

        if record.rtype == RecordType::Rrsig {
            if let Ok(rrsig) = record.rrsig() {
                if let Some(set) = sets
                    .iter_mut()
                    .find(|s| s.rtype() == rrsig.type_covered && s.name() == &record.name)
                {
                    set.add_sig(record);
                } else {
                    // Signature arrived ahead of its data; data records
                    // join the placeholder as they are seen.
                    let name = record.name.clone();
                    sets.push(SRRset::sig_only(name, rrsig.type_covered, record));
                }
                return;
            }
        }

        if let Some(set) = sets.iter_mut().find(|s| s.matches(&record)) {
            set.add_record(record);
            return;
        }

        sets.push(SRRset::new(record));
    }

    pub fn section(&self, section: Section) -> &[SRRset] {
        &self.sections[section.index()]
    }

    pub fn section_mut(&mut self, section: Section) -> &mut Vec<SRRset> {
        &mut self.sections[section.index()]
    }

    /// RRsets of one type within a section, in message order.
    pub fn rrsets_of_type(&self, section: Section, rtype: RecordType) -> Vec<&SRRset> {
        self.sections[section.index()]
            .iter()
            .filter(|s| s.rtype() == rtype)
            .collect()
    }

    pub fn find_rrset(
        &self,
        name: &Name,
        rtype: RecordType,
        rclass: RecordClass,
        section: Section,
    ) -> Option<&SRRset> {
        self.sections[section.index()]
            .iter()
            .find(|s| s.rtype() == rtype && s.rclass() == rclass && s.name() == name)
    }

    /// Answer-section match for (qname, qtype, qclass), ignoring CNAMEs.
    pub fn find_answer_rrset(
        &self,
        qname: &Name,
        qtype: RecordType,
        qclass: RecordClass,
    ) -> Option<&SRRset> {
        self.find_rrset(qname, qtype, qclass, Section::Answer)
    }

    pub fn qname(&self) -> Option<&Name> {
        self.question.as_ref().map(|q| &q.name)
    }

    pub fn qtype(&self) -> Option<RecordType> {
        self.question.as_ref().map(|q| q.qtype)
    }

    pub fn qclass(&self) -> Option<RecordClass> {
        self.question.as_ref().map(|q| q.qclass)
    }

    /// Effective response code including the EDNS extended bits.
    pub fn response_code(&self) -> ResponseCode {
        let mut value = self.header.rcode as u16;
        if let Some(edns) = &self.edns {
            value |= (edns.extended_rcode as u16) << 4;
        }
        ResponseCode::from_u16(value)
    }

    /// Record count for a section, signatures included.
    pub fn count(&self, section: Section) -> usize {
        self.sections[section.index()]
            .iter()
            .map(|s| s.size() + s.sigs().len())
            .sum()
    }

    pub fn security(&self) -> SecurityStatus {
        self.status
    }

    pub fn set_security(&mut self, status: SecurityStatus) {
        self.status = status;
    }

    pub fn set_bogus(&mut self, reason: &str) {
        self.set_security_reason(SecurityStatus::Bogus, reason);
    }

    /// Stamp a verdict together with a reason token. Downgrades to
    /// insecure carry reasons too, not just bogus outcomes.
    pub fn set_security_reason(&mut self, status: SecurityStatus, reason: &str) {
        self.status = status;
        self.bogus_reason = Some(reason.to_string());
        debug!("message {}: {}", status, reason);
    }

    pub fn bogus_reason(&self) -> Option<&str> {
        self.bogus_reason.as_deref()
    }

    /// Rebuild a wire packet: all records and signatures in section order,
    /// the question and OPT re-attached, flags preserved.
    pub fn to_packet(&self) -> DnsPacket {
        let mut packet = DnsPacket {
            header: self.header.clone(),
            edns: self.edns.clone(),
            ..Default::default()
        };
        if let Some(question) = &self.question {
            packet.questions.push(question.clone());
        }

        for (section, out) in [
            (Section::Answer, 0usize),
            (Section::Authority, 1),
            (Section::Additional, 2),
        ] {
            for set in self.section(section) {
                let records = set.records().iter().chain(set.sigs().iter()).cloned();
                match out {
                    0 => packet.answers.extend(records),
                    1 => packet.authorities.extend(records),
                    _ => packet.additionals.extend(records),
                }
            }
        }

        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::RrsigData;

    fn a_record(name: &str, ttl: u32) -> DnsRecord {
        DnsRecord::new(
            Name::parse(name).unwrap(),
            RecordType::A,
            RecordClass::In,
            ttl,
            vec![192, 0, 2, 1],
        )
    }

    fn rrsig_record(name: &str, covered: RecordType) -> DnsRecord {
        let data = RrsigData {
            type_covered: covered,
            algorithm: 15,
            labels: 2,
            original_ttl: 300,
            expiration: 2_000_000_000,
            inception: 1_000_000_000,
            key_tag: 1,
            signer_name: Name::parse("example.com").unwrap(),
            signature: vec![0; 64],
        };
        DnsRecord::new(
            Name::parse(name).unwrap(),
            RecordType::Rrsig,
            RecordClass::In,
            300,
            data.to_wire(),
        )
    }

    #[test]
    fn groups_rrsets_and_sigs() {
        let mut packet = DnsPacket::default();
        packet.answers.push(a_record("www.example.com", 300));
        packet.answers.push(a_record("www.example.com", 120));
        packet
            .answers
            .push(rrsig_record("www.example.com", RecordType::A));

        let message = SMessage::from_packet(&packet);
        let sets = message.section(Section::Answer);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].size(), 2);
        assert_eq!(sets[0].sigs().len(), 1);
        assert_eq!(sets[0].ttl(), 120);
    }

    #[test]
    fn sig_before_data() {
        let mut packet = DnsPacket::default();
        packet
            .answers
            .push(rrsig_record("www.example.com", RecordType::A));
        packet.answers.push(a_record("www.example.com", 300));

        let message = SMessage::from_packet(&packet);
        let sets = message.section(Section::Answer);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].size(), 1);
        assert_eq!(sets[0].sigs().len(), 1);
    }

    #[test]
    fn packet_rebuild_preserves_counts() {
        let mut packet = DnsPacket::default();
        packet.header.rcode = 3;
        packet.answers.push(a_record("a.example.com", 60));
        packet
            .answers
            .push(rrsig_record("a.example.com", RecordType::A));

        let message = SMessage::from_packet(&packet);
        let rebuilt = message.to_packet();
        assert_eq!(rebuilt.answers.len(), 2);
        assert_eq!(rebuilt.header.rcode, 3);
    }
}
