pub mod edns;
pub mod enums;
pub mod header;
pub mod name;
pub mod question;
pub mod rdata;
pub mod record;

use tracing::trace;

use edns::EdnsOpt;
use enums::{RecordType, ResponseCode};
use header::DnsHeader;
use question::DnsQuestion;
use record::{DnsRecord, RawRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    InvalidHeader,
    InvalidLabel,
    NameTooLong,
    TooManyLabels,
    InvalidQuestionSection,
    InvalidRecord,
    Truncated,
}

impl From<std::io::Error> for ParseError {
    fn from(_: std::io::Error) -> Self {
        ParseError::Truncated
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidHeader => write!(f, "invalid DNS header"),
            ParseError::InvalidLabel => write!(f, "invalid DNS label"),
            ParseError::NameTooLong => write!(f, "DNS name too long"),
            ParseError::TooManyLabels => write!(f, "too many labels in DNS name"),
            ParseError::InvalidQuestionSection => write!(f, "invalid question section"),
            ParseError::InvalidRecord => write!(f, "invalid resource record"),
            ParseError::Truncated => write!(f, "message truncated"),
        }
    }
}

impl std::error::Error for ParseError {}

/// A parsed DNS message. The OPT pseudo-record is pulled out of the
/// additional section at parse time and re-attached on serialization.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub additionals: Vec<DnsRecord>,
    pub edns: Option<EdnsOpt>,
}

impl DnsPacket {
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        trace!("parsing DNS packet, {} bytes", buf.len());

        let header = DnsHeader::read(buf)?;
        let mut packet = DnsPacket {
            header,
            ..Default::default()
        };

        let mut pos = DnsHeader::WIRE_LEN;
        for _ in 0..packet.header.qdcount {
            let (question, next) = DnsQuestion::read(buf, pos)?;
            packet.questions.push(question);
            pos = next;
        }

        for section in 0..3 {
            let count = match section {
                0 => packet.header.ancount,
                1 => packet.header.nscount,
                _ => packet.header.arcount,
            };

            for _ in 0..count {
                let (raw, next) = RawRecord::read(buf, pos)?;
                pos = next;

                if raw.rtype_value == RecordType::Opt.to_u16() {
                    let data = buf[raw.rdata_offset..raw.rdata_offset + raw.rdlength].to_vec();
                    packet.edns = Some(EdnsOpt::from_record_fields(
                        raw.rclass_value,
                        raw.ttl,
                        data,
                    ));
                    continue;
                }

                let record = DnsRecord::from_raw(&raw, buf)?;
                match section {
                    0 => packet.answers.push(record),
                    1 => packet.authorities.push(record),
                    _ => packet.additionals.push(record),
                }
            }
        }

        Ok(packet)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut out = Vec::with_capacity(512);

        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answers.len() as u16;
        header.nscount = self.authorities.len() as u16;
        header.arcount = self.additionals.len() as u16 + self.edns.is_some() as u16;
        header.write(&mut out)?;

        for question in &self.questions {
            question.write(&mut out);
        }
        for record in self
            .answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.additionals.iter())
        {
            record.write(&mut out)?;
        }
        if let Some(edns) = &self.edns {
            edns.write(&mut out)?;
        }

        Ok(out)
    }

    pub fn question(&self) -> Option<&DnsQuestion> {
        self.questions.first()
    }

    /// Effective response code including the EDNS extended bits.
    pub fn response_code(&self) -> ResponseCode {
        let mut value = self.header.rcode as u16;
        if let Some(edns) = &self.edns {
            value |= (edns.extended_rcode as u16) << 4;
        }
        ResponseCode::from_u16(value)
    }

    /// Build a query for (name, type) with the given id. RD is always set;
    /// the caller decides the DNSSEC bits.
    pub fn query(
        id: u16,
        name: name::Name,
        qtype: RecordType,
        qclass: enums::RecordClass,
    ) -> Self {
        let mut packet = DnsPacket::default();
        packet.header.id = id;
        packet.header.rd = true;
        packet
            .questions
            .push(DnsQuestion::new(name, qtype, qclass));
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::enums::RecordClass;
    use super::name::Name;
    use super::*;

    fn sample_packet() -> DnsPacket {
        let mut packet = DnsPacket::query(
            0x1234,
            Name::parse("www.example.com").unwrap(),
            RecordType::A,
            RecordClass::In,
        );
        packet.header.qr = true;
        packet.header.ra = true;
        packet.answers.push(DnsRecord::new(
            Name::parse("www.example.com").unwrap(),
            RecordType::A,
            RecordClass::In,
            300,
            vec![192, 0, 2, 10],
        ));
        packet.edns = Some(EdnsOpt::dnssec_ok(4096));
        packet
    }

    #[test]
    fn packet_roundtrip() {
        let packet = sample_packet();
        let wire = packet.serialize().unwrap();
        let parsed = DnsPacket::parse(&wire).unwrap();
        assert_eq!(parsed.answers, packet.answers);
        assert_eq!(parsed.edns, packet.edns);
        assert_eq!(parsed.questions, packet.questions);
        assert_eq!(parsed.header.id, 0x1234);
        assert_eq!(parsed.header.ancount, 1);
        assert_eq!(parsed.header.arcount, 1);
    }

    #[test]
    fn extended_rcode() {
        let mut packet = sample_packet();
        packet.header.rcode = 1;
        packet.edns.as_mut().unwrap().extended_rcode = 1;
        assert_eq!(packet.response_code(), ResponseCode::Unknown(0x11));

        packet.edns = None;
        assert_eq!(packet.response_code(), ResponseCode::FormErr);
    }

    #[test]
    fn opt_not_in_additionals() {
        let wire = sample_packet().serialize().unwrap();
        let parsed = DnsPacket::parse(&wire).unwrap();
        assert!(parsed.additionals.is_empty());
        assert!(parsed.edns.is_some());
    }
}
