use super::enums::{RecordClass, RecordType};
use super::name::{read_name, Name};
use super::ParseError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: Name,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl DnsQuestion {
    pub fn new(name: Name, qtype: RecordType, qclass: RecordClass) -> Self {
        DnsQuestion {
            name,
            qtype,
            qclass,
        }
    }

    /// Parse one question entry at `pos`, returning it and the next offset.
    pub fn read(buf: &[u8], pos: usize) -> Result<(Self, usize), ParseError> {
        let (name, pos) = read_name(buf, pos)?;
        let fixed = buf
            .get(pos..pos + 4)
            .ok_or(ParseError::InvalidQuestionSection)?;
        let qtype = RecordType::from_u16(u16::from_be_bytes([fixed[0], fixed[1]]));
        let qclass = RecordClass::from_u16(u16::from_be_bytes([fixed[2], fixed[3]]));

        Ok((
            DnsQuestion {
                name,
                qtype,
                qclass,
            },
            pos + 4,
        ))
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.name.to_wire(false));
        out.extend_from_slice(&self.qtype.to_u16().to_be_bytes());
        out.extend_from_slice(&self.qclass.to_u16().to_be_bytes());
    }
}
