use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};

use super::ParseError;

/// The fixed 12-byte DNS header. Unlike a plain forwarder we track the
/// AD and CD bits individually; the validator owns them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: bool,
    pub ad: bool,
    pub cd: bool,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl DnsHeader {
    pub const WIRE_LEN: usize = 12;

    pub fn read(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(ParseError::InvalidHeader);
        }

        let mut reader = BitReader::<_, BigEndian>::new(buf);
        let mut header = DnsHeader {
            id: reader.read::<u16>(16)?,
            qr: reader.read::<u8>(1)? == 1,
            opcode: reader.read::<u8>(4)?,
            aa: reader.read::<u8>(1)? == 1,
            tc: reader.read::<u8>(1)? == 1,
            rd: reader.read::<u8>(1)? == 1,
            ra: reader.read::<u8>(1)? == 1,
            z: reader.read::<u8>(1)? == 1,
            ad: reader.read::<u8>(1)? == 1,
            cd: reader.read::<u8>(1)? == 1,
            rcode: reader.read::<u8>(4)?,
            ..Default::default()
        };
        header.qdcount = reader.read::<u16>(16)?;
        header.ancount = reader.read::<u16>(16)?;
        header.nscount = reader.read::<u16>(16)?;
        header.arcount = reader.read::<u16>(16)?;

        Ok(header)
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), ParseError> {
        let mut writer = BitWriter::<_, BigEndian>::new(out);
        writer.write::<u16>(16, self.id)?;
        writer.write::<u8>(1, self.qr as u8)?;
        writer.write::<u8>(4, self.opcode)?;
        writer.write::<u8>(1, self.aa as u8)?;
        writer.write::<u8>(1, self.tc as u8)?;
        writer.write::<u8>(1, self.rd as u8)?;
        writer.write::<u8>(1, self.ra as u8)?;
        writer.write::<u8>(1, self.z as u8)?;
        writer.write::<u8>(1, self.ad as u8)?;
        writer.write::<u8>(1, self.cd as u8)?;
        writer.write::<u8>(4, self.rcode)?;
        writer.write::<u16>(16, self.qdcount)?;
        writer.write::<u16>(16, self.ancount)?;
        writer.write::<u16>(16, self.nscount)?;
        writer.write::<u16>(16, self.arcount)?;
        Ok(())
    }
}
