use super::enums::{RecordClass, RecordType};
use super::name::{read_name, Name};
use super::rdata::{self, DnskeyData, DsData, NsecData, Nsec3Data, RrsigData, SoaData};
use super::ParseError;

/// A resource record with uncompressed rdata. Embedded names are expanded at
/// parse time so rdata bytes can be compared and canonicalized directly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: Name,
    pub rtype: RecordType,
    pub rclass: RecordClass,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

/// A record as it sits on the wire, before OPT extraction and rdata
/// decompression. The packet parser decides what to do with it.
pub(crate) struct RawRecord {
    pub name: Name,
    pub rtype_value: u16,
    pub rclass_value: u16,
    pub ttl: u32,
    pub rdata_offset: usize,
    pub rdlength: usize,
}

impl RawRecord {
    pub(crate) fn read(buf: &[u8], pos: usize) -> Result<(Self, usize), ParseError> {
        let (name, pos) = read_name(buf, pos)?;
        let fixed = buf.get(pos..pos + 10).ok_or(ParseError::InvalidRecord)?;
        let rtype_value = u16::from_be_bytes([fixed[0], fixed[1]]);
        let rclass_value = u16::from_be_bytes([fixed[2], fixed[3]]);
        let ttl = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
        let rdlength = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
        let rdata_offset = pos + 10;
        if buf.len() < rdata_offset + rdlength {
            return Err(ParseError::InvalidRecord);
        }

        Ok((
            RawRecord {
                name,
                rtype_value,
                rclass_value,
                ttl,
                rdata_offset,
                rdlength,
            },
            rdata_offset + rdlength,
        ))
    }
}

impl DnsRecord {
    pub fn new(
        name: Name,
        rtype: RecordType,
        rclass: RecordClass,
        ttl: u32,
        rdata: Vec<u8>,
    ) -> Self {
        DnsRecord {
            name,
            rtype,
            rclass,
            ttl,
            rdata,
        }
    }

    pub(crate) fn from_raw(raw: &RawRecord, buf: &[u8]) -> Result<Self, ParseError> {
        let rtype = RecordType::from_u16(raw.rtype_value);
        let rdata = decompress_rdata(buf, raw.rdata_offset, raw.rdlength, rtype)?;

        Ok(DnsRecord {
            name: raw.name.clone(),
            rtype,
            rclass: RecordClass::from_u16(raw.rclass_value),
            ttl: raw.ttl,
            rdata,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), ParseError> {
        out.extend_from_slice(&self.name.to_wire(false));
        out.extend_from_slice(&self.rtype.to_u16().to_be_bytes());
        out.extend_from_slice(&self.rclass.to_u16().to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());
        let len = u16::try_from(self.rdata.len()).map_err(|_| ParseError::InvalidRecord)?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&self.rdata);
        Ok(())
    }

    pub fn rrsig(&self) -> Result<RrsigData, ParseError> {
        rdata::parse_rrsig(&self.rdata)
    }

    pub fn dnskey(&self) -> Result<DnskeyData, ParseError> {
        rdata::parse_dnskey(&self.rdata)
    }

    pub fn ds(&self) -> Result<DsData, ParseError> {
        rdata::parse_ds(&self.rdata)
    }

    pub fn nsec(&self) -> Result<NsecData, ParseError> {
        rdata::parse_nsec(&self.rdata)
    }

    pub fn nsec3(&self) -> Result<Nsec3Data, ParseError> {
        rdata::parse_nsec3(&self.rdata)
    }

    pub fn soa(&self) -> Result<SoaData, ParseError> {
        rdata::parse_soa(&self.rdata)
    }

    /// The name a CNAME, NS, PTR or DNAME record points at.
    pub fn target_name(&self) -> Result<Name, ParseError> {
        let (name, _) = read_name(&self.rdata, 0)?;
        Ok(name)
    }
}

/// Expand compression pointers inside rdata for the record types that embed
/// domain names. Everything else is copied through untouched.
fn decompress_rdata(
    buf: &[u8],
    offset: usize,
    rdlength: usize,
    rtype: RecordType,
) -> Result<Vec<u8>, ParseError> {
    let raw = &buf[offset..offset + rdlength];
    if !rtype.has_embedded_name() {
        return Ok(raw.to_vec());
    }

    let mut out = Vec::with_capacity(rdlength);
    match rtype {
        RecordType::Ns | RecordType::Cname | RecordType::Ptr | RecordType::Dname => {
            let (name, _) = read_name(buf, offset)?;
            out.extend_from_slice(&name.to_wire(false));
        }
        RecordType::Mx => {
            if rdlength < 2 {
                return Err(ParseError::InvalidRecord);
            }
            out.extend_from_slice(&raw[..2]);
            let (name, _) = read_name(buf, offset + 2)?;
            out.extend_from_slice(&name.to_wire(false));
        }
        RecordType::Soa => {
            let (mname, pos) = read_name(buf, offset)?;
            let (rname, pos) = read_name(buf, pos)?;
            let fixed = buf.get(pos..pos + 20).ok_or(ParseError::InvalidRecord)?;
            out.extend_from_slice(&mname.to_wire(false));
            out.extend_from_slice(&rname.to_wire(false));
            out.extend_from_slice(fixed);
        }
        _ => unreachable!("has_embedded_name covers the match"),
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrip() {
        let record = DnsRecord::new(
            Name::parse("host.example.com").unwrap(),
            RecordType::A,
            RecordClass::In,
            300,
            vec![192, 0, 2, 1],
        );
        let mut wire = Vec::new();
        record.write(&mut wire).unwrap();
        let (raw, next) = RawRecord::read(&wire, 0).unwrap();
        assert_eq!(next, wire.len());
        assert_eq!(DnsRecord::from_raw(&raw, &wire).unwrap(), record);
    }

    #[test]
    fn cname_rdata_decompressed() {
        // Packet: name "example.com" at 0 used as compression target for
        // a CNAME record whose rdata is a bare pointer.
        let target = Name::parse("example.com").unwrap();
        let mut buf = target.to_wire(false);
        let rec_start = buf.len();
        buf.extend_from_slice(&Name::parse("www.example.com").unwrap().to_wire(false));
        buf.extend_from_slice(&RecordType::Cname.to_u16().to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&60u32.to_be_bytes());
        buf.extend_from_slice(&2u16.to_be_bytes());
        buf.extend_from_slice(&[0xC0, 0x00]);

        let (raw, _) = RawRecord::read(&buf, rec_start).unwrap();
        let record = DnsRecord::from_raw(&raw, &buf).unwrap();
        assert_eq!(record.target_name().unwrap(), target);
        assert_eq!(record.rdata, target.to_wire(false));
    }
}
