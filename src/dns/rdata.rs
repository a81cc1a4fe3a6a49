//! Typed views over raw rdata for the record types the validator inspects.
//! Parsing is strict about lengths; anything short is a malformed record.

use super::enums::RecordType;
use super::name::{read_name, Name};
use super::ParseError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RrsigData {
    pub type_covered: RecordType,
    pub algorithm: u8,
    pub labels: u8,
    pub original_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer_name: Name,
    pub signature: Vec<u8>,
}

impl RrsigData {
    /// The RRSIG rdata without the signature field, as it participates in
    /// the signed data. The signer name is written in canonical (lowercase,
    /// uncompressed) form.
    pub fn to_presignature_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(18 + self.signer_name.wire_len());
        out.extend_from_slice(&self.type_covered.to_u16().to_be_bytes());
        out.push(self.algorithm);
        out.push(self.labels);
        out.extend_from_slice(&self.original_ttl.to_be_bytes());
        out.extend_from_slice(&self.expiration.to_be_bytes());
        out.extend_from_slice(&self.inception.to_be_bytes());
        out.extend_from_slice(&self.key_tag.to_be_bytes());
        out.extend_from_slice(&self.signer_name.to_wire(true));
        out
    }

    /// Full rdata encoding, used when building fixture records.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = self.to_presignature_wire();
        out.extend_from_slice(&self.signature);
        out
    }
}

pub fn parse_rrsig(rdata: &[u8]) -> Result<RrsigData, ParseError> {
    if rdata.len() < 18 {
        return Err(ParseError::InvalidRecord);
    }

    let (signer_name, sig_start) = read_name(rdata, 18)?;

    Ok(RrsigData {
        type_covered: RecordType::from_u16(u16::from_be_bytes([rdata[0], rdata[1]])),
        algorithm: rdata[2],
        labels: rdata[3],
        original_ttl: u32::from_be_bytes([rdata[4], rdata[5], rdata[6], rdata[7]]),
        expiration: u32::from_be_bytes([rdata[8], rdata[9], rdata[10], rdata[11]]),
        inception: u32::from_be_bytes([rdata[12], rdata[13], rdata[14], rdata[15]]),
        key_tag: u16::from_be_bytes([rdata[16], rdata[17]]),
        signer_name,
        signature: rdata[sig_start..].to_vec(),
    })
}

/// DNSKEY flag bit for "zone key" (RFC 4034 section 2.1.1).
pub const DNSKEY_FLAG_ZONE: u16 = 0x0100;
/// DNSKEY flag bit for "secure entry point".
pub const DNSKEY_FLAG_SEP: u16 = 0x0001;
/// DNSKEY flag bit for "revoked" (RFC 5011).
pub const DNSKEY_FLAG_REVOKE: u16 = 0x0080;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnskeyData {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    pub public_key: Vec<u8>,
}

impl DnskeyData {
    pub fn is_zone_key(&self) -> bool {
        self.flags & DNSKEY_FLAG_ZONE != 0
    }

    pub fn is_revoked(&self) -> bool {
        self.flags & DNSKEY_FLAG_REVOKE != 0
    }

    pub fn is_sep(&self) -> bool {
        self.flags & DNSKEY_FLAG_SEP != 0
    }

    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.public_key.len());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.push(self.protocol);
        out.push(self.algorithm);
        out.extend_from_slice(&self.public_key);
        out
    }
}

pub fn parse_dnskey(rdata: &[u8]) -> Result<DnskeyData, ParseError> {
    if rdata.len() < 4 {
        return Err(ParseError::InvalidRecord);
    }

    Ok(DnskeyData {
        flags: u16::from_be_bytes([rdata[0], rdata[1]]),
        protocol: rdata[2],
        algorithm: rdata[3],
        public_key: rdata[4..].to_vec(),
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DsData {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

impl DsData {
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.digest.len());
        out.extend_from_slice(&self.key_tag.to_be_bytes());
        out.push(self.algorithm);
        out.push(self.digest_type);
        out.extend_from_slice(&self.digest);
        out
    }
}

pub fn parse_ds(rdata: &[u8]) -> Result<DsData, ParseError> {
    if rdata.len() < 4 {
        return Err(ParseError::InvalidRecord);
    }

    Ok(DsData {
        key_tag: u16::from_be_bytes([rdata[0], rdata[1]]),
        algorithm: rdata[2],
        digest_type: rdata[3],
        digest: rdata[4..].to_vec(),
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NsecData {
    pub next_name: Name,
    pub types: Vec<u16>,
}

impl NsecData {
    pub fn has_type(&self, rtype: RecordType) -> bool {
        self.types.contains(&rtype.to_u16())
    }

    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = self.next_name.to_wire(false);
        out.extend_from_slice(&encode_type_bitmap(&self.types));
        out
    }
}

pub fn parse_nsec(rdata: &[u8]) -> Result<NsecData, ParseError> {
    let (next_name, pos) = read_name(rdata, 0)?;
    let types = parse_type_bitmap(&rdata[pos..])?;
    Ok(NsecData { next_name, types })
}

/// NSEC3 opt-out flag (RFC 5155 section 3.1.2).
pub const NSEC3_FLAG_OPT_OUT: u8 = 0x01;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nsec3Data {
    pub hash_algorithm: u8,
    pub flags: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
    pub next_hashed_owner: Vec<u8>,
    pub types: Vec<u16>,
}

impl Nsec3Data {
    pub fn opt_out(&self) -> bool {
        self.flags & NSEC3_FLAG_OPT_OUT != 0
    }

    pub fn has_type(&self, rtype: RecordType) -> bool {
        self.types.contains(&rtype.to_u16())
    }

    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.hash_algorithm);
        out.push(self.flags);
        out.extend_from_slice(&self.iterations.to_be_bytes());
        out.push(self.salt.len() as u8);
        out.extend_from_slice(&self.salt);
        out.push(self.next_hashed_owner.len() as u8);
        out.extend_from_slice(&self.next_hashed_owner);
        out.extend_from_slice(&encode_type_bitmap(&self.types));
        out
    }
}

pub fn parse_nsec3(rdata: &[u8]) -> Result<Nsec3Data, ParseError> {
    if rdata.len() < 5 {
        return Err(ParseError::InvalidRecord);
    }

    let hash_algorithm = rdata[0];
    let flags = rdata[1];
    let iterations = u16::from_be_bytes([rdata[2], rdata[3]]);
    let salt_len = rdata[4] as usize;
    let salt_end = 5 + salt_len;
    let salt = rdata
        .get(5..salt_end)
        .ok_or(ParseError::InvalidRecord)?
        .to_vec();

    let hash_len = *rdata.get(salt_end).ok_or(ParseError::InvalidRecord)? as usize;
    let hash_end = salt_end + 1 + hash_len;
    let next_hashed_owner = rdata
        .get(salt_end + 1..hash_end)
        .ok_or(ParseError::InvalidRecord)?
        .to_vec();

    let types = parse_type_bitmap(&rdata[hash_end..])?;

    Ok(Nsec3Data {
        hash_algorithm,
        flags,
        iterations,
        salt,
        next_hashed_owner,
        types,
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoaData {
    pub mname: Name,
    pub rname: Name,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl SoaData {
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = self.mname.to_wire(false);
        out.extend_from_slice(&self.rname.to_wire(false));
        out.extend_from_slice(&self.serial.to_be_bytes());
        out.extend_from_slice(&self.refresh.to_be_bytes());
        out.extend_from_slice(&self.retry.to_be_bytes());
        out.extend_from_slice(&self.expire.to_be_bytes());
        out.extend_from_slice(&self.minimum.to_be_bytes());
        out
    }
}

pub fn parse_soa(rdata: &[u8]) -> Result<SoaData, ParseError> {
    let (mname, pos) = read_name(rdata, 0)?;
    let (rname, pos) = read_name(rdata, pos)?;
    let fixed = rdata.get(pos..pos + 20).ok_or(ParseError::InvalidRecord)?;

    Ok(SoaData {
        mname,
        rname,
        serial: u32::from_be_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]),
        refresh: u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]),
        retry: u32::from_be_bytes([fixed[8], fixed[9], fixed[10], fixed[11]]),
        expire: u32::from_be_bytes([fixed[12], fixed[13], fixed[14], fixed[15]]),
        minimum: u32::from_be_bytes([fixed[16], fixed[17], fixed[18], fixed[19]]),
    })
}

/// Decode an RFC 4034 section 4.1.2 type bitmap into a sorted list of type
/// codes.
pub fn parse_type_bitmap(mut data: &[u8]) -> Result<Vec<u16>, ParseError> {
    let mut types = Vec::new();

    while !data.is_empty() {
        if data.len() < 2 {
            return Err(ParseError::InvalidRecord);
        }
        let window = data[0] as u16;
        let len = data[1] as usize;
        if len == 0 || len > 32 || data.len() < 2 + len {
            return Err(ParseError::InvalidRecord);
        }

        for (octet_index, octet) in data[2..2 + len].iter().enumerate() {
            for bit in 0..8 {
                if octet & (0x80 >> bit) != 0 {
                    types.push(window * 256 + (octet_index as u16) * 8 + bit as u16);
                }
            }
        }

        data = &data[2 + len..];
    }

    Ok(types)
}

/// Encode a list of type codes as an RFC 4034 type bitmap.
pub fn encode_type_bitmap(types: &[u16]) -> Vec<u8> {
    let mut sorted: Vec<u16> = types.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out = Vec::new();
    let mut window_start = 0;
    while window_start < sorted.len() {
        let window = sorted[window_start] / 256;
        let mut octets = [0u8; 32];
        let mut max_octet = 0;
        let mut index = window_start;
        while index < sorted.len() && sorted[index] / 256 == window {
            let within = sorted[index] % 256;
            let octet = (within / 8) as usize;
            octets[octet] |= 0x80 >> (within % 8);
            max_octet = max_octet.max(octet);
            index += 1;
        }

        out.push(window as u8);
        out.push((max_octet + 1) as u8);
        out.extend_from_slice(&octets[..=max_octet]);
        window_start = index;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_bitmap_roundtrip() {
        let types = vec![1u16, 2, 6, 15, 46, 47, 257];
        let wire = encode_type_bitmap(&types);
        assert_eq!(parse_type_bitmap(&wire).unwrap(), types);
    }

    #[test]
    fn empty_bitmap() {
        assert!(parse_type_bitmap(&[]).unwrap().is_empty());
        assert!(encode_type_bitmap(&[]).is_empty());
    }

    #[test]
    fn rrsig_roundtrip() {
        let rrsig = RrsigData {
            type_covered: RecordType::A,
            algorithm: 15,
            labels: 2,
            original_ttl: 3600,
            expiration: 1_700_086_400,
            inception: 1_700_000_000,
            key_tag: 34217,
            signer_name: Name::parse("example.com").unwrap(),
            signature: vec![0xAB; 64],
        };
        let parsed = parse_rrsig(&rrsig.to_wire()).unwrap();
        assert_eq!(parsed, rrsig);
    }

    #[test]
    fn nsec3_roundtrip() {
        let nsec3 = Nsec3Data {
            hash_algorithm: 1,
            flags: NSEC3_FLAG_OPT_OUT,
            iterations: 10,
            salt: vec![0xAA, 0xBB],
            next_hashed_owner: vec![0x11; 20],
            types: vec![1, 2, 6],
        };
        let parsed = parse_nsec3(&nsec3.to_wire()).unwrap();
        assert_eq!(parsed, nsec3);
        assert!(parsed.opt_out());
    }

    #[test]
    fn soa_roundtrip() {
        let soa = SoaData {
            mname: Name::parse("ns1.example.com").unwrap(),
            rname: Name::parse("hostmaster.example.com").unwrap(),
            serial: 2024010101,
            refresh: 7200,
            retry: 3600,
            expire: 1209600,
            minimum: 300,
        };
        assert_eq!(parse_soa(&soa.to_wire()).unwrap(), soa);
    }
}
