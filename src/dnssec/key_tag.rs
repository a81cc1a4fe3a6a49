use crate::dns::rdata::DnskeyData;

/// Key tag of a DNSKEY (RFC 4034 Appendix B): a 16-bit ones-complement-ish
/// checksum over the rdata, with the RSAMD5 special case using the low 16
/// bits of the modulus.
pub fn key_tag(key: &DnskeyData) -> u16 {
    if key.algorithm == 1 {
        let pk = &key.public_key;
        if pk.len() >= 3 {
            return u16::from_be_bytes([pk[pk.len() - 3], pk[pk.len() - 2]]);
        }
        return 0;
    }

    let rdata = key.to_wire();
    let mut accumulator: u32 = 0;
    for (i, &byte) in rdata.iter().enumerate() {
        if i % 2 == 0 {
            accumulator += u32::from(byte) << 8;
        } else {
            accumulator += u32::from(byte);
        }
    }

    accumulator += accumulator >> 16;
    (accumulator & 0xFFFF) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // RFC 4034 Appendix B example DNSKEY (RSASHA1, flags 256).
        let public_key = base64_decode(
            "AQOeiiR0GOMYkDshWoSKz9XzfwJr1AYtsmx3TGkJaNXVbfi/2pHm822aJ5iI9BMzNXxeYCmZ\
             DRD99WYwYqUSdjMmmAphXdvxegXd/M5+X7OrzKBaMbCVdFLUUh6DhweJBjEVv5f2wwjM9Xzc\
             nOf+EPbtG9DMBmADjFDc2w/rljwvFw==",
        );
        let key = DnskeyData {
            flags: 256,
            protocol: 3,
            algorithm: 5,
            public_key,
        };
        assert_eq!(key_tag(&key), 60485);
    }

    #[test]
    fn rsamd5_uses_modulus_tail() {
        let key = DnskeyData {
            flags: 257,
            protocol: 3,
            algorithm: 1,
            public_key: vec![0x01, 0x02, 0x12, 0x34, 0x56],
        };
        assert_eq!(key_tag(&key), 0x1234);
    }

    fn base64_decode(data: &str) -> Vec<u8> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .unwrap()
    }
}
