use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::ParseError;

/// Maximum length of a DNS name in wire form (RFC 1035).
pub const MAX_NAME_LEN: usize = 255;
/// Maximum length of a single label.
pub const MAX_LABEL_LEN: usize = 63;

/// A DNS name as an ordered sequence of labels, root-to-leaf excluded:
/// `www.example.com.` is stored as `["www", "example", "com"]` and the root
/// name is the empty sequence.
///
/// Equality and hashing are case-insensitive. Ordering uses the canonical
/// DNS name order of RFC 4034 section 6.1 (compare labels right to left,
/// bytewise on the lowercased form).
#[derive(Clone, Debug, Default)]
pub struct Name {
    labels: Vec<String>,
}

impl Name {
    /// The root name (zero labels).
    pub fn root() -> Self {
        Name { labels: Vec::new() }
    }

    pub fn from_labels(labels: Vec<String>) -> Self {
        Name { labels }
    }

    /// Parse a presentation-format name. A trailing dot is accepted and
    /// ignored; the empty string and `"."` both yield the root name.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let trimmed = s.strip_suffix('.').unwrap_or(s);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let labels: Vec<String> = trimmed.split('.').map(|l| l.to_string()).collect();
        for label in &labels {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(ParseError::InvalidLabel);
            }
        }

        let name = Name { labels };
        if name.wire_len() > MAX_NAME_LEN {
            return Err(ParseError::NameTooLong);
        }

        Ok(name)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of labels, excluding the root.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Length of the uncompressed wire encoding, including the root octet.
    pub fn wire_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }

    /// The name with the leftmost label removed; the root name stays root.
    pub fn parent(&self) -> Name {
        if self.labels.is_empty() {
            Self::root()
        } else {
            Name {
                labels: self.labels[1..].to_vec(),
            }
        }
    }

    /// The rightmost `count` labels of this name.
    pub fn suffix(&self, count: usize) -> Name {
        let keep = count.min(self.labels.len());
        Name {
            labels: self.labels[self.labels.len() - keep..].to_vec(),
        }
    }

    /// True if `self` is equal to or a descendant of `other`.
    pub fn is_subdomain_of(&self, other: &Name) -> bool {
        if other.labels.len() > self.labels.len() {
            return false;
        }
        self.suffix(other.labels.len()) == *other
    }

    /// True if `self` is a strict descendant of `other`.
    pub fn is_strict_subdomain_of(&self, other: &Name) -> bool {
        self.labels.len() > other.labels.len() && self.is_subdomain_of(other)
    }

    /// The longest common suffix of the two names (possibly the root).
    pub fn common_ancestor(&self, other: &Name) -> Name {
        let mut shared = 0;
        let max = self.labels.len().min(other.labels.len());
        while shared < max {
            let a = &self.labels[self.labels.len() - 1 - shared];
            let b = &other.labels[other.labels.len() - 1 - shared];
            if !a.eq_ignore_ascii_case(b) {
                break;
            }
            shared += 1;
        }

        self.suffix(shared)
    }

    /// Prepend the wildcard label: `example.com.` becomes `*.example.com.`
    pub fn to_wildcard(&self) -> Name {
        let mut labels = Vec::with_capacity(self.labels.len() + 1);
        labels.push("*".to_string());
        labels.extend(self.labels.iter().cloned());
        Name { labels }
    }

    pub fn is_wildcard(&self) -> bool {
        self.labels.first().map(|l| l.as_str()) == Some("*")
    }

    /// Prepend a single label.
    pub fn prepend(&self, label: &str) -> Name {
        let mut labels = Vec::with_capacity(self.labels.len() + 1);
        labels.push(label.to_string());
        labels.extend(self.labels.iter().cloned());
        Name { labels }
    }

    /// Lowercased copy, the canonical form used in signed data.
    pub fn to_lowercase(&self) -> Name {
        Name {
            labels: self.labels.iter().map(|l| l.to_lowercase()).collect(),
        }
    }

    /// Uncompressed wire encoding. Canonical form (RFC 4034 section 6.2)
    /// lowercases every label.
    pub fn to_wire(&self, canonical: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        for label in &self.labels {
            out.push(label.len() as u8);
            if canonical {
                out.extend(label.bytes().map(|b| b.to_ascii_lowercase()));
            } else {
                out.extend_from_slice(label.as_bytes());
            }
        }
        out.push(0);
        out
    }

    /// Canonical DNS name ordering per RFC 4034 section 6.1: sort by label
    /// from the rightmost, each label compared as lowercased byte strings.
    pub fn canonical_cmp(&self, other: &Name) -> Ordering {
        let mut a = self.labels.iter().rev();
        let mut b = other.labels.iter().rev();
        loop {
            match (a.next(), b.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(la), Some(lb)) => {
                    let la = la.as_bytes().iter().map(u8::to_ascii_lowercase);
                    let lb = lb.as_bytes().iter().map(u8::to_ascii_lowercase);
                    match la.cmp(lb) {
                        Ordering::Equal => continue,
                        unequal => return unequal,
                    }
                }
            }
        }
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(other.labels.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for label in &self.labels {
            for b in label.as_bytes() {
                state.write_u8(b.to_ascii_lowercase());
            }
            state.write_u8(0);
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return write!(f, ".");
        }
        for label in &self.labels {
            write!(f, "{}.", label)?;
        }
        Ok(())
    }
}

/// Read a possibly-compressed name from `buf` starting at `pos`. Returns the
/// name and the position just past it in the original (unjumped) stream.
pub fn read_name(buf: &[u8], pos: usize) -> Result<(Name, usize), ParseError> {
    let mut labels = Vec::new();
    let mut cursor = pos;
    let mut end = None;
    let mut jumps = 0;

    loop {
        let len = *buf.get(cursor).ok_or(ParseError::InvalidLabel)? as usize;

        if len == 0 {
            cursor += 1;
            break;
        }

        if len & 0xC0 == 0xC0 {
            let second = *buf.get(cursor + 1).ok_or(ParseError::InvalidLabel)? as usize;
            let target = ((len & 0x3F) << 8) | second;
            if end.is_none() {
                end = Some(cursor + 2);
            }
            // Pointers must go backwards; caps malicious loops as well.
            if target >= cursor {
                return Err(ParseError::InvalidLabel);
            }
            jumps += 1;
            if jumps > 32 {
                return Err(ParseError::InvalidLabel);
            }
            cursor = target;
            continue;
        }

        if len > MAX_LABEL_LEN {
            return Err(ParseError::InvalidLabel);
        }

        let bytes = buf
            .get(cursor + 1..cursor + 1 + len)
            .ok_or(ParseError::InvalidLabel)?;
        let label = String::from_utf8_lossy(bytes).into_owned();
        labels.push(label);
        cursor += 1 + len;

        if labels.len() > 128 {
            return Err(ParseError::TooManyLabels);
        }
    }

    let name = Name { labels };
    if name.wire_len() > MAX_NAME_LEN {
        return Err(ParseError::NameTooLong);
    }

    Ok((name, end.unwrap_or(cursor)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let name = Name::parse("www.Example.COM.").unwrap();
        assert_eq!(name.label_count(), 3);
        assert_eq!(name.to_string(), "www.Example.COM.");
        assert_eq!(Name::parse(".").unwrap(), Name::root());
        assert_eq!(Name::root().to_string(), ".");
    }

    #[test]
    fn case_insensitive_equality() {
        let a = Name::parse("example.com").unwrap();
        let b = Name::parse("EXAMPLE.Com.").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn subdomain_relations() {
        let zone = Name::parse("example.com").unwrap();
        let host = Name::parse("a.b.example.com").unwrap();
        assert!(host.is_subdomain_of(&zone));
        assert!(host.is_strict_subdomain_of(&zone));
        assert!(zone.is_subdomain_of(&zone));
        assert!(!zone.is_strict_subdomain_of(&zone));
        assert!(!zone.is_subdomain_of(&host));
        assert!(host.is_subdomain_of(&Name::root()));
    }

    #[test]
    fn common_ancestor() {
        let a = Name::parse("a.b.example.com").unwrap();
        let b = Name::parse("z.example.com").unwrap();
        assert_eq!(
            a.common_ancestor(&b),
            Name::parse("example.com").unwrap()
        );
        let unrelated = Name::parse("example.org").unwrap();
        assert_eq!(a.common_ancestor(&unrelated), Name::root());
    }

    #[test]
    fn wildcard_derivation() {
        let zone = Name::parse("example.com").unwrap();
        let wc = zone.to_wildcard();
        assert_eq!(wc.to_string(), "*.example.com.");
        assert!(wc.is_wildcard());
        assert!(!zone.is_wildcard());
    }

    #[test]
    fn canonical_ordering() {
        // Example ordering from RFC 4034 section 6.1.
        let ordered = [
            "example.",
            "a.example.",
            "yljkjljk.a.example.",
            "Z.a.example.",
            "zABC.a.EXAMPLE.",
            "z.example.",
        ];
        for pair in ordered.windows(2) {
            let a = Name::parse(pair[0]).unwrap();
            let b = Name::parse(pair[1]).unwrap();
            assert_eq!(a.canonical_cmp(&b), Ordering::Less, "{} < {}", a, b);
        }
    }

    #[test]
    fn wire_roundtrip() {
        let name = Name::parse("www.example.com").unwrap();
        let wire = name.to_wire(false);
        let (parsed, next) = read_name(&wire, 0).unwrap();
        assert_eq!(parsed, name);
        assert_eq!(next, wire.len());
    }

    #[test]
    fn compressed_name() {
        // "example.com" at offset 0, "www" + pointer to 0 at offset 13.
        let mut buf = Name::parse("example.com").unwrap().to_wire(false);
        let ptr_at = buf.len();
        buf.extend_from_slice(&[3, b'w', b'w', b'w', 0xC0, 0x00]);
        let (parsed, next) = read_name(&buf, ptr_at).unwrap();
        assert_eq!(parsed, Name::parse("www.example.com").unwrap());
        assert_eq!(next, buf.len());
    }

    #[test]
    fn rejects_pointer_loops() {
        let buf = [0xC0, 0x00];
        assert!(read_name(&buf, 0).is_err());
    }
}
