//! DNS wire format views (RFC 1035). Parses only what the forwarder
//! needs: the header, the single question, and the answer section.
//! Input bytes are untrusted and never mutated; all access is
//! bounds-checked and malformed input surfaces as a recoverable error.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

pub const HEADER_LEN: usize = 12;
/// RFC 1035 §2.3.4: a name occupies at most 255 octets on the wire.
pub const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;
/// Upper bound on pointer dereferences while decoding one name. The
/// effective bound is min(this, packet length).
const MAX_POINTER_JUMPS: usize = 128;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DnsParseError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("packet truncated at offset {0}")]
    Truncated(usize),
    #[error("expected exactly one question, found {0}")]
    BadQuestionCount(u16),
    #[error("invalid name label at offset {0}")]
    InvalidLabel(usize),
    #[error("name exceeds 255 bytes")]
    NameTooLong,
    #[error("compression pointer out of range at offset {0}")]
    PointerOutOfRange(usize),
    #[error("name compression loop detected")]
    CompressionLoop,
    #[error("record data overruns packet at offset {0}")]
    RdataOverrun(usize),
}

/// Parsed DNS header (12 bytes).
#[derive(Debug, Clone)]
pub struct Header {
    pub id: u16,
    pub flags: u16,
    pub qd_count: u16,
    pub an_count: u16,
    pub ns_count: u16,
    pub ar_count: u16,
}

impl Header {
    pub fn parse(buf: &[u8]) -> Result<Self, DnsParseError> {
        if buf.len() < HEADER_LEN {
            return Err(DnsParseError::TooShort(buf.len()));
        }
        Ok(Self {
            id: u16::from_be_bytes([buf[0], buf[1]]),
            flags: u16::from_be_bytes([buf[2], buf[3]]),
            qd_count: u16::from_be_bytes([buf[4], buf[5]]),
            an_count: u16::from_be_bytes([buf[6], buf[7]]),
            ns_count: u16::from_be_bytes([buf[8], buf[9]]),
            ar_count: u16::from_be_bytes([buf[10], buf[11]]),
        })
    }

    pub fn is_response(&self) -> bool {
        self.flags & 0x8000 != 0
    }
    pub fn is_authoritative(&self) -> bool {
        self.flags & 0x0400 != 0
    }
    pub fn rcode(&self) -> u8 {
        (self.flags & 0xF) as u8
    }
}

/// Record types the engine specifically understands. A and AAAA carry
/// address literals the block policy inspects; the rest are walked as
/// opaque RDATA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    SOA,
    MX,
    TXT,
    AAAA,
    HTTPS,
    Unknown(u16),
}

impl RecordType {
    pub fn from_u16(val: u16) -> Self {
        match val {
            1 => Self::A,
            2 => Self::NS,
            5 => Self::CNAME,
            6 => Self::SOA,
            15 => Self::MX,
            16 => Self::TXT,
            28 => Self::AAAA,
            65 => Self::HTTPS,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::A => 1,
            Self::NS => 2,
            Self::CNAME => 5,
            Self::SOA => 6,
            Self::MX => 15,
            Self::TXT => 16,
            Self::AAAA => 28,
            Self::HTTPS => 65,
            Self::Unknown(v) => v,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::NS => write!(f, "NS"),
            Self::CNAME => write!(f, "CNAME"),
            Self::SOA => write!(f, "SOA"),
            Self::MX => write!(f, "MX"),
            Self::TXT => write!(f, "TXT"),
            Self::AAAA => write!(f, "AAAA"),
            Self::HTTPS => write!(f, "HTTPS"),
            Self::Unknown(v) => write!(f, "TYPE{}", v),
        }
    }
}

/// A DNS name as a sequence of raw label byte strings. Labels are kept
/// exactly as they appear on the wire; non-ASCII bytes are preserved and
/// only lowercased (ASCII-wise) when building the canonical cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    labels: Vec<Vec<u8>>,
}

impl Name {
    /// Decode a name starting at `start`, following compression pointers.
    /// Returns the name and the offset just past its in-place encoding
    /// (past the first pointer if the name was compressed).
    pub fn parse(buf: &[u8], start: usize) -> Result<(Self, usize), DnsParseError> {
        let mut labels: Vec<Vec<u8>> = Vec::new();
        // Octets the name would occupy uncompressed, including the root byte.
        let mut wire_len = 1usize;
        let mut offset = start;
        let mut end = None;
        let mut jumps = 0usize;
        let max_jumps = MAX_POINTER_JUMPS.min(buf.len());

        loop {
            let len_byte = *buf.get(offset).ok_or(DnsParseError::Truncated(offset))?;

            match len_byte {
                0 => {
                    return Ok((Self { labels }, end.unwrap_or(offset + 1)));
                }
                l if l & 0xC0 == 0xC0 => {
                    let lo = *buf
                        .get(offset + 1)
                        .ok_or(DnsParseError::Truncated(offset + 1))?;
                    let target = (((l & 0x3F) as usize) << 8) | lo as usize;
                    if target >= buf.len() {
                        return Err(DnsParseError::PointerOutOfRange(offset));
                    }
                    if end.is_none() {
                        end = Some(offset + 2);
                    }
                    jumps += 1;
                    if jumps > max_jumps {
                        return Err(DnsParseError::CompressionLoop);
                    }
                    offset = target;
                }
                l if l & 0xC0 != 0 => {
                    // 0b01/0b10 label types are not in RFC 1035
                    return Err(DnsParseError::InvalidLabel(offset));
                }
                l => {
                    let len = l as usize;
                    let label_start = offset + 1;
                    let label_end = label_start + len;
                    if label_end > buf.len() {
                        return Err(DnsParseError::Truncated(offset));
                    }
                    wire_len += 1 + len;
                    if wire_len > MAX_NAME_LEN {
                        return Err(DnsParseError::NameTooLong);
                    }
                    labels.push(buf[label_start..label_end].to_vec());
                    offset = label_end;
                }
            }
        }
    }

    pub fn labels(&self) -> &[Vec<u8>] {
        &self.labels
    }

    /// Append the uncompressed wire encoding, optionally lowercasing
    /// ASCII letters (used for the canonical cache key).
    fn encode_into(&self, out: &mut Vec<u8>, lowercase: bool) {
        for label in &self.labels {
            out.push(label.len() as u8);
            if lowercase {
                out.extend(label.iter().map(u8::to_ascii_lowercase));
            } else {
                out.extend_from_slice(label);
            }
        }
        out.push(0);
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        self.encode_into(out, false);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return write!(f, ".");
        }
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", String::from_utf8_lossy(label))?;
        }
        Ok(())
    }
}

/// Encode a dotted name into wire format labels (test/query building).
/// Labels are clamped to 63 bytes per RFC 1035 §2.3.4.
pub fn encode_name(name: &str, buf: &mut Vec<u8>) {
    if name.is_empty() {
        buf.push(0);
        return;
    }
    for label in name.split('.') {
        let len = label.len().min(MAX_LABEL_LEN);
        buf.push(len as u8);
        buf.extend_from_slice(&label.as_bytes()[..len]);
    }
    buf.push(0);
}

/// The single question of a query packet.
#[derive(Debug, Clone)]
pub struct Question {
    pub name: Name,
    pub qtype: RecordType,
    pub qclass: u16,
    /// Offset just past QCLASS (start of any further sections).
    pub end_offset: usize,
}

impl Question {
    /// Read the question starting at offset 12. Packets that do not carry
    /// exactly one question are rejected.
    pub fn extract(buf: &[u8]) -> Result<Self, DnsParseError> {
        let header = Header::parse(buf)?;
        if header.qd_count != 1 {
            return Err(DnsParseError::BadQuestionCount(header.qd_count));
        }
        let (name, after_name) = Name::parse(buf, HEADER_LEN)?;
        if after_name + 4 > buf.len() {
            return Err(DnsParseError::Truncated(after_name));
        }
        let qtype = RecordType::from_u16(u16::from_be_bytes([buf[after_name], buf[after_name + 1]]));
        let qclass = u16::from_be_bytes([buf[after_name + 2], buf[after_name + 3]]);
        Ok(Self {
            name,
            qtype,
            qclass,
            end_offset: after_name + 4,
        })
    }

    /// Canonical cache identity of this question.
    pub fn key(&self) -> QuestionKey {
        let mut name = Vec::with_capacity(self.name.labels.len() * 8 + 1);
        self.name.encode_into(&mut name, true);
        QuestionKey {
            name,
            qtype: self.qtype.to_u16(),
            qclass: self.qclass,
        }
    }
}

/// Canonicalized question identity: the lowercased uncompressed wire name
/// plus TYPE and CLASS. Stable across transaction IDs, letter case, and
/// pointer-compressed spellings of the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuestionKey {
    name: Vec<u8>,
    qtype: u16,
    qclass: u16,
}

/// Extract the canonical cache key from a query packet.
pub fn canonical_question_key(buf: &[u8]) -> Result<QuestionKey, DnsParseError> {
    Ok(Question::extract(buf)?.key())
}

/// One answer resource record, RDATA untouched.
#[derive(Debug, Clone)]
pub struct AnswerRecord<'a> {
    pub name_offset: usize,
    pub rtype: RecordType,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: &'a [u8],
}

impl AnswerRecord<'_> {
    /// Address literal carried by this record, if it is a well-formed
    /// A or AAAA record.
    pub fn ip(&self) -> Option<IpAddr> {
        match (self.rtype, self.rdata.len()) {
            (RecordType::A, 4) => {
                let o = self.rdata;
                Some(IpAddr::V4(Ipv4Addr::new(o[0], o[1], o[2], o[3])))
            }
            (RecordType::AAAA, 16) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(self.rdata);
                Some(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            _ => None,
        }
    }
}

/// Lazy walker over the answer section. Unknown record types are skipped
/// via RDLENGTH; an RDLENGTH that would overrun the packet stops the walk
/// with an error.
pub struct AnswerIter<'a> {
    buf: &'a [u8],
    offset: usize,
    remaining: u16,
    failed: bool,
}

impl<'a> AnswerIter<'a> {
    pub fn new(buf: &'a [u8], start_offset: usize, an_count: u16) -> Self {
        Self {
            buf,
            offset: start_offset,
            remaining: an_count,
            failed: false,
        }
    }
}

impl<'a> Iterator for AnswerIter<'a> {
    type Item = Result<AnswerRecord<'a>, DnsParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let name_offset = self.offset;
        let after_name = match Name::parse(self.buf, name_offset) {
            Ok((_, end)) => end,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };
        if after_name + 10 > self.buf.len() {
            self.failed = true;
            return Some(Err(DnsParseError::Truncated(after_name)));
        }
        let b = self.buf;
        let rtype = RecordType::from_u16(u16::from_be_bytes([b[after_name], b[after_name + 1]]));
        let rclass = u16::from_be_bytes([b[after_name + 2], b[after_name + 3]]);
        let ttl = u32::from_be_bytes([
            b[after_name + 4],
            b[after_name + 5],
            b[after_name + 6],
            b[after_name + 7],
        ]);
        let rdlength = u16::from_be_bytes([b[after_name + 8], b[after_name + 9]]) as usize;
        let rdata_start = after_name + 10;
        let rdata_end = rdata_start + rdlength;
        if rdata_end > self.buf.len() {
            self.failed = true;
            return Some(Err(DnsParseError::RdataOverrun(rdata_start)));
        }
        self.offset = rdata_end;
        Some(Ok(AnswerRecord {
            name_offset,
            rtype,
            rclass,
            ttl,
            rdata: &self.buf[rdata_start..rdata_end],
        }))
    }
}

/// Offset just past `count` question entries starting at `start`.
pub fn skip_questions(buf: &[u8], start: usize, count: u16) -> Result<usize, DnsParseError> {
    let mut offset = start;
    for _ in 0..count {
        let (_, after_name) = Name::parse(buf, offset)?;
        offset = after_name + 4;
        if offset > buf.len() {
            return Err(DnsParseError::Truncated(offset));
        }
    }
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{build_query, build_response};

    #[test]
    fn test_name_roundtrip() {
        let mut buf = Vec::new();
        encode_name("www.example.com", &mut buf);
        assert_eq!(buf, b"\x03www\x07example\x03com\x00");

        let (name, end) = Name::parse(&buf, 0).unwrap();
        assert_eq!(name.to_string(), "www.example.com");
        assert_eq!(end, buf.len());

        let mut out = Vec::new();
        name.encode(&mut out);
        assert_eq!(out, buf);
    }

    #[test]
    fn test_root_name() {
        let (name, end) = Name::parse(b"\x00", 0).unwrap();
        assert!(name.labels().is_empty());
        assert_eq!(end, 1);
        assert_eq!(name.to_string(), ".");
    }

    #[test]
    fn test_name_with_pointer() {
        let mut buf = Vec::new();
        encode_name("example.com", &mut buf);
        let ptr_offset = buf.len();
        buf.extend_from_slice(&[0xC0, 0x00]);

        let (name, end) = Name::parse(&buf, ptr_offset).unwrap();
        assert_eq!(name.to_string(), "example.com");
        assert_eq!(end, ptr_offset + 2);
    }

    #[test]
    fn test_pointer_cycle_rejected() {
        // Two pointers referring to each other.
        let buf = [0xC0, 0x02, 0xC0, 0x00];
        assert_eq!(
            Name::parse(&buf, 0).unwrap_err(),
            DnsParseError::CompressionLoop
        );
        // Self-referential pointer.
        let buf = [0xC0, 0x00];
        assert_eq!(
            Name::parse(&buf, 0).unwrap_err(),
            DnsParseError::CompressionLoop
        );
    }

    #[test]
    fn test_pointer_out_of_range() {
        let buf = [0xC0, 0x50];
        assert_eq!(
            Name::parse(&buf, 0).unwrap_err(),
            DnsParseError::PointerOutOfRange(0)
        );
    }

    #[test]
    fn test_name_too_long() {
        // five 63-byte labels exceed the 255-octet wire limit
        let mut buf = Vec::new();
        for _ in 0..5 {
            buf.push(63);
            buf.extend_from_slice(&[b'a'; 63]);
        }
        buf.push(0);
        assert_eq!(Name::parse(&buf, 0).unwrap_err(), DnsParseError::NameTooLong);
    }

    #[test]
    fn test_non_ascii_labels_preserved() {
        let buf = [3, 0xFF, 0xFE, 0xFD, 0x00];
        let (name, _) = Name::parse(&buf, 0).unwrap();
        assert_eq!(name.labels()[0], vec![0xFF, 0xFE, 0xFD]);
    }

    #[test]
    fn test_extract_question() {
        let query = build_query(0x1234, "Example.COM", 1);
        let q = Question::extract(&query).unwrap();
        assert_eq!(q.name.to_string(), "Example.COM");
        assert_eq!(q.qtype, RecordType::A);
        assert_eq!(q.qclass, 1);
        assert_eq!(q.end_offset, query.len());
    }

    #[test]
    fn test_extract_question_rejects_short_packet() {
        assert_eq!(
            Question::extract(&[0u8; 5]).unwrap_err(),
            DnsParseError::TooShort(5)
        );
    }

    #[test]
    fn test_extract_question_rejects_bad_qdcount() {
        let mut query = build_query(0x1234, "example.com", 1);
        query[5] = 2; // QDCOUNT = 2
        assert_eq!(
            Question::extract(&query).unwrap_err(),
            DnsParseError::BadQuestionCount(2)
        );
    }

    #[test]
    fn test_key_stable_under_txid_and_case() {
        let a = build_query(0xAAAA, "Example.COM", 1);
        let b = build_query(0xBBBB, "example.com", 1);
        assert_eq!(
            canonical_question_key(&a).unwrap(),
            canonical_question_key(&b).unwrap()
        );
    }

    #[test]
    fn test_key_differs_by_type() {
        let a = build_query(0x1111, "example.com", 1);
        let aaaa = build_query(0x1111, "example.com", 28);
        assert_ne!(
            canonical_question_key(&a).unwrap(),
            canonical_question_key(&aaaa).unwrap()
        );
    }

    #[test]
    fn test_key_stable_under_compression() {
        // Same question spelled with a pointer into the header padding
        // area is impossible in a real query, so point at a prior name
        // inside the packet instead.
        let plain = build_query(0x2222, "a.example.com", 1);

        let mut compressed = Vec::new();
        compressed.extend_from_slice(&0x3333u16.to_be_bytes());
        compressed.extend_from_slice(&[0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        // question name: "a" + pointer to "example.com" appended after
        compressed.push(1);
        compressed.push(b'a');
        let ptr_pos = compressed.len();
        compressed.extend_from_slice(&[0xC0, 0x00]); // patched below
        compressed.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
        let tail = compressed.len();
        encode_name("example.com", &mut compressed);
        compressed[ptr_pos] = 0xC0 | ((tail >> 8) as u8);
        compressed[ptr_pos + 1] = tail as u8;

        assert_eq!(
            canonical_question_key(&plain).unwrap(),
            canonical_question_key(&compressed).unwrap()
        );
    }

    #[test]
    fn test_answer_iteration() {
        let query = build_query(0x4242, "example.com", 1);
        let response = build_response(&query, &["93.184.216.34", "2606:4700::1"]);
        let header = Header::parse(&response).unwrap();
        assert_eq!(header.an_count, 2);
        assert!(header.is_response());
        assert!(!header.is_authoritative());
        assert_eq!(header.rcode(), 0);

        let start = skip_questions(&response, HEADER_LEN, header.qd_count).unwrap();
        let records: Vec<_> = AnswerIter::new(&response, start, header.an_count)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].rtype, RecordType::A);
        assert_eq!(records[0].ip(), Some("93.184.216.34".parse().unwrap()));
        assert_eq!(records[1].rtype, RecordType::AAAA);
        assert_eq!(records[1].ip(), Some("2606:4700::1".parse().unwrap()));
    }

    #[test]
    fn test_answer_iter_skips_unknown_types() {
        let query = build_query(0x4242, "example.com", 1);
        let mut response = build_response(&query, &["93.184.216.34"]);
        // Append a TYPE 33 (SRV) record the engine does not inspect.
        response.extend_from_slice(&[0xC0, 0x0C]); // name pointer
        response.extend_from_slice(&33u16.to_be_bytes());
        response.extend_from_slice(&1u16.to_be_bytes());
        response.extend_from_slice(&60u32.to_be_bytes());
        response.extend_from_slice(&2u16.to_be_bytes());
        response.extend_from_slice(&[0xAB, 0xCD]);
        response[7] = 2; // AN = 2

        let header = Header::parse(&response).unwrap();
        let start = skip_questions(&response, HEADER_LEN, header.qd_count).unwrap();
        let records: Vec<_> = AnswerIter::new(&response, start, header.an_count)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].rtype, RecordType::Unknown(33));
        assert_eq!(records[1].ip(), None);
    }

    #[test]
    fn test_rdlength_overrun_rejected() {
        let query = build_query(0x4242, "example.com", 1);
        let mut response = build_response(&query, &["93.184.216.34"]);
        // Stretch the A record's RDLENGTH past the end of the packet.
        let rdlength_offset = response.len() - 4 - 2;
        response[rdlength_offset] = 0xFF;

        let header = Header::parse(&response).unwrap();
        let start = skip_questions(&response, HEADER_LEN, header.qd_count).unwrap();
        let result: Result<Vec<_>, _> =
            AnswerIter::new(&response, start, header.an_count).collect();
        assert!(matches!(result, Err(DnsParseError::RdataOverrun(_))));
    }
}
