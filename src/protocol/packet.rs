use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{PmtudError, PmtudResult};
use crate::protocol::constants::*;

/// Header carried by probe and probe-ack datagrams (12 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeHeader {
    /// Probe or ack (1 byte)
    pub kind: ProbeKind,
    /// Matches an ack to its probe (4 bytes)
    pub probe_id: u32,
    /// Wire MTU the probe stands for (2 bytes)
    pub wire_size: u16,
}

impl ProbeHeader {
    /// Header of a probe.
    pub fn probe(probe_id: u32, wire_size: u16) -> Self {
        Self {
            kind: ProbeKind::Probe,
            probe_id,
            wire_size,
        }
    }

    /// Header of an ack.
    pub fn ack(probe_id: u32, wire_size: u16) -> Self {
        Self {
            kind: ProbeKind::Ack,
            probe_id,
            wire_size,
        }
    }

    /// Append the encoded header to `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_slice(&PROBE_MAGIC);
        buf.put_u8(PROBE_VERSION);
        buf.put_u8(self.kind as u8);
        buf.put_u32(self.probe_id);
        buf.put_u16(self.wire_size);
    }

    /// Decode a header from the start of a datagram.
    pub fn from_bytes(mut buf: &[u8]) -> PmtudResult<Self> {
        if buf.len() < PROBE_HEADER_SIZE {
            return Err(PmtudError::Codec("Buffer too small for probe header".into()));
        }

        if buf[..4] != PROBE_MAGIC {
            return Err(PmtudError::Codec("Invalid probe magic".into()));
        }
        buf.advance(4);

        if buf.get_u8() != PROBE_VERSION {
            return Err(PmtudError::Codec("Unsupported probe version".into()));
        }

        let kind = match buf.get_u8() {
            0x01 => ProbeKind::Probe,
            0x02 => ProbeKind::Ack,
            _ => return Err(PmtudError::Codec("Invalid probe kind".into())),
        };

        Ok(Self {
            kind,
            probe_id: buf.get_u32(),
            wire_size: buf.get_u16(),
        })
    }
}

/// Build a probe datagram padded to `payload_len` bytes.
///
/// The padding is a byte pattern so the responder can reject datagrams that
/// were truncated or reassembled wrongly.
pub fn encode_probe(probe_id: u32, wire_size: u16, payload_len: usize) -> Bytes {
    let len = payload_len.max(PROBE_HEADER_SIZE);
    let mut buf = BytesMut::with_capacity(len);
    ProbeHeader::probe(probe_id, wire_size).write_to(&mut buf);
    for i in PROBE_HEADER_SIZE..len {
        buf.put_u8((i % 256) as u8);
    }
    buf.freeze()
}

/// Build an ack datagram.
pub fn encode_ack(probe_id: u32, wire_size: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(PROBE_HEADER_SIZE);
    ProbeHeader::ack(probe_id, wire_size).write_to(&mut buf);
    buf.freeze()
}

/// Validate a received probe: the padding must be intact.
pub fn verify_probe_padding(datagram: &[u8]) -> bool {
    datagram
        .iter()
        .enumerate()
        .skip(PROBE_HEADER_SIZE)
        .all(|(i, b)| *b == (i % 256) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_encoding() {
        let datagram = encode_probe(0xdead_beef, 1500, 1472);
        assert_eq!(datagram.len(), 1472);
        assert!(verify_probe_padding(&datagram));

        let header = ProbeHeader::from_bytes(&datagram).unwrap();
        assert_eq!(header, ProbeHeader::probe(0xdead_beef, 1500));
    }

    #[test]
    fn test_probe_never_shorter_than_header() {
        let datagram = encode_probe(1, 20, 0);
        assert_eq!(datagram.len(), PROBE_HEADER_SIZE);
    }

    #[test]
    fn test_ack_decoding() {
        let ack = encode_ack(7, 9000);
        let header = ProbeHeader::from_bytes(&ack).unwrap();
        assert_eq!(header.kind, ProbeKind::Ack);
        assert_eq!(header.probe_id, 7);
        assert_eq!(header.wire_size, 9000);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(ProbeHeader::from_bytes(b"short").is_err());
        assert!(ProbeHeader::from_bytes(b"NOPE\x01\x01\0\0\0\x01\x05\xdc").is_err());

        let mut bad_kind = BytesMut::new();
        bad_kind.put_slice(&PROBE_MAGIC);
        bad_kind.put_u8(PROBE_VERSION);
        bad_kind.put_u8(0x09);
        bad_kind.put_u32(1);
        bad_kind.put_u16(1400);
        assert!(ProbeHeader::from_bytes(&bad_kind).is_err());
    }

    #[test]
    fn test_corrupted_padding_detected() {
        let mut datagram = BytesMut::from(&encode_probe(3, 1400, 200)[..]);
        datagram[150] ^= 0xff;
        assert!(!verify_probe_padding(&datagram));
    }
}
