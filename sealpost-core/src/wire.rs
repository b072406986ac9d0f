//! Framing: fixed-width request/response headers and fixed-width payload fields.
//! All multi-byte integers are little-endian on the wire regardless of host order.

use crate::identity::ClientId;
use crate::protocol::{CLIENT_ID_SIZE, PROTOCOL_VERSION};

/// Request header: id(16) | version(1) | op_code(2 LE) | payload_size(4 LE).
pub const REQUEST_HEADER_SIZE: usize = CLIENT_ID_SIZE + 1 + 2 + 4;
/// Response header: version(1) | op_code(2 LE) | payload_size(4 LE).
pub const RESPONSE_HEADER_SIZE: usize = 1 + 2 + 4;

/// Decoded request header. Only test servers and diagnostics read these back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub client_id: ClientId,
    pub version: u8,
    pub op_code: u16,
    pub payload_size: u32,
}

/// Decoded response header. The version byte is carried but not checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub version: u8,
    pub op_code: u16,
    pub payload_size: u32,
}

/// Encode a request header for `id`, stamped with the current protocol version.
pub fn encode_header(id: &ClientId, op_code: u16, payload_len: u32) -> [u8; REQUEST_HEADER_SIZE] {
    let mut out = [0u8; REQUEST_HEADER_SIZE];
    out[..16].copy_from_slice(id.as_bytes());
    out[16] = PROTOCOL_VERSION;
    out[17..19].copy_from_slice(&op_code.to_le_bytes());
    out[19..23].copy_from_slice(&payload_len.to_le_bytes());
    out
}

/// Decode the first `REQUEST_HEADER_SIZE` bytes of a request.
pub fn decode_request_header(bytes: &[u8]) -> Result<RequestHeader, WireError> {
    if bytes.len() < REQUEST_HEADER_SIZE {
        return Err(WireError::MalformedHeader {
            expected: REQUEST_HEADER_SIZE,
            got: bytes.len(),
        });
    }
    let mut id = [0u8; CLIENT_ID_SIZE];
    id.copy_from_slice(&bytes[..16]);
    Ok(RequestHeader {
        client_id: ClientId::from_bytes(id),
        version: bytes[16],
        op_code: u16::from_le_bytes([bytes[17], bytes[18]]),
        payload_size: u32::from_le_bytes([bytes[19], bytes[20], bytes[21], bytes[22]]),
    })
}

/// Encode a response header. Used by test servers and tooling.
pub fn encode_response_header(
    version: u8,
    op_code: u16,
    payload_len: u32,
) -> [u8; RESPONSE_HEADER_SIZE] {
    let mut out = [0u8; RESPONSE_HEADER_SIZE];
    out[0] = version;
    out[1..3].copy_from_slice(&op_code.to_le_bytes());
    out[3..7].copy_from_slice(&payload_len.to_le_bytes());
    out
}

/// Decode a response header from the first 7 bytes of `bytes`.
pub fn decode_response_header(bytes: &[u8]) -> Result<ResponseHeader, WireError> {
    if bytes.len() < RESPONSE_HEADER_SIZE {
        return Err(WireError::MalformedHeader {
            expected: RESPONSE_HEADER_SIZE,
            got: bytes.len(),
        });
    }
    Ok(ResponseHeader {
        version: bytes[0],
        op_code: u16::from_le_bytes([bytes[1], bytes[2]]),
        payload_size: u32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]),
    })
}

/// Read a fixed-width text field: bytes up to the first NUL (or the whole field), lossy UTF-8.
pub fn fixed_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Builds one request: header followed by fixed-layout payload fields.
/// The header's payload size is fixed up front; `finish` checks it was honoured.
pub struct FrameWriter {
    buf: Vec<u8>,
    payload_size: usize,
}

impl FrameWriter {
    pub fn new(id: &ClientId, op_code: u16, payload_size: u32) -> Self {
        let mut buf = Vec::with_capacity(REQUEST_HEADER_SIZE + payload_size as usize);
        buf.extend_from_slice(&encode_header(id, op_code, payload_size));
        Self {
            buf,
            payload_size: payload_size as usize,
        }
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Append `value` as a zero-padded field of `width` bytes.
    pub fn put_fixed(&mut self, value: &[u8], width: usize) -> &mut Self {
        let n = value.len().min(width);
        self.buf.extend_from_slice(&value[..n]);
        self.buf.resize(self.buf.len() + (width - n), 0);
        self
    }

    /// Return the finished frame. Pads or truncates to the declared payload size so the
    /// header never disagrees with the bytes that follow it.
    pub fn finish(mut self) -> Vec<u8> {
        let total = REQUEST_HEADER_SIZE + self.payload_size;
        debug_assert_eq!(self.buf.len(), total, "payload layout disagrees with header");
        self.buf.resize(total, 0);
        self.buf
    }
}

/// Sequential reader over a response payload whose length was already validated.
pub struct PayloadReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(n).ok_or(WireError::Truncated)?;
        if end > self.bytes.len() {
            return Err(WireError::Truncated);
        }
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn client_id(&mut self) -> Result<ClientId, WireError> {
        let raw = self.take(CLIENT_ID_SIZE)?;
        let mut id = [0u8; CLIENT_ID_SIZE];
        id.copy_from_slice(raw);
        Ok(ClientId::from_bytes(id))
    }

    pub fn u32(&mut self) -> Result<u32, WireError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}

/// Error decoding a header or payload field.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed header: expected {expected} bytes, got {got}")]
    MalformedHeader { expected: usize, got: usize },
    #[error("payload truncated")]
    Truncated,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn request_header_layout() {
        let id = ClientId::from_bytes([0xAB; 16]);
        let h = encode_header(&id, 825, 255);
        assert_eq!(h.len(), 23);
        assert_eq!(&h[..16], &[0xAB; 16]);
        assert_eq!(h[16], 3);
        assert_eq!(&h[17..19], &[0x39, 0x03]);
        assert_eq!(&h[19..23], &[0xFF, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn response_header_explicit_little_endian() {
        // 1603 = 0x0643, 279 = 0x0117
        let bytes = [3u8, 0x43, 0x06, 0x17, 0x01, 0x00, 0x00];
        let h = decode_response_header(&bytes).unwrap();
        assert_eq!(h.version, 3);
        assert_eq!(h.op_code, 1603);
        assert_eq!(h.payload_size, 279);
    }

    #[test]
    fn short_response_header_is_malformed() {
        assert!(matches!(
            decode_response_header(&[3, 0x40, 0x06]),
            Err(WireError::MalformedHeader { expected: 7, got: 3 })
        ));
        assert!(matches!(
            decode_response_header(&[]),
            Err(WireError::MalformedHeader { got: 0, .. })
        ));
    }

    #[test]
    fn request_header_roundtrip() {
        let id = ClientId::from_bytes([7; 16]);
        let h = decode_request_header(&encode_header(&id, 828, 1291)).unwrap();
        assert_eq!(h.client_id, id);
        assert_eq!(h.version, PROTOCOL_VERSION);
        assert_eq!(h.op_code, 828);
        assert_eq!(h.payload_size, 1291);
    }

    #[test]
    fn fixed_str_stops_at_nul() {
        assert_eq!(fixed_str(b"file.txt\0\0\0"), "file.txt");
        assert_eq!(fixed_str(b"full"), "full");
    }

    #[test]
    fn frame_writer_never_overruns_neighbouring_fields() {
        let id = ClientId::nil();
        let long = vec![b'x'; 400];
        let mut w = FrameWriter::new(&id, 826, 255 + 160);
        w.put_fixed(&long, 255).put_fixed(&[0xEE; 160], 160);
        let frame = w.finish();
        assert_eq!(frame.len(), REQUEST_HEADER_SIZE + 415);
        let payload = &frame[REQUEST_HEADER_SIZE..];
        assert!(payload[..255].iter().all(|&b| b == b'x'));
        // Sentinel: the key field is untouched by the oversized name.
        assert!(payload[255..].iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn payload_reader_rejects_overread() {
        let bytes = [1u8, 2, 3];
        let mut r = PayloadReader::new(&bytes);
        assert_eq!(r.take(2).unwrap(), &[1, 2]);
        assert!(matches!(r.take(2), Err(WireError::Truncated)));
    }

    proptest! {
        #[test]
        fn header_roundtrip_any_values(
            op in any::<u16>(),
            size in any::<u32>(),
            id in any::<[u8; 16]>(),
        ) {
            let req = encode_header(&ClientId::from_bytes(id), op, size);
            // A response header is the request header without the id.
            let decoded = decode_response_header(&req[16..]).unwrap();
            prop_assert_eq!(decoded.op_code, op);
            prop_assert_eq!(decoded.payload_size, size);
            let resp = encode_response_header(PROTOCOL_VERSION, op, size);
            let decoded = decode_response_header(&resp).unwrap();
            prop_assert_eq!(decoded.op_code, op);
            prop_assert_eq!(decoded.payload_size, size);
        }

        #[test]
        fn fixed_width_never_exceeds_declared_width(
            value in proptest::collection::vec(1u8..=255, 0..600),
            width in 1usize..300,
        ) {
            let mut w = FrameWriter::new(&ClientId::nil(), 900, (width + 8) as u32);
            w.put_fixed(&value, width).put_fixed(&[0xA5; 8], 8);
            let frame = w.finish();
            let payload = &frame[REQUEST_HEADER_SIZE..];
            prop_assert_eq!(payload.len(), width + 8);
            let n = value.len().min(width);
            prop_assert_eq!(&payload[..n], &value[..n]);
            prop_assert!(payload[n..width].iter().all(|&b| b == 0));
            prop_assert!(payload[width..].iter().all(|&b| b == 0xA5));
        }
    }
}
