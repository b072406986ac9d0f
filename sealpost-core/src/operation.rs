//! Protocol steps. Each operation serializes one request and validates the server's
//! response against the step's contract. Retrying is the session's job, not ours.

use tracing::warn;

use crate::chunk::FileTransferState;
use crate::error::ProtocolError;
use crate::identity::{ClientId, EncryptedSessionKey, PublicKey};
use crate::protocol::{
    OpCode, ResponseCode, CHUNK_SIZE, ENCRYPTED_KEY_FIELD_SIZE, FILE_NAME_PAYLOAD_SIZE,
    NAME_FIELD_SIZE, PUBLIC_KEY_FIELD_SIZE, REGISTER_PAYLOAD_SIZE, SEND_FILE_CHUNK_PAYLOAD_SIZE,
    SEND_PUBLIC_KEY_PAYLOAD_SIZE,
};
use crate::wire::{fixed_str, FrameWriter, PayloadReader, ResponseHeader};

/// One encrypted chunk of the file being sent.
#[derive(Debug, Clone, Copy)]
pub struct FileChunk<'a> {
    pub transfer: &'a FileTransferState,
    /// 1-based.
    pub index: u16,
    pub bytes: &'a [u8],
}

/// Every request the client can make.
#[derive(Debug, Clone, Copy)]
pub enum Operation<'a> {
    Register { name: &'a str },
    SendPublicKey { name: &'a str, public_key: &'a PublicKey },
    Reconnect { name: &'a str },
    /// Only the last chunk of a pass is answered (with FileReceived).
    SendFileChunk(FileChunk<'a>),
    ConfirmChecksum { file_name: &'a str },
    /// Advisory; the server does not answer.
    RetryChecksum { file_name: &'a str },
    AbortChecksum { file_name: &'a str },
}

/// A response read off the transport: header plus exactly the bytes that followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub header: ResponseHeader,
    pub payload: Vec<u8>,
}

/// What a successful step produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Request written; no response expected.
    Sent,
    /// Server assigned a new id.
    Registered(ClientId),
    /// Encrypted session key (after SendPublicKey or a successful Reconnect).
    SessionKey(EncryptedSessionKey),
    /// Server does not know this client; it registered the name under a fresh id.
    ReconnectedAsNew(ClientId),
    /// All chunks arrived; the server's checksum of the plaintext it reconstructed.
    FileReceived { checksum: u32 },
    Acknowledged,
}

impl<'a> Operation<'a> {
    pub fn op_code(&self) -> OpCode {
        match self {
            Operation::Register { .. } => OpCode::Register,
            Operation::SendPublicKey { .. } => OpCode::SendPublicKey,
            Operation::Reconnect { .. } => OpCode::Reconnect,
            Operation::SendFileChunk(_) => OpCode::SendFileChunk,
            Operation::ConfirmChecksum { .. } => OpCode::ConfirmChecksum,
            Operation::RetryChecksum { .. } => OpCode::RetryChecksum,
            Operation::AbortChecksum { .. } => OpCode::AbortChecksum,
        }
    }

    /// Full request frame (header + payload) on behalf of client `id`.
    pub fn serialize(&self, id: &ClientId) -> Vec<u8> {
        let op = self.op_code().as_u16();
        match self {
            Operation::Register { name } | Operation::Reconnect { name } => {
                let mut w = FrameWriter::new(id, op, REGISTER_PAYLOAD_SIZE);
                w.put_fixed(name.as_bytes(), NAME_FIELD_SIZE);
                w.finish()
            }
            Operation::SendPublicKey { name, public_key } => {
                let mut w = FrameWriter::new(id, op, SEND_PUBLIC_KEY_PAYLOAD_SIZE);
                w.put_fixed(name.as_bytes(), NAME_FIELD_SIZE)
                    .put_fixed(public_key.as_bytes(), PUBLIC_KEY_FIELD_SIZE);
                w.finish()
            }
            Operation::SendFileChunk(chunk) => {
                let t = chunk.transfer;
                let mut w = FrameWriter::new(id, op, SEND_FILE_CHUNK_PAYLOAD_SIZE);
                w.put_u32(t.ciphertext_size)
                    .put_u32(t.plaintext_size)
                    .put_u16(chunk.index)
                    .put_u16(t.chunk_count)
                    .put_fixed(t.file_name.as_bytes(), NAME_FIELD_SIZE)
                    .put_fixed(chunk.bytes, CHUNK_SIZE);
                w.finish()
            }
            Operation::ConfirmChecksum { file_name }
            | Operation::RetryChecksum { file_name }
            | Operation::AbortChecksum { file_name } => {
                let mut w = FrameWriter::new(id, op, FILE_NAME_PAYLOAD_SIZE);
                w.put_fixed(file_name.as_bytes(), NAME_FIELD_SIZE);
                w.finish()
            }
        }
    }

    /// Response codes that complete this step. Empty when the server stays silent.
    pub fn expected_responses(&self) -> &'static [ResponseCode] {
        match self {
            Operation::Register { .. } => &[ResponseCode::RegisterOk],
            Operation::SendPublicKey { .. } => &[ResponseCode::KeyReceived],
            Operation::Reconnect { .. } => {
                &[ResponseCode::ReconnectOk, ResponseCode::ReconnectAsNew]
            }
            Operation::SendFileChunk(c) if c.transfer.is_last(c.index) => {
                &[ResponseCode::FileReceived]
            }
            Operation::SendFileChunk(_) | Operation::RetryChecksum { .. } => &[],
            Operation::ConfirmChecksum { .. } | Operation::AbortChecksum { .. } => {
                &[ResponseCode::Ack]
            }
        }
    }

    pub fn expects_response(&self) -> bool {
        !self.expected_responses().is_empty()
    }

    /// Validate `response` for this step on behalf of `session_id`.
    ///
    /// The op code must be one this step accepts, the header's payload size must be the
    /// size that code carries, the bytes read must match the header, and any embedded id
    /// must equal `session_id` byte for byte.
    pub fn apply(
        &self,
        session_id: &ClientId,
        response: &Response,
    ) -> Result<StepOutcome, ProtocolError> {
        let code = self.check_envelope(response)?;
        let mut r = PayloadReader::new(&response.payload);
        match (self, code) {
            (Operation::Register { .. }, ResponseCode::RegisterOk) => {
                let id = r.client_id()?;
                if id.is_nil() {
                    return Err(ProtocolError::unexpected("server assigned the nil id"));
                }
                Ok(StepOutcome::Registered(id))
            }
            (Operation::SendPublicKey { .. }, ResponseCode::KeyReceived)
            | (Operation::Reconnect { .. }, ResponseCode::ReconnectOk) => {
                expect_id(session_id, r.client_id()?)?;
                let field = r.take(ENCRYPTED_KEY_FIELD_SIZE)?;
                let key = EncryptedSessionKey::from_field(field)
                    .ok_or_else(|| ProtocolError::unexpected("encrypted key field"))?;
                Ok(StepOutcome::SessionKey(key))
            }
            (Operation::Reconnect { .. }, ResponseCode::ReconnectAsNew) => {
                let id = r.client_id()?;
                if id.is_nil() {
                    return Err(ProtocolError::unexpected("server assigned the nil id"));
                }
                Ok(StepOutcome::ReconnectedAsNew(id))
            }
            (Operation::SendFileChunk(chunk), ResponseCode::FileReceived) => {
                expect_id(session_id, r.client_id()?)?;
                let content_size = r.u32()?;
                if content_size != chunk.transfer.ciphertext_size {
                    return Err(ProtocolError::unexpected(format!(
                        "server received {content_size} bytes, sent {}",
                        chunk.transfer.ciphertext_size
                    )));
                }
                let file_name = fixed_str(r.take(NAME_FIELD_SIZE)?);
                if file_name != chunk.transfer.file_name {
                    return Err(ProtocolError::unexpected(format!(
                        "server acknowledged file {file_name:?}, sent {:?}",
                        chunk.transfer.file_name
                    )));
                }
                Ok(StepOutcome::FileReceived {
                    checksum: r.u32()?,
                })
            }
            (
                Operation::ConfirmChecksum { .. } | Operation::AbortChecksum { .. },
                ResponseCode::Ack,
            ) => {
                expect_id(session_id, r.client_id()?)?;
                Ok(StepOutcome::Acknowledged)
            }
            (op, code) => Err(ProtocolError::unexpected(format!(
                "{code:?} does not answer {:?}",
                op.op_code()
            ))),
        }
    }

    /// Op code, declared size and received size agree with this step's table entry.
    fn check_envelope(&self, response: &Response) -> Result<ResponseCode, ProtocolError> {
        let expected = self.expected_responses();
        let raw = response.header.op_code;
        let code = ResponseCode::from_u16(raw)
            .filter(|c| expected.contains(c))
            .ok_or_else(|| {
                if let Some(c @ (ResponseCode::GeneralError | ResponseCode::RegisterFailed)) =
                    ResponseCode::from_u16(raw)
                {
                    warn!(op = ?self.op_code(), response = ?c, "server reported an error");
                }
                ProtocolError::unexpected(format!(
                    "response code {raw} to {:?}, expected one of {expected:?}",
                    self.op_code()
                ))
            })?;
        if response.header.payload_size != code.payload_size() {
            return Err(ProtocolError::unexpected(format!(
                "{code:?} declared {} payload bytes, expected {}",
                response.header.payload_size,
                code.payload_size()
            )));
        }
        if response.payload.len() != response.header.payload_size as usize {
            return Err(ProtocolError::unexpected(format!(
                "read {} payload bytes, header declared {}",
                response.payload.len(),
                response.header.payload_size
            )));
        }
        Ok(code)
    }
}

fn expect_id(session_id: &ClientId, got: ClientId) -> Result<(), ProtocolError> {
    if got.as_bytes() != session_id.as_bytes() {
        return Err(ProtocolError::unexpected(format!(
            "response for client {got}, this session is {session_id}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PROTOCOL_VERSION;
    use crate::wire::{decode_request_header, REQUEST_HEADER_SIZE};

    fn response(code: ResponseCode, payload: Vec<u8>) -> Response {
        Response {
            header: ResponseHeader {
                version: PROTOCOL_VERSION,
                op_code: code.as_u16(),
                payload_size: payload.len() as u32,
            },
            payload,
        }
    }

    fn id_and_key(id: &ClientId, key_byte: u8) -> Vec<u8> {
        let mut p = id.as_bytes().to_vec();
        p.extend_from_slice(&[key_byte; 160]);
        p
    }

    fn file_received(id: &ClientId, size: u32, name: &str, checksum: u32) -> Vec<u8> {
        let mut p = id.as_bytes().to_vec();
        p.extend_from_slice(&size.to_le_bytes());
        let mut field = vec![0u8; 255];
        field[..name.len()].copy_from_slice(name.as_bytes());
        p.extend_from_slice(&field);
        p.extend_from_slice(&checksum.to_le_bytes());
        p
    }

    #[test]
    fn register_serializes_nil_id_and_padded_name() {
        let frame = Operation::Register { name: "alice" }.serialize(&ClientId::nil());
        assert_eq!(frame.len(), REQUEST_HEADER_SIZE + 255);
        let h = decode_request_header(&frame).unwrap();
        assert!(h.client_id.is_nil());
        assert_eq!(h.op_code, 825);
        assert_eq!(h.payload_size, 255);
        assert_eq!(&frame[23..28], b"alice");
        assert!(frame[28..].iter().all(|&b| b == 0));
    }

    #[test]
    fn register_accepts_new_id() {
        let id = ClientId::random();
        let op = Operation::Register { name: "alice" };
        let out = op
            .apply(&ClientId::nil(), &response(ResponseCode::RegisterOk, id.as_bytes().to_vec()))
            .unwrap();
        assert_eq!(out, StepOutcome::Registered(id));
    }

    #[test]
    fn register_rejects_nil_id() {
        let op = Operation::Register { name: "alice" };
        let r = op.apply(&ClientId::nil(), &response(ResponseCode::RegisterOk, vec![0; 16]));
        assert!(matches!(r, Err(ProtocolError::UnexpectedResponse(_))));
    }

    #[test]
    fn register_failed_is_unexpected() {
        let op = Operation::Register { name: "alice" };
        let r = op.apply(&ClientId::nil(), &response(ResponseCode::RegisterFailed, vec![]));
        assert!(matches!(r, Err(ProtocolError::UnexpectedResponse(_))));
    }

    #[test]
    fn declared_size_must_match_table() {
        let op = Operation::Register { name: "alice" };
        let mut resp = response(ResponseCode::RegisterOk, vec![1; 20]);
        let r = op.apply(&ClientId::nil(), &resp);
        assert!(matches!(r, Err(ProtocolError::UnexpectedResponse(_))));
        // Header says 16 but fewer bytes were read.
        resp.header.payload_size = 16;
        resp.payload.truncate(10);
        assert!(op.apply(&ClientId::nil(), &resp).is_err());
    }

    #[test]
    fn send_public_key_layout() {
        let pk = PublicKey::from_bytes(vec![0xC3; 32]).unwrap();
        let id = ClientId::random();
        let frame = Operation::SendPublicKey {
            name: "alice",
            public_key: &pk,
        }
        .serialize(&id);
        assert_eq!(frame.len(), 23 + 415);
        assert_eq!(&frame[..16], id.as_bytes());
        let payload = &frame[23..];
        assert_eq!(&payload[..5], b"alice");
        assert_eq!(&payload[255..287], &[0xC3; 32]);
        assert!(payload[287..].iter().all(|&b| b == 0));
    }

    #[test]
    fn key_received_yields_encrypted_key() {
        let pk = PublicKey::from_bytes(vec![1; 32]).unwrap();
        let id = ClientId::random();
        let op = Operation::SendPublicKey {
            name: "alice",
            public_key: &pk,
        };
        let out = op
            .apply(&id, &response(ResponseCode::KeyReceived, id_and_key(&id, 0x5A)))
            .unwrap();
        match out {
            StepOutcome::SessionKey(k) => assert_eq!(k.as_bytes(), &[0x5A; 160][..]),
            other => panic!("expected SessionKey, got {other:?}"),
        }
    }

    #[test]
    fn id_mismatch_in_one_byte_rejected() {
        let id = ClientId::random();
        let mut other = *id.as_bytes();
        other[15] ^= 0x01;
        let other = ClientId::from_bytes(other);
        let op = Operation::ConfirmChecksum { file_name: "f" };
        let r = op.apply(&id, &response(ResponseCode::Ack, other.as_bytes().to_vec()));
        assert!(matches!(r, Err(ProtocolError::UnexpectedResponse(_))));
        let ok = op.apply(&id, &response(ResponseCode::Ack, id.as_bytes().to_vec()));
        assert_eq!(ok.unwrap(), StepOutcome::Acknowledged);
    }

    #[test]
    fn reconnect_accepts_both_outcomes() {
        let id = ClientId::random();
        let op = Operation::Reconnect { name: "bob" };
        assert!(matches!(
            op.apply(&id, &response(ResponseCode::ReconnectOk, id_and_key(&id, 1))),
            Ok(StepOutcome::SessionKey(_))
        ));
        let fresh = ClientId::random();
        assert_eq!(
            op.apply(&id, &response(ResponseCode::ReconnectAsNew, fresh.as_bytes().to_vec()))
                .unwrap(),
            StepOutcome::ReconnectedAsNew(fresh)
        );
        assert!(op
            .apply(&id, &response(ResponseCode::KeyReceived, id_and_key(&id, 1)))
            .is_err());
    }

    #[test]
    fn file_chunk_layout_and_expectations() {
        let transfer = FileTransferState::new("data.bin", 1990, 2000).unwrap();
        let ciphertext = vec![0x11u8; 2000];
        let id = ClientId::random();
        let first = Operation::SendFileChunk(FileChunk {
            transfer: &transfer,
            index: 1,
            bytes: &ciphertext[transfer.chunk_range(1).unwrap()],
        });
        assert!(!first.expects_response());
        let frame = first.serialize(&id);
        assert_eq!(frame.len(), 23 + 1291);
        let p = &frame[23..];
        assert_eq!(u32::from_le_bytes(p[0..4].try_into().unwrap()), 2000);
        assert_eq!(u32::from_le_bytes(p[4..8].try_into().unwrap()), 1990);
        assert_eq!(u16::from_le_bytes(p[8..10].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(p[10..12].try_into().unwrap()), 2);
        assert_eq!(&p[12..20], b"data.bin");
        assert!(p[267..].iter().all(|&b| b == 0x11));

        let last = Operation::SendFileChunk(FileChunk {
            transfer: &transfer,
            index: 2,
            bytes: &ciphertext[transfer.chunk_range(2).unwrap()],
        });
        assert_eq!(last.expected_responses(), &[ResponseCode::FileReceived]);
        let p = last.serialize(&id);
        let content = &p[23 + 267..];
        assert!(content[..976].iter().all(|&b| b == 0x11));
        assert!(content[976..].iter().all(|&b| b == 0));
    }

    #[test]
    fn file_received_cross_checks() {
        let transfer = FileTransferState::new("data.bin", 10, 100).unwrap();
        let id = ClientId::random();
        let op = Operation::SendFileChunk(FileChunk {
            transfer: &transfer,
            index: 1,
            bytes: &[0u8; 100],
        });
        let ok = op.apply(
            &id,
            &response(ResponseCode::FileReceived, file_received(&id, 100, "data.bin", 77)),
        );
        assert_eq!(ok.unwrap(), StepOutcome::FileReceived { checksum: 77 });

        let wrong_size = op.apply(
            &id,
            &response(ResponseCode::FileReceived, file_received(&id, 99, "data.bin", 77)),
        );
        assert!(wrong_size.is_err());
        let wrong_name = op.apply(
            &id,
            &response(ResponseCode::FileReceived, file_received(&id, 100, "other.bin", 77)),
        );
        assert!(wrong_name.is_err());
    }

    #[test]
    fn retry_checksum_expects_nothing() {
        let op = Operation::RetryChecksum { file_name: "f" };
        assert!(!op.expects_response());
        let frame = op.serialize(&ClientId::random());
        assert_eq!(frame.len(), 23 + 255);
        assert_eq!(u16::from_le_bytes([frame[17], frame[18]]), 901);
    }

    #[test]
    fn general_error_rejected() {
        let op = Operation::AbortChecksum { file_name: "f" };
        let r = op.apply(&ClientId::random(), &response(ResponseCode::GeneralError, vec![]));
        assert!(matches!(r, Err(ProtocolError::UnexpectedResponse(_))));
    }
}
