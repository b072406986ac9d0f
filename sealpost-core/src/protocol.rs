//! Sealpost wire protocol: operation codes, response codes, field widths and limits.

/// Protocol version stamped on every request header.
pub const PROTOCOL_VERSION: u8 = 3;

/// Width of a 128-bit client id on the wire.
pub const CLIENT_ID_SIZE: usize = 16;
/// Fixed width of name and file name fields.
pub const NAME_FIELD_SIZE: usize = 255;
/// Fixed width of the public key field.
pub const PUBLIC_KEY_FIELD_SIZE: usize = 160;
/// Fixed width of the encrypted session key field.
pub const ENCRYPTED_KEY_FIELD_SIZE: usize = 160;
/// Ciphertext bytes carried by one file chunk request.
pub const CHUNK_SIZE: usize = 1024;
/// Width of the checksum carried by FileReceived.
pub const CHECKSUM_SIZE: usize = 4;

/// Longest display name accepted from configuration or the identity store.
pub const MAX_NAME_LEN: usize = 100;
/// Longest file name kept for a transfer; leaves room for a terminating NUL in the field.
pub const MAX_FILE_NAME_LEN: usize = NAME_FIELD_SIZE - 1;

/// Attempts for one logical request/response exchange.
pub const MAX_REQUEST_ATTEMPTS: u32 = 3;
/// Full transfer passes before a checksum mismatch is given up on.
pub const MAX_CHECKSUM_RETRIES: u32 = 3;

/// Request operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OpCode {
    Register = 825,
    SendPublicKey = 826,
    Reconnect = 827,
    SendFileChunk = 828,
    ConfirmChecksum = 900,
    RetryChecksum = 901,
    AbortChecksum = 902,
}

impl OpCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            825 => OpCode::Register,
            826 => OpCode::SendPublicKey,
            827 => OpCode::Reconnect,
            828 => OpCode::SendFileChunk,
            900 => OpCode::ConfirmChecksum,
            901 => OpCode::RetryChecksum,
            902 => OpCode::AbortChecksum,
            _ => return None,
        })
    }
}

/// Response codes sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResponseCode {
    RegisterOk = 1600,
    RegisterFailed = 1601,
    KeyReceived = 1602,
    FileReceived = 1603,
    Ack = 1604,
    ReconnectOk = 1605,
    ReconnectAsNew = 1606,
    GeneralError = 1607,
}

impl ResponseCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            1600 => ResponseCode::RegisterOk,
            1601 => ResponseCode::RegisterFailed,
            1602 => ResponseCode::KeyReceived,
            1603 => ResponseCode::FileReceived,
            1604 => ResponseCode::Ack,
            1605 => ResponseCode::ReconnectOk,
            1606 => ResponseCode::ReconnectAsNew,
            1607 => ResponseCode::GeneralError,
            _ => return None,
        })
    }

    /// Payload size the server declares for this response.
    pub fn payload_size(self) -> u32 {
        match self {
            ResponseCode::RegisterFailed | ResponseCode::GeneralError => 0,
            ResponseCode::RegisterOk | ResponseCode::Ack | ResponseCode::ReconnectAsNew => {
                CLIENT_ID_SIZE as u32
            }
            ResponseCode::KeyReceived | ResponseCode::ReconnectOk => {
                (CLIENT_ID_SIZE + ENCRYPTED_KEY_FIELD_SIZE) as u32
            }
            ResponseCode::FileReceived => {
                (CLIENT_ID_SIZE + 4 + NAME_FIELD_SIZE + CHECKSUM_SIZE) as u32
            }
        }
    }
}

/// Largest payload any legal response carries (FileReceived).
pub const MAX_RESPONSE_PAYLOAD: u32 =
    (CLIENT_ID_SIZE + 4 + NAME_FIELD_SIZE + CHECKSUM_SIZE) as u32;

/// Request payload sizes per operation.
pub const REGISTER_PAYLOAD_SIZE: u32 = NAME_FIELD_SIZE as u32;
/// Confirm, Retry and Abort checksum requests carry only the file name.
pub const FILE_NAME_PAYLOAD_SIZE: u32 = NAME_FIELD_SIZE as u32;
pub const SEND_PUBLIC_KEY_PAYLOAD_SIZE: u32 = (NAME_FIELD_SIZE + PUBLIC_KEY_FIELD_SIZE) as u32;
pub const SEND_FILE_CHUNK_PAYLOAD_SIZE: u32 =
    (4 + 4 + 2 + 2 + NAME_FIELD_SIZE + CHUNK_SIZE) as u32;
