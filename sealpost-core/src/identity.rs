//! Client identity and key material: 128-bit client id, display name, key handles.

use std::fmt;

use uuid::Uuid;

use crate::protocol::{ENCRYPTED_KEY_FIELD_SIZE, PUBLIC_KEY_FIELD_SIZE};

/// Server-assigned client id (128 bits). Nil until the first Register/Reconnect response.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn nil() -> Self {
        ClientId(Uuid::nil())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        ClientId(Uuid::from_bytes(bytes))
    }

    /// Fresh random id. Servers assign ids; this exists for test servers and fixtures.
    pub fn random() -> Self {
        ClientId(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// 32 lowercase hex digits, no separators.
    pub fn to_hex(&self) -> String {
        self.0.simple().to_string()
    }

    /// Parse exactly 32 hex digits (no separators).
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Uuid::try_parse(s).ok().map(ClientId)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.to_hex())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Who this client is: display name plus the id the server assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub name: String,
    pub id: ClientId,
}

impl ClientIdentity {
    /// Identity that has not been registered yet.
    pub fn unregistered(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: ClientId::nil(),
        }
    }
}

/// Encoded asymmetric public key, at most `PUBLIC_KEY_FIELD_SIZE` bytes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    /// Wrap an encoded public key. Returns None if it does not fit the wire field.
    pub fn from_bytes(bytes: Vec<u8>) -> Option<Self> {
        (bytes.len() <= PUBLIC_KEY_FIELD_SIZE).then_some(PublicKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Encoded asymmetric private key, as persisted by the identity store.
#[derive(Clone, Eq, PartialEq)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        PrivateKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(<{} bytes>)", self.0.len())
    }
}

/// 256-bit symmetric session key. Lives only in memory for one run.
#[derive(Clone, Eq, PartialEq)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SessionKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// Session key as delivered by the server, encrypted under the client's public key.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EncryptedSessionKey(Box<[u8; ENCRYPTED_KEY_FIELD_SIZE]>);

impl EncryptedSessionKey {
    pub fn from_field(field: &[u8]) -> Option<Self> {
        let arr: [u8; ENCRYPTED_KEY_FIELD_SIZE] = field.try_into().ok()?;
        Some(EncryptedSessionKey(Box::new(arr)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

/// A persisted identity as read back from the identity store.
#[derive(Debug, Clone)]
pub struct StoredIdentity {
    pub identity: ClientIdentity,
    pub private_key: PrivateKey,
}
