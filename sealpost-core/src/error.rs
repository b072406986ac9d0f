//! Error taxonomy shared by operations and the session controller.

use std::fmt;

use crate::chunk::ChunkError;
use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::store::StoreError;
use crate::wire::WireError;

/// Failure of one protocol step.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("connection: {0}")]
    Connection(#[from] std::io::Error),
    #[error("malformed header: expected {expected} bytes, got {got}")]
    MalformedHeader { expected: usize, got: usize },
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
    #[error("identity store: {0}")]
    Store(#[from] StoreError),
    #[error("transfer: {0}")]
    Chunk(#[from] ChunkError),
    #[error("gave up after {attempts} attempts: {last}")]
    AttemptsExhausted {
        attempts: u32,
        last: Box<ProtocolError>,
    },
}

impl ProtocolError {
    pub(crate) fn unexpected(msg: impl Into<String>) -> Self {
        ProtocolError::UnexpectedResponse(msg.into())
    }

    /// Transport and validation failures consume a retry attempt; everything else is fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Connection(_)
                | ProtocolError::MalformedHeader { .. }
                | ProtocolError::UnexpectedResponse(_)
        )
    }
}

impl From<WireError> for ProtocolError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::MalformedHeader { expected, got } => {
                ProtocolError::MalformedHeader { expected, got }
            }
            WireError::Truncated => ProtocolError::unexpected("payload truncated"),
        }
    }
}

/// Protocol step named in a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    IdentityLoad,
    Registration,
    SendingPublicKey,
    Reconnection,
    KeyExchange,
    FileTransfer,
    ChecksumConfirmation,
    ChecksumAbort,
    IdentityPersistence,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::IdentityLoad => "Identity Load",
            Step::Registration => "Registration",
            Step::SendingPublicKey => "Sending Public Key",
            Step::Reconnection => "Reconnection",
            Step::KeyExchange => "Key Exchange",
            Step::FileTransfer => "File Transfer",
            Step::ChecksumConfirmation => "Checksum Confirmation",
            Step::ChecksumAbort => "Checksum Abort",
            Step::IdentityPersistence => "Identity Persistence",
        })
    }
}

/// A run ended in `Failed`: which step, and why.
#[derive(Debug, thiserror::Error)]
#[error("{step} failed: {source}")]
pub struct SessionError {
    pub step: Step,
    #[source]
    pub source: ProtocolError,
}

impl SessionError {
    pub fn new(step: Step, source: impl Into<ProtocolError>) -> Self {
        Self {
            step,
            source: source.into(),
        }
    }
}
