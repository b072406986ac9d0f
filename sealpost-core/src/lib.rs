//! Sealpost protocol engine: registers or reconnects a client, exchanges keys and sends one
//! encrypted file in chunks, then settles the server's checksum.
//! Host-driven: sockets, key files and the crypto backend come in through traits.

pub mod chunk;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod integrity;
pub mod operation;
pub mod protocol;
pub mod session;
pub mod store;
pub mod transport;
pub mod wire;

pub use config::{ConfigError, TransferConfig, TransferInput};
pub use crypto::{CryptoError, CryptoProvider, X25519Crypto};
pub use error::{ProtocolError, SessionError, Step};
pub use identity::{ClientId, ClientIdentity, PrivateKey, PublicKey, StoredIdentity};
pub use protocol::{OpCode, ResponseCode, PROTOCOL_VERSION};
pub use session::{OutgoingFile, RetryPolicy, RunReport, Session, SessionState, TransferOutcome};
pub use store::{IdentityStore, MemoryIdentityStore, StoreError};
pub use transport::{StreamTransport, Transport};
