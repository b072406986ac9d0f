//! Identity store port: where the client's name, id and private key live between runs.

use crate::identity::{ClientIdentity, PrivateKey, StoredIdentity};

/// Persistence for the client identity. A crash mid-`save` may leave the store in a
/// state `load` rejects, but never a mix of old and new identity that `load` accepts.
pub trait IdentityStore {
    /// Persisted identity, or None if this client never registered.
    fn load(&self) -> Result<Option<StoredIdentity>, StoreError>;

    fn save(&mut self, identity: &ClientIdentity, private_key: &PrivateKey)
        -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("identity store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity record is malformed: {0}")]
    Malformed(String),
    #[error("private key copies disagree")]
    KeyMismatch,
}

/// In-memory store. Useful for tests and for hosts that manage persistence themselves.
#[derive(Debug, Default, Clone)]
pub struct MemoryIdentityStore {
    stored: Option<StoredIdentity>,
    saves: usize,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: ClientIdentity, private_key: PrivateKey) -> Self {
        Self {
            stored: Some(StoredIdentity {
                identity,
                private_key,
            }),
            saves: 0,
        }
    }

    pub fn stored(&self) -> Option<&StoredIdentity> {
        self.stored.as_ref()
    }

    /// Number of successful `save` calls.
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Result<Option<StoredIdentity>, StoreError> {
        Ok(self.stored.clone())
    }

    fn save(
        &mut self,
        identity: &ClientIdentity,
        private_key: &PrivateKey,
    ) -> Result<(), StoreError> {
        self.stored = Some(StoredIdentity {
            identity: identity.clone(),
            private_key: private_key.clone(),
        });
        self.saves += 1;
        Ok(())
    }
}
