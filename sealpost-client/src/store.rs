//! File-backed identity store: `me.info` (name, hex id, base64 private key) plus a
//! `priv.key` mirror of the private key.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sealpost_core::config::validate_name;
use sealpost_core::{
    ClientId, ClientIdentity, IdentityStore, PrivateKey, StoreError, StoredIdentity,
};
use tracing::debug;

pub const ME_INFO: &str = "me.info";
pub const PRIV_KEY: &str = "priv.key";

#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    dir: PathBuf,
}

impl FileIdentityStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<StoredIdentity>, StoreError> {
        let me_path = self.dir.join(ME_INFO);
        if !me_path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&me_path)?;
        let mut lines = text.lines().map(|l| l.strip_suffix('\r').unwrap_or(l));
        let (Some(name), Some(hex), Some(key)) = (lines.next(), lines.next(), lines.next()) else {
            return Err(malformed("me.info needs name, id and key lines"));
        };
        validate_name(name).map_err(|e| malformed(e.to_string()))?;
        let id =
            ClientId::from_hex(hex).ok_or_else(|| malformed(format!("bad client id {hex:?}")))?;
        if id.is_nil() {
            return Err(malformed("nil client id"));
        }
        let key = decode_key(key)?;

        let mirror_path = self.dir.join(PRIV_KEY);
        if !mirror_path.exists() {
            return Err(malformed("priv.key is missing"));
        }
        let mirror = decode_key(fs::read_to_string(&mirror_path)?.trim())?;
        if mirror != key {
            return Err(StoreError::KeyMismatch);
        }
        debug!(dir = %self.dir.display(), client = %id, "identity loaded");
        Ok(Some(StoredIdentity {
            identity: ClientIdentity {
                name: name.to_owned(),
                id,
            },
            private_key: PrivateKey::from_bytes(key),
        }))
    }

    /// priv.key first, me.info last: `load` only trusts a directory once me.info exists.
    /// A crash between the two renames leaves keys that disagree, which `load` rejects.
    fn save(
        &mut self,
        identity: &ClientIdentity,
        private_key: &PrivateKey,
    ) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let key = STANDARD.encode(private_key.as_bytes());
        write_atomic(&self.dir, PRIV_KEY, format!("{key}\n").as_bytes())?;
        let me = format!("{}\n{}\n{}\n", identity.name, identity.id.to_hex(), key);
        write_atomic(&self.dir, ME_INFO, me.as_bytes())?;
        debug!(dir = %self.dir.display(), client = %identity.id, "identity written");
        Ok(())
    }
}

fn decode_key(text: &str) -> Result<Vec<u8>, StoreError> {
    let key = STANDARD
        .decode(text.trim())
        .map_err(|e| malformed(format!("private key is not base64: {e}")))?;
    if key.is_empty() {
        return Err(malformed("empty private key"));
    }
    Ok(key)
}

fn malformed(msg: impl Into<String>) -> StoreError {
    StoreError::Malformed(msg.into())
}

/// Write `name` in `dir` through a synced temp file and a rename.
fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = dir.join(format!("{name}.tmp"));
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, dir.join(name))?;
    #[cfg(unix)]
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> (ClientIdentity, PrivateKey) {
        (
            ClientIdentity {
                name: "alice".into(),
                id: ClientId::random(),
            },
            PrivateKey::from_bytes((0u8..32).collect()),
        )
    }

    #[test]
    fn empty_dir_has_no_identity() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileIdentityStore::new(dir.path()).load().unwrap().is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileIdentityStore::new(dir.path().join("nested"));
        let (ident, key) = identity();
        store.save(&ident, &key).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.identity, ident);
        assert_eq!(loaded.private_key.as_bytes(), key.as_bytes());

        let me = fs::read_to_string(store.dir().join(ME_INFO)).unwrap();
        let lines: Vec<&str> = me.lines().collect();
        assert_eq!(lines[0], "alice");
        assert_eq!(lines[1], ident.id.to_hex());
        assert_eq!(lines[1].len(), 32);
        assert!(!store.dir().join("me.info.tmp").exists());
    }

    #[test]
    fn save_replaces_previous_identity() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileIdentityStore::new(dir.path());
        let (first, key) = identity();
        store.save(&first, &key).unwrap();
        let second = ClientIdentity {
            name: "alice".into(),
            id: ClientId::random(),
        };
        let other = PrivateKey::from_bytes(vec![0xEE; 32]);
        store.save(&second, &other).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.identity.id, second.id);
        assert_eq!(loaded.private_key.as_bytes(), other.as_bytes());
    }

    #[test]
    fn diverging_key_copies_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileIdentityStore::new(dir.path());
        let (ident, key) = identity();
        store.save(&ident, &key).unwrap();
        fs::write(dir.path().join(PRIV_KEY), STANDARD.encode([9u8; 32])).unwrap();
        assert!(matches!(store.load(), Err(StoreError::KeyMismatch)));
    }

    #[test]
    fn save_interrupted_after_key_rename_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileIdentityStore::new(dir.path());
        let (ident, key) = identity();
        store.save(&ident, &key).unwrap();

        // New priv.key landed, new me.info did not.
        let next = PrivateKey::from_bytes(vec![0x5A; 32]);
        let encoded = format!("{}\n", STANDARD.encode(next.as_bytes()));
        write_atomic(dir.path(), PRIV_KEY, encoded.as_bytes()).unwrap();
        assert!(matches!(store.load(), Err(StoreError::KeyMismatch)));

        store.save(&ident, &next).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.private_key.as_bytes(), next.as_bytes());
    }

    #[test]
    fn malformed_records_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileIdentityStore::new(dir.path());
        let key = STANDARD.encode([1u8; 32]);
        fs::write(dir.path().join(PRIV_KEY), &key).unwrap();

        fs::write(dir.path().join(ME_INFO), format!("alice\nnot-hex\n{key}\n")).unwrap();
        assert!(matches!(store.load(), Err(StoreError::Malformed(_))));

        let long = "x".repeat(101);
        let id = ClientId::random().to_hex();
        fs::write(dir.path().join(ME_INFO), format!("{long}\n{id}\n{key}\n")).unwrap();
        assert!(matches!(store.load(), Err(StoreError::Malformed(_))));

        fs::write(dir.path().join(ME_INFO), format!("alice\n{id}\n")).unwrap();
        assert!(matches!(store.load(), Err(StoreError::Malformed(_))));

        fs::write(dir.path().join(ME_INFO), format!("alice\n{id}\n{key}\r\n")).unwrap();
        assert!(store.load().unwrap().is_some());
    }

    #[test]
    fn missing_mirror_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileIdentityStore::new(dir.path());
        let id = ClientId::random().to_hex();
        let key = STANDARD.encode([1u8; 32]);
        fs::write(dir.path().join(ME_INFO), format!("alice\n{id}\n{key}\n")).unwrap();
        assert!(matches!(store.load(), Err(StoreError::Malformed(_))));
    }
}
