//! # Key Store
//!
//! Durable home for the ledger's long-lived secrets. There are four of them,
//! one per [`KeySlot`]:
//!
//! | Slot              | Contents                               | File name             |
//! |-------------------|----------------------------------------|-----------------------|
//! | `PaillierPublic`  | JSON `{n, g}` (hex integers)           | `paillier_pub.json`   |
//! | `PaillierPrivate` | JSON `{lambda, mu, n}` (hex integers)  | `paillier_priv.json`  |
//! | `SearchKey`       | 32 raw bytes                           | `search_key.bin`      |
//! | `SigningKey`      | 32-byte Ed25519 seed                   | `audit_signing.key`   |
//!
//! The store only moves bytes. Parsing and validation belong to the
//! component that owns the key, which is also the component that decides
//! what "load or generate" means for it.
//!
//! Three backends ship with the crate: [`FileKeyStore`] (a directory on
//! disk), [`MemoryKeyStore`] (tests) and the sled-backed
//! [`LedgerDb`](super::db::LedgerDb).

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;

use crate::config::{
    PAILLIER_PRIVATE_KEY_FILE, PAILLIER_PUBLIC_KEY_FILE, SEARCH_KEY_FILE, SIGNING_KEY_FILE,
};

/// Errors raised by a key store backend.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key store I/O error on {slot}: {source}")]
    Io {
        slot: KeySlot,
        #[source]
        source: std::io::Error,
    },

    #[error("key store backend error: {0}")]
    Backend(String),
}

/// Which secret a key store entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySlot {
    PaillierPublic,
    PaillierPrivate,
    SearchKey,
    SigningKey,
}

impl KeySlot {
    /// Every slot, in a fixed order.
    pub const ALL: [KeySlot; 4] = [
        KeySlot::PaillierPublic,
        KeySlot::PaillierPrivate,
        KeySlot::SearchKey,
        KeySlot::SigningKey,
    ];

    /// File name used by [`FileKeyStore`], also used as the sled key.
    pub fn file_name(self) -> &'static str {
        match self {
            KeySlot::PaillierPublic => PAILLIER_PUBLIC_KEY_FILE,
            KeySlot::PaillierPrivate => PAILLIER_PRIVATE_KEY_FILE,
            KeySlot::SearchKey => SEARCH_KEY_FILE,
            KeySlot::SigningKey => SIGNING_KEY_FILE,
        }
    }

    /// Whether the slot holds secret material (file permissions get
    /// tightened for these).
    pub fn is_secret(self) -> bool {
        !matches!(self, KeySlot::PaillierPublic)
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Load/save capability for key material.
pub trait KeyStore: Send + Sync {
    /// Returns the stored bytes, or `None` if the slot has never been written.
    fn load(&self, slot: KeySlot) -> Result<Option<Vec<u8>>, KeyStoreError>;

    /// Persist `bytes` into `slot`, replacing whatever was there.
    fn save(&self, slot: KeySlot, bytes: &[u8]) -> Result<(), KeyStoreError>;
}

// ---------------------------------------------------------------------------
// FileKeyStore
// ---------------------------------------------------------------------------

/// One file per slot inside a directory.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    /// Use `dir` as the key directory. Created lazily on first save.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Full path of the file backing `slot`.
    pub fn path_for(&self, slot: KeySlot) -> PathBuf {
        self.dir.join(slot.file_name())
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self, slot: KeySlot) -> Result<Option<Vec<u8>>, KeyStoreError> {
        match fs::read(self.path_for(slot)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(KeyStoreError::Io { slot, source }),
        }
    }

    fn save(&self, slot: KeySlot, bytes: &[u8]) -> Result<(), KeyStoreError> {
        let io = |source| KeyStoreError::Io { slot, source };
        fs::create_dir_all(&self.dir).map_err(io)?;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        // Secret files are created private, and an existing file is
        // tightened before any secret byte is written to it.
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            if slot.is_secret() {
                options.mode(0o600);
            }
        }
        let mut file = options.open(self.path_for(slot)).map_err(io)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if slot.is_secret() {
                file.set_permissions(fs::Permissions::from_mode(0o600)).map_err(io)?;
            }
        }

        file.write_all(bytes).map_err(io)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryKeyStore
// ---------------------------------------------------------------------------

/// In-memory key store. Lives as long as the value does.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    slots: RwLock<HashMap<KeySlot, Vec<u8>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self, slot: KeySlot) -> Result<Option<Vec<u8>>, KeyStoreError> {
        Ok(self.slots.read().get(&slot).cloned())
    }

    fn save(&self, slot: KeySlot, bytes: &[u8]) -> Result<(), KeyStoreError> {
        self.slots.write().insert(slot, bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryKeyStore::new();
        assert!(store.load(KeySlot::SearchKey).unwrap().is_none());
        store.save(KeySlot::SearchKey, &[1, 2, 3]).unwrap();
        assert_eq!(store.load(KeySlot::SearchKey).unwrap(), Some(vec![1, 2, 3]));
        assert!(store.load(KeySlot::SigningKey).unwrap().is_none());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("keys"));

        for slot in KeySlot::ALL {
            assert!(store.load(slot).unwrap().is_none());
        }

        store.save(KeySlot::PaillierPublic, b"{}").unwrap();
        assert_eq!(
            store.load(KeySlot::PaillierPublic).unwrap(),
            Some(b"{}".to_vec())
        );
        assert!(store.path_for(KeySlot::PaillierPublic).ends_with("paillier_pub.json"));
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_files_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path());
        let mode = |slot| {
            fs::metadata(store.path_for(slot))
                .unwrap()
                .permissions()
                .mode()
                & 0o777
        };

        for slot in KeySlot::ALL.iter().copied().filter(|s| s.is_secret()) {
            store.save(slot, &[0u8; 32]).unwrap();
            assert_eq!(mode(slot), 0o600, "{slot}");
        }

        // A file left world-readable by something else is tightened, and
        // still ends up holding exactly the new bytes.
        let path = store.path_for(KeySlot::SigningKey);
        fs::write(&path, b"a much longer stale seed value").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        store.save(KeySlot::SigningKey, &[7u8; 32]).unwrap();
        assert_eq!(mode(KeySlot::SigningKey), 0o600);
        assert_eq!(store.load(KeySlot::SigningKey).unwrap(), Some(vec![7u8; 32]));
    }

    #[test]
    fn test_slot_file_names_are_distinct() {
        let mut names: Vec<_> = KeySlot::ALL.iter().map(|s| s.file_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), KeySlot::ALL.len());
    }
}
