//! Persistent byte storage for fetched accelerator modules
//!
//! Only raw module bytes are persisted; compiled module objects never are.
//! Entries are keyed by the loader's logical cache key (`"{id}@{version}"`)
//! and stored under a namespace directory so independent caches can share a
//! parent directory. Writes are idempotent, so the namespace is safe to
//! share across loader instances and processes.

use crate::error::StorageError;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Storage tier consumed by the accelerator loader.
///
/// Every method is best-effort from the loader's perspective: a failure is
/// logged and the cascade proceeds without persistence.
pub trait ModuleStore: Send + Sync {
  /// Returns the bytes stored under `key`, or `None` on a miss.
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

  /// Stores `bytes` under `key`, replacing any previous value.
  fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

  /// Drops the entry under `key`; absent entries are not an error.
  fn remove(&self, key: &str) -> Result<(), StorageError>;

  /// Drops the whole namespace.
  fn clear(&self) -> Result<(), StorageError>;
}

impl<T: ModuleStore + ?Sized> ModuleStore for std::sync::Arc<T> {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
    (**self).get(key)
  }

  fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
    (**self).put(key, bytes)
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    (**self).remove(key)
  }

  fn clear(&self) -> Result<(), StorageError> {
    (**self).clear()
  }
}

/// Strategy for platforms without persistent storage: every lookup misses
/// and every write succeeds without effect, so the loader's tier cascade
/// stays a straight-line sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStore;

impl ModuleStore for NoopStore {
  fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StorageError> {
    Ok(None)
  }

  fn put(&self, _key: &str, _bytes: &[u8]) -> Result<(), StorageError> {
    Ok(())
  }

  fn remove(&self, _key: &str) -> Result<(), StorageError> {
    Ok(())
  }

  fn clear(&self) -> Result<(), StorageError> {
    Ok(())
  }
}

/// Disk-backed module store.
///
/// Layout: `<dir>/<namespace>/<sha256(key)>.bin`. Writes go through a
/// sibling `.tmp` file and a rename, so concurrent writers of the same key
/// (which by construction carry identical bytes) cannot leave a torn entry.
#[derive(Debug, Clone)]
pub struct DiskStore {
  root: PathBuf,
}

impl DiskStore {
  /// Opens (creating if needed) the namespace directory under `dir`.
  pub fn open(dir: impl AsRef<Path>, namespace: &str) -> Result<Self, StorageError> {
    let root = dir.as_ref().join(sanitize_component(namespace));
    fs::create_dir_all(&root)?;
    Ok(Self { root })
  }

  /// The namespace directory backing this store.
  pub fn root(&self) -> &Path {
    &self.root
  }

  fn entry_path(&self, key: &str) -> PathBuf {
    self.root.join(format!("{}.bin", hash_key(key)))
  }
}

impl ModuleStore for DiskStore {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(self.entry_path(key)) {
      Ok(bytes) => Ok(Some(bytes)),
      Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
      Err(err) => Err(err.into()),
    }
  }

  fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
    // clear() removes the namespace directory wholesale; recreate lazily.
    fs::create_dir_all(&self.root)?;
    let path = self.entry_path(key);
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, &path)?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    match fs::remove_file(self.entry_path(key)) {
      Ok(()) => Ok(()),
      Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
      Err(err) => Err(err.into()),
    }
  }

  fn clear(&self) -> Result<(), StorageError> {
    match fs::remove_dir_all(&self.root) {
      Ok(()) => Ok(()),
      Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
      Err(err) => Err(err.into()),
    }
  }
}

fn hash_key(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  let digest = hasher.finalize();
  const HEX: &[u8; 16] = b"0123456789abcdef";
  let mut out = String::with_capacity(64);
  for &b in digest.iter() {
    out.push(HEX[(b >> 4) as usize] as char);
    out.push(HEX[(b & 0x0f) as usize] as char);
  }
  out
}

fn sanitize_component(input: &str) -> String {
  let mut sanitized: String = input
    .chars()
    .map(|c| {
      if c.is_alphanumeric() || c == '.' || c == '_' || c == '-' {
        c
      } else {
        '_'
      }
    })
    .collect();
  while sanitized.ends_with('_') {
    sanitized.pop();
  }
  if sanitized.is_empty() {
    sanitized.push_str("default");
  }
  sanitized
}
