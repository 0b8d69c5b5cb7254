//! root-key storage
//!
//! The service persists the root key of every macaroon it mints, keyed
//! by macaroon id, so that verification can recover it later. The
//! backing store is host-provided; [MemStorage] serves single-process
//! services and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use time::OffsetDateTime;
use zeroize::Zeroize;

use crate::error::Error;

/// A stored root-key record.
///
/// The expiry is a hint derived from the macaroon's earliest
/// `time-before` caveat; a store may garbage-collect the item after
/// that point, since the macaroon can no longer verify anyway.
#[derive(Clone)]
pub struct StorageItem {
    pub root_key: Vec<u8>,
    pub expiry: Option<OffsetDateTime>,
}

impl Drop for StorageItem {
    fn drop(&mut self) {
        self.root_key.zeroize();
    }
}

impl std::fmt::Debug for StorageItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageItem")
            .field("root_key", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// A keyed blob store of root-key records.
///
/// Implementations must be safe for concurrent readers and writers;
/// the bakery serialises access per id, not globally. `get` on an
/// unknown id returns [`Error::NotFound`]. A host may return
/// [`Error::Cancelled`] from any method to abort the surrounding
/// operation; the bakery then performs no further writes.
pub trait Storage: Send + Sync {
    fn put(&self, id: &[u8], item: StorageItem) -> Result<(), Error>;
    fn get(&self, id: &[u8]) -> Result<StorageItem, Error>;
    fn del(&self, id: &[u8]) -> Result<(), Error>;
}

/// In-memory [Storage].
#[derive(Default)]
pub struct MemStorage {
    items: RwLock<HashMap<Vec<u8>, StorageItem>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStorage {
    fn put(&self, id: &[u8], item: StorageItem) -> Result<(), Error> {
        let mut items = self
            .items
            .write()
            .map_err(|_| Error::Storage("lock poisoned".to_owned()))?;
        items.insert(id.to_vec(), item);
        Ok(())
    }

    fn get(&self, id: &[u8]) -> Result<StorageItem, Error> {
        let items = self
            .items
            .read()
            .map_err(|_| Error::Storage("lock poisoned".to_owned()))?;
        items.get(id).cloned().ok_or(Error::NotFound)
    }

    fn del(&self, id: &[u8]) -> Result<(), Error> {
        let mut items = self
            .items
            .write()
            .map_err(|_| Error::Storage("lock poisoned".to_owned()))?;
        items.remove(id);
        Ok(())
    }
}
