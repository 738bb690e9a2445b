//! Identities of records currently holding decrypted plaintext.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use crate::host::RecordKey;

/// Mutex-guarded set of [`RecordKey`]s whose encryptable fields were
/// decrypted in memory and must be re-encrypted before the next flush.
#[derive(Debug, Default)]
pub struct DecryptedSet {
    keys: Mutex<HashSet<RecordKey>>,
}

impl DecryptedSet {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means another thread panicked mid-insert; the set
    // itself is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashSet<RecordKey>> {
        self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add `key`; returns `false` if it was already present.
    pub fn insert(&self, key: RecordKey) -> bool {
        self.lock().insert(key)
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.lock().contains(key)
    }

    /// Remove and return every key.
    pub fn drain(&self) -> Vec<RecordKey> {
        self.lock().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sorted copy of the current keys.
    pub fn snapshot(&self) -> Vec<RecordKey> {
        let mut keys: Vec<RecordKey> = self.lock().iter().cloned().collect();
        keys.sort();
        keys
    }
}
