//! Process-wide cache of resolved encryptable fields, keyed by record type.
//!
//! Reads go through [`ArcSwap`] and never block; a miss resolves the type and
//! inserts it with read-copy-update.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::resolver::EncryptableField;

/// Resolved fields for one record type.
pub type FieldList = Arc<[EncryptableField]>;

/// Lock-free map from record type to its encryptable fields.
#[derive(Debug)]
pub struct FieldCache {
    inner: ArcSwap<HashMap<String, FieldList>>,
}

impl FieldCache {
    pub fn new() -> Self {
        Self {
            inner: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Number of record types cached.
    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }

    /// Cached fields for `record_type`, if resolved already.
    pub fn get(&self, record_type: &str) -> Option<FieldList> {
        self.inner.load().get(record_type).cloned()
    }

    /// Return the cached entry for `record_type`, resolving it with `resolve`
    /// on a miss.
    ///
    /// Two racing misses may both resolve; the first insert wins and both
    /// callers get that entry.
    pub fn get_or_insert_with<F>(&self, record_type: &str, resolve: F) -> FieldList
    where
        F: FnOnce() -> Vec<EncryptableField>,
    {
        if let Some(hit) = self.get(record_type) {
            return hit;
        }
        let fresh: FieldList = resolve().into();
        self.inner.rcu(|current| {
            if current.contains_key(record_type) {
                return Arc::clone(current);
            }
            let mut next = HashMap::clone(current);
            next.insert(record_type.to_owned(), Arc::clone(&fresh));
            Arc::new(next)
        });
        self.get(record_type).unwrap_or(fresh)
    }

    /// Names of every cached record type, sorted.
    pub fn record_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.inner.load().keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for FieldCache {
    fn default() -> Self {
        Self::new()
    }
}
