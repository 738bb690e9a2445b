//! Operation counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the coordinator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Fields decrypted into memory.
    pub decrypted: u64,
    /// Fields encrypted for storage.
    pub encrypted: u64,
    /// Marked fields no backend could decrypt.
    pub failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    decrypted: AtomicU64,
    encrypted: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    pub(crate) fn decrypted(&self) {
        self.decrypted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn encrypted(&self) {
        self.encrypted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            decrypted: self.decrypted.load(Ordering::Relaxed),
            encrypted: self.encrypted.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}
