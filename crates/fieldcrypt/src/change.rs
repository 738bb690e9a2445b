//! Plaintext change detection for the write path.
//!
//! Ciphertext from every backend is non-deterministic, so a freshly encrypted
//! value never equals the committed one byte-for-byte. Comparing plaintexts
//! instead lets the write path put the committed ciphertext back for
//! unchanged fields, which keeps the host's dirty tracking (and any
//! optimistic-concurrency check built on it) quiet.

use fieldcrypt_common::{MarkerCodec, StoredValue};
use tracing::debug;

use crate::backend::{decrypt_text, Backends};
use crate::host::OriginalValue;

/// Outcome of comparing a field's committed value with its in-memory value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// The plaintext differs, or it cannot be shown to be equal.
    Changed,
    /// The plaintext is equal; the committed stored value should be restored.
    Unchanged,
}

/// Decides whether a field's plaintext changed since it was committed.
#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector<'a> {
    codec: &'a MarkerCodec,
    backends: &'a Backends,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(codec: &'a MarkerCodec, backends: &'a Backends) -> Self {
        Self { codec, backends }
    }

    /// Compare `original` (committed, possibly encrypted) with `current`
    /// (in-memory plaintext).
    ///
    /// Any doubt resolves to [`Change::Changed`]: no snapshot, no backend for
    /// the original's generation, or a failed decrypt.
    pub fn detect(&self, original: &OriginalValue, current: &str) -> Change {
        let stored = match original {
            OriginalValue::Unknown => return Change::Changed,
            OriginalValue::Null => None,
            OriginalValue::Stored(s) => Some(s.as_str()),
        };

        let original_plain = match self.codec.classify(stored) {
            StoredValue::Empty => "",
            StoredValue::PlainUnmarked(plain) => plain,
            StoredValue::Marked { generation, body } => {
                let Some(backend) = self.backends.for_generation(generation) else {
                    debug!(%generation, "no backend for committed value; treating as changed");
                    return Change::Changed;
                };
                return match decrypt_text(backend, body) {
                    Ok(plain) if plain == current => Change::Unchanged,
                    Ok(_) => Change::Changed,
                    Err(e) => {
                        debug!(code = e.code(), "committed value unreadable; treating as changed");
                        Change::Changed
                    }
                };
            }
        };

        if original_plain == current {
            Change::Unchanged
        } else {
            Change::Changed
        }
    }
}
