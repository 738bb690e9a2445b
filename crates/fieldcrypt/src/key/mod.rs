//! Symmetric key material for cipher backends.
//!
//! # Lifecycle
//!
//! 1. A backend is constructed with a [`KeySource`]; no I/O happens yet.
//! 2. On first use, a [`KeySource::File`] reads its key file, or generates
//!    [`KEY_LEN`] random bytes and persists them with an atomic
//!    create-if-absent before returning.
//! 3. The key is cached in memory for the life of the backend.
//!
//! # Security invariants
//!
//! - Key bytes are never logged or included in error messages; only the
//!   [`KeyBytes::fingerprint`] may appear in logs.
//! - Losing a key file permanently loses access to ciphertext produced with it.

pub mod store;

pub use store::{KeyBytes, KeyError, KeyFile, KEY_LEN};

use std::path::PathBuf;
use std::sync::Arc;

const LEGACY_DERIVATION_LABEL: &[u8] = b"fieldcrypt legacy key v1";

/// Where a backend's key comes from.
#[derive(Debug)]
pub enum KeySource {
    /// A key file, loaded or generated on first use.
    File(KeyFile),
    /// A key derived up front from a legacy secret string.
    Derived(Arc<KeyBytes>),
}

impl KeySource {
    /// Key file at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        KeySource::File(KeyFile::new(path))
    }

    /// Key derived from a legacy secret (e.g. a pre-migration application secret).
    pub fn from_secret(secret: &str) -> Self {
        KeySource::Derived(Arc::new(KeyBytes::derive(
            secret.as_bytes(),
            LEGACY_DERIVATION_LABEL,
        )))
    }

    /// Materialise the key.
    ///
    /// # Errors
    ///
    /// Propagates [`KeyError`] from the key file.
    pub fn key(&self) -> Result<Arc<KeyBytes>, KeyError> {
        match self {
            KeySource::File(file) => file.key(),
            KeySource::Derived(key) => Ok(Arc::clone(key)),
        }
    }
}
