//! Column-level conversion for hosts that encrypt in their type layer rather
//! than through lifecycle events.
//!
//! There is no read pass to absorb failures here, so a corrupt value carrying
//! the backend's marker is an error.

use fieldcrypt_common::{CryptError, MarkerCodec, StoredValue};

use crate::backend::{decrypt_text, SharedBackend};

/// Converts one column between its application and storage forms.
#[derive(Debug, Clone)]
pub struct EncryptedColumn {
    backend: SharedBackend,
    codec: MarkerCodec,
}

impl EncryptedColumn {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            codec: MarkerCodec::default(),
        }
    }

    /// Application value to stored value. Null and empty become `""`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::EncryptionFailure`] or
    /// [`CryptError::KeyUnavailable`] from the backend.
    pub fn to_storage(&self, value: Option<&str>) -> Result<String, CryptError> {
        match value {
            None | Some("") => Ok(String::new()),
            Some(v) => {
                let body = self.backend.encrypt(v.as_bytes())?;
                self.codec.encode(self.backend.generation(), &body)
            }
        }
    }

    /// Stored value to application value.
    ///
    /// Only values carrying this backend's marker are decrypted; anything
    /// else is returned as stored.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::DecryptionFailure`] if a marked value does not
    /// decrypt.
    pub fn to_application(&self, stored: Option<&str>) -> Result<String, CryptError> {
        match self.codec.classify(stored) {
            StoredValue::Empty => Ok(String::new()),
            StoredValue::Marked { generation, body } if generation == self.backend.generation() => {
                decrypt_text(&self.backend, body)
            }
            _ => Ok(stored.unwrap_or_default().to_owned()),
        }
    }
}
