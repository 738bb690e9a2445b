//! Common error types shared across crates.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for cipher backends, key material, and field access.
///
/// Variants fall into two groups:
/// - recovered per field by the coordinator's read path
///   ([`CryptError::DecryptionFailure`], [`CryptError::FieldAccessFailure`]);
/// - surfaced to the caller ([`CryptError::KeyUnavailable`],
///   [`CryptError::EncryptionFailure`], [`CryptError::UnknownMarkerGeneration`],
///   [`CryptError::Io`]).
///
/// Messages never carry key material or field plaintext.
#[derive(Debug, Error)]
pub enum CryptError {
    /// The key file is missing and could not be created, or is unreadable.
    #[error("key unavailable at {}: {reason}", path.display())]
    KeyUnavailable { path: PathBuf, reason: String },

    /// Ciphertext could not be read by the selected backend.
    #[error("decryption failure: {0}")]
    DecryptionFailure(String),

    /// The cipher rejected an encryption request.
    #[error("encryption failure: {0}")]
    EncryptionFailure(String),

    /// Encoding was requested for a generation the codec does not know.
    #[error("unknown marker generation: {0}")]
    UnknownMarkerGeneration(String),

    /// The host's getter or setter for a field failed.
    #[error("field access failure on `{field}`: {reason}")]
    FieldAccessFailure { field: String, reason: String },

    /// Reading or writing a file for file encryption failed.
    #[error("i/o failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CryptError {
    /// Short machine-readable code, safe for log fields.
    pub fn code(&self) -> &'static str {
        match self {
            CryptError::KeyUnavailable { .. } => "key_unavailable",
            CryptError::DecryptionFailure(_) => "decryption_failure",
            CryptError::EncryptionFailure(_) => "encryption_failure",
            CryptError::UnknownMarkerGeneration(_) => "unknown_marker_generation",
            CryptError::FieldAccessFailure { .. } => "field_access_failure",
            CryptError::Io { .. } => "io_failure",
        }
    }

    /// Returns `true` for failures the read path absorbs without raising.
    pub fn is_recoverable_on_read(&self) -> bool {
        matches!(
            self,
            CryptError::DecryptionFailure(_) | CryptError::FieldAccessFailure { .. }
        )
    }

    /// Convenience constructor for [`CryptError::FieldAccessFailure`].
    pub fn field_access(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CryptError::FieldAccessFailure {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(
            CryptError::DecryptionFailure("x".into()).code(),
            "decryption_failure"
        );
        assert_eq!(
            CryptError::UnknownMarkerGeneration("v9".into()).code(),
            "unknown_marker_generation"
        );
        assert_eq!(
            CryptError::field_access("ssn", "no setter").code(),
            "field_access_failure"
        );
    }

    #[test]
    fn read_path_recovery_classes() {
        assert!(CryptError::DecryptionFailure("x".into()).is_recoverable_on_read());
        assert!(CryptError::field_access("ssn", "x").is_recoverable_on_read());
        assert!(!CryptError::EncryptionFailure("x".into()).is_recoverable_on_read());
        let key = CryptError::KeyUnavailable {
            path: "/keys/.v2.key".into(),
            reason: "permission denied".into(),
        };
        assert!(!key.is_recoverable_on_read());
    }

    #[test]
    fn display_includes_path_and_field() {
        let e = CryptError::KeyUnavailable {
            path: "/keys/.v2.key".into(),
            reason: "permission denied".into(),
        };
        assert!(e.to_string().contains("/keys/.v2.key"));
        let e = CryptError::field_access("ssn", "getter panicked");
        assert!(e.to_string().contains("`ssn`"));
    }
}
