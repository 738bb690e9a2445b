//! Cipher backends: the uniform encrypt/decrypt contract over a symmetric key.
//!
//! This module is free of host/record concerns. It provides the backends, the
//! selector used by configuration, and [`Backends`], the per-pass view that
//! routes a stored value to the backend matching its marker generation.

pub mod aead;

pub use aead::{AesGcmBackend, AesGcmSivBackend, XChaChaBackend};

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use fieldcrypt_common::{CryptError, Generation, MarkerCodec, StoredValue};

use crate::key::KeySource;

/// A symmetric-key encrypt/decrypt provider producing one marker generation.
///
/// Implementors supply [`CipherBackend::seal`] and [`CipherBackend::open`];
/// the provided [`CipherBackend::encrypt`] and [`CipherBackend::decrypt`]
/// short-circuit empty input so the cipher is never invoked for it.
pub trait CipherBackend: Send + Sync + fmt::Debug {
    /// Generation whose marker this backend's ciphertext carries.
    fn generation(&self) -> Generation;

    /// Encrypt non-empty plaintext into an encoded body (no marker).
    fn seal(&self, plaintext: &[u8]) -> Result<String, CryptError>;

    /// Decrypt a non-empty encoded body (marker already stripped).
    fn open(&self, body: &str) -> Result<Vec<u8>, CryptError>;

    /// Materialise the key and return its loggable fingerprint.
    fn key_fingerprint(&self) -> Result<String, CryptError>;

    /// Encrypt `plaintext`; empty input returns an empty body.
    fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        self.seal(plaintext)
    }

    /// Decrypt `ciphertext`; empty input returns empty output.
    fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, CryptError> {
        if ciphertext.is_empty() {
            return Ok(Vec::new());
        }
        self.open(ciphertext)
    }

    /// Encrypt the whole of `input` into `output` as an encoded body.
    fn encrypt_file(&self, input: &Path, output: &Path) -> Result<(), CryptError> {
        let data = fs::read(input).map_err(|source| io_error(input, source))?;
        let body = self.encrypt(&data)?;
        fs::write(output, body).map_err(|source| io_error(output, source))
    }

    /// Reverse of [`CipherBackend::encrypt_file`].
    fn decrypt_file(&self, input: &Path, output: &Path) -> Result<(), CryptError> {
        let body = fs::read_to_string(input).map_err(|source| io_error(input, source))?;
        let data = self.decrypt(body.trim_end())?;
        fs::write(output, data).map_err(|source| io_error(output, source))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CryptError {
    CryptError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Shared handle to a backend.
pub type SharedBackend = Arc<dyn CipherBackend>;

/// Backend implementation selector used by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// [`AesGcmBackend`], generation `V1`.
    AesGcm,
    /// [`AesGcmSivBackend`], generation `V2`.
    AesGcmSiv,
    /// [`XChaChaBackend`], generation `V3`.
    XChaCha20Poly1305,
}

impl BackendKind {
    /// Generation produced by this kind of backend.
    pub fn generation(self) -> Generation {
        match self {
            BackendKind::AesGcm => Generation::V1,
            BackendKind::AesGcmSiv => Generation::V2,
            BackendKind::XChaCha20Poly1305 => Generation::V3,
        }
    }

    /// File name of this kind's key inside the key directory.
    pub fn key_file_name(self) -> &'static str {
        match self {
            BackendKind::AesGcm => ".fieldcrypt-aes-gcm.key",
            BackendKind::AesGcmSiv => ".fieldcrypt-aes-gcm-siv.key",
            BackendKind::XChaCha20Poly1305 => ".fieldcrypt-xchacha20poly1305.key",
        }
    }

    /// Construct a backend of this kind over `key`.
    pub fn build(self, key: KeySource) -> SharedBackend {
        match self {
            BackendKind::AesGcm => Arc::new(AesGcmBackend::new(key)),
            BackendKind::AesGcmSiv => Arc::new(AesGcmSivBackend::new(key)),
            BackendKind::XChaCha20Poly1305 => Arc::new(XChaChaBackend::new(key)),
        }
    }

    /// Construct a backend keyed by this kind's file in `key_dir`.
    pub fn build_in(self, key_dir: &Path) -> SharedBackend {
        self.build(KeySource::file(key_dir.join(self.key_file_name())))
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-gcm" | "aes256gcm" => Ok(BackendKind::AesGcm),
            "aes-gcm-siv" | "aes256gcmsiv" => Ok(BackendKind::AesGcmSiv),
            "xchacha20poly1305" | "xchacha20-poly1305" | "xchacha" => {
                Ok(BackendKind::XChaCha20Poly1305)
            }
            other => Err(format!("unknown encryptor `{other}`")),
        }
    }
}

/// Result of reading one stored value.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Empty or unmarked: leave the value as stored.
    Untouched,
    /// Decrypted plaintext to write into the field.
    Decrypted(String),
    /// Ciphertext that no registered backend could read. The stored value is
    /// left as is.
    Failed(CryptError),
}

/// Backends visible to one processing pass.
#[derive(Debug, Clone)]
pub struct Backends {
    /// Backend used for all new encryption.
    pub current: SharedBackend,
    /// Backend configured at construction.
    pub restore: SharedBackend,
    /// Fallback decryptor for legacy data.
    pub legacy: Option<SharedBackend>,
}

impl Backends {
    /// A single backend serving every role but legacy.
    pub fn single(backend: SharedBackend) -> Self {
        Self {
            current: Arc::clone(&backend),
            restore: backend,
            legacy: None,
        }
    }

    /// Backend able to decrypt `generation`: current, then restore, then legacy.
    pub fn for_generation(&self, generation: Generation) -> Option<&SharedBackend> {
        [Some(&self.current), Some(&self.restore), self.legacy.as_ref()]
            .into_iter()
            .flatten()
            .find(|b| b.generation() == generation)
    }

    /// Classify `stored` and decrypt it if it carries a marker.
    ///
    /// Marked values are tried against the matching backend, then the legacy
    /// backend. Unmarked values are tried against the legacy backend only when
    /// `convert_unmarked` is set, and left untouched if that fails.
    pub fn read(
        &self,
        codec: &MarkerCodec,
        stored: Option<&str>,
        convert_unmarked: bool,
    ) -> ReadOutcome {
        match codec.classify(stored) {
            StoredValue::Empty => ReadOutcome::Untouched,
            StoredValue::PlainUnmarked(value) => match (&self.legacy, convert_unmarked) {
                (Some(legacy), true) => match decrypt_text(legacy, value) {
                    Ok(plain) => ReadOutcome::Decrypted(plain),
                    Err(_) => ReadOutcome::Untouched,
                },
                _ => ReadOutcome::Untouched,
            },
            StoredValue::Marked { generation, body } => {
                let mut candidates: Vec<&SharedBackend> = Vec::with_capacity(2);
                candidates.extend(self.for_generation(generation));
                if let Some(legacy) = &self.legacy {
                    if !candidates.iter().any(|b| Arc::ptr_eq(b, legacy)) {
                        candidates.push(legacy);
                    }
                }

                let mut last_err = None;
                for backend in candidates {
                    match decrypt_text(backend, body) {
                        Ok(plain) => return ReadOutcome::Decrypted(plain),
                        Err(e) => last_err = Some(e),
                    }
                }
                ReadOutcome::Failed(last_err.unwrap_or_else(|| {
                    CryptError::DecryptionFailure(format!(
                        "no backend registered for generation {generation}"
                    ))
                }))
            }
        }
    }
}

/// Decrypt a body into UTF-8 text.
///
/// # Errors
///
/// Returns [`CryptError::DecryptionFailure`] if the backend fails or the
/// plaintext is not UTF-8.
pub fn decrypt_text(backend: &SharedBackend, body: &str) -> Result<String, CryptError> {
    let plain = backend.decrypt(body)?;
    String::from_utf8(plain)
        .map_err(|_| CryptError::DecryptionFailure("plaintext is not valid UTF-8".into()))
}


#[cfg(test)]
mod tests {
    use super::testing::StubBackend;
    use super::*;

    #[test]
    fn empty_input_never_reaches_the_cipher() {
        let stub = StubBackend::new("s", Generation::V2);
        assert_eq!(stub.encrypt(b"").unwrap(), "");
        assert_eq!(stub.decrypt("").unwrap(), Vec::<u8>::new());
        assert_eq!(stub.seal_count(), 0);
        assert_eq!(stub.open_count(), 0);
    }

    #[test]
    fn backend_kind_parses_and_maps_generations() {
        assert_eq!(
            "aes-gcm-siv".parse::<BackendKind>(),
            Ok(BackendKind::AesGcmSiv)
        );
        assert_eq!("AES-GCM".parse::<BackendKind>(), Ok(BackendKind::AesGcm));
        assert_eq!(
            "xchacha20poly1305".parse::<BackendKind>(),
            Ok(BackendKind::XChaCha20Poly1305)
        );
        assert!("rot13".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::AesGcmSiv.generation(), Generation::V2);
        assert_eq!(BackendKind::AesGcm.generation(), Generation::V1);
    }

    #[test]
    fn built_backends_carry_kind_generation() {
        for kind in [
            BackendKind::AesGcm,
            BackendKind::AesGcmSiv,
            BackendKind::XChaCha20Poly1305,
        ] {
            let backend = kind.build(KeySource::from_secret("k"));
            assert_eq!(backend.generation(), kind.generation());
        }
    }

    #[test]
    fn for_generation_prefers_current() {
        let current = StubBackend::new("c", Generation::V2);
        let legacy = StubBackend::new("l", Generation::V1);
        let backends = Backends {
            current: current.clone(),
            restore: current.clone(),
            legacy: Some(legacy.clone()),
        };
        let v2 = backends.for_generation(Generation::V2).unwrap();
        assert_eq!(v2.key_fingerprint().unwrap(), "stub-c");
        let v1 = backends.for_generation(Generation::V1).unwrap();
        assert_eq!(v1.key_fingerprint().unwrap(), "stub-l");
        assert!(backends.for_generation(Generation::V3).is_none());
    }

    #[test]
    fn read_routes_by_marker() {
        let codec = MarkerCodec::default();
        let current = StubBackend::new("c", Generation::V2);
        let legacy = StubBackend::new("l", Generation::V1);
        let backends = Backends {
            current: current.clone(),
            restore: current.clone(),
            legacy: Some(legacy.clone()),
        };

        let v2 = codec.encode(Generation::V2, &current.encrypt(b"new").unwrap()).unwrap();
        let v1 = codec.encode(Generation::V1, &legacy.encrypt(b"old").unwrap()).unwrap();
        assert!(matches!(
            backends.read(&codec, Some(v2.as_str()), false),
            ReadOutcome::Decrypted(ref p) if p == "new"
        ));
        assert!(matches!(
            backends.read(&codec, Some(v1.as_str()), false),
            ReadOutcome::Decrypted(ref p) if p == "old"
        ));
    }

    #[test]
    fn read_leaves_plain_and_empty_untouched() {
        let codec = MarkerCodec::default();
        let backends = Backends::single(StubBackend::new("c", Generation::V2));
        assert!(matches!(
            backends.read(&codec, None, false),
            ReadOutcome::Untouched
        ));
        assert!(matches!(
            backends.read(&codec, Some(""), true),
            ReadOutcome::Untouched
        ));
        assert!(matches!(
            backends.read(&codec, Some("plain"), false),
            ReadOutcome::Untouched
        ));
    }

    #[test]
    fn corrupt_body_fails_after_trying_legacy() {
        let codec = MarkerCodec::default();
        let current = StubBackend::new("c", Generation::V2);
        let legacy = StubBackend::new("l", Generation::V1);
        let backends = Backends {
            current: current.clone(),
            restore: current.clone(),
            legacy: Some(legacy.clone()),
        };
        let outcome = backends.read(&codec, Some("garbage<ENCv2>"), false);
        assert!(matches!(
            outcome,
            ReadOutcome::Failed(CryptError::DecryptionFailure(_))
        ));
        assert_eq!(current.open_count(), 1);
        assert_eq!(legacy.open_count(), 1);
    }

    #[test]
    fn unregistered_generation_fails() {
        let codec = MarkerCodec::default();
        let backends = Backends::single(StubBackend::new("c", Generation::V2));
        assert!(matches!(
            backends.read(&codec, Some("abc<ENCv3>"), false),
            ReadOutcome::Failed(_)
        ));
    }

    #[test]
    fn convert_unmarked_uses_legacy_and_falls_back() {
        let codec = MarkerCodec::default();
        let current = StubBackend::new("c", Generation::V2);
        let legacy = StubBackend::new("l", Generation::V1);
        let backends = Backends {
            current: current.clone(),
            restore: current,
            legacy: Some(legacy.clone()),
        };
        let unmarked = legacy.encrypt(b"pre-marker era").unwrap();
        assert!(matches!(
            backends.read(&codec, Some(unmarked.as_str()), true),
            ReadOutcome::Decrypted(ref p) if p == "pre-marker era"
        ));
        assert!(matches!(
            backends.read(&codec, Some(unmarked.as_str()), false),
            ReadOutcome::Untouched
        ));
        assert!(matches!(
            backends.read(&codec, Some("just text"), true),
            ReadOutcome::Untouched
        ));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = BackendKind::AesGcmSiv.build(KeySource::from_secret("files"));
        let plain = dir.path().join("report.csv");
        let sealed = dir.path().join("report.csv.enc");
        let opened = dir.path().join("report.out.csv");
        std::fs::write(&plain, b"id,ssn\n1,123-45-6789\n").unwrap();

        backend.encrypt_file(&plain, &sealed).unwrap();
        let body = std::fs::read_to_string(&sealed).unwrap();
        assert!(!body.contains("123-45-6789"));

        backend.decrypt_file(&sealed, &opened).unwrap();
        assert_eq!(
            std::fs::read(&opened).unwrap(),
            b"id,ssn\n1,123-45-6789\n"
        );
    }

    #[test]
    fn empty_file_round_trips_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = BackendKind::AesGcm.build(KeySource::from_secret("files"));
        let plain = dir.path().join("empty");
        let sealed = dir.path().join("empty.enc");
        let opened = dir.path().join("empty.out");
        std::fs::write(&plain, b"").unwrap();
        backend.encrypt_file(&plain, &sealed).unwrap();
        assert_eq!(std::fs::read(&sealed).unwrap(), b"");
        backend.decrypt_file(&sealed, &opened).unwrap();
        assert_eq!(std::fs::read(&opened).unwrap(), b"");
    }

    #[test]
    fn missing_input_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = BackendKind::AesGcmSiv.build(KeySource::from_secret("files"));
        let err = backend
            .encrypt_file(&dir.path().join("absent"), &dir.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, CryptError::Io { .. }));
    }
}
