//! [`KeyFile`]: lazily materialised, file-backed symmetric key.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use aes_gcm_siv::aead::{rand_core::RngCore, OsRng};
use arc_swap::ArcSwapOption;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Byte length of every backend key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

const FINGERPRINT_LABEL: &[u8] = b"fieldcrypt key fingerprint";
const FINGERPRINT_LEN: usize = 8;

/// Errors produced by the key layer.
///
/// Messages name the key file but never its contents.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The key file could not be read or created.
    #[error("cannot read or create key file {}: {reason}", path.display())]
    Unavailable { path: PathBuf, reason: String },

    /// The key file exists but does not hold a hex-encoded key of [`KEY_LEN`] bytes.
    #[error("key file {} is malformed", path.display())]
    Malformed { path: PathBuf },

    /// Raw key material has an unexpected length.
    #[error("key has invalid length: expected {KEY_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

impl From<KeyError> for fieldcrypt_common::CryptError {
    fn from(err: KeyError) -> Self {
        let path = match &err {
            KeyError::Unavailable { path, .. } | KeyError::Malformed { path } => path.clone(),
            KeyError::InvalidLength(_) => PathBuf::new(),
        };
        fieldcrypt_common::CryptError::KeyUnavailable {
            path,
            reason: err.to_string(),
        }
    }
}

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// The memory is overwritten with zeroes on drop.
#[derive(Clone)]
pub struct KeyBytes(Box<[u8; KEY_LEN]>);

impl KeyBytes {
    /// Copy raw key material into a new buffer.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidLength`] if `bytes` is not [`KEY_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != KEY_LEN {
            return Err(KeyError::InvalidLength(bytes.len()));
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Fresh key material from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut buf = Box::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut buf[..]);
        Self(buf)
    }

    /// Derive a key from a legacy secret string with HMAC-SHA256 under `label`.
    pub fn derive(secret: &[u8], label: &[u8]) -> Self {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret)
            .expect("HMAC accepts keys of any length");
        mac.update(label);
        let digest = mac.finalize().into_bytes();
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(&digest);
        Self(buf)
    }

    /// Raw key bytes, for handing to a cipher.
    pub fn expose(&self) -> &[u8] {
        &self.0[..]
    }

    /// Short hex identifier for this key, safe to log.
    pub fn fingerprint(&self) -> String {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(self.expose())
            .expect("HMAC accepts keys of any length");
        mac.update(FINGERPRINT_LABEL);
        hex::encode(&mac.finalize().into_bytes()[..FINGERPRINT_LEN])
    }
}

impl Drop for KeyBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyBytes([REDACTED])")
    }
}

/// A symmetric key backed by a single file.
///
/// The key is read (or generated and written) on first use and cached for the
/// lifetime of the value. First use is serialised by a process-wide lock per
/// path, and a newly generated key only becomes visible on disk through an
/// atomic create-if-absent, so racing threads or processes agree on one key.
#[derive(Debug)]
pub struct KeyFile {
    path: PathBuf,
    cached: ArcSwapOption<KeyBytes>,
}

impl KeyFile {
    /// Point at `path`; nothing is read until [`KeyFile::key`] is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: ArcSwapOption::empty(),
        }
    }

    /// Path of the backing key file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` once the key has been materialised.
    pub fn is_loaded(&self) -> bool {
        self.cached.load().is_some()
    }

    /// Load the key, generating and persisting it if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Unavailable`] if the file can be neither read nor
    /// created, and [`KeyError::Malformed`] if its content is not a key.
    pub fn key(&self) -> Result<Arc<KeyBytes>, KeyError> {
        if let Some(key) = self.cached.load_full() {
            return Ok(key);
        }

        let lock = path_lock(&self.path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        // Another thread may have finished while we waited.
        if let Some(key) = self.cached.load_full() {
            return Ok(key);
        }

        let key = Arc::new(load_or_create(&self.path)?);
        self.cached.store(Some(Arc::clone(&key)));
        Ok(key)
    }
}

/// Process-wide lock for first use of the key file at `path`.
fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(path.to_path_buf()).or_default())
}

fn load_or_create(path: &Path) -> Result<KeyBytes, KeyError> {
    match fs::read_to_string(path) {
        Ok(text) => return parse_key_file(path, &text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(unavailable(path, &e)),
    }

    let key = KeyBytes::generate();
    match persist_new(path, &key) {
        Ok(()) => {
            info!(
                path = %path.display(),
                fingerprint = %key.fingerprint(),
                "generated new key file"
            );
            Ok(key)
        }
        // Another process created the file between our read and our link.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let text = fs::read_to_string(path).map_err(|e| unavailable(path, &e))?;
            parse_key_file(path, &text)
        }
        Err(e) => Err(unavailable(path, &e)),
    }
}

fn parse_key_file(path: &Path, text: &str) -> Result<KeyBytes, KeyError> {
    let raw = hex::decode(text.trim()).map_err(|_| KeyError::Malformed {
        path: path.to_path_buf(),
    })?;
    KeyBytes::from_slice(&raw).map_err(|_| KeyError::Malformed {
        path: path.to_path_buf(),
    })
}

/// Write the key to a private temp file, then hard-link it into place.
///
/// `hard_link` fails with `AlreadyExists` if `path` exists, so a reader can
/// never observe a partially written key file.
fn persist_new(path: &Path, key: &KeyBytes) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "key".to_owned());
    let tmp = dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let result = write_private(&tmp, hex::encode(key.expose()).as_bytes())
        .and_then(|()| fs::hard_link(&tmp, path));
    let _ = fs::remove_file(&tmp);
    result
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn unavailable(path: &Path, err: &io::Error) -> KeyError {
    KeyError::Unavailable {
        path: path.to_path_buf(),
        reason: err.kind().to_string(),
    }
}
