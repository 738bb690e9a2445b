//! AEAD sealing shared by every backend, and the backends built on it.
//!
//! Each backend seals `nonce || ciphertext+tag` under a fresh random nonce and
//! stores it as text:
//!
//! | backend             | cipher              | nonce   | body encoding  | generation |
//! |---------------------|---------------------|---------|----------------|------------|
//! | [`AesGcmBackend`]    | AES-256-GCM         | 96 bit  | lowercase hex  | `V1`       |
//! | [`AesGcmSivBackend`] | AES-256-GCM-SIV     | 96 bit  | base64         | `V2`       |
//! | [`XChaChaBackend`]   | XChaCha20-Poly1305  | 192 bit | base64         | `V3`       |
//!
//! Because the nonce is random, ciphertext is non-deterministic: sealing the
//! same plaintext twice yields different bodies.

use std::fmt;
use std::marker::PhantomData;

use aes_gcm::Aes256Gcm;
use aes_gcm_siv::aead::generic_array::typenum::Unsigned;
use aes_gcm_siv::aead::{Aead, AeadCore, KeyInit, Nonce, OsRng};
use aes_gcm_siv::Aes256GcmSiv;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::XChaCha20Poly1305;
use fieldcrypt_common::{CryptError, Generation};
use thiserror::Error;

use super::CipherBackend;
use crate::key::{KeyBytes, KeySource};

/// Errors produced by the AEAD layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key is the wrong length for the cipher.
    #[error("invalid key length")]
    InvalidKeyLength,

    /// Sealing or opening failed (wrong key or tampered data on open).
    #[error("aead operation failed")]
    AeadFailure,

    /// The sealed blob is too short or not validly encoded.
    #[error("invalid ciphertext format")]
    InvalidFormat,
}

/// Text encoding of a sealed blob inside a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    /// Standard base64 with padding.
    Base64,
    /// Lowercase hex.
    Hex,
}

impl BodyEncoding {
    fn encode(self, blob: &[u8]) -> String {
        match self {
            BodyEncoding::Base64 => STANDARD.encode(blob),
            BodyEncoding::Hex => hex::encode(blob),
        }
    }

    fn decode(self, body: &str) -> Result<Vec<u8>, CipherError> {
        match self {
            BodyEncoding::Base64 => STANDARD.decode(body).map_err(|_| CipherError::InvalidFormat),
            BodyEncoding::Hex => hex::decode(body).map_err(|_| CipherError::InvalidFormat),
        }
    }
}

/// Seal `plaintext` under a random nonce, returning `nonce || ciphertext+tag`.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if the key does not fit `C`, and
/// [`CipherError::AeadFailure`] on an internal AEAD error.
pub fn seal<C>(key: &KeyBytes, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>
where
    C: Aead + AeadCore + KeyInit,
{
    let cipher = C::new_from_slice(key.expose()).map_err(|_| CipherError::InvalidKeyLength)?;
    let nonce = C::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CipherError::AeadFailure)?;

    let mut blob = Vec::with_capacity(nonce.len() + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Open a blob produced by [`seal`].
///
/// # Errors
///
/// Returns [`CipherError::InvalidFormat`] if the blob is shorter than nonce
/// plus tag, and [`CipherError::AeadFailure`] if authentication fails.
pub fn open<C>(key: &KeyBytes, blob: &[u8]) -> Result<Vec<u8>, CipherError>
where
    C: Aead + AeadCore + KeyInit,
{
    let nonce_len = <C as AeadCore>::NonceSize::USIZE;
    let tag_len = <C as AeadCore>::TagSize::USIZE;
    if blob.len() < nonce_len + tag_len {
        return Err(CipherError::InvalidFormat);
    }
    let cipher = C::new_from_slice(key.expose()).map_err(|_| CipherError::InvalidKeyLength)?;
    let (nonce, ciphertext) = blob.split_at(nonce_len);
    cipher
        .decrypt(Nonce::<C>::from_slice(nonce), ciphertext)
        .map_err(|_| CipherError::AeadFailure)
}

/// A [`CipherBackend`] over any AEAD cipher `C`.
pub struct AeadBackend<C> {
    key: KeySource,
    generation: Generation,
    encoding: BodyEncoding,
    _cipher: PhantomData<fn() -> C>,
}

/// AES-256-GCM, hex bodies, generation `V1`.
pub type AesGcmBackend = AeadBackend<Aes256Gcm>;

/// AES-256-GCM-SIV, base64 bodies, generation `V2`.
pub type AesGcmSivBackend = AeadBackend<Aes256GcmSiv>;

/// XChaCha20-Poly1305, base64 bodies, generation `V3`.
pub type XChaChaBackend = AeadBackend<XChaCha20Poly1305>;

impl<C> AeadBackend<C> {
    fn with_scheme(key: KeySource, generation: Generation, encoding: BodyEncoding) -> Self {
        Self {
            key,
            generation,
            encoding,
            _cipher: PhantomData,
        }
    }

    /// The backend's key source.
    pub fn key_source(&self) -> &KeySource {
        &self.key
    }
}

impl AeadBackend<Aes256Gcm> {
    /// Build the `V1` backend.
    pub fn new(key: KeySource) -> Self {
        Self::with_scheme(key, Generation::V1, BodyEncoding::Hex)
    }
}

impl AeadBackend<Aes256GcmSiv> {
    /// Build the `V2` backend.
    pub fn new(key: KeySource) -> Self {
        Self::with_scheme(key, Generation::V2, BodyEncoding::Base64)
    }
}

impl AeadBackend<XChaCha20Poly1305> {
    /// Build the `V3` backend.
    pub fn new(key: KeySource) -> Self {
        Self::with_scheme(key, Generation::V3, BodyEncoding::Base64)
    }
}

impl<C> fmt::Debug for AeadBackend<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AeadBackend")
            .field("generation", &self.generation)
            .field("encoding", &self.encoding)
            .field("key", &self.key)
            .finish()
    }
}

impl<C> CipherBackend for AeadBackend<C>
where
    C: Aead + AeadCore + KeyInit,
{
    fn generation(&self) -> Generation {
        self.generation
    }

    fn seal(&self, plaintext: &[u8]) -> Result<String, CryptError> {
        let key = self.key.key()?;
        let blob =
            seal::<C>(&key, plaintext).map_err(|e| CryptError::EncryptionFailure(e.to_string()))?;
        Ok(self.encoding.encode(&blob))
    }

    fn open(&self, body: &str) -> Result<Vec<u8>, CryptError> {
        let key = self.key.key()?;
        let blob = self
            .encoding
            .decode(body)
            .map_err(|e| CryptError::DecryptionFailure(e.to_string()))?;
        open::<C>(&key, &blob).map_err(|e| CryptError::DecryptionFailure(e.to_string()))
    }

    fn key_fingerprint(&self) -> Result<String, CryptError> {
        Ok(self.key.key()?.fingerprint())
    }
}
