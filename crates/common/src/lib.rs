//! Stored-value wire format, ciphertext markers, and errors shared across
//! `fieldcrypt` crates.

pub mod error;
pub mod marker;

pub use error::CryptError;
pub use marker::{Generation, MarkerCodec, StoredValue};
