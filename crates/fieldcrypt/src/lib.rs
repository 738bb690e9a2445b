//! Transparent field-level encryption for persisted records.
//!
//! Encryptable fields hold plaintext while a record is in memory and
//! marker-tagged ciphertext (`<ciphertext><ENCv2>`) in storage. The host
//! persistence layer drives the [`EncryptionCoordinator`] from its lifecycle
//! events:
//!
//! | host event              | coordinator call                              |
//! |-------------------------|-----------------------------------------------|
//! | record loaded           | [`EncryptionCoordinator::on_load`]            |
//! | before insert           | [`EncryptionCoordinator::on_before_insert`]   |
//! | before update           | [`EncryptionCoordinator::on_before_update`]   |
//! | before flush            | [`EncryptionCoordinator::on_before_flush`]    |
//! | after flush             | [`EncryptionCoordinator::on_after_flush`]     |
//!
//! Unchanged fields keep their committed ciphertext byte-for-byte, so the
//! host never sees spurious updates from non-deterministic encryption.

pub mod backend;
pub mod change;
pub mod column;
pub mod config;
pub mod coordinator;
pub mod host;
pub mod key;
pub mod setup;
pub mod telemetry;
pub mod walker;

pub use backend::{
    AesGcmBackend, AesGcmSivBackend, BackendKind, Backends, CipherBackend, ReadOutcome,
    SharedBackend, XChaChaBackend,
};
pub use change::{Change, ChangeDetector};
pub use column::EncryptedColumn;
pub use config::Config;
pub use coordinator::{CoordinatorError, CoordinatorStats, EncryptionCoordinator};
pub use fieldcrypt_common::{CryptError, Generation, MarkerCodec, StoredValue};
pub use host::{ChangeTracker, Metadata, OriginalValue, Record, RecordKey, Snapshot};
pub use key::KeySource;
pub use walker::{EncryptableField, FieldWalker};
