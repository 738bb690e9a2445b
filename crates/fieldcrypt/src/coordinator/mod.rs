//! Lifecycle coordination: decrypt on load, encrypt before flush, decrypt
//! again after commit.
//!
//! # Record states
//!
//! ```text
//! Untouched --(read pass)--> Decrypted --(pre-flush)--> Encrypted
//!                               ^                           |
//!                               +------(post-commit)--------+
//! ```
//!
//! A record enters [`DecryptedSet`] when the read pass writes plaintext into
//! at least one of its fields. Post-commit drains the set and re-runs the read
//! pass, so the host keeps working with plaintext after every flush.
//!
//! # Failure policy
//!
//! - Read pass: a value no backend can decrypt is left as stored, counted, and
//!   logged, at error level when the backend itself is unusable. A field that
//!   cannot be read or written is skipped.
//! - Write pass: failing to encrypt or store a changed field aborts with
//!   [`CoordinatorError::WriteFailed`]. Fields are sealed before any is
//!   written, and a pre-flush pass that fails puts back every in-memory value
//!   it already replaced.
//!
//! Plaintext and key material never appear in logs or errors.

pub mod stats;
pub mod tracked;

pub use stats::CoordinatorStats;
pub use tracked::DecryptedSet;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use fieldcrypt_common::{CryptError, MarkerCodec, StoredValue};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backend::{Backends, ReadOutcome, SharedBackend};
use crate::change::{Change, ChangeDetector};
use crate::host::{ChangeTracker, Metadata, OriginalValue, Record, RecordKey};
use crate::walker::FieldWalker;
use stats::Counters;

/// Errors surfaced to the host from the write path.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A changed field could not be encrypted or stored; the record must not
    /// be persisted.
    #[error("failed to encrypt field `{field}` of {record}: {source}")]
    WriteFailed {
        record: RecordKey,
        field: String,
        #[source]
        source: CryptError,
    },
}

/// Keeps encryptable fields plaintext in memory and marker-encoded in storage.
pub struct EncryptionCoordinator {
    codec: MarkerCodec,
    walker: FieldWalker,
    current: ArcSwap<SharedBackend>,
    restore: SharedBackend,
    legacy: ArcSwapOption<SharedBackend>,
    convert_unmarked: AtomicBool,
    decrypted: DecryptedSet,
    counters: Counters,
}

impl EncryptionCoordinator {
    /// Coordinator encrypting with `backend`, which is also the value
    /// [`restore_backend`](Self::restore_backend) returns to.
    pub fn new(backend: SharedBackend, metadata: Arc<dyn Metadata>) -> Self {
        Self::with_codec(backend, metadata, MarkerCodec::default())
    }

    /// Like [`new`](Self::new), with an explicit set of recognised generations.
    pub fn with_codec(
        backend: SharedBackend,
        metadata: Arc<dyn Metadata>,
        codec: MarkerCodec,
    ) -> Self {
        Self {
            codec,
            walker: FieldWalker::new(metadata),
            current: ArcSwap::from_pointee(Arc::clone(&backend)),
            restore: backend,
            legacy: ArcSwapOption::empty(),
            convert_unmarked: AtomicBool::new(false),
            decrypted: DecryptedSet::new(),
            counters: Counters::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Backend management
    // -----------------------------------------------------------------------

    /// Backend used for new encryption.
    pub fn current_backend(&self) -> SharedBackend {
        Arc::clone(&**self.current.load())
    }

    /// Switch the backend used for new encryption.
    pub fn set_backend(&self, backend: SharedBackend) {
        info!(generation = %backend.generation(), "switching current backend");
        self.current.store(Arc::new(backend));
    }

    /// Return to the backend supplied at construction.
    pub fn restore_backend(&self) {
        self.current.store(Arc::new(Arc::clone(&self.restore)));
    }

    /// Install (or with `None`, remove) the fallback decryptor for legacy data.
    pub fn set_legacy_backend(&self, backend: Option<SharedBackend>) {
        self.legacy.store(backend.map(Arc::new));
    }

    pub fn legacy_backend(&self) -> Option<SharedBackend> {
        self.legacy.load_full().map(|b| Arc::clone(&*b))
    }

    /// When set, unmarked values are tried against the legacy backend on read.
    pub fn set_convert_unmarked(&self, enabled: bool) {
        self.convert_unmarked.store(enabled, Ordering::Relaxed);
    }

    pub fn convert_unmarked(&self) -> bool {
        self.convert_unmarked.load(Ordering::Relaxed)
    }

    pub fn codec(&self) -> &MarkerCodec {
        &self.codec
    }

    pub fn walker(&self) -> &FieldWalker {
        &self.walker
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.counters.snapshot()
    }

    /// Whether the record identified by `key` currently holds decrypted
    /// plaintext.
    pub fn is_tracked(&self, key: &RecordKey) -> bool {
        self.decrypted.contains(key)
    }

    pub fn tracked_keys(&self) -> Vec<RecordKey> {
        self.decrypted.snapshot()
    }

    /// Backends for one pass, so a concurrent swap cannot split a record.
    fn backends(&self) -> Backends {
        Backends {
            current: self.current_backend(),
            restore: Arc::clone(&self.restore),
            legacy: self.legacy_backend(),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle events
    // -----------------------------------------------------------------------

    /// A record was loaded from storage.
    pub fn on_load(&self, record: &mut dyn Record) {
        let backends = self.backends();
        self.decrypt_record(record, &backends, self.convert_unmarked());
    }

    /// A new record is about to be inserted.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::WriteFailed`] if a field cannot be
    /// encrypted or stored. The record is then left as it was.
    pub fn on_before_insert(&self, record: &mut dyn Record) -> Result<(), CoordinatorError> {
        let backends = self.backends();
        self.encrypt_record(record, &backends, None).map(drop)
    }

    /// An existing record is about to be updated.
    ///
    /// Without a `tracker` every non-empty unmarked field is treated as
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::WriteFailed`] if a changed field cannot be
    /// encrypted or stored. The record is then left as it was.
    pub fn on_before_update(
        &self,
        record: &mut dyn Record,
        tracker: Option<&dyn ChangeTracker>,
    ) -> Result<(), CoordinatorError> {
        let backends = self.backends();
        self.encrypt_record(record, &backends, tracker).map(drop)
    }

    /// The host is about to flush.
    ///
    /// Processes every record in `pending_inserts`, and every record in
    /// `tracked` that holds decrypted plaintext. Each record identity is
    /// processed at most once.
    ///
    /// # Errors
    ///
    /// Stops at the first record whose changed field fails to encrypt, after
    /// putting back the in-memory values of every record already processed
    /// in this pass.
    pub fn on_before_flush(
        &self,
        pending_inserts: &mut [&mut dyn Record],
        tracked: &mut [&mut dyn Record],
        tracker: &dyn ChangeTracker,
    ) -> Result<(), CoordinatorError> {
        let backends = self.backends();
        let mut seen: HashSet<RecordKey> = HashSet::new();
        // (from pending_inserts, index, writes to undo)
        let mut done: Vec<(bool, usize, Applied)> = Vec::new();

        for pending in [true, false] {
            let len = if pending { pending_inserts.len() } else { tracked.len() };
            for i in 0..len {
                let record: &mut dyn Record = if pending {
                    &mut *pending_inserts[i]
                } else {
                    &mut *tracked[i]
                };
                let key = record.record_key();
                if !pending && !self.decrypted.contains(&key) {
                    continue;
                }
                if !seen.insert(key) {
                    continue;
                }
                match self.encrypt_record(record, &backends, Some(tracker)) {
                    Ok(applied) => done.push((pending, i, applied)),
                    Err(e) => {
                        for (was_pending, j, applied) in done.into_iter().rev() {
                            let record: &mut dyn Record = if was_pending {
                                &mut *pending_inserts[j]
                            } else {
                                &mut *tracked[j]
                            };
                            revert(record, applied);
                        }
                        return Err(e);
                    }
                }
            }
        }

        debug!(records = seen.len(), "pre-flush encryption complete");
        Ok(())
    }

    /// The flush committed. Re-decrypts every managed record.
    pub fn on_after_flush(&self, managed: &mut [&mut dyn Record]) {
        let drained = self.decrypted.drain();
        debug!(drained = drained.len(), "post-commit decryption");

        let backends = self.backends();
        let convert = self.convert_unmarked();
        for record in managed.iter_mut() {
            self.decrypt_record(&mut **record, &backends, convert);
        }
    }

    // -----------------------------------------------------------------------
    // Passes
    // -----------------------------------------------------------------------

    fn decrypt_record(&self, record: &mut dyn Record, backends: &Backends, convert_unmarked: bool) {
        let key = record.record_key();
        let fields = self.walker.fields_of(record.record_type());
        let mut holds_plaintext = false;

        for field in fields.iter() {
            let name = field.name.as_str();
            let stored = match record.get_field(name) {
                Ok(v) => v,
                Err(e) => {
                    warn!(record = %key, field = name, error = %e, "skipping unreadable field");
                    continue;
                }
            };

            match backends.read(&self.codec, stored.as_deref(), convert_unmarked) {
                ReadOutcome::Untouched => {}
                ReadOutcome::Decrypted(plain) => {
                    if let Err(e) = record.set_field(name, Some(plain)) {
                        warn!(record = %key, field = name, error = %e, "skipping unwritable field");
                        continue;
                    }
                    self.counters.decrypted();
                    holds_plaintext = true;
                }
                ReadOutcome::Failed(e) => {
                    self.counters.failed();
                    if e.is_recoverable_on_read() {
                        warn!(
                            record = %key,
                            field = name,
                            code = e.code(),
                            error = %e,
                            "decryption failed; leaving stored value in place"
                        );
                    } else {
                        error!(
                            record = %key,
                            field = name,
                            code = e.code(),
                            error = %e,
                            "backend unusable; leaving stored value in place"
                        );
                    }
                }
            }
        }

        if holds_plaintext {
            self.decrypted.insert(key);
        }
    }

    /// Encrypt changed fields and restore unchanged ones.
    ///
    /// Every changed field is sealed before anything is written, so a seal
    /// failure leaves the record untouched. A failing setter on a changed
    /// field undoes the writes made so far. Returns the writes made, with
    /// each field's previous in-memory value.
    fn encrypt_record(
        &self,
        record: &mut dyn Record,
        backends: &Backends,
        tracker: Option<&dyn ChangeTracker>,
    ) -> Result<Applied, CoordinatorError> {
        let key = record.record_key();
        let fields = self.walker.fields_of(record.record_type());
        let detector = ChangeDetector::new(&self.codec, backends);
        let write_failed = |field: &str, source: CryptError| CoordinatorError::WriteFailed {
            record: key.clone(),
            field: field.to_owned(),
            source,
        };

        let mut planned: Vec<PlannedWrite> = Vec::new();
        for field in fields.iter() {
            let name = field.name.as_str();
            let value = match record.get_field(name) {
                Ok(Some(v)) => v,
                Ok(None) => continue,
                Err(e) => {
                    warn!(record = %key, field = name, error = %e, "skipping unreadable field");
                    continue;
                }
            };

            if matches!(self.codec.classify(Some(value.as_str())), StoredValue::Marked { .. }) {
                continue;
            }

            let original = tracker
                .map(|t| t.original_value_of(&key, name))
                .unwrap_or(OriginalValue::Unknown);

            // Empty values are never encrypted, but a committed value that
            // reads back empty is put back as stored.
            if value.is_empty() && !matches!(original, OriginalValue::Stored(ref s) if !s.is_empty()) {
                continue;
            }

            match detector.detect(&original, &value) {
                Change::Unchanged => {
                    if let OriginalValue::Stored(stored) = original {
                        if stored != value {
                            planned.push(PlannedWrite {
                                field: name.to_owned(),
                                stored,
                                previous: value,
                                changed: false,
                            });
                        }
                    }
                }
                Change::Changed if value.is_empty() => {}
                Change::Changed => {
                    let stored = self
                        .seal(&backends.current, &value)
                        .map_err(|source| write_failed(name, source))?;
                    planned.push(PlannedWrite {
                        field: name.to_owned(),
                        stored,
                        previous: value,
                        changed: true,
                    });
                }
            }
        }

        let mut applied: Applied = Vec::with_capacity(planned.len());
        for write in planned {
            match record.set_field(&write.field, Some(write.stored)) {
                Ok(()) => {
                    if write.changed {
                        self.counters.encrypted();
                    }
                    applied.push((write.field, write.previous));
                }
                Err(source) if write.changed => {
                    revert(record, applied);
                    return Err(write_failed(&write.field, source));
                }
                Err(e) => {
                    warn!(record = %key, field = %write.field, error = %e, "could not restore stored value");
                }
            }
        }

        Ok(applied)
    }

    fn seal(&self, backend: &SharedBackend, plaintext: &str) -> Result<String, CryptError> {
        let body = backend.encrypt(plaintext.as_bytes())?;
        self.codec.encode(backend.generation(), &body)
    }
}

/// Writes made to one record by the write pass: `(field, previous value)`.
type Applied = Vec<(String, String)>;

struct PlannedWrite {
    field: String,
    stored: String,
    previous: String,
    changed: bool,
}

/// Put back the in-memory values replaced by the write pass, newest first.
fn revert(record: &mut dyn Record, applied: Applied) {
    for (field, previous) in applied.into_iter().rev() {
        if let Err(e) = record.set_field(&field, Some(previous)) {
            warn!(record = %record.record_key(), field = %field, error = %e, "could not revert field");
        }
    }
}

impl std::fmt::Debug for EncryptionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionCoordinator")
            .field("current", &self.current_backend().generation())
            .field("legacy", &self.legacy_backend().map(|b| b.generation()))
            .field("convert_unmarked", &self.convert_unmarked())
            .field("tracked", &self.decrypted.len())
            .finish_non_exhaustive()
    }
}
