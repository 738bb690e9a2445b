//! Capabilities the host persistence layer supplies.
//!
//! The coordinator never inspects records directly. It reads and writes
//! fields through [`Record`], learns which fields are encryptable through
//! [`Metadata`], and asks a [`ChangeTracker`] for the last committed value of
//! a field.

use std::collections::HashMap;
use std::fmt;

use fieldcrypt_common::CryptError;

/// Identity of a record within one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// Concrete record type.
    pub record_type: String,
    /// Host-assigned identifier, unique per type.
    pub id: String,
}

impl RecordKey {
    pub fn new(record_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.record_type, self.id)
    }
}

/// A host-owned persisted object.
///
/// Field values are textual; `None` is null. How the host reaches the field
/// (public member, accessor pair, map entry) is its own business.
pub trait Record {
    /// Concrete runtime type, as known to [`Metadata`].
    fn record_type(&self) -> &str;

    /// Identity used to track the record across lifecycle events.
    fn record_key(&self) -> RecordKey;

    /// Read a field.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::FieldAccessFailure`] if the field cannot be read.
    fn get_field(&self, name: &str) -> Result<Option<String>, CryptError>;

    /// Write a field.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::FieldAccessFailure`] if the field cannot be written.
    fn set_field(&mut self, name: &str, value: Option<String>) -> Result<(), CryptError>;
}

/// Type metadata: which fields exist, which are encryptable, and the
/// inheritance chain.
#[cfg_attr(test, mockall::automock)]
pub trait Metadata: Send + Sync {
    /// Fields declared directly on `record_type`, any visibility, in
    /// declaration order.
    fn declared_fields(&self, record_type: &str) -> Vec<String>;

    /// Whether `field` as declared on `record_type` is marked encryptable.
    fn is_encryptable(&self, record_type: &str, field: &str) -> bool;

    /// Ancestors of `record_type`, nearest parent first.
    fn ancestors_of(&self, record_type: &str) -> Vec<String>;
}

/// Last committed value of a field, as the host's change tracking knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginalValue {
    /// No snapshot is available (new record, or no tracking).
    Unknown,
    /// Committed as null.
    Null,
    /// Committed stored representation.
    Stored(String),
}

/// Host change tracking.
#[cfg_attr(test, mockall::automock)]
pub trait ChangeTracker {
    /// Last committed value of `field` on the record identified by `key`.
    fn original_value_of(&self, key: &RecordKey, field: &str) -> OriginalValue;
}

/// A [`ChangeTracker`] built from snapshots of stored values.
///
/// Hosts without their own change tracking can capture records right after
/// loading (before decryption) or right after a flush (before post-commit
/// decryption).
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    values: HashMap<RecordKey, HashMap<String, Option<String>>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current values of `fields` on `record`.
    ///
    /// Fields that cannot be read are left out and report
    /// [`OriginalValue::Unknown`].
    pub fn capture<'a>(&mut self, record: &dyn Record, fields: impl IntoIterator<Item = &'a str>) {
        let entry = self.values.entry(record.record_key()).or_default();
        for field in fields {
            if let Ok(value) = record.get_field(field) {
                entry.insert(field.to_owned(), value);
            }
        }
    }

    /// Drop everything captured for `key`.
    pub fn forget(&mut self, key: &RecordKey) {
        self.values.remove(key);
    }
}

impl ChangeTracker for Snapshot {
    fn original_value_of(&self, key: &RecordKey, field: &str) -> OriginalValue {
        match self.values.get(key).and_then(|fields| fields.get(field)) {
            None => OriginalValue::Unknown,
            Some(None) => OriginalValue::Null,
            Some(Some(v)) => OriginalValue::Stored(v.clone()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory records and metadata for tests.

    use std::collections::{BTreeMap, HashSet};

    use super::*;

    /// A record whose fields live in a map. Fields listed in `broken` fail on
    /// access.
    #[derive(Debug, Clone)]
    pub struct MapRecord {
        pub record_type: String,
        pub id: String,
        pub fields: BTreeMap<String, Option<String>>,
        pub broken: HashSet<String>,
    }

    impl MapRecord {
        pub fn new(record_type: &str, id: &str) -> Self {
            Self {
                record_type: record_type.to_owned(),
                id: id.to_owned(),
                fields: BTreeMap::new(),
                broken: HashSet::new(),
            }
        }

        pub fn with(mut self, field: &str, value: &str) -> Self {
            self.fields.insert(field.to_owned(), Some(value.to_owned()));
            self
        }

        pub fn with_null(mut self, field: &str) -> Self {
            self.fields.insert(field.to_owned(), None);
            self
        }

        pub fn value(&self, field: &str) -> Option<&str> {
            self.fields.get(field).and_then(|v| v.as_deref())
        }

        pub fn set(&mut self, field: &str, value: &str) {
            self.fields.insert(field.to_owned(), Some(value.to_owned()));
        }
    }

    impl Record for MapRecord {
        fn record_type(&self) -> &str {
            &self.record_type
        }

        fn record_key(&self) -> RecordKey {
            RecordKey::new(&self.record_type, &self.id)
        }

        fn get_field(&self, name: &str) -> Result<Option<String>, CryptError> {
            if self.broken.contains(name) {
                return Err(CryptError::field_access(name, "getter failed"));
            }
            Ok(self.fields.get(name).cloned().flatten())
        }

        fn set_field(&mut self, name: &str, value: Option<String>) -> Result<(), CryptError> {
            if self.broken.contains(name) {
                return Err(CryptError::field_access(name, "setter failed"));
            }
            self.fields.insert(name.to_owned(), value);
            Ok(())
        }
    }

    /// Static metadata: `type -> (parent, [(field, encryptable)])`.
    #[derive(Debug, Default)]
    pub struct StaticMetadata {
        types: HashMap<String, (Option<String>, Vec<(String, bool)>)>,
    }

    impl StaticMetadata {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_type(
            mut self,
            name: &str,
            parent: Option<&str>,
            fields: &[(&str, bool)],
        ) -> Self {
            let fields = fields.iter().map(|(f, e)| (f.to_string(), *e)).collect();
            self.types
                .insert(name.to_owned(), (parent.map(str::to_owned), fields));
            self
        }
    }

    impl Metadata for StaticMetadata {
        fn declared_fields(&self, record_type: &str) -> Vec<String> {
            self.types
                .get(record_type)
                .map(|(_, fields)| fields.iter().map(|(f, _)| f.clone()).collect())
                .unwrap_or_default()
        }

        fn is_encryptable(&self, record_type: &str, field: &str) -> bool {
            self.types
                .get(record_type)
                .and_then(|(_, fields)| fields.iter().find(|(f, _)| f == field))
                .map(|(_, e)| *e)
                .unwrap_or(false)
        }

        fn ancestors_of(&self, record_type: &str) -> Vec<String> {
            let mut chain = Vec::new();
            let mut next = self.types.get(record_type).and_then(|(p, _)| p.clone());
            while let Some(parent) = next {
                next = self.types.get(&parent).and_then(|(p, _)| p.clone());
                chain.push(parent);
            }
            chain
        }
    }
}
