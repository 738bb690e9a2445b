//! Enumeration of a record type's encryptable fields.
//!
//! # Responsibilities
//!
//! - Ask host [`Metadata`] for declared fields, encryptable flags, and
//!   ancestors.
//! - Merge inherited and own declarations, most derived wins.
//! - Cache the result per concrete type for the life of the walker.
//!
//! # Module invariants
//!
//! - **No crypto dependencies.** This module must not import anything from
//!   `crate::backend` or `crate::key`.

pub mod cache;
pub mod resolver;

pub use cache::{FieldCache, FieldList};
pub use resolver::{resolve_encryptable_fields, EncryptableField};

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::host::Metadata;

/// Resolves and caches the encryptable fields of record types.
#[derive(Clone)]
pub struct FieldWalker {
    metadata: Arc<dyn Metadata>,
    cache: Arc<FieldCache>,
}

impl FieldWalker {
    pub fn new(metadata: Arc<dyn Metadata>) -> Self {
        Self {
            metadata,
            cache: Arc::new(FieldCache::new()),
        }
    }

    /// Ordered encryptable fields of `record_type`.
    ///
    /// Metadata is consulted only on the first call for a type.
    pub fn fields_of(&self, record_type: &str) -> FieldList {
        self.cache.get_or_insert_with(record_type, || {
            let fields = resolve_encryptable_fields(self.metadata.as_ref(), record_type);
            debug!(record_type, count = fields.len(), "resolved encryptable fields");
            fields
        })
    }

    /// Record types resolved so far.
    pub fn cached_types(&self) -> Vec<String> {
        self.cache.record_types()
    }
}

impl fmt::Debug for FieldWalker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldWalker")
            .field("cached_types", &self.cache.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::host::testing::StaticMetadata;
    use crate::host::MockMetadata;

    #[test]
    fn metadata_is_consulted_once_per_type() {
        let mut meta = MockMetadata::new();
        meta.expect_ancestors_of()
            .with(eq("Patient"))
            .times(1)
            .returning(|_| Vec::new());
        meta.expect_declared_fields()
            .with(eq("Patient"))
            .times(1)
            .returning(|_| vec!["ssn".into(), "name".into()]);
        meta.expect_is_encryptable()
            .times(2)
            .returning(|_, field| field == "ssn");

        let walker = FieldWalker::new(Arc::new(meta));
        for _ in 0..3 {
            let fields = walker.fields_of("Patient");
            assert_eq!(fields.len(), 1);
            assert_eq!(fields[0].name, "ssn");
        }
        assert_eq!(walker.cached_types(), vec!["Patient".to_owned()]);
    }

    #[test]
    fn inherited_fields_appear_once() {
        let meta = StaticMetadata::new()
            .with_type("Person", None, &[("ssn", true), ("email", true)])
            .with_type("Patient", Some("Person"), &[("email", true), ("mrn", true)]);
        let walker = FieldWalker::new(Arc::new(meta));
        let names: Vec<_> = walker
            .fields_of("Patient")
            .iter()
            .map(|f| f.name.clone())
            .collect();
        assert_eq!(names, vec!["ssn", "email", "mrn"]);
    }

    #[test]
    fn clones_share_the_cache() {
        let meta = StaticMetadata::new().with_type("Patient", None, &[("ssn", true)]);
        let walker = FieldWalker::new(Arc::new(meta));
        let clone = walker.clone();
        walker.fields_of("Patient");
        assert_eq!(clone.cached_types(), vec!["Patient".to_owned()]);
    }
}
