//! Encryptable field resolution across an inheritance chain.

use crate::host::Metadata;

/// One encryptable field of a concrete record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptableField {
    /// Type whose declaration won: the most derived one.
    pub declared_on: String,
    /// Field name.
    pub name: String,
}

/// Collect the encryptable fields of `record_type`, root ancestor first.
///
/// Each type's declared fields are appended in declaration order. A field
/// redeclared further down the chain replaces the inherited entry in place,
/// so its position stays that of the first declaration while its
/// encryptable flag is the most derived one.
pub fn resolve_encryptable_fields(metadata: &dyn Metadata, record_type: &str) -> Vec<EncryptableField> {
    let mut chain = metadata.ancestors_of(record_type);
    chain.reverse();
    chain.push(record_type.to_owned());

    // (field, declaring type, encryptable)
    let mut merged: Vec<(String, String, bool)> = Vec::new();
    for ty in &chain {
        for field in metadata.declared_fields(ty) {
            let encryptable = metadata.is_encryptable(ty, &field);
            match merged.iter_mut().find(|(name, _, _)| *name == field) {
                Some(slot) => {
                    slot.1 = ty.clone();
                    slot.2 = encryptable;
                }
                None => merged.push((field, ty.clone(), encryptable)),
            }
        }
    }

    merged
        .into_iter()
        .filter(|(_, _, encryptable)| *encryptable)
        .map(|(name, declared_on, _)| EncryptableField { declared_on, name })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::StaticMetadata;

    fn names(fields: &[EncryptableField]) -> Vec<&str> {
        fields.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn own_fields_in_declaration_order() {
        let meta = StaticMetadata::new().with_type(
            "Patient",
            None,
            &[("id", false), ("ssn", true), ("name", false), ("notes", true)],
        );
        let fields = resolve_encryptable_fields(&meta, "Patient");
        assert_eq!(names(&fields), vec!["ssn", "notes"]);
        assert!(fields.iter().all(|f| f.declared_on == "Patient"));
    }

    #[test]
    fn ancestors_come_first_root_to_leaf() {
        let meta = StaticMetadata::new()
            .with_type("Entity", None, &[("audit", true)])
            .with_type("Person", Some("Entity"), &[("ssn", true)])
            .with_type("Patient", Some("Person"), &[("diagnosis", true)]);
        let fields = resolve_encryptable_fields(&meta, "Patient");
        assert_eq!(names(&fields), vec!["audit", "ssn", "diagnosis"]);
        assert_eq!(fields[0].declared_on, "Entity");
        assert_eq!(fields[1].declared_on, "Person");
    }

    #[test]
    fn derived_redeclaration_replaces_inherited_in_place() {
        let meta = StaticMetadata::new()
            .with_type("Person", None, &[("ssn", true), ("email", true)])
            .with_type("Patient", Some("Person"), &[("ssn", true), ("mrn", true)]);
        let fields = resolve_encryptable_fields(&meta, "Patient");
        assert_eq!(names(&fields), vec!["ssn", "email", "mrn"]);
        assert_eq!(fields[0].declared_on, "Patient");
    }

    #[test]
    fn derived_flag_wins() {
        let meta = StaticMetadata::new()
            .with_type("Person", None, &[("ssn", true), ("nickname", false)])
            .with_type("Patient", Some("Person"), &[("ssn", false), ("nickname", true)]);
        let fields = resolve_encryptable_fields(&meta, "Patient");
        assert_eq!(names(&fields), vec!["nickname"]);
    }

    #[test]
    fn unknown_type_has_no_fields() {
        let meta = StaticMetadata::new();
        assert!(resolve_encryptable_fields(&meta, "Ghost").is_empty());
    }
}
