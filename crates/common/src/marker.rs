//! Stored-value wire format and ciphertext markers.
//!
//! A stored field value is one of:
//!
//! ```text
//! ""                          empty, never encrypted
//! <plaintext>                 no recognised marker, passed through on read
//! <encoded ciphertext><ENCvN> ciphertext produced by generation N
//! ```
//!
//! Encoded ciphertext uses base64 or hex, neither of which contains `<` or
//! `>`, so a marker can never appear inside a ciphertext body.

use std::fmt;
use std::str::FromStr;

use crate::error::CryptError;

/// A versioned cipher scheme, identified in storage by its marker suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Generation {
    /// Legacy format, kept readable for migration.
    V1,
    /// Current format.
    V2,
    /// Next format; readable once a backend for it is registered.
    V3,
}

impl Generation {
    /// Every generation, in suffix-matching priority order.
    pub const NEWEST_FIRST: [Generation; 3] = [Generation::V3, Generation::V2, Generation::V1];

    /// The literal suffix appended to ciphertext of this generation.
    pub const fn marker(self) -> &'static str {
        match self {
            Generation::V1 => "<ENCv1>",
            Generation::V2 => "<ENCv2>",
            Generation::V3 => "<ENCv3>",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Generation::V1 => "v1",
            Generation::V2 => "v2",
            Generation::V3 => "v3",
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Generation {
    type Err = CryptError;

    /// Accepts `v2`, `V2`, or the marker literal `<ENCv2>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Generation::NEWEST_FIRST
            .into_iter()
            .find(|g| trimmed.eq_ignore_ascii_case(g.name()) || trimmed == g.marker())
            .ok_or_else(|| CryptError::UnknownMarkerGeneration(trimmed.to_owned()))
    }
}

/// Classification of a stored field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredValue<'a> {
    /// Null or the empty string.
    Empty,
    /// A value with no recognised marker.
    PlainUnmarked(&'a str),
    /// Ciphertext body with its producing generation; the marker is stripped.
    Marked {
        generation: Generation,
        body: &'a str,
    },
}

/// Recognises, strips, and appends generation markers.
///
/// Only registered generations are recognised or encodable. The default codec
/// registers every [`Generation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerCodec {
    /// Registered generations, newest first.
    generations: Vec<Generation>,
}

impl MarkerCodec {
    /// Build a codec that recognises exactly `generations`.
    pub fn new(generations: &[Generation]) -> Self {
        let mut generations = generations.to_vec();
        generations.sort_unstable_by(|a, b| b.cmp(a));
        generations.dedup();
        Self { generations }
    }

    /// Registered generations, newest first.
    pub fn generations(&self) -> &[Generation] {
        &self.generations
    }

    /// Classify a stored value. The first registered marker (newest first)
    /// found as a suffix wins.
    pub fn classify<'a>(&self, stored: Option<&'a str>) -> StoredValue<'a> {
        let value = match stored {
            None | Some("") => return StoredValue::Empty,
            Some(v) => v,
        };
        for &generation in &self.generations {
            if let Some(body) = value.strip_suffix(generation.marker()) {
                return StoredValue::Marked { generation, body };
            }
        }
        StoredValue::PlainUnmarked(value)
    }

    /// Append `generation`'s marker to an encoded ciphertext body.
    ///
    /// An empty body stays empty so that empty values never gain a marker.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::UnknownMarkerGeneration`] if `generation` is not
    /// registered with this codec.
    pub fn encode(&self, generation: Generation, ciphertext: &str) -> Result<String, CryptError> {
        if !self.generations.contains(&generation) {
            return Err(CryptError::UnknownMarkerGeneration(generation.to_string()));
        }
        if ciphertext.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("{ciphertext}{}", generation.marker()))
    }

    /// Like [`MarkerCodec::encode`], addressing the generation by name.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::UnknownMarkerGeneration`] for unknown or
    /// unregistered names.
    pub fn encode_named(&self, generation: &str, ciphertext: &str) -> Result<String, CryptError> {
        self.encode(generation.parse()?, ciphertext)
    }
}

impl Default for MarkerCodec {
    fn default() -> Self {
        Self::new(&Generation::NEWEST_FIRST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_suffix_free() {
        for a in Generation::NEWEST_FIRST {
            for b in Generation::NEWEST_FIRST {
                if a != b {
                    assert!(!a.marker().ends_with(b.marker()), "{a} ends with {b}");
                }
            }
        }
    }

    #[test]
    fn markers_use_chars_outside_ciphertext_alphabets() {
        for g in Generation::NEWEST_FIRST {
            assert!(g.marker().starts_with('<') && g.marker().ends_with('>'));
        }
    }

    #[test]
    fn empty_and_null_classify_as_empty() {
        let codec = MarkerCodec::default();
        assert_eq!(codec.classify(None), StoredValue::Empty);
        assert_eq!(codec.classify(Some("")), StoredValue::Empty);
    }

    #[test]
    fn unmarked_value_is_plain() {
        let codec = MarkerCodec::default();
        assert_eq!(
            codec.classify(Some("123-45-6789")),
            StoredValue::PlainUnmarked("123-45-6789")
        );
        // A marker in the middle is not a suffix.
        assert_eq!(
            codec.classify(Some("a<ENCv2>b")),
            StoredValue::PlainUnmarked("a<ENCv2>b")
        );
    }

    #[test]
    fn classify_inverts_encode_for_every_generation() {
        let codec = MarkerCodec::default();
        for g in Generation::NEWEST_FIRST {
            let stored = codec.encode(g, "QUJD").unwrap();
            assert_eq!(
                codec.classify(Some(stored.as_str())),
                StoredValue::Marked {
                    generation: g,
                    body: "QUJD"
                }
            );
        }
    }

    #[test]
    fn bare_marker_has_empty_body() {
        let codec = MarkerCodec::default();
        assert_eq!(
            codec.classify(Some("<ENCv1>")),
            StoredValue::Marked {
                generation: Generation::V1,
                body: ""
            }
        );
    }

    #[test]
    fn unregistered_generation_is_not_recognised_or_encodable() {
        let codec = MarkerCodec::new(&[Generation::V1, Generation::V2]);
        assert_eq!(codec.generations(), &[Generation::V2, Generation::V1]);
        assert_eq!(
            codec.classify(Some("QUJD<ENCv3>")),
            StoredValue::PlainUnmarked("QUJD<ENCv3>")
        );
        let err = codec.encode(Generation::V3, "QUJD").unwrap_err();
        assert!(matches!(err, CryptError::UnknownMarkerGeneration(ref g) if g == "v3"));
    }

    #[test]
    fn encode_empty_body_stays_empty() {
        let codec = MarkerCodec::default();
        assert_eq!(codec.encode(Generation::V2, "").unwrap(), "");
    }

    #[test]
    fn generation_names_parse() {
        assert_eq!("v1".parse::<Generation>().unwrap(), Generation::V1);
        assert_eq!("V2".parse::<Generation>().unwrap(), Generation::V2);
        assert_eq!("<ENCv3>".parse::<Generation>().unwrap(), Generation::V3);
        assert!("v9".parse::<Generation>().is_err());
    }

    #[test]
    fn encode_named_rejects_unknown() {
        let codec = MarkerCodec::default();
        assert_eq!(codec.encode_named("v2", "ab").unwrap(), "ab<ENCv2>");
        assert!(codec.encode_named("ENCv7", "ab").is_err());
    }
}
