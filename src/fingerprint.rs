//! Content fingerprints used to recognise candidates across advances.
//!
//! A fingerprint is the SHA-256 digest of a canonical key. Text keys are
//! whitespace-normalised so re-rendered markup with different spacing still
//! matches. URL keys are resolved against the page they were found on and
//! lose their fragment, so `/a#top` and `https://site/a` are the same item.

use crate::error::ExtractionError;
use crate::utils::normalize_whitespace;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Deterministic dedup key for a candidate. Comparable, never ordered.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint normalised text. Empty (or whitespace-only) text is rejected.
    pub fn of_text(text: &str) -> Result<Self, ExtractionError> {
        let canonical = normalize_whitespace(text);
        if canonical.is_empty() {
            return Err(ExtractionError::EmptyKey);
        }
        Ok(Self::digest(canonical.as_bytes()))
    }

    /// Fingerprint a URL, resolving relative references against `base`.
    pub fn of_url(raw: &str, base: Option<&Url>) -> Result<Self, ExtractionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ExtractionError::EmptyKey);
        }
        let parsed = match base {
            Some(base) => base.join(raw),
            None => Url::parse(raw),
        };
        let mut url = parsed.map_err(|e| ExtractionError::InvalidUrl {
            value: raw.to_string(),
            reason: e.to_string(),
        })?;
        url.set_fragment(None);
        Ok(Self::digest(url.as_str().as_bytes()))
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> String {
        let mut s = self.to_string();
        s.truncate(8);
        s
    }

    fn digest(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_fingerprint_ignores_spacing() {
        let a = Fingerprint::of_text("Breaking:  rates   rise\n").unwrap();
        let b = Fingerprint::of_text("  Breaking: rates rise").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Fingerprint::of_text("Breaking: rates fall").unwrap());
    }

    #[test]
    fn test_empty_text_is_rejected() {
        assert_eq!(Fingerprint::of_text(" \n\t "), Err(ExtractionError::EmptyKey));
    }

    #[test]
    fn test_url_fingerprint_resolves_and_drops_fragment() {
        let base = Url::parse("https://www.bbc.com/search?q=ai").unwrap();
        let relative = Fingerprint::of_url("/news/articles/c1#comments", Some(&base)).unwrap();
        let absolute =
            Fingerprint::of_url("https://www.bbc.com/news/articles/c1", None).unwrap();
        assert_eq!(relative, absolute);
    }

    #[test]
    fn test_relative_url_without_base_is_invalid() {
        let err = Fingerprint::of_url("/news/1", None).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidUrl { .. }));
    }

    #[test]
    fn test_display_is_hex() {
        let fp = Fingerprint::of_text("hello").unwrap();
        let hex = fp.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.short(), hex[..8]);
    }
}
