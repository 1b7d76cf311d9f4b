//! Deterministic query fingerprints
//!
//! A fingerprint is the MD5 digest of a normalized query and is the key for
//! cache entries, in-flight claims and batch queue slots. Two queries with the
//! same semantic content (keyword order, case, spacing) always produce the
//! same fingerprint.
//!
//! The fingerprint is stored as its raw 16-byte digest rather than a hex
//! string; it displays and serializes as lowercase hex.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::models::normalize;

/// Error returned when parsing a fingerprint from hex
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid fingerprint: {0}. Expected 32 hex characters")]
pub struct InvalidFingerprint(pub String);

/// MD5 digest of a normalized query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryFingerprint([u8; 16]);

impl QueryFingerprint {
    /// Fingerprint the given query parts
    ///
    /// # Examples
    ///
    /// ```rust
    /// use job_aggregator::app::QueryFingerprint;
    ///
    /// let a = QueryFingerprint::compute(&["python", "developer"], "India", None);
    /// let b = QueryFingerprint::compute(&["developer", "Python"], "india", None);
    /// assert_eq!(a, b);
    /// ```
    pub fn compute<S: AsRef<str>>(keywords: &[S], location: &str, source: Option<&str>) -> Self {
        let canonical = canonical_form(keywords, location, source);
        QueryFingerprint(md5::compute(canonical.as_bytes()).0)
    }

    /// Parse a fingerprint from its hex representation
    pub fn from_hex(hex: &str) -> Result<Self, InvalidFingerprint> {
        if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidFingerprint(hex.to_string()));
        }

        let mut bytes = [0u8; 16];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| InvalidFingerprint(hex.to_string()))?;
            bytes[i] =
                u8::from_str_radix(pair, 16).map_err(|_| InvalidFingerprint(hex.to_string()))?;
        }

        Ok(QueryFingerprint(bytes))
    }

    /// Lowercase 32-character hex representation
    pub fn to_hex(&self) -> String {
        use std::fmt::Write;
        self.0.iter().fold(String::with_capacity(32), |mut acc, b| {
            let _ = write!(&mut acc, "{:02x}", b);
            acc
        })
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// Canonical string hashed into a fingerprint
///
/// Keywords are normalized, de-duplicated and sorted; empty keywords are
/// ignored. A missing source filter is encoded as `*`.
pub fn canonical_form<S: AsRef<str>>(keywords: &[S], location: &str, source: Option<&str>) -> String {
    let mut normalized: Vec<String> = keywords
        .iter()
        .map(|k| normalize(k.as_ref()))
        .filter(|k| !k.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();

    let source = source
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "*".to_string());

    format!("{}|{}|{}", normalized.join(","), normalize(location), source)
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for QueryFingerprint {
    type Err = InvalidFingerprint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

// Serialize as hex string for JSON compatibility
impl Serialize for QueryFingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for QueryFingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex_string = String::deserialize(deserializer)?;
        Self::from_hex(&hex_string).map_err(serde::de::Error::custom)
    }
}

/// A normalized search request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub keywords: Vec<String>,
    pub location: String,
    /// Restrict the query to a single source
    pub source: Option<String>,
}

impl SearchQuery {
    /// Build a query across all sources
    pub fn new<S: AsRef<str>>(keywords: &[S], location: &str) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.as_ref().to_string()).collect(),
            location: location.to_string(),
            source: None,
        }
    }

    /// Restrict the query to a single source
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Fingerprint of this query
    pub fn fingerprint(&self) -> QueryFingerprint {
        QueryFingerprint::compute(&self.keywords, &self.location, self.source.as_deref())
    }

    /// Keywords joined with spaces, the form most upstream APIs accept
    pub fn keyword_string(&self) -> String {
        self.keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
