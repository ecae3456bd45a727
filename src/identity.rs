//! Package identity normalization.
//!
//! Every lookup and every placement goes through [`normalize_id`] and
//! [`normalize_version`]. The store has no index besides the directory tree,
//! so two spellings of the same identity only resolve to the same directory if
//! both are folded by exactly these functions.

use crate::constants::is_safe_segment;
use crate::error::{Error, Result};
use std::fmt;

/// Canonicalizes a package id into its storage key.
///
/// Returns `None` if the id cannot be used as a path segment.
#[must_use]
pub fn normalize_id(raw: &str) -> Option<String> {
    if !is_safe_segment(raw) {
        return None;
    }
    Some(raw.to_lowercase())
}

/// Canonicalizes a package version into its storage key.
///
/// Build metadata (`+...`) is dropped before lower-casing, so `1.0.0+abc` and
/// `1.0.0` share a directory. Returns `None` if what remains cannot be used as
/// a path segment.
#[must_use]
pub fn normalize_version(raw: &str) -> Option<String> {
    let without_metadata = match raw.find('+') {
        Some(plus) => &raw[..plus],
        None => raw,
    };
    if !is_safe_segment(without_metadata) {
        return None;
    }
    Some(without_metadata.to_lowercase())
}

/// A normalized `(id, version)` pair.
///
/// Construct through [`PackageIdentity::new`]; the fields are always in
/// canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageIdentity {
    id: String,
    version: String,
}

impl PackageIdentity {
    /// Normalizes both parts, failing with a validation error naming the bad field.
    pub fn new(id: &str, version: &str) -> Result<Self> {
        let id_key = normalize_id(id).ok_or_else(|| Error::InvalidIdentity {
            field: "id",
            value: id.to_string(),
        })?;
        let version_key = normalize_version(version).ok_or_else(|| Error::InvalidIdentity {
            field: "version",
            value: version.to_string(),
        })?;
        Ok(Self {
            id: id_key,
            version: version_key,
        })
    }

    /// Normalizes both parts, returning `None` for anything unusable.
    ///
    /// Lookups use this: an identity that cannot be normalized cannot exist.
    #[must_use]
    pub fn lookup(id: &str, version: &str) -> Option<Self> {
        Some(Self {
            id: normalize_id(id)?,
            version: normalize_version(version)?,
        })
    }

    /// The canonical id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The canonical version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// `{id}.{version}.nupkg`
    pub fn package_file_name(&self) -> String {
        format!("{}.{}{}", self.id, self.version, crate::constants::PACKAGE_EXTENSION)
    }

    /// `{id}.{version}.snupkg`
    pub fn symbols_file_name(&self) -> String {
        format!("{}.{}{}", self.id, self.version, crate::constants::SYMBOLS_EXTENSION)
    }

    /// `{id}.nuspec`
    pub fn manifest_file_name(&self) -> String {
        format!("{}{}", self.id, crate::constants::MANIFEST_EXTENSION)
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}
