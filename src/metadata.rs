//! Package metadata sidecar (`.metadata`).
//!
//! One JSON document per version directory recording who published the
//! package and when. Rewrites go through a sibling temp file and a rename, so
//! readers see either the old or the new document, never a torn one.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Contents of the `.metadata` sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    /// User id of the publisher.
    pub owner: String,
    /// When the package was published.
    pub uploaded: DateTime<Utc>,
    /// When the symbols package was published, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols_uploaded: Option<DateTime<Utc>>,
    /// Hex SHA-512 of the package archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
}

impl PackageMetadata {
    /// Metadata for a package published now.
    pub fn new(owner: impl Into<String>, sha512: Option<String>) -> Self {
        Self {
            owner: owner.into(),
            uploaded: Utc::now(),
            symbols_uploaded: None,
            sha512,
        }
    }

    /// Loads a sidecar.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::InvalidMetadata {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| Error::InvalidMetadata {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Writes the sidecar, replacing any previous version atomically.
    pub fn store(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)?;
        let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::now_v7()));
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&content)?;
            file.sync_all()?;
            fs::rename(&temp_path, path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::StorageWriteFailed(format!(
                "failed to write metadata {}: {}",
                path.display(),
                e
            ))
        })
    }
}
