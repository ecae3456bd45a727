//! Server configuration.
//!
//! Loaded once at startup from a JSON file:
//!
//! ```json
//! {
//!   "dataDirectory": "data",
//!   "nuget": {
//!     "allowDelete": false,
//!     "allowUnlist": true,
//!     "allowRelist": true,
//!     "apiKeys": {
//!       "3f2a...": { "name": "ci", "owner": "alice", "canPublish": true,
//!                    "canDelete": false, "expiry": "2030-01-01T00:00:00Z" }
//!     },
//!     "users": {
//!       "alice": { "name": "Alice", "canPublish": true, "canDelete": true }
//!     }
//!   }
//! }
//! ```
//!
//! Every section is optional; lifecycle switches default to off and the
//! tables default to empty.

use crate::auth::{AccessGate, ApiKey, InMemoryApiKeyStore, InMemoryUserStore, User};
use crate::constants::DEFAULT_DATA_DIR;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Lifecycle switches consulted before delete, unlist and relist.
pub trait Settings: Send + Sync {
    /// Whether versions may be deleted.
    fn is_delete_allowed(&self) -> bool;
    /// Whether versions may be unlisted.
    fn is_unlist_allowed(&self) -> bool;
    /// Whether versions may be relisted.
    fn is_relist_allowed(&self) -> bool;
}

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Root of the package, symbol and temp trees.
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
    /// Registry settings and credential tables.
    #[serde(default)]
    pub nuget: NuGetConfig,
}

/// The `nuget` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NuGetConfig {
    #[serde(default)]
    pub allow_delete: bool,
    #[serde(default)]
    pub allow_unlist: bool,
    #[serde(default)]
    pub allow_relist: bool,
    /// API keys by secret value.
    #[serde(default)]
    pub api_keys: HashMap<String, ApiKey>,
    /// Users by id.
    #[serde(default)]
    pub users: HashMap<String, User>,
}

fn default_data_directory() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_directory: default_data_directory(),
            nuget: NuGetConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads a configuration file.
    ///
    /// A relative `dataDirectory` is resolved against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut config: Self = serde_json::from_str(&content).map_err(|e| Error::InvalidConfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if config.data_directory.is_relative()
            && let Some(parent) = path.parent()
        {
            config.data_directory = parent.join(&config.data_directory);
        }

        info!(
            "Loaded configuration from {} ({} keys, {} users)",
            path.display(),
            config.nuget.api_keys.len(),
            config.nuget.users.len()
        );
        Ok(config)
    }

    /// Parses a configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidConfig {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })
    }

    /// Builds the access gate over this configuration's key and user tables.
    pub fn access_gate(&self) -> AccessGate {
        AccessGate::new(
            Arc::new(InMemoryApiKeyStore::new(self.nuget.api_keys.clone())),
            Arc::new(InMemoryUserStore::new(self.nuget.users.clone())),
        )
    }
}

impl Settings for ServerConfig {
    fn is_delete_allowed(&self) -> bool {
        self.nuget.allow_delete
    }

    fn is_unlist_allowed(&self) -> bool {
        self.nuget.allow_unlist
    }

    fn is_relist_allowed(&self) -> bool {
        self.nuget.allow_relist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ServerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert!(!config.is_delete_allowed());
        assert!(!config.is_unlist_allowed());
        assert!(!config.is_relist_allowed());
    }

    #[test]
    fn test_relative_data_directory_follows_config_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("nuvault.json");
        std::fs::write(&path, r#"{"dataDirectory":"store","nuget":{"allowUnlist":true}}"#)
            .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.data_directory, temp.path().join("store"));
        assert!(config.is_unlist_allowed());
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        assert!(matches!(
            ServerConfig::from_json_str("{\"nuget\": 3}"),
            Err(Error::InvalidConfig { .. })
        ));
    }
}
