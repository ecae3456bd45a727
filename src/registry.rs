//! # Registry Service
//!
//! Principal-aware operations over the package and symbol stores. A transport
//! authenticates a request with [`Registry::authenticate`] and then calls the
//! operation for the route, passing the resulting [`Principal`].
//!
//! ## Authorization
//!
//! | Operation               | Requires                                          |
//! |-------------------------|---------------------------------------------------|
//! | publish package/symbols | publish capability (symbols: also ownership)      |
//! | delete                  | delete setting, delete capability, ownership      |
//! | unlist                  | unlist setting, delete capability, ownership      |
//! | relist                  | relist setting, delete capability, ownership      |
//! | listing and downloads   | nothing                                           |
//!
//! Lifecycle checks run in the order of the table columns; an absent package
//! is only reported as such to a principal that passed the first two.

use crate::auth::{AccessGate, AuthOutcome, Principal};
use crate::config::{ServerConfig, Settings};
use crate::error::Result;
use crate::packages::{PackageFile, PackageStore, PublishOutcome};
use crate::symbols::{SymbolRequest, SymbolStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a delete, unlist or relist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The operation took effect (or was already in effect).
    Done,
    /// The version does not exist.
    NotFound,
    /// The operation is disabled or the principal may not perform it.
    Unauthorized(String),
}

impl LifecycleOutcome {
    /// HTTP status a transport should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Done => 200,
            Self::NotFound => 404,
            Self::Unauthorized(_) => 401,
        }
    }
}

/// The versions of a package, as served by the flat container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersions {
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum Lifecycle {
    Delete,
    Unlist,
    Relist,
}

impl Lifecycle {
    fn name(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Unlist => "unlist",
            Self::Relist => "relist",
        }
    }

    fn is_allowed(self, settings: &dyn Settings) -> bool {
        match self {
            Self::Delete => settings.is_delete_allowed(),
            Self::Unlist => settings.is_unlist_allowed(),
            Self::Relist => settings.is_relist_allowed(),
        }
    }
}

/// The registry: access gate, settings and stores.
#[derive(Clone)]
pub struct Registry {
    gate: AccessGate,
    settings: Arc<dyn Settings>,
    packages: PackageStore,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("packages", &self.packages)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Assembles a registry from its parts.
    pub fn new(gate: AccessGate, settings: Arc<dyn Settings>, packages: PackageStore) -> Self {
        Self {
            gate,
            settings,
            packages,
        }
    }

    /// Opens the stores under the configured data directory.
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        let packages = PackageStore::with_path(&config.data_directory)?;
        let gate = config.access_gate();
        info!(
            "Registry ready (data: {}, delete: {}, unlist: {}, relist: {})",
            config.data_directory.display(),
            config.is_delete_allowed(),
            config.is_unlist_allowed(),
            config.is_relist_allowed()
        );
        Ok(Self::new(gate, Arc::new(config), packages))
    }

    /// The package store.
    pub fn packages(&self) -> &PackageStore {
        &self.packages
    }

    /// The symbol store.
    pub fn symbols(&self) -> &SymbolStore {
        self.packages.symbols()
    }

    /// Authenticates a request from the values of its API key header.
    pub async fn authenticate(&self, header_values: &[&str], now: DateTime<Utc>) -> AuthOutcome {
        self.gate.authenticate(header_values, now).await
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Publishes a package owned by `principal`.
    pub async fn publish_package<R>(
        &self,
        principal: &Principal,
        reader: R,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome>
    where
        R: AsyncRead + Unpin,
    {
        if !principal.can_publish {
            warn!("{} may not publish packages", principal.user_id);
            return Ok(PublishOutcome::Unauthorized(format!(
                "'{}' may not publish packages",
                principal.user_id
            )));
        }
        self.packages
            .add_package(&principal.user_id, reader, cancel)
            .await
    }

    /// Publishes the symbols package of a package owned by `principal`.
    pub async fn publish_symbols<R>(
        &self,
        principal: &Principal,
        reader: R,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome>
    where
        R: AsyncRead + Unpin,
    {
        if !principal.can_publish {
            warn!("{} may not publish symbols", principal.user_id);
            return Ok(PublishOutcome::Unauthorized(format!(
                "'{}' may not publish symbols",
                principal.user_id
            )));
        }
        self.packages
            .add_symbol_package(&principal.user_id, reader, cancel)
            .await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Deletes a version.
    pub async fn delete_package(
        &self,
        principal: &Principal,
        id: &str,
        version: &str,
    ) -> Result<LifecycleOutcome> {
        self.lifecycle(Lifecycle::Delete, principal, id, version)
            .await
    }

    /// Unlists a version.
    pub async fn unlist_package(
        &self,
        principal: &Principal,
        id: &str,
        version: &str,
    ) -> Result<LifecycleOutcome> {
        self.lifecycle(Lifecycle::Unlist, principal, id, version)
            .await
    }

    /// Relists a version.
    pub async fn relist_package(
        &self,
        principal: &Principal,
        id: &str,
        version: &str,
    ) -> Result<LifecycleOutcome> {
        self.lifecycle(Lifecycle::Relist, principal, id, version)
            .await
    }

    async fn lifecycle(
        &self,
        operation: Lifecycle,
        principal: &Principal,
        id: &str,
        version: &str,
    ) -> Result<LifecycleOutcome> {
        if !operation.is_allowed(self.settings.as_ref()) {
            warn!("Refused {} of {} {}: disabled", operation.name(), id, version);
            return Ok(LifecycleOutcome::Unauthorized(format!(
                "{} is disabled",
                operation.name()
            )));
        }
        if !principal.can_delete {
            warn!(
                "Refused {} of {} {}: {} lacks the capability",
                operation.name(),
                id,
                version,
                principal.user_id
            );
            return Ok(LifecycleOutcome::Unauthorized(format!(
                "'{}' may not {} packages",
                principal.user_id,
                operation.name()
            )));
        }

        if !self.packages.is_known(id, version).await {
            return Ok(LifecycleOutcome::NotFound);
        }
        match self.packages.package_owner(id, version).await {
            Some(owner) if owner == principal.user_id => {}
            _ => {
                warn!(
                    "Refused {} of {} {}: not owned by {}",
                    operation.name(),
                    id,
                    version,
                    principal.user_id
                );
                return Ok(LifecycleOutcome::Unauthorized(format!(
                    "{} {} is not owned by '{}'",
                    id, version, principal.user_id
                )));
            }
        }

        let done = match operation {
            Lifecycle::Delete => self.packages.delete_package(id, version).await?,
            Lifecycle::Unlist => self.packages.unlist_package(id, version).await?,
            Lifecycle::Relist => self.packages.relist_package(id, version).await?,
        };
        Ok(if done {
            LifecycleOutcome::Done
        } else {
            LifecycleOutcome::NotFound
        })
    }

    // =========================================================================
    // Serving
    // =========================================================================

    /// Lists the versions of a package, optionally only the listed ones.
    pub async fn package_versions(&self, id: &str, listed_only: bool) -> Result<PackageVersions> {
        let versions = if listed_only {
            self.packages.listed_package_versions(id).await?
        } else {
            self.packages.package_versions(id).await?
        };
        Ok(PackageVersions { versions })
    }

    /// Resolves a downloadable file of a version.
    pub async fn open_package_file(
        &self,
        id: &str,
        version: &str,
        file: &str,
    ) -> Option<PackageFile> {
        self.packages.resolve_file(id, version, file).await
    }

    /// Opens a symbol file for a symbol server request path.
    ///
    /// Returns `Ok(None)` for shapes that are never served and for unknown
    /// symbols; a stored file with the wrong signature is an error.
    pub async fn open_symbol(&self, request_path: &str) -> Result<Option<tokio::fs::File>> {
        match SymbolRequest::parse(request_path) {
            Some(SymbolRequest::Symbol { name, signature }) => {
                self.symbols().get(&name, &signature).await
            }
            Some(other) => {
                debug!("Symbol request shape not served: {:?}", other);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
