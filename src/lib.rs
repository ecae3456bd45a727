//! # nuvault
//!
//! **Self-Hosted NuGet Package Registry and Symbol Server**
//!
//! This crate implements the storage engine of a NuGet-compatible package
//! registry: it accepts uploaded package archives, stores them in a versioned
//! filesystem layout, manages their list/unlist/relist/delete lifecycle, and
//! serves the debug-symbol (PDB) files bundled inside symbols packages.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                             Registry                                │
//! │   authenticate → publish / delete / unlist / relist → serve         │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────────────────────────────────┐    │
//! │  │  AccessGate  │   │              PackageStore                │    │
//! │  │ key → user → │   │  stage → read manifest → normalize →     │    │
//! │  │  principal   │   │  assemble → rename_noreplace (commit)    │    │
//! │  └──────────────┘   └───────────────┬──────────────────────────┘    │
//! │                                     │ .pdb members                  │
//! │  ┌──────────────┐   ┌───────────────▼──────────────────────────┐    │
//! │  │   archive    │   │              SymbolStore                 │    │
//! │  │ OPC + nuspec │   │  signature_of → shard/sig/name.pdb       │    │
//! │  └──────────────┘   │  verify signature on every read          │    │
//! │                     └──────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # On-Disk Layout
//!
//! ```text
//! data/
//! ├── packages/{id}/{version}/{id}.{version}.nupkg
//! │                           {id}.{version}.snupkg
//! │                           {id}.nuspec
//! │                           .metadata
//! │                           .unlisted
//! ├── symbols/{shard...}/{signature}/{name}.pdb
//! └── temp/                   (staging; never served)
//! ```
//!
//! # Security Model
//!
//! - **Path Safety**: ids, versions and symbol names become path segments only
//!   after [`constants::is_safe_segment`]; file requests are resolved against a
//!   whitelist of three names (see [`PackageStore::resolve_file`]).
//! - **Size Limits**: uploads are capped by `MAX_PACKAGE_SIZE`, manifests by
//!   `MAX_MANIFEST_SIZE`, extracted PDB files by `MAX_SYMBOL_FILE_SIZE`.
//! - **Publish Once**: a version directory is committed with a single no-replace
//!   rename; a second publish of the same identity is always a conflict.
//! - **Double Gating**: a principal's capabilities are the intersection of its
//!   key's and its user's flags; lifecycle operations also require ownership.
//! - **Consistency**: symbol files are re-signed on every read and never served
//!   under a signature they do not carry.
//!
//! # Example
//!
//! ```rust,ignore
//! use nuvault::{AuthOutcome, Registry, ServerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> nuvault::Result<()> {
//!     let config = ServerConfig::from_file("nuvault.json".as_ref())?;
//!     let registry = Registry::from_config(config)?;
//!
//!     if let AuthOutcome::Success(principal) =
//!         registry.authenticate(&["my-key"], chrono::Utc::now()).await
//!     {
//!         let upload = tokio::fs::File::open("Foo.Bar.1.0.0.nupkg").await?;
//!         let outcome = registry
//!             .publish_package(&principal, upload, &CancellationToken::new())
//!             .await?;
//!         println!("{:?}", outcome);
//!     }
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod auth;
pub mod config;
pub mod constants;
pub mod error;
pub mod identity;
pub mod metadata;
pub mod packages;
pub mod pdb;
pub mod registry;
pub mod storage;
pub mod symbols;

// Re-exports
pub use archive::{ArchiveError, PackageManifest, read_manifest};
pub use auth::{AccessGate, ApiKey, AuthFailure, AuthOutcome, Principal, User};
pub use config::{ServerConfig, Settings};
pub use error::{Error, ErrorKind, Result};
pub use identity::{PackageIdentity, normalize_id, normalize_version};
pub use metadata::PackageMetadata;
pub use packages::{PackageFile, PackageFileKind, PackageStore, PublishOutcome};
pub use pdb::{PdbFormatError, PdbSignature, signature_of};
pub use registry::{LifecycleOutcome, PackageVersions, Registry};
pub use symbols::{SymbolRequest, SymbolStore};
