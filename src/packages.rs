//! # Package Store
//!
//! Versioned, filesystem-backed storage for package archives.
//!
//! ## Layout
//!
//! ```text
//! data/packages/
//! └── foo.bar/                  (normalized id)
//!     └── 1.0.0/                (normalized version)
//!         ├── foo.bar.1.0.0.nupkg
//!         ├── foo.bar.1.0.0.snupkg   (after a symbols publish)
//!         ├── foo.bar.nuspec
//!         ├── .metadata
//!         └── .unlisted              (marker; presence = unlisted)
//! ```
//!
//! The version directory is the only existence predicate. It is assembled in
//! staging and moved into place with one no-replace rename (see
//! [`crate::storage`]), so a version either exists completely or not at all.
//!
//! ## Outcomes
//!
//! Publish operations return a [`PublishOutcome`]. Validation, conflict,
//! ownership and not-found failures are values; only faults (unexpected I/O,
//! cancellation, panics in a storage task) are `Err`.

use crate::archive::{self, PackageManifest};
use crate::constants::{
    MANIFEST_CONTENT_TYPE, MAX_PACKAGE_SIZE, METADATA_FILE, PACKAGE_CONTENT_TYPE, PACKAGES_DIR,
    PUBLISH_TEMP_DIR, SYMBOL_FILE_EXTENSION, SYMBOLS_DIR, SYMBOLS_TEMP_DIR, TEMP_DIR,
    UNLISTED_MARKER,
};
use crate::error::{Error, ErrorKind, Result};
use crate::identity::PackageIdentity;
use crate::metadata::PackageMetadata;
use crate::storage::{StagingArea, rename_noreplace};
use crate::symbols::SymbolStore;
use chrono::Utc;
use sha2::{Digest, Sha512};
use std::fs;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The package (or its symbols) was stored.
    Created(PackageIdentity),
    /// The upload is not a usable package.
    Invalid(String),
    /// The target already exists, or could not be placed.
    Conflict(String),
    /// The parent package of a symbols package does not exist.
    NotFound(String),
    /// The principal may not publish this.
    Unauthorized(String),
}

impl PublishOutcome {
    /// Maps an expected failure to its outcome; faults stay errors.
    pub fn from_error(err: Error) -> Result<Self> {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::Validation => Ok(Self::Invalid(message)),
            ErrorKind::Conflict | ErrorKind::StoreIo => Ok(Self::Conflict(message)),
            ErrorKind::NotFound => Ok(Self::NotFound(message)),
            ErrorKind::Unauthorized => Ok(Self::Unauthorized(message)),
            ErrorKind::Consistency | ErrorKind::Fault => Err(err),
        }
    }

    /// HTTP status a transport should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Created(_) => 201,
            Self::Invalid(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
        }
    }

    /// Checks if this is [`PublishOutcome::Created`].
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Which of the three servable files a request resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFileKind {
    /// `{id}.{version}.nupkg`
    Package,
    /// `{id}.{version}.snupkg`
    Symbols,
    /// `{id}.nuspec`
    Manifest,
}

/// A stored file resolved by [`PackageStore::resolve_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    path: PathBuf,
    kind: PackageFileKind,
}

impl PackageFile {
    /// Location on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Kind of file.
    pub fn kind(&self) -> PackageFileKind {
        self.kind
    }

    /// Content type to serve the file with.
    pub fn content_type(&self) -> &'static str {
        match self.kind {
            PackageFileKind::Package | PackageFileKind::Symbols => PACKAGE_CONTENT_TYPE,
            PackageFileKind::Manifest => MANIFEST_CONTENT_TYPE,
        }
    }

    /// Opens the file for reading.
    pub async fn open(&self) -> Result<tokio::fs::File> {
        Ok(tokio::fs::File::open(&self.path).await?)
    }
}

/// Filesystem-backed package storage.
///
/// Cheap to clone; clones share the same directories.
#[derive(Debug, Clone)]
pub struct PackageStore {
    /// Root of the versioned package tree.
    packages_dir: PathBuf,
    /// Upload and version staging.
    staging: StagingArea,
    /// Destination for PDB files extracted from symbols packages.
    symbols: SymbolStore,
}

impl PackageStore {
    /// Opens (creating if needed) the package and symbol stores under `data_dir`.
    pub fn with_path(data_dir: &Path) -> Result<Self> {
        let packages_dir = data_dir.join(PACKAGES_DIR);
        fs::create_dir_all(&packages_dir).map_err(|e| Error::StorageInitFailed {
            path: packages_dir.clone(),
            reason: e.to_string(),
        })?;
        let temp_dir = data_dir.join(TEMP_DIR);
        let staging = StagingArea::with_path(temp_dir.join(PUBLISH_TEMP_DIR))?;
        let symbols =
            SymbolStore::with_path(data_dir.join(SYMBOLS_DIR), temp_dir.join(SYMBOLS_TEMP_DIR))?;

        info!("Package store initialized at: {}", packages_dir.display());

        Ok(Self {
            packages_dir,
            staging,
            symbols,
        })
    }

    /// Returns the symbol store that receives extracted PDB files.
    pub fn symbols(&self) -> &SymbolStore {
        &self.symbols
    }

    /// Returns the root of the package tree.
    pub fn packages_dir(&self) -> &Path {
        &self.packages_dir
    }

    /// Returns the directory of a version.
    pub fn package_dir(&self, identity: &PackageIdentity) -> PathBuf {
        self.packages_dir
            .join(identity.id())
            .join(identity.version())
    }

    /// Checks if a version exists.
    pub fn contains(&self, identity: &PackageIdentity) -> bool {
        self.package_dir(identity).is_dir()
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Publishes an ordinary package owned by `owner`.
    pub async fn add_package<R>(
        &self,
        owner: &str,
        reader: R,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let result = async {
            let staged = self.staging.stage(reader, MAX_PACKAGE_SIZE, cancel).await?;
            let store = self.clone();
            let owner = owner.to_string();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || store.place_package(&owner, &staged, &cancel))
                .await?
        }
        .await;
        Self::outcome(result)
    }

    /// Publishes the symbols package of an existing package owned by `owner`.
    ///
    /// PDB members are extracted into the symbol store afterwards; a member
    /// that cannot be stored is logged and skipped.
    pub async fn add_symbol_package<R>(
        &self,
        owner: &str,
        reader: R,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let result = async {
            let staged = self.staging.stage(reader, MAX_PACKAGE_SIZE, cancel).await?;
            let store = self.clone();
            let owner = owner.to_string();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || store.place_symbols(&owner, staged, &cancel))
                .await?
        }
        .await;
        Self::outcome(result)
    }

    fn outcome(result: Result<PackageIdentity>) -> Result<PublishOutcome> {
        match result {
            Ok(identity) => Ok(PublishOutcome::Created(identity)),
            Err(e) => {
                warn!("Publish rejected: {}", e);
                PublishOutcome::from_error(e)
            }
        }
    }

    fn read_staged_manifest(staged: &Path, expect_symbols: bool) -> Result<PackageManifest> {
        let file = BufReader::new(fs::File::open(staged)?);
        Ok(archive::read_manifest(file, expect_symbols)?)
    }

    /// Assembles a version directory in staging and commits it.
    fn place_package(
        &self,
        owner: &str,
        staged: &NamedTempFile,
        cancel: &CancellationToken,
    ) -> Result<PackageIdentity> {
        let manifest = Self::read_staged_manifest(staged.path(), false)?;
        let identity = PackageIdentity::new(&manifest.id, &manifest.version)?;
        let target = self.package_dir(&identity);
        if target.exists() {
            return Err(Error::AlreadyExists {
                package: identity.to_string(),
                file: identity.package_file_name(),
            });
        }

        let version_dir = self.staging.temp_dir("version-")?;
        let write_failed = |e: io::Error| Error::StorageWriteFailed(e.to_string());

        let sha512 = copy_hashed(
            staged.path(),
            &version_dir.path().join(identity.package_file_name()),
        )
        .map_err(write_failed)?;
        fs::write(
            version_dir.path().join(identity.manifest_file_name()),
            &manifest.xml,
        )
        .map_err(write_failed)?;
        PackageMetadata::new(owner, Some(sha512))
            .store(&version_dir.path().join(METADATA_FILE))?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if let Some(id_dir) = target.parent() {
            fs::create_dir_all(id_dir).map_err(write_failed)?;
        }
        match rename_noreplace(version_dir.path(), &target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists {
                    package: identity.to_string(),
                    file: identity.package_file_name(),
                });
            }
            // ENOTEMPTY: another publish committed first
            Err(e) if target.exists() => {
                debug!("Lost publish race for {}: {}", identity, e);
                return Err(Error::AlreadyExists {
                    package: identity.to_string(),
                    file: identity.package_file_name(),
                });
            }
            Err(e) => return Err(write_failed(e)),
        }
        // The guard's cleanup is a no-op once the directory has moved.
        drop(version_dir);

        info!("Published package {} (owner: {})", identity, owner);
        Ok(identity)
    }

    /// Stores a symbols archive next to its package and extracts its PDBs.
    fn place_symbols(
        &self,
        owner: &str,
        staged: NamedTempFile,
        cancel: &CancellationToken,
    ) -> Result<PackageIdentity> {
        let manifest = Self::read_staged_manifest(staged.path(), true)?;
        let identity = PackageIdentity::new(&manifest.id, &manifest.version)?;
        let dir = self.package_dir(&identity);
        if !dir.is_dir() {
            return Err(Error::PackageNotFound(identity.to_string()));
        }

        let metadata_path = dir.join(METADATA_FILE);
        let mut metadata = PackageMetadata::load(&metadata_path).map_err(|e| {
            error!("{}", e);
            Error::Unauthorized(format!("cannot verify the owner of {}", identity))
        })?;
        if metadata.owner != owner {
            return Err(Error::Unauthorized(format!(
                "{} is not owned by '{}'",
                identity, owner
            )));
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let target = dir.join(identity.symbols_file_name());
        info!("Adding symbols package: {}", target.display());
        if let Err(e) = staged.persist_noclobber(&target) {
            return Err(if e.error.kind() == io::ErrorKind::AlreadyExists {
                Error::AlreadyExists {
                    package: identity.to_string(),
                    file: identity.symbols_file_name(),
                }
            } else {
                Error::StorageWriteFailed(e.error.to_string())
            });
        }

        metadata.symbols_uploaded = Some(Utc::now());
        if let Err(e) = metadata.store(&metadata_path) {
            let _ = fs::remove_file(&target);
            return Err(e);
        }

        let extracted = self.extract_symbols(&target);
        info!(
            "Published symbols for {} ({} symbol files)",
            identity, extracted
        );
        Ok(identity)
    }

    /// Stores every `.pdb` member of a symbols archive. Returns how many were stored.
    fn extract_symbols(&self, archive_path: &Path) -> usize {
        let archive = fs::File::open(archive_path)
            .map_err(|e| e.to_string())
            .and_then(|file| zip::ZipArchive::new(BufReader::new(file)).map_err(|e| e.to_string()));
        let mut archive = match archive {
            Ok(archive) => archive,
            Err(e) => {
                warn!(
                    "Unable to open {} for symbol extraction: {}",
                    archive_path.display(),
                    e
                );
                return 0;
            }
        };

        let mut extracted = 0;
        for index in 0..archive.len() {
            let mut entry = match archive.by_index(index) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable archive entry #{}: {}", index, e);
                    continue;
                }
            };
            let Some(name) = symbol_entry_name(entry.name()) else {
                continue;
            };
            match self.symbols.put_blocking(&name, &mut entry) {
                Ok(signature) => {
                    debug!("Extracted {} ({})", entry.name(), signature);
                    extracted += 1;
                }
                Err(e) => warn!("Failed to extract symbol file {}: {}", entry.name(), e),
            }
        }
        extracted
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Removes a version. Returns `false` if it does not exist.
    ///
    /// Symbol files extracted from the version's symbols package are kept.
    pub async fn delete_package(&self, id: &str, version: &str) -> Result<bool> {
        let Some(identity) = PackageIdentity::lookup(id, version) else {
            return Ok(false);
        };
        let store = self.clone();
        let deleted = tokio::task::spawn_blocking(move || {
            store.staging.remove_dir(&store.package_dir(&identity))
        })
        .await??;
        if deleted {
            info!("Deleted package {} {}", id, version);
        }
        Ok(deleted)
    }

    /// Hides a version from listings. Returns `false` if it does not exist.
    pub async fn unlist_package(&self, id: &str, version: &str) -> Result<bool> {
        let Some(dir) = self.existing_dir(id, version).await else {
            return Ok(false);
        };
        let marker = dir.join(UNLISTED_MARKER);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
            .await
        {
            Ok(_) => info!("Unlisted package {} {}", id, version),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Package {} {} is already unlisted", id, version);
            }
            // deleted concurrently
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }

    /// Shows a version in listings again. Returns `false` if it does not exist.
    pub async fn relist_package(&self, id: &str, version: &str) -> Result<bool> {
        let Some(dir) = self.existing_dir(id, version).await else {
            return Ok(false);
        };
        match tokio::fs::remove_file(dir.join(UNLISTED_MARKER)).await {
            Ok(()) => info!("Relisted package {} {}", id, version),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Package {} {} is already listed", id, version);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }

    /// Checks if a version exists.
    pub async fn is_known(&self, id: &str, version: &str) -> bool {
        self.existing_dir(id, version).await.is_some()
    }

    /// Checks if a version exists and is not unlisted.
    pub async fn is_listed(&self, id: &str, version: &str) -> bool {
        match self.existing_dir(id, version).await {
            Some(dir) => !path_exists(&dir.join(UNLISTED_MARKER)).await,
            None => false,
        }
    }

    /// Returns the user id that published a version.
    ///
    /// A missing or malformed sidecar is logged and treated as no owner.
    pub async fn package_owner(&self, id: &str, version: &str) -> Option<String> {
        let dir = self.existing_dir(id, version).await?;
        let path = dir.join(METADATA_FILE);
        let loaded = tokio::task::spawn_blocking(move || PackageMetadata::load(&path)).await;
        match loaded {
            Ok(Ok(metadata)) => Some(metadata.owner),
            Ok(Err(e)) => {
                error!("Unable to read owner of {} {}: {}", id, version, e);
                None
            }
            Err(e) => {
                error!("Unable to read owner of {} {}: {}", id, version, e);
                None
            }
        }
    }

    /// Lists the stored versions of a package, sorted.
    ///
    /// An unknown id yields an empty list.
    pub async fn package_versions(&self, id: &str) -> Result<Vec<String>> {
        let Some(id_key) = crate::identity::normalize_id(id) else {
            return Ok(Vec::new());
        };
        let mut entries = match tokio::fs::read_dir(self.packages_dir.join(id_key)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                versions.push(name.to_string());
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Lists the stored versions of a package that are not unlisted.
    pub async fn listed_package_versions(&self, id: &str) -> Result<Vec<String>> {
        let mut listed = Vec::new();
        for version in self.package_versions(id).await? {
            if self.is_listed(id, &version).await {
                listed.push(version);
            }
        }
        Ok(listed)
    }

    // =========================================================================
    // Serving
    // =========================================================================

    /// Resolves a requested file name within a version.
    ///
    /// Only `{id}.{version}.nupkg`, `{id}.{version}.snupkg` and `{id}.nuspec`
    /// are ever resolved; any other name is not found, whatever exists on disk.
    pub async fn resolve_file(&self, id: &str, version: &str, file: &str) -> Option<PackageFile> {
        let identity = PackageIdentity::lookup(id, version)?;
        let requested = file.to_lowercase();

        let kind = if requested == identity.package_file_name() {
            PackageFileKind::Package
        } else if requested == identity.symbols_file_name() {
            PackageFileKind::Symbols
        } else if requested == identity.manifest_file_name() {
            PackageFileKind::Manifest
        } else {
            warn!(
                "Rejected request for unexpected file '{}' of {}",
                file, identity
            );
            return None;
        };

        let path = self.package_dir(&identity).join(requested);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(PackageFile { path, kind }),
            _ => None,
        }
    }

    async fn existing_dir(&self, id: &str, version: &str) -> Option<PathBuf> {
        let identity = PackageIdentity::lookup(id, version)?;
        let dir = self.package_dir(&identity);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Some(dir),
            _ => None,
        }
    }
}

/// Returns the symbol name for a `.pdb` archive member, or `None` for other members.
fn symbol_entry_name(entry: &str) -> Option<String> {
    let file_name = entry.rsplit(['/', '\\']).next()?;
    let split = file_name.len().checked_sub(SYMBOL_FILE_EXTENSION.len())?;
    if split == 0
        || !file_name.is_char_boundary(split)
        || !file_name[split..].eq_ignore_ascii_case(SYMBOL_FILE_EXTENSION)
    {
        return None;
    }
    Some(file_name[..split].to_string())
}

/// Copies `from` to `to`, returning the hex SHA-512 of the bytes copied.
fn copy_hashed(from: &Path, to: &Path) -> io::Result<String> {
    let mut source = fs::File::open(from)?;
    let mut dest = fs::File::create(to)?;
    let mut hasher = Sha512::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = source.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        dest.write_all(&buffer[..read])?;
    }
    dest.sync_all()?;
    Ok(hex::encode(hasher.finalize()))
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_entry_name() {
        assert_eq!(symbol_entry_name("lib/net8.0/Foo.Bar.pdb").as_deref(), Some("Foo.Bar"));
        assert_eq!(symbol_entry_name("Foo.PDB").as_deref(), Some("Foo"));
        assert_eq!(symbol_entry_name("lib\\Foo.pdb").as_deref(), Some("Foo"));
        assert_eq!(symbol_entry_name("lib/Foo.dll"), None);
        assert_eq!(symbol_entry_name("lib/.pdb"), None);
        assert_eq!(symbol_entry_name("lib/"), None);
    }

    #[test]
    fn test_outcome_mapping() {
        let outcome = PublishOutcome::from_error(Error::PackageNotFound("x".into())).unwrap();
        assert_eq!(outcome.status_code(), 404);

        let outcome = PublishOutcome::from_error(Error::StorageWriteFailed("disk".into())).unwrap();
        assert!(matches!(outcome, PublishOutcome::Conflict(_)));

        assert!(PublishOutcome::from_error(Error::Cancelled).is_err());
    }

    fn package_archive(id: &str, version: &str) -> Vec<u8> {
        use zip::write::FileOptions;

        let nuspec = format!(
            r#"<package xmlns="http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd"><metadata><id>{}</id><version>{}</version></metadata></package>"#,
            id, version
        );
        let rels = format!(
            r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Type="http://schemas.microsoft.com/packaging/2010/07/manifest" Target="/{}.nuspec" Id="R0" /></Relationships>"#,
            id
        );
        let mut writer = zip::ZipWriter::new(io::Cursor::new(Vec::new()));
        for (name, data) in [
            ("[Content_Types].xml".to_string(), "<Types />".to_string()),
            ("_rels/.rels".to_string(), rels),
            (format!("{}.nuspec", id), nuspec),
        ] {
            writer.start_file(name, FileOptions::default()).unwrap();
            writer.write_all(data.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_cancel_before_commit_discards_assembled_version() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = PackageStore::with_path(temp.path()).unwrap();
        let data = package_archive("Foo", "1.0.0");
        let staged = store
            .staging
            .stage_blocking(&mut data.as_slice(), MAX_PACKAGE_SIZE)
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = store.place_package("alice", &staged, &cancel);
        drop(staged);

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(fs::read_dir(store.packages_dir()).unwrap().count(), 0);
        assert_eq!(fs::read_dir(store.staging.dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_place_package_commits_assembled_version() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = PackageStore::with_path(temp.path()).unwrap();
        let data = package_archive("Foo", "1.0.0");
        let staged = store
            .staging
            .stage_blocking(&mut data.as_slice(), MAX_PACKAGE_SIZE)
            .unwrap();

        let identity = store
            .place_package("alice", &staged, &CancellationToken::new())
            .unwrap();
        drop(staged);

        let dir = store.package_dir(&identity);
        assert!(dir.join("foo.1.0.0.nupkg").is_file());
        assert!(dir.join("foo.nuspec").is_file());
        assert!(dir.join(METADATA_FILE).is_file());
        assert_eq!(fs::read_dir(store.staging.dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_copy_hashed() {
        let temp = tempfile::TempDir::new().unwrap();
        let from = temp.path().join("from");
        let to = temp.path().join("to");
        fs::write(&from, b"abc").unwrap();

        let digest = copy_hashed(&from, &to).unwrap();
        assert_eq!(digest, hex::encode(Sha512::digest(b"abc")));
        assert_eq!(fs::read(&to).unwrap(), b"abc");
    }
}
