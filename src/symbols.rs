//! # Symbol Store
//!
//! Stores PDB files keyed by `(name, signature)` and serves them to symbol
//! clients.
//!
//! ## Storage Model
//!
//! Files are sharded on the first character of the name and split on its
//! first dot, then nested by signature:
//!
//! ```text
//! data/symbols/
//! ├── S/System/Text.Json/<signature>/System.Text.Json.pdb
//! └── f/foo/<signature>/foo.pdb
//! ```
//!
//! ## Consistency
//!
//! The signature is computed from the file bytes when a file is stored, and
//! computed again on every read. A stored file whose bytes no longer produce
//! the requested signature is never served; the read fails with
//! [`Error::SignatureMismatch`] instead, which is distinct from "not found".
//!
//! ## Request Shapes
//!
//! Symbol clients probe several URLs per file. [`SymbolRequest::parse`]
//! classifies them; only [`SymbolRequest::Symbol`] can ever be served.

use crate::constants::{
    COMPRESSED_SYMBOL_FILE_EXTENSION, MAX_SYMBOL_FILE_SIZE, SYMBOL_FILE_EXTENSION, is_safe_segment,
};
use crate::error::{Error, Result};
use crate::pdb::{self, PdbSignature};
use crate::storage::StagingArea;
use std::fs;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sharded, signature-verified PDB storage.
///
/// ## Thread Safety
///
/// Each file is written to a unique sibling temp file and renamed into place,
/// so concurrent writers of the same `(name, signature)` cannot produce a
/// torn file. The content is identical by construction (same signature), so
/// the last rename wins harmlessly.
#[derive(Debug, Clone)]
pub struct SymbolStore {
    /// Base directory for symbol files.
    base_dir: PathBuf,
    /// Staging for signature computation.
    staging: StagingArea,
}

impl SymbolStore {
    /// Creates a symbol store with files under `base_dir` and staging under `temp_dir`.
    pub fn with_path(base_dir: PathBuf, temp_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir).map_err(|e| Error::StorageInitFailed {
            path: base_dir.clone(),
            reason: e.to_string(),
        })?;
        let staging = StagingArea::with_path(temp_dir)?;

        info!("Symbol store initialized at: {}", base_dir.display());

        Ok(Self { base_dir, staging })
    }

    /// Returns the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the directory holding every signature of `name`.
    ///
    /// `None` if `name` cannot be used in a path.
    ///
    /// # Security
    ///
    /// Names are rejected unless they are a single safe path segment that
    /// neither starts nor ends with a dot, so neither shard segment can be
    /// empty, `.` or `..`.
    pub fn symbol_directory(&self, name: &str) -> Option<PathBuf> {
        if !is_safe_segment(name) || name.starts_with('.') || name.ends_with('.') {
            return None;
        }
        let shard = &name[..name.chars().next()?.len_utf8()];
        let dir = match name.find('.') {
            // System.Text.Json -> S/System/Text.Json
            Some(dot) => self
                .base_dir
                .join(shard)
                .join(&name[..dot])
                .join(&name[dot + 1..]),
            // foo -> f/foo
            None => self.base_dir.join(shard).join(name),
        };
        Some(dir)
    }

    /// Returns the path of `name` with `signature`.
    ///
    /// `None` if either part cannot be used in a path.
    pub fn symbol_path(&self, name: &str, signature: &str) -> Option<PathBuf> {
        if signature.is_empty() || !signature.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(
            self.symbol_directory(name)?
                .join(signature)
                .join(format!("{}{}", name, SYMBOL_FILE_EXTENSION)),
        )
    }

    /// Checks if a file exists for `(name, signature)`, without verifying it.
    pub fn contains(&self, name: &str, signature: &str) -> bool {
        self.symbol_path(name, signature)
            .is_some_and(|path| path.is_file())
    }

    /// Stores a PDB file read from an async stream.
    pub async fn put<R>(&self, name: &str, reader: R) -> Result<PdbSignature>
    where
        R: AsyncRead + Unpin,
    {
        if self.symbol_directory(name).is_none() {
            return Err(Error::InvalidSymbolName(name.to_string()));
        }
        let staged = self
            .staging
            .stage(reader, MAX_SYMBOL_FILE_SIZE, &CancellationToken::new())
            .await?;
        let store = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || store.place(&name, staged.path())).await?
    }

    /// Stores a PDB file read from a blocking stream.
    ///
    /// The stream does not need to be seekable: it is staged to a temp file
    /// first so that both signature formats can be tried.
    pub fn put_blocking<R: Read>(&self, name: &str, reader: &mut R) -> Result<PdbSignature> {
        if self.symbol_directory(name).is_none() {
            return Err(Error::InvalidSymbolName(name.to_string()));
        }
        let staged = self.staging.stage_blocking(reader, MAX_SYMBOL_FILE_SIZE)?;
        self.place(name, staged.path())
    }

    /// Computes the signature of a staged file and copies it into place.
    fn place(&self, name: &str, staged: &Path) -> Result<PdbSignature> {
        let mut file = BufReader::new(fs::File::open(staged)?);
        file.seek(SeekFrom::Start(0))?;
        let signature = pdb::signature_of(&mut file)?;
        drop(file);

        let path = self
            .symbol_path(name, &signature.to_string())
            .ok_or_else(|| Error::InvalidSymbolName(name.to_string()))?;
        info!("Adding symbol file: {}", path.display());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;
        }

        // Unique sibling temp file: concurrent writers never share one.
        let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::now_v7()));
        fs::copy(staged, &temp_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::StorageWriteFailed(e.to_string())
        })?;
        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::StorageWriteFailed(e.to_string())
        })?;

        debug!("Stored symbol file {} ({})", name, signature);
        Ok(signature)
    }

    /// Opens `(name, signature)` for reading.
    ///
    /// Returns `Ok(None)` if no such file is stored, and
    /// [`Error::SignatureMismatch`] if the stored bytes carry another
    /// signature (or none at all).
    pub async fn get(&self, name: &str, signature: &str) -> Result<Option<tokio::fs::File>> {
        let store = self.clone();
        let name = name.to_string();
        let signature = signature.to_string();
        let file = tokio::task::spawn_blocking(move || store.get_blocking(&name, &signature)).await??;
        Ok(file.map(tokio::fs::File::from_std))
    }

    /// Blocking variant of [`SymbolStore::get`].
    pub fn get_blocking(&self, name: &str, signature: &str) -> Result<Option<fs::File>> {
        let Some(path) = self.symbol_path(name, signature) else {
            debug!("Rejected symbol lookup for {} ({})", name, signature);
            return Ok(None);
        };
        if !path.is_file() {
            return Ok(None);
        }

        let actual = match pdb::signature_of_file(&path) {
            Ok(actual) => actual.to_string(),
            Err(e) => {
                error!("Stored symbol file {} is unreadable: {}", path.display(), e);
                String::from("<unreadable>")
            }
        };
        if actual != signature {
            return Err(Error::SignatureMismatch {
                name: name.to_string(),
                requested: signature.to_string(),
                actual,
            });
        }

        Ok(Some(fs::File::open(&path)?))
    }
}

// =============================================================================
// Symbol Server Requests
// =============================================================================

/// A symbol client request, relative to the symbol server root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolRequest {
    /// `{name}.pdb/{signature}/{name}.pdb`: the only servable shape.
    Symbol { name: String, signature: String },
    /// `{name}.pdb/{signature}/{name}.pd_`: compressed files are never stored.
    Compressed { name: String, signature: String },
    /// `{name}.pdb/{signature}/file.ptr`: redirection is never used.
    Pointer { name: String, signature: String },
    /// `index2.txt`: its absence keeps clients on the flat layout.
    TwoTierIndex,
}

impl SymbolRequest {
    /// Classifies a request path.
    ///
    /// Returns `None` for anything else, including requests whose file name
    /// does not match the directory name.
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.trim_start_matches('/');
        if path.eq_ignore_ascii_case("index2.txt") {
            return Some(Self::TwoTierIndex);
        }

        let mut segments = path.split('/');
        let (dir, signature, file) = (segments.next()?, segments.next()?, segments.next()?);
        if segments.next().is_some() {
            return None;
        }

        let name = strip_suffix_ignore_case(dir, SYMBOL_FILE_EXTENSION)?.to_string();
        let signature = signature.to_string();

        if file.eq_ignore_ascii_case("file.ptr") {
            return Some(Self::Pointer { name, signature });
        }

        let (stem, compressed) = match strip_suffix_ignore_case(file, SYMBOL_FILE_EXTENSION) {
            Some(stem) => (stem, false),
            None => (
                strip_suffix_ignore_case(file, COMPRESSED_SYMBOL_FILE_EXTENSION)?,
                true,
            ),
        };
        if stem != name {
            warn!(
                "Request with inconsistent symbol file name (\"{}\" vs \"{}\")",
                dir, file
            );
            return None;
        }

        Some(if compressed {
            Self::Compressed { name, signature }
        } else {
            Self::Symbol { name, signature }
        })
    }
}

fn strip_suffix_ignore_case<'a>(value: &'a str, suffix: &str) -> Option<&'a str> {
    let split = value.len().checked_sub(suffix.len())?;
    if !value.is_char_boundary(split) || !value[split..].eq_ignore_ascii_case(suffix) {
        return None;
    }
    Some(&value[..split])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> SymbolStore {
        SymbolStore::with_path(temp.path().join("symbols"), temp.path().join("temp")).unwrap()
    }

    #[test]
    fn test_symbol_directory_sharding() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let base = store.base_dir().to_path_buf();

        assert_eq!(
            store.symbol_directory("System.Text.Json"),
            Some(base.join("S").join("System").join("Text.Json"))
        );
        assert_eq!(
            store.symbol_directory("foo"),
            Some(base.join("f").join("foo"))
        );
    }

    #[test]
    fn test_symbol_directory_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        assert_eq!(store.symbol_directory(".."), None);
        assert_eq!(store.symbol_directory(".hidden"), None);
        assert_eq!(store.symbol_directory("trailing."), None);
        assert_eq!(store.symbol_directory("a/b"), None);
        assert_eq!(store.symbol_directory(""), None);
        assert_eq!(store.symbol_path("foo", "../ABC"), None);
    }

    #[test]
    fn test_request_parsing() {
        assert_eq!(
            SymbolRequest::parse("Foo.pdb/ABC1/Foo.pdb"),
            Some(SymbolRequest::Symbol {
                name: "Foo".into(),
                signature: "ABC1".into()
            })
        );
        assert_eq!(
            SymbolRequest::parse("Foo.pdb/ABC1/Foo.pd_"),
            Some(SymbolRequest::Compressed {
                name: "Foo".into(),
                signature: "ABC1".into()
            })
        );
        assert_eq!(
            SymbolRequest::parse("Foo.pdb/ABC1/file.ptr"),
            Some(SymbolRequest::Pointer {
                name: "Foo".into(),
                signature: "ABC1".into()
            })
        );
        assert_eq!(SymbolRequest::parse("index2.txt"), Some(SymbolRequest::TwoTierIndex));
        assert_eq!(SymbolRequest::parse("Foo.pdb/ABC1/Bar.pdb"), None);
        assert_eq!(SymbolRequest::parse("Foo.pdb/ABC1"), None);
    }
}
