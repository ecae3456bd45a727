//! # Filesystem Primitives
//!
//! Staging and commit helpers shared by the package and symbol stores.
//!
//! ## Staging
//!
//! Uploads are never written to their final location directly. They are
//! first copied into a process-private staging directory:
//!
//! ```text
//! data/temp/
//! ├── publish/
//! │   ├── upload-XXXXXX      (raw upload, deleted on drop)
//! │   └── version-XXXXXX/    (fully assembled version directory)
//! └── symbols/
//!     └── pdb-XXXXXX         (seekable copy of a PDB member)
//! ```
//!
//! Staged files and directories are owned by [`tempfile`] guards, so they are
//! removed whether the wrapped operation succeeds, fails, panics, or is
//! dropped mid-flight by a cancelled caller.
//!
//! ## Commit Points
//!
//! A version directory becomes visible through exactly one
//! [`rename_noreplace`]. On Linux this is `renameat2(RENAME_NOREPLACE)`, which
//! fails with `AlreadyExists` if the target appeared in the meantime, so two
//! concurrent publishes of one identity cannot both win. Other platforms fall
//! back to an existence check followed by `rename`.
//!
//! Removal is the mirror image: the directory is renamed into staging first
//! and deleted from there, so readers never observe a half-deleted version.

use crate::error::{Error, Result};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A process-private directory for staged uploads.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Creates (if needed) and wraps a staging directory.
    pub fn with_path(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| Error::StorageInitFailed {
            path: dir.clone(),
            reason: e.to_string(),
        })?;
        debug!("Staging area initialized at: {}", dir.display());
        Ok(Self { dir })
    }

    /// Returns the staging directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates an empty staged file, removed when the guard drops.
    pub fn temp_file(&self, prefix: &str) -> Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(&self.dir)
            .map_err(|e| Error::StorageWriteFailed(format!("failed to create temp file: {}", e)))
    }

    /// Creates an empty staged directory, removed recursively when the guard drops.
    pub fn temp_dir(&self, prefix: &str) -> Result<TempDir> {
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.dir)
            .map_err(|e| {
                Error::StorageWriteFailed(format!("failed to create temp directory: {}", e))
            })
    }

    /// Copies an async stream into a staged file.
    ///
    /// Fails with [`Error::TooLarge`] past `limit` bytes and with
    /// [`Error::Cancelled`] if `cancel` fires first. Either way the staged
    /// file is gone by the time this returns.
    pub async fn stage<R>(
        &self,
        reader: R,
        limit: u64,
        cancel: &CancellationToken,
    ) -> Result<NamedTempFile>
    where
        R: AsyncRead + Unpin,
    {
        let temp = self.temp_file("upload-")?;
        info!("Temporarily storing upload in {}", temp.path().display());

        let mut file = tokio::fs::File::from_std(temp.reopen()?);
        let mut limited = reader.take(limit + 1);

        let copied = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Upload cancelled while staging {}", temp.path().display());
                return Err(Error::Cancelled);
            }
            copied = tokio::io::copy(&mut limited, &mut file) => copied?,
        };

        if copied > limit {
            return Err(Error::TooLarge { limit });
        }

        file.flush().await?;
        file.sync_all().await?;
        debug!("Staged {} bytes in {}", copied, temp.path().display());
        Ok(temp)
    }

    /// Copies a blocking stream into a staged file.
    pub fn stage_blocking<R: Read>(&self, reader: &mut R, limit: u64) -> Result<NamedTempFile> {
        let mut temp = self.temp_file("pdb-")?;
        let copied = io::copy(&mut reader.take(limit + 1), temp.as_file_mut())?;
        if copied > limit {
            return Err(Error::TooLarge { limit });
        }
        temp.as_file_mut().sync_all()?;
        Ok(temp)
    }

    /// Moves `dir` out of the visible tree and deletes it.
    ///
    /// Returns `false` if `dir` does not exist.
    pub fn remove_dir(&self, dir: &Path) -> Result<bool> {
        let graveyard = self
            .dir
            .join(format!("removed-{}", uuid::Uuid::now_v7()));
        match fs::rename(dir, &graveyard) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(Error::StorageWriteFailed(format!(
                    "failed to remove {}: {}",
                    dir.display(),
                    e
                )));
            }
        }
        if let Err(e) = fs::remove_dir_all(&graveyard) {
            warn!(
                "Unable to delete removed directory ({}): {}",
                graveyard.display(),
                e
            );
        }
        Ok(true)
    }
}

/// Renames `from` to `to`, failing with `AlreadyExists` if `to` exists.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub fn rename_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let from_c = CString::new(from.as_os_str().as_bytes())?;
    let to_c = CString::new(to.as_os_str().as_bytes())?;

    // SAFETY: both pointers are valid NUL-terminated strings for the duration
    // of the call.
    let rc = unsafe {
        libc::renameat2(
            libc::AT_FDCWD,
            from_c.as_ptr(),
            libc::AT_FDCWD,
            to_c.as_ptr(),
            libc::RENAME_NOREPLACE,
        )
    };
    if rc == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        // filesystem or kernel without RENAME_NOREPLACE
        Some(libc::EINVAL) | Some(libc::ENOSYS) => rename_checked(from, to),
        _ => Err(err),
    }
}

/// Renames `from` to `to`, failing with `AlreadyExists` if `to` exists.
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub fn rename_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    rename_checked(from, to)
}

fn rename_checked(from: &Path, to: &Path) -> io::Result<()> {
    if fs::symlink_metadata(to).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", to.display()),
        ));
    }
    fs::rename(from, to)
}
