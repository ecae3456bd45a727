//! Error types for the package and symbol stores.

use crate::archive::ArchiveError;
use crate::pdb::PdbFormatError;
use std::path::PathBuf;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the package and symbol stores.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// The uploaded archive is not a usable package.
    #[error("invalid package archive: {0}")]
    InvalidArchive(#[from] ArchiveError),

    /// A package id or version cannot be used as a storage key.
    #[error("invalid package {field} '{value}'")]
    InvalidIdentity { field: &'static str, value: String },

    /// A symbol file name cannot be used as a storage key.
    #[error("invalid symbol file name '{0}'")]
    InvalidSymbolName(String),

    /// Upload exceeded a size limit.
    #[error("upload exceeds size limit: more than {limit} bytes")]
    TooLarge { limit: u64 },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// The target file or version already exists.
    #[error("'{file}' already exists for package {package}")]
    AlreadyExists { package: String, file: String },

    /// The package version does not exist.
    #[error("package not found: {0}")]
    PackageNotFound(String),

    /// Capability or ownership check failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    // =========================================================================
    // Symbol Errors
    // =========================================================================
    /// The symbol data could not be read as either PDB format.
    #[error("unreadable symbol file: {0}")]
    SymbolFormat(#[from] PdbFormatError),

    /// A stored symbol file does not carry the signature it is filed under.
    #[error(
        "found a PDB file for '{name}' with signature '{requested}' but it has a different signature ('{actual}')"
    )]
    SignatureMismatch {
        name: String,
        requested: String,
        actual: String,
    },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Storage initialization failed.
    #[error("failed to initialize storage at {path}: {reason}")]
    StorageInitFailed { path: PathBuf, reason: String },

    /// Placing a file into the store failed.
    #[error("failed to write to storage: {0}")]
    StorageWriteFailed(String),

    /// A metadata sidecar is missing or malformed.
    #[error("invalid package metadata at {path}: {reason}")]
    InvalidMetadata { path: PathBuf, reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// The configuration file could not be loaded.
    #[error("invalid configuration at {path}: {reason}")]
    InvalidConfig { path: PathBuf, reason: String },

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure classes exposed to callers.
///
/// Each class implies a retry policy: validation and conflict failures are the
/// client's fault, consistency failures indicate on-disk corruption, and faults
/// are unexpected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad archive, manifest or identity.
    Validation,
    /// Target already exists.
    Conflict,
    /// Unknown identity, file or symbol.
    NotFound,
    /// Ownership or capability mismatch.
    Unauthorized,
    /// Stored bytes do not match the expected signature.
    Consistency,
    /// Filesystem failure while placing content.
    StoreIo,
    /// Anything else.
    Fault,
}

impl Error {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArchive(_)
            | Self::InvalidIdentity { .. }
            | Self::InvalidSymbolName(_)
            | Self::TooLarge { .. }
            | Self::SymbolFormat(_) => ErrorKind::Validation,
            Self::AlreadyExists { .. } => ErrorKind::Conflict,
            Self::PackageNotFound(_) => ErrorKind::NotFound,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::SignatureMismatch { .. } => ErrorKind::Consistency,
            Self::StorageWriteFailed(_) => ErrorKind::StoreIo,
            Self::StorageInitFailed { .. }
            | Self::InvalidMetadata { .. }
            | Self::InvalidConfig { .. }
            | Self::Cancelled
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_) => ErrorKind::Fault,
        }
    }

    /// HTTP status a transport should answer with.
    ///
    /// Store write failures map to 409: the publish did not happen and the
    /// client should not assume otherwise.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict | ErrorKind::StoreIo => 409,
            ErrorKind::Consistency | ErrorKind::Fault => 500,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("storage task failed: {}", e))
    }
}
