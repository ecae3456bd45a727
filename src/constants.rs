//! # Registry Constants
//!
//! File extensions, part names, schema identifiers and resource limits for the
//! package and symbol stores. These constants are the **single source of truth**
//! for the on-disk layout and for every size bound applied to uploaded content.
//!
//! ## On-Disk Layout
//!
//! ```text
//! data/
//! ├── packages/{id}/{version}/
//! │   ├── {id}.{version}.nupkg
//! │   ├── {id}.{version}.snupkg      (after a symbols publish)
//! │   ├── {id}.nuspec
//! │   ├── .metadata
//! │   └── .unlisted                  (marker; presence = unlisted)
//! ├── symbols/{shard...}/{signature}/{name}.pdb
//! └── temp/
//!     ├── publish/                   (staged uploads and versions)
//!     └── symbols/                   (staged PDB files)
//! ```
//!
//! ## Cross-References
//!
//! - [`crate::packages`]: Uses the layout names and upload limits
//! - [`crate::archive`]: Uses the OPC part names and manifest schema pattern
//! - [`crate::symbols`]: Uses the symbol layout and PDB size limit

// =============================================================================
// Size Limits
// =============================================================================
//
// Uploads arrive from authenticated but otherwise untrusted clients. Every
// stream that is staged or decompressed is bounded by one of these limits.
// =============================================================================

/// Maximum size of an uploaded package or symbols archive (250 MiB).
///
/// **Security**: Prevents disk exhaustion in the staging directory. Matches
/// the limit enforced by the public gallery.
pub const MAX_PACKAGE_SIZE: u64 = 250 * 1024 * 1024;

/// Maximum size of a package manifest (1 MiB).
///
/// **Security**: Prevents memory exhaustion while parsing the manifest XML.
/// Real manifests are typically a few KiB.
pub const MAX_MANIFEST_SIZE: u64 = 1024 * 1024;

/// Maximum size of the OPC relationships part (1 MiB).
pub const MAX_RELATIONSHIPS_SIZE: u64 = 1024 * 1024;

/// Maximum size of a single PDB member extracted from a symbols package (512 MiB).
///
/// **Attack Vector**: Compression bombs (small compressed, huge uncompressed).
pub const MAX_SYMBOL_FILE_SIZE: u64 = 512 * 1024 * 1024;

// =============================================================================
// File Extensions
// =============================================================================

/// The extension used by package files.
pub const PACKAGE_EXTENSION: &str = ".nupkg";

/// The extension used by symbols package files.
pub const SYMBOLS_EXTENSION: &str = ".snupkg";

/// The extension used by manifest files.
pub const MANIFEST_EXTENSION: &str = ".nuspec";

/// The extension used by debug-symbol files.
pub const SYMBOL_FILE_EXTENSION: &str = ".pdb";

/// The extension used by compressed debug-symbol files (never served).
pub const COMPRESSED_SYMBOL_FILE_EXTENSION: &str = ".pd_";

// =============================================================================
// Content Types
// =============================================================================

/// Content type for package and symbols package downloads.
pub const PACKAGE_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type for manifest downloads.
pub const MANIFEST_CONTENT_TYPE: &str = "application/xml";

// =============================================================================
// Storage Paths
// =============================================================================
//
// All paths are relative to the configured data directory.
// =============================================================================

/// Default data directory (relative to the working directory).
pub const DEFAULT_DATA_DIR: &str = "data";

/// Subdirectory holding one folder per package id.
pub const PACKAGES_DIR: &str = "packages";

/// Subdirectory holding extracted symbol files.
pub const SYMBOLS_DIR: &str = "symbols";

/// Subdirectory for process-private staging.
pub const TEMP_DIR: &str = "temp";

/// Staging area for package uploads (below [`TEMP_DIR`]).
pub const PUBLISH_TEMP_DIR: &str = "publish";

/// Staging area for symbol files (below [`TEMP_DIR`]).
pub const SYMBOLS_TEMP_DIR: &str = "symbols";

/// Name of the metadata sidecar inside a version directory.
pub const METADATA_FILE: &str = ".metadata";

/// Name of the unlisted marker inside a version directory.
pub const UNLISTED_MARKER: &str = ".unlisted";

// =============================================================================
// OPC Container
// =============================================================================
//
// Packages are Open Packaging Convention containers: a zip file with a content
// types part and a relationships part that points at the manifest.
// =============================================================================

/// The content types part required at the top level of every package.
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

/// The package-level relationships part.
pub const RELATIONSHIPS_PART: &str = "_rels/.rels";

/// Relationship type whose target is the package manifest.
pub const MANIFEST_RELATIONSHIP_TYPE: &str = "http://schemas.microsoft.com/packaging/2010/07/manifest";

/// Prefix shared by every revision of the manifest schema namespace.
///
/// Known revisions: `2010/07`, `2011/08`, `2012/06`, `2013/01`, `2013/05`.
pub const MANIFEST_NAMESPACE_PREFIX: &str = "http://schemas.microsoft.com/packaging/";

/// Suffix shared by every revision of the manifest schema namespace.
pub const MANIFEST_NAMESPACE_SUFFIX: &str = "/nuspec.xsd";

// =============================================================================
// Package Types
// =============================================================================

/// Package type of an ordinary library package (the implicit default).
pub const PACKAGE_TYPE_DEPENDENCY: &str = "Dependency";

/// Package type of a .NET tool package.
pub const PACKAGE_TYPE_TOOL: &str = "DotnetTool";

/// Package type of a template package.
pub const PACKAGE_TYPE_TEMPLATE: &str = "Template";

/// Package type of a symbols package.
pub const PACKAGE_TYPE_SYMBOLS: &str = "SymbolsPackage";

/// Package types accepted for ordinary publishes.
pub const ORDINARY_PACKAGE_TYPES: [&str; 3] =
    [PACKAGE_TYPE_DEPENDENCY, PACKAGE_TYPE_TOOL, PACKAGE_TYPE_TEMPLATE];

// =============================================================================
// Access Control
// =============================================================================

/// Request header carrying the API key.
pub const API_KEY_HEADER: &str = "X-NuGet-ApiKey";

// =============================================================================
// Path Segment Validation
// =============================================================================

/// Characters that are never allowed in a path segment derived from client input.
///
/// **Security**: Covers separators on every supported platform plus the
/// characters Windows reserves, so ids that are valid here are portable.
pub const ILLEGAL_SEGMENT_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Returns `true` if `segment` can be used verbatim as one path segment.
///
/// Rejects empty strings, `.` and `..`, control characters and anything in
/// [`ILLEGAL_SEGMENT_CHARS`].
#[inline]
#[must_use]
pub fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment
            .chars()
            .any(|c| c.is_control() || ILLEGAL_SEGMENT_CHARS.contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_segments() {
        assert!(is_safe_segment("newtonsoft.json"));
        assert!(is_safe_segment("1.0.0-beta.1"));
        assert!(!is_safe_segment(""));
        assert!(!is_safe_segment(".."));
        assert!(!is_safe_segment("a/b"));
        assert!(!is_safe_segment("a\\b"));
        assert!(!is_safe_segment("c:"));
        assert!(!is_safe_segment("tab\there"));
    }
}
