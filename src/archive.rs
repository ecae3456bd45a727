//! # Package Archive Reader
//!
//! Reads package identity and type from an uploaded OPC container.
//!
//! ## Container Model
//!
//! A package is a zip file laid out per the Open Packaging Convention:
//!
//! ```text
//! [Content_Types].xml        required, marks the zip as a package
//! _rels/.rels                relationships; one of type .../manifest
//! Foo.Bar.nuspec             the manifest part named by that relationship
//! lib/...                    payload
//! ```
//!
//! The manifest is located through the relationship, never by guessing a file
//! name. Its root element is `package` in a namespace that changes with each
//! schema revision (`.../packaging/2010/07/nuspec.xsd`, `.../2013/05/...`), so
//! the namespace is matched by prefix and suffix rather than compared exactly.
//!
//! ## Package Types
//!
//! | Mode     | Accepted `packageType/@name`                   |
//! |----------|------------------------------------------------|
//! | ordinary | none, `Dependency`, `DotnetTool`, `Template`   |
//! | symbols  | `SymbolsPackage` only (at least one required)  |
//!
//! Reading is a pure parse over the provided bytes; nothing is written.

use crate::constants::{
    CONTENT_TYPES_PART, MANIFEST_NAMESPACE_PREFIX, MANIFEST_NAMESPACE_SUFFIX,
    MANIFEST_RELATIONSHIP_TYPE, MAX_MANIFEST_SIZE, MAX_RELATIONSHIPS_SIZE, ORDINARY_PACKAGE_TYPES,
    PACKAGE_TYPE_SYMBOLS, RELATIONSHIPS_PART,
};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::{NsReader, Reader};
use std::io::{Cursor, Read, Seek};
use tracing::debug;
use zip::ZipArchive;

/// Reasons an upload is rejected by the archive reader.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchiveError {
    /// Not a zip file, or no content types part.
    #[error("not a package: {0}")]
    NotAPackage(String),

    /// No relationship points at an existing manifest part.
    #[error("no manifest relationship found")]
    NoManifestRelationship,

    /// The manifest root is not a `package` element in a known schema namespace.
    #[error("unsupported manifest schema: {0}")]
    UnsupportedManifestSchema(String),

    /// The manifest lacks a required field.
    #[error("manifest is missing its {0}")]
    IncompleteManifest(&'static str),

    /// A declared package type is not allowed for this kind of publish.
    #[error("unsupported package type(s): {0}")]
    UnsupportedPackageType(String),

    /// A part could not be read or parsed.
    #[error("malformed part '{part}': {reason}")]
    MalformedPart { part: String, reason: String },

    /// A part is larger than its limit.
    #[error("part '{part}' exceeds {limit} bytes")]
    PartTooLarge { part: String, limit: u64 },
}

/// Identity and raw manifest read from a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    /// Package id as written in the manifest.
    pub id: String,
    /// Package version as written in the manifest (build metadata included).
    pub version: String,
    /// Declared package types, in document order.
    pub package_types: Vec<String>,
    /// Name of the manifest part inside the archive.
    pub part_name: String,
    /// The manifest document, byte for byte.
    pub xml: Vec<u8>,
}

/// Reads the manifest of an in-memory package.
pub fn read_manifest_from_bytes(
    bytes: &[u8],
    expect_symbols_package: bool,
) -> Result<PackageManifest, ArchiveError> {
    read_manifest(Cursor::new(bytes), expect_symbols_package)
}

/// Reads the manifest of a package.
///
/// With `expect_symbols_package` set, only symbols packages are accepted;
/// otherwise only ordinary packages are.
pub fn read_manifest<R: Read + Seek>(
    reader: R,
    expect_symbols_package: bool,
) -> Result<PackageManifest, ArchiveError> {
    let mut archive =
        ZipArchive::new(reader).map_err(|e| ArchiveError::NotAPackage(e.to_string()))?;

    if find_part(&archive, CONTENT_TYPES_PART).is_none() {
        return Err(ArchiveError::NotAPackage(format!(
            "missing {}",
            CONTENT_TYPES_PART
        )));
    }

    let rels_name =
        find_part(&archive, RELATIONSHIPS_PART).ok_or(ArchiveError::NoManifestRelationship)?;
    let rels = read_part(&mut archive, &rels_name, MAX_RELATIONSHIPS_SIZE)?;
    let target = manifest_target(&rels).ok_or(ArchiveError::NoManifestRelationship)?;
    let part_name = find_part(&archive, &target).ok_or(ArchiveError::NoManifestRelationship)?;

    let xml = read_part(&mut archive, &part_name, MAX_MANIFEST_SIZE)?;
    let fields = parse_manifest(&xml, &part_name)?;
    check_package_types(&fields.package_types, expect_symbols_package)?;

    debug!(
        "Read manifest {} ({} {})",
        part_name, fields.id, fields.version
    );

    Ok(PackageManifest {
        id: fields.id,
        version: fields.version,
        package_types: fields.package_types,
        part_name,
        xml,
    })
}

/// Checks declared package types against the publish mode.
pub fn check_package_types(
    package_types: &[String],
    expect_symbols_package: bool,
) -> Result<(), ArchiveError> {
    let is_symbols = |t: &String| t.eq_ignore_ascii_case(PACKAGE_TYPE_SYMBOLS);
    let is_ordinary = |t: &String| ORDINARY_PACKAGE_TYPES.iter().any(|o| t.eq_ignore_ascii_case(o));

    let accepted = if expect_symbols_package {
        !package_types.is_empty() && package_types.iter().all(is_symbols)
    } else {
        package_types.iter().all(is_ordinary)
    };

    if accepted {
        Ok(())
    } else if package_types.is_empty() {
        Err(ArchiveError::UnsupportedPackageType("(none)".to_string()))
    } else {
        Err(ArchiveError::UnsupportedPackageType(package_types.join(", ")))
    }
}

// =============================================================================
// Parts
// =============================================================================

/// Finds a part by name. OPC part names compare case-insensitively.
fn find_part<R: Read + Seek>(archive: &ZipArchive<R>, name: &str) -> Option<String> {
    let name = name.trim_start_matches('/');
    archive
        .file_names()
        .find(|candidate| *candidate == name)
        .or_else(|| {
            archive
                .file_names()
                .find(|candidate| candidate.eq_ignore_ascii_case(name))
        })
        .map(str::to_string)
}

fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    limit: u64,
) -> Result<Vec<u8>, ArchiveError> {
    let malformed = |reason: String| ArchiveError::MalformedPart {
        part: name.to_string(),
        reason,
    };
    let part = archive.by_name(name).map_err(|e| malformed(e.to_string()))?;
    let mut data = Vec::new();
    part.take(limit + 1)
        .read_to_end(&mut data)
        .map_err(|e| malformed(e.to_string()))?;
    if data.len() as u64 > limit {
        return Err(ArchiveError::PartTooLarge {
            part: name.to_string(),
            limit,
        });
    }
    Ok(data)
}

// =============================================================================
// Relationships
// =============================================================================

/// Returns the manifest part named by the relationships document.
fn manifest_target(rels: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(rels);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let rel_type = attribute(e, b"Type");
                if rel_type.as_deref() == Some(MANIFEST_RELATIONSHIP_TYPE)
                    && let Some(target) = attribute(e, b"Target")
                {
                    let target = target.trim_start_matches('/').to_string();
                    if !target.is_empty() {
                        return Some(target);
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

fn attribute(element: &BytesStart<'_>, local_name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local_name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

// =============================================================================
// Manifest
// =============================================================================

struct ManifestFields {
    id: String,
    version: String,
    package_types: Vec<String>,
}

fn parse_manifest(xml: &[u8], part: &str) -> Result<ManifestFields, ArchiveError> {
    const ID_PATH: [&[u8]; 3] = [b"package", b"metadata", b"id"];
    const VERSION_PATH: [&[u8]; 3] = [b"package", b"metadata", b"version"];
    const TYPES_PATH: [&[u8]; 3] = [b"package", b"metadata", b"packageTypes"];

    let malformed = |e: quick_xml::Error| ArchiveError::MalformedPart {
        part: part.to_string(),
        reason: e.to_string(),
    };

    let mut reader = NsReader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut id = None;
    let mut version = None;
    let mut package_types = Vec::new();

    loop {
        let (ns, event) = reader.read_resolved_event_into(&mut buf).map_err(malformed)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let local = e.local_name();
                if path.is_empty() {
                    check_root(&ns, local.as_ref())?;
                } else if local.as_ref() == b"packageType"
                    && path_is(&path, &TYPES_PATH)
                    && let Some(name) = attribute(e, b"name")
                {
                    package_types.push(name.trim().to_string());
                }
                if matches!(event, Event::Start(_)) {
                    path.push(local.as_ref().to_vec());
                }
            }
            Event::Text(ref t) => {
                let text = t.unescape().map_err(malformed)?;
                let text = text.trim();
                if path_is(&path, &ID_PATH) {
                    id = Some(text.to_string());
                } else if path_is(&path, &VERSION_PATH) {
                    version = Some(text.to_string());
                }
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let id = id
        .filter(|v| !v.is_empty())
        .ok_or(ArchiveError::IncompleteManifest("id"))?;
    let version = version
        .filter(|v| !v.is_empty())
        .ok_or(ArchiveError::IncompleteManifest("version"))?;

    Ok(ManifestFields {
        id,
        version,
        package_types,
    })
}

fn check_root(ns: &ResolveResult<'_>, local_name: &[u8]) -> Result<(), ArchiveError> {
    let uri = match ns {
        ResolveResult::Bound(Namespace(uri)) => String::from_utf8_lossy(uri).into_owned(),
        _ => String::new(),
    };
    if local_name != b"package" || !is_manifest_namespace(&uri) {
        return Err(ArchiveError::UnsupportedManifestSchema(format!(
            "<{}> in namespace '{}'",
            String::from_utf8_lossy(local_name),
            uri
        )));
    }
    Ok(())
}

/// Returns `true` for any revision of the manifest schema namespace.
pub fn is_manifest_namespace(uri: &str) -> bool {
    uri.len() > MANIFEST_NAMESPACE_PREFIX.len() + MANIFEST_NAMESPACE_SUFFIX.len()
        && uri.starts_with(MANIFEST_NAMESPACE_PREFIX)
        && uri.ends_with(MANIFEST_NAMESPACE_SUFFIX)
}

fn path_is(path: &[Vec<u8>], expected: &[&[u8]]) -> bool {
    path.len() == expected.len() && path.iter().zip(expected).all(|(a, b)| a.as_slice() == *b)
}
