//! Shared fixtures: in-memory packages, symbol files and registries.

#![allow(dead_code)]

use nuvault::{ApiKey, Registry, ServerConfig, User};
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

// =============================================================================
// Package Archives
// =============================================================================

pub const NUSPEC_NAMESPACE: &str = "http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd";

pub const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml" />
  <Default Extension="nuspec" ContentType="application/octet" />
  <Default Extension="pdb" ContentType="application/octet" />
</Types>"#;

/// A relationships part pointing at `target` as the manifest.
pub fn relationships(target: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Type="http://schemas.microsoft.com/packaging/2010/07/manifest" Target="/{}" Id="R0" />
</Relationships>"#,
        target
    )
}

/// A manifest in the given namespace.
pub fn nuspec_in(namespace: &str, id: &str, version: &str, package_types: &[&str]) -> String {
    let types = if package_types.is_empty() {
        String::new()
    } else {
        let entries: String = package_types
            .iter()
            .map(|t| format!(r#"<packageType name="{}" />"#, t))
            .collect();
        format!("<packageTypes>{}</packageTypes>", entries)
    };
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="{}">
  <metadata>
    <id>{}</id>
    <version>{}</version>
    <authors>Test</authors>
    <description>Test package</description>
    {}
  </metadata>
</package>"#,
        namespace, id, version, types
    )
}

pub fn nuspec(id: &str, version: &str, package_types: &[&str]) -> String {
    nuspec_in(NUSPEC_NAMESPACE, id, version, package_types)
}

/// A zip archive with the given parts, deflated.
pub fn archive(parts: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in parts {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A complete package with extra parts.
pub fn package_with(
    id: &str,
    version: &str,
    package_types: &[&str],
    extra: &[(&str, &[u8])],
) -> Vec<u8> {
    let manifest_name = format!("{}.nuspec", id);
    let manifest = nuspec(id, version, package_types);
    let rels = relationships(&manifest_name);

    let mut parts: Vec<(&str, &[u8])> = vec![
        ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
        ("_rels/.rels", rels.as_bytes()),
        (manifest_name.as_str(), manifest.as_bytes()),
    ];
    parts.extend_from_slice(extra);
    archive(&parts)
}

/// An ordinary package with one library.
pub fn package(id: &str, version: &str) -> Vec<u8> {
    package_with(
        id,
        version,
        &["Dependency"],
        &[("lib/net8.0/Library.dll", b"MZ not really a dll")],
    )
}

/// A symbols package carrying the given PDB members.
pub fn symbols_package(id: &str, version: &str, pdbs: &[(&str, &[u8])]) -> Vec<u8> {
    package_with(id, version, &["SymbolsPackage"], pdbs)
}

// =============================================================================
// Symbol Files
// =============================================================================

/// A minimal portable PDB whose `#Pdb` stream starts with `pdb_id`.
pub fn portable_pdb(pdb_id: [u8; 20]) -> Vec<u8> {
    let version = b"PDB v1.0\0\0\0\0";
    let mut data = Vec::new();
    data.extend_from_slice(&0x424A_5342u32.to_le_bytes());
    data.extend_from_slice(&1u16.to_le_bytes());
    data.extend_from_slice(&1u16.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&(version.len() as u32).to_le_bytes());
    data.extend_from_slice(version);
    data.extend_from_slice(&0u16.to_le_bytes());
    data.extend_from_slice(&2u16.to_le_bytes());

    // header: 32 bytes; "#~" entry: 12 bytes; "#Pdb" entry: 16 bytes
    let tables_offset = 60u32;
    let tables = [0u8; 8];
    let pdb_offset = tables_offset + tables.len() as u32;

    data.extend_from_slice(&tables_offset.to_le_bytes());
    data.extend_from_slice(&(tables.len() as u32).to_le_bytes());
    data.extend_from_slice(b"#~\0\0");
    data.extend_from_slice(&pdb_offset.to_le_bytes());
    data.extend_from_slice(&32u32.to_le_bytes());
    data.extend_from_slice(b"#Pdb\0\0\0\0");
    assert_eq!(data.len(), tables_offset as usize);

    data.extend_from_slice(&tables);
    data.extend_from_slice(&pdb_id);
    data.extend_from_slice(&[0u8; 12]);
    data
}

/// The id bytes used by [`sample_portable_pdb`].
pub const SAMPLE_PDB_ID: [u8; 20] = [
    0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF,
    0xAA, 0xBB, 0xCC, 0xDD,
];

/// Signature string of [`sample_portable_pdb`].
pub const SAMPLE_SIGNATURE: &str = "1032547698BADCFE0123456789ABCDEF1";

pub fn sample_portable_pdb() -> Vec<u8> {
    portable_pdb(SAMPLE_PDB_ID)
}

/// Page size of [`native_pdb`] files.
pub const NATIVE_PAGE_SIZE: usize = 512;

/// A minimal MSF 7.00 file.
///
/// Page `info_page` holds the info stream header with `guid`; page
/// `directory_page` lists `directory_page - 1` as the first sub-directory
/// page, so the backward walk starts at `directory_page - 2`.
pub fn native_pdb(guid: [u8; 16], info_page: usize, directory_page: usize) -> Vec<u8> {
    let page_count = directory_page + 1;
    let mut data = vec![0u8; page_count * NATIVE_PAGE_SIZE];

    let mut header = Vec::new();
    header.extend_from_slice(b"Microsoft C/C++ MSF 7.00\r\n\x1aDS\0\0\0");
    header.extend_from_slice(&(NATIVE_PAGE_SIZE as i32).to_le_bytes());
    header.extend_from_slice(&1i32.to_le_bytes());
    header.extend_from_slice(&(page_count as i32).to_le_bytes());
    header.extend_from_slice(&64i32.to_le_bytes());
    header.extend_from_slice(&0i32.to_le_bytes());
    header.extend_from_slice(&(directory_page as i32).to_le_bytes());
    data[..header.len()].copy_from_slice(&header);

    let directory = directory_page * NATIVE_PAGE_SIZE;
    data[directory..directory + 4].copy_from_slice(&((directory_page - 1) as i32).to_le_bytes());

    let info = info_page * NATIVE_PAGE_SIZE;
    data[info..info + 4].copy_from_slice(&[0x94, 0x2E, 0x31, 0x01]);
    data[info + 4..info + 12].copy_from_slice(&[0x11; 8]);
    data[info + 12..info + 28].copy_from_slice(&guid);
    data
}

// =============================================================================
// Registries
// =============================================================================

pub const ALICE_KEY: &str = "alice-key";
pub const BOB_KEY: &str = "bob-key";
pub const EXPIRED_KEY: &str = "expired-key";
pub const READ_ONLY_KEY: &str = "read-only-key";
pub const ORPHAN_KEY: &str = "orphan-key";

fn key(owner: &str, can_publish: bool, can_delete: bool, expiry: &str) -> ApiKey {
    ApiKey {
        name: format!("{} key", owner),
        owner: owner.to_string(),
        can_publish,
        can_delete,
        created: None,
        expiry: expiry.parse().unwrap(),
    }
}

fn user(name: &str) -> User {
    User {
        name: name.to_string(),
        can_publish: true,
        can_delete: true,
        created: None,
    }
}

/// Configuration with users `alice` and `bob` and a key per case.
pub fn test_config(data_dir: &Path, allow_lifecycle: bool) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.data_directory = data_dir.to_path_buf();
    config.nuget.allow_delete = allow_lifecycle;
    config.nuget.allow_unlist = allow_lifecycle;
    config.nuget.allow_relist = allow_lifecycle;

    let far = "2100-01-01T00:00:00Z";
    let keys = &mut config.nuget.api_keys;
    keys.insert(ALICE_KEY.into(), key("alice", true, true, far));
    keys.insert(BOB_KEY.into(), key("bob", true, true, far));
    keys.insert(
        EXPIRED_KEY.into(),
        key("alice", true, true, "2000-01-01T00:00:00Z"),
    );
    keys.insert(READ_ONLY_KEY.into(), key("alice", false, false, far));
    keys.insert(ORPHAN_KEY.into(), key("mallory", true, true, far));

    config.nuget.users.insert("alice".into(), user("Alice"));
    config.nuget.users.insert("bob".into(), user("Bob"));
    config
}

pub fn test_registry(data_dir: &Path, allow_lifecycle: bool) -> Registry {
    Registry::from_config(test_config(data_dir, allow_lifecycle)).unwrap()
}
