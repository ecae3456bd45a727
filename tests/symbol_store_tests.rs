//! Tests for the symbol store.
//!
//! Validates sharded placement, signature-keyed retrieval, consistency
//! checking on read, and symbol server request parsing.

mod common;

use common::*;
use nuvault::{Error, ErrorKind, SymbolRequest, SymbolStore};
use std::io::Read;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

fn store(temp: &TempDir) -> SymbolStore {
    SymbolStore::with_path(temp.path().join("symbols"), temp.path().join("temp")).unwrap()
}

// =============================================================================
// SymbolStore Creation Tests
// =============================================================================

#[test]
fn test_symbol_store_creation() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);

    assert!(temp.path().join("symbols").is_dir());
    assert!(temp.path().join("temp").is_dir());
    assert_eq!(store.base_dir(), temp.path().join("symbols"));
}

// =============================================================================
// Put Tests
// =============================================================================

#[test]
fn test_put_places_file_under_shard_and_signature() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    let pdb = sample_portable_pdb();

    let signature = store.put_blocking("Foo.Bar", &mut pdb.as_slice()).unwrap();

    assert_eq!(signature.to_string(), SAMPLE_SIGNATURE);
    let expected = temp
        .path()
        .join("symbols")
        .join("F")
        .join("Foo")
        .join("Bar")
        .join(SAMPLE_SIGNATURE)
        .join("Foo.Bar.pdb");
    assert_eq!(std::fs::read(&expected).unwrap(), pdb);
    assert!(store.contains("Foo.Bar", SAMPLE_SIGNATURE));
}

#[test]
fn test_put_without_dot_uses_single_segment() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);

    store
        .put_blocking("plain", &mut sample_portable_pdb().as_slice())
        .unwrap();

    assert!(
        temp.path()
            .join("symbols/p/plain")
            .join(SAMPLE_SIGNATURE)
            .join("plain.pdb")
            .is_file()
    );
}

#[test]
fn test_put_twice_overwrites_identically() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    let pdb = sample_portable_pdb();

    store.put_blocking("Foo", &mut pdb.as_slice()).unwrap();
    store.put_blocking("Foo", &mut pdb.as_slice()).unwrap();

    let dir = store.symbol_directory("Foo").unwrap().join(SAMPLE_SIGNATURE);
    assert_eq!(std::fs::read_dir(dir).unwrap().count(), 1, "no temp files left");
}

#[test]
fn test_put_rejects_unreadable_symbol_data() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);

    let err = store
        .put_blocking("Foo", &mut &b"not a pdb at all"[..])
        .unwrap_err();

    assert!(matches!(err, Error::SymbolFormat(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(std::fs::read_dir(temp.path().join("temp")).unwrap().count(), 0);
}

#[test]
fn test_put_rejects_unsafe_names() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);

    for name in ["..", "../evil", ".hidden", ""] {
        let err = store
            .put_blocking(name, &mut sample_portable_pdb().as_slice())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSymbolName(_)), "{:?}", name);
    }
}

#[tokio::test]
async fn test_async_put_native_pdb() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    let guid = [0x5A; 16];
    let pdb = native_pdb(guid, 2, 4);

    let signature = store.put("Native", pdb.as_slice()).await.unwrap();

    assert_eq!(signature.to_string(), format!("{}1", "5A".repeat(16)));
}

// =============================================================================
// Get Tests
// =============================================================================

#[tokio::test]
async fn test_get_returns_stored_bytes() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    let pdb = sample_portable_pdb();
    store.put_blocking("Foo.Bar", &mut pdb.as_slice()).unwrap();

    let mut file = store
        .get("Foo.Bar", SAMPLE_SIGNATURE)
        .await
        .unwrap()
        .expect("symbol should be found");
    let mut data = Vec::new();
    file.read_to_end(&mut data).await.unwrap();

    assert_eq!(data, pdb);
}

#[test]
fn test_get_unknown_is_none() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);

    assert!(store.get_blocking("Foo", SAMPLE_SIGNATURE).unwrap().is_none());
    assert!(store.get_blocking("..", SAMPLE_SIGNATURE).unwrap().is_none());
    assert!(store.get_blocking("Foo", "../../x").unwrap().is_none());
}

#[test]
fn test_get_detects_corrupted_file() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    store
        .put_blocking("Foo", &mut sample_portable_pdb().as_slice())
        .unwrap();

    // corrupt the stored file so it carries a different signature
    let path = store.symbol_path("Foo", SAMPLE_SIGNATURE).unwrap();
    std::fs::write(&path, portable_pdb([0x42; 20])).unwrap();

    let err = store.get_blocking("Foo", SAMPLE_SIGNATURE).unwrap_err();
    match &err {
        Error::SignatureMismatch {
            requested, actual, ..
        } => {
            assert_eq!(requested, SAMPLE_SIGNATURE);
            assert_eq!(actual, &format!("{}1", "42".repeat(16)));
        }
        other => panic!("expected signature mismatch, got {:?}", other),
    }
    assert_eq!(err.kind(), ErrorKind::Consistency);
}

#[test]
fn test_get_detects_unreadable_file() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    store
        .put_blocking("Foo", &mut sample_portable_pdb().as_slice())
        .unwrap();

    let path = store.symbol_path("Foo", SAMPLE_SIGNATURE).unwrap();
    std::fs::write(&path, b"garbage").unwrap();

    let err = store.get_blocking("Foo", SAMPLE_SIGNATURE).unwrap_err();
    assert!(matches!(err, Error::SignatureMismatch { ref actual, .. } if actual == "<unreadable>"));
}

#[test]
fn test_get_blocking_reads_file() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    let pdb = native_pdb([7; 16], 1, 5);
    let signature = store.put_blocking("Native.Lib", &mut pdb.as_slice()).unwrap();

    let mut file = store
        .get_blocking("Native.Lib", &signature.to_string())
        .unwrap()
        .unwrap();
    let mut data = Vec::new();
    file.read_to_end(&mut data).unwrap();
    assert_eq!(data, pdb);
}

// =============================================================================
// Request Parsing Tests
// =============================================================================

#[test]
fn test_request_parsing_is_case_insensitive_on_extensions() {
    assert_eq!(
        SymbolRequest::parse("/Foo.PDB/ABC1/Foo.Pdb"),
        Some(SymbolRequest::Symbol {
            name: "Foo".to_string(),
            signature: "ABC1".to_string(),
        })
    );
    assert_eq!(
        SymbolRequest::parse("INDEX2.TXT"),
        Some(SymbolRequest::TwoTierIndex)
    );
}

#[test]
fn test_request_parsing_rejects_other_shapes() {
    assert_eq!(SymbolRequest::parse("Foo.dll/ABC1/Foo.dll"), None);
    assert_eq!(SymbolRequest::parse("Foo.pdb/ABC1/Foo.pdb/extra"), None);
    assert_eq!(SymbolRequest::parse(""), None);
}
