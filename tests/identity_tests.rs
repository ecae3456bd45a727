//! Tests for identity normalization.
//!
//! Validates case folding, build metadata handling, idempotence, and
//! rejection of path-unsafe ids and versions.

use nuvault::{Error, PackageIdentity, normalize_id, normalize_version};

// =============================================================================
// Id Normalization Tests
// =============================================================================

#[test]
fn test_normalize_id_is_idempotent() {
    for raw in ["Foo.Bar", "NEWTONSOFT.JSON", "already.lower", "Ünïcode.Pkg"] {
        let once = normalize_id(raw).unwrap();
        assert_eq!(normalize_id(&once).as_deref(), Some(once.as_str()), "{}", raw);
    }
}

#[test]
fn test_normalize_id_rejects_unsafe_ids() {
    for raw in ["", ".", "..", "a/b", "a\\b", "evil:stream", "star*", "line\nbreak"] {
        assert_eq!(normalize_id(raw), None, "{:?} should be rejected", raw);
    }
}

// =============================================================================
// Version Normalization Tests
// =============================================================================

#[test]
fn test_normalize_version_is_idempotent() {
    for raw in ["1.0.0", "1.0.0-Beta.2", "2.1.0+Build.7", "3.0.0-RC1+sha.DEADBEEF"] {
        let once = normalize_version(raw).unwrap();
        assert_eq!(
            normalize_version(&once).as_deref(),
            Some(once.as_str()),
            "{}",
            raw
        );
    }
}

#[test]
fn test_normalize_version_truncates_at_first_plus() {
    assert_eq!(normalize_version("1.0.0+a+b").as_deref(), Some("1.0.0"));
    assert_eq!(normalize_version("1.0.0-RC+x").as_deref(), Some("1.0.0-rc"));
}

#[test]
fn test_normalize_version_rejects_unsafe_versions() {
    assert_eq!(normalize_version("1.0/../../x"), None);
    assert_eq!(normalize_version(".."), None);
    assert_eq!(normalize_version("..+meta"), None);
    assert_eq!(normalize_version(""), None);
}

// =============================================================================
// PackageIdentity Tests
// =============================================================================

#[test]
fn test_identity_equal_across_spellings() {
    let a = PackageIdentity::new("Foo.Bar", "1.0.0+build.1").unwrap();
    let b = PackageIdentity::new("foo.bar", "1.0.0").unwrap();
    assert_eq!(a, b);
    assert_eq!(a.to_string(), "foo.bar 1.0.0");
}

#[test]
fn test_identity_new_names_the_bad_field() {
    let err = PackageIdentity::new("ok", "bad/version").unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidIdentity {
            field: "version",
            ..
        }
    ));

    let err = PackageIdentity::new("bad/id", "1.0.0").unwrap_err();
    assert!(matches!(err, Error::InvalidIdentity { field: "id", .. }));
    assert_eq!(err.status_code(), 400);
}

#[test]
fn test_identity_lookup_returns_none_for_unsafe_input() {
    assert!(PackageIdentity::lookup("..", "1.0.0").is_none());
    assert!(PackageIdentity::lookup("Foo", "1.0.0").is_some());
}
