use std::fs;
use std::io::Write;

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::json;
use tempfile::tempdir;

use kerchunk_resolver::catalog::{Catalog, LoadOptions};
use kerchunk_resolver::domain::CatalogVersion;
use kerchunk_resolver::error::ResolverError;
use kerchunk_resolver::resolver::{self, ResolvedLocation};

#[test]
fn gzipped_catalog_files_resolve_relative_paths() {
    let dir = tempdir().unwrap();
    let document = json!({
        "version": 1,
        "refs": {".zgroup": "{}", "a/0": ["parts/a.bin", 0, 10]}
    });
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&serde_json::to_vec(&document).unwrap())
        .unwrap();
    let path = dir.path().join("refs.json.gz");
    fs::write(&path, encoder.finish().unwrap()).unwrap();

    let catalog = Catalog::from_path(&path, &LoadOptions::default()).unwrap();
    assert_eq!(catalog.version(), CatalogVersion::V1);
    assert_eq!(catalog.base_dir(), dir.path().to_str());

    let location = resolver::resolve(&catalog, &"a/0".parse().unwrap()).unwrap();
    assert_matches!(
        location,
        ResolvedLocation::Remote { uri, .. } if uri == dir.path().join("parts/a.bin").display().to_string()
    );
}

#[test]
fn selecting_from_a_multi_catalog_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bundle.json");
    fs::write(
        &path,
        serde_json::to_vec(&json!({
            "surface": {"version": 1, "refs": {".zgroup": "{}", "t/0": ["s3://b/s.nc", 0, 4]}},
            "upper": {".zgroup": "{}", "u/0": ["s3://b/u.nc", 8, 4]}
        }))
        .unwrap(),
    )
    .unwrap();

    assert_matches!(
        Catalog::from_path(&path, &LoadOptions::default()),
        Err(ResolverError::AmbiguousCatalog { candidates }) if candidates == ["surface", "upper"]
    );

    let upper = Catalog::from_path(
        &path,
        &LoadOptions {
            select: Some("upper".to_string()),
            ..LoadOptions::default()
        },
    )
    .unwrap();
    assert_eq!(upper.version(), CatalogVersion::V0);
    let keys: Vec<String> = upper.keys().map(ToString::to_string).collect();
    assert_eq!(keys, [".zgroup", "u/0"]);
}
