use std::fs;

use assert_matches::assert_matches;
use bytes::Bytes;
use serde_json::json;
use tempfile::tempdir;

use kerchunk_resolver::backends::BackendRegistry;
use kerchunk_resolver::backends::memory::MemoryBackend;
use kerchunk_resolver::byte_range::ByteRange;
use kerchunk_resolver::catalog::{Catalog, LoadOptions};
use kerchunk_resolver::config::ResolvedConfig;
use kerchunk_resolver::domain::ChunkKey;
use kerchunk_resolver::error::ResolverError;
use kerchunk_resolver::fetcher::{ByteFetcher, RetryPolicy};
use kerchunk_resolver::store::ReferenceStore;

fn key(value: &str) -> ChunkKey {
    value.parse().unwrap()
}

fn memory_store(backend: &MemoryBackend) -> ReferenceStore {
    backend.insert("bucket/run.nc", Bytes::from((0u8..64).collect::<Vec<_>>()));
    let catalog = Catalog::from_value(
        json!({
            "version": 1,
            "templates": {"src": "mem://bucket/run.nc"},
            "refs": {
                ".zattrs": {"title": "run"},
                "t/0": ["{{src}}", 8, 8],
                "t/1": ["{{src}}", 16, 8],
                "t/2": ["{{src}}"],
                "t/3": "base64:aGVsbG8="
            }
        }),
        &LoadOptions::default(),
    )
    .unwrap();
    let mut registry = BackendRegistry::new();
    backend.register(&mut registry, "mem");
    ReferenceStore::new(catalog, ByteFetcher::new(registry, RetryPolicy::NONE))
}

#[test]
fn get_returns_chunk_bytes() {
    let backend = MemoryBackend::new();
    let store = memory_store(&backend);

    assert_eq!(
        store.get(&key("t/0")).unwrap(),
        Some(Bytes::from((8u8..16).collect::<Vec<_>>()))
    );
    assert_eq!(store.get(&key("t/2")).unwrap().map(|data| data.len()), Some(64));
    assert_eq!(
        store.get(&key("t/3")).unwrap(),
        Some(Bytes::from_static(b"hello"))
    );
    let attrs = store.get(&key(".zattrs")).unwrap().unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&attrs).unwrap();
    assert_eq!(parsed, json!({"title": "run"}));
}

#[test]
fn unknown_keys_are_absent() {
    let backend = MemoryBackend::new();
    let store = memory_store(&backend);

    assert!(store.contains(&key("t/1")));
    assert!(!store.contains(&key("t/9")));
    assert_eq!(store.get(&key("t/9")).unwrap(), None);
    assert_eq!(store.get_partial(&key("t/9"), ByteRange::FULL).unwrap(), None);
    assert_eq!(backend.read_count(), 0);
}

#[test]
fn partial_reads_are_relative_to_the_chunk() {
    let backend = MemoryBackend::new();
    let store = memory_store(&backend);

    assert_eq!(
        store.get_partial(&key("t/1"), ByteRange::new(2, Some(3))).unwrap(),
        Some(Bytes::from_static(&[18, 19, 20]))
    );
    assert_eq!(
        store.get_partial(&key("t/1"), ByteRange::Suffix { length: 2 }).unwrap(),
        Some(Bytes::from_static(&[22, 23]))
    );
    assert_eq!(
        store.get_partial(&key("t/3"), ByteRange::new(1, Some(3))).unwrap(),
        Some(Bytes::from_static(b"ell"))
    );
    assert_matches!(
        store.get_partial(&key("t/1"), ByteRange::new(6, Some(4))),
        Err(ResolverError::InvalidByteRange { available: 8, .. })
    );
}

#[test]
fn get_many_preserves_order() {
    let backend = MemoryBackend::new();
    let store = memory_store(&backend).with_workers(3);
    let keys = vec![key("t/3"), key("t/9"), key("t/0"), key("t/1")];

    let results = store.get_many(&keys).unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(
        results[0].as_ref().unwrap().as_deref(),
        Some(&b"hello"[..])
    );
    assert_matches!(results[1], Ok(None));
    assert_eq!(results[2].as_ref().unwrap().as_ref().map(|b| b[0]), Some(8));
    assert_eq!(results[3].as_ref().unwrap().as_ref().map(|b| b[0]), Some(16));
}

#[test]
fn cache_serves_repeated_reads() {
    let backend = MemoryBackend::new();
    let store = memory_store(&backend).with_cache(4);

    let first = store.get(&key("t/0")).unwrap();
    let second = store.get(&key("t/0")).unwrap();
    assert_eq!(first, second);
    assert_eq!(backend.read_count(), 1);

    store.close();
    assert_eq!(store.fetcher().handle_count(), 0);
    assert_eq!(store.get(&key("t/0")).unwrap(), first);
    assert_eq!(backend.read_count(), 2);
}

#[test]
fn open_reads_local_catalogs_relative_to_their_directory() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("chunks.bin"), b"0123456789").unwrap();
    fs::write(
        dir.path().join("refs.json"),
        serde_json::to_vec(&json!({
            "version": 1,
            "refs": {".zgroup": "{}", "x/0": ["chunks.bin", 4, 3]}
        }))
        .unwrap(),
    )
    .unwrap();

    let uri = dir.path().join("refs.json").display().to_string();
    let store = ReferenceStore::open(&uri, &LoadOptions::default(), &ResolvedConfig::default())
        .unwrap();
    assert_eq!(store.keys().count(), 2);
    assert_eq!(
        store.get(&key("x/0")).unwrap(),
        Some(Bytes::from_static(b"456"))
    );
}

#[test]
fn open_reports_missing_catalogs() {
    let dir = tempdir().unwrap();
    let uri = dir.path().join("absent.json").display().to_string();
    assert_matches!(
        ReferenceStore::open(&uri, &LoadOptions::default(), &ResolvedConfig::default()),
        Err(ResolverError::NotFound(_))
    );
}
