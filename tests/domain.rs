use kerchunk_resolver::domain::{CatalogVersion, ChunkKey};

#[test]
fn keys_deserialize_with_validation() {
    let key: ChunkKey = serde_json::from_str("\"v/0.0\"").unwrap();
    assert_eq!(key.segments().collect::<Vec<_>>(), ["v", "0.0"]);
    assert!(serde_json::from_str::<ChunkKey>("\"../escape\"").is_err());
    assert!(serde_json::from_str::<ChunkKey>("\"/root/x\"").is_err());
}

#[test]
fn keys_serialize_as_strings() {
    let keys: Vec<ChunkKey> = vec!["a/.zarray".parse().unwrap(), "a/0".parse().unwrap()];
    assert_eq!(
        serde_json::to_string(&keys).unwrap(),
        r#"["a/.zarray","a/0"]"#
    );
    assert_eq!(serde_json::to_string(&CatalogVersion::V1).unwrap(), r#""v1""#);
}
