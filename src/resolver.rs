use bytes::Bytes;
use camino::Utf8Path;
use serde::Serialize;

use crate::byte_range::ByteRange;
use crate::catalog::{Catalog, Reference};
use crate::domain::ChunkKey;
use crate::error::ResolverError;
use crate::template;
use crate::uri;

/// Where the bytes for one key live, with all templates expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedLocation {
    Inline {
        #[serde(serialize_with = "serialize_inline")]
        data: Bytes,
    },
    Remote { uri: String, range: ByteRange },
}

impl ResolvedLocation {
    pub fn uri(&self) -> Option<&str> {
        match self {
            ResolvedLocation::Inline { .. } => None,
            ResolvedLocation::Remote { uri, .. } => Some(uri),
        }
    }

    /// Number of bytes this location yields, when known without I/O.
    pub fn expected_len(&self) -> Option<u64> {
        match self {
            ResolvedLocation::Inline { data } => Some(data.len() as u64),
            ResolvedLocation::Remote { range, .. } => range.known_length(),
        }
    }
}

fn serialize_inline<S: serde::Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    match std::str::from_utf8(data) {
        Ok(text) => serializer.serialize_str(text),
        Err(_) => {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(data);
            serializer.serialize_str(&format!("base64:{encoded}"))
        }
    }
}

/// Resolve one key against the catalog.
///
/// Pure: no I/O happens here and the same inputs always give the same location.
pub fn resolve(catalog: &Catalog, key: &ChunkKey) -> Result<ResolvedLocation, ResolverError> {
    let reference = catalog
        .get(key)
        .ok_or_else(|| ResolverError::UnknownKey(key.to_string()))?;
    resolve_reference(catalog, key, reference)
}

pub fn resolve_reference(
    catalog: &Catalog,
    key: &ChunkKey,
    reference: &Reference,
) -> Result<ResolvedLocation, ResolverError> {
    match reference {
        Reference::Inline(data) => Ok(ResolvedLocation::Inline {
            data: data.decode(key)?,
        }),
        Reference::Indirect { uri, .. } | Reference::WholeFile { uri } => {
            let uri = template::apply_templates(catalog.templates(), uri)?;
            Ok(ResolvedLocation::Remote {
                uri: anchor_local_path(catalog, uri),
                range: reference.byte_range(),
            })
        }
    }
}

/// Resolve every key in sorted order, stopping at the first template failure.
///
/// Per-key decode failures do not stop the walk; they are returned in place so callers
/// can record them against their key.
pub fn resolve_all(
    catalog: &Catalog,
) -> Result<Vec<(ChunkKey, Result<ResolvedLocation, ResolverError>)>, ResolverError> {
    let mut resolved = Vec::with_capacity(catalog.len());
    for (key, reference) in catalog.references() {
        match resolve_reference(catalog, key, reference) {
            Err(err) if err.is_structural() => return Err(err),
            outcome => resolved.push((key.clone(), outcome)),
        }
    }
    Ok(resolved)
}

fn anchor_local_path(catalog: &Catalog, uri: String) -> String {
    match catalog.base_dir() {
        Some(base) if uri::is_relative_local_path(&uri) => {
            Utf8Path::new(base).join(&uri).into_string()
        }
        _ => uri,
    }
}
