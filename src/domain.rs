use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ResolverError;

/// Zarr metadata document names that are served verbatim to the downstream store.
pub const ZARR_METADATA_KEYS: [&str; 5] = [".zgroup", ".zarray", ".zattrs", ".zmetadata", "zarr.json"];

/// A chunk key: one addressable unit of a virtual dataset (e.g. `temp/0.1` or `temp/.zarray`).
///
/// Keys are relative `/`-separated paths. They double as paths under a materialize
/// destination, so absolute keys and `.`/`..` segments are rejected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkKey(String);

impl ChunkKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Whether this key names a Zarr metadata document rather than array data.
    pub fn is_metadata(&self) -> bool {
        ZARR_METADATA_KEYS.contains(&self.file_name())
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChunkKey {
    type Err = ResolverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let is_valid = !value.is_empty()
            && !value.starts_with('/')
            && !value.contains('\\')
            && !value.contains('\0')
            && value
                .split('/')
                .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
        if !is_valid {
            return Err(ResolverError::InvalidKey(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

impl TryFrom<String> for ChunkKey {
    type Error = ResolverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChunkKey> for String {
    fn from(key: ChunkKey) -> Self {
        key.0
    }
}

/// Kerchunk reference-set format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogVersion {
    /// The whole JSON object is the key → reference mapping.
    V0,
    /// `{"version": 1, "templates": {...}, "refs": {...}, "gen": [...]}`.
    V1,
}

impl fmt::Display for CatalogVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogVersion::V0 => write!(f, "0"),
            CatalogVersion::V1 => write!(f, "1"),
        }
    }
}
