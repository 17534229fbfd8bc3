use std::cell::Cell;
use std::path::Path;

use bytes::Bytes;
use tracing::debug;

use crate::backends::{AdapterSource, BackendHandle};
use crate::byte_range::ByteRange;
use crate::catalog::{Catalog, LoadOptions};
use crate::domain::ChunkKey;
use crate::error::ResolverError;
use crate::fetcher::WeakFetcher;
use crate::resolver::{self, ResolvedLocation};
use crate::uri::Location;

/// Deepest chain of catalogs one read may pass through on a thread.
pub const MAX_NESTING_DEPTH: usize = 16;

thread_local! {
    static NESTING_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts one level of nested catalog reads on the current thread.
struct NestingGuard;

impl NestingGuard {
    fn enter(location: &Location) -> Result<Self, ResolverError> {
        NESTING_DEPTH.with(|depth| {
            if depth.get() >= MAX_NESTING_DEPTH {
                return Err(ResolverError::Parse(format!(
                    "reference nesting exceeds {MAX_NESTING_DEPTH} levels at {location}"
                )));
            }
            depth.set(depth.get() + 1);
            Ok(NestingGuard)
        })
    }
}

impl Drop for NestingGuard {
    fn drop(&mut self) {
        NESTING_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// A nested catalog served as a filesystem: `reference://<key>::<catalog-uri>`.
pub struct ReferenceBackend {
    catalog: Catalog,
    fetcher: WeakFetcher,
}

impl ReferenceBackend {
    pub fn new(catalog: Catalog, fetcher: WeakFetcher) -> Self {
        Self { catalog, fetcher }
    }

    pub fn from_source(source: AdapterSource) -> Result<Self, ResolverError> {
        let mut catalog = Catalog::from_slice(&source.parent, &LoadOptions::default())?;
        if let Some(parent) = source.location.parent().filter(|parent| parent.is_local()) {
            if let Some(dir) = Path::new(parent.path()).parent().and_then(Path::to_str) {
                if !dir.is_empty() {
                    catalog = catalog.with_base_dir(dir);
                }
            }
        }
        debug!(
            catalog = source.location.parent().map_or("", Location::as_str),
            references = catalog.len(),
            "loaded nested catalog"
        );
        Ok(Self::new(catalog, source.fetcher))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

impl BackendHandle for ReferenceBackend {
    fn read(&self, location: &Location, range: ByteRange) -> Result<Bytes, ResolverError> {
        if !range.is_full() {
            return Err(ResolverError::RangeUnsupported {
                uri: location.to_string(),
                range,
            });
        }
        let key: ChunkKey = location.rest().parse()?;
        let resolved = match resolver::resolve(&self.catalog, &key) {
            Err(ResolverError::UnknownKey(_)) => {
                return Err(ResolverError::NotFound(location.to_string()));
            }
            other => other?,
        };
        match resolved {
            ResolvedLocation::Inline { data } => Ok(data),
            remote @ ResolvedLocation::Remote { .. } => {
                let _guard = NestingGuard::enter(location)?;
                let fetcher = self.fetcher.upgrade().ok_or_else(|| ResolverError::Io {
                    uri: location.to_string(),
                    message: "fetcher was dropped".to_string(),
                })?;
                fetcher.fetch(&remote)
            }
        }
    }
}
