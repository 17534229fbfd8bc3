use std::num::NonZeroUsize;
use std::path::Path;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::debug;

use crate::byte_range::ByteRange;
use crate::catalog::{Catalog, LoadOptions};
use crate::config::ResolvedConfig;
use crate::domain::ChunkKey;
use crate::error::ResolverError;
use crate::fetcher::ByteFetcher;
use crate::resolver::{self, ResolvedLocation};
use crate::uri::Location;

/// Load a catalog from a local path or from any location the fetcher can read.
pub fn load_catalog(
    fetcher: &ByteFetcher,
    uri: &str,
    options: &LoadOptions,
) -> Result<Catalog, ResolverError> {
    let location = Location::parse(uri)?;
    if location.is_local() {
        return Catalog::from_path(Path::new(location.path()), options);
    }
    let data = fetcher.fetch_location(&location, ByteRange::FULL)?;
    Catalog::from_slice(&data, options)
}

/// Key/value view of a catalog, the interface a Zarr storage layer reads through.
pub struct ReferenceStore {
    catalog: Catalog,
    fetcher: ByteFetcher,
    cache: Option<Mutex<LruCache<ChunkKey, Bytes>>>,
    workers: usize,
}

impl std::fmt::Debug for ReferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceStore")
            .field("catalog", &self.catalog)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl ReferenceStore {
    pub fn new(catalog: Catalog, fetcher: ByteFetcher) -> Self {
        Self {
            catalog,
            fetcher,
            cache: None,
            workers: 1,
        }
    }

    pub fn open(
        uri: &str,
        options: &LoadOptions,
        config: &ResolvedConfig,
    ) -> Result<Self, ResolverError> {
        let fetcher = ByteFetcher::from_config(config);
        let catalog = load_catalog(&fetcher, uri, options)?;
        Ok(Self::new(catalog, fetcher)
            .with_cache(config.cache_capacity)
            .with_workers(config.workers))
    }

    /// Keep up to `capacity` whole chunks in memory. Zero disables the cache.
    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache = NonZeroUsize::new(capacity).map(|capacity| Mutex::new(LruCache::new(capacity)));
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn fetcher(&self) -> &ByteFetcher {
        &self.fetcher
    }

    pub fn keys(&self) -> impl Iterator<Item = &ChunkKey> {
        self.catalog.keys()
    }

    pub fn contains(&self, key: &ChunkKey) -> bool {
        self.catalog.get(key).is_some()
    }

    /// Bytes for `key`, or `None` when the catalog has no such key.
    pub fn get(&self, key: &ChunkKey) -> Result<Option<Bytes>, ResolverError> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().get(key) {
                return Ok(Some(hit.clone()));
            }
        }
        let location = match resolver::resolve(&self.catalog, key) {
            Err(ResolverError::UnknownKey(_)) => return Ok(None),
            other => other?,
        };
        let data = self.fetcher.fetch(&location)?;
        if let Some(cache) = &self.cache {
            cache.lock().put(key.clone(), data.clone());
        }
        Ok(Some(data))
    }

    /// `range` of the chunk for `key`, relative to the start of the chunk.
    pub fn get_partial(
        &self,
        key: &ChunkKey,
        range: ByteRange,
    ) -> Result<Option<Bytes>, ResolverError> {
        let location = match resolver::resolve(&self.catalog, key) {
            Err(ResolverError::UnknownKey(_)) => return Ok(None),
            other => other?,
        };
        let out_of_range = |available: u64| ResolverError::InvalidByteRange {
            uri: key.to_string(),
            range,
            available,
        };
        match location {
            ResolvedLocation::Remote {
                uri,
                range: ByteRange::FromStart {
                    offset,
                    length: Some(length),
                },
            } => {
                if !range.is_valid_for(length) {
                    return Err(out_of_range(length));
                }
                let span = range.to_range(length);
                let absolute = ByteRange::new(offset + span.start, Some(span.end - span.start));
                debug!(key = %key, %absolute, "partial read");
                self.fetcher.fetch_uri(&uri, absolute).map(Some)
            }
            other => {
                let whole = match &self.cache {
                    Some(_) => self.get(key)?.unwrap_or_default(),
                    None => self.fetcher.fetch(&other)?,
                };
                range
                    .slice(&whole)
                    .map(Some)
                    .ok_or_else(|| out_of_range(whole.len() as u64))
            }
        }
    }

    /// Fetch several keys in parallel. Results keep the order of `keys`.
    pub fn get_many(
        &self,
        keys: &[ChunkKey],
    ) -> Result<Vec<Result<Option<Bytes>, ResolverError>>, ResolverError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|err| ResolverError::Io {
                uri: "worker pool".to_string(),
                message: err.to_string(),
            })?;
        Ok(pool.install(|| keys.par_iter().map(|key| self.get(key)).collect()))
    }

    /// Release backend handles and cached chunks. The store stays usable.
    pub fn close(&self) {
        self.fetcher.close();
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }
}
