//! Storage backends and the registry the fetcher uses to find them.
//!
//! Root backends serve locations on their own (`file`, `http`, `s3`, ...). Adapter
//! backends serve the left-hand side of a `::` chain out of the bytes of their parent
//! object (`zip`, `reference`).

pub mod archive;
pub mod http;
pub mod local;
pub mod memory;
pub mod object_store;
pub mod reference;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::byte_range::ByteRange;
use crate::config::ResolvedConfig;
use crate::error::ResolverError;
use crate::fetcher::WeakFetcher;
use crate::uri::Location;

/// A capability serving byte-range reads for one scheme and host, or one parent object.
///
/// Handles are shared between worker threads.
pub trait BackendHandle: Send + Sync {
    /// Read `range` of the object at `location`.
    ///
    /// A handle that cannot serve partial reads returns
    /// [`ResolverError::RangeUnsupported`]; the fetcher then reads the whole object and
    /// slices it.
    fn read(&self, location: &Location, range: ByteRange) -> Result<Bytes, ResolverError>;
}

/// What an adapter builder is given to construct its handle.
pub struct AdapterSource {
    /// The first location served by the new handle.
    pub location: Location,
    /// Complete contents of the parent object.
    pub parent: Bytes,
    /// Fetcher that owns the handle, for adapters that read further objects.
    pub fetcher: WeakFetcher,
}

/// Creates a root handle from a location.
pub type RootBackendBuilder =
    Arc<dyn Fn(&Location) -> Result<Arc<dyn BackendHandle>, ResolverError> + Send + Sync>;

/// Creates an adapter handle from the parent object's bytes.
pub type AdapterBackendBuilder =
    Arc<dyn Fn(AdapterSource) -> Result<Arc<dyn BackendHandle>, ResolverError> + Send + Sync>;

/// Scheme → backend builder tables. Populated once at startup and owned by a fetcher.
#[derive(Default)]
pub struct BackendRegistry {
    roots: HashMap<String, RootBackendBuilder>,
    adapters: HashMap<String, AdapterBackendBuilder>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in backend except `memory`.
    pub fn with_defaults(config: &ResolvedConfig) -> Self {
        let mut registry = Self::new();

        registry.register_root("file", |_| Ok(Arc::new(local::LocalBackend::new())));

        let settings = config.http.clone();
        let http_builder = move |_: &Location| -> Result<Arc<dyn BackendHandle>, ResolverError> {
            Ok(Arc::new(http::HttpBackend::new(&settings)?))
        };
        registry.register_root("http", http_builder.clone());
        registry.register_root("https", http_builder);

        for (scheme, endpoint) in [
            ("s3", config.endpoints.s3.clone()),
            ("gs", config.endpoints.gs.clone()),
        ] {
            let settings = config.http.clone();
            registry.register_root(scheme, move |location| {
                Ok(Arc::new(object_store::ObjectStoreBackend::new(
                    &endpoint,
                    location.authority(),
                    &settings,
                )?))
            });
        }

        registry.register_adapter("zip", |source| {
            Ok(Arc::new(archive::ZipBackend::from_archive(
                source.location.parent().map_or("", Location::as_str),
                source.parent,
            )?))
        });
        registry.register_adapter("reference", |source| {
            Ok(Arc::new(reference::ReferenceBackend::from_source(source)?))
        });

        registry
    }

    pub fn register_root<F>(&mut self, scheme: &str, builder: F)
    where
        F: Fn(&Location) -> Result<Arc<dyn BackendHandle>, ResolverError> + Send + Sync + 'static,
    {
        self.roots
            .insert(scheme.to_ascii_lowercase(), Arc::new(builder));
    }

    pub fn register_adapter<F>(&mut self, scheme: &str, builder: F)
    where
        F: Fn(AdapterSource) -> Result<Arc<dyn BackendHandle>, ResolverError>
            + Send
            + Sync
            + 'static,
    {
        self.adapters
            .insert(scheme.to_ascii_lowercase(), Arc::new(builder));
    }

    pub fn root_builder(&self, scheme: &str) -> Option<RootBackendBuilder> {
        self.roots.get(scheme).cloned()
    }

    pub fn adapter_builder(&self, scheme: &str) -> Option<AdapterBackendBuilder> {
        self.adapters.get(scheme).cloned()
    }

    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self
            .roots
            .keys()
            .chain(self.adapters.keys())
            .map(String::as_str)
            .collect();
        schemes.sort_unstable();
        schemes
    }
}
