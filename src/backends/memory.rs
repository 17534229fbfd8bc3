use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::backends::{BackendHandle, BackendRegistry};
use crate::byte_range::ByteRange;
use crate::error::ResolverError;
use crate::uri::Location;

/// In-process object map, keyed by everything after `scheme://`.
///
/// Clones share the same objects and switches, so a test can keep one clone to steer a
/// backend registered on a fetcher.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    objects: RwLock<HashMap<String, Bytes>>,
    refuse_ranges: AtomicBool,
    unreachable: AtomicBool,
    deny_access: AtomicBool,
    transient_failures: AtomicU32,
    reads: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, data: impl Into<Bytes>) {
        self.inner.objects.write().insert(path.into(), data.into());
    }

    /// Answer every partial read with `RangeUnsupported`.
    pub fn refuse_ranges(&self, refuse: bool) {
        self.inner.refuse_ranges.store(refuse, Ordering::SeqCst);
    }

    /// Fail every read with a transient error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn deny_access(&self, deny: bool) {
        self.inner.deny_access.store(deny, Ordering::SeqCst);
    }

    /// Fail the next `count` reads with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.inner.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Number of reads attempted so far, including failed ones.
    pub fn read_count(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// Register this backend as the root backend for `scheme`.
    pub fn register(&self, registry: &mut BackendRegistry, scheme: &str) {
        let backend = self.clone();
        registry.register_root(scheme, move |_| Ok(Arc::new(backend.clone())));
    }

    fn take_transient_failure(&self) -> bool {
        self.inner
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl BackendHandle for MemoryBackend {
    fn read(&self, location: &Location, range: ByteRange) -> Result<Bytes, ResolverError> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        let uri = location.to_string();

        if self.inner.deny_access.load(Ordering::SeqCst) {
            return Err(ResolverError::Permission {
                uri,
                message: "access denied".to_string(),
            });
        }
        if self.inner.unreachable.load(Ordering::SeqCst) || self.take_transient_failure() {
            return Err(ResolverError::TransientIo {
                uri,
                message: "backend unreachable".to_string(),
            });
        }
        if !range.is_full() && self.inner.refuse_ranges.load(Ordering::SeqCst) {
            return Err(ResolverError::RangeUnsupported { uri, range });
        }

        let objects = self.inner.objects.read();
        let data = objects
            .get(location.rest())
            .ok_or_else(|| ResolverError::NotFound(uri.clone()))?;
        range
            .slice(data)
            .ok_or_else(|| ResolverError::InvalidByteRange {
                uri,
                range,
                available: data.len() as u64,
            })
    }
}
