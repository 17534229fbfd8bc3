use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::backends::{AdapterSource, BackendHandle, BackendRegistry};
use crate::byte_range::ByteRange;
use crate::config::ResolvedConfig;
use crate::error::ResolverError;
use crate::resolver::ResolvedLocation;
use crate::uri::Location;

/// Bounded exponential backoff for transient fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };

    /// Delay before retry number `attempt` (zero-based): `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Turns resolved locations into bytes.
///
/// Owns the backend registry and the cache of open backend handles. Clones share both;
/// [`ByteFetcher::close`] releases the handles for every clone.
#[derive(Clone)]
pub struct ByteFetcher {
    inner: Arc<FetcherInner>,
}

struct FetcherInner {
    registry: BackendRegistry,
    retry: RetryPolicy,
    handles: RwLock<HashMap<String, Arc<dyn BackendHandle>>>,
}

/// Non-owning reference to a fetcher, held by handles that read through it.
#[derive(Clone)]
pub struct WeakFetcher(Weak<FetcherInner>);

impl WeakFetcher {
    pub fn upgrade(&self) -> Option<ByteFetcher> {
        self.0.upgrade().map(|inner| ByteFetcher { inner })
    }
}

impl ByteFetcher {
    pub fn new(registry: BackendRegistry, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(FetcherInner {
                registry,
                retry,
                handles: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(BackendRegistry::with_defaults(config), config.retry)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry
    }

    pub fn fetch(&self, location: &ResolvedLocation) -> Result<Bytes, ResolverError> {
        match location {
            ResolvedLocation::Inline { data } => Ok(data.clone()),
            ResolvedLocation::Remote { uri, range } => self.fetch_uri(uri, *range),
        }
    }

    pub fn fetch_uri(&self, uri: &str, range: ByteRange) -> Result<Bytes, ResolverError> {
        let location = Location::parse(uri)?;
        self.fetch_location(&location, range)
    }

    /// Read `range` of `location`, retrying transient failures and falling back to a
    /// full read when the backend cannot serve the range.
    pub fn fetch_location(
        &self,
        location: &Location,
        range: ByteRange,
    ) -> Result<Bytes, ResolverError> {
        if range.known_length() == Some(0) {
            return Ok(Bytes::new());
        }

        let handle = self.handle(location)?;
        let data = match self.with_retry(location, || handle.read(location, range)) {
            Err(ResolverError::RangeUnsupported { .. }) => {
                warn!(uri = %location, %range, "range reads unsupported; reading whole object");
                let full = self.with_retry(location, || handle.read(location, ByteRange::FULL))?;
                range
                    .slice(&full)
                    .ok_or_else(|| ResolverError::InvalidByteRange {
                        uri: location.to_string(),
                        range,
                        available: full.len() as u64,
                    })?
            }
            other => other?,
        };

        match range.known_length() {
            Some(expected) if (data.len() as u64) < expected => {
                Err(ResolverError::InvalidByteRange {
                    uri: location.to_string(),
                    range,
                    available: data.len() as u64,
                })
            }
            Some(expected) if (data.len() as u64) > expected => {
                let expected = usize::try_from(expected).unwrap_or(data.len());
                Ok(data.slice(..expected))
            }
            _ => Ok(data),
        }
    }

    fn with_retry<F>(&self, location: &Location, mut read: F) -> Result<Bytes, ResolverError>
    where
        F: FnMut() -> Result<Bytes, ResolverError>,
    {
        let policy = self.inner.retry;
        let mut attempt = 0u32;
        loop {
            match read() {
                Err(err) if err.is_transient() && attempt < policy.max_retries => {
                    let delay = policy.delay_for(attempt);
                    debug!(
                        uri = %location,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying transient failure"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    /// The shared handle serving `location`, built on first use.
    fn handle(&self, location: &Location) -> Result<Arc<dyn BackendHandle>, ResolverError> {
        let key = location.handle_key();
        if let Some(handle) = self.inner.handles.read().get(&key) {
            return Ok(handle.clone());
        }

        let handle = match location.parent() {
            Some(parent) => {
                let builder = self
                    .inner
                    .registry
                    .adapter_builder(location.scheme())
                    .ok_or_else(|| ResolverError::UnsupportedScheme(location.scheme().to_string()))?;
                let parent = self.fetch_location(parent, ByteRange::FULL)?;
                builder(AdapterSource {
                    location: location.clone(),
                    parent,
                    fetcher: WeakFetcher(Arc::downgrade(&self.inner)),
                })?
            }
            None => {
                let builder = self
                    .inner
                    .registry
                    .root_builder(location.scheme())
                    .ok_or_else(|| ResolverError::UnsupportedScheme(location.scheme().to_string()))?;
                builder(location)?
            }
        };
        debug!(key, "created backend handle");

        let mut handles = self.inner.handles.write();
        Ok(handles.entry(key).or_insert(handle).clone())
    }

    pub fn handle_count(&self) -> usize {
        self.inner.handles.read().len()
    }

    /// Drop every cached handle. Later fetches build new ones.
    pub fn close(&self) {
        let released = {
            let mut handles = self.inner.handles.write();
            let count = handles.len();
            handles.clear();
            count
        };
        debug!(released, "closed backend handles");
    }
}
