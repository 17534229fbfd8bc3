use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::config::default_workers;
use crate::destination::Destination;
use crate::domain::ChunkKey;
use crate::error::ResolverError;
use crate::fetcher::ByteFetcher;
use crate::resolver::{self, ResolvedLocation};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

/// Receives progress from a running operation. Called from worker threads.
pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn event(&self, _event: ProgressEvent) {}
}

/// Cooperative cancel flag shared between a caller and a running operation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    pub workers: usize,
    /// Keep chunk files that already exist with the expected size instead of refetching.
    pub skip_existing: bool,
    pub cancel: CancellationToken,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            skip_existing: false,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkStatus {
    Succeeded { bytes: u64, reused: bool },
    FailedFetch { reason: String },
    FailedDecode { reason: String },
    FailedWrite { reason: String },
}

impl ChunkStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ChunkStatus::Succeeded { .. })
    }

    fn from_error(err: &ResolverError) -> Self {
        let reason = err.to_string();
        match err {
            ResolverError::Decode { .. } => ChunkStatus::FailedDecode { reason },
            ResolverError::Filesystem(_) => ChunkStatus::FailedWrite { reason },
            _ => ChunkStatus::FailedFetch { reason },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    pub key: ChunkKey,
    #[serde(flatten)]
    pub status: ChunkStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaterializeReport {
    pub destination: String,
    pub started_at: String,
    pub finished_at: String,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub entries: Vec<ChunkReport>,
    pub not_attempted: Vec<ChunkKey>,
}

impl MaterializeReport {
    /// Every key was attempted and written.
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.not_attempted.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ChunkReport> {
        self.entries.iter().filter(|entry| !entry.status.is_success())
    }

    pub fn status(&self, key: &ChunkKey) -> Option<&ChunkStatus> {
        self.entries
            .binary_search_by(|entry| entry.key.cmp(key))
            .ok()
            .map(|index| &self.entries[index].status)
    }
}

/// Resolve, fetch and write every key of `catalog` under `destination`.
///
/// Template errors abort before anything is written. Per-chunk fetch, decode and write
/// failures are recorded in the report and do not stop the run.
pub fn materialize(
    catalog: &Catalog,
    fetcher: &ByteFetcher,
    destination: &Destination,
    options: &MaterializeOptions,
    sink: &dyn ProgressSink,
) -> Result<MaterializeReport, ResolverError> {
    let started_at = now();
    let start = Instant::now();

    sink.event(ProgressEvent {
        message: format!("phase=Resolve; {} keys", catalog.len()),
        elapsed: None,
    });
    let resolved = resolver::resolve_all(catalog)?;
    destination.ensure_root()?;

    let total = resolved.len();
    info!(
        keys = total,
        workers = options.workers,
        destination = %destination.root(),
        "materializing catalog"
    );
    sink.event(ProgressEvent {
        message: format!("phase=Fetch; {total} chunks on {} workers", options.workers),
        elapsed: Some(start.elapsed()),
    });

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .thread_name(|index| format!("kcr-worker-{index}"))
        .build()
        .map_err(|err| ResolverError::Io {
            uri: destination.root().to_string(),
            message: format!("failed to start worker pool: {err}"),
        })?;

    let done = AtomicUsize::new(0);
    let step = (total / 20).max(1);
    let outcomes: Vec<(ChunkKey, Option<ChunkStatus>)> = pool.install(|| {
        resolved
            .into_par_iter()
            .map(|(key, location)| {
                if options.cancel.is_cancelled() {
                    return (key, None);
                }
                let status = match location.and_then(|location| {
                    materialize_chunk(fetcher, destination, options, &key, &location)
                }) {
                    Ok(status) => status,
                    Err(err) => ChunkStatus::from_error(&err),
                };
                if !status.is_success() {
                    warn!(key = %key, ?status, "chunk failed");
                }
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                if finished % step == 0 || finished == total {
                    sink.event(ProgressEvent {
                        message: format!("phase=Fetch; {finished}/{total} chunks"),
                        elapsed: Some(start.elapsed()),
                    });
                }
                (key, Some(status))
            })
            .collect()
    });

    let mut entries = Vec::with_capacity(outcomes.len());
    let mut not_attempted = Vec::new();
    for (key, status) in outcomes {
        match status {
            Some(status) => entries.push(ChunkReport { key, status }),
            None => not_attempted.push(key),
        }
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    not_attempted.sort();

    let succeeded = entries.iter().filter(|entry| entry.status.is_success()).count();
    let failed = entries.len() - succeeded;
    let cancelled = options.cancel.is_cancelled();
    info!(succeeded, failed, cancelled, not_attempted = not_attempted.len(), "materialize finished");
    sink.event(ProgressEvent {
        message: format!("phase=Done; {succeeded} succeeded, {failed} failed"),
        elapsed: Some(start.elapsed()),
    });

    Ok(MaterializeReport {
        destination: destination.root().to_string(),
        started_at,
        finished_at: now(),
        succeeded,
        failed,
        cancelled,
        entries,
        not_attempted,
    })
}

fn materialize_chunk(
    fetcher: &ByteFetcher,
    destination: &Destination,
    options: &MaterializeOptions,
    key: &ChunkKey,
    location: &ResolvedLocation,
) -> Result<ChunkStatus, ResolverError> {
    if options.skip_existing {
        if let Some(existing) = destination.existing_len(key) {
            if location.expected_len().is_none_or(|expected| expected == existing) {
                return Ok(ChunkStatus::Succeeded {
                    bytes: existing,
                    reused: true,
                });
            }
        }
    }
    let data: Bytes = fetcher.fetch(location)?;
    destination.write_chunk(key, &data)?;
    Ok(ChunkStatus::Succeeded {
        bytes: data.len() as u64,
        reused: false,
    })
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
