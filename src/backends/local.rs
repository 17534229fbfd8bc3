use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::backends::BackendHandle;
use crate::byte_range::ByteRange;
use crate::error::ResolverError;
use crate::uri::Location;

const OPEN_FILE_LIMIT: usize = 64;

/// Local filesystem reads with a small cache of open file descriptors.
pub struct LocalBackend {
    files: Mutex<LruCache<PathBuf, Arc<Mutex<File>>>>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::with_open_file_limit(OPEN_FILE_LIMIT)
    }

    pub fn with_open_file_limit(limit: usize) -> Self {
        let limit = NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN);
        Self {
            files: Mutex::new(LruCache::new(limit)),
        }
    }

    fn open(&self, path: &Path) -> Result<Arc<Mutex<File>>, ResolverError> {
        let mut files = self.files.lock();
        if let Some(file) = files.get(path) {
            return Ok(file.clone());
        }
        let file = File::open(path)
            .map_err(|err| ResolverError::io(&path.display().to_string(), &err))?;
        debug!(path = %path.display(), "opened local file");
        let file = Arc::new(Mutex::new(file));
        files.put(path.to_path_buf(), file.clone());
        Ok(file)
    }

    pub fn read_path(&self, path: &Path, range: ByteRange) -> Result<Bytes, ResolverError> {
        let name = path.display().to_string();
        let file = self.open(path)?;
        let mut file = file.lock();
        let size = file
            .metadata()
            .map_err(|err| ResolverError::io(&name, &err))?
            .len();
        if !range.is_valid_for(size) {
            return Err(ResolverError::InvalidByteRange {
                uri: name,
                range,
                available: size,
            });
        }

        let span = range.to_range(size);
        let length = usize::try_from(span.end - span.start).map_err(|_| ResolverError::Io {
            uri: name.clone(),
            message: "range does not fit in memory".to_string(),
        })?;
        file.seek(SeekFrom::Start(span.start))
            .map_err(|err| ResolverError::io(&name, &err))?;
        let mut buffer = vec![0; length];
        file.read_exact(&mut buffer)
            .map_err(|err| ResolverError::io(&name, &err))?;
        Ok(Bytes::from(buffer))
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendHandle for LocalBackend {
    fn read(&self, location: &Location, range: ByteRange) -> Result<Bytes, ResolverError> {
        self.read_path(Path::new(location.path()), range)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use assert_matches::assert_matches;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn reads_ranges_and_reuses_descriptors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"0123456789").unwrap();

        let backend = LocalBackend::with_open_file_limit(1);
        assert_eq!(
            backend.read_path(&path, ByteRange::new(2, Some(3))).unwrap(),
            Bytes::from_static(b"234")
        );
        assert_eq!(
            backend.read_path(&path, ByteRange::Suffix { length: 2 }).unwrap(),
            Bytes::from_static(b"89")
        );
        assert_eq!(backend.read_path(&path, ByteRange::FULL).unwrap().len(), 10);
        assert_eq!(backend.files.lock().len(), 1);
    }

    #[test]
    fn classifies_failures() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new();
        assert_matches!(
            backend.read_path(&dir.path().join("missing.bin"), ByteRange::FULL),
            Err(ResolverError::NotFound(_))
        );

        let path = dir.path().join("short.bin");
        fs::write(&path, b"abc").unwrap();
        assert_matches!(
            backend.read_path(&path, ByteRange::new(1, Some(5))),
            Err(ResolverError::InvalidByteRange { available: 3, .. })
        );
    }
}
