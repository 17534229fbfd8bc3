use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::ChunkKey;
use crate::error::ResolverError;

const TEMP_PREFIX: &str = ".kcr-partial-";

/// A local directory receiving materialized chunks, one file per key.
#[derive(Debug, Clone)]
pub struct Destination {
    root: Utf8PathBuf,
}

impl Destination {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_path(root: &Path) -> Result<Self, ResolverError> {
        let root = Utf8PathBuf::from_path_buf(root.to_path_buf())
            .map_err(|path| ResolverError::Filesystem(format!("non UTF-8 path {}", path.display())))?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), ResolverError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| ResolverError::Filesystem(format!("{}: {err}", self.root)))
    }

    pub fn chunk_path(&self, key: &ChunkKey) -> Utf8PathBuf {
        key.segments()
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Size of the file already written for `key`, if any.
    pub fn existing_len(&self, key: &ChunkKey) -> Option<u64> {
        fs::metadata(self.chunk_path(key).as_std_path())
            .ok()
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
    }

    /// Write `content` for `key` through a temp file in the target directory, then rename
    /// it into place. Readers never see a partially written chunk.
    pub fn write_chunk(&self, key: &ChunkKey, content: &[u8]) -> Result<Utf8PathBuf, ResolverError> {
        let path = self.chunk_path(key);
        let parent = path
            .parent()
            .ok_or_else(|| ResolverError::Filesystem(format!("invalid destination path {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| ResolverError::Filesystem(format!("{parent}: {err}")))?;

        let mut temp = Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent.as_std_path())
            .map_err(|err| ResolverError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|err| ResolverError::Filesystem(format!("{path}: {err}")))?;
        temp.persist(path.as_std_path())
            .map_err(|err| ResolverError::Filesystem(format!("{path}: {}", err.error)))?;
        Ok(path)
    }

    /// Keys of every chunk file under the root, sorted. Leftover temp files are skipped.
    pub fn list_keys(&self) -> Result<Vec<String>, ResolverError> {
        if !self.root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for path in walk_files(self.root.as_std_path())? {
            let relative = path
                .strip_prefix(self.root.as_std_path())
                .map_err(|err| ResolverError::Filesystem(err.to_string()))?;
            let is_temp = relative
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(TEMP_PREFIX));
            if is_temp {
                continue;
            }
            let key = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
        keys.sort();
        Ok(keys)
    }
}

fn walk_files(root: &Path) -> Result<Vec<PathBuf>, ResolverError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries =
            fs::read_dir(&dir).map_err(|err| ResolverError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| ResolverError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    Ok(files)
}
