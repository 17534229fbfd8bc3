use std::io::{Cursor, Read};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;
use zip::ZipArchive;

use crate::backends::BackendHandle;
use crate::byte_range::ByteRange;
use crate::error::ResolverError;
use crate::uri::Location;

/// Members of one zip archive, addressed as `zip://<member>::<archive-uri>`.
///
/// The archive is read once, when the handle is built, and kept in memory.
#[derive(Debug)]
pub struct ZipBackend {
    uri: String,
    archive: Mutex<ZipArchive<Cursor<Bytes>>>,
}

impl ZipBackend {
    pub fn from_archive(uri: &str, data: Bytes) -> Result<Self, ResolverError> {
        let archive = ZipArchive::new(Cursor::new(data)).map_err(|err| ResolverError::Io {
            uri: uri.to_string(),
            message: format!("invalid zip archive: {err}"),
        })?;
        debug!(uri, members = archive.len(), "opened zip archive");
        Ok(Self {
            uri: uri.to_string(),
            archive: Mutex::new(archive),
        })
    }

    pub fn member_names(&self) -> Vec<String> {
        let archive = self.archive.lock();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    pub fn read_member(&self, member: &str) -> Result<Bytes, ResolverError> {
        let member_uri = || format!("zip://{member}::{}", self.uri);
        let mut archive = self.archive.lock();
        let index = archive
            .index_for_name(member)
            .ok_or_else(|| ResolverError::NotFound(member_uri()))?;
        let mut entry = archive.by_index(index).map_err(|err| ResolverError::Io {
            uri: member_uri(),
            message: err.to_string(),
        })?;
        if entry.is_dir() {
            return Err(ResolverError::NotFound(member_uri()));
        }
        let mut buffer = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry
            .read_to_end(&mut buffer)
            .map_err(|err| ResolverError::io(&member_uri(), &err))?;
        Ok(Bytes::from(buffer))
    }
}

impl BackendHandle for ZipBackend {
    fn read(&self, location: &Location, range: ByteRange) -> Result<Bytes, ResolverError> {
        if !range.is_full() {
            return Err(ResolverError::RangeUnsupported {
                uri: location.to_string(),
                range,
            });
        }
        self.read_member(location.rest())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;
    use zip::write::SimpleFileOptions;

    use super::*;

    fn archive() -> Bytes {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("v/0.0", options).unwrap();
        writer.write_all(b"chunk-zero").unwrap();
        writer
            .add_directory("v/sub/", SimpleFileOptions::default())
            .unwrap();
        Bytes::from(writer.finish().unwrap().into_inner())
    }

    #[test]
    fn reads_members() {
        let backend = ZipBackend::from_archive("file:///a.zip", archive()).unwrap();
        assert_eq!(backend.member_names(), vec!["v/0.0", "v/sub/"]);
        assert_eq!(
            backend.read_member("v/0.0").unwrap(),
            Bytes::from_static(b"chunk-zero")
        );
        assert_matches!(backend.read_member("v/9"), Err(ResolverError::NotFound(_)));
        assert_matches!(backend.read_member("v/sub/"), Err(ResolverError::NotFound(_)));
    }

    #[test]
    fn partial_reads_are_unsupported() {
        let backend = ZipBackend::from_archive("file:///a.zip", archive()).unwrap();
        let location = Location::parse("zip://v/0.0::file:///a.zip").unwrap();
        assert_matches!(
            backend.read(&location, ByteRange::new(0, Some(2))),
            Err(ResolverError::RangeUnsupported { .. })
        );
        assert_eq!(backend.read(&location, ByteRange::FULL).unwrap().len(), 10);
    }

    #[test]
    fn rejects_garbage() {
        assert_matches!(
            ZipBackend::from_archive("file:///a.zip", Bytes::from_static(b"not a zip")),
            Err(ResolverError::Io { .. })
        );
    }
}
