use bytes::Bytes;

use crate::backends::BackendHandle;
use crate::backends::http::HttpBackend;
use crate::byte_range::ByteRange;
use crate::config::HttpSettings;
use crate::error::ResolverError;
use crate::uri::Location;

/// `s3://bucket/key` and `gs://bucket/key` served as HTTP range requests against a
/// public endpoint. Anonymous access only.
pub struct ObjectStoreBackend {
    endpoint: String,
    bucket: String,
    http: HttpBackend,
}

impl ObjectStoreBackend {
    /// `endpoint` is a URL template with `{bucket}` and `{key}` placeholders.
    pub fn new(endpoint: &str, bucket: &str, settings: &HttpSettings) -> Result<Self, ResolverError> {
        if bucket.is_empty() {
            return Err(ResolverError::InvalidUri {
                uri: endpoint.to_string(),
                reason: "object store location needs a bucket".to_string(),
            });
        }
        Ok(Self {
            endpoint: endpoint.to_string(),
            bucket: bucket.to_string(),
            http: HttpBackend::new(settings)?,
        })
    }

    pub fn object_url(&self, key: &str) -> String {
        self.endpoint
            .replace("{bucket}", &self.bucket)
            .replace("{key}", key)
    }
}

impl BackendHandle for ObjectStoreBackend {
    fn read(&self, location: &Location, range: ByteRange) -> Result<Bytes, ResolverError> {
        let url = self.object_url(location.path());
        self.http.read_url(&url, range).map_err(|err| match err {
            ResolverError::NotFound(_) => ResolverError::NotFound(location.to_string()),
            other => other,
        })
    }
}
