use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_RANGE, RANGE};
use tracing::{debug, warn};

use crate::backends::BackendHandle;
use crate::byte_range::ByteRange;
use crate::config::HttpSettings;
use crate::error::ResolverError;
use crate::uri::Location;

/// HTTP(S) range reads through one pooled blocking client.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
}

impl HttpBackend {
    pub fn new(settings: &HttpSettings) -> Result<Self, ResolverError> {
        let mut builder = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone());
        if !settings.use_env_proxy {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|err| ResolverError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn read_url(&self, url: &str, range: ByteRange) -> Result<Bytes, ResolverError> {
        let mut request = self.client.get(url);
        if let Some(header) = range.http_header() {
            request = request.header(RANGE, header);
        }
        debug!(url, %range, "http get");
        let response = request.send().map_err(|err| classify_error(url, &err))?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => body(url, response),
            StatusCode::OK => {
                let full = body(url, response)?;
                if range.is_full() {
                    return Ok(full);
                }
                warn!(url, %range, "server ignored Range header; slicing full body");
                range
                    .slice(&full)
                    .ok_or_else(|| ResolverError::InvalidByteRange {
                        uri: url.to_string(),
                        range,
                        available: full.len() as u64,
                    })
            }
            status => Err(status_error(url, range, status, &response)),
        }
    }
}

impl BackendHandle for HttpBackend {
    fn read(&self, location: &Location, range: ByteRange) -> Result<Bytes, ResolverError> {
        self.read_url(location.as_str(), range)
    }
}

fn body(url: &str, response: Response) -> Result<Bytes, ResolverError> {
    response.bytes().map_err(|err| classify_error(url, &err))
}

fn status_error(
    url: &str,
    range: ByteRange,
    status: StatusCode,
    response: &Response,
) -> ResolverError {
    let uri = url.to_string();
    match status.as_u16() {
        404 | 410 => ResolverError::NotFound(uri),
        401 | 403 => ResolverError::Permission {
            uri,
            message: status.to_string(),
        },
        416 => ResolverError::InvalidByteRange {
            uri,
            range,
            available: response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(unsatisfied_length)
                .unwrap_or(0),
        },
        code if is_retryable_status(code) => ResolverError::TransientIo {
            uri,
            message: status.to_string(),
        },
        code => ResolverError::HttpStatus { uri, status: code },
    }
}

/// Object size from a `Content-Range: bytes */<size>` header.
fn unsatisfied_length(header: &str) -> Option<u64> {
    header.strip_prefix("bytes */")?.trim().parse().ok()
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

fn classify_error(url: &str, err: &reqwest::Error) -> ResolverError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        ResolverError::TransientIo {
            uri: url.to_string(),
            message: err.to_string(),
        }
    } else {
        ResolverError::Http(format!("{url}: {err}"))
    }
}
