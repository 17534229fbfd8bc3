use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::byte_range::ByteRange;

#[derive(Debug, Error, Diagnostic)]
pub enum ResolverError {
    #[error("failed to parse catalog: {0}")]
    #[diagnostic(code(kcr::parse))]
    Parse(String),

    #[error("input holds several catalogs; choose one of {candidates:?}")]
    #[diagnostic(
        code(kcr::ambiguous_catalog),
        help("multi-catalog JSON is keyed by catalog name; select a single key (e.g. `--select <name>`)")
    )]
    AmbiguousCatalog { candidates: Vec<String> },

    #[error("unresolved template token `{{{{{token}}}}}` in `{source_text}`")]
    #[diagnostic(code(kcr::unresolved_template))]
    UnresolvedTemplate { token: String, source_text: String },

    #[error("unknown chunk key: {0}")]
    #[diagnostic(code(kcr::unknown_key))]
    UnknownKey(String),

    #[error("invalid chunk key: {0}")]
    InvalidKey(String),

    #[error("invalid uri `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("no backend registered for scheme `{0}`")]
    #[diagnostic(help("register a backend factory for this scheme on the BackendRegistry"))]
    UnsupportedScheme(String),

    #[error("object not found: {0}")]
    #[diagnostic(code(kcr::not_found))]
    NotFound(String),

    #[error("backend cannot serve byte range {range} of {uri}")]
    RangeUnsupported { uri: String, range: ByteRange },

    #[error("invalid byte range {range} for {uri} ({available} bytes available)")]
    InvalidByteRange {
        uri: String,
        range: ByteRange,
        available: u64,
    },

    #[error("transient I/O failure on {uri}: {message}")]
    TransientIo { uri: String, message: String },

    #[error("permission denied: {uri}: {message}")]
    #[diagnostic(code(kcr::permission))]
    Permission { uri: String, message: String },

    #[error("{uri} returned status {status}")]
    HttpStatus { uri: String, status: u16 },

    #[error("http request failed: {0}")]
    Http(String),

    #[error("failed to decode inline data for {key}: {message}")]
    Decode { key: String, message: String },

    #[error("I/O error on {uri}: {message}")]
    Io { uri: String, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl ResolverError {
    /// Whether a fetch failing with this error may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolverError::TransientIo { .. })
    }

    /// Errors that mean the catalog itself is broken. These abort whole operations.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ResolverError::Parse(_)
                | ResolverError::AmbiguousCatalog { .. }
                | ResolverError::UnresolvedTemplate { .. }
                | ResolverError::InvalidKey(_)
        )
    }

    pub(crate) fn io(uri: &str, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => ResolverError::NotFound(uri.to_string()),
            ErrorKind::PermissionDenied => ResolverError::Permission {
                uri: uri.to_string(),
                message: err.to_string(),
            },
            ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                ResolverError::TransientIo {
                    uri: uri.to_string(),
                    message: err.to_string(),
                }
            }
            _ => ResolverError::Io {
                uri: uri.to_string(),
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_template_message_shows_braces() {
        let err = ResolverError::UnresolvedTemplate {
            token: "u".to_string(),
            source_text: "{{u}}/a.nc".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unresolved template token `{{u}}` in `{{u}}/a.nc`"
        );
    }

    #[test]
    fn io_error_classification() {
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(
            ResolverError::io("/a", &missing),
            ResolverError::NotFound(_)
        ));
        let timeout = std::io::Error::from(std::io::ErrorKind::TimedOut);
        assert!(ResolverError::io("/a", &timeout).is_transient());
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(!ResolverError::io("/a", &denied).is_transient());
    }
}
