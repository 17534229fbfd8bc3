//! Resource locations.
//!
//! A [`Location`] is a parsed resolved URI. Locations may be chained with `::` in the
//! fsspec style, where the left-hand side is read out of the right-hand side:
//! `zip://data/0.0::file:///archives/run.zip` names the member `data/0.0` of a local
//! archive. Scheme-less strings are local filesystem paths.

use std::fmt;

use crate::error::ResolverError;

/// Scheme used for plain local paths.
pub const FILE_SCHEME: &str = "file";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    scheme: String,
    rest: String,
    full: String,
    parent: Option<Box<Location>>,
}

impl Location {
    pub fn parse(uri: &str) -> Result<Self, ResolverError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(invalid(uri, "empty location"));
        }

        let (head, parent) = match uri.split_once("::") {
            Some((head, tail)) => (head, Some(Box::new(Location::parse(tail)?))),
            None => (uri, None),
        };

        let Some((scheme, rest)) = head.split_once("://") else {
            if parent.is_some() {
                return Err(invalid(uri, "chained location needs an explicit scheme"));
            }
            return Ok(Self {
                scheme: FILE_SCHEME.to_string(),
                rest: head.to_string(),
                full: uri.to_string(),
                parent: None,
            });
        };

        let valid_scheme = scheme
            .chars()
            .next()
            .is_some_and(|first| first.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid_scheme {
            return Err(invalid(uri, "malformed scheme"));
        }
        let scheme = scheme.to_ascii_lowercase();

        let rest = match scheme.as_str() {
            FILE_SCHEME => rest.strip_prefix("localhost").unwrap_or(rest).to_string(),
            "http" | "https" => {
                let parsed = url::Url::parse(head).map_err(|err| invalid(uri, &err.to_string()))?;
                if parsed.host_str().is_none() {
                    return Err(invalid(uri, "missing host"));
                }
                rest.to_string()
            }
            _ => rest.to_string(),
        };
        if rest.is_empty() {
            return Err(invalid(uri, "missing path"));
        }

        Ok(Self {
            scheme,
            rest,
            full: uri.to_string(),
            parent,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Everything after `scheme://` in this segment. For adapters this is the inner path.
    pub fn rest(&self) -> &str {
        &self.rest
    }

    /// Host (with port) or bucket name. Empty for local files.
    pub fn authority(&self) -> &str {
        if self.scheme == FILE_SCHEME {
            return "";
        }
        self.rest
            .split(['/', '?'])
            .next()
            .unwrap_or(&self.rest)
    }

    /// Object path. For local files this is the filesystem path; for remote schemes it is
    /// the part after the authority, without the leading `/`.
    pub fn path(&self) -> &str {
        if self.scheme == FILE_SCHEME {
            return &self.rest;
        }
        let authority = self.authority();
        self.rest[authority.len()..].trim_start_matches('/')
    }

    pub fn parent(&self) -> Option<&Location> {
        self.parent.as_deref()
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Text of this segment only, without any chained parent.
    pub fn head(&self) -> String {
        format!("{}://{}", self.scheme, self.rest)
    }

    /// Key under which the fetcher caches the handle serving this location.
    ///
    /// Root locations share a handle per scheme and authority. Chained locations share a
    /// handle per adapter scheme and parent object.
    pub fn handle_key(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{}::{}", self.scheme, parent.as_str()),
            None => format!("{}://{}", self.scheme, self.authority().to_ascii_lowercase()),
        }
    }

    pub fn is_local(&self) -> bool {
        self.scheme == FILE_SCHEME && self.parent.is_none()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// Whether `uri` is a local path relative to some base directory.
pub fn is_relative_local_path(uri: &str) -> bool {
    !uri.is_empty() && !uri.contains("://") && !uri.contains("::") && !uri.starts_with('/')
}

fn invalid(uri: &str, reason: &str) -> ResolverError {
    ResolverError::InvalidUri {
        uri: uri.to_string(),
        reason: reason.to_string(),
    }
}
