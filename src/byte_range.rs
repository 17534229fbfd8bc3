//! Byte ranges.
//!
//! A [`ByteRange`] addresses a region of an object relative to its start or its end.
//! A range from the start has an offset and an optional length; an omitted length reads
//! to the end of the object.

use std::ops::Range;

use bytes::Bytes;
use serde::Serialize;

/// A byte offset.
pub type ByteOffset = u64;

/// A byte length.
pub type ByteLength = u64;

/// A byte range.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ByteRange {
    /// A byte range from the start.
    ///
    /// If the byte length is [`None`], reads to the end of the value.
    FromStart {
        offset: ByteOffset,
        length: Option<ByteLength>,
    },
    /// The last `length` bytes.
    Suffix { length: ByteLength },
}

impl ByteRange {
    /// The whole object.
    pub const FULL: ByteRange = ByteRange::FromStart {
        offset: 0,
        length: None,
    };

    pub fn new(offset: ByteOffset, length: Option<ByteLength>) -> Self {
        Self::FromStart { offset, length }
    }

    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    /// Return the start of the range given the size of the whole object.
    #[must_use]
    pub fn start(&self, size: u64) -> u64 {
        match self {
            Self::FromStart { offset, .. } => *offset,
            Self::Suffix { length } => size.saturating_sub(*length),
        }
    }

    /// Return the exclusive end of the range given the size of the whole object.
    #[must_use]
    pub fn end(&self, size: u64) -> u64 {
        match self {
            Self::FromStart { offset, length } => {
                length.map_or(size, |length| offset.saturating_add(length))
            }
            Self::Suffix { .. } => size,
        }
    }

    /// The number of bytes the range covers once the object size is known.
    #[must_use]
    pub fn length(&self, size: u64) -> u64 {
        self.end(size).saturating_sub(self.start(size))
    }

    /// The length of the range when it does not depend on the object size.
    pub fn known_length(&self) -> Option<u64> {
        match self {
            Self::FromStart { length, .. } => *length,
            Self::Suffix { length } => Some(*length),
        }
    }

    #[must_use]
    pub fn to_range(&self, size: u64) -> Range<u64> {
        self.start(size)..self.end(size)
    }

    pub fn is_valid_for(&self, size: u64) -> bool {
        match self {
            Self::FromStart { offset, length } => match length {
                Some(length) => offset.checked_add(*length).is_some_and(|end| end <= size),
                None => *offset <= size,
            },
            Self::Suffix { length } => *length <= size,
        }
    }

    /// Value of an HTTP `Range` header requesting this range.
    pub fn http_header(&self) -> Option<String> {
        match self {
            Self::FromStart {
                offset: 0,
                length: None,
            } => None,
            Self::FromStart {
                offset,
                length: None,
            } => Some(format!("bytes={offset}-")),
            Self::FromStart {
                offset,
                length: Some(length),
            } => Some(format!(
                "bytes={offset}-{}",
                offset.saturating_add(*length).saturating_sub(1)
            )),
            Self::Suffix { length } => Some(format!("bytes=-{length}")),
        }
    }

    /// Slice this range out of a complete object.
    ///
    /// Returns [`None`] if the range reaches beyond the end of `bytes`.
    pub fn slice(&self, bytes: &Bytes) -> Option<Bytes> {
        let size = bytes.len() as u64;
        if !self.is_valid_for(size) {
            return None;
        }
        let range = self.to_range(size);
        let start = usize::try_from(range.start).ok()?;
        let end = usize::try_from(range.end).ok()?;
        Some(bytes.slice(start..end))
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FromStart { offset, length } => write!(
                f,
                "{}..{}",
                if *offset == 0 {
                    String::new()
                } else {
                    offset.to_string()
                },
                length.map_or(String::new(), |length| offset.saturating_add(length).to_string())
            ),
            Self::Suffix { length } => write!(f, "-{length}.."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_ranges() {
        let byte_range = ByteRange::new(1, None);
        assert_eq!(byte_range.to_range(10), 1..10);
        assert_eq!(byte_range.length(10), 9);

        let byte_range = ByteRange::Suffix { length: 1 };
        assert_eq!(byte_range.to_range(10), 9..10);
        assert_eq!(byte_range.length(10), 1);

        let byte_range = ByteRange::new(1, Some(5));
        assert_eq!(byte_range.to_range(10), 1..6);
        assert_eq!(byte_range.length(10), 5);

        assert!(ByteRange::new(1, Some(5)).is_valid_for(6));
        assert!(!ByteRange::new(1, Some(5)).is_valid_for(2));
        assert!(ByteRange::Suffix { length: 5 }.is_valid_for(6));
        assert!(!ByteRange::Suffix { length: 5 }.is_valid_for(2));
    }

    #[test]
    fn byte_range_display() {
        assert_eq!(ByteRange::FULL.to_string(), "..");
        assert_eq!(ByteRange::new(5, None).to_string(), "5..");
        assert_eq!(ByteRange::new(5, Some(2)).to_string(), "5..7");
        assert_eq!(ByteRange::Suffix { length: 2 }.to_string(), "-2..");
    }

    #[test]
    fn ranges_near_u64_max_saturate() {
        let range = ByteRange::new(u64::MAX, Some(10));
        assert_eq!(range.end(4), u64::MAX);
        assert!(!range.is_valid_for(4));
        assert_eq!(range.to_string(), format!("{}..{}", u64::MAX, u64::MAX));
        assert_eq!(
            range.http_header(),
            Some(format!("bytes={}-{}", u64::MAX, u64::MAX - 1))
        );
    }

    #[test]
    fn http_range_headers() {
        assert_eq!(ByteRange::FULL.http_header(), None);
        assert_eq!(
            ByteRange::new(10, None).http_header().as_deref(),
            Some("bytes=10-")
        );
        assert_eq!(
            ByteRange::new(10, Some(5)).http_header().as_deref(),
            Some("bytes=10-14")
        );
        assert_eq!(
            ByteRange::Suffix { length: 4 }.http_header().as_deref(),
            Some("bytes=-4")
        );
    }

    #[test]
    fn slice_checks_bounds() {
        let data = Bytes::from_static(b"0123456789");
        assert_eq!(
            ByteRange::new(3, Some(3)).slice(&data).unwrap(),
            Bytes::from_static(b"345")
        );
        assert_eq!(
            ByteRange::Suffix { length: 2 }.slice(&data).unwrap(),
            Bytes::from_static(b"89")
        );
        assert!(ByteRange::new(8, Some(5)).slice(&data).is_none());
    }
}
