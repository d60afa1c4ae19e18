//! Inclusive byte ranges for partial reads.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when the start of a range lies after its end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("invalid range: start {start} is greater than end {end}")]
pub struct InvalidRangeError {
    /// The requested first byte.
    pub start: u64,
    /// The requested last byte.
    pub end: u64,
}

/// An inclusive byte range of a file.
///
/// Both bounds are optional: a missing `start` reads from the beginning and a missing `end` reads
/// until the end of the file. `start: 0, end: 2000` therefore covers 2001 bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRange {
    /// Offset of the first byte to read.
    pub start: Option<u64>,
    /// Offset of the last byte to read, inclusive.
    pub end: Option<u64>,
}

impl StreamRange {
    /// The complete file.
    pub const FULL: Self = Self {
        start: None,
        end: None,
    };

    /// Creates a validated range.
    pub fn new(start: Option<u64>, end: Option<u64>) -> Result<Self, InvalidRangeError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    /// Checks that `start` does not exceed `end`.
    pub fn validate(&self) -> Result<(), InvalidRangeError> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start > end => Err(InvalidRangeError { start, end }),
            _ => Ok(()),
        }
    }

    /// Returns `true` if this range covers the whole file.
    pub fn is_full(&self) -> bool {
        self.start.unwrap_or(0) == 0 && self.end.is_none()
    }

    /// The offset of the first byte.
    pub fn offset(&self) -> u64 {
        self.start.unwrap_or(0)
    }

    /// The number of bytes requested, or `None` if the range is open-ended.
    pub fn requested_len(&self) -> Option<u64> {
        self.end
            .map(|end| end.saturating_sub(self.offset()).saturating_add(1))
    }

    /// The exclusive end offset, if bounded.
    pub fn end_exclusive(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_add(1))
    }

    /// Renders the range as an HTTP `Range` header value, or `None` for the whole file.
    pub fn to_http_header(&self) -> Option<String> {
        if self.is_full() {
            return None;
        }

        Some(match self.end {
            Some(end) => format!("bytes={}-{end}", self.offset()),
            None => format!("bytes={}-", self.offset()),
        })
    }

    /// Clamps the range to a file of `len` bytes.
    pub fn apply(&self, len: u64) -> Range<u64> {
        let start = self.offset().min(len);
        let end = self.end_exclusive().map_or(len, |end| end.min(len));
        start..end.max(start)
    }
}

impl fmt::Display for StreamRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}..={end}", self.offset()),
            None => write!(f, "{}..", self.offset()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_bounds() {
        assert!(StreamRange::new(Some(0), Some(2000)).is_ok());
        assert!(StreamRange::new(Some(5), Some(5)).is_ok());
        assert!(StreamRange::new(None, Some(0)).is_ok());
        assert_eq!(
            StreamRange::new(Some(10), Some(5)),
            Err(InvalidRangeError { start: 10, end: 5 })
        );
    }

    #[test]
    fn inclusive_length() {
        let range = StreamRange::new(Some(0), Some(2000)).unwrap();
        assert_eq!(range.requested_len(), Some(2001));
        assert_eq!(range.apply(32201), 0..2001);
        assert_eq!(range.apply(100), 0..100);
        assert_eq!(StreamRange::FULL.requested_len(), None);
    }

    #[test]
    fn apply_past_end_is_empty() {
        let range = StreamRange::new(Some(500), None).unwrap();
        assert_eq!(range.apply(100), 100..100);
    }

    #[test]
    fn http_header() {
        assert_eq!(StreamRange::FULL.to_http_header(), None);
        assert_eq!(
            StreamRange::new(Some(0), Some(2000)).unwrap().to_http_header(),
            Some("bytes=0-2000".into())
        );
        assert_eq!(
            StreamRange::new(None, Some(9)).unwrap().to_http_header(),
            Some("bytes=0-9".into())
        );
        assert_eq!(
            StreamRange::new(Some(7), None).unwrap().to_http_header(),
            Some("bytes=7-".into())
        );
    }
}
