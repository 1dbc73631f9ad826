//! `Range: bytes=` request header parsing ([RFC 7233, Section 2.1](https://tools.ietf.org/html/rfc7233#section-2.1)).
//!
//! Only single-range requests are modeled (`bytes=0-499`, `bytes=500-`,
//! `bytes=-500`); a `Range` header naming multiple ranges is rejected the
//! same way an out-of-bounds one is, as `RangeNotSatisfiable` — multipart
//! byte-range responses are out of scope.

use crate::errors::{ErrorKind, LimitExceeded};
use crate::http::types::slice_to_usize;
use memchr::memchr;

/// A single byte-range request, already resolved against the resource's
/// total length by [`HttpRangeType::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HttpRangeType {
    /// `bytes=start-end`, both bounds inclusive.
    FromStart { start: usize, end: usize },
    /// `bytes=start-`, to the end of the resource.
    FromEnd { start: usize },
    /// `bytes=-suffix_len`, the last `suffix_len` bytes of the resource.
    FullRange { suffix_len: usize },
}

impl HttpRangeType {
    /// Parses a `Range` header value and resolves it against `total_len`,
    /// returning the concrete `(start, end)` inclusive byte offsets.
    pub(crate) fn parse(value: &[u8], total_len: usize) -> Result<(usize, usize), ErrorKind> {
        let spec = value
            .strip_prefix(b"bytes=")
            .ok_or(ErrorKind::LimitExceeded(LimitExceeded::RangeNotSatisfiable))?;

        if memchr(b',', spec).is_some() {
            return Err(ErrorKind::LimitExceeded(LimitExceeded::RangeNotSatisfiable));
        }

        let dash = memchr(b'-', spec)
            .ok_or(ErrorKind::LimitExceeded(LimitExceeded::RangeNotSatisfiable))?;

        let (start_raw, end_raw) = (&spec[..dash], &spec[dash + 1..]);

        let parsed = match (start_raw.is_empty(), end_raw.is_empty()) {
            (true, true) => return Err(ErrorKind::LimitExceeded(LimitExceeded::RangeNotSatisfiable)),
            (true, false) => {
                let suffix_len = slice_to_usize(end_raw)
                    .ok_or(ErrorKind::LimitExceeded(LimitExceeded::RangeNotSatisfiable))?;
                Self::FullRange { suffix_len }
            }
            (false, true) => {
                let start = slice_to_usize(start_raw)
                    .ok_or(ErrorKind::LimitExceeded(LimitExceeded::RangeNotSatisfiable))?;
                Self::FromEnd { start }
            }
            (false, false) => {
                let start = slice_to_usize(start_raw)
                    .ok_or(ErrorKind::LimitExceeded(LimitExceeded::RangeNotSatisfiable))?;
                let end = slice_to_usize(end_raw)
                    .ok_or(ErrorKind::LimitExceeded(LimitExceeded::RangeNotSatisfiable))?;
                Self::FromStart { start, end }
            }
        };

        parsed.resolve(total_len)
    }

    fn resolve(self, total_len: usize) -> Result<(usize, usize), ErrorKind> {
        let unsatisfiable = || ErrorKind::LimitExceeded(LimitExceeded::RangeNotSatisfiable);

        if total_len == 0 {
            return Err(unsatisfiable());
        }

        match self {
            Self::FromStart { start, end } => {
                if start > end || start >= total_len {
                    return Err(unsatisfiable());
                }
                Ok((start, end.min(total_len - 1)))
            }
            Self::FromEnd { start } => {
                if start >= total_len {
                    return Err(unsatisfiable());
                }
                Ok((start, total_len - 1))
            }
            Self::FullRange { suffix_len } => {
                if suffix_len == 0 {
                    return Err(unsatisfiable());
                }
                let start = total_len.saturating_sub(suffix_len);
                Ok((start, total_len - 1))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_start() {
        assert_eq!(HttpRangeType::parse(b"bytes=0-499", 1000), Ok((0, 499)));
        assert_eq!(HttpRangeType::parse(b"bytes=500-999", 1000), Ok((500, 999)));
    }

    #[test]
    fn clamps_end_to_total_len() {
        assert_eq!(HttpRangeType::parse(b"bytes=0-9999", 1000), Ok((0, 999)));
    }

    #[test]
    fn from_end() {
        assert_eq!(HttpRangeType::parse(b"bytes=900-", 1000), Ok((900, 999)));
    }

    #[test]
    fn suffix_range() {
        assert_eq!(HttpRangeType::parse(b"bytes=-500", 1000), Ok((500, 999)));
    }

    #[test]
    fn suffix_larger_than_total() {
        assert_eq!(HttpRangeType::parse(b"bytes=-5000", 1000), Ok((0, 999)));
    }

    #[test]
    fn out_of_bounds() {
        assert_eq!(
            HttpRangeType::parse(b"bytes=1000-1999", 1000),
            Err(ErrorKind::LimitExceeded(LimitExceeded::RangeNotSatisfiable))
        );
    }

    #[test]
    fn start_after_end() {
        assert_eq!(
            HttpRangeType::parse(b"bytes=500-100", 1000),
            Err(ErrorKind::LimitExceeded(LimitExceeded::RangeNotSatisfiable))
        );
    }

    #[test]
    fn multi_range_rejected() {
        assert_eq!(
            HttpRangeType::parse(b"bytes=0-100,200-300", 1000),
            Err(ErrorKind::LimitExceeded(LimitExceeded::RangeNotSatisfiable))
        );
    }

    #[test]
    fn missing_unit_rejected() {
        assert_eq!(
            HttpRangeType::parse(b"0-499", 1000),
            Err(ErrorKind::LimitExceeded(LimitExceeded::RangeNotSatisfiable))
        );
    }

    #[test]
    fn empty_resource() {
        assert_eq!(
            HttpRangeType::parse(b"bytes=0-0", 0),
            Err(ErrorKind::LimitExceeded(LimitExceeded::RangeNotSatisfiable))
        );
    }
}
