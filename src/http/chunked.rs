//! Chunked transfer-coding decoder ([RFC 7230, Section 4.1](https://tools.ietf.org/html/rfc7230#section-4.1)).
//!
//! Operates on an already-buffered slice rather than pulling more bytes off
//! the wire: the connection's fixed-size read window is expected to hold the
//! whole chunked body in one fill, matching the zero-allocation,
//! buffer-reuse design the rest of the request parser follows. Chunk framing
//! (size lines, `\r\n` separators) is stripped out while decoding, so the
//! result can no longer alias the original window and is returned owned.

use crate::errors::{ErrorKind, LimitExceeded, Malformed};
use memchr::memchr;

pub(crate) struct ChunkedDecoder;

impl ChunkedDecoder {
    /// Decodes a complete chunked body, enforcing `max_size` on the
    /// running decoded length after every chunk (not the encoded length,
    /// since chunk-size lines and trailing CRLFs don't count against the
    /// upload limit).
    pub(crate) fn decode(mut data: &[u8], max_size: usize) -> Result<Vec<u8>, ErrorKind> {
        let mut out = Vec::new();

        loop {
            let (size, rest) = Self::read_chunk_size(data)?;
            data = rest;

            if size == 0 {
                return Self::skip_trailer(data).map(|_| out);
            }

            if data.len() < size + 2 {
                return Err(ErrorKind::Malformed(Malformed::InvalidChunkEncoding));
            }

            let (chunk, rest) = data.split_at(size);
            if rest.get(..2) != Some(b"\r\n") {
                return Err(ErrorKind::Malformed(Malformed::InvalidChunkEncoding));
            }

            out.extend_from_slice(chunk);
            if out.len() > max_size {
                return Err(ErrorKind::LimitExceeded(LimitExceeded::BodyTooLarge));
            }

            data = &rest[2..];
        }
    }

    // Reads `<hex-size>[;ext...]\r\n`, returning the decoded size and the
    // remainder of the buffer positioned right after the line.
    fn read_chunk_size(data: &[u8]) -> Result<(usize, &[u8]), ErrorKind> {
        let line_end =
            memchr(b'\n', data).ok_or(ErrorKind::Malformed(Malformed::InvalidChunkEncoding))?;

        let line = match data[..line_end].last() {
            Some(b'\r') => &data[..line_end - 1],
            _ => return Err(ErrorKind::Malformed(Malformed::InvalidChunkEncoding)),
        };

        let hex = match memchr(b';', line) {
            Some(pos) => &line[..pos],
            None => line,
        };

        let size = usize::from_str_radix(
            std::str::from_utf8(hex).map_err(|_| {
                ErrorKind::Malformed(Malformed::InvalidChunkEncoding)
            })?,
            16,
        )
        .map_err(|_| ErrorKind::Malformed(Malformed::InvalidChunkEncoding))?;

        Ok((size, &data[line_end + 1..]))
    }

    // After the terminal `0\r\n` chunk there may be trailer headers,
    // followed by a final blank line. Trailers aren't surfaced to the
    // handler; this just validates the framing is well-formed.
    fn skip_trailer(mut data: &[u8]) -> Result<(), ErrorKind> {
        loop {
            let line_end = memchr(b'\n', data)
                .ok_or(ErrorKind::Malformed(Malformed::InvalidChunkEncoding))?;

            let blank = matches!(data[..line_end].last(), Some(b'\r')) && line_end <= 1;
            data = &data[line_end + 1..];

            if blank {
                return Ok(());
            }
        }
    }
}
