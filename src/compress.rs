//! Response compression negotiation and the native compressor ABI (§4.9, §6).
//!
//! The actual compressor is an external collaborator — a native shared
//! library reached through a block-oriented C ABI, the same shape the
//! teacher crate already uses for `socket2` (a thin safe wrapper over a
//! platform-native facility it doesn't implement itself). This module ships
//! the trait, the `Accept-Encoding` negotiation logic, and the response path
//! that activates once a codec has been chosen; it does not ship a codec.

use crate::limits::{CompressionLevel, CompressionLimits};
use memchr::memchr;

/// Codec negotiated from a request's `Accept-Encoding` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Gzip,
    Deflate,
    Brotli,
    Lz4,
}

impl Encoding {
    /// Wire token used in `Content-Encoding` / `Accept-Encoding`.
    pub const fn token(self) -> &'static [u8] {
        match self {
            Encoding::Gzip => b"gzip",
            Encoding::Deflate => b"deflate",
            Encoding::Brotli => b"br",
            Encoding::Lz4 => b"lz4",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Encoding::Gzip => 0b0001,
            Encoding::Deflate => 0b0010,
            Encoding::Brotli => 0b0100,
            Encoding::Lz4 => 0b1000,
        }
    }
}

/// Bitmask of codecs a [`CompressorManager`] is able to produce, in
/// preference order from most to least preferred when several are
/// acceptable to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedEncodings(u8);

impl SupportedEncodings {
    pub const NONE: Self = Self(0);

    pub const fn with(mut self, encoding: Encoding) -> Self {
        self.0 |= encoding.bit();
        self
    }

    const fn has(self, encoding: Encoding) -> bool {
        self.0 & encoding.bit() != 0
    }
}

/// Picks the best codec both the server supports and the client accepts.
///
/// Scans `accept_encoding` (the raw `Accept-Encoding` header value) for each
/// of `supported`'s codecs in server-preference order (`Brotli`, `Gzip`,
/// `Deflate`, `Lz4`) and returns the first match. A bare `q=0` weight for a
/// token is treated as "not accepted"; any other weight (or none) accepts
/// it, since full quality-value ranking is out of scope for this server.
pub fn negotiate(accept_encoding: &[u8], supported: SupportedEncodings) -> Option<Encoding> {
    const PREFERENCE: [Encoding; 4] = [
        Encoding::Brotli,
        Encoding::Gzip,
        Encoding::Deflate,
        Encoding::Lz4,
    ];

    PREFERENCE
        .into_iter()
        .filter(|e| supported.has(*e))
        .find(|e| token_accepted(accept_encoding, e.token()))
}

fn token_accepted(accept_encoding: &[u8], token: &[u8]) -> bool {
    for entry in accept_encoding.split(|&b| b == b',') {
        let entry = trim(entry);
        let (name, params) = match memchr(b';', entry) {
            Some(pos) => (trim(&entry[..pos]), &entry[pos + 1..]),
            None => (entry, &b""[..]),
        };

        if !name.eq_ignore_ascii_case(token) {
            continue;
        }

        return !params_reject(params);
    }

    false
}

fn params_reject(params: &[u8]) -> bool {
    let params = trim(params);
    params.starts_with(b"q=0") && !params.starts_with(b"q=0.") || params == b"q=0"
}

fn trim(mut value: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = value {
        value = rest;
    }
    value
}

/// Decides whether a response body of `body_len` bytes should be compressed
/// at all, per [`CompressionLimits::compression_minimum`]/
/// [`compression_limit`](CompressionLimits::compression_limit).
pub fn should_compress(body_len: usize, limits: &CompressionLimits) -> bool {
    !matches!(limits.level, CompressionLevel::None)
        && body_len >= limits.compression_minimum
        && body_len <= limits.compression_limit
}

/// Error codes returned by the native compressor ABI (§6), mirrored verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CompressorError {
    Ok = 0,
    /// The caller's output block was too small; `compress_block` has written
    /// as much as fit and expects to be called again with a fresh block.
    Overflow = 1,
    Invalid = 2,
    Internal = 3,
}

/// Safe wrapper over a native, block-oriented compressor ABI.
///
/// Models the shared-library contract from §6 exactly: the caller allocates
/// a block with [`get_block_size`](Self::get_block_size), asks
/// [`compress_block`](Self::compress_block) to fill it, and on
/// [`CompressorError::Overflow`] allocates another block and calls again —
/// the same refill-retry loop a C caller of the native ABI would run. No
/// implementation ships with this crate (see module docs); a host installs
/// one via [`HttpConfig::compressor`](crate::limits::HttpConfig::compressor).
pub trait CompressorManager: Send + Sync {
    /// Codecs this instance can produce.
    fn supported(&self) -> SupportedEncodings;

    /// Preferred output block size for `encoding`, in bytes.
    fn get_block_size(&self, encoding: Encoding) -> usize;

    /// Compresses as much of `input` as fits in `output`, returning the
    /// number of input bytes consumed and output bytes written. On
    /// [`CompressorError::Overflow`] the caller is expected to provide a
    /// fresh `output` block (of at least [`Self::get_block_size`] bytes) and
    /// call again with the unconsumed remainder of `input`.
    fn compress_block(
        &self,
        encoding: Encoding,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(usize, usize), CompressorError>;

    /// Compresses the whole of `input`, looping on [`CompressorError::Overflow`].
    fn compress_all(&self, encoding: Encoding, mut input: &[u8]) -> Result<Vec<u8>, CompressorError> {
        let mut out = Vec::with_capacity(input.len() / 2 + 64);
        let mut block = vec![0u8; self.get_block_size(encoding)];

        loop {
            match self.compress_block(encoding, input, &mut block) {
                Ok((consumed, produced)) => {
                    out.extend_from_slice(&block[..produced]);
                    input = &input[consumed..];
                    if input.is_empty() {
                        return Ok(out);
                    }
                }
                Err(CompressorError::Overflow) => {
                    block = vec![0u8; self.get_block_size(encoding)];
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supported() -> SupportedEncodings {
        SupportedEncodings::NONE
            .with(Encoding::Gzip)
            .with(Encoding::Brotli)
    }

    #[test]
    fn negotiates_preferred_codec() {
        assert_eq!(
            negotiate(b"gzip, br", supported()),
            Some(Encoding::Brotli)
        );
    }

    #[test]
    fn falls_back_to_only_supported_match() {
        assert_eq!(negotiate(b"deflate, gzip", supported()), Some(Encoding::Gzip));
    }

    #[test]
    fn no_acceptable_codec() {
        assert_eq!(negotiate(b"deflate", supported()), None);
    }

    #[test]
    fn q_zero_rejects_token() {
        assert_eq!(negotiate(b"br;q=0, gzip", supported()), Some(Encoding::Gzip));
    }

    #[test]
    fn nonzero_weight_still_accepts() {
        assert_eq!(negotiate(b"br;q=0.5", supported()), Some(Encoding::Brotli));
    }

    #[test]
    fn should_compress_respects_bounds() {
        let limits = CompressionLimits {
            compression_minimum: 256,
            compression_limit: 1024,
            ..CompressionLimits::default()
        };

        assert!(!should_compress(10, &limits));
        assert!(should_compress(500, &limits));
        assert!(!should_compress(2000, &limits));
    }

    #[test]
    fn should_compress_respects_none_level() {
        let limits = CompressionLimits {
            level: CompressionLevel::None,
            ..CompressionLimits::default()
        };

        assert!(!should_compress(500, &limits));
    }
}
