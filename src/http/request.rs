use crate::{
    errors::*,
    http::chunked::ChunkedDecoder,
    http::types::{self, BodyKind, Header, HeaderMap},
    limits::ReqLimits,
    query::Query,
    server::connection::HttpConnection,
    ConnectionData, Handler, Method, Url, Version,
};
use memchr::{memchr, memchr_iter};
use std::{
    io, mem,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{io::AsyncReadExt, net::TcpStream, time::sleep};

const UNSET_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

/// High-performance HTTP request representation.
///
/// Uses strategic memory alignment for optimal cache performance.
/// All data is zero-copy referenced from the original input.
#[derive(Debug, Clone, PartialEq)]
#[repr(align(128))]
pub struct Request {
    method: Method,
    url: Url,
    version: Version,
    headers: HeaderMap,
    body: BodyKind,
    pub(crate) client_addr: SocketAddr,
    pub(crate) server_addr: SocketAddr,
}

impl Request {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            url: Url::new(limits),
            version: Version::Http11,
            headers: HeaderMap::new(limits.header_count),
            body: BodyKind::None,
            client_addr: UNSET_ADDR,
            server_addr: UNSET_ADDR,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.url.clear();
        self.version = Version::Http11;
        self.headers.reset();
        self.body = BodyKind::None;
        // client_addr/server_addr persist across requests on the same
        // connection; they're re-assigned once per accepted socket, not
        // per request, so reset() leaves them alone.
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    /// Uses linear search.
    ///
    /// # Arguments
    /// - `name`: Header name bytes (e.g., `b"content-type"`)
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// Returns the value of the `Content-Length` header if present.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    /// Returns the request body if present.
    #[inline(always)]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_bytes()
    }

    /// Returns the peer address of the TCP connection this request arrived on.
    #[inline(always)]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Returns the local address of the listener that accepted this connection.
    ///
    /// Virtual-host routing uses this (rather than a `Host` header alone) to
    /// disambiguate which bound listener a request arrived on when a single
    /// process binds more than one socket.
    #[inline(always)]
    pub const fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Resolves this request's `Range` header against a resource of
    /// `total_len` bytes, returning the inclusive `(start, end)` byte
    /// offsets to serve.
    ///
    /// Returns `None` when there is no `Range` header at all (the caller
    /// should serve the full resource); `Some(Err(_))` when one is present
    /// but malformed, names more than one range, or falls outside
    /// `total_len` (the caller should answer `416 Range Not Satisfiable`).
    pub fn range(&self, total_len: usize) -> Option<Result<(usize, usize), RangeNotSatisfiable>> {
        let header = self.header(b"range")?;
        Some(
            crate::http::range::HttpRangeType::parse(header, total_len)
                .map_err(|_| RangeNotSatisfiable),
        )
    }

    /// Parses this request's body as `multipart/form-data`, enforcing
    /// `max_uploads` on the number of parts.
    ///
    /// Returns [`MultipartError::NotMultipart`] when the request has no
    /// `Content-Type: multipart/form-data` header (or no body at all); the
    /// parsed parts borrow from the request body, so they live as long as
    /// `self`.
    pub fn multipart(&self, max_uploads: usize) -> Result<Vec<UploadField<'_>>, MultipartError> {
        let content_type = self
            .header(b"content-type")
            .ok_or(MultipartError::NotMultipart)?;
        if !content_type.starts_with(b"multipart/form-data") {
            return Err(MultipartError::NotMultipart);
        }

        let boundary = crate::http::multipart::MultipartParser::boundary(content_type)
            .ok_or(MultipartError::Malformed)?;
        let body = self.body().ok_or(MultipartError::Malformed)?;

        crate::http::multipart::MultipartParser::parse(body, boundary, max_uploads)
            .map(|uploads| {
                uploads
                    .into_iter()
                    .map(|u| UploadField {
                        name: u.name,
                        content_type: u.content_type,
                        filename: u.filename,
                        data: u.data,
                    })
                    .collect()
            })
            .map_err(|err| match err {
                ErrorKind::LimitExceeded(LimitExceeded::TooManyUploads) => {
                    MultipartError::TooManyUploads
                }
                _ => MultipartError::Malformed,
            })
    }
}

/// A `Range` header names a malformed, multi-range, or out-of-bounds range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeNotSatisfiable;

/// Why [`Request::multipart`] could not produce a part list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartError {
    /// The request isn't `multipart/form-data` (or carries no body at all).
    NotMultipart,
    /// The body, boundary, or a part's framing is malformed.
    Malformed,
    /// The body named more parts than the caller's `max_uploads`.
    TooManyUploads,
}

/// One part of a `multipart/form-data` body, borrowed from the request body.
#[derive(Debug, PartialEq)]
pub struct UploadField<'a> {
    pub name: &'a [u8],
    pub content_type: Option<&'a [u8]>,
    pub filename: Option<&'a [u8]>,
    pub data: &'a [u8],
}

// If you don't like using HttpConnection instead of transmitting all the
// values, then you can't even imagine what happened here...
// It's a pity now that you can understand this code (when passing all the
//  values, I didn't understand it myself):(
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn parse(&mut self) -> Result<Version, ErrorKind> {
        self.parse_method()?;
        self.parse_url()?;
        self.check_version()?;

        self.parse_headers()?;
        self.check_host()?;
        self.check_expect()?;
        self.check_body()?;

        Ok(self.request.version)
    }
}

// Parse first line
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    // Basic methods
    #[inline]
    fn parse_method(&mut self) -> Result<(), ErrorKind> {
        // "OPTIONS " - The longest possible method with a space (8 bytes)
        let slice = self
            .parser
            .get_slice(0, 8)
            .ok_or(ErrorKind::Malformed(Malformed::InvalidMethod))?;

        (self.request.method, self.parser.position) = Method::from_bytes(slice)?;
        Ok(())
    }

    #[inline]
    // Cannot replace with `get_slice` or `find_slice` method
    // due to ownership error. And there is no need to use `into_static`
    fn parse_url(&mut self) -> Result<(), ErrorKind> {
        let [start, posit] = match self
            .parser
            .find_char(self.req_limits.precalc.url_size_memchr, b' ')
        {
            Some(pos) => [self.parser.position + 1, pos],
            None => return Err(ErrorKind::Malformed(Malformed::InvalidUrl)),
        };

        let parser = &mut self.parser;
        let url = &mut self.request.url;

        let mut last = 0;
        let start_pos = start + posit;
        let slice_url = &parser.buffer[start..start_pos];

        if slice_url.is_empty() || parser.buffer[start - 1] != b'/' {
            return Err(ErrorKind::Malformed(Malformed::InvalidUrl));
        }

        for index in memchr_iter(b'/', slice_url) {
            if url.parts.len() == self.req_limits.url_parts {
                return Err(ErrorKind::Malformed(Malformed::InvalidUrl));
            }

            let slice_part = parser
                .get_slice_static(start + last, index - last)
                .ok_or(ErrorKind::Malformed(Malformed::InvalidUrl))?;

            if !slice_part.is_empty() {
                url.parts.push(slice_part);
            }
            last = index + 1;
        }

        let range = [start + last, (posit - last).saturating_sub(1)];
        let (end, url_middle) = match parser.find_char(posit, b'?') {
            Some(q_pos) => {
                let slice = parser
                    .get_slice_static(q_pos, (range[0] + range[1]).saturating_sub(q_pos))
                    .ok_or(ErrorKind::Malformed(Malformed::InvalidUrl))?;
                let limit = url.query_parts.capacity();

                Query::parse_into(&mut url.query_parts, slice, limit)?;
                url.query = Some(slice);

                (q_pos, q_pos)
            }
            None => (posit, posit),
        };

        let slice = parser
            .get_slice_static(range[0], (parser.position + end).saturating_sub(range[0]))
            .ok_or(ErrorKind::Malformed(Malformed::InvalidUrl))?;

        if !slice.is_empty() {
            url.parts.push(slice);
        }

        url.path = parser
            .get_slice_static(parser.position, url_middle)
            .ok_or(ErrorKind::Malformed(Malformed::InvalidUrl))?;
        url.target = parser
            .get_slice_static(parser.position, posit)
            .ok_or(ErrorKind::Malformed(Malformed::InvalidUrl))?;

        parser.update_position(posit);

        Ok(())
    }

    #[inline]
    fn check_version(&mut self) -> Result<(), ErrorKind> {
        // "HTTP/1.X\r\n" - HTTP version with line break (10 bytes)
        let slice = self
            .parser
            .find_slice(10, b'\n')
            .ok_or(ErrorKind::Malformed(Malformed::InvalidVersion))?;

        if !matches!(slice.len(), 8 | 9) {
            return Err(ErrorKind::Malformed(Malformed::InvalidVersion));
        }

        (self.response.version, self.response.keep_alive) = Version::from_bytes(&slice[..8])?;
        self.request.version = self.response.version;

        // Check for the use of the '\r' character
        self.parser.has_crlf = slice.last() == Some(&b'\r');

        Ok(())
    }

    // Auxiliary methods
    #[inline]
    fn check_host(&mut self) -> Result<(), ErrorKind> {
        if self.request.version == Version::Http11 && self.request.header(b"host").is_none() {
            return Err(ErrorKind::Malformed(Malformed::MissingHost));
        }
        Ok(())
    }

    // `Expect: 100-continue` (§4.4): when the client names an upload
    // intent too large for `MaxUploadSize` (or uploads are disabled
    // entirely, `MaxUploadSize == 0`), the expectation-aware response is
    // 417 rather than the plain 413 `check_body`/`parse_content_length`
    // would otherwise produce. When the upload is admissible, flag the
    // response so the connection loop writes a `100 Continue` preamble
    // ahead of the real response.
    #[inline]
    fn check_expect(&mut self) -> Result<(), ErrorKind> {
        if let Some(len) = self.request.headers.content_length {
            if len > self.req_limits.body_size {
                return Err(ErrorKind::LimitExceeded(if self.request.headers.expect_continue {
                    LimitExceeded::ExpectationFailed
                } else {
                    LimitExceeded::BodyTooLarge
                }));
            }
        }

        if self.request.headers.expect_continue {
            self.response.needs_continue_preamble = true;
        }

        Ok(())
    }
}

// Parse headers
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    // Basic methods
    #[inline]
    fn parse_headers(&mut self) -> Result<(), ErrorKind> {
        for _ in 0..=self.req_limits.header_count {
            let Some(header) = self.parse_header()? else {
                return Ok(());
            };

            if !self.parse_special_header(&header)? {
                self.request.headers.headers.push(header);
            }
        }

        Err(ErrorKind::LimitExceeded(LimitExceeded::TooManyHeaders))
    }

    #[inline]
    fn parse_header(&mut self) -> Result<Option<Header>, ErrorKind> {
        let parser = &mut self.parser;
        // HeaderName: Someone=data\r\n
        //                            |
        let end = parser
            .find_char(self.req_limits.precalc.h_line, b'\n')
            .ok_or(ErrorKind::Malformed(Malformed::InvalidHeader))?;

        match parser.get_slice(parser.position + end - 1, 2) {
            Some([b'\r', b'\n']) if parser.has_crlf => {}
            Some([_, b'\n']) if !parser.has_crlf => {}
            _ => return Err(ErrorKind::Malformed(Malformed::InvalidHeader)),
        }

        // HeaderName: Someone=data\r\n
        //           |
        let Some(split) = parser.find_char(end, b':') else {
            self.check_end_of_headers(end)?;
            return Ok(None);
        };

        if parser.get_slice(parser.position + split, 2) != Some(b": ") {
            return Err(ErrorKind::Malformed(Malformed::InvalidHeader));
        }

        let value_start = split + 2;
        let len_value = end - value_start - parser.has_crlf as usize;

        if split > self.req_limits.header_name_size || len_value > self.req_limits.header_value_size
        {
            return Err(ErrorKind::Malformed(Malformed::InvalidHeader));
        }

        let name = {
            let name = parser
                .get_slice_mut(parser.position, split)
                .ok_or(ErrorKind::Malformed(Malformed::InvalidHeader))?;

            if name.is_empty() {
                return Err(ErrorKind::Malformed(Malformed::InvalidHeader));
            }

            types::to_lower_case(name);
            unsafe { Parser::into_static(name) }
        };

        let value = parser
            .get_slice_static(parser.position + value_start, len_value)
            .ok_or(ErrorKind::Malformed(Malformed::InvalidHeader))?;

        parser.update_position(end);

        Ok(Some(Header::new(name, value)))
    }

    #[inline]
    fn parse_special_header(&mut self, header: &Header) -> Result<bool, ErrorKind> {
        match header.name {
            b"content-length" => self.parse_content_length(header.value),
            b"connection" => self.parse_connection(header.value),
            b"transfer-encoding" => self.parse_transfer_encoding(header.value),
            b"expect" => self.parse_expect(header.value),
            _ => return Ok(false),
        }
        .map(|_| true)
    }

    // Auxiliary methods
    #[inline]
    fn check_end_of_headers(&mut self, start: usize) -> Result<(), ErrorKind> {
        let parser = &mut self.parser;
        // [\r, \n, \r, \n] or [x, x, \n, \n]
        let p_end = parser
            .get_slice(parser.position + start - 3, 4)
            .ok_or(ErrorKind::Malformed(Malformed::InvalidHeader))?;

        if !match parser.has_crlf {
            true => p_end.ends_with(b"\r\n\r\n"),
            false => p_end.ends_with(b"\n\n"),
        } {
            return Err(ErrorKind::Malformed(Malformed::InvalidHeader));
        }

        parser.position += parser.has_crlf as usize + 1;

        Ok(())
    }

    // The `MaxUploadSize` bound is enforced later, by `check_expect`, once
    // every header (including a possible `Expect: 100-continue`) has been
    // seen — headers can arrive in either order, and an over-limit upload
    // is a plain 413 without `Expect`, but 417 with it.
    #[inline]
    fn parse_content_length(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let len = types::slice_to_usize(value)
            .ok_or(ErrorKind::Malformed(Malformed::InvalidContentLength))?;
        self.request.headers.content_length = Some(len);
        Ok(())
    }

    // `Expect: 100-continue` (§4.4). Any other `Expect` value is not
    // recognized by this server; RFC 9110 permits rejecting it, but this
    // crate simply ignores unrecognized expectations rather than failing
    // the request outright.
    #[inline]
    fn parse_expect(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        self.request.headers.expect_continue = value.eq_ignore_ascii_case(b"100-continue");
        Ok(())
    }

    #[inline]
    fn parse_connection(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let mut normalized = [0; 10];
        let len = types::into_lower_case(value, &mut normalized);

        match &normalized[..len] {
            b"keep-alive" => self.response.keep_alive = true,
            b"close" => self.response.keep_alive = false,
            _ => return Err(ErrorKind::Malformed(Malformed::InvalidConnection)),
        }

        Ok(())
    }

    // `Content-Length` and `Transfer-Encoding` are mutually exclusive; since
    // headers can arrive in either order, the clash is only caught once both
    // have been seen (in `check_body`, after all headers are parsed).
    #[inline]
    fn parse_transfer_encoding(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let mut normalized = [0; 7];
        let len = types::into_lower_case(value, &mut normalized);

        match &normalized[..len] {
            b"chunked" => {
                self.request.headers.chunked = true;
                Ok(())
            }
            _ => Err(ErrorKind::Malformed(Malformed::InvalidChunkEncoding)),
        }
    }
}

// Parse body
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn check_body(&mut self) -> Result<(), ErrorKind> {
        if self.request.headers.content_length.is_some() && self.request.headers.chunked {
            return Err(ErrorKind::Malformed(Malformed::InvalidChunkEncoding));
        }

        if self.request.headers.chunked {
            return self.check_chunked_body();
        }

        let parser = &self.parser;
        let body = parser.len - parser.position;

        match self.request.headers.content_length {
            Some(len) if len == body => {
                let slice = parser.get_slice_static(parser.position, len).ok_or(
                    ErrorKind::Malformed(Malformed::BodyMismatch {
                        expected: len,
                        available: body,
                    }),
                )?;

                self.request.body = BodyKind::Fixed(slice);
                Ok(())
            }
            Some(len) => Err(ErrorKind::Malformed(Malformed::BodyMismatch {
                expected: len,
                available: body,
            })),
            None => match body == 0 {
                true => Ok(()),
                false => Err(ErrorKind::Malformed(Malformed::UnexpectedBody(body))),
            },
        }
    }

    #[inline]
    fn check_chunked_body(&mut self) -> Result<(), ErrorKind> {
        let parser = &self.parser;
        let remaining = parser
            .get_slice(parser.position, parser.len - parser.position)
            .unwrap_or(&[]);

        let decoded = ChunkedDecoder::decode(remaining, self.req_limits.body_size)?;
        self.request.body = BodyKind::Buffered(decoded);
        Ok(())
    }
}

//

#[derive(Debug, Clone, PartialEq)]
#[repr(align(64))]
pub(crate) struct Parser {
    position: usize,
    len: usize,
    has_crlf: bool,
    buffer: Box<[u8]>,
}

impl Parser {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        let buffer = vec![0; limits.precalc.buffer].into_boxed_slice();

        Parser {
            position: 0,
            len: 0,
            has_crlf: false,
            buffer,
        }
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(limits: &ReqLimits, value: V) -> Self {
        let mut buffer = vec![0; limits.precalc.buffer];

        let value = value.as_ref();
        buffer[0..value.len()].copy_from_slice(value);

        Parser {
            position: 0,
            len: value.len(),
            has_crlf: false,
            buffer: buffer.into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.position = 0;
        self.len = 0;
        self.has_crlf = false;
        self.buffer.fill(0);
    }
}

// Work with Buffer
impl Parser {
    // Reading level
    #[inline]
    pub(crate) async fn fill_buffer(
        &mut self,
        stream: &mut TcpStream,
        time: Duration,
    ) -> Result<usize, io::Error> {
        tokio::select! {
            biased;

            read_result = stream.read(&mut self.buffer) => {
                let n = read_result?;
                self.len = n;
                Ok(n)
            }
            _ = sleep(time) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
        }
    }

    // Search level
    #[inline]
    fn find_slice(&mut self, limit: usize, delimiter: u8) -> Option<&[u8]> {
        let step = self.find_char(limit, delimiter)?;
        let last_index = self.update_position(step);
        let slice = self.get_slice(last_index, step)?;
        Some(slice)
    }

    #[inline]
    fn find_char(&self, step: usize, delimiter: u8) -> Option<usize> {
        let slice = self.get_slice(self.position, step)?;
        memchr(delimiter, slice)
    }

    // Low level
    #[inline(always)]
    fn get_slice(&self, start: usize, step: usize) -> Option<&[u8]> {
        self.buffer.get(start..start + step)
    }

    #[inline(always)]
    fn get_slice_mut(&mut self, start: usize, step: usize) -> Option<&mut [u8]> {
        self.buffer.get_mut(start..start + step)
    }

    #[inline(always)]
    fn update_position(&mut self, step: usize) -> usize {
        let old = self.position;
        self.position += step + 1;
        old
    }

    // Unsafe level
    #[inline(always)]
    fn get_slice_static(&self, start: usize, step: usize) -> Option<&'static [u8]> {
        let value = self.get_slice(start, step)?;
        unsafe { Some(Self::into_static(value)) }
    }

    #[inline(always)]
    // SAFETY: into_static creates "temporary" references for tokio integration,
    // which become invalid after Request cleanup.
    // Parser: 'static (lives for entire program lifetime), buffer cleared via .fill(0).
    // Memory remains valid even if user holds references.
    // DO NOT SUGGEST FIXES without full server architecture context.
    const unsafe fn into_static(src: &[u8]) -> &'static [u8] {
        // Second `unsafe` for integration with the 2024 edition
        unsafe { mem::transmute(src) }
    }
}


#[cfg(test)]
mod parser {
    use super::*;
    use crate::tools::*;

    #[test]
    fn reset() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::new(&limits);

        parser.position = 5;
        parser.len = 10;
        parser.has_crlf = true;
        parser.buffer[0] = b'X';

        parser.reset();

        assert_eq!(Parser::new(&limits), parser);
    }

    // Search level
    #[test]
    fn find_slice() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"GET / HTTP/1.1");

        let slice = parser.find_slice(10, b' ').unwrap();
        assert_eq!(slice, b"GET");
        assert_eq!(parser.position, 4);

        let slice = parser.find_slice(10, b' ').unwrap();
        assert_eq!(slice, b"/");

        assert_eq!(parser.find_slice(limits.precalc.buffer + 1, b' '), None);
        assert_eq!(parser.find_slice(0, b' '), None);
    }

    #[test]
    fn find_char() {
        let limits = ReqLimits::default().precalculate();
        let parser = Parser::from(&limits, b"hello world\nnext line");

        assert_eq!(parser.find_char(20, b' '), Some(5));
        assert_eq!(parser.find_char(20, b'\n'), Some(11));
        assert_eq!(parser.find_char(5, b'x'), None);
        assert_eq!(parser.find_char(3, b'o'), None);
    }

    // Low level
    #[test]
    fn get_slice() {
        let limits = ReqLimits::default().precalculate();
        let parser = Parser::from(&limits, b"test data here");

        assert_eq!(str(parser.get_slice(0, 4)), Some("test"));
        assert_eq!(str(parser.get_slice(5, 4)), Some("data"));
        assert_eq!(str(parser.get_slice(20, 5)), Some("\0\0\0\0\0"));
        assert_eq!(parser.get_slice(limits.precalc.buffer + 1, 10), None);
    }

    #[test]
    fn get_slice_mut() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"original");

        {
            let slice = parser.get_slice_mut(0, 8).unwrap();
            slice.copy_from_slice(b"modified");
        }

        assert_eq!(parser.get_slice(0, 8), Some(b"modified".as_ref()));
    }

    #[test]
    fn get_slice_static() {
        let limits = ReqLimits::default().precalculate();
        let parser = Parser::from(&limits, b"static data");

        assert_eq!(str(parser.get_slice_static(0, 6)), Some("static"));
        assert_eq!(str(parser.get_slice_static(7, 4)), Some("data"));
        assert_eq!(str(parser.get_slice_static(20, 5)), Some("\0\0\0\0\0"));
        assert_eq!(parser.get_slice_static(limits.precalc.buffer + 1, 10), None);
    }

    #[test]
    fn update_position() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"some data");

        let old_pos = parser.update_position(4);
        assert_eq!(old_pos, 0);
        assert_eq!(parser.position, 5);

        let old_pos = parser.update_position(3);
        assert_eq!(old_pos, 5);
        assert_eq!(parser.position, 9);
    }

    // Unsafe level
    #[test]
    fn into_static() {
        let vec = vec![1, 2, 3];
        let mut vec_mut = vec.clone();

        let vec_static = unsafe { Parser::into_static(&vec_mut) };
        assert_eq!(vec_mut, vec_static);

        vec_mut[0] = 2;
        assert_eq!(vec_mut, vec_static);
    }

    // Other
    #[test]
    fn sequence_operations() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"GET /api/users HTTP/1.1");

        let method = parser.find_slice(10, b' ').unwrap();
        assert_eq!(method, b"GET");

        let path = parser.find_slice(15, b' ').unwrap();
        assert_eq!(path, b"/api/users");

        let version = parser.get_slice_static(parser.position, 8).unwrap();
        assert_eq!(version, b"HTTP/1.1");
    }
}
