//! `multipart/form-data` body parser ([RFC 7578](https://tools.ietf.org/html/rfc7578)).
//!
//! Scans part boundaries with [`memchr::memmem`] rather than a general
//! state-machine parser, the same zero-copy-scanning idiom the request-line
//! parser uses throughout `http::request` for header/URL splitting. Parts
//! stay borrowed from the decoded request body; only the part count is
//! bounded eagerly, matching `MaxUploadsPerRequest`.

use crate::errors::{ErrorKind, LimitExceeded, Malformed};
use memchr::{memchr, memmem};

#[inline(always)]
fn trim(mut value: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = value {
        value = rest;
    }
    value
}

/// A single part of a `multipart/form-data` body.
#[derive(Debug, PartialEq)]
pub(crate) struct Upload<'a> {
    pub(crate) name: &'a [u8],
    pub(crate) content_type: Option<&'a [u8]>,
    pub(crate) filename: Option<&'a [u8]>,
    pub(crate) data: &'a [u8],
}

pub(crate) struct MultipartParser;

impl MultipartParser {
    /// Extracts the `boundary=` parameter from a `Content-Type` header value
    /// such as `multipart/form-data; boundary=----WebKitFormBoundary...`.
    /// Surrounding quotes on the boundary token are stripped if present.
    pub(crate) fn boundary(content_type: &[u8]) -> Option<&[u8]> {
        let marker = b"boundary=";
        let start = memmem::find(content_type, marker)? + marker.len();
        let rest = &content_type[start..];

        let rest = match rest.first() {
            Some(b'"') => {
                let end = memchr(b'"', &rest[1..])? + 1;
                &rest[1..end]
            }
            _ => match memchr(b';', rest) {
                Some(end) => trim(&rest[..end]),
                None => trim(rest),
            },
        };

        (!rest.is_empty()).then_some(rest)
    }

    /// Splits a multipart body into its parts. `boundary` is the raw token
    /// returned by [`Self::boundary`] (without the leading `--`).
    pub(crate) fn parse<'a>(
        body: &'a [u8],
        boundary: &[u8],
        max_uploads: usize,
    ) -> Result<Vec<Upload<'a>>, ErrorKind> {
        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary);

        let positions: Vec<usize> = memmem::find_iter(body, delimiter.as_slice()).collect();
        if positions.is_empty() {
            return Err(ErrorKind::Malformed(Malformed::InvalidChunkEncoding));
        }

        let mut uploads = Vec::new();

        for window in positions.windows(2) {
            if uploads.len() >= max_uploads {
                return Err(ErrorKind::LimitExceeded(LimitExceeded::TooManyUploads));
            }

            let part_start = window[0] + delimiter.len();
            let part_end = window[1];

            let Some(part) = body.get(part_start..part_end) else {
                return Err(ErrorKind::Malformed(Malformed::InvalidChunkEncoding));
            };

            // Skip the CRLF right after the boundary line.
            let part = part.strip_prefix(b"\r\n").unwrap_or(part);
            // Strip the CRLF that precedes the next boundary.
            let part = part.strip_suffix(b"\r\n").unwrap_or(part);

            if part.is_empty() {
                continue;
            }

            uploads.push(Self::parse_part(part)?);
        }

        Ok(uploads)
    }

    fn parse_part(part: &[u8]) -> Result<Upload<'_>, ErrorKind> {
        let header_end = memmem::find(part, b"\r\n\r\n")
            .ok_or(ErrorKind::Malformed(Malformed::InvalidChunkEncoding))?;

        let headers = &part[..header_end];
        let data = &part[header_end + 4..];

        let mut name = None;
        let mut filename = None;
        let mut content_type = None;

        for line in headers.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            let Some(colon) = memchr(b':', line) else {
                continue;
            };

            let header_name = trim(&line[..colon]);
            let value = trim(&line[colon + 1..]);

            if header_name.eq_ignore_ascii_case(b"content-disposition") {
                name = Self::param(value, b"name");
                filename = Self::param(value, b"filename");
            } else if header_name.eq_ignore_ascii_case(b"content-type") {
                content_type = Some(value);
            }
        }

        Ok(Upload {
            name: name.ok_or(ErrorKind::Malformed(Malformed::InvalidChunkEncoding))?,
            content_type,
            filename,
            data,
        })
    }

    // Pulls `key="value"` out of a `Content-Disposition` parameter list.
    fn param<'a>(value: &'a [u8], key: &[u8]) -> Option<&'a [u8]> {
        let needle_start = memmem::find(value, key)?;
        let after_key = &value[needle_start + key.len()..];
        let after_eq = after_key.strip_prefix(b"=\"")?;
        let end = memchr(b'"', after_eq)?;
        Some(&after_eq[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{str, str_op};

    #[test]
    fn extracts_boundary() {
        let ct = b"multipart/form-data; boundary=----Boundary123";
        assert_eq!(str(MultipartParser::boundary(ct)), Some("----Boundary123"));
    }

    #[test]
    fn extracts_quoted_boundary() {
        let ct = b"multipart/form-data; boundary=\"abc123\"";
        assert_eq!(str(MultipartParser::boundary(ct)), Some("abc123"));
    }

    #[test]
    fn no_boundary() {
        assert_eq!(MultipartParser::boundary(b"multipart/form-data"), None);
    }

    #[test]
    fn parses_single_field() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"field\"\r\n\r\nvalue\r\n--B--\r\n";

        let uploads = MultipartParser::parse(body, b"B", 10).unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(str_op(uploads[0].name), "field");
        assert_eq!(str_op(uploads[0].data), "value");
        assert!(uploads[0].filename.is_none());
    }

    #[test]
    fn parses_file_upload() {
        let body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "hello world\r\n",
            "--B--\r\n",
        );

        let uploads = MultipartParser::parse(body.as_bytes(), b"B", 10).unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(str_op(uploads[0].name), "file");
        assert_eq!(str(uploads[0].filename), Some("a.txt"));
        assert_eq!(str(uploads[0].content_type), Some("text/plain"));
        assert_eq!(str_op(uploads[0].data), "hello world");
    }

    #[test]
    fn multiple_fields() {
        let body = concat!(
            "--B\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n",
            "--B\r\nContent-Disposition: form-data; name=\"b\"\r\n\r\n2\r\n",
            "--B--\r\n",
        );

        let uploads = MultipartParser::parse(body.as_bytes(), b"B", 10).unwrap();
        assert_eq!(uploads.len(), 2);
        assert_eq!(str_op(uploads[0].data), "1");
        assert_eq!(str_op(uploads[1].data), "2");
    }

    #[test]
    fn too_many_uploads() {
        let body = concat!(
            "--B\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n",
            "--B\r\nContent-Disposition: form-data; name=\"b\"\r\n\r\n2\r\n",
            "--B--\r\n",
        );

        assert_eq!(
            MultipartParser::parse(body.as_bytes(), b"B", 1),
            Err(ErrorKind::LimitExceeded(LimitExceeded::TooManyUploads))
        );
    }

    #[test]
    fn missing_boundary_in_body() {
        assert_eq!(
            MultipartParser::parse(b"no boundary here", b"B", 10),
            Err(ErrorKind::Malformed(Malformed::InvalidChunkEncoding))
        );
    }
}
