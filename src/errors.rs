use crate::{query, Version};
use std::{error, fmt, io};

/// Coarse error taxonomy used to pick an HTTP status and to group telemetry.
///
/// Every granular parsing/runtime failure the server can hit maps into one
/// of these buckets; the bucket picks the HTTP status family, while the
/// payload (where present) keeps the specific reason for logging.
#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    /// Request could not be parsed as well-formed HTTP (400-class).
    Malformed(Malformed),

    /// Method is syntactically valid but not recognized/allowed (405-class).
    UnsupportedMethod,

    /// Request was parsed but rejected by policy (connection filter,
    /// virtual-host whitelist/blacklist, CORS) (403-class).
    PolicyRejected,

    /// A configured resource limit was exceeded (413/431-class).
    LimitExceeded(LimitExceeded),

    /// No virtual host matched the request (404-class).
    RouteUnmatched,

    /// Request reached this listener/host but belongs to another virtual
    /// host (421 Misdirected Request).
    MisroutedRequest,

    /// Client requested a protocol upgrade the server cannot grant (426-class).
    UpgradeRequired,

    /// Handler panicked or an internal invariant was violated (500-class).
    Internal,

    /// Server cannot accept more work right now (503-class).
    Unavailable,

    /// Socket read/write exceeded its configured deadline.
    TransportTimeout,

    /// Peer closed the connection mid-request.
    TransportClosed,

    Io(IoError),
}

/// Sub-reasons nested under [`ErrorKind::Malformed`].
#[derive(Debug, PartialEq)]
pub(crate) enum Malformed {
    InvalidMethod,
    InvalidUrl,
    #[allow(dead_code)]
    Query(query::Error),
    InvalidVersion,
    UnsupportedVersion,
    InvalidHeader,
    InvalidContentLength,
    InvalidConnection,
    MissingHost,
    #[allow(dead_code)]
    BodyMismatch {
        expected: usize,
        available: usize,
    },
    #[allow(dead_code)]
    UnexpectedBody(usize),
    InvalidChunkEncoding,
}

/// Sub-reasons nested under [`ErrorKind::LimitExceeded`].
#[derive(Debug, PartialEq)]
pub(crate) enum LimitExceeded {
    TooManyHeaders,
    BodyTooLarge,
    TooManyUploads,
    RangeNotSatisfiable,
    /// `Expect: 100-continue` with `MaxUploadSize == 0` or a `Content-Length`
    /// over it (§4.4); distinct from `BodyTooLarge`'s 413 since the client
    /// explicitly asked whether to send the body at all.
    ExpectationFailed,
}

macro_rules! http_response {
    ($status_code:expr, $len:literal => $json:literal, $version:expr, $json_errors:expr) => {
        match ($json_errors, $version) {
            (true, Version::Http11) => concat!(
                "HTTP/1.1 ", $status_code, "\r\n",
                "connection: close\r\n",
                "content-length: ", $len, "\r\n",
                "content-type: application/json\r\n",
                "\r\n",
                $json
            ).as_bytes(),
            (false, Version::Http11) => concat!(
                "HTTP/1.1 ", $status_code, "\r\n",
                "connection: close\r\n",
                "content-length: 0\r\n\r\n",
            ).as_bytes(),
            (true, _) => concat!(
                "HTTP/1.0 ", $status_code, "\r\n",
                "connection: close\r\n",
                "content-length: ", $len, "\r\n",
                "content-type: application/json\r\n",
                "\r\n",
                $json
            ).as_bytes(),
            (false, _) => concat!(
                "HTTP/1.0 ", $status_code, "\r\n",
                "connection: close\r\n",
                "content-length: 0\r\n\r\n",
            ).as_bytes(),
        }
    };
}

impl ErrorKind {
    /// Renders the precomputed HTTP/1.x response byte-literal for this error.
    ///
    /// `HTTP/0.9` has no status line of its own; requests that fail this
    /// early are always answered on the HTTP/1.x wire (the connection is
    /// closed regardless, so the client never sees the mismatch).
    pub(crate) const fn as_http(&self, version: Version, json: bool) -> &'static [u8] {
        match self {
            ErrorKind::Malformed(Malformed::InvalidMethod) => http_response!(
                "400 Bad Request", "55"
                    => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#,
                version, json
            ),
            ErrorKind::Malformed(Malformed::InvalidUrl) => http_response!(
                "400 Bad Request", "51"
                    => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#,
                version, json
            ),
            ErrorKind::Malformed(Malformed::Query(_)) => http_response!(
                "400 Bad Request", "55"
                    => r#"{"error":"Invalid query string","code":"INVALID_QUERY"}"#,
                version, json
            ),
            ErrorKind::Malformed(Malformed::InvalidVersion) => http_response!(
                "400 Bad Request", "57"
                    => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#,
                version, json
            ),
            ErrorKind::Malformed(Malformed::UnsupportedVersion) => http_response!(
                "505 HTTP Version Not Supported", "67"
                    => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#,
                version, json
            ),
            ErrorKind::Malformed(Malformed::InvalidHeader) => http_response!(
                "400 Bad Request", "57"
                    => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#,
                version, json
            ),
            ErrorKind::Malformed(Malformed::InvalidContentLength) => http_response!(
                "400 Bad Request", "66"
                    => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#,
                version, json
            ),
            ErrorKind::Malformed(Malformed::InvalidConnection) => http_response!(
                "400 Bad Request", "65"
                    => r#"{"error":"Invalid Connection header","code":"INVALID_CONNECTION"}"#,
                version, json
            ),
            ErrorKind::Malformed(Malformed::MissingHost) => http_response!(
                "400 Bad Request", "53"
                    => r#"{"error":"Missing Host header","code":"MISSING_HOST"}"#,
                version, json
            ),
            ErrorKind::Malformed(Malformed::BodyMismatch { .. }) => http_response!(
                "400 Bad Request", "55"
                    => r#"{"error":"Body length mismatch","code":"BODY_MISMATCH"}"#,
                version, json
            ),
            ErrorKind::Malformed(Malformed::UnexpectedBody(_)) => http_response!(
                "400 Bad Request", "60"
                    => r#"{"error":"Unexpected request body","code":"UNEXPECTED_BODY"}"#,
                version, json
            ),
            ErrorKind::Malformed(Malformed::InvalidChunkEncoding) => http_response!(
                "400 Bad Request", "61"
                    => r#"{"error":"Invalid chunked encoding","code":"INVALID_CHUNK"}"#,
                version, json
            ),
            ErrorKind::UnsupportedMethod => http_response!(
                "405 Method Not Allowed", "58"
                    => r#"{"error":"Method not allowed here","code":"METHOD_NOT_ALLOWED"}"#,
                version, json
            ),
            ErrorKind::PolicyRejected => http_response!(
                "403 Forbidden", "51"
                    => r#"{"error":"Request rejected by policy","code":"FORBIDDEN"}"#,
                version, json
            ),
            ErrorKind::LimitExceeded(LimitExceeded::TooManyHeaders) => http_response!(
                "431 Request Header Fields Too Large", "54"
                    => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#,
                version, json
            ),
            ErrorKind::LimitExceeded(LimitExceeded::BodyTooLarge) => http_response!(
                "413 Payload Too Large", "58"
                    => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#,
                version, json
            ),
            ErrorKind::LimitExceeded(LimitExceeded::TooManyUploads) => http_response!(
                "413 Payload Too Large", "59"
                    => r#"{"error":"Too many file uploads","code":"TOO_MANY_UPLOADS"}"#,
                version, json
            ),
            ErrorKind::LimitExceeded(LimitExceeded::RangeNotSatisfiable) => http_response!(
                "416 Range Not Satisfiable", "56"
                    => r#"{"error":"Range not satisfiable","code":"BAD_RANGE"}"#,
                version, json
            ),
            ErrorKind::LimitExceeded(LimitExceeded::ExpectationFailed) => http_response!(
                "417 Expectation Failed", "58"
                    => r#"{"error":"Expectation failed","code":"EXPECTATION_FAILED"}"#,
                version, json
            ),
            ErrorKind::RouteUnmatched => http_response!(
                "404 Not Found", "46"
                    => r#"{"error":"No matching route","code":"NOT_FOUND"}"#,
                version, json
            ),
            ErrorKind::MisroutedRequest => http_response!(
                "421 Misdirected Request", "56"
                    => r#"{"error":"Misdirected request","code":"MISDIRECTED"}"#,
                version, json
            ),
            ErrorKind::UpgradeRequired => http_response!(
                "426 Upgrade Required", "54"
                    => r#"{"error":"Protocol upgrade required","code":"UPGRADE_REQUIRED"}"#,
                version, json
            ),
            ErrorKind::Internal => http_response!(
                "500 Internal Server Error", "54"
                    => r#"{"error":"Internal server error","code":"INTERNAL_ERROR"}"#,
                version, json
            ),
            ErrorKind::Unavailable => http_response!(
                "503 Service Unavailable", "72"
                    => r#"{"error":"Service temporarily unavailable","code":"SERVICE_UNAVAILABLE"}"#,
                version, json
            ),
            ErrorKind::TransportTimeout => http_response!(
                "408 Request Timeout", "50"
                    => r#"{"error":"Request timed out","code":"REQUEST_TIMEOUT"}"#,
                version, json
            ),
            ErrorKind::TransportClosed => http_response!(
                "400 Bad Request", "55"
                    => r#"{"error":"Connection closed early","code":"CONN_CLOSED"}"#,
                version, json
            ),
            ErrorKind::Io(_) => http_response!(
                "503 Service Unavailable", "48"
                    => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#,
                version, json
            ),
        }
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<Malformed> for ErrorKind {
    fn from(reason: Malformed) -> Self {
        ErrorKind::Malformed(reason)
    }
}
impl From<LimitExceeded> for ErrorKind {
    fn from(reason: LimitExceeded) -> Self {
        ErrorKind::LimitExceeded(reason)
    }
}
impl From<query::Error> for ErrorKind {
    fn from(err: query::Error) -> Self {
        ErrorKind::Malformed(Malformed::Query(err))
    }
}
impl From<crate::vhost::RouteError> for ErrorKind {
    fn from(err: crate::vhost::RouteError) -> Self {
        match err {
            crate::vhost::RouteError::NotMatched => ErrorKind::RouteUnmatched,
            crate::vhost::RouteError::PolicyRejected => ErrorKind::PolicyRejected,
            crate::vhost::RouteError::Misrouted => ErrorKind::MisroutedRequest,
        }
    }
}
impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => ErrorKind::TransportTimeout,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset => {
                ErrorKind::TransportClosed
            }
            _ => ErrorKind::Io(IoError(err)),
        }
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
