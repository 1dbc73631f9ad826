//! Virtual-host routing and filesystem-path translation (§4.5).
//!
//! Grounded on the teacher's [`ConnectionFilter`](crate::ConnectionFilter)
//! idiom in `server::connection` — a narrow trait gate run before the
//! handler, with a cheap sync stage and a slower async stage — generalized
//! from a single process-wide filter into a per-(interface, hostname)
//! lookup table, and on [`Url`](crate::Url)'s path-segment model for the
//! filesystem-translation walk.

use regex::Regex;
use std::{
    collections::HashMap,
    fmt,
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

/// Why [`VirtualHostRouter::route`] declined to route a request.
///
/// A crate-local error type rather than the internal
/// [`ErrorKind`](crate::errors::ErrorKind) enum, since `vhost` is public API
/// and `ErrorKind` is not; `ErrorKind` has a `From<RouteError>` impl for the
/// state machine's own use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    /// No configured hostname matched the `Host` header, or the path filter
    /// rejected the request path.
    NotMatched,
    /// The peer was rejected by the whitelist or blacklist.
    PolicyRejected,
    /// `force_port_check` is set and the listener's port doesn't match.
    Misrouted,
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for RouteError {}

/// Static routing/serving configuration for one virtual host.
///
/// Grounded on the teacher's builder/limits idiom: a plain typed struct with
/// a `Default` impl and a doc-hidden `_priv: ()` field reserved for
/// forward-compatible additions without a breaking change.
#[derive(Debug, Clone)]
pub struct VirtualHostConfig {
    /// Hostname this entry matches. `*.example.com` matches any single
    /// subdomain label (`www.example.com`, not `a.b.example.com`).
    pub hostname: String,
    /// Filesystem root requests under this host are served from.
    pub root: PathBuf,
    /// Compiled path filter; if set, a request path must match before it is
    /// translated to a filesystem path.
    pub path_filter: Option<Regex>,
    /// If non-empty, only peers in this list may reach this host.
    pub whitelist: Vec<IpAddr>,
    /// Peers in this list are always rejected, checked after the whitelist.
    pub blacklist: Vec<IpAddr>,
    /// When set, requests must have arrived on exactly this local port.
    pub force_port_check: Option<u16>,
    /// Filenames tried, in order, when a request path resolves to a
    /// directory (`index.html`, ...).
    pub default_files: Vec<String>,
    /// Extensions (without the leading dot, case-insensitive) that are
    /// always denied regardless of whether the file exists.
    pub deny_extensions: Vec<String>,
    /// `Cache-Control: public, max-age=<n>` applied to cacheable content
    /// types (§4.6's CSS/JS/JPG/PNG/GIF/AVIF/SVG/APNG/AVI table).
    pub cache_default_sec: u64,
    /// Extra headers appended to every response from this host, in
    /// insertion order.
    pub extra_headers: Vec<(String, String)>,
    /// CSP/XSS/HSTS/X-Content-Type-Options/Server headers applied to HTML
    /// responses, keyed by header name.
    pub special_headers: Vec<(String, String)>,
    /// Cached error-file bodies, keyed by status code (§4.9).
    pub error_files: HashMap<u16, Arc<[u8]>>,
    /// CORS policy for this host (§6's `cors{enabled, deny_cors_connections,
    /// allowed_authority[]}`). Checked after whitelist/blacklist, per the
    /// tie-break order recorded in DESIGN.md.
    pub cors: CorsPolicy,

    #[doc(hidden)]
    pub _priv: (),
}

impl Default for VirtualHostConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            root: PathBuf::new(),
            path_filter: None,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            force_port_check: None,
            default_files: vec!["index.html".to_string()],
            deny_extensions: Vec::new(),
            cache_default_sec: 3600,
            extra_headers: Vec::new(),
            special_headers: Vec::new(),
            error_files: HashMap::new(),
            cors: CorsPolicy::default(),
            _priv: (),
        }
    }
}

/// Cross-origin policy for one virtual host (§6's `cors{}` JSON object).
///
/// Checked last in the tie-break order the Open Question in spec.md §9
/// resolves: whitelist, then blacklist (both enforced by
/// [`VirtualHostRouter::route`]), then CORS — each a hard stop, matching
/// the source's configuration-order chaining. A host wires this in as its
/// own [`Middleware`](crate::middleware::Middleware) (the core doesn't read
/// an `Origin` header on the router's behalf, since routing happens before
/// headers are handed to the middleware chain).
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    /// Whether cross-origin requests are recognized for this host at all.
    pub enabled: bool,
    /// When `true`, a cross-origin request whose `Origin` isn't in
    /// `allowed_authority` is rejected outright rather than merely missing
    /// the `Access-Control-Allow-Origin` response header.
    pub deny_cors_connections: bool,
    /// Origins (scheme + host, e.g. `https://app.example.com`) allowed to
    /// make cross-origin requests.
    pub allowed_authority: Vec<String>,
}

impl CorsPolicy {
    /// Whether a request carrying `Origin: origin` should be let through.
    ///
    /// Not cross-origin checking at all (`enabled == false`) always passes;
    /// otherwise an origin on the allow-list passes, and anything else
    /// passes unless `deny_cors_connections` is set.
    pub fn allows(&self, origin: &str) -> bool {
        if !self.enabled {
            return true;
        }
        if self
            .allowed_authority
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(origin))
        {
            return true;
        }
        !self.deny_cors_connections
    }
}

/// A table of [`VirtualHostConfig`]s, matched by bound listener and `Host` header.
pub struct VirtualHostRouter {
    hosts: Vec<VirtualHostConfig>,
}

impl VirtualHostRouter {
    pub fn new(hosts: Vec<VirtualHostConfig>) -> Self {
        Self { hosts }
    }

    /// Resolves the virtual host that should handle a request.
    ///
    /// Checks, in order (each a hard stop per the Open Question resolution
    /// in DESIGN.md): hostname match (exact or wildcard) → `RouteUnmatched`
    /// if none; `force_port_check` → `MisroutedRequest`; whitelist →
    /// blacklist → `PolicyRejected`; `path_filter` → `RouteUnmatched`.
    pub fn route(
        &self,
        server_addr: SocketAddr,
        host_header: &[u8],
        path: &[u8],
        peer_ip: IpAddr,
    ) -> Result<&VirtualHostConfig, RouteError> {
        let host = Self::strip_port(host_header);

        let config = self
            .hosts
            .iter()
            .find(|h| Self::hostname_matches(&h.hostname, host))
            .ok_or(RouteError::NotMatched)?;

        if let Some(port) = config.force_port_check {
            if server_addr.port() != port {
                return Err(RouteError::Misrouted);
            }
        }

        if !config.whitelist.is_empty() && !config.whitelist.contains(&peer_ip) {
            return Err(RouteError::PolicyRejected);
        }
        if config.blacklist.contains(&peer_ip) {
            return Err(RouteError::PolicyRejected);
        }

        if let Some(filter) = &config.path_filter {
            let path_str = std::str::from_utf8(path).map_err(|_| RouteError::NotMatched)?;
            if !filter.is_match(path_str) {
                return Err(RouteError::NotMatched);
            }
        }

        Ok(config)
    }

    fn strip_port(host_header: &[u8]) -> &[u8] {
        match host_header.iter().position(|&b| b == b':') {
            Some(pos) => &host_header[..pos],
            None => host_header,
        }
    }

    fn hostname_matches(pattern: &str, host: &[u8]) -> bool {
        let Ok(host) = std::str::from_utf8(host) else {
            return false;
        };

        match pattern.strip_prefix("*.") {
            Some(suffix) => {
                host.len() > suffix.len() + 1
                    && host.ends_with(suffix)
                    && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
                    && !host[..host.len() - suffix.len() - 1].contains('.')
            }
            None => pattern.eq_ignore_ascii_case(host),
        }
    }
}

/// Translates a request path into a filesystem path under `root`.
///
/// Normalizes separators and collapses `.`/`..` segments using
/// [`Path::components`] (no `canonicalize` syscall — the check is purely
/// lexical), rejecting any result that would escape `root`. Returns `None`
/// on escape rather than an `ErrorKind` directly so callers can decide
/// whether that's a 404 or a 403.
///
/// When the translated path has no extension and the request didn't end in
/// a separator, `.html` is appended (§4.5), so `/about` resolves to
/// `about.html` the same way a request for `/` resolves to a configured
/// default file.
pub fn translate_path(root: &Path, request_path: &[u8]) -> Option<PathBuf> {
    let request_path = std::str::from_utf8(request_path).ok()?;
    let ends_in_separator = request_path.ends_with('/');
    let mut result = root.to_path_buf();
    let mut depth = 0usize;

    for component in Path::new(request_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(segment) => {
                result.push(segment);
                depth += 1;
            }
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                result.pop();
                depth -= 1;
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if !ends_in_separator && depth > 0 && result.extension().is_none() {
        result.set_extension("html");
    }

    Some(result)
}

/// Whether `extension` (without the leading dot, case-insensitive) is on
/// `config`'s denied-extension list.
pub fn is_denied_extension(config: &VirtualHostConfig, extension: &str) -> bool {
    config
        .deny_extensions
        .iter()
        .any(|denied| denied.eq_ignore_ascii_case(extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> VirtualHostConfig {
        VirtualHostConfig {
            hostname: name.to_string(),
            root: PathBuf::from("/srv/www"),
            ..VirtualHostConfig::default()
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn exact_hostname_match() {
        let router = VirtualHostRouter::new(vec![host("example.com")]);
        let result = router.route(addr(80), b"example.com", b"/", addr(80).ip());
        assert!(result.is_ok());
    }

    #[test]
    fn host_header_port_is_ignored() {
        let router = VirtualHostRouter::new(vec![host("example.com")]);
        let result = router.route(addr(80), b"example.com:8080", b"/", addr(80).ip());
        assert!(result.is_ok());
    }

    #[test]
    fn wildcard_matches_single_label() {
        let router = VirtualHostRouter::new(vec![host("*.example.com")]);
        assert!(router.route(addr(80), b"www.example.com", b"/", addr(80).ip()).is_ok());
        assert!(router
            .route(addr(80), b"a.b.example.com", b"/", addr(80).ip())
            .is_err());
    }

    #[test]
    fn unmatched_host_is_route_unmatched() {
        let router = VirtualHostRouter::new(vec![host("example.com")]);
        assert_eq!(
            router.route(addr(80), b"other.com", b"/", addr(80).ip()),
            Err(RouteError::NotMatched)
        );
    }

    #[test]
    fn force_port_check_rejects_wrong_listener() {
        let mut cfg = host("example.com");
        cfg.force_port_check = Some(443);
        let router = VirtualHostRouter::new(vec![cfg]);

        assert_eq!(
            router.route(addr(80), b"example.com", b"/", addr(80).ip()),
            Err(RouteError::Misrouted)
        );
    }

    #[test]
    fn whitelist_then_blacklist_order() {
        let allowed = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1));
        let denied = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 2));

        let mut cfg = host("example.com");
        cfg.whitelist = vec![allowed];
        let router = VirtualHostRouter::new(vec![cfg]);

        assert!(router.route(addr(80), b"example.com", b"/", allowed).is_ok());
        assert_eq!(
            router.route(addr(80), b"example.com", b"/", denied),
            Err(RouteError::PolicyRejected)
        );
    }

    #[test]
    fn path_filter_rejects_non_matching_path() {
        let mut cfg = host("example.com");
        cfg.path_filter = Some(Regex::new("^/api/").unwrap());
        let router = VirtualHostRouter::new(vec![cfg]);

        assert!(router
            .route(addr(80), b"example.com", b"/api/users", addr(80).ip())
            .is_ok());
        assert_eq!(
            router.route(addr(80), b"example.com", b"/static/x", addr(80).ip()),
            Err(RouteError::NotMatched)
        );
    }

    #[test]
    fn translate_path_joins_under_root() {
        let root = Path::new("/srv/www");
        assert_eq!(
            translate_path(root, b"/a/b.html"),
            Some(PathBuf::from("/srv/www/a/b.html"))
        );
    }

    #[test]
    fn translate_path_collapses_parent_dir() {
        let root = Path::new("/srv/www");
        assert_eq!(
            translate_path(root, b"/a/../b.html"),
            Some(PathBuf::from("/srv/www/b.html"))
        );
    }

    #[test]
    fn translate_path_rejects_escape() {
        let root = Path::new("/srv/www");
        assert_eq!(translate_path(root, b"/../../etc/passwd"), None);
    }

    #[test]
    fn translate_path_appends_html_when_no_extension() {
        let root = Path::new("/srv/www");
        assert_eq!(
            translate_path(root, b"/about"),
            Some(PathBuf::from("/srv/www/about.html"))
        );
    }

    #[test]
    fn translate_path_leaves_directory_requests_alone() {
        let root = Path::new("/srv/www");
        assert_eq!(
            translate_path(root, b"/docs/"),
            Some(PathBuf::from("/srv/www/docs"))
        );
    }

    #[test]
    fn denied_extension_is_case_insensitive() {
        let mut cfg = host("example.com");
        cfg.deny_extensions = vec!["exe".to_string()];
        assert!(is_denied_extension(&cfg, "EXE"));
        assert!(!is_denied_extension(&cfg, "html"));
    }

    #[test]
    fn cors_disabled_allows_everything() {
        let policy = CorsPolicy::default();
        assert!(policy.allows("https://evil.example"));
    }

    #[test]
    fn cors_allowlist_passes_matching_origin() {
        let policy = CorsPolicy {
            enabled: true,
            deny_cors_connections: true,
            allowed_authority: vec!["https://app.example.com".to_string()],
        };
        assert!(policy.allows("https://app.example.com"));
        assert!(!policy.allows("https://evil.example"));
    }

    #[test]
    fn cors_enabled_without_deny_lets_unlisted_origins_through() {
        let policy = CorsPolicy {
            enabled: true,
            deny_cors_connections: false,
            allowed_authority: vec!["https://app.example.com".to_string()],
        };
        assert!(policy.allows("https://anywhere.example"));
    }
}
