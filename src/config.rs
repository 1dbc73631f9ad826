//! Typed configuration wire shapes (§6).
//!
//! Grounded on the teacher's own typed-struct-with-`Default` idiom
//! (`limits.rs`'s `ServerLimits`/`ConnLimits`/...): every struct here is a
//! plain field bag with a `Default` impl, the same register the teacher
//! already writes in. `serde::Deserialize` plays the role a config-file
//! parser would in a full server — reading the file from disk is an
//! explicit non-goal (§1); this module only describes the JSON shape a host
//! binary deserializes into, then converts into the crate's native
//! [`HttpConfig`](crate::limits::HttpConfig) /
//! [`VirtualHostConfig`](crate::vhost::VirtualHostConfig) /
//! [`plugin`](crate::plugin) types via the `into_*` methods below.

use crate::{
    limits::{CompressionLevel, CompressionLimits, ConnLimits, FormLimits, HttpConfig, ReqLimits, RespLimits},
    vhost::{CorsPolicy, VirtualHostConfig},
    Version,
};
use regex::Regex;
use serde::Deserialize;
use std::{collections::HashMap, net::IpAddr, path::PathBuf, sync::Arc, time::Duration};

/// Top-level JSON document (§6): `{"http": ..., "virtual_hosts": [...], "plugins": ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RootConfig {
    pub http: HttpConfigFile,
    #[serde(default)]
    pub virtual_hosts: Vec<VirtualHostConfigFile>,
    pub plugins: Option<PluginConfig>,
}

/// Wire shape of the spec's `HttpConfig` (§3). Kept distinct from
/// [`HttpConfig`](crate::limits::HttpConfig) because the JSON document uses
/// plain scalars (milliseconds, byte counts, string enum tags) where the
/// native struct uses `Duration`/enum/`Arc<dyn Trait>` types; [`Self::into_http_config`]
/// bridges the two.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct HttpConfigFile {
    pub max_upload_size: usize,
    pub max_form_data_upload_size: usize,
    pub form_data_buffer_size: usize,
    pub compression_limit: usize,
    pub compression_minimum: usize,
    pub connection_keep_alive_secs: u64,
    pub http_encoding: String,
    pub compression_level: CompressionLevelFile,
    pub default_http_version: DefaultHttpVersionFile,
    pub header_buffer_size: usize,
    pub active_connection_recv_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub max_request_header_count: usize,
    /// `0` means every accepted connection gets 503 (§4.2). Realized as
    /// [`ServerLimits::max_connections`](crate::limits::ServerLimits) — the
    /// teacher's concurrency model pre-spawns exactly this many worker
    /// tasks rather than counting live connections against a running
    /// total, so "at the ceiling" and "zero workers" coincide; see
    /// DESIGN.md for the full resolution.
    pub max_open_connections: usize,
    pub response_header_buffer_size: usize,
    pub discard_buffer_size: usize,
    pub response_buffer_size: usize,
    pub chunked_response_accumulator_size: usize,
    pub max_uploads_per_request: usize,
    pub debug_performance_counters: bool,
}

impl Default for HttpConfigFile {
    fn default() -> Self {
        let req = ReqLimits::default();
        let resp = RespLimits::default();
        let form = FormLimits::default();
        let compression = CompressionLimits::default();
        let conn = ConnLimits::default();

        Self {
            max_upload_size: req.body_size,
            max_form_data_upload_size: form.max_form_data_upload_size,
            form_data_buffer_size: form.form_data_buffer_size,
            compression_limit: compression.compression_limit,
            compression_minimum: compression.compression_minimum,
            connection_keep_alive_secs: 75,
            http_encoding: "utf-8".to_string(),
            compression_level: CompressionLevelFile::Optimal,
            default_http_version: DefaultHttpVersionFile::Http11,
            header_buffer_size: 4 * 1024,
            active_connection_recv_timeout_ms: conn.socket_read_timeout.as_millis() as u64,
            send_timeout_ms: conn.socket_write_timeout.as_millis() as u64,
            max_request_header_count: req.header_count,
            max_open_connections: 100,
            response_header_buffer_size: 4 * 1024,
            discard_buffer_size: 4 * 1024,
            response_buffer_size: resp.default_capacity,
            chunked_response_accumulator_size: 8 * 1024,
            max_uploads_per_request: form.max_uploads_per_request,
            debug_performance_counters: false,
        }
    }
}

impl HttpConfigFile {
    /// Converts the wire shape into the native [`HttpConfig`], filling in
    /// the sub-structs this document doesn't carry its own knobs for
    /// (`server`'s queueing/wait-strategy fields) with their defaults.
    ///
    /// Opaque hooks (native allocator, native compressor, request debug
    /// log) are never part of the JSON document (§1: they're external
    /// collaborators the host wires in code), so callers pass them
    /// alongside the deserialized document.
    pub fn into_http_config(
        self,
        compressor: Option<Arc<dyn crate::compress::CompressorManager>>,
        allocator: Option<Arc<dyn crate::pool::NativeAllocator>>,
        request_debug_log: Option<Arc<dyn crate::limits::RequestDebugLog>>,
    ) -> HttpConfig {
        HttpConfig {
            req: ReqLimits {
                header_count: self.max_request_header_count,
                body_size: self.max_upload_size,
                ..ReqLimits::default()
            }
            .precalculate(),
            resp: RespLimits {
                default_capacity: self.response_buffer_size,
                ..RespLimits::default()
            },
            conn: ConnLimits {
                socket_read_timeout: Duration::from_millis(self.active_connection_recv_timeout_ms),
                socket_write_timeout: Duration::from_millis(self.send_timeout_ms),
                ..ConnLimits::default()
            },
            form: FormLimits {
                max_form_data_upload_size: self.max_form_data_upload_size,
                form_data_buffer_size: self.form_data_buffer_size,
                max_uploads_per_request: self.max_uploads_per_request,
                ..FormLimits::default()
            },
            compression: CompressionLimits {
                compression_limit: self.compression_limit,
                compression_minimum: self.compression_minimum,
                level: self.compression_level.into(),
                ..CompressionLimits::default()
            },
            server: crate::limits::ServerLimits {
                max_connections: self.max_open_connections,
                ..crate::limits::ServerLimits::default()
            },

            connection_keep_alive: Duration::from_secs(self.connection_keep_alive_secs),
            http_encoding: leak_encoding(&self.http_encoding),
            default_http_version: self.default_http_version.into(),

            header_buffer_size: self.header_buffer_size,
            response_header_buffer_size: self.response_header_buffer_size,
            discard_buffer_size: self.discard_buffer_size,
            response_buffer_size: self.response_buffer_size,
            chunked_response_accumulator_size: self.chunked_response_accumulator_size,
            debug_performance_counters: self.debug_performance_counters,

            allocator,
            compressor,
            request_debug_log,

            _priv: (),
        }
    }
}

// `HttpConfig::http_encoding` is `&'static str` (it's read on every response
// write); the wire document only ever names one of a handful of charsets in
// practice, so this matches the small, fixed set rather than leaking
// arbitrary strings.
fn leak_encoding(name: &str) -> &'static str {
    match name.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" => "utf-8",
        "ascii" | "us-ascii" => "us-ascii",
        "iso-8859-1" | "latin1" => "iso-8859-1",
        _ => "utf-8",
    }
}

/// Wire shape of [`CompressionLevel`], matching spec.md §3's
/// `{Optimal|Fastest|None|Smallest}` token set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CompressionLevelFile {
    Optimal,
    Fastest,
    None,
    Smallest,
}

impl From<CompressionLevelFile> for CompressionLevel {
    fn from(value: CompressionLevelFile) -> Self {
        match value {
            CompressionLevelFile::Optimal => CompressionLevel::Optimal,
            CompressionLevelFile::Fastest => CompressionLevel::Fastest,
            CompressionLevelFile::None => CompressionLevel::None,
            CompressionLevelFile::Smallest => CompressionLevel::Smallest,
        }
    }
}

/// Wire shape of `DefaultHttpVersion:{Http1|Http11}` (spec.md §3). `Http1`
/// names the HTTP/1.0 wire format; the native [`Version`] enum spells that
/// variant `Http10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DefaultHttpVersionFile {
    Http1,
    Http11,
}

impl From<DefaultHttpVersionFile> for Version {
    fn from(value: DefaultHttpVersionFile) -> Self {
        match value {
            DefaultHttpVersionFile::Http1 => Version::Http10,
            DefaultHttpVersionFile::Http11 => Version::Http11,
        }
    }
}

/// One `interfaces[]` entry (§6): where a virtual host is bound and whether
/// that listener terminates TLS. Binding the socket and loading the
/// certificate are both out of scope (§1); this struct only carries enough
/// of the shape for [`VirtualHostConfigFile::into_vhost_configs`] to derive
/// `force_port_check` from it, and for a host's own bootstrap code to know
/// which address/cert pair to hand to its TLS layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct InterfaceConfig {
    pub address: String,
    pub port: u16,
    pub ssl: bool,
    pub certificate: Option<PathBuf>,
    pub private_key: Option<PathBuf>,
    pub password: Option<String>,
    pub client_cert_required: bool,
    pub use_os_ciphers: bool,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 80,
            ssl: false,
            certificate: None,
            private_key: None,
            password: None,
            client_cert_required: false,
            use_os_ciphers: true,
        }
    }
}

/// `cors{}` object (§6). Converts directly into [`CorsPolicy`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CorsConfig {
    pub enabled: bool,
    pub deny_cors_connections: bool,
    #[serde(default)]
    pub allowed_authority: Vec<String>,
}

impl From<CorsConfig> for CorsPolicy {
    fn from(value: CorsConfig) -> Self {
        CorsPolicy {
            enabled: value.enabled,
            deny_cors_connections: value.deny_cors_connections,
            allowed_authority: value.allowed_authority,
        }
    }
}

/// One `error_files[]` entry (§6): a status code and the file its cached
/// body should be loaded from. Loading the file is left to the host (it's
/// ordinary filesystem I/O, not a core protocol concern); this struct only
/// carries the mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorFileEntry {
    pub code: u16,
    pub path: PathBuf,
}

/// One `benchmark{}` object (§6). Out of scope for the request path; kept
/// here only so the document round-trips through `Deserialize` without the
/// host needing to pre-strip it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct BenchmarkConfig {
    pub enabled: bool,
    pub size: usize,
    pub random: bool,
}

/// Wire shape of one `virtual_hosts[]` entry (§6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct VirtualHostConfigFile {
    pub hostnames: Vec<String>,
    pub interfaces: Vec<InterfaceConfig>,
    pub path: PathBuf,
    pub whitelist: Vec<IpAddr>,
    pub blacklist: Vec<IpAddr>,
    pub default_files: Vec<String>,
    pub deny_extensions: Vec<String>,
    pub headers: Vec<(String, String)>,
    pub special_headers: Vec<(String, String)>,
    pub cors: CorsConfig,
    pub error_files: Vec<ErrorFileEntry>,
    pub cache_default_sec: u64,
    pub path_filter: Option<String>,
    pub trace: bool,
    pub force_port_check: bool,
    pub benchmark: BenchmarkConfig,
}

impl Default for VirtualHostConfigFile {
    fn default() -> Self {
        Self {
            hostnames: Vec::new(),
            interfaces: Vec::new(),
            path: PathBuf::new(),
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            default_files: vec!["index.html".to_string()],
            deny_extensions: Vec::new(),
            headers: Vec::new(),
            special_headers: Vec::new(),
            cors: CorsConfig::default(),
            error_files: Vec::new(),
            cache_default_sec: 3600,
            path_filter: None,
            trace: false,
            force_port_check: false,
            benchmark: BenchmarkConfig::default(),
        }
    }
}

/// Failure converting a [`VirtualHostConfigFile`] into one or more native
/// [`VirtualHostConfig`]s.
#[derive(Debug)]
pub enum ConfigError {
    /// `path_filter` wasn't a valid regular expression.
    InvalidPathFilter(regex::Error),
    /// An `error_files[]` entry names a path that couldn't be read.
    ErrorFileUnreadable { code: u16, path: PathBuf, source: std::io::Error },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPathFilter(err) => write!(f, "invalid path_filter: {err}"),
            ConfigError::ErrorFileUnreadable { code, path, source } => {
                write!(f, "error file for {code} ({}): {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl VirtualHostConfigFile {
    /// Builds one native [`VirtualHostConfig`] per entry in `hostnames`,
    /// sharing every other field, reading each `error_files[]` body from
    /// disk once.
    ///
    /// The native struct's `hostname` is singular (one pattern, possibly a
    /// `*.` wildcard) — this is the bridge between the wire document's
    /// `hostnames[]` array and [`VirtualHostRouter`](crate::vhost::VirtualHostRouter),
    /// which already matches a request against however many `VirtualHostConfig`
    /// entries are registered.
    pub fn into_vhost_configs(&self) -> Result<Vec<VirtualHostConfig>, ConfigError> {
        let path_filter = match &self.path_filter {
            Some(pattern) => Some(Regex::new(pattern).map_err(ConfigError::InvalidPathFilter)?),
            None => None,
        };

        let mut error_files = HashMap::new();
        for entry in &self.error_files {
            let bytes = std::fs::read(&entry.path).map_err(|source| ConfigError::ErrorFileUnreadable {
                code: entry.code,
                path: entry.path.clone(),
                source,
            })?;
            error_files.insert(entry.code, Arc::<[u8]>::from(bytes));
        }

        let force_port_check = if self.force_port_check {
            self.interfaces.first().map(|iface| iface.port)
        } else {
            None
        };

        let names = if self.hostnames.is_empty() {
            vec![String::new()]
        } else {
            self.hostnames.clone()
        };

        Ok(names
            .into_iter()
            .map(|hostname| VirtualHostConfig {
                hostname,
                root: self.path.clone(),
                path_filter: path_filter.clone(),
                whitelist: self.whitelist.clone(),
                blacklist: self.blacklist.clone(),
                force_port_check,
                default_files: self.default_files.clone(),
                deny_extensions: self.deny_extensions.clone(),
                cache_default_sec: self.cache_default_sec,
                extra_headers: self.headers.clone(),
                special_headers: self.special_headers.clone(),
                error_files: error_files.clone(),
                cors: self.cors.clone().into(),
                _priv: (),
            })
            .collect())
    }
}

/// Wire shape of `plugins{}` (§6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PluginConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub config_dir: Option<PathBuf>,
    pub hot_reload: bool,
    pub reload_delay_sec: u32,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::new(),
            config_dir: None,
            hot_reload: false,
            reload_delay_sec: 5,
        }
    }
}

impl PluginConfig {
    /// Clamps `reload_delay_sec` into the spec's documented `1..=120` range
    /// (§6). The source treats this as a hard validation failure; this
    /// crate instead clamps, since a host that deserialized an out-of-range
    /// value from a hand-edited JSON file is more likely to want "closest
    /// valid value" than a hard boot failure over a debounce window.
    pub fn reload_delay(&self) -> Duration {
        Duration::from_secs(self.reload_delay_sec.clamp(1, 120) as u64)
    }
}

/// A small, narrow surface over the process argument set (§6's "CLI,
/// externalized"): the crate doesn't depend on an argument-parsing crate
/// (that's the CLI-bootstrap non-goal, §1) — a host constructs this from
/// whatever parser it likes (or straight from `std::env::args()`) and
/// passes it to whichever part of this crate cares (today, just
/// [`plugin`](crate::plugin) hot-reload / concurrent-load gating).
#[derive(Debug, Clone, Default)]
pub struct CliFlags {
    raw: Vec<String>,
}

impl CliFlags {
    pub fn new(args: impl IntoIterator<Item = String>) -> Self {
        Self { raw: args.into_iter().collect() }
    }

    /// Whether `flag` (e.g. `"--no-plugins"`) was passed verbatim.
    pub fn has_argument(&self, flag: &str) -> bool {
        self.raw.iter().any(|arg| arg == flag)
    }

    pub fn no_plugins(&self) -> bool {
        self.has_argument("--no-plugins")
    }

    pub fn sequential_load(&self) -> bool {
        self.has_argument("--sequential-load")
    }

    pub fn http_counters(&self) -> bool {
        self.has_argument("--http-counters")
    }

    pub fn log_http(&self) -> bool {
        self.has_argument("--log-http")
    }

    pub fn zero_alloc(&self) -> bool {
        self.has_argument("--zero-alloc")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_config_file_deserializes_partial_document() {
        let doc = r#"{"max_upload_size": 2048, "compression_level": "Fastest"}"#;
        let parsed: HttpConfigFile = serde_json::from_str(doc).unwrap();

        assert_eq!(parsed.max_upload_size, 2048);
        assert_eq!(parsed.compression_level, CompressionLevelFile::Fastest);
        // Untouched fields keep their `Default` value.
        assert_eq!(parsed.max_request_header_count, ReqLimits::default().header_count);
    }

    #[test]
    fn into_http_config_bridges_scalar_fields() {
        let file = HttpConfigFile {
            max_upload_size: 99,
            max_request_header_count: 7,
            ..HttpConfigFile::default()
        };

        let config = file.into_http_config(None, None, None);
        assert_eq!(config.req.body_size, 99);
        assert_eq!(config.req.header_count, 7);
    }

    #[test]
    fn root_config_parses_full_document() {
        let doc = r#"{
            "http": {"max_upload_size": 4096},
            "virtual_hosts": [{"hostnames": ["example.com"], "path": "/srv/www"}],
            "plugins": {"enabled": true, "path": "/srv/plugins", "reload_delay_sec": 5}
        }"#;

        let parsed: RootConfig = serde_json::from_str(doc).unwrap();
        assert_eq!(parsed.http.max_upload_size, 4096);
        assert_eq!(parsed.virtual_hosts.len(), 1);
        assert_eq!(parsed.virtual_hosts[0].hostnames, vec!["example.com".to_string()]);
        assert!(parsed.plugins.unwrap().enabled);
    }

    #[test]
    fn into_vhost_configs_expands_one_per_hostname() {
        let file = VirtualHostConfigFile {
            hostnames: vec!["a.example.com".to_string(), "b.example.com".to_string()],
            path: PathBuf::from("/srv/www"),
            ..VirtualHostConfigFile::default()
        };

        let configs = file.into_vhost_configs().unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].hostname, "a.example.com");
        assert_eq!(configs[1].hostname, "b.example.com");
    }

    #[test]
    fn into_vhost_configs_derives_force_port_check_from_first_interface() {
        let file = VirtualHostConfigFile {
            hostnames: vec!["example.com".to_string()],
            interfaces: vec![InterfaceConfig { port: 8443, ..InterfaceConfig::default() }],
            force_port_check: true,
            ..VirtualHostConfigFile::default()
        };

        let configs = file.into_vhost_configs().unwrap();
        assert_eq!(configs[0].force_port_check, Some(8443));
    }

    #[test]
    fn invalid_path_filter_is_rejected() {
        let file = VirtualHostConfigFile {
            path_filter: Some("(".to_string()),
            ..VirtualHostConfigFile::default()
        };
        assert!(matches!(
            file.into_vhost_configs(),
            Err(ConfigError::InvalidPathFilter(_))
        ));
    }

    #[test]
    fn plugin_config_clamps_reload_delay() {
        let mut cfg = PluginConfig { reload_delay_sec: 0, ..PluginConfig::default() };
        assert_eq!(cfg.reload_delay(), Duration::from_secs(1));

        cfg.reload_delay_sec = 500;
        assert_eq!(cfg.reload_delay(), Duration::from_secs(120));
    }

    #[test]
    fn cli_flags_reads_named_flags() {
        let flags = CliFlags::new(["prog", "--no-plugins", "--log-http"].iter().map(|s| s.to_string()));
        assert!(flags.no_plugins());
        assert!(flags.log_http());
        assert!(!flags.sequential_load());
    }
}
