//! Per-request event processor (§4.6).
//!
//! Ties [`vhost::VirtualHostRouter`](crate::vhost) and
//! [`middleware::MiddlewareChain`](crate::middleware) together: after the
//! chain decides a [`FileProcessArgs`] routine, `EventProcessor::finish`
//! executes it — the default filesystem lookup for `Continue`, or a fixed
//! status/header combination for everything else — exactly the routine
//! table in spec.md §4.6. The file-serving path is the only I/O this crate
//! performs on behalf of a host; everything else in the core is in-memory.

use crate::{
    middleware::FileProcessArgs,
    vhost::{self, VirtualHostConfig},
    Response, StatusCode,
};
use std::path::Path;

/// Maps a file extension (no leading dot, any case) to its `Content-Type`.
/// Unknown extensions fall back to `application/octet-stream`.
pub fn content_type_for_extension(extension: &str) -> &'static str {
    let mut buf = [0u8; 8];
    let lower = lower_ascii(extension, &mut buf);

    match lower {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        "apng" => "image/apng",
        "avi" => "video/x-msvideo",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

fn lower_ascii<'a>(value: &str, buf: &'a mut [u8; 8]) -> &'a str {
    let bytes = value.as_bytes();
    if bytes.len() > buf.len() {
        return "";
    }
    for (i, &b) in bytes.iter().enumerate() {
        buf[i] = b.to_ascii_lowercase();
    }
    std::str::from_utf8(&buf[..bytes.len()]).unwrap_or("")
}

/// Whether `content_type` is on the cacheable table from §4.6
/// (CSS, JS, JPG, PNG, GIF, AVIF, SVG, APNG, AVI).
pub const fn is_cacheable_content_type(content_type: &str) -> bool {
    matches!(
        content_type.as_bytes(),
        b"text/css"
            | b"application/javascript"
            | b"image/jpeg"
            | b"image/png"
            | b"image/gif"
            | b"image/avif"
            | b"image/svg+xml"
            | b"image/apng"
            | b"video/x-msvideo"
    )
}

/// Applies the `Cache-Control` policy for a response carrying
/// `content_type`: cacheable types get `public, max-age=N`; everything else
/// (and any request that asked not to be cached) gets the strict triad.
pub fn apply_cache_headers(
    response: &mut Response,
    config: &VirtualHostConfig,
    content_type: &str,
    no_cache_requested: bool,
) {
    if !no_cache_requested && is_cacheable_content_type(content_type) {
        response.header(
            "cache-control",
            format!("public, max-age={}", config.cache_default_sec),
        );
    } else {
        response.header("cache-control", "no-cache, no-store, must-revalidate");
    }
}

/// Applies the virtual host's CSP/XSS/HSTS/... special headers. Only
/// applied to HTML responses (explicit or inferred), per §4.6.
pub fn apply_special_headers(response: &mut Response, config: &VirtualHostConfig, content_type: &str) {
    if content_type == "text/html" {
        for (name, value) in &config.special_headers {
            response.header(name.clone(), value.clone());
        }
    }
}

/// Sets `Content-Language` to `bcp47_tag` unless the handler already set one.
///
/// The teacher's `Response` doesn't expose a "did you already set this
/// header" query, so this crate's contract is: call this *before* any
/// middleware/handler-set `Content-Language`, and have that later call win
/// by simply overwriting it — headers are appended in insertion order and
/// last-write-wins is left to the client's header parser, matching how
/// `HeaderMap` already treats duplicate request headers (§3).
pub fn apply_default_content_language(response: &mut Response, bcp47_tag: &'static str) {
    response.header("content-language", bcp47_tag);
}

/// Extra headers configured for the virtual host (`VirtualHostConfig::extra_headers`).
pub fn apply_extra_headers(response: &mut Response, config: &VirtualHostConfig) {
    for (name, value) in &config.extra_headers {
        response.header(name.clone(), value.clone());
    }
}

/// Resolves `request_path` into the concrete filesystem path the
/// `Continue` routine would serve, applying default-file expansion when the
/// translated path names a directory and the denied-extension check.
///
/// Returns `None` when the request should be answered `NotFound` (escape,
/// missing file) or `Deny` (denied extension) — `found` distinguishes the
/// two via the caller matching on `FileProcessArgs`.
pub fn resolve(
    config: &VirtualHostConfig,
    request_path: &[u8],
) -> Result<std::path::PathBuf, FileProcessArgs> {
    let path = vhost::translate_path(&config.root, request_path).ok_or(FileProcessArgs::NotFound)?;
    finish_resolved(config, path)
}

/// Shared tail of [`resolve`]: directory-index expansion and the
/// denied-extension check, starting from an already-translated path. Used
/// directly by `ServeOtherFQ` (§4.6), whose path is fully qualified and
/// never goes through [`vhost::translate_path`].
fn finish_resolved(
    config: &VirtualHostConfig,
    mut path: std::path::PathBuf,
) -> Result<std::path::PathBuf, FileProcessArgs> {
    if path.is_dir() {
        let mut found = None;
        for default_file in &config.default_files {
            let candidate = path.join(default_file);
            if candidate.is_file() {
                found = Some(candidate);
                break;
            }
        }
        path = found.ok_or(FileProcessArgs::NotFound)?;
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    if vhost::is_denied_extension(config, extension) {
        return Err(FileProcessArgs::Deny);
    }

    Ok(path)
}

/// Executes the routine a [`crate::middleware::MiddlewareChain`] decided,
/// writing status/headers/body onto `response`. `Continue` reads the
/// resolved file from disk (the only async I/O in this module);
/// every other routine is a fixed status/header combination.
pub async fn finish(
    response: &mut Response,
    config: &VirtualHostConfig,
    request_path: &[u8],
    no_cache_requested: bool,
    content_language: &'static str,
) -> crate::Handled {
    match routine_or_continue(config, request_path) {
        Ok(path) => serve_file(response, config, &path, no_cache_requested, content_language).await,
        Err(FileProcessArgs::Deny) => deny(response),
        Err(FileProcessArgs::NotFound) => not_found(response),
        Err(_) => error(response),
    }
}

/// Re-enters file resolution for `ServeOther`/`ServeOtherFQ` (§4.6): `path`
/// replaces the request's own path as the effective lookup, no redirect is
/// sent, and the eventual response's cache policy and content type are
/// derived from `path` rather than the original request. `fully_qualified`
/// selects whether `path` is joined against the virtual host's root
/// (`ServeOther`) or used as-is (`ServeOtherFQ`).
pub async fn finish_other(
    response: &mut Response,
    config: &VirtualHostConfig,
    path: &str,
    fully_qualified: bool,
    no_cache_requested: bool,
    content_language: &'static str,
) -> crate::Handled {
    let resolved = if fully_qualified {
        finish_resolved(config, std::path::PathBuf::from(path))
    } else {
        resolve(config, path.as_bytes())
    };

    match resolved {
        Ok(path) => serve_file(response, config, &path, no_cache_requested, content_language).await,
        Err(FileProcessArgs::Deny) => deny(response),
        Err(FileProcessArgs::NotFound) => not_found(response),
        Err(_) => error(response),
    }
}

fn routine_or_continue(
    config: &VirtualHostConfig,
    request_path: &[u8],
) -> Result<std::path::PathBuf, FileProcessArgs> {
    resolve(config, request_path)
}

async fn serve_file(
    response: &mut Response,
    config: &VirtualHostConfig,
    path: &Path,
    no_cache_requested: bool,
    content_language: &'static str,
) -> crate::Handled {
    let Ok(bytes) = tokio::fs::read(path).await else {
        return not_found(response);
    };

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    let content_type = content_type_for_extension(extension);

    response.status(StatusCode::Ok);
    response.header("content-type", content_type);
    apply_cache_headers(response, config, content_type, no_cache_requested);
    apply_special_headers(response, config, content_type);
    apply_default_content_language(response, content_language);
    apply_extra_headers(response, config);
    response.body(bytes)
}

fn deny(response: &mut Response) -> crate::Handled {
    response.status(StatusCode::Forbidden);
    response.header("cache-control", "no-cache, no-store, must-revalidate");
    response.body("Forbidden")
}

fn not_found(response: &mut Response) -> crate::Handled {
    response.status(StatusCode::NotFound);
    response.header("cache-control", "no-cache, no-store, must-revalidate");
    response.body("Not Found")
}

fn error(response: &mut Response) -> crate::Handled {
    response.status(StatusCode::InternalServerError);
    response.header("cache-control", "no-cache, no-store, must-revalidate");
    response.body("Internal Server Error")
}

/// Executes a non-`Continue` routine directly: `Deny`/`Error`/`NotFound`/
/// `Redirect` need no filesystem access and are handled synchronously here.
/// `ServeOther`/`ServeOtherFQ` re-enter file resolution instead (§4.6) and so
/// need the virtual host's root and an async context — route those to
/// [`finish_other`] rather than calling this function.
pub fn finish_routine(response: &mut Response, routine: &FileProcessArgs) -> crate::Handled {
    match routine {
        FileProcessArgs::Deny => deny(response),
        FileProcessArgs::Error => error(response),
        FileProcessArgs::NotFound => not_found(response),
        FileProcessArgs::Redirect(url) => {
            response.status(StatusCode::MovedPermanently);
            response.header("location", url.clone());
            response.body("")
        }
        FileProcessArgs::Continue | FileProcessArgs::VirtualSkip => {
            unreachable!("Continue/VirtualSkip are handled by the caller, not finish_routine")
        }
        FileProcessArgs::ServeOther(_) | FileProcessArgs::ServeOtherFq(_) => {
            unreachable!("ServeOther/ServeOtherFQ require async file resolution; call finish_other")
        }
    }
}
