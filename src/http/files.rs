use crate::http::response::Response;
use std::path::Path;

#[rustfmt::skip]
const CONTENT_TYPES: [(&str, &str); 22] = [
    ("html", "text/html"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
    ("json", "application/json"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("mp4", "video/mp4"),
    ("mp3", "audio/mpeg"),
    ("ogg", "audio/ogg"),
    ("wav", "audio/wav"),
    ("webm", "audio/webm"),
    ("xml", "application/xml"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("txt", "text/plain"),
];

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type for `path` from its extension, ignoring letter case.
pub fn content_type(path: &str) -> &'static str {
    let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) else {
        return FALLBACK_CONTENT_TYPE;
    };

    match CONTENT_TYPES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
    {
        Some((_, mime)) => *mime,
        None => {
            tracing::debug!(extension = ext, "unknown file extension, using {FALLBACK_CONTENT_TYPE}");
            FALLBACK_CONTENT_TYPE
        }
    }
}

/// Reads the file at `path` into a `200` response.
///
/// - `mimetype` overrides the content type guessed from the extension
/// - `download_name` adds `Content-Disposition: attachment; filename="..."`
///
/// A path containing `..` is answered with `404 Not found` without touching
/// the filesystem; so is a file that cannot be read.
///
/// # Examples
/// ```no_run
/// use microserve::send_file;
///
/// # async fn run() {
/// let resp = send_file("static/report.pdf", None, Some("report.pdf")).await;
/// assert_eq!(resp.get_header("content-type"), Some("application/pdf"));
/// # }
/// ```
pub async fn send_file(path: &str, mimetype: Option<&str>, download_name: Option<&str>) -> Response {
    if path.contains("..") {
        tracing::warn!(path, "refusing path with `..`");
        return not_found();
    }

    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(err) => {
            tracing::debug!(path, error = %err, "file not readable");
            return not_found();
        }
    };

    let mut resp = Response::new();
    resp.status(200)
        .header("Content-Length", data.len().to_string())
        .header("Content-Type", mimetype.unwrap_or_else(|| content_type(path)));

    if let Some(name) = download_name {
        resp.header(
            "Content-Disposition",
            format!("attachment; filename=\"{name}\""),
        );
    }

    resp.body(data);
    resp
}

#[inline]
pub(crate) fn not_found() -> Response {
    let mut resp = Response::new();
    resp.status(404).body("Not found");
    resp
}
