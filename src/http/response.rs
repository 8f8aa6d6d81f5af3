//! Outgoing response, its wire format and the JSON encoding used for bodies.

use crate::{
    errors::Error,
    http::types::{Headers, Version},
};
use serde::Serialize;
use serde_json::ser::Formatter;
use std::{io, time::SystemTime};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Written as UTF-8.
    Text(String),
    /// Written as-is.
    Bytes(Vec<u8>),
}

impl Body {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Text(text) => text.as_bytes(),
            Body::Bytes(bytes) => bytes,
        }
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.to_owned())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Bytes(value)
    }
}

impl From<&[u8]> for Body {
    fn from(value: &[u8]) -> Self {
        Body::Bytes(value.to_vec())
    }
}

/// HTTP response handed to the client.
///
/// Data, status and every header start out *unset*. Handlers receive a fresh
/// `Response` by `&mut` and may fill any of them; the router then fills the
/// remaining gaps from the handler's return value and defaults, never
/// overwriting what is already set.
///
/// # Wire format
///
/// ```text
/// [VERSION] SP [STATUS] CRLF
/// [NAME]: SP [VALUE] CRLF          (insertion order)
/// CRLF
/// [BODY] CRLF
/// ```
///
/// There is no reason phrase and no automatic `Content-Length`.
///
/// # Examples
/// ```
/// use microserve::Response;
///
/// let mut resp = Response::new();
/// resp.status(201)
///     .header("Content-Type", "text/plain")
///     .body("created");
///
/// assert_eq!(
///     resp.to_bytes(),
///     b"HTTP/1.1 201\r\nContent-Type: text/plain\r\n\r\ncreated\r\n"
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    data: Option<Body>,
    status: Option<u16>,
    headers: Headers,
    version: Version,
}

impl Response {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// `302` response pointing at `location`, without a body.
    ///
    /// Always a new value; change the code with [`status`](Response::status)
    /// for `301`, `303`, `307` or `308`.
    pub fn redirect<L: Into<String>>(location: L) -> Self {
        let mut resp = Self::new();
        resp.status(302).header("Location", location);
        resp
    }

    #[inline]
    pub fn status(&mut self, status: u16) -> &mut Self {
        self.status = Some(status);
        self
    }

    /// Sets a header, replacing any value stored under the same name.
    #[inline]
    pub fn header<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    #[inline]
    pub fn body<B: Into<Body>>(&mut self, data: B) -> &mut Self {
        self.data = Some(data.into());
        self
    }

    /// Serializes `value` as the body and sets `Content-Type: application/json`.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self, Error> {
        self.data = Some(Body::Text(to_json(value)?));
        self.headers.insert("Content-Type", "application/json");
        Ok(self)
    }

    /// Status line version, `HTTP/1.1` unless changed.
    #[inline]
    pub fn version(&mut self, version: Version) -> &mut Self {
        self.version = version;
        self
    }

    /// Adds a cookie to `Set-Cookie`.
    ///
    /// Several cookies share one header, separated by `, `. `expires` is
    /// written as an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
    ///
    /// ```
    /// use microserve::Response;
    /// use std::time::{Duration, UNIX_EPOCH};
    ///
    /// let mut resp = Response::new();
    /// resp.set_cookie("id", "42", Some(3600), None, Some("/"))
    ///     .set_cookie("theme", "dark", None, Some(UNIX_EPOCH + Duration::from_secs(784111777)), None);
    ///
    /// assert_eq!(
    ///     resp.get_header("set-cookie"),
    ///     Some("id=42; Max-Age=3600; Path=/, theme=dark; Expires=Sun, 06 Nov 1994 08:49:37 GMT")
    /// );
    /// ```
    pub fn set_cookie(
        &mut self,
        key: &str,
        value: &str,
        max_age: Option<u64>,
        expires: Option<SystemTime>,
        path: Option<&str>,
    ) -> &mut Self {
        let mut cookie = format!("{key}={value}");
        if let Some(max_age) = max_age {
            cookie.push_str(&format!("; Max-Age={max_age}"));
        }
        if let Some(expires) = expires {
            cookie.push_str("; Expires=");
            cookie.push_str(&httpdate::fmt_http_date(expires));
        }
        if let Some(path) = path {
            cookie.push_str(&format!("; Path={path}"));
        }

        let cookie = match self.headers.get("Set-Cookie") {
            Some(existing) => format!("{existing}, {cookie}"),
            None => cookie,
        };
        self.headers.insert("Set-Cookie", cookie);
        self
    }
}

// Accessors
impl Response {
    /// Status code, `200` while unset.
    #[inline]
    pub fn status_code(&self) -> u16 {
        self.status.unwrap_or(200)
    }

    #[inline]
    pub fn is_status_set(&self) -> bool {
        self.status.is_some()
    }

    #[inline]
    pub fn data(&self) -> Option<&Body> {
        self.data.as_ref()
    }

    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[inline]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

// First-write-wins setters used while merging a handler result
impl Response {
    /// Sets the status only if it is still unset.
    #[inline]
    pub fn set_default_status(&mut self, status: u16) -> &mut Self {
        self.status.get_or_insert(status);
        self
    }

    /// Sets the body only if it is still unset.
    #[inline]
    pub fn set_default_body<B: Into<Body>>(&mut self, data: B) -> &mut Self {
        if self.data.is_none() {
            self.data = Some(data.into());
        }
        self
    }

    /// Sets a header only if no header of that name exists.
    #[inline]
    pub fn set_default_header<N: Into<String>, V: Into<String>>(
        &mut self,
        name: N,
        value: V,
    ) -> &mut Self {
        self.headers.set_default(name, value);
        self
    }

    /// Fills every unset field of `self` from `other`.
    pub(crate) fn merge(&mut self, other: Response) {
        if let Some(data) = other.data {
            self.set_default_body(data);
        }
        if let Some(status) = other.status {
            self.set_default_status(status);
        }
        self.merge_headers(&other.headers);
    }

    pub(crate) fn merge_headers(&mut self, headers: &Headers) {
        for (name, value) in headers.iter() {
            self.headers.set_default(name, value);
        }
    }
}

// Writer
impl Response {
    /// Serialized response, exactly as [`send`](Response::send) writes it.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self.data.as_ref().map(Body::as_bytes).unwrap_or_default();
        let mut buffer = Vec::with_capacity(64 + self.headers.len() * 32 + body.len());

        buffer.extend_from_slice(self.version.as_str().as_bytes());
        buffer.push(b' ');
        buffer.extend_from_slice(self.status_code().to_string().as_bytes());
        buffer.extend_from_slice(b"\r\n");

        for (name, value) in self.headers.iter() {
            buffer.extend_from_slice(name.as_bytes());
            buffer.extend_from_slice(b": ");
            buffer.extend_from_slice(value.as_bytes());
            buffer.extend_from_slice(b"\r\n");
        }

        buffer.extend_from_slice(b"\r\n");
        buffer.extend_from_slice(body);
        buffer.extend_from_slice(b"\r\n");

        buffer
    }

    /// Writes the response to `sink`, flushes it and shuts it down.
    ///
    /// The shutdown happens even when the write fails.
    ///
    /// # Errors
    ///
    /// The first I/O failure is returned as [`Error::TransportWrite`]; nothing is retried.
    pub async fn send<W: AsyncWrite + Unpin>(self, sink: &mut W) -> Result<(), Error> {
        write_and_close(sink, &self.to_bytes())
            .await
            .map_err(Error::TransportWrite)
    }
}

/// Writes `bytes` and flushes, then always shuts `sink` down.
/// Returns the first error.
pub(crate) async fn write_and_close<W: AsyncWrite + Unpin>(sink: &mut W, bytes: &[u8]) -> io::Result<()> {
    let written = async {
        sink.write_all(bytes).await?;
        sink.flush().await
    }
    .await;
    let closed = sink.shutdown().await;

    written.and(closed)
}

// JSON

// Separators `, ` and `: `, so `{"a":1}` is written as `{"a": 1}`
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    #[inline]
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        match first {
            true => Ok(()),
            false => writer.write_all(b", "),
        }
    }

    #[inline]
    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        match first {
            true => Ok(()),
            false => writer.write_all(b", "),
        }
    }

    #[inline]
    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

/// Encodes `value` as compact JSON with spaces after `,` and `:`.
pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, Error> {
    let mut buffer = Vec::with_capacity(128);
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, SpacedFormatter);
    value
        .serialize(&mut serializer)
        .map_err(Error::JsonSerialize)?;

    String::from_utf8(buffer).map_err(|err| Error::Io(io::Error::new(io::ErrorKind::InvalidData, err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::*;
    use serde_json::json;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn wire_format() {
        #[rustfmt::skip]
        let cases = [
            (Response::new(), "HTTP/1.1 200\r\n\r\n\r\n"),
            (
                { let mut r = Response::new(); r.status(404).body("Not found"); r },
                "HTTP/1.1 404\r\n\r\nNot found\r\n",
            ),
            (
                { let mut r = Response::new(); r.header("B", "2").header("A", "1").body(vec![0x00, 0x01]); r },
                "HTTP/1.1 200\r\nB: 2\r\nA: 1\r\n\r\n\x00\x01\r\n",
            ),
            (
                { let mut r = Response::new(); r.version(Version::Http10).status(204); r },
                "HTTP/1.0 204\r\n\r\n\r\n",
            ),
        ];

        for (resp, expected) in cases {
            assert_eq!(str_op(&resp.to_bytes()), expected);
        }
    }

    #[test]
    fn single_separator_and_terminator() {
        let mut resp = Response::new();
        resp.header("Content-Type", "text/plain").body("hi");
        let bytes = str_op(&resp.to_bytes()).to_owned();

        assert_eq!(bytes.matches("\r\n\r\n").count(), 1);
        assert!(bytes.ends_with("hi\r\n"));
        assert!(!bytes.ends_with("\r\n\r\n"));
    }

    #[test]
    fn redirect() {
        let resp = Response::redirect("/login");

        assert_eq!(resp.status_code(), 302);
        assert_eq!(resp.get_header("location"), Some("/login"));
        assert!(resp.data().is_none());

        let mut resp = Response::redirect("/moved");
        resp.status(301);
        assert_eq!(str_op(&resp.to_bytes()), "HTTP/1.1 301\r\nLocation: /moved\r\n\r\n\r\n");
    }

    #[test]
    fn set_cookie() {
        #[rustfmt::skip]
        let cases = [
            (("a", "1", None, None, None), "a=1"),
            (("a", "1", Some(60), None, None), "a=1; Max-Age=60"),
            (("a", "1", None, None, Some("/app")), "a=1; Path=/app"),
            (("a", "1", Some(0), None, Some("/")), "a=1; Max-Age=0; Path=/"),
            (("a", "1", None, Some(UNIX_EPOCH), None), "a=1; Expires=Thu, 01 Jan 1970 00:00:00 GMT"),
            (("a", "1", Some(5), Some(UNIX_EPOCH + Duration::from_secs(784111777)), Some("/")),
                "a=1; Max-Age=5; Expires=Sun, 06 Nov 1994 08:49:37 GMT; Path=/"),
        ];

        for ((key, value, max_age, expires, path), expected) in cases {
            let mut resp = Response::new();
            resp.set_cookie(key, value, max_age, expires, path);
            assert_eq!(resp.get_header("Set-Cookie"), Some(expected));
        }
    }

    #[test]
    fn first_write_wins() {
        let mut resp = Response::new();
        resp.status(201).header("Content-Type", "text/html");

        resp.set_default_status(200)
            .set_default_body("fallback")
            .set_default_header("content-type", "text/plain")
            .set_default_header("X-Extra", "1");

        assert_eq!(resp.status_code(), 201);
        assert_eq!(resp.data(), Some(&Body::from("fallback")));
        assert_eq!(resp.get_header("Content-Type"), Some("text/html"));
        assert_eq!(resp.get_header("x-extra"), Some("1"));

        let mut other = Response::new();
        other.status(500).body("ignored").header("X-Extra", "2").header("X-New", "3");
        resp.merge(other);

        assert_eq!(resp.status_code(), 201);
        assert_eq!(resp.data(), Some(&Body::from("fallback")));
        assert_eq!(resp.get_header("X-Extra"), Some("1"));
        assert_eq!(resp.get_header("X-New"), Some("3"));
    }

    #[test]
    fn json_spacing() {
        #[rustfmt::skip]
        let cases = [
            (json!({"a": 1}), r#"{"a": 1}"#),
            (json!({"b": [1, 2, {"c": null}], "a": "x"}), r#"{"b": [1, 2, {"c": null}], "a": "x"}"#),
            (json!([]), "[]"),
            (json!({}), "{}"),
        ];

        for (value, expected) in cases {
            assert_eq!(to_json(&value).unwrap(), expected);
        }

        let mut resp = Response::new();
        resp.json(&json!({"ok": true})).unwrap();
        assert_eq!(resp.get_header("content-type"), Some("application/json"));
        assert_eq!(resp.data(), Some(&Body::from(r#"{"ok": true}"#)));
    }

    #[tokio::test]
    async fn send_writes_and_shuts_down() {
        let mut resp = Response::new();
        resp.body("ok");

        let mut sink = Vec::new();
        resp.send(&mut sink).await.unwrap();

        assert_eq!(sink, b"HTTP/1.1 200\r\n\r\nok\r\n");
    }

    #[tokio::test]
    async fn send_closes_sink_after_write_error() {
        let mut sink = BrokenSink::default();

        let err = Response::new().send(&mut sink).await.unwrap_err();

        assert!(
            matches!(&err, Error::TransportWrite(e) if e.kind() == io::ErrorKind::BrokenPipe),
            "{err:?}"
        );
        assert_eq!(sink.shutdowns, 1);
    }
}
