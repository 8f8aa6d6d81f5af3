use crate::{
    errors::Error,
    http::{
        query::Query,
        types::{slice_to_usize, Headers, Method, Params},
    },
    limits::ReqLimits,
};
use memchr::memmem;
use serde_json::Value;
use std::{io, net::SocketAddr};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// One parsed HTTP request.
///
/// Built by [`Request::parse`] and read-only afterwards.
///
/// # Input format
///
/// ```text
/// [METHOD] SP [PATH] SP [VERSION] CRLF
/// [NAME]: SP [VALUE] CRLF          (zero or more)
/// CRLF
/// [BODY]                           (exactly Content-Length bytes)
/// ```
///
/// - The request line is split on whitespace and must yield exactly three tokens.
///   The method is not validated here; [`method`](Request::method) returns `None`
///   for tokens a route can never match.
/// - Lines may end with a bare `LF`.
/// - Header values lose trailing whitespace. Names are case-insensitive.
/// - `Cookie` and `User-Agent` are not kept in [`headers`](Request::headers); they
///   are exposed through [`cookies`](Request::cookies) and
///   [`user_agent`](Request::user_agent).
/// - Without `Content-Length` the body is empty, whatever follows the headers.
/// - Nothing is percent-decoded.
#[derive(Debug, Clone, Default)]
pub struct Request {
    method: String,
    path: String,
    version: String,

    headers: Headers,
    body: Vec<u8>,

    json: Option<Value>,
    form: Option<Params>,
    query: Option<Params>,
    cookies: Option<Params>,
    user_agent: Option<String>,

    pub(crate) source: Option<SocketAddr>,
}

// Public API
impl Request {
    /// Method parsed into a [`Method`], `None` if it is not one of the routable methods.
    #[inline]
    pub fn method(&self) -> Option<Method> {
        self.method.parse().ok()
    }

    /// Method token exactly as received.
    #[inline]
    pub fn method_str(&self) -> &str {
        &self.method
    }

    /// Path without the query string.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Version token as received, e.g. `HTTP/1.1`.
    #[inline]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Case-insensitive header lookup.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Raw body, empty when no `Content-Length` was sent.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Decoded body for `Content-Type: application/json`.
    #[inline]
    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    /// Decoded body for `Content-Type: application/x-www-form-urlencoded`.
    #[inline]
    pub fn form(&self) -> Option<&Params> {
        self.form.as_ref()
    }

    /// Query parameters; `Some` exactly when the path contained `?`.
    #[inline]
    pub fn query(&self) -> Option<&Params> {
        self.query.as_ref()
    }

    /// Value of a single query parameter. `Some(None)` for a bare `?flag`.
    #[inline]
    pub fn query_param(&self, key: &str) -> Option<Option<&str>> {
        self.query.as_ref()?.get(key).map(Option::as_deref)
    }

    #[inline]
    pub fn cookies(&self) -> Option<&Params> {
        self.cookies.as_ref()
    }

    #[inline]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.as_ref()?.get(name)?.as_deref()
    }

    #[inline]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Peer address of the connection, set by the server.
    #[inline]
    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }
}

// Parser
impl Request {
    /// Reads one request from `reader`.
    ///
    /// # Errors
    ///
    /// - [`MalformedRequest`](Error::MalformedRequest): request line is not three tokens
    /// - [`TruncatedStream`](Error::TruncatedStream): EOF before the blank line or
    ///   inside the body
    /// - [`InvalidHeader`](Error::InvalidHeader), [`InvalidContentLength`](Error::InvalidContentLength),
    ///   [`InvalidEncoding`](Error::InvalidEncoding)
    /// - [`InvalidBodyEncoding`](Error::InvalidBodyEncoding), [`InvalidJson`](Error::InvalidJson)
    /// - limit violations from [`ReqLimits`]
    pub async fn parse<R>(reader: &mut R, limits: &ReqLimits) -> Result<Request, Error>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut request = Request::default();
        let mut line = Vec::with_capacity(256);

        read_line(reader, &mut line, limits.line_size).await?;
        request.parse_first_line(&line)?;

        let mut count = 0;
        loop {
            read_line(reader, &mut line, limits.line_size).await?;
            if line.is_empty() {
                break;
            }

            count += 1;
            if count > limits.header_count {
                return Err(Error::TooManyHeaders);
            }

            request.parse_header(&line, limits)?;
        }

        request.read_body(reader, limits).await?;
        request.decode_body(limits)?;
        request.split_query(limits)?;

        Ok(request)
    }

    fn parse_first_line(&mut self, line: &[u8]) -> Result<(), Error> {
        let line = as_str(line)?;
        let mut parts = line.split_whitespace();

        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(path), Some(version), None) => {
                self.method = method.to_owned();
                self.path = path.to_owned();
                self.version = version.to_owned();
                Ok(())
            }
            _ => Err(Error::MalformedRequest),
        }
    }

    fn parse_header(&mut self, line: &[u8], limits: &ReqLimits) -> Result<(), Error> {
        let line = as_str(line)?;
        let split = memmem::find(line.as_bytes(), b": ").ok_or(Error::InvalidHeader)?;

        let name = &line[..split];
        let value = line[split + 2..].trim_end();

        if name.eq_ignore_ascii_case("cookie") {
            let cookies = self.cookies.get_or_insert_with(Params::new);
            Query::parse_into(cookies, value, limits.params)?;
        } else if name.eq_ignore_ascii_case("user-agent") {
            self.user_agent = Some(value.to_owned());
        } else {
            self.headers.insert(name, value);
        }

        Ok(())
    }

    async fn read_body<R>(&mut self, reader: &mut R, limits: &ReqLimits) -> Result<(), Error>
    where
        R: AsyncBufRead + Unpin,
    {
        let Some(value) = self.headers.get("content-length") else {
            return Ok(());
        };

        let length = slice_to_usize(value.trim().as_bytes()).ok_or(Error::InvalidContentLength)?;
        if length > limits.body_size {
            return Err(Error::BodyTooLarge);
        }

        self.body = vec![0; length];
        reader
            .read_exact(&mut self.body)
            .await
            .map_err(|err| match err.kind() {
                io::ErrorKind::UnexpectedEof => Error::TruncatedStream,
                _ => Error::Io(err),
            })?;

        Ok(())
    }

    fn decode_body(&mut self, limits: &ReqLimits) -> Result<(), Error> {
        match self.headers.get("content-type") {
            Some("application/json") => {
                let text = simdutf8::basic::from_utf8(&self.body)
                    .map_err(|_| Error::InvalidBodyEncoding)?;
                self.json = Some(serde_json::from_str(text).map_err(Error::InvalidJson)?);
            }
            Some("application/x-www-form-urlencoded") => {
                let text = simdutf8::basic::from_utf8(&self.body)
                    .map_err(|_| Error::InvalidBodyEncoding)?;
                self.form = Some(Query::parse(text, limits.params)?);
            }
            _ => {}
        }

        Ok(())
    }

    fn split_query(&mut self, limits: &ReqLimits) -> Result<(), Error> {
        let Some(index) = self.path.find('?') else {
            return Ok(());
        };

        self.query = Some(Query::parse(&self.path[index + 1..], limits.params)?);
        self.path.truncate(index);

        Ok(())
    }
}

// Reads up to and including `\n`, then strips the line terminator.
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>, limit: usize) -> Result<(), Error>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();

    let read = (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', line)
        .await?;

    if line.last() != Some(&b'\n') {
        // A full-length read may still have ended exactly at EOF
        let at_eof = read < limit || reader.fill_buf().await?.is_empty();
        return Err(match at_eof {
            true => Error::TruncatedStream,
            false => Error::LineTooLong,
        });
    }

    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }

    Ok(())
}

#[inline(always)]
fn as_str(line: &[u8]) -> Result<&str, Error> {
    simdutf8::basic::from_utf8(line).map_err(|_| Error::InvalidEncoding)
}
