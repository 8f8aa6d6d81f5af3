use crate::{
    errors::Error,
    http::request::Request,
    limits::{ConnLimits, ReqLimits},
    router::Router,
};
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tokio::{
    io::{split, AsyncRead, AsyncWrite, BufReader},
    time::timeout,
};

/// Serves exactly one request per connection: parse, dispatch, send, close.
pub(crate) struct HttpConnection {
    router: Arc<Router>,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    debug: bool,
}

impl HttpConnection {
    #[inline]
    pub(crate) fn new(
        router: Arc<Router>,
        conn_limits: ConnLimits,
        req_limits: ReqLimits,
        debug: bool,
    ) -> Self {
        Self {
            router,
            conn_limits,
            req_limits,
            debug,
        }
    }

    pub(crate) async fn run<S>(&self, stream: S, peer: Option<SocketAddr>) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let started = Instant::now();
        let (reader, mut sink) = split(stream);
        let mut reader = BufReader::new(reader);

        let parsed = timeout(
            self.conn_limits.socket_read_timeout,
            Request::parse(&mut reader, &self.req_limits),
        )
        .await;

        let mut request = match parsed {
            Ok(Ok(request)) => request,
            Ok(Err(err)) => {
                tracing::warn!(peer = %Peer(peer), error = %err, "rejected request");
                return writer::send_error(&mut sink, &err, &self.conn_limits).await;
            }
            Err(_) => {
                tracing::debug!(peer = %Peer(peer), "timed out waiting for request");
                return Ok(());
            }
        };
        request.source = peer;

        let mut response = match self.router.dispatch(&request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(
                    peer = %Peer(peer),
                    error = %err,
                    "{} {} failed",
                    request.method_str(),
                    request.path(),
                );
                return writer::send_error(&mut sink, &err, &self.conn_limits).await;
            }
        };

        if self.debug {
            let elapsed = started.elapsed().as_secs_f64() * 1000.0;
            response.header("Server-Timing", format!("req;dur={elapsed:.3}ms"));
        }

        let status = response.status_code();
        let sent = writer::send_response(&mut sink, response, &self.conn_limits).await;

        let line = format!(
            "{}: {} {} {status}",
            Peer(peer),
            request.method_str(),
            request.path(),
        );
        match self.debug {
            true => tracing::info!("{line} ({:.3}ms)", started.elapsed().as_secs_f64() * 1000.0),
            false => tracing::info!("{line}"),
        }

        if let Err(err) = &sent {
            tracing::error!(peer = %Peer(peer), error = %err, "response not delivered");
        }
        sent
    }
}

// `ip:port`, or `-` when the peer is unknown
struct Peer(Option<SocketAddr>);

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(addr) => write!(f, "{addr}"),
            None => f.write_str("-"),
        }
    }
}

pub(crate) mod writer {
    use crate::{
        errors::Error,
        http::response::{write_and_close, Response},
        limits::ConnLimits,
    };
    use std::io;
    use tokio::{io::AsyncWrite, time::timeout};

    /// Writes the static reply for `error`, or nothing if it has none.
    pub(crate) async fn send_error<W: AsyncWrite + Unpin>(
        sink: &mut W,
        error: &Error,
        limits: &ConnLimits,
    ) -> Result<(), Error> {
        match error.as_http() {
            Some(bytes) => write_bytes(sink, bytes, limits).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn write_bytes<W: AsyncWrite + Unpin>(
        sink: &mut W,
        bytes: &[u8],
        limits: &ConnLimits,
    ) -> Result<(), Error> {
        timeout(limits.socket_write_timeout, write_and_close(sink, bytes))
            .await
            .map_err(|_| timed_out())?
            .map_err(Error::TransportWrite)
    }

    pub(crate) async fn send_response<W: AsyncWrite + Unpin>(
        sink: &mut W,
        response: Response,
        limits: &ConnLimits,
    ) -> Result<(), Error> {
        timeout(limits.socket_write_timeout, response.send(sink))
            .await
            .map_err(|_| timed_out())?
    }

    #[inline]
    fn timed_out() -> Error {
        Error::TransportWrite(io::Error::new(io::ErrorKind::TimedOut, "write timed out"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::*;
    use crate::http::response::Response;
    use serde_json::json;
    use std::{io, time::Duration};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn connection(debug: bool) -> HttpConnection {
        let mut router = Router::new();
        router
            .get("/hello", crate::handler!(|_req, _resp| "hi"))
            .get("/peer", crate::handler!(|req, _resp| {
                req.source().map(|addr| addr.to_string()).unwrap_or_default()
            }))
            .get("/bad", crate::handler!(|_req, _resp| json!("scalar")));

        HttpConnection::new(
            Arc::new(router),
            ConnLimits {
                socket_read_timeout: Duration::from_millis(200),
                ..ConnLimits::default()
            },
            ReqLimits::default(),
            debug,
        )
    }

    async fn exchange(conn: &HttpConnection, raw: &[u8], peer: Option<SocketAddr>) -> String {
        let (mut client, server) = duplex(64 * 1024);
        client.write_all(raw).await.unwrap();

        let result = conn.run(server, peer).await;
        assert!(result.is_ok(), "{result:?}");

        let mut output = Vec::new();
        client.read_to_end(&mut output).await.unwrap();
        str_op(&output).to_owned()
    }

    #[tokio::test]
    async fn responses() {
        let conn = connection(false);

        #[rustfmt::skip]
        let cases: [(&[u8], &str); 6] = [
            (b"GET /hello HTTP/1.1\r\n\r\n", "HTTP/1.1 200\r\nContent-Type: text/plain\r\n\r\nhi\r\n"),
            (b"GET /nope HTTP/1.1\r\n\r\n", "HTTP/1.1 404\r\n\r\nNot found\r\n"),
            (b"GET /bad HTTP/1.1\r\n\r\n", "HTTP/1.1 500\r\ncontent-type: text/plain\r\n\r\nInternal Server Error\r\n"),
            (b"GET / HTTP/1.1\r\nBroken\r\n\r\n", "HTTP/1.1 400\r\ncontent-type: text/plain\r\n\r\nBad Request\r\n"),
            (b"GARBAGE\r\n\r\n", ""),
            (b"GET /hello HTTP/1.1\r\n", ""),
        ];

        for (raw, expected) in cases {
            assert_eq!(exchange(&conn, raw, None).await, expected, "{:?}", str_op(raw));
        }
    }

    #[tokio::test]
    async fn peer_is_injected() {
        let conn = connection(false);
        let peer: SocketAddr = "10.1.2.3:4567".parse().unwrap();

        let output = exchange(&conn, b"GET /peer HTTP/1.1\r\n\r\n", Some(peer)).await;
        assert!(output.ends_with("\r\n\r\n10.1.2.3:4567\r\n"), "{output:?}");
    }

    #[tokio::test]
    async fn debug_adds_server_timing() {
        let conn = connection(true);

        let output = exchange(&conn, b"GET /hello HTTP/1.1\r\n\r\n", None).await;
        assert!(output.contains("\r\nServer-Timing: req;dur="), "{output:?}");
        assert!(output.ends_with("\r\n\r\nhi\r\n"));
    }

    #[tokio::test]
    async fn read_timeout_closes_silently() {
        let conn = connection(false);
        let (mut client, server) = duplex(1024);
        client.write_all(b"GET /hello HTTP/1.1\r\n").await.unwrap();

        // The client keeps its write half open, so only the timeout ends the read
        conn.run(server, None).await.unwrap();

        let mut output = Vec::new();
        client.read_to_end(&mut output).await.unwrap();
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn error_reply_closes_broken_sink() {
        let mut sink = BrokenSink::default();

        let err = writer::send_error(&mut sink, &Error::BodyTooLarge, &ConnLimits::default())
            .await
            .unwrap_err();

        assert!(matches!(&err, Error::TransportWrite(e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert_eq!(sink.shutdowns, 1);
    }

    #[tokio::test]
    async fn write_timeout() {
        // Nobody reads the client end, so the one-byte pipe fills up
        let (_client, mut server) = duplex(1);
        let limits = ConnLimits {
            socket_write_timeout: Duration::from_millis(50),
            ..ConnLimits::default()
        };

        let mut resp = Response::new();
        resp.body("longer than the pipe");

        let err = writer::send_response(&mut server, resp, &limits).await.unwrap_err();
        assert!(
            matches!(&err, Error::TransportWrite(e) if e.kind() == io::ErrorKind::TimedOut),
            "{err:?}"
        );
    }
}
