//! Server configuration: concurrency, timeouts and request parsing limits
//!
//! Every limit struct has a [`Default`] implementation, so only the fields you
//! care about need to be spelled out.
//!
//! # Examples
//!
//! ```no_run
//! use microserve::{Router, Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use tokio::net::TcpListener;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .router(Router::new())
//!         .server_limits(ServerLimits {
//!             max_connections: 500,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             body_size: 16 * 1024 * 1024,
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use std::time::Duration;

/// Controls server-level concurrency, queueing, and overload behavior.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  || TCP_STREAM
///                                  \/
/// [--------------]   Yes   /-----------------\   No   [-------------]
/// [ Add to queue ] <====== | Room in queue?  | =====> [ Sending 503 ]
/// [--------------]         \-----------------/        [-------------]
///        ||
///        \==================\\          //====================\
///                            V          V                    ||
/// [---------]   Yes   /--------------------------\   No   [------]
/// [ Worker  ] <====== | Is there a free worker?  | =====> [ Wait ]
/// [---------]         \--------------------------/        [------]
/// ```
///
/// Workers are long-lived tasks spawned once by
/// [`ServerBuilder::build`](crate::ServerBuilder::build). Each one serves a
/// single connection at a time: parse, dispatch, send, close.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of worker tasks, i.e. connections served concurrently (default: `100`).
    pub max_connections: usize,

    /// Maximum number of accepted connections waiting for a worker (default: `250`).
    ///
    /// Also used as the listen backlog by [`ServerBuilder::bind`](crate::ServerBuilder::bind).
    /// Once the queue is full, new connections are handed to the 503 handlers.
    pub max_pending_connections: usize,

    /// How idle workers wait for the next connection (default: `Sleep(50μs)`).
    pub wait_strategy: WaitStrategy,

    /// Tasks answering overflow connections with `503` (default: `1`).
    ///
    /// Set to 0 to close overflow connections without a response.
    pub count_503_handlers: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            count_503_handlers: 1,

            _priv: (),
        }
    }
}

/// Strategy for worker task waiting when no connections are available
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// While waiting, uses [`tokio::task::yield_now()`]
    ///
    /// Lowest latency, but keeps a core busy even when the server is idle.
    Yield,

    /// While waiting, uses [`tokio::time::sleep()`]
    Sleep(Duration),
}

/// Per-connection timeouts
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum time to receive and parse a full request (default: `2 seconds`)
    ///
    /// The connection is closed without a response when it runs out.
    pub socket_read_timeout: Duration,

    /// Maximum time to write the response and close the stream (default: `3 seconds`)
    pub socket_write_timeout: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),

            _priv: (),
        }
    }
}

/// Bounds applied while parsing a request.
///
/// | Limit | Error | Generic reply |
/// |-------|-------|---------------|
/// | `line_size` | [`LineTooLong`](crate::Error::LineTooLong) | `414` |
/// | `header_count` | [`TooManyHeaders`](crate::Error::TooManyHeaders) | `431` |
/// | `body_size` | [`BodyTooLarge`](crate::Error::BodyTooLarge) | `413` |
/// | `params` | [`TooManyParams`](crate::Error::TooManyParams) | `400` |
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum length of the request line or a header line, terminator included (default: `8 KB`)
    pub line_size: usize,

    /// Maximum number of header lines (default: `32`)
    ///
    /// `Cookie` and `User-Agent` count towards the limit too.
    pub header_count: usize,

    /// Maximum `Content-Length` accepted (default: `1 MB`)
    pub body_size: usize,

    /// Maximum number of `key=value` pairs in one query string, cookie header
    /// or form body (default: `64`)
    pub params: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            line_size: 8 * 1024,
            header_count: 32,
            body_size: 1024 * 1024,
            params: 64,

            _priv: (),
        }
    }
}
