use crate::{
    errors::Error,
    limits::{ConnLimits, ReqLimits, ServerLimits, WaitStrategy},
    router::Router,
    server::connection::{writer, HttpConnection},
};
use crossbeam::queue::SegQueue;
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
};
use tokio::{
    net::{TcpListener, TcpStream},
    task::yield_now,
    time::sleep as tokio_sleep,
};

/// TCP front end: accepts connections and hands each one to a worker,
/// which serves a single request and closes it.
///
/// # Examples
///
/// ```no_run
/// use microserve::{handler, Router, Server};
///
/// #[tokio::main]
/// async fn main() -> std::io::Result<()> {
///     let mut router = Router::new();
///     router.get("/", handler!(|_req, _resp| "Hello world!"));
///
///     Server::builder()
///         .bind("127.0.0.1:8000")?
///         .router(router)
///         .build()
///         .launch()
///         .await;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    stream_queue: TcpQueue,
    error_queue: TcpQueue,
    server_limits: ServerLimits,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            listener: None,
            router: None,
            debug: false,

            server_limits: None,
            request_limits: None,
            connection_limits: None,
        }
    }

    /// Address the listener is bound to.
    #[inline]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever.
    ///
    /// Connections wait in a queue of at most
    /// [`max_pending_connections`](ServerLimits::max_pending_connections);
    /// overflow goes to the 503 handlers.
    pub async fn launch(self) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("listening on {addr}");
        }

        loop {
            let value = match self.listener.accept().await {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    continue;
                }
            };

            match self.stream_queue.len() < self.server_limits.max_pending_connections {
                true => self.stream_queue.push(value),
                false => self.error_queue.push(value),
            }
        }
    }

    #[inline]
    async fn get_stream(queue: &TcpQueue, wait: &WaitStrategy) -> (TcpStream, SocketAddr) {
        loop {
            if let Some(value) = queue.pop() {
                return value;
            }

            match wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder {
    listener: Option<TcpListener>,
    router: Option<Router>,
    debug: bool,

    server_limits: Option<ServerLimits>,
    request_limits: Option<ReqLimits>,
    connection_limits: Option<ConnLimits>,
}

impl ServerBuilder {
    /// Uses an already bound listener.
    ///
    /// Either this or [`bind`](Self::bind) is required.
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Binds a listener on the first address `addr` resolves to, with
    /// `SO_REUSEADDR` set and a backlog of
    /// [`max_pending_connections`](ServerLimits::max_pending_connections).
    ///
    /// Call [`server_limits`](Self::server_limits) first to change the backlog.
    /// Must be called from within a Tokio runtime.
    pub fn bind<A: ToSocketAddrs>(mut self, addr: A) -> io::Result<Self> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
        })?;

        let backlog = self
            .server_limits
            .as_ref()
            .map_or_else(|| ServerLimits::default().max_pending_connections, |l| l.max_pending_connections);

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

        self.listener = Some(TcpListener::from_std(socket.into())?);
        Ok(self)
    }

    /// Sets the routes to serve. **This is a required component.**
    #[inline(always)]
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// Adds a `Server-Timing: req;dur=<ms>ms` header to every response and
    /// the elapsed time to the access log.
    #[inline(always)]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Configures concurrency and overload behavior.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures per-connection timeouts.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request parsing limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Finalizes the builder, spawning the worker tasks.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Error messages:
    /// - ``The `listener` or `bind` method must be called to create``
    /// - ``The `router` method must be called to create``
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let (listener, router, debug, limits) = self.get_all_parts();

        let stream_queue = Arc::new(SegQueue::new());
        let error_queue = Arc::new(SegQueue::new());

        for _ in 0..limits.0.max_connections {
            Self::spawn_worker(&stream_queue, &limits, &router, debug);
        }
        if limits.0.count_503_handlers != 0 {
            for _ in 0..limits.0.count_503_handlers {
                Self::spawn_alarmist(&error_queue, &limits);
            }
        } else {
            Self::spawn_quiet_alarmist(&error_queue, &limits);
        }

        Server {
            listener,
            stream_queue,
            error_queue,
            server_limits: limits.0,
        }
    }

    #[inline]
    fn spawn_worker(queue: &TcpQueue, limits: &AllLimits, router: &Arc<Router>, debug: bool) {
        let queue = queue.clone();
        let wait = limits.0.wait_strategy.clone();
        let conn = HttpConnection::new(router.clone(), limits.1.clone(), limits.2.clone(), debug);

        tokio::spawn(async move {
            loop {
                let (stream, addr) = Server::get_stream(&queue, &wait).await;
                let _ = conn.run(stream, Some(addr)).await;
            }
        });
    }

    #[inline]
    fn spawn_alarmist(queue: &TcpQueue, limits: &AllLimits) {
        let queue = queue.clone();
        let (server_limits, conn_limits, _) = limits.clone();

        tokio::spawn(async move {
            loop {
                let (mut stream, addr) =
                    Server::get_stream(&queue, &server_limits.wait_strategy).await;

                tracing::warn!(peer = %addr, "admission queue full, sending 503");
                let _ = writer::send_error(&mut stream, &Error::ServiceUnavailable, &conn_limits).await;
            }
        });
    }

    #[inline]
    fn spawn_quiet_alarmist(queue: &TcpQueue, limits: &AllLimits) {
        let queue = queue.clone();
        let (server_limits, ..) = limits.clone();

        tokio::spawn(async move {
            loop {
                let (stream, addr) = Server::get_stream(&queue, &server_limits.wait_strategy).await;

                tracing::warn!(peer = %addr, "admission queue full, closing");
                drop(stream);
            }
        });
    }

    #[inline]
    #[track_caller]
    fn get_all_parts(self) -> (TcpListener, Arc<Router>, bool, AllLimits) {
        (
            self.listener
                .expect("The `listener` or `bind` method must be called to create"),
            Arc::new(
                self.router
                    .expect("The `router` method must be called to create"),
            ),
            self.debug,
            (
                self.server_limits.unwrap_or_default(),
                self.connection_limits.unwrap_or_default(),
                self.request_limits.unwrap_or_default(),
            ),
        )
    }
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;
pub(crate) type AllLimits = (ServerLimits, ConnLimits, ReqLimits);
