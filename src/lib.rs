//! microserve - small HTTP/1.x request-response framework
//!
//! Handlers are registered on a [`Router`] by exact path and method.
//! Each connection carries exactly one request: it is parsed, dispatched,
//! answered and closed.
//!
//! # Features
//!
//! - **Exact routing** - `(method, path)` table, `OPTIONS` and `HEAD` added to every route
//! - **Flexible handler results** - text, JSON, bytes, `(data, status)`,
//!   `(data, status, headers)` or a full [`Response`]
//! - **Request decoding** - query strings, cookies, JSON and url-encoded form bodies
//! - **Static files** - directory prefixes served with guessed content types
//! - **Bounded resources** - worker pool, admission queue with `503` overflow,
//!   socket timeouts and request size [limits]
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use microserve::{handler, Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let mut router = Router::new();
//!     router.get("/", handler!(|_req, _resp| "Hello world!"));
//!
//!     Server::builder()
//!         .bind("127.0.0.1:8080")?
//!         .router(router)
//!         .build()
//!         .launch()
//!         .await;
//!     Ok(())
//! }
//! ```
//! JSON, status codes and headers:
//! ```no_run
//! use microserve::{handler, Headers, Response, Router, Server};
//! use serde_json::json;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut router = Router::new();
//!     router
//!         .get("/user", handler!(|req, _resp| {
//!             match req.query_param("id").flatten() {
//!                 Some(id) => (json!({"id": id}), 200),
//!                 None => (json!({"error": "missing id"}), 400),
//!             }
//!         }))
//!         .post("/echo", handler!(|req, _resp| {
//!             let body = req.json().cloned().unwrap_or(json!({}));
//!             (body, 201, Headers::from([("X-Echo", "1")]))
//!         }))
//!         .get("/old", handler!(|_req, _resp| Response::redirect("/user")))
//!         .static_files("/static", "./static");
//!
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .router(router)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//! Advanced configuration:
//! ```no_run
//! use microserve::{
//!     handler,
//!     limits::{ConnLimits, ReqLimits, ServerLimits},
//!     Router, Server,
//! };
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let mut router = Router::new();
//!     router.get("/", handler!(|_req, _resp| "ok"));
//!
//!     Server::builder()
//!         .server_limits(ServerLimits {
//!             max_connections: 500,
//!             max_pending_connections: 1000,
//!             ..ServerLimits::default()
//!         })
//!         .bind("0.0.0.0:8080")?
//!         .router(router)
//!         .debug(true)
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 64,
//!             body_size: 16 * 1024 * 1024,
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//!     Ok(())
//! }
//! ```

pub(crate) mod http {
    pub mod query;
    pub(crate) mod files;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub mod limits;
pub(crate) mod router;

pub use crate::{
    errors::Error,
    http::{
        files::{content_type, send_file},
        query,
        request::Request,
        response::{Body, Response},
        types::{Headers, Method, Params, Version},
    },
    router::{handler_fn, BoxFuture, Handler, Payload, Reply, Router},
    server::server_impl::{Server, ServerBuilder},
};
