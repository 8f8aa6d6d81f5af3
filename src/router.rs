//! Route tables, handler invocation and result normalization.

use crate::{
    errors::Error,
    http::{
        files::{not_found, send_file},
        request::Request,
        response::{to_json, Body, Response},
        types::{Headers, Method},
    },
};
use serde_json::Value;
use std::{collections::HashMap, fmt, future::Future, pin::Pin, sync::Arc};

/// Boxed future returned by [`Handler::call`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Request handler registered on a [`Router`].
///
/// The handler receives the parsed request and a fresh, unset [`Response`].
/// Anything it writes into the response takes precedence over the [`Reply`]
/// it returns.
///
/// Closures are easiest written with the [`handler!`](crate::handler) macro:
/// ```
/// use microserve::{handler, Router};
/// use serde_json::json;
///
/// let mut router = Router::new();
/// router
///     .get("/", handler!(|_req, _resp| "Hello world!"))
///     .get("/user", handler!(|req, _resp| {
///         let name = req.query_param("name").flatten().unwrap_or("anonymous");
///         (json!({"name": name}), 200)
///     }));
/// ```
///
/// Types can implement the trait directly:
/// ```
/// use microserve::{BoxFuture, Handler, Reply, Request, Response};
///
/// struct Greeter {
///     greeting: String,
/// }
///
/// impl Handler for Greeter {
///     fn call<'a>(&'a self, _: &'a Request, resp: &'a mut Response) -> BoxFuture<'a, Reply> {
///         Box::pin(async move {
///             resp.header("X-Greeter", "1");
///             Reply::from(self.greeting.clone())
///         })
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, request: &'a Request, response: &'a mut Response) -> BoxFuture<'a, Reply>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a Request, &'a mut Response) -> BoxFuture<'a, Reply> + Send + Sync + 'static,
{
    #[inline]
    fn call<'a>(&'a self, request: &'a Request, response: &'a mut Response) -> BoxFuture<'a, Reply> {
        self(request, response)
    }
}

/// Pins down the signature of a handler closure so it can be registered.
///
/// ```
/// use microserve::{handler_fn, Reply, Router};
///
/// let mut router = Router::new();
/// router.get("/ping", handler_fn(|_req, _resp| Box::pin(async { Reply::from("pong") })));
/// ```
#[inline(always)]
pub fn handler_fn<F>(f: F) -> F
where
    F: for<'a> Fn(&'a Request, &'a mut Response) -> BoxFuture<'a, Reply> + Send + Sync + 'static,
{
    f
}

/// Builds a [`Handler`] from a closure-like body returning anything that
/// converts into a [`Reply`]. The body runs inside an `async move` block, so
/// it may `.await`.
#[macro_export]
macro_rules! handler {
    (|$req:pat_param, $resp:pat_param| $body:expr) => {
        $crate::handler_fn(move |$req, $resp| {
            ::std::boxed::Box::pin(async move { $crate::Reply::from($body) })
        })
    };
}

// REPLY

/// Data part of a handler result.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `Content-Type: text/plain` unless already set
    Text(String),
    /// Must be an object or an array; `Content-Type: application/json` unless already set
    Json(Value),
    /// Written as-is, no content type default
    Bytes(Vec<u8>),
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_owned())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(value)
    }
}

/// Everything a handler can return.
///
/// The tuple shapes mirror `data`, `(data, status)` and
/// `(data, status, headers)`; the status defaults to `200` and headers to none.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Response(Response),
    Data(Payload),
    Status(Payload, u16),
    Full(Payload, u16, Headers),
    /// No result; always rejected with [`Error::UnsupportedHandlerResult`].
    Empty,
}

impl From<Response> for Reply {
    fn from(value: Response) -> Self {
        Reply::Response(value)
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Empty
    }
}

macro_rules! impl_reply_from {
    ($($t:ty),*) => {$(
        impl From<$t> for Reply {
            fn from(data: $t) -> Self {
                Reply::Data(data.into())
            }
        }

        impl From<($t,)> for Reply {
            fn from((data,): ($t,)) -> Self {
                Reply::Data(data.into())
            }
        }

        impl From<($t, u16)> for Reply {
            fn from((data, status): ($t, u16)) -> Self {
                Reply::Status(data.into(), status)
            }
        }

        impl<H: Into<Headers>> From<($t, u16, H)> for Reply {
            fn from((data, status, headers): ($t, u16, H)) -> Self {
                Reply::Full(data.into(), status, headers.into())
            }
        }
    )*};
}

impl_reply_from!(&str, String, Value, Vec<u8>, Payload);

impl Reply {
    /// Fills the unset parts of `response`; set parts are never overwritten.
    pub(crate) fn apply(self, response: &mut Response) -> Result<(), Error> {
        let (data, status, headers) = match self {
            Reply::Response(other) => {
                response.merge(other);
                return Ok(());
            }
            Reply::Data(data) => (data, 200, None),
            Reply::Status(data, status) => (data, status, None),
            Reply::Full(data, status, headers) => (data, status, Some(headers)),
            Reply::Empty => return Err(Error::UnsupportedHandlerResult("empty reply")),
        };

        let (body, content_type) = match data {
            Payload::Text(text) => (Body::Text(text), Some("text/plain")),
            Payload::Json(value @ (Value::Object(_) | Value::Array(_))) => {
                (Body::Text(to_json(&value)?), Some("application/json"))
            }
            Payload::Json(_) => return Err(Error::UnsupportedHandlerResult("JSON scalar")),
            Payload::Bytes(bytes) => (Body::Bytes(bytes), None),
        };

        response.set_default_status(status);
        if let Some(headers) = headers {
            response.merge_headers(&headers);
        }
        response.set_default_body(body);
        if let Some(content_type) = content_type {
            response.set_default_header("Content-Type", content_type);
        }

        Ok(())
    }
}

// ROUTER

/// Route table plus static-file prefixes.
///
/// Routes are registered on `&mut Router` before the server is built; the
/// server only reads the tables afterwards.
#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<(Method, String), Arc<dyn Handler>>,
    static_routes: Vec<(String, String)>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .field("static_routes", &self.static_routes)
            .finish()
    }
}

impl Router {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `path` under the given method names.
    ///
    /// An empty list means `GET`. `OPTIONS` and `HEAD` are always added.
    /// Registering the same method and path again replaces the earlier handler.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidMethod`] for a name outside `GET`, `POST`, `PUT`,
    /// `PATCH`, `DELETE`, `OPTIONS`, `HEAD`. Nothing is registered in that case.
    ///
    /// # Examples
    /// ```
    /// use microserve::{handler, Router};
    ///
    /// let mut router = Router::new();
    /// router.route("/items", &["GET", "POST"], handler!(|_req, _resp| "items"))?;
    ///
    /// assert!(router.route("/x", &["TRACE"], handler!(|_req, _resp| "")).is_err());
    /// # Ok::<(), microserve::Error>(())
    /// ```
    pub fn route<H: Handler>(
        &mut self,
        path: &str,
        methods: &[&str],
        handler: H,
    ) -> Result<&mut Self, Error> {
        let methods = methods
            .iter()
            .map(|name| name.parse::<Method>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self.route_methods(path, &methods, handler))
    }

    /// Typed form of [`route`](Router::route).
    pub fn route_methods<H: Handler>(&mut self, path: &str, methods: &[Method], handler: H) -> &mut Self {
        let handler: Arc<dyn Handler> = Arc::new(handler);

        let mut methods = match methods.is_empty() {
            true => vec![Method::Get],
            false => methods.to_vec(),
        };
        for implied in [Method::Options, Method::Head] {
            if !methods.contains(&implied) {
                methods.push(implied);
            }
        }

        for method in methods {
            tracing::debug!("registering route {method} {path}");
            self.routes.insert((method, path.to_owned()), handler.clone());
        }

        self
    }

    #[inline]
    pub fn get<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.route_methods(path, &[Method::Get], handler)
    }

    #[inline]
    pub fn post<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.route_methods(path, &[Method::Post], handler)
    }

    #[inline]
    pub fn put<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.route_methods(path, &[Method::Put], handler)
    }

    #[inline]
    pub fn patch<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.route_methods(path, &[Method::Patch], handler)
    }

    #[inline]
    pub fn delete<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.route_methods(path, &[Method::Delete], handler)
    }

    /// Serves files under `directory` for every path starting with `prefix`.
    ///
    /// Both are normalized to end with `/`. Prefixes are tried in registration
    /// order; registering a prefix again replaces its directory in place.
    pub fn static_files(&mut self, prefix: &str, directory: &str) -> &mut Self {
        let prefix = with_trailing_slash(prefix);
        let directory = with_trailing_slash(directory);

        tracing::debug!("registering static route {prefix} -> {directory}");
        match self.static_routes.iter_mut().find(|(p, _)| *p == prefix) {
            Some(entry) => entry.1 = directory,
            None => self.static_routes.push((prefix, directory)),
        }

        self
    }

    /// `true` if a handler is registered for `method` and `path`.
    #[inline]
    pub fn has_route(&self, method: Method, path: &str) -> bool {
        self.routes.contains_key(&(method, path.to_owned()))
    }

    /// Produces the response for `request`.
    ///
    /// 1. The first static prefix matching the path is served with [`send_file`].
    /// 2. Otherwise the handler registered for the exact method and path runs
    ///    and its [`Reply`] is merged into the response it was given.
    /// 3. Otherwise `404 Not found`.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedHandlerResult`] when the handler returns
    /// [`Reply::Empty`] or a JSON value that is neither an object nor an array.
    pub async fn dispatch(&self, request: &Request) -> Result<Response, Error> {
        let path = request.path();

        for (prefix, directory) in &self.static_routes {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                return Ok(send_file(&format!("{directory}{rest}"), None, None).await);
            }
        }

        let Some(handler) = request
            .method()
            .and_then(|method| self.routes.get(&(method, path.to_owned())))
        else {
            return Ok(not_found());
        };

        let mut response = Response::new();
        let reply = handler.call(request, &mut response).await;
        reply.apply(&mut response)?;

        Ok(response)
    }
}

#[inline]
fn with_trailing_slash(value: &str) -> String {
    match value.ends_with('/') {
        true => value.to_owned(),
        false => format!("{value}/"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{limits::ReqLimits, tools::*};
    use serde_json::json;
    use std::io::Write;

    async fn request(raw: &str) -> Request {
        Request::parse(&mut raw.as_bytes(), &ReqLimits::default())
            .await
            .unwrap()
    }

    async fn dispatch(router: &Router, raw: &str) -> Result<Response, Error> {
        router.dispatch(&request(raw).await).await
    }

    #[test]
    fn route_registration() {
        let mut router = Router::new();
        router
            .route("/a", &[], handler!(|_req, _resp| "a"))
            .unwrap()
            .route("/b", &["POST", "PUT"], handler!(|_req, _resp| "b"))
            .unwrap();

        #[rustfmt::skip]
        let cases = [
            (Method::Get, "/a", true),
            (Method::Options, "/a", true),
            (Method::Head, "/a", true),
            (Method::Post, "/a", false),
            (Method::Post, "/b", true),
            (Method::Put, "/b", true),
            (Method::Options, "/b", true),
            (Method::Head, "/b", true),
            (Method::Get, "/b", false),
            (Method::Get, "/a/", false),
        ];

        for (method, path, expected) in cases {
            assert_eq!(router.has_route(method, path), expected, "{method} {path}");
        }
    }

    #[test]
    fn invalid_method_registers_nothing() {
        let mut router = Router::new();
        let result = router.route("/x", &["GET", "get", "TRACE"], handler!(|_req, _resp| "x"));

        assert!(matches!(result, Err(Error::InvalidMethod(name)) if name == "get"));
        assert!(!router.has_route(Method::Get, "/x"));
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let mut router = Router::new();
        router
            .get("/dup", handler!(|_req, _resp| "first"))
            .get("/dup", handler!(|_req, _resp| "second"));

        let resp = dispatch(&router, "GET /dup HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(resp.data(), Some(&Body::from("second")));
    }

    #[tokio::test]
    async fn reply_normalization() {
        let mut router = Router::new();
        router
            .get("/text", handler!(|_req, _resp| "hi"))
            .get("/json", handler!(|_req, _resp| (json!({"a": 1}), 201)))
            .get("/list", handler!(|_req, _resp| json!([1, 2])))
            .get("/bytes", handler!(|_req, _resp| vec![1u8, 2, 3]))
            .get("/full", handler!(|_req, _resp| ("x", 202, [("X-One", "1")])))
            .get("/one", handler!(|_req, _resp| ("solo".to_owned(),)))
            .get("/resp", handler!(|_req, _resp| Response::redirect("/text")));

        #[rustfmt::skip]
        let cases = [
            ("/text", 200, Some("text/plain"), "hi"),
            ("/json", 201, Some("application/json"), r#"{"a": 1}"#),
            ("/list", 200, Some("application/json"), "[1, 2]"),
            ("/bytes", 200, None, "\x01\x02\x03"),
            ("/full", 202, Some("text/plain"), "x"),
            ("/one", 200, Some("text/plain"), "solo"),
            ("/resp", 302, None, ""),
        ];

        for (path, status, content_type, body) in cases {
            let raw = format!("GET {path} HTTP/1.1\r\n\r\n");
            let resp = dispatch(&router, &raw).await.unwrap();

            assert_eq!(resp.status_code(), status, "{path}");
            assert_eq!(resp.get_header("content-type"), content_type, "{path}");
            assert_eq!(
                resp.data().map(Body::as_bytes).unwrap_or_default(),
                body.as_bytes(),
                "{path}"
            );
        }

        let resp = dispatch(&router, "GET /full HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(resp.get_header("x-one"), Some("1"));

        let resp = dispatch(&router, "GET /resp HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(resp.get_header("location"), Some("/text"));
    }

    #[tokio::test]
    async fn threaded_response_wins() {
        let mut router = Router::new();
        router
            .get("/set", handler!(|_req, resp| {
                resp.status(418)
                    .header("Content-Type", "text/html")
                    .set_cookie("seen", "1", None, None, None);
                ("<b>teapot</b>", 200, [("content-type", "text/xml"), ("X-Extra", "y")])
            }))
            .get("/body", handler!(|_req, resp| {
                resp.body("from handler");
                "from return"
            }))
            .get("/merge", handler!(|_req, resp| {
                resp.header("X-Keep", "mine");
                let mut other = Response::new();
                other.status(201).header("X-Keep", "theirs").body("merged");
                other
            }));

        let resp = dispatch(&router, "GET /set HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(resp.status_code(), 418);
        assert_eq!(resp.get_header("Content-Type"), Some("text/html"));
        assert_eq!(resp.get_header("X-Extra"), Some("y"));
        assert_eq!(resp.get_header("Set-Cookie"), Some("seen=1"));
        assert_eq!(resp.data(), Some(&Body::from("<b>teapot</b>")));

        let resp = dispatch(&router, "GET /body HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(resp.data(), Some(&Body::from("from handler")));
        assert_eq!(resp.get_header("Content-Type"), Some("text/plain"));

        let resp = dispatch(&router, "GET /merge HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(resp.status_code(), 201);
        assert_eq!(resp.get_header("X-Keep"), Some("mine"));
        assert_eq!(resp.data(), Some(&Body::from("merged")));
    }

    #[tokio::test]
    async fn unsupported_results() {
        let mut router = Router::new();
        router
            .get("/scalar", handler!(|_req, _resp| json!(42)))
            .get("/null", handler!(|_req, _resp| (Value::Null, 200)))
            .get("/empty", handler!(|_req, _resp| ()));

        for path in ["/scalar", "/null", "/empty"] {
            let raw = format!("GET {path} HTTP/1.1\r\n\r\n");
            let err = dispatch(&router, &raw).await.unwrap_err();
            assert!(matches!(err, Error::UnsupportedHandlerResult(_)), "{path}");
        }
    }

    #[tokio::test]
    async fn not_found() {
        let mut router = Router::new();
        router.post("/only-post", handler!(|_req, _resp| "ok"));

        #[rustfmt::skip]
        let cases = [
            "GET /missing HTTP/1.1\r\n\r\n",
            "GET /only-post HTTP/1.1\r\n\r\n",
            "BREW /only-post HTTP/1.1\r\n\r\n",
            "post /only-post HTTP/1.1\r\n\r\n",
        ];

        for raw in cases {
            let resp = dispatch(&router, raw).await.unwrap();
            assert_eq!(resp.status_code(), 404, "{raw:?}");
            assert_eq!(resp.data(), Some(&Body::from("Not found")));
        }

        let resp = dispatch(&router, "POST /only-post?x=1 HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(resp.status_code(), 200);
    }

    #[tokio::test]
    async fn handler_sees_request() {
        let mut router = Router::new();
        router.route_methods(
            "/echo",
            &[Method::Post],
            handler!(|req, _resp| {
                json!({
                    "method": req.method_str(),
                    "q": req.query_param("q").flatten(),
                    "body": req.json().cloned(),
                })
            }),
        );

        let raw = "POST /echo?q=1 HTTP/1.1\r\nContent-Type: application/json\r\n\
                   Content-Length: 8\r\n\r\n{\"k\": 2}";
        let resp = dispatch(&router, raw).await.unwrap();

        assert_eq!(
            resp.data().map(|b| str_op(b.as_bytes())),
            Some(r#"{"method": "POST", "q": "1", "body": {"k": 2}}"#)
        );
    }

    #[tokio::test]
    async fn static_before_dynamic() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("app.css")).unwrap();
        file.write_all(b"body{}").unwrap();

        let mut router = Router::new();
        router
            .get("/static/app.css", handler!(|_req, _resp| "dynamic"))
            .static_files("/static", dir.path().to_str().unwrap());

        let resp = dispatch(&router, "GET /static/app.css HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(resp.status_code(), 200);
        assert_eq!(resp.get_header("content-type"), Some("text/css"));
        assert_eq!(resp.data(), Some(&Body::Bytes(b"body{}".to_vec())));

        // Static matching ignores the method
        let resp = dispatch(&router, "DELETE /static/app.css HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(resp.status_code(), 200);

        #[rustfmt::skip]
        let misses = [
            "GET /static/missing.css HTTP/1.1\r\n\r\n",
            "GET /static/../secret HTTP/1.1\r\n\r\n",
        ];
        for raw in misses {
            let resp = dispatch(&router, raw).await.unwrap();
            assert_eq!(resp.status_code(), 404, "{raw:?}");
        }
    }

    #[tokio::test]
    async fn static_prefix_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join("f.txt"), b"first").unwrap();
        std::fs::write(second.path().join("f.txt"), b"second").unwrap();

        let mut router = Router::new();
        router
            .static_files("/a/", first.path().to_str().unwrap())
            .static_files("/", second.path().to_str().unwrap());

        let resp = dispatch(&router, "GET /a/f.txt HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(resp.data(), Some(&Body::Bytes(b"first".to_vec())));

        // Re-registering keeps the position but swaps the directory
        router.static_files("/a", second.path().to_str().unwrap());
        assert_eq!(router.static_routes.len(), 2);
        assert_eq!(router.static_routes[0].0, "/a/");

        let resp = dispatch(&router, "GET /a/f.txt HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(resp.data(), Some(&Body::Bytes(b"second".to_vec())));
    }
}
