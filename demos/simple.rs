//! Small app showing text, JSON, redirect, echo and static file routes.
//!
//! ```text
//! cargo run --example simple -- --port 8000 --debug
//! curl 'http://127.0.0.1:8000/hello?name=ferris'
//! curl -X POST -H 'Content-Type: application/json' -d '{"a":1}' http://127.0.0.1:8000/echo
//! ```

use clap::Parser;
use microserve::{handler, Response, Router, Server};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "simple", about = "microserve demo application")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// Add Server-Timing headers and request durations to the log
    #[arg(long)]
    debug: bool,

    /// Directory served under /static
    #[arg(long, default_value = "./static")]
    static_dir: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "microserve=debug,simple=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut router = Router::new();
    router
        .get("/", handler!(|_req, _resp| "microserve is running"))
        .get("/hello", handler!(|req, _resp| {
            let name = req.query_param("name").flatten().unwrap_or("world");
            format!("Hello, {name}!")
        }))
        .get("/json", handler!(|req, resp| {
            resp.set_cookie("visited", "1", Some(3600), None, Some("/"));
            json!({
                "path": req.path(),
                "user_agent": req.user_agent(),
                "cookies": req.cookies(),
            })
        }))
        .get("/redir", handler!(|_req, _resp| Response::redirect("/hello")))
        .post("/echo", handler!(|req, _resp| {
            match (req.json(), req.form()) {
                (Some(value), _) => (value.clone(), 200),
                (None, Some(form)) => (json!(form), 200),
                (None, None) => (json!({"error": "expected a JSON or form body"}), 400),
            }
        }))
        .static_files("/static", &args.static_dir);

    let server = Server::builder()
        .bind((args.host.as_str(), args.port))?
        .router(router)
        .debug(args.debug)
        .build();

    tracing::info!(static_dir = %args.static_dir, "serving on http://{}", server.local_addr()?);
    server.launch().await;
    Ok(())
}
