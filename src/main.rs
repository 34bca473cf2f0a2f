//! Static file server built on the embedded HTTP engine.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request            ┌──────────────────────────────────────────┐
//!     ──────────────────────────┼─▶ net (listener, TLS) ─▶ http server      │
//!                               │                           │              │
//!                               │                           ▼              │
//!                               │                     file handler         │
//!                               │                 (send_file_or 404.html)  │
//!     Client Response           │                           │              │
//!     ◀─────────────────────────┼───────────────── http response ◀─────────┤
//!                               │                                          │
//!                               │  config (TOML) · observability · lifecycle│
//!                               └──────────────────────────────────────────┘
//! ```

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use embedded_http::config::loader::load_config;
use embedded_http::lifecycle::signals::wait_for_termination;
use embedded_http::observability::logging::init_logging;
use embedded_http::{HttpConfig, HttpServer, Method, ServerRequest};

#[derive(Parser)]
#[command(name = "embedded-http")]
#[command(about = "Serve a directory over HTTP/1.1", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to serve.
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Page sent with 404 for missing files, relative to the root.
    #[arg(long, default_value = "404.html")]
    not_found: PathBuf,

    /// Overrides the configured host.
    #[arg(long)]
    host: Option<String>,

    /// Overrides the configured port.
    #[arg(short, long)]
    port: Option<u16>,
}

/// Map a request path onto the served directory, refusing to leave it.
fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for component in Path::new(request_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if request_path.ends_with('/') || path == root {
        path.push("index.html");
    }
    Some(path)
}

async fn serve_file(mut req: ServerRequest, root: Arc<PathBuf>, not_found: Arc<PathBuf>) {
    if !matches!(req.method(), Method::Get | Method::Head) {
        let _ = req
            .response_mut()
            .set_status_code(405)
            .put_header("Allow", "GET, HEAD")
            .end()
            .await;
        return;
    }

    let fallback = root.join(not_found.as_path());
    let result = match resolve(&root, req.path()) {
        Some(path) => req.response_mut().send_file_or(path, &fallback).await,
        None => {
            req.response_mut().set_status_code(404);
            req.response_mut().send_file(&fallback).await
        }
    };

    if let Err(err) = result {
        tracing::debug!(path = %req.path(), error = %err, "File not served");
        let resp = req.response_mut();
        if !resp.headers_written() {
            let _ = resp
                .set_status_code(404)
                .put_header("Content-Type", "text/plain")
                .end_with("Not Found")
                .await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => HttpConfig::default(),
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_logging(&config.observability)?;

    tracing::info!(
        root = %cli.root.display(),
        host = %config.server.host,
        port = config.server.port,
        tls = config.server.tls.enabled,
        "embedded-http v0.1.0 starting"
    );

    let root = Arc::new(cli.root);
    let not_found = Arc::new(cli.not_found);

    let (host, port) = (config.server.host.clone(), config.server.port);
    let mut server = HttpServer::new(config.server);
    server
        .request_handler(move |req| serve_file(req, Arc::clone(&root), Arc::clone(&not_found)))
        .exception_handler(|err| tracing::warn!(error = %err, "Connection failed"));

    let listening = server.listen(port, &host).await?;
    tracing::info!(address = %listening.local_addr(), "Serving");

    wait_for_termination().await?;
    let drained = listening.close().await;

    tracing::info!(drained, "Shutdown complete");
    Ok(())
}
