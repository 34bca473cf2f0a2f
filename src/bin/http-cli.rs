use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde_json::json;

use embedded_http::config::loader::load_config;
use embedded_http::observability::logging::init_logging;
use embedded_http::{HttpClient, HttpConfig, Method};

#[derive(Parser)]
#[command(name = "http-cli")]
#[command(about = "Issue an HTTP/1.1 request", long_about = None)]
struct Cli {
    /// Request URI, absolute or relative to the configured default host.
    uri: String,

    /// Request method; any token is accepted.
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Extra header, as "Name: value". Repeatable.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body.
    #[arg(short, long)]
    data: Option<String>,

    /// Send the body with chunked transfer encoding.
    #[arg(long)]
    chunked: bool,

    /// Fail when no response headers arrive within this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// TOML configuration file; its [client] section is used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print status, headers and trailers as JSON on stderr.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => HttpConfig::default(),
    };
    init_logging(&config.observability)?;

    let method: Method = cli.method.parse()?;
    let client = HttpClient::new(config.client);
    let mut request = client.request(method, &cli.uri)?;

    for header in &cli.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| format!("malformed header {:?}", header))?;
        request.headers_mut().add(name.trim(), value.trim());
    }
    if let Some(ms) = cli.timeout_ms {
        request.set_timeout(Duration::from_millis(ms));
    }
    request.set_chunked(cli.chunked);

    let mut response = match cli.data {
        Some(data) => request.end_with(data).await?,
        None => request.end().await?,
    };

    let mut stdout = std::io::stdout().lock();
    while let Some(chunk) = response.chunk().await? {
        stdout.write_all(&chunk)?;
    }
    stdout.flush()?;

    if cli.json {
        let headers: Vec<_> = response
            .headers()
            .iter()
            .map(|(name, value)| json!([name, value]))
            .collect();
        let trailers: Vec<_> = response
            .trailers()
            .iter()
            .map(|(name, value)| json!([name, value]))
            .collect();
        let summary = json!({
            "status": response.status_code(),
            "message": response.status_message(),
            "version": response.version().as_str(),
            "headers": headers,
            "trailers": trailers,
        });
        eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        eprintln!("{} {}", response.status_code(), response.status_message());
    }

    Ok(())
}
