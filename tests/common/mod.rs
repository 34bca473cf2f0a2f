//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;

use embedded_http::{
    ClientOptions, HttpClient, HttpServer, ListeningServer, ServerOptions, ServerRequest,
    TlsOptions,
};
use tempfile::TempDir;

/// Start a server on a free loopback port.
pub async fn start_server<F, Fut>(options: ServerOptions, handler: F) -> ListeningServer
where
    F: Fn(ServerRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut server = HttpServer::new(options);
    server.request_handler(handler);
    server.listen(0, "127.0.0.1").await.unwrap()
}

/// Client whose relative URIs go to `server`.
pub fn client_for(server: &ListeningServer, options: ClientOptions) -> HttpClient {
    let mut options = options;
    options.default_host = "localhost".into();
    options.default_port = server.port();
    HttpClient::new(options)
}

/// Key and trust stores for mutually authenticated TLS.
pub struct TlsFixture {
    _dir: TempDir,
    /// Server identity, trusting only `client`.
    pub server: TlsOptions,
    /// Client identity, trusting only `server`.
    pub client: TlsOptions,
    /// A client whose certificate the server does not trust.
    pub untrusted_client: TlsOptions,
}

fn write_identity(dir: &Path, name: &str) -> (String, String) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_pem = certified.cert.pem();
    let key_store = dir.join(format!("{}-keystore.pem", name));
    std::fs::write(
        &key_store,
        format!("{}{}", cert_pem, certified.signing_key.serialize_pem()),
    )
    .unwrap();
    (key_store.to_string_lossy().into_owned(), cert_pem)
}

fn write_trust_store(dir: &Path, name: &str, cert_pem: &str) -> String {
    let path = dir.join(format!("{}-truststore.pem", name));
    std::fs::write(&path, cert_pem).unwrap();
    path.to_string_lossy().into_owned()
}

pub fn tls_fixture() -> TlsFixture {
    let dir = tempfile::tempdir().unwrap();

    let (server_keys, server_cert) = write_identity(dir.path(), "server");
    let (client_keys, client_cert) = write_identity(dir.path(), "client");
    let (stranger_keys, _) = write_identity(dir.path(), "stranger");

    let server_trust = write_trust_store(dir.path(), "server", &client_cert);
    let client_trust = write_trust_store(dir.path(), "client", &server_cert);

    let server = TlsOptions {
        enabled: true,
        key_store_path: Some(server_keys),
        key_store_password: Some("wibble".into()),
        trust_store_path: Some(server_trust),
        trust_store_password: Some("wibble".into()),
        client_auth_required: true,
    };
    let client = TlsOptions {
        enabled: true,
        key_store_path: Some(client_keys),
        key_store_password: Some("wibble".into()),
        trust_store_path: Some(client_trust.clone()),
        trust_store_password: Some("wibble".into()),
        client_auth_required: false,
    };
    let untrusted_client = TlsOptions {
        key_store_path: Some(stranger_keys),
        ..client.clone()
    };

    TlsFixture {
        _dir: dir,
        server,
        client,
        untrusted_client,
    }
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    std::iter::repeat_with(|| fastrand::u8(..)).take(len).collect()
}

/// Random text mixing one to four byte UTF-8 characters.
pub fn random_unicode(chars: usize) -> String {
    std::iter::repeat_with(|| match fastrand::u8(..4) {
        0 => fastrand::char('a'..='z'),
        1 => fastrand::char('\u{80}'..='\u{7ff}'),
        2 => fastrand::char('\u{800}'..='\u{d7ff}'),
        _ => fastrand::char('\u{10000}'..='\u{10ffff}'),
    })
    .take(chars)
    .collect()
}
