//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Load the key store (PEM certificate chain + private key) and the trust
//!   store (PEM certificates) named by `TlsOptions`
//! - Build the server acceptor, enforcing client certificates when
//!   `client_auth_required` is set
//! - Build the client connector, presenting a client certificate when a key
//!   store is configured

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::TlsOptions;
use crate::error::{Error, Result};

fn open(path: &Path) -> Result<BufReader<File>> {
    if !path.exists() {
        return Err(Error::TlsConfig(format!("file not found: {:?}", path)));
    }
    Ok(BufReader::new(File::open(path)?))
}

/// Certificate chain stored in a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path)?).collect::<std::result::Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(Error::TlsConfig(format!("no certificates in {:?}", path)));
    }
    Ok(certs)
}

/// First private key stored in a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)?
        .ok_or_else(|| Error::TlsConfig(format!("no private key in {:?}", path)))
}

pub fn load_trust_store(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|e| Error::TlsConfig(format!("bad trust store entry in {:?}: {}", path, e)))?;
    }
    Ok(roots)
}

fn key_store(options: &TlsOptions) -> Result<Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>> {
    match options.key_store_path.as_deref() {
        Some(path) => {
            let path = Path::new(path);
            Ok(Some((load_certs(path)?, load_private_key(path)?)))
        }
        None => Ok(None),
    }
}

/// Build the server-side acceptor.
pub fn acceptor(options: &TlsOptions) -> Result<TlsAcceptor> {
    let (certs, key) = key_store(options)?
        .ok_or_else(|| Error::TlsConfig("server TLS requires a key store".into()))?;

    let builder = rustls::ServerConfig::builder();
    let builder = match options.trust_store_path.as_deref() {
        Some(path) => {
            let roots = Arc::new(load_trust_store(Path::new(path))?);
            let verifier = WebPkiClientVerifier::builder(roots);
            let verifier = if options.client_auth_required {
                verifier.build()
            } else {
                verifier.allow_unauthenticated().build()
            }
            .map_err(|e| Error::TlsConfig(e.to_string()))?;
            builder.with_client_cert_verifier(verifier)
        }
        None if options.client_auth_required => {
            return Err(Error::TlsConfig(
                "client authentication requires a trust store".into(),
            ))
        }
        None => builder.with_no_client_auth(),
    };

    let config = builder
        .with_single_cert(certs, key)
        .map_err(|e| Error::TlsConfig(e.to_string()))?;

    tracing::debug!(
        client_auth_required = options.client_auth_required,
        "TLS acceptor configured"
    );
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build the client-side connector.
pub fn connector(options: &TlsOptions) -> Result<TlsConnector> {
    let path = options
        .trust_store_path
        .as_deref()
        .ok_or_else(|| Error::TlsConfig("client TLS requires a trust store".into()))?;
    let roots = load_trust_store(Path::new(path))?;

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
    let config = match key_store(options)? {
        Some((certs, key)) => builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| Error::TlsConfig(e.to_string()))?,
        None => builder.with_no_client_auth(),
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Name to verify the server certificate against.
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string()).map_err(|e| Error::InvalidUri {
        uri: host.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_are_config_errors() {
        let err = load_certs(Path::new("/nonexistent/keystore.pem")).unwrap_err();
        assert!(matches!(err, Error::TlsConfig(_)));
    }

    #[test]
    fn server_requires_key_store() {
        let options = TlsOptions {
            enabled: true,
            ..TlsOptions::default()
        };
        assert!(matches!(acceptor(&options), Err(Error::TlsConfig(_))));
    }

    #[test]
    fn client_requires_trust_store() {
        assert!(matches!(
            connector(&TlsOptions::default()),
            Err(Error::TlsConfig(_))
        ));
    }

    #[test]
    fn ip_and_dns_server_names() {
        assert!(server_name("localhost").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("not a host").is_err());
    }
}
