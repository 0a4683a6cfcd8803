//! TLS configuration and certificate bootstrap.
//!
//! # Responsibilities
//! - Self-sign a serving certificate when none is configured
//! - Load certificate, key and optional client CA into a rustls config
//!
//! # Design Decisions
//! - TLS 1.2 is the minimum protocol version
//! - Client certificates are requested but never required, so token auth keeps working
//! - Generated material is written to disk and reused on the next start

use std::collections::HashSet;
use std::fs;
use std::io::BufReader;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rcgen::{CertificateParams, DnType, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use thiserror::Error;

/// DNS names of the API server's in-cluster service.
pub const SERVICE_DNS_NAMES: [&str; 3] = ["kubernetes.default.svc", "kubernetes.default", "kubernetes"];

pub const SELF_SIGNED_CERT_FILE: &str = "apiserver.crt";
pub const SELF_SIGNED_KEY_FILE: &str = "apiserver.key";

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("unable to generate self-signed certificate: {0}")]
    Generate(#[from] rcgen::Error),

    #[error("invalid client CA bundle: {0}")]
    ClientCa(String),

    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

/// Where serving material comes from.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub client_ca_file: Option<PathBuf>,
    /// Where self-signed material is written.
    pub cert_directory: PathBuf,
    /// Common name and first SAN of a self-signed certificate.
    pub host: String,
    pub alternate_ips: Vec<IpAddr>,
    pub alternate_dns: Vec<String>,
}

impl TlsSettings {
    /// Configured files, or the self-signed pair under the cert directory,
    /// generated first when either file is missing.
    pub fn ensure_certificate(&self) -> Result<(PathBuf, PathBuf), TlsError> {
        if let (Some(cert), Some(key)) = (&self.cert_file, &self.key_file) {
            return Ok((cert.clone(), key.clone()));
        }

        let cert = self.cert_directory.join(SELF_SIGNED_CERT_FILE);
        let key = self.cert_directory.join(SELF_SIGNED_KEY_FILE);
        if cert.exists() && key.exists() {
            tracing::debug!(cert = %cert.display(), "Reusing self-signed certificate");
            return Ok((cert, key));
        }

        self.generate_self_signed(&cert, &key)?;
        tracing::info!(cert = %cert.display(), key = %key.display(), "Generated self-signed certificate");
        Ok((cert, key))
    }

    /// Host first, then IPs, then DNS names; each name appears once.
    fn subject_alt_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        std::iter::once(self.host.clone())
            .chain(self.alternate_ips.iter().map(ToString::to_string))
            .chain(self.alternate_dns.iter().cloned())
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }

    fn generate_self_signed(&self, cert_path: &Path, key_path: &Path) -> Result<(), TlsError> {
        let mut params = CertificateParams::new(self.subject_alt_names())?;
        params.distinguished_name.push(DnType::CommonName, self.host.clone());
        let key = KeyPair::generate()?;
        let cert = params.self_signed(&key)?;

        fs::create_dir_all(&self.cert_directory).map_err(|source| TlsError::Write {
            path: self.cert_directory.clone(),
            source,
        })?;
        write(cert_path, cert.pem().as_bytes())?;
        write(key_path, key.serialize_pem().as_bytes())?;
        Ok(())
    }

    /// Build the rustls server config. Called on every secure serve attempt.
    pub fn server_config(&self) -> Result<ServerConfig, TlsError> {
        let (cert_path, key_path) = self.ensure_certificate()?;
        let certs = load_certs(&cert_path)?;
        let key = load_key(&key_path)?;

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let builder = ServerConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])?;

        let builder = match &self.client_ca_file {
            Some(ca_path) => {
                let mut roots = RootCertStore::empty();
                for cert in load_certs(ca_path)? {
                    roots.add(cert)?;
                }
                let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                    .allow_unauthenticated()
                    .build()
                    .map_err(|e| TlsError::ClientCa(e.to_string()))?;
                builder.with_client_cert_verifier(verifier)
            }
            None => builder.with_no_client_auth(),
        };

        let mut config = builder.with_single_cert(certs, key)?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }

    pub fn rustls_config(&self) -> Result<RustlsConfig, TlsError> {
        Ok(RustlsConfig::from_config(Arc::new(self.server_config()?)))
    }
}

fn write(path: &Path, contents: &[u8]) -> Result<(), TlsError> {
    fs::write(path, contents).map_err(|source| TlsError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn open(path: &Path) -> Result<BufReader<fs::File>, TlsError> {
    fs::File::open(path).map(BufReader::new).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: PathBuf) -> TlsSettings {
        TlsSettings {
            cert_file: None,
            key_file: None,
            client_ca_file: None,
            cert_directory: dir,
            host: "localhost".into(),
            alternate_ips: vec![IpAddr::from([10, 0, 0, 1])],
            alternate_dns: SERVICE_DNS_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn self_signed_material_is_generated_once() {
        let dir = std::env::temp_dir().join(format!("apiserver-tls-{}", uuid::Uuid::new_v4()));
        let settings = settings(dir.clone());

        let (cert, key) = settings.ensure_certificate().unwrap();
        assert!(cert.ends_with(SELF_SIGNED_CERT_FILE));
        let first = fs::read(&cert).unwrap();

        let (cert_again, key_again) = settings.ensure_certificate().unwrap();
        assert_eq!((cert_again.clone(), key_again), (cert, key));
        assert_eq!(fs::read(&cert_again).unwrap(), first);

        let config = settings.server_config().unwrap();
        assert_eq!(config.alpn_protocols[0], b"h2");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn repeated_names_are_listed_once() {
        let mut settings = settings(std::env::temp_dir());
        settings.host = "kubernetes".into();
        settings.alternate_ips.push(IpAddr::from([10, 0, 0, 1]));
        assert_eq!(
            settings.subject_alt_names(),
            vec!["kubernetes", "10.0.0.1", "kubernetes.default.svc", "kubernetes.default"]
        );
    }

    #[test]
    fn missing_configured_files_fail() {
        let mut settings = settings(std::env::temp_dir());
        settings.cert_file = Some("/nonexistent/tls.crt".into());
        settings.key_file = Some("/nonexistent/tls.key".into());
        assert!(matches!(settings.server_config(), Err(TlsError::Read { .. })));
    }
}
