use std::fs::File;
use std::io::BufReader;

use rustls_pki_types::{CertificateDer, PrivateKeyDer};

#[derive(Debug)]
pub enum TlsError {
    Read(String),
    NoCertificates(String),
    NoPrivateKey(String),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::Read(err) => write!(f, "failed to read TLS material: {err}"),
            TlsError::NoCertificates(path) => {
                write!(f, "no certificates found in '{path}'")
            }
            TlsError::NoPrivateKey(path) => write!(f, "no private key found in '{path}'"),
        }
    }
}

impl std::error::Error for TlsError {}

/// Loads a PEM certificate chain and private key pair.
pub fn load_keypair(
    cert_path: &str,
    key_path: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TlsError> {
    let cert_file = File::open(cert_path)
        .map_err(|e| TlsError::Read(format!("{cert_path}: {e}")))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .map_err(|e| TlsError::Read(format!("{cert_path}: {e}")))?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_string()));
    }

    let key_file = File::open(key_path)
        .map_err(|e| TlsError::Read(format!("{key_path}: {e}")))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| TlsError::Read(format!("{key_path}: {e}")))?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_string()))?;

    Ok((certs, key))
}
