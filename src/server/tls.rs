use crate::cli::Args;

use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use log::{ error, info };
use rustls::pki_types::CertificateDer;
use rustls::ServerConfig;
use rustls_pemfile::{ certs, private_key };
use tokio_rustls::TlsAcceptor;

pub fn load_tls_config(
    cert_path: &str,
    key_path: &str
) -> Result<Arc<ServerConfig>, Box<dyn Error + Send + Sync>> {
    let cert_file = File::open(cert_path).map_err(|e|
        format!("Failed to open TLS certificate file '{}': {}", cert_path, e)
    )?;
    let key_file = File::open(key_path).map_err(|e|
        format!("Failed to open TLS key file '{}': {}", key_path, e)
    )?;

    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| format!("Failed to read certificate(s): {}", e))?;
    if cert_chain.is_empty() {
        return Err(format!("No certificate found in '{}'", cert_path).into());
    }

    let key = private_key(&mut key_reader)
        .map_err(|e| format!("Error reading private key: {}", e))?
        .ok_or_else(|| format!("No private key found in '{}'", key_path))?;

    let config = ServerConfig::builder_with_provider(
        Arc::new(rustls::crypto::ring::default_provider())
    )
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;
    Ok(Arc::new(config))
}

/// Certificate and key paths when TLS is enabled. Enabling TLS without both
/// paths is a startup error.
pub fn tls_paths(args: &Args) -> Result<Option<(&str, &str)>, Box<dyn Error + Send + Sync>> {
    if !args.enable_tls {
        return Ok(None);
    }
    match (&args.tls_cert_path, &args.tls_key_path) {
        (Some(cert_path), Some(key_path)) => Ok(Some((cert_path.as_str(), key_path.as_str()))),
        (Some(_), None) | (None, Some(_)) => {
            error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
            Err("Missing TLS certificate or key path".into())
        }
        (None, None) => {
            error!("--enable-tls was set but no certificate/key paths provided.");
            Err("TLS enabled without cert/key".into())
        }
    }
}

pub fn acceptor_from_args(args: &Args) -> Result<Option<TlsAcceptor>, Box<dyn Error + Send + Sync>> {
    match tls_paths(args)? {
        Some((cert_path, key_path)) => {
            info!("TLS enabled. Loading certificate from '{}' and key from '{}'", cert_path, key_path);
            let config = load_tls_config(cert_path, key_path)?;
            Ok(Some(TlsAcceptor::from(config)))
        }
        None => {
            info!("TLS not enabled. Running plain WebSocket (WS) server.");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn tls_is_off_by_default() {
        let args = Args::parse_from(["chat-relay", "--tls-cert-path", "cert.pem"]);
        assert!(tls_paths(&args).unwrap().is_none());
        assert!(acceptor_from_args(&args).unwrap().is_none());
    }

    #[test]
    fn enabling_tls_requires_both_paths() {
        let args = Args::parse_from(["chat-relay", "--enable-tls", "--tls-cert-path", "cert.pem"]);
        assert!(tls_paths(&args).is_err());

        let args = Args::parse_from(["chat-relay", "--enable-tls"]);
        assert!(tls_paths(&args).is_err());

        let args = Args::parse_from([
            "chat-relay",
            "--enable-tls",
            "--tls-cert-path",
            "cert.pem",
            "--tls-key-path",
            "key.pem",
        ]);
        assert_eq!(tls_paths(&args).unwrap(), Some(("cert.pem", "key.pem")));
    }

    #[test]
    fn missing_certificate_file_is_reported() {
        let err = load_tls_config("/nonexistent/cert.pem", "/nonexistent/key.pem").unwrap_err();
        assert!(err.to_string().contains("Failed to open TLS certificate file"));
    }
}
