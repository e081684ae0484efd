//! TLS configuration: connector/acceptor construction, certificate
//! loading, peer identity extraction, and exporter key derivation.

use crate::config::{TlsClientConfig, TlsServerConfig};
use crate::error::TransportError;
use crate::peer::PeerIdentity;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use x509_parser::extensions::GeneralName;

/// Creates a TLS connector plus the SNI name from client configuration.
pub fn create_tls_connector(
    config: &TlsClientConfig,
    server_host: &str,
) -> Result<(TlsConnector, ServerName<'static>), TransportError> {
    let client_auth = match (&config.client_cert_file, &config.client_key_file) {
        (Some(cert_path), Some(key_path)) => {
            Some((load_certs(cert_path)?, load_private_key(key_path)?))
        }
        _ => None,
    };

    let client_config = if config.verify_peer {
        // Build root cert store: explicit CA bundle or system roots.
        let root_store = if let Some(ref ca_path) = config.ca_cert_file {
            let certs = load_certs(ca_path)?;
            let mut store = RootCertStore::empty();
            for cert in certs {
                store
                    .add(cert)
                    .map_err(|e| TransportError::TlsConfig(format!("invalid CA cert: {}", e)))?;
            }
            store
        } else {
            let mut store = RootCertStore::empty();
            store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            store
        };

        let builder = rustls::ClientConfig::builder().with_root_certificates(root_store);
        match client_auth {
            Some((certs, key)) => builder.with_client_auth_cert(certs, key).map_err(|e| {
                TransportError::TlsConfig(format!("invalid client cert/key: {}", e))
            })?,
            None => builder.with_no_client_auth(),
        }
    } else {
        tracing::warn!("TLS server certificate verification disabled");
        let builder = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureVerifier));
        match client_auth {
            Some((certs, key)) => builder.with_client_auth_cert(certs, key).map_err(|e| {
                TransportError::TlsConfig(format!("invalid client cert/key: {}", e))
            })?,
            None => builder.with_no_client_auth(),
        }
    };

    let connector = TlsConnector::from(Arc::new(client_config));

    let server_name_str = config.server_name.as_deref().unwrap_or(server_host);
    let server_name = ServerName::try_from(server_name_str.to_string())
        .map_err(|_| TransportError::InvalidServerName(server_name_str.to_string()))?;

    Ok((connector, server_name))
}

/// Loads TLS certificates and creates a TLS acceptor.
pub fn create_tls_acceptor(config: &TlsServerConfig) -> Result<TlsAcceptor, TransportError> {
    let cert_path = config
        .server_cert_file
        .as_ref()
        .ok_or_else(|| TransportError::TlsConfig("server_cert_file not set".into()))?;
    let key_path = config
        .server_key_file
        .as_ref()
        .ok_or_else(|| TransportError::TlsConfig("server_key_file not set".into()))?;

    if config.require_client_cert && config.ca_cert_file.is_none() {
        return Err(TransportError::TlsConfig(
            "ca_cert_file not set for mTLS".into(),
        ));
    }

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let server_config = if config.require_client_cert {
        let ca_path = config.ca_cert_file.as_ref().unwrap();
        let ca_certs = load_certs(ca_path)?;
        let mut root_store = RootCertStore::empty();
        for cert in ca_certs {
            root_store
                .add(cert)
                .map_err(|e| TransportError::TlsConfig(format!("invalid client CA cert: {}", e)))?;
        }

        let client_verifier = WebPkiClientVerifier::builder(Arc::new(root_store))
            .build()
            .map_err(|e| {
                TransportError::TlsConfig(format!("failed to build client verifier: {}", e))
            })?;

        rustls::ServerConfig::builder()
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(certs, key)
            .map_err(|e| TransportError::TlsConfig(format!("invalid server cert/key: {}", e)))?
    } else {
        rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TransportError::TlsConfig(format!("invalid server cert/key: {}", e)))?
    };

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Derives the 32-byte application key from the session's keying-material
/// exporter using the protocol's fixed label.
pub fn exporter_app_key<C, Data>(conn: &C) -> Option<[u8; 32]>
where
    C: std::ops::Deref<Target = rustls::ConnectionCommon<Data>>,
{
    match conn.export_keying_material([0u8; 32], crate::APP_KEY_LABEL, None) {
        Ok(key) => Some(key),
        Err(e) => {
            tracing::warn!("exporter key derivation failed: {}", e);
            None
        }
    }
}

/// Materializes the peer identity from the presented certificate chain.
///
/// `authenticated` reflects whether this side actually verified the chain;
/// unverified certificates still populate the descriptive fields.
pub fn peer_identity_from_certs(
    certs: Option<&[CertificateDer<'_>]>,
    authenticated: bool,
) -> Option<PeerIdentity> {
    let leaf = certs?.first()?;

    let mut identity = PeerIdentity {
        authenticated,
        ..Default::default()
    };

    match x509_parser::parse_x509_certificate(leaf.as_ref()) {
        Ok((_, cert)) => {
            identity.subject = cert.subject().to_string();
            identity.issuer = cert.issuer().to_string();
            identity.common_name = cert
                .subject()
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .unwrap_or_default()
                .to_string();
            if let Ok(Some(san)) = cert.subject_alternative_name() {
                for name in &san.value.general_names {
                    if let GeneralName::DNSName(dns) = name {
                        identity.dns_sans.push((*dns).to_string());
                    }
                }
            }
        }
        Err(e) => {
            tracing::warn!("failed to parse peer certificate: {}", e);
        }
    }

    identity.pem = pem::encode(&pem::Pem::new("CERTIFICATE", leaf.as_ref().to_vec()));

    Some(identity)
}

#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _: &CertificateDer<'_>,
        _: &[CertificateDer<'_>],
        _: &ServerName<'_>,
        _: &[u8],
        _: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let file = File::open(path)
        .map_err(|e| TransportError::TlsConfig(format!("cannot open cert file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::TlsConfig(format!("invalid cert file {:?}: {}", path, e)))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let file = File::open(path)
        .map_err(|e| TransportError::TlsConfig(format!("cannot open key file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| TransportError::TlsConfig(format!("invalid key file {:?}: {}", path, e)))?
        {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(key.into()),
            None => {
                return Err(TransportError::TlsConfig(format!(
                    "no private key found in {:?}",
                    path
                )))
            }
            _ => continue, // Skip other PEM items
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_invalid_cert_path() {
        let result = load_certs(Path::new("/nonexistent/cert.pem"));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("cannot open"));
    }

    #[test]
    fn test_load_invalid_key_path() {
        let result = load_private_key(Path::new("/nonexistent/key.pem"));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("cannot open"));
    }

    #[test]
    fn test_load_empty_key_file() {
        let mut key_file = NamedTempFile::new().unwrap();
        key_file.write_all(b"not a valid key").unwrap();

        let result = load_private_key(key_file.path());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("no private key"));
    }

    #[test]
    fn test_create_acceptor_missing_cert() {
        let config = TlsServerConfig {
            enabled: true,
            server_cert_file: None,
            server_key_file: Some("/some/key.pem".into()),
            ..Default::default()
        };

        match create_tls_acceptor(&config) {
            Err(e) => assert!(e.to_string().contains("server_cert_file not set")),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_create_acceptor_mtls_missing_ca() {
        let config = TlsServerConfig {
            enabled: true,
            server_cert_file: Some("/some/cert.pem".into()),
            server_key_file: Some("/some/key.pem".into()),
            require_client_cert: true,
            ..Default::default()
        };

        match create_tls_acceptor(&config) {
            Err(e) => assert!(e.to_string().contains("ca_cert_file not set")),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_connector_invalid_server_name() {
        let config = TlsClientConfig::new().with_server_name("not a hostname");
        let result = create_tls_connector(&config, "127.0.0.1");
        assert!(matches!(result, Err(TransportError::InvalidServerName(_))));
    }

    #[test]
    fn test_connector_default_roots() {
        let config = TlsClientConfig::new();
        let result = create_tls_connector(&config, "example.com");
        assert!(result.is_ok());
    }

    #[test]
    fn test_insecure_connector() {
        let config = TlsClientConfig::new().with_no_verify();
        let result = create_tls_connector(&config, "example.com");
        assert!(result.is_ok());
    }

    #[test]
    fn test_peer_identity_no_certs() {
        assert!(peer_identity_from_certs(None, true).is_none());
        assert!(peer_identity_from_certs(Some(&[]), true).is_none());
    }
}
