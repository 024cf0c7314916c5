//! TLS acceptor and connector construction from PEM files.
//!
//! Certificate validation is on by default. Setting
//! `accept_invalid_certificates` swaps in verifiers that accept any peer
//! certificate; this is logged loudly and must be opted into explicitly.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use pkcs8::{EncryptedPrivateKeyInfo, SecretDocument};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::{ClientConfig, NetError, ServerConfig, Transport};

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Read every certificate in a PEM file.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, NetError> {
    let file = File::open(path).map_err(|e| cert_error(path, e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| cert_error(path, e))?;
    if certs.is_empty() {
        return Err(cert_error(path, "no certificates found"));
    }
    Ok(certs)
}

/// PEM label of a password-protected PKCS#8 key.
const ENCRYPTED_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// Read the first private key in a PEM file.
///
/// An `ENCRYPTED PRIVATE KEY` block takes precedence and is decrypted with
/// `password`; without a password it is an error.
pub fn load_private_key(
    path: &Path,
    password: Option<&str>,
) -> Result<PrivateKeyDer<'static>, NetError> {
    let pem = std::fs::read_to_string(path).map_err(|e| cert_error(path, e))?;
    if let Some(block) = encrypted_block(&pem) {
        let password = password
            .ok_or_else(|| cert_error(path, "private key is encrypted but no password is set"))?;
        return decrypt_private_key(block, password).map_err(|e| cert_error(path, e));
    }
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| cert_error(path, e))?
        .ok_or_else(|| cert_error(path, "no private key found"))
}

fn encrypted_block(pem: &str) -> Option<&str> {
    let begin = format!("-----BEGIN {ENCRYPTED_KEY_LABEL}-----");
    let end = format!("-----END {ENCRYPTED_KEY_LABEL}-----");
    let start = pem.find(&begin)?;
    let stop = start + pem[start..].find(&end)? + end.len();
    Some(&pem[start..stop])
}

fn decrypt_private_key(block: &str, password: &str) -> Result<PrivateKeyDer<'static>, String> {
    let (_, document) = SecretDocument::from_pem(block).map_err(|e| e.to_string())?;
    let info = EncryptedPrivateKeyInfo::try_from(document.as_bytes()).map_err(|e| e.to_string())?;
    let key = info
        .decrypt(password)
        .map_err(|e| format!("cannot decrypt private key: {e}"))?;
    Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        key.as_bytes().to_vec(),
    )))
}

fn load_roots(path: &Path) -> Result<RootCertStore, NetError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificates(path)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

fn cert_error(path: &Path, reason: impl ToString) -> NetError {
    NetError::Certificate {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Build the server-side acceptor described by `config`.
pub fn server_acceptor(config: &ServerConfig) -> Result<TlsAcceptor, NetError> {
    let cert_path = config
        .certificate_file
        .as_deref()
        .ok_or_else(|| NetError::Tls("no certificate_file configured".to_string()))?;
    let key_path = config.private_key_file.as_deref().unwrap_or(cert_path);
    let certs = load_certificates(cert_path)?;
    let key = load_private_key(key_path, config.private_key_password.as_deref())?;

    let provider = provider();
    let builder = rustls::ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let builder = if !config.mutual_authentication {
        builder.with_no_client_auth()
    } else if config.accept_invalid_certificates {
        tracing::warn!("Client certificates are accepted without validation");
        builder.with_client_cert_verifier(Arc::new(AcceptAnyCertificate(provider)))
    } else {
        let ca_path = config
            .client_ca_file
            .as_deref()
            .ok_or_else(|| NetError::Tls("no client_ca_file configured".to_string()))?;
        let verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::new(load_roots(ca_path)?), provider)
                .build()
                .map_err(|e| NetError::Tls(e.to_string()))?;
        builder.with_client_cert_verifier(verifier)
    };

    let tls = builder.with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(tls)))
}

/// Build the client-side connector described by `config`.
pub fn client_connector(config: &ClientConfig) -> Result<TlsConnector, NetError> {
    let provider = provider();
    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let builder = if config.accept_invalid_certificates {
        tracing::warn!("Server certificate validation is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
    } else {
        let ca_path = config
            .ca_file
            .as_deref()
            .ok_or_else(|| NetError::Tls("no ca_file configured".to_string()))?;
        builder.with_root_certificates(load_roots(ca_path)?)
    };

    let tls = match config.certificate_file.as_deref() {
        Some(cert_path) => {
            let key_path = config.private_key_file.as_deref().unwrap_or(cert_path);
            let key = load_private_key(key_path, config.private_key_password.as_deref())?;
            builder.with_client_auth_cert(load_certificates(cert_path)?, key)?
        }
        None => builder.with_no_client_auth(),
    };
    Ok(TlsConnector::from(Arc::new(tls)))
}

/// Run the server handshake and check the session against policy.
pub(crate) async fn accept(
    acceptor: &TlsAcceptor,
    stream: TcpStream,
    require_client_cert: bool,
) -> Result<Transport, NetError> {
    let tls = acceptor
        .accept(stream)
        .await
        .map_err(|e| NetError::Handshake(e.to_string()))?;

    let (_, session) = tls.get_ref();
    if require_client_cert && session.peer_certificates().is_none_or(|c| c.is_empty()) {
        return Err(NetError::Handshake(
            "client did not present a certificate".to_string(),
        ));
    }
    Ok(Transport::from(tls))
}

/// Run the client handshake against `server_name`.
pub(crate) async fn connect(
    connector: &TlsConnector,
    server_name: &str,
    stream: TcpStream,
) -> Result<Transport, NetError> {
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|e| NetError::Tls(format!("invalid server name {server_name:?}: {e}")))?;
    let tls = connector
        .connect(name, stream)
        .await
        .map_err(|e| NetError::Handshake(e.to_string()))?;
    Ok(Transport::from(tls))
}

/// Verifier that trusts any certificate but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl AcceptAnyCertificate {
    fn tls12(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn tls13(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.tls12(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.tls13(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes()
    }
}

impl ClientCertVerifier for AcceptAnyCertificate {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.tls12(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.tls13(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes()
    }
}
