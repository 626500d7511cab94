//! TLS client sessions on rustls.

use std::sync::Arc;

use portsock_api::{Error, Result, SocketError, SocketErrorKind, TlsVersion};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

fn tls_error(cause: impl Into<Box<dyn core::error::Error + Send + Sync + 'static>>) -> Error {
    SocketError::new(SocketErrorKind::Tls, cause).into()
}

fn protocol_versions(version: TlsVersion) -> Vec<&'static rustls::SupportedProtocolVersion> {
    match version {
        TlsVersion::Tls12 => vec![&rustls::version::TLS12, &rustls::version::TLS13],
        TlsVersion::Tls13 => vec![&rustls::version::TLS13],
    }
}

/// Builds the client configuration for one handshake.
pub(crate) fn client_config(
    version: TlsVersion,
    ignore_cert_errors: bool,
) -> Result<Arc<ClientConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&protocol_versions(version))
        .map_err(tls_error)?;

    let config = if ignore_cert_errors {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(Arc::new(config))
}

/// Runs the client handshake for `host` over `stream`.
#[tracing::instrument(skip(stream))]
pub(crate) async fn handshake(
    host: &str,
    stream: TcpStream,
    version: TlsVersion,
    ignore_cert_errors: bool,
) -> Result<TlsStream<TcpStream>> {
    let config = client_config(version, ignore_cert_errors)?;
    let server_name = ServerName::try_from(host.to_owned()).map_err(tls_error)?;

    let session = TlsConnector::from(config)
        .connect(server_name, stream)
        .await
        .map_err(tls_error)?;
    tracing::debug!(protocol = ?session.get_ref().1.protocol_version(), "TLS session established");
    Ok(session)
}

/// Accepts every server certificate while still checking handshake signatures.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> core::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> core::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> core::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(TlsVersion::Tls12, false)]
    #[test_case(TlsVersion::Tls13, false)]
    #[test_case(TlsVersion::Tls12, true)]
    fn configs_build(version: TlsVersion, ignore_cert_errors: bool) {
        client_config(version, ignore_cert_errors).unwrap();
    }

    #[test]
    fn lenient_verifier_offers_provider_schemes() {
        let verifier = AcceptAnyCertificate {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        };

        assert!(
            verifier
                .supported_verify_schemes()
                .contains(&SignatureScheme::ECDSA_NISTP256_SHA256)
        );
    }
}
