//! TLS helpers for explicit and implicit FTPS (RFC 4217).
//!
//! Builds a `tokio_native_tls::TlsConnector` from the session
//! configuration (protocol bounds, client identity, certificate-error
//! override) and wraps control or data sockets with it.

use native_tls::{Identity, Protocol};
use tokio::net::TcpStream;
use tokio_native_tls::{TlsConnector, TlsStream};

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::{FtpSessionConfig, TlsProtocolVersion};

fn protocol(version: TlsProtocolVersion) -> Protocol {
    match version {
        TlsProtocolVersion::Tlsv10 => Protocol::Tlsv10,
        TlsProtocolVersion::Tlsv11 => Protocol::Tlsv11,
        TlsProtocolVersion::Tlsv12 => Protocol::Tlsv12,
    }
}

/// Build a connector according to the session configuration.
pub(crate) fn build_tls_connector(config: &FtpSessionConfig) -> FtpResult<TlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if let Some(min) = config.min_tls_protocol {
        builder.min_protocol_version(Some(protocol(min)));
    }
    if let Some(max) = config.max_tls_protocol {
        builder.max_protocol_version(Some(protocol(max)));
    }
    if let Some(identity) = &config.client_certificate {
        let identity = Identity::from_pkcs12(&identity.pkcs12_der, &identity.passphrase)?;
        builder.identity(identity);
    }
    if config.ignore_certificate_errors {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }

    let connector = builder.build()?;
    Ok(TlsConnector::from(connector))
}

/// Perform the client handshake on a freshly connected socket.
///
/// Used for the implicit-FTPS control socket, the explicit upgrade after
/// `AUTH TLS`, and every data socket of an encrypted session.
pub(crate) async fn handshake(
    config: &FtpSessionConfig,
    stream: TcpStream,
) -> FtpResult<TlsStream<TcpStream>> {
    let connector = build_tls_connector(config)?;
    connector
        .connect(config.effective_host(), stream)
        .await
        .map_err(|e| FtpError::tls_failed(format!("TLS handshake: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_builds_with_defaults() {
        let config = FtpSessionConfig::default();
        assert!(build_tls_connector(&config).is_ok());
    }

    #[test]
    fn connector_builds_with_bounds_and_override() {
        let config = FtpSessionConfig {
            min_tls_protocol: Some(TlsProtocolVersion::Tlsv11),
            max_tls_protocol: Some(TlsProtocolVersion::Tlsv12),
            ignore_certificate_errors: true,
            ..Default::default()
        };
        assert!(build_tls_connector(&config).is_ok());
    }
}
