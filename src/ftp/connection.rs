//! Control-connection establishment.
//!
//! Resolves the endpoint, opens TCP, performs the implicit-TLS handshake
//! when configured, consumes the server welcome, and runs the explicit
//! `AUTH TLS` upgrade. Timeout policy comes from the session
//! configuration and bounds every step.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::{self, ControlReader, ControlWriter, FtpCommand};
use crate::ftp::resolver;
use crate::ftp::tls;
use crate::ftp::types::{Encoding, FtpReply, FtpSessionConfig, SecurityMode};

pub(crate) struct EstablishedControl {
    pub reader: ControlReader,
    pub writer: ControlWriter,
    pub banner: FtpReply,
    pub peer: SocketAddr,
    pub encrypted: bool,
}

/// Establish the control connection and return ready transport halves
/// plus the server welcome banner.
pub(crate) async fn establish(config: &FtpSessionConfig) -> FtpResult<EstablishedControl> {
    let host = config.effective_host();
    if host.is_empty() {
        return Err(FtpError::invalid_argument("host must not be empty"));
    }

    let dur = Duration::from_secs(config.timeout_secs);
    let peer = resolver::resolve(host, config.effective_port(), config.ip_version).await?;

    let tcp = timeout(dur, TcpStream::connect(peer))
        .await
        .map_err(|_| FtpError::timeout(format!("TCP connect to {} timed out", peer)))?
        .map_err(|e| FtpError::connection_failed(format!("TCP connect to {}: {}", peer, e)))?;

    tcp.set_nodelay(true).ok();
    tcp.set_linger(Some(Duration::ZERO)).ok();

    let (mut reader, mut writer, mut encrypted) = match config.security {
        SecurityMode::Implicit => {
            let stream = tls::handshake(config, tcp).await?;
            let (rd, wr) = tokio::io::split(stream);
            (
                ControlReader::Tls(BufReader::new(rd)),
                ControlWriter::Tls(wr),
                true,
            )
        }
        _ => {
            let (rd, wr) = tcp.into_split();
            (
                ControlReader::Plain(BufReader::new(rd)),
                ControlWriter::Plain(wr),
                false,
            )
        }
    };

    // The greeting is read with a bounded blocking read rather than an
    // availability poll; an idle server trips the timeout either way.
    let banner = timeout(dur, protocol::read_reply(&mut reader, Encoding::Ascii))
        .await
        .map_err(|_| FtpError::timeout("timed out waiting for the server greeting"))??;
    if !banner.is_success() && !banner.is_preliminary() {
        return Err(FtpError::connection_failed(format!(
            "unexpected greeting: {}",
            banner.text()
        )));
    }

    if config.security == SecurityMode::Explicit {
        let auth = FtpCommand::with_arg("AUTH", "TLS");
        protocol::write_command(&mut writer, &auth).await?;
        let reply = timeout(dur, protocol::read_reply(&mut reader, Encoding::Ascii))
            .await
            .map_err(|_| FtpError::timeout("timed out waiting for the AUTH TLS reply"))??;
        if !reply.is_success() {
            return Err(FtpError::tls_failed(format!(
                "AUTH TLS rejected: {}",
                reply.text()
            )));
        }

        let tcp = reunite_plain(reader, writer)?;
        let stream = tls::handshake(config, tcp).await?;
        let (rd, wr) = tokio::io::split(stream);
        reader = ControlReader::Tls(BufReader::new(rd));
        writer = ControlWriter::Tls(wr);
        encrypted = true;
    }

    Ok(EstablishedControl {
        reader,
        writer,
        banner,
        peer,
        encrypted,
    })
}

/// Reassemble the owned `TcpStream` from split plain halves for the
/// explicit-TLS upgrade. Any bytes still buffered on the read side are
/// discarded; the upgrade happens on a quiescent channel.
fn reunite_plain(reader: ControlReader, writer: ControlWriter) -> FtpResult<TcpStream> {
    let rd = match reader {
        ControlReader::Plain(br) => br.into_inner(),
        ControlReader::Tls(_) => {
            return Err(FtpError::tls_failed("control connection is already TLS"))
        }
    };
    let wr = match writer {
        ControlWriter::Plain(w) => w,
        ControlWriter::Tls(_) => {
            return Err(FtpError::tls_failed("control connection is already TLS"))
        }
    };
    rd.reunite(wr)
        .map_err(|e| FtpError::tls_failed(format!("reunite failed: {}", e)))
}
