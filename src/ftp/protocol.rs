//! Low-level FTP command/reply codec (RFC 959 §4).
//!
//! Owns the plain/TLS transport halves, renders command envelopes as
//! `TOKEN[ ARG]\r\n`, and reads logical replies: either a single
//! `NNN message` line, or a multi-line reply accumulated until the first
//! line matching `NNN<space>` (the relaxed form; FEAT depends on the
//! accumulated lines). Typed extractors turn replies into structured
//! results for PWD, EPSV, PASV and FEAT.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};

use lazy_static::lazy_static;
use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::{Encoding, FtpReply};

/// Hard cap on lines accumulated for one reply.
const MAX_REPLY_LINES: usize = 128;
/// Hard cap on a single reply line.
const MAX_LINE_LEN: usize = 4096;

// ─── Command envelope ────────────────────────────────────────────────

/// A command envelope: token plus optional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpCommand {
    pub verb: String,
    pub arg: Option<String>,
}

impl FtpCommand {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            arg: None,
        }
    }

    pub fn with_arg(verb: impl Into<String>, arg: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            arg: Some(arg.into()),
        }
    }

    /// Wire form, CRLF-terminated.
    pub fn render(&self) -> String {
        match &self.arg {
            Some(arg) => format!("{} {}\r\n", self.verb, arg),
            None => format!("{}\r\n", self.verb),
        }
    }

    /// Parse a wire line back into an envelope. Inverse of [`render`].
    ///
    /// [`render`]: FtpCommand::render
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return None;
        }
        match line.split_once(' ') {
            Some((verb, arg)) => Some(Self::with_arg(verb, arg)),
            None => Some(Self::new(line)),
        }
    }

    /// Log-safe rendering: the PASS argument is never written to a sink.
    pub fn display_masked(&self) -> String {
        if self.verb.eq_ignore_ascii_case("PASS") && self.arg.is_some() {
            format!("{} ***", self.verb)
        } else {
            match &self.arg {
                Some(arg) => format!("{} {}", self.verb, arg),
                None => self.verb.clone(),
            }
        }
    }
}

// ─── Transport halves ────────────────────────────────────────────────

/// Read side of the control connection, plain TCP or TLS-wrapped.
pub(crate) enum ControlReader {
    Plain(BufReader<OwnedReadHalf>),
    Tls(BufReader<tokio::io::ReadHalf<TlsStream<TcpStream>>>),
}

/// Write side of the control connection.
pub(crate) enum ControlWriter {
    Plain(OwnedWriteHalf),
    Tls(tokio::io::WriteHalf<TlsStream<TcpStream>>),
}

impl AsyncRead for ControlReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ControlReader::Plain(r) => Pin::new(r).poll_read(cx, buf),
            ControlReader::Tls(r) => Pin::new(r).poll_read(cx, buf),
        }
    }
}

impl AsyncBufRead for ControlReader {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        match self.get_mut() {
            ControlReader::Plain(r) => Pin::new(r).poll_fill_buf(cx),
            ControlReader::Tls(r) => Pin::new(r).poll_fill_buf(cx),
        }
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        match self.get_mut() {
            ControlReader::Plain(r) => Pin::new(r).consume(amt),
            ControlReader::Tls(r) => Pin::new(r).consume(amt),
        }
    }
}

impl AsyncWrite for ControlWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ControlWriter::Plain(w) => Pin::new(w).poll_write(cx, buf),
            ControlWriter::Tls(w) => Pin::new(w).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ControlWriter::Plain(w) => Pin::new(w).poll_flush(cx),
            ControlWriter::Tls(w) => Pin::new(w).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ControlWriter::Plain(w) => Pin::new(w).poll_shutdown(cx),
            ControlWriter::Tls(w) => Pin::new(w).poll_shutdown(cx),
        }
    }
}

// ─── Reply framing ───────────────────────────────────────────────────

/// Decode one wire line according to the negotiated encoding: lossy in
/// ASCII mode, strict in UTF-8 mode.
pub(crate) fn decode_line(bytes: &[u8], encoding: Encoding) -> FtpResult<String> {
    let trimmed = match bytes {
        [head @ .., b'\r', b'\n'] | [head @ .., b'\n'] => head,
        other => other,
    };
    match encoding {
        Encoding::Ascii => Ok(String::from_utf8_lossy(trimmed).into_owned()),
        Encoding::Utf8 => String::from_utf8(trimmed.to_vec())
            .map_err(|_| FtpError::protocol_parse("reply line is not valid UTF-8")),
    }
}

/// Whether a decoded line is the terminal `NNN<space>` line of a reply.
fn terminal_code(line: &str) -> Option<u16> {
    let bytes = line.as_bytes();
    if bytes.len() < 4 || bytes[3] != b' ' {
        return None;
    }
    if !bytes[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    line[..3].parse().ok()
}

/// Read one logical reply from the control channel.
///
/// Reads `\r\n`-terminated lines until the terminal line; every line is
/// kept in wire order. The caller is responsible for timeout and
/// cancellation bounds.
pub(crate) async fn read_reply<R>(reader: &mut R, encoding: Encoding) -> FtpResult<FtpReply>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    let mut buf = Vec::with_capacity(128);

    for _ in 0..MAX_REPLY_LINES {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Err(FtpError::disconnected("server closed the control connection"));
        }
        if n > MAX_LINE_LEN {
            return Err(FtpError::protocol_parse("reply line too long"));
        }

        let line = decode_line(&buf, encoding)?;
        log::trace!("<<< {}", line);

        let terminal = terminal_code(&line);
        lines.push(line);

        if let Some(code) = terminal {
            let message = lines
                .last()
                .map(|l| l[4..].to_string())
                .unwrap_or_default();
            return Ok(FtpReply {
                code,
                message,
                lines,
            });
        }
    }

    Err(FtpError::protocol_parse("too many lines in reply"))
}

/// Write one command envelope, flushing the stream.
pub(crate) async fn write_command<W>(writer: &mut W, cmd: &FtpCommand) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    log::trace!(">>> {}", cmd.display_masked());
    writer.write_all(cmd.render().as_bytes()).await?;
    writer.flush().await
}

// ─── Typed extractors ────────────────────────────────────────────────

lazy_static! {
    static ref EPSV_PORT: Regex = Regex::new(r"[|,](\d+)[|,]").unwrap();
    static ref PASV_HOST_PORT: Regex =
        Regex::new(r"(\d+)[,|](\d+)[,|](\d+)[,|](\d+)[,|](\d+)[,|](\d+)").unwrap();
}

/// Extract the directory out of a 257 PWD reply: the content between the
/// first two `"` characters of the last quoted line.
pub fn parse_pwd(reply: &FtpReply) -> FtpResult<String> {
    let line = reply
        .lines
        .iter()
        .rev()
        .find(|l| l.contains('"'))
        .ok_or_else(|| FtpError::protocol_parse(format!("no quoted path in PWD reply: {}", reply.message)))?;

    let start = line.find('"').unwrap_or(0);
    match line[start + 1..].find('"') {
        Some(end) => Ok(line[start + 1..start + 1 + end].to_string()),
        None => Err(FtpError::protocol_parse(format!(
            "unterminated quote in PWD reply: {}",
            line
        ))),
    }
}

/// Extract the data port out of a 229 EPSV reply, `(|||port|)`.
pub fn parse_epsv(reply: &FtpReply) -> FtpResult<u16> {
    let caps = EPSV_PORT
        .captures_iter(&reply.message)
        .last()
        .ok_or_else(|| FtpError::protocol_parse(format!("cannot parse EPSV reply: {}", reply.message)))?;
    caps[1]
        .parse()
        .map_err(|_| FtpError::protocol_parse(format!("EPSV port out of range: {}", &caps[1])))
}

/// Extract the data endpoint out of a 227 PASV reply,
/// `(h1,h2,h3,h4,p1,p2)`; port is `p1 * 256 + p2`.
pub fn parse_pasv(reply: &FtpReply) -> FtpResult<SocketAddr> {
    let caps = PASV_HOST_PORT
        .captures(&reply.message)
        .ok_or_else(|| FtpError::protocol_parse(format!("cannot parse PASV reply: {}", reply.message)))?;

    let mut octets = [0u8; 6];
    for (i, octet) in octets.iter_mut().enumerate() {
        *octet = caps[i + 1]
            .parse()
            .map_err(|_| FtpError::protocol_parse("PASV field out of range"))?;
    }

    let ip = IpAddr::V4(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]));
    let port = (octets[4] as u16) * 256 + octets[5] as u16;
    Ok(SocketAddr::new(ip, port))
}

/// Extract the capability tokens of a FEAT reply: every line except the
/// `211` framing lines and blanks, trimmed.
pub fn parse_feats(reply: &FtpReply) -> Vec<String> {
    reply
        .lines
        .iter()
        .filter(|l| !l.trim_start().starts_with("211"))
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}
