//! FTP-specific error type.

use std::fmt;

/// Categorised FTP error.
#[derive(Debug, Clone)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// FTP reply code that triggered the error, if any.
    pub code: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// TCP connect failure.
    ConnectionFailed,
    /// Hostname resolved to no address of the requested family.
    NoEndpoint,
    /// TLS handshake or certificate validation failure.
    TlsFailed,
    /// Wrong username/password, or the server refused the login.
    AuthFailed,
    /// Operation issued before a successful login.
    NotLoggedIn,
    /// Server returned an unexpected reply code for a command.
    CommandRejected,
    /// A reply failed a typed extractor (PWD without quotes, bad PASV, ...).
    ProtocolParse,
    /// Both EPSV and PASV failed; no data port available.
    NoDataPort,
    /// Socket read/write failure. Forces a disconnect.
    Io,
    /// Operation timed out. Forces a disconnect.
    Timeout,
    /// Operation cancelled through the session's cancellation token.
    Cancelled,
    /// The control connection is gone.
    Disconnected,
    /// Empty path, malformed configuration, or similar caller mistake.
    InvalidArgument,
}

pub type FtpResult<T> = Result<T, FtpError>;

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionFailed, msg)
    }

    pub fn no_endpoint(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::NoEndpoint, msg)
    }

    pub fn tls_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TlsFailed, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::AuthFailed, msg)
    }

    pub fn not_logged_in() -> Self {
        Self::new(FtpErrorKind::NotLoggedIn, "not logged in")
    }

    pub fn command_rejected(code: u16, msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::CommandRejected, msg).with_code(code)
    }

    pub fn protocol_parse(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ProtocolParse, msg)
    }

    pub fn no_data_port() -> Self {
        Self::new(FtpErrorKind::NoDataPort, "EPSV and PASV both failed")
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Io, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Timeout, msg)
    }

    pub fn cancelled() -> Self {
        Self::new(FtpErrorKind::Cancelled, "operation cancelled")
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Disconnected, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidArgument, msg)
    }

    /// Whether this error must tear the session down (socket-level damage
    /// rather than a protocol-level refusal).
    pub fn forces_disconnect(&self) -> bool {
        matches!(
            self.kind,
            FtpErrorKind::Io
                | FtpErrorKind::Timeout
                | FtpErrorKind::TlsFailed
                | FtpErrorKind::Disconnected
        )
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "[{:?} {}] {}", self.kind, code, self.message)
        } else {
            write!(f, "[{:?}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Self::timeout(e.to_string())
        } else {
            Self::io(e.to_string())
        }
    }
}

impl From<native_tls::Error> for FtpError {
    fn from(e: native_tls::Error) -> Self {
        Self::tls_failed(e.to_string())
    }
}
