//! Shared types: session configuration, session state, replies, nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Connection / session ────────────────────────────────────────────

/// Security mode for the control channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SecurityMode {
    /// Plain-text FTP (port 21).
    None,
    /// Explicit FTPS, starts plain then upgrades via AUTH TLS (port 21).
    Explicit,
    /// Implicit FTPS, TLS from the first byte (port 990).
    Implicit,
}

impl Default for SecurityMode {
    fn default() -> Self {
        Self::None
    }
}

/// Transfer type (RFC 959 TYPE command).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransferMode {
    Ascii,
    Image,
}

impl TransferMode {
    pub(crate) fn type_char(self) -> char {
        match self {
            Self::Ascii => 'A',
            Self::Image => 'I',
        }
    }
}

impl Default for TransferMode {
    fn default() -> Self {
        Self::Image
    }
}

/// Address-family preference for resolving the server hostname.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IpVersion {
    Any,
    V4Only,
    V6Only,
}

impl Default for IpVersion {
    fn default() -> Self {
        Self::Any
    }
}

/// TLS protocol version bound, mapped onto `native_tls::Protocol`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TlsProtocolVersion {
    Tlsv10,
    Tlsv11,
    Tlsv12,
}

/// Client certificate for mutual-TLS servers (PKCS#12 archive).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub pkcs12_der: Vec<u8>,
    pub passphrase: String,
}

/// Wire encoding negotiated on the control channel.
///
/// Starts as `Ascii`; switches to `Utf8` once (and only once) when the
/// server advertises `UTF8` in FEAT.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    Utf8,
}

/// Listing command the server will be driven with, fixed after FEAT.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ListingStrategy {
    Mlsd,
    List,
}

/// Configuration for a single FTP session. Immutable once connected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpSessionConfig {
    /// Server hostname. A full URI is accepted; its host part is used.
    pub host: String,
    /// Control port. Defaults to 21, or 990 for implicit FTPS.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Remote directory the session is rooted in, created if missing.
    #[serde(default = "default_base_directory")]
    pub base_directory: String,
    #[serde(default)]
    pub transfer_mode: TransferMode,
    /// Optional second TYPE byte (e.g. `N` for `TYPE A N`).
    #[serde(default)]
    pub mode_second_type: Option<char>,
    #[serde(default)]
    pub security: SecurityMode,
    /// Accept self-signed / untrusted certificates.
    #[serde(default)]
    pub ignore_certificate_errors: bool,
    #[serde(default)]
    pub client_certificate: Option<ClientIdentity>,
    #[serde(default)]
    pub min_tls_protocol: Option<TlsProtocolVersion>,
    #[serde(default)]
    pub max_tls_protocol: Option<TlsProtocolVersion>,
    #[serde(default)]
    pub ip_version: IpVersion,
    /// Applied to connects and to every read/write on both channels.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_directory() -> String {
    "/".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for FtpSessionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: None,
            username: String::new(),
            password: String::new(),
            base_directory: default_base_directory(),
            transfer_mode: TransferMode::Image,
            mode_second_type: None,
            security: SecurityMode::None,
            ignore_certificate_errors: false,
            client_certificate: None,
            min_tls_protocol: None,
            max_tls_protocol: None,
            ip_version: IpVersion::Any,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl FtpSessionConfig {
    /// Effective control port: explicit, else 990 for implicit FTPS, else 21.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(match self.security {
            SecurityMode::Implicit => 990,
            _ => 21,
        })
    }

    /// Host with any URI decoration (`scheme://`, userinfo, port, path)
    /// stripped. Bracketed and bare IPv6 literals pass through intact.
    pub fn effective_host(&self) -> &str {
        let mut host = self.host.as_str();
        if let Some(pos) = host.find("://") {
            host = &host[pos + 3..];
        }
        if let Some(pos) = host.find('@') {
            host = &host[pos + 1..];
        }
        for stop in ['/', '?'] {
            if let Some(pos) = host.find(stop) {
                host = &host[..pos];
            }
        }
        if let Some(inner) = host.strip_prefix('[') {
            if let Some(pos) = inner.find(']') {
                return &inner[..pos];
            }
        }
        // A single colon separates a port; more than one is an IPv6
        // literal.
        if host.matches(':').count() == 1 {
            if let Some(pos) = host.find(':') {
                host = &host[..pos];
            }
        }
        host
    }

    /// Username with the anonymous default applied.
    pub fn effective_username(&self) -> &str {
        if self.username.is_empty() {
            "anonymous"
        } else {
            &self.username
        }
    }

    /// Base directory normalised to begin with `/`.
    pub fn normalized_base_directory(&self) -> String {
        if self.base_directory.is_empty() {
            "/".to_string()
        } else if self.base_directory.starts_with('/') {
            self.base_directory.clone()
        } else {
            format!("/{}", self.base_directory)
        }
    }
}

/// Snapshot of an active FTP session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpSessionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub security: SecurityMode,
    pub connected: bool,
    pub authenticated: bool,
    pub encrypted: bool,
    pub working_directory: String,
    pub server_banner: Option<String>,
    pub features: Vec<String>,
    pub encoding: Encoding,
    pub listing_strategy: ListingStrategy,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub transfer_mode: TransferMode,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

// ─── Directory listing ───────────────────────────────────────────────

/// Type of a remote filesystem entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
    SymbolicLink,
}

/// One entry from a directory listing (MLSD or LIST).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FtpNode {
    pub name: String,
    pub kind: NodeKind,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Sorting field for directory listings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortField {
    Name,
    Modified,
}

/// Sort order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Options for listing a directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOptions {
    /// Glob filter on entry names (e.g. `*.txt`).
    pub filter: Option<String>,
    pub sort_by: Option<SortField>,
    pub sort_order: Option<SortOrder>,
    /// Hide dot-files when false.
    #[serde(default = "default_show_hidden")]
    pub show_hidden: bool,
}

fn default_show_hidden() -> bool {
    true
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            filter: None,
            sort_by: None,
            sort_order: None,
            show_hidden: true,
        }
    }
}

// ─── FTP reply ───────────────────────────────────────────────────────

/// Reply codes this client drives its decisions with.
pub mod code {
    pub const DATA_ALREADY_OPEN: u16 = 125;
    pub const OPENING_DATA: u16 = 150;
    pub const COMMAND_OK: u16 = 200;
    pub const COMMAND_SUPERFLUOUS: u16 = 202;
    pub const END_FEATS: u16 = 211;
    pub const FILE_STATUS: u16 = 213;
    pub const CLOSING_DATA: u16 = 226;
    pub const ENTERING_PASSIVE: u16 = 227;
    pub const ENTERING_EXTENDED_PASSIVE: u16 = 229;
    pub const LOGGED_IN: u16 = 230;
    pub const FILE_ACTION_OK: u16 = 250;
    pub const PATHNAME_CREATED: u16 = 257;
    pub const NEED_PASSWORD: u16 = 331;
    pub const NEED_ACCOUNT: u16 = 332;
    pub const FILE_COMMAND_PENDING: u16 = 350;
    pub const FILE_UNAVAILABLE: u16 = 550;
}

/// A single FTP reply, possibly accumulated from multiple lines.
///
/// `lines` holds every raw line in wire order, including the terminal
/// `NNN message` line that supplies `code` and `message` (FEAT parsing
/// relies on the full set).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FtpReply {
    pub code: u16,
    pub message: String,
    pub lines: Vec<String>,
}

impl FtpReply {
    /// Whether the code indicates success: `200..=399`.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.code)
    }

    /// Positive-preliminary reply (1xx).
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Positive-completion reply (2xx).
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Positive-intermediate reply (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Full reply text, all lines joined.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}
