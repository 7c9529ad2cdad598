//! # portside
//!
//! An async FTP/FTPS client library implementing RFC 959 with the
//! extensions real-world servers actually speak:
//! - **RFC 2428** - EPSV extended passive mode
//! - **RFC 2389** - FEAT feature negotiation
//! - **RFC 3659** - MLSD machine listings, SIZE, MDTM
//! - **RFC 4217** - explicit and implicit FTPS
//!
//! The entry point is [`FtpClient`]: connect with an
//! [`FtpSessionConfig`], then enumerate directories, stream files in
//! either direction, and perform namespace operations.
//!
//! ```no_run
//! use portside::{FtpClient, FtpSessionConfig};
//!
//! # async fn run() -> Result<(), portside::FtpError> {
//! let config = FtpSessionConfig {
//!     host: "ftp.example.com".into(),
//!     username: "demo".into(),
//!     password: "password".into(),
//!     ..Default::default()
//! };
//! let client = FtpClient::connect(config).await?;
//! for node in client.list_files(None, Default::default()).await? {
//!     println!("{} ({} bytes)", node.name, node.size);
//! }
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

pub mod ftp;

pub use ftp::client::FtpClient;
pub use ftp::error::{FtpError, FtpErrorKind, FtpResult};
pub use ftp::listing::NodeStream;
pub use ftp::session::FtpSession;
pub use ftp::transfer::DataTransfer;
pub use ftp::types::{
    ClientIdentity, Encoding, FtpNode, FtpReply, FtpSessionConfig, FtpSessionInfo, IpVersion,
    ListOptions, ListingStrategy, NodeKind, SecurityMode, SortField, SortOrder,
    TlsProtocolVersion, TransferMode,
};

#[cfg(test)]
mod tests;
