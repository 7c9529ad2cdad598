//! Public facade: a thin dispatcher over [`FtpSession`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::listing::NodeStream;
use crate::ftp::session::FtpSession;
use crate::ftp::transfer::DataTransfer;
use crate::ftp::types::{FtpNode, FtpSessionConfig, FtpSessionInfo, ListOptions};

/// Chunk size for the streaming copy loops (64 KiB).
const CHUNK_SIZE: usize = 65_536;

/// A connected FTP client.
///
/// Thin wrapper over the session orchestrator: every method validates
/// its arguments and delegates. Construction connects and logs in.
pub struct FtpClient {
    session: FtpSession,
}

impl std::fmt::Debug for FtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpClient").finish_non_exhaustive()
    }
}

impl FtpClient {
    /// Connect and run the full login sequence.
    pub async fn connect(config: FtpSessionConfig) -> FtpResult<Self> {
        let session = FtpSession::new(config)?;
        session.login().await?;
        Ok(Self { session })
    }

    /// The underlying session, for operations the facade does not cover.
    pub fn session(&self) -> &FtpSession {
        &self.session
    }

    /// Re-run the login sequence, logging out first when connected.
    pub async fn login(&self) -> FtpResult<()> {
        self.session.login().await
    }

    /// Send QUIT and close the session. Idempotent.
    pub async fn quit(&self) -> FtpResult<()> {
        self.session.logout().await;
        Ok(())
    }

    /// Cancel every pending and future operation on this session.
    pub fn cancel(&self) {
        self.session.cancel();
    }

    // ─── State ───────────────────────────────────────────────────

    pub async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn is_encrypted(&self) -> bool {
        self.session.is_encrypted()
    }

    pub fn has_feature(&self, token: &str) -> bool {
        self.session.has_feature(token)
    }

    pub fn session_info(&self) -> FtpSessionInfo {
        self.session.session_info()
    }

    // ─── Working directory ───────────────────────────────────────

    pub fn working_directory(&self) -> String {
        self.session.working_directory()
    }

    pub async fn change_directory(&self, path: &str) -> FtpResult<String> {
        self.session.change_directory(path).await
    }

    // ─── Listings ────────────────────────────────────────────────

    pub async fn list_all(
        &self,
        path: Option<&str>,
        options: ListOptions,
    ) -> FtpResult<Vec<FtpNode>> {
        self.session.list_all(path, options).await
    }

    pub async fn list_files(
        &self,
        path: Option<&str>,
        options: ListOptions,
    ) -> FtpResult<Vec<FtpNode>> {
        self.session.list_files(path, options).await
    }

    pub async fn list_directories(
        &self,
        path: Option<&str>,
        options: ListOptions,
    ) -> FtpResult<Vec<FtpNode>> {
        self.session.list_directories(path, options).await
    }

    pub async fn name_list(&self, path: Option<&str>) -> FtpResult<Vec<String>> {
        self.session.name_list(path).await
    }

    pub async fn node_stream(&self, path: Option<&str>) -> FtpResult<NodeStream> {
        self.session.node_stream(path).await
    }

    // ─── Byte streams ────────────────────────────────────────────

    /// Open `path` for reading. Read to EOF, then call
    /// [`DataTransfer::finish`].
    pub async fn open_read(&self, path: &str) -> FtpResult<DataTransfer> {
        self.session.open_read(path).await
    }

    /// Open `name` (relative to the working directory) for writing,
    /// creating missing intermediate directories.
    pub async fn open_write(&self, name: &str) -> FtpResult<DataTransfer> {
        self.session.open_write(name).await
    }

    /// Download `path` into any [`AsyncWrite`] sink. Returns the byte
    /// count.
    pub async fn download_to<W>(&self, path: &str, sink: &mut W) -> FtpResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut transfer = self.session.open_read(path).await?;
        let io_timeout = Duration::from_secs(self.session.config().timeout_secs);
        let cancel = self.session.cancel_token().clone();

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(FtpError::cancelled());
            }
            let n = timeout(io_timeout, transfer.read(&mut buf))
                .await
                .map_err(|_| FtpError::timeout("data read timed out"))??;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n]).await?;
            total += n as u64;
        }
        sink.flush().await?;

        transfer.finish().await;
        self.session.add_bytes_downloaded(total);
        Ok(total)
    }

    /// Upload from any [`AsyncRead`] source into `name`. Returns the
    /// byte count.
    pub async fn upload_from<R>(&self, name: &str, source: &mut R) -> FtpResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut transfer = self.session.open_write(name).await?;
        let io_timeout = Duration::from_secs(self.session.config().timeout_secs);
        let cancel = self.session.cancel_token().clone();

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(FtpError::cancelled());
            }
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            timeout(io_timeout, transfer.write_all(&buf[..n]))
                .await
                .map_err(|_| FtpError::timeout("data write timed out"))??;
            total += n as u64;
        }
        timeout(io_timeout, transfer.flush())
            .await
            .map_err(|_| FtpError::timeout("data flush timed out"))??;

        transfer.finish().await;
        self.session.add_bytes_uploaded(total);
        Ok(total)
    }

    // ─── Namespace operations ────────────────────────────────────

    pub async fn create_directory(&self, path: &str) -> FtpResult<()> {
        self.session.create_directory(path).await
    }

    pub async fn delete_file(&self, path: &str) -> FtpResult<()> {
        self.session.delete_file(path).await
    }

    /// Remove a directory, recursing when the server reports it
    /// non-empty.
    pub async fn delete_directory(&self, path: &str) -> FtpResult<()> {
        self.session.remove_directory(path).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> FtpResult<()> {
        self.session.rename(from, to).await
    }

    pub async fn size(&self, path: &str) -> FtpResult<u64> {
        self.session.size(path).await
    }

    pub async fn modified_time(&self, path: &str) -> FtpResult<DateTime<Utc>> {
        self.session.modified_time(path).await
    }

    pub async fn noop(&self) -> FtpResult<()> {
        self.session.noop().await
    }
}
