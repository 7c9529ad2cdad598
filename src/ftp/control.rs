//! The control channel: serialises commands, reads replies, tracks
//! liveness, and dials passive data sockets.
//!
//! Locking discipline: the writer mutex is the send lock and is held for
//! a full command/reply round trip; the reader mutex is the receive lock
//! and is held for any reply read. `get_response` takes only the receive
//! lock, so the terminal-reply read after a data transfer never contends
//! with a user-initiated send for the send lock. Both mutexes are
//! FIFO-fair, which totally orders concurrent senders on the wire.

use std::net::SocketAddr;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::ftp::connection::EstablishedControl;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::{self, ControlReader, ControlWriter, FtpCommand};
use crate::ftp::transfer::DataStream;
use crate::ftp::types::{Encoding, FtpReply, FtpSessionConfig};

/// Liveness probes are only performed once the channel has been idle
/// this long.
const SOCKET_POLL_INTERVAL: Duration = Duration::from_secs(15);
/// Window a liveness probe waits for the socket to become readable.
const PROBE_WINDOW: Duration = Duration::from_millis(500);
/// Window for the pre-send stale-byte check; one poll of the reader.
const STALE_CHECK_WINDOW: Duration = Duration::from_millis(1);

struct Shared {
    encoding: Encoding,
    last_activity: DateTime<Utc>,
    connected: bool,
    encrypted: bool,
}

pub(crate) struct ControlChannel {
    /// Receive lock.
    reader: Mutex<Option<ControlReader>>,
    /// Send lock.
    writer: Mutex<Option<ControlWriter>>,
    shared: StdMutex<Shared>,
    config: FtpSessionConfig,
    peer: SocketAddr,
    io_timeout: Duration,
    cancel: CancellationToken,
}

impl ControlChannel {
    pub(crate) fn new(
        established: EstablishedControl,
        config: FtpSessionConfig,
        cancel: CancellationToken,
    ) -> Self {
        let io_timeout = Duration::from_secs(config.timeout_secs);
        Self {
            reader: Mutex::new(Some(established.reader)),
            writer: Mutex::new(Some(established.writer)),
            shared: StdMutex::new(Shared {
                encoding: Encoding::Ascii,
                last_activity: Utc::now(),
                connected: true,
                encrypted: established.encrypted,
            }),
            config,
            peer: established.peer,
            io_timeout,
            cancel,
        }
    }

    // ─── State accessors ─────────────────────────────────────────

    fn shared(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn encoding(&self) -> Encoding {
        self.shared().encoding
    }

    /// One-way ASCII → UTF-8 transition after the server advertises UTF8.
    pub(crate) fn enable_utf8(&self) {
        let mut shared = self.shared();
        if shared.encoding == Encoding::Ascii {
            shared.encoding = Encoding::Utf8;
        }
    }

    pub(crate) fn is_encrypted(&self) -> bool {
        self.shared().encrypted
    }

    pub(crate) fn connected_flag(&self) -> bool {
        self.shared().connected
    }

    pub(crate) fn last_activity(&self) -> DateTime<Utc> {
        self.shared().last_activity
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn touch(&self) {
        self.shared().last_activity = Utc::now();
    }

    fn check_cancelled(&self) -> FtpResult<()> {
        if self.cancel.is_cancelled() {
            Err(FtpError::cancelled())
        } else {
            Ok(())
        }
    }

    // ─── Bounded I/O primitives ──────────────────────────────────

    async fn write_bounded(&self, writer: &mut ControlWriter, cmd: &FtpCommand) -> FtpResult<()> {
        self.check_cancelled()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FtpError::cancelled()),
            r = timeout(self.io_timeout, protocol::write_command(writer, cmd)) => match r {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(FtpError::timeout(format!("sending {} timed out", cmd.verb))),
            },
        }
    }

    async fn read_bounded(
        &self,
        reader: &mut ControlReader,
        stage: &str,
    ) -> FtpResult<FtpReply> {
        self.check_cancelled()?;
        let encoding = self.encoding();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FtpError::cancelled()),
            r = timeout(self.io_timeout, protocol::read_reply(reader, encoding)) => match r {
                Ok(r) => r,
                Err(_) => Err(FtpError::timeout(format!("reading the {} reply timed out", stage))),
            },
        }
    }

    /// Discard one complete stale reply if inbound bytes are already
    /// waiting before a new command is sent. Logged and swallowed.
    async fn drain_stale(&self, reader: &mut ControlReader) {
        let pending = match timeout(STALE_CHECK_WINDOW, reader.fill_buf()).await {
            Ok(Ok(buf)) => buf.len(),
            _ => 0,
        };
        if pending == 0 {
            return;
        }

        let encoding = self.encoding();
        match timeout(self.io_timeout, protocol::read_reply(reader, encoding)).await {
            Ok(Ok(reply)) => log::warn!(
                "discarding stale reply before send ({} buffered bytes): {} {}",
                pending,
                reply.code,
                reply.message
            ),
            _ => log::warn!(
                "discarding {} stale unparseable bytes before send",
                pending
            ),
        }
    }

    // ─── Round trips ─────────────────────────────────────────────

    /// Send one command and read its reply, holding the send lock for
    /// the whole round trip.
    pub(crate) async fn send_and_read(&self, cmd: &FtpCommand) -> FtpResult<FtpReply> {
        let result = self.round_trip(cmd).await;
        if let Err(e) = &result {
            if e.forces_disconnect() {
                self.disconnect().await;
            }
        }
        result
    }

    /// Same round trip, with the reply handed to a typed extractor.
    pub(crate) async fn send_and_read_typed<T, F>(
        &self,
        cmd: &FtpCommand,
        parser: F,
    ) -> FtpResult<T>
    where
        F: FnOnce(&FtpReply) -> FtpResult<T>,
    {
        let reply = self.send_and_read(cmd).await?;
        parser(&reply)
    }

    async fn round_trip(&self, cmd: &FtpCommand) -> FtpResult<FtpReply> {
        let mut writer_slot = self.writer.lock().await;
        let writer = writer_slot
            .as_mut()
            .ok_or_else(|| FtpError::disconnected("control connection is closed"))?;

        let mut reader_slot = self.reader.lock().await;
        let reader = reader_slot
            .as_mut()
            .ok_or_else(|| FtpError::disconnected("control connection is closed"))?;

        self.drain_stale(reader).await;
        self.write_bounded(writer, cmd).await?;

        // A failure from here on leaves a command in flight with its
        // reply unread; the channel is desynchronised and must close.
        match self.read_bounded(reader, &cmd.verb).await {
            Ok(reply) => {
                self.touch();
                Ok(reply)
            }
            Err(e) => {
                self.teardown(&mut reader_slot, &mut writer_slot).await;
                Err(e)
            }
        }
    }

    /// Read one reply without sending, holding only the receive lock.
    /// Used to consume the terminal reply after a data transfer.
    pub(crate) async fn get_response(&self) -> FtpResult<FtpReply> {
        let result = {
            let mut reader_slot = self.reader.lock().await;
            let reader = reader_slot
                .as_mut()
                .ok_or_else(|| FtpError::disconnected("control connection is closed"))?;
            self.read_bounded(reader, "transfer-end").await
        };

        match &result {
            Ok(_) => self.touch(),
            Err(e) if e.forces_disconnect() => self.disconnect().await,
            Err(_) => {}
        }
        result
    }

    // ─── Liveness ────────────────────────────────────────────────

    /// Side-effecting liveness test. Recently active channels are
    /// assumed alive; older ones get a bounded readability probe, where
    /// readable-with-EOF or an I/O failure means the peer is gone.
    pub(crate) async fn is_connected(&self) -> bool {
        {
            let shared = self.shared();
            if !shared.connected {
                return false;
            }
            let idle = Utc::now().signed_duration_since(shared.last_activity);
            if idle.to_std().unwrap_or(Duration::ZERO) < SOCKET_POLL_INTERVAL {
                return true;
            }
        }

        let alive = {
            let mut reader_slot = self.reader.lock().await;
            match reader_slot.as_mut() {
                None => false,
                // fill_buf does not consume: stale bytes stay readable
                // for the next drain.
                Some(reader) => match timeout(PROBE_WINDOW, reader.fill_buf()).await {
                    Err(_) => true,                      // idle, nothing to read
                    Ok(Ok(buf)) => !buf.is_empty(),      // empty fill = EOF
                    Ok(Err(_)) => false,
                },
            }
        };

        if alive {
            self.touch();
        } else {
            self.disconnect().await;
        }
        alive
    }

    // ─── Data sockets ────────────────────────────────────────────

    /// Dial a passive data endpoint. Encrypted control channels wrap the
    /// data socket in TLS immediately after connect.
    pub(crate) async fn open_data_stream(&self, addr: SocketAddr) -> FtpResult<DataStream> {
        self.check_cancelled()?;
        let tcp = timeout(self.io_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| FtpError::timeout(format!("data connect to {} timed out", addr)))?
            .map_err(|e| FtpError::connection_failed(format!("data connect to {}: {}", addr, e)))?;
        tcp.set_nodelay(true).ok();

        if self.is_encrypted() {
            let stream = crate::ftp::tls::handshake(&self.config, tcp).await?;
            Ok(DataStream::Tls(Box::new(stream)))
        } else {
            Ok(DataStream::Plain(tcp))
        }
    }

    // ─── Shutdown ────────────────────────────────────────────────

    async fn teardown(
        &self,
        reader_slot: &mut Option<ControlReader>,
        writer_slot: &mut Option<ControlWriter>,
    ) {
        if let Some(mut writer) = writer_slot.take() {
            let _ = timeout(Duration::from_secs(1), writer.shutdown()).await;
        }
        reader_slot.take();

        let mut shared = self.shared();
        shared.connected = false;
        shared.encrypted = false;
    }

    /// Idempotent: drops the TLS wrapper and both socket halves.
    pub(crate) async fn disconnect(&self) {
        let mut writer_slot = self.writer.lock().await;
        let mut reader_slot = self.reader.lock().await;
        if writer_slot.is_some() || reader_slot.is_some() {
            log::debug!("closing control connection to {}", self.peer);
        }
        self.teardown(&mut reader_slot, &mut writer_slot).await;
    }
}
