//! Passive data streams and the end-of-transfer handshake.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;
use tokio_native_tls::TlsStream;

use crate::ftp::control::ControlChannel;

/// A plain or TLS-wrapped data-channel byte pipe.
pub(crate) enum DataStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for DataStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            DataStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for DataStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            DataStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_flush(cx),
            DataStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            DataStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// An open data transfer, handed to the caller by value.
///
/// Read it to EOF (RETR, listings) or write the payload and call
/// [`finish`], which closes the data socket and consumes the terminal
/// control reply (typically `226 Closing data connection`). The permit
/// it holds keeps the session to one data transfer at a time.
///
/// Dropping a transfer without `finish` leaves the terminal reply
/// unread on the control channel; the pre-send stale drain will discard
/// it with a warning before the next command goes out.
///
/// [`finish`]: DataTransfer::finish
pub struct DataTransfer {
    stream: DataStream,
    control: Arc<ControlChannel>,
    _permit: OwnedSemaphorePermit,
}

impl DataTransfer {
    pub(crate) fn new(
        stream: DataStream,
        control: Arc<ControlChannel>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            stream,
            control,
            _permit: permit,
        }
    }

    /// Close the data stream and consume the terminal reply.
    ///
    /// The payload has already been delivered when this runs, so a
    /// failed or negative terminal reply is logged rather than raised.
    pub async fn finish(self) {
        let Self {
            mut stream,
            control,
            _permit,
        } = self;

        if let Err(e) = stream.shutdown().await {
            log::debug!("data stream shutdown: {}", e);
        }
        drop(stream);

        match control.get_response().await {
            Ok(reply) if reply.is_success() => {
                log::trace!("transfer complete: {} {}", reply.code, reply.message);
            }
            Ok(reply) => {
                log::warn!(
                    "server reported {} {} after the data stream closed",
                    reply.code,
                    reply.message
                );
            }
            Err(e) => {
                log::warn!("failed to read the end-of-transfer reply: {}", e);
            }
        }
    }
}

impl AsyncRead for DataTransfer {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for DataTransfer {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
