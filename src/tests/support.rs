//! Scripted server support: each test plays the server side of a
//! literal command/reply exchange on a loopback listener.

use std::future::Future;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::FtpSessionConfig;

/// One accepted control connection, with every received command
/// recorded for order assertions.
pub struct ServerConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pub log: Vec<String>,
}

impl ServerConn {
    pub fn new(stream: TcpStream) -> Self {
        let (rd, wr) = stream.into_split();
        Self {
            reader: BufReader::new(rd),
            writer: wr,
            log: Vec::new(),
        }
    }

    /// Send one reply line, CRLF-terminated.
    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .unwrap();
    }

    /// Send raw bytes (multi-line replies).
    pub async fn send_raw(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.unwrap();
    }

    /// Receive one command line.
    pub async fn recv(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        let line = line.trim_end().to_string();
        if !line.is_empty() {
            self.log.push(line.clone());
        }
        line
    }

    /// Receive one command line and assert its prefix.
    pub async fn expect(&mut self, prefix: &str) -> String {
        let line = self.recv().await;
        assert!(
            line.starts_with(prefix),
            "server expected {:?}, client sent {:?}",
            prefix,
            line
        );
        line
    }
}

/// Spawn a script handling exactly one control connection. The join
/// handle yields the received-command log.
pub async fn serve<F, Fut>(script: F) -> (SocketAddr, JoinHandle<Vec<String>>)
where
    F: FnOnce(ServerConn) -> Fut + Send + 'static,
    Fut: Future<Output = ServerConn> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let conn = script(ServerConn::new(stream)).await;
        conn.log
    });
    (addr, handle)
}

/// Spawn a script that owns the listener (multiple connections).
pub async fn serve_listener<F, Fut>(script: F) -> (SocketAddr, JoinHandle<Vec<String>>)
where
    F: FnOnce(TcpListener) -> Fut + Send + 'static,
    Fut: Future<Output = Vec<String>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(script(listener));
    (addr, handle)
}

pub fn test_config(addr: SocketAddr) -> FtpSessionConfig {
    FtpSessionConfig {
        host: addr.ip().to_string(),
        port: Some(addr.port()),
        timeout_secs: 5,
        ..Default::default()
    }
}

pub const FEAT_MLSD_UTF8: &str = "211-Features:\r\n UTF8\r\n MLSD\r\n211 end\r\n";
pub const FEAT_PLAIN: &str = "211-Features:\r\n SIZE\r\n211 end\r\n";

/// Standard anonymous-login preamble: greeting, USER/PASS, FEAT, the
/// optional OPTS UTF8, TYPE, and rooting in `/`.
pub async fn standard_login(c: &mut ServerConn, feat: &str, expects_opts: bool) {
    c.send("220 Service ready").await;
    c.expect("USER").await;
    c.send("331 password required").await;
    c.expect("PASS").await;
    c.send("230 logged in").await;
    c.expect("FEAT").await;
    c.send_raw(feat).await;
    if expects_opts {
        c.expect("OPTS UTF8 ON").await;
        c.send("200 ok").await;
    }
    c.expect("TYPE").await;
    c.send("200 ok").await;
    c.expect("CWD /").await;
    c.send("250 ok").await;
    c.expect("PWD").await;
    c.send("257 \"/\" is current directory").await;
}

/// Answer an EPSV request with a fresh loopback data listener.
pub async fn offer_epsv(c: &mut ServerConn) -> TcpListener {
    c.expect("EPSV").await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    c.send(&format!("229 Entering Extended Passive Mode (|||{}|)", port))
        .await;
    listener
}
