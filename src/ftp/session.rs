//! Session orchestrator: login handshake, feature negotiation, working
//! directory, namespace operations, and data-transfer setup.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ftp::connection;
use crate::ftp::control::ControlChannel;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::parser;
use crate::ftp::protocol::{self, FtpCommand};
use crate::ftp::transfer::DataTransfer;
use crate::ftp::types::{
    code, Encoding, FtpReply, FtpSessionConfig, FtpSessionInfo, ListingStrategy,
};

struct SessionState {
    control: Option<Arc<ControlChannel>>,
    authenticated: bool,
    working_directory: String,
    features: HashSet<String>,
    listing_strategy: ListingStrategy,
    server_banner: Option<String>,
    connected_at: DateTime<Utc>,
    bytes_uploaded: u64,
    bytes_downloaded: u64,
}

/// One FTP session against one server.
///
/// All operations take `&self`; the control channel's send mutex
/// serialises whatever is issued concurrently, and a capacity-1
/// semaphore keeps the session to a single data transfer at a time.
pub struct FtpSession {
    id: String,
    config: FtpSessionConfig,
    cancel: CancellationToken,
    data_guard: Arc<Semaphore>,
    state: StdMutex<SessionState>,
}

impl FtpSession {
    pub fn new(config: FtpSessionConfig) -> FtpResult<Self> {
        if config.effective_host().is_empty() {
            return Err(FtpError::invalid_argument("host must not be empty"));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            config,
            cancel: CancellationToken::new(),
            data_guard: Arc::new(Semaphore::new(1)),
            state: StdMutex::new(SessionState {
                control: None,
                authenticated: false,
                working_directory: "/".to_string(),
                features: HashSet::new(),
                listing_strategy: ListingStrategy::List,
                server_banner: None,
                connected_at: Utc::now(),
                bytes_uploaded: 0,
                bytes_downloaded: 0,
            }),
        })
    }

    // ─── State helpers ───────────────────────────────────────────

    fn state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &FtpSessionConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request cancellation of every pending and future operation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().authenticated
    }

    /// Cached working directory, always absolute.
    pub fn working_directory(&self) -> String {
        self.state().working_directory.clone()
    }

    pub(crate) fn listing_strategy(&self) -> ListingStrategy {
        self.state().listing_strategy
    }

    /// Whether the server advertised a capability token in FEAT.
    pub fn has_feature(&self, token: &str) -> bool {
        self.state().features.contains(&token.to_ascii_uppercase())
    }

    fn control(&self) -> Option<Arc<ControlChannel>> {
        self.state().control.clone()
    }

    pub(crate) fn ensure_authenticated(&self) -> FtpResult<Arc<ControlChannel>> {
        let state = self.state();
        match (&state.control, state.authenticated) {
            (Some(control), true) => Ok(Arc::clone(control)),
            _ => Err(FtpError::not_logged_in()),
        }
    }

    fn mark_disconnected(&self) {
        let mut state = self.state();
        state.authenticated = false;
        state.control = None;
    }

    pub(crate) fn add_bytes_downloaded(&self, n: u64) {
        self.state().bytes_downloaded += n;
    }

    pub(crate) fn add_bytes_uploaded(&self, n: u64) {
        self.state().bytes_uploaded += n;
    }

    /// Losing the socket clears connected and authenticated together.
    async fn send(&self, control: &ControlChannel, cmd: &FtpCommand) -> FtpResult<FtpReply> {
        match control.send_and_read(cmd).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                if e.forces_disconnect() {
                    self.mark_disconnected();
                }
                Err(e)
            }
        }
    }

    /// Round trip through a typed extractor, with the same
    /// disconnect-state bookkeeping as [`send`].
    ///
    /// [`send`]: FtpSession::send
    async fn send_typed<T, F>(
        &self,
        control: &ControlChannel,
        cmd: &FtpCommand,
        parser: F,
    ) -> FtpResult<T>
    where
        F: FnOnce(&FtpReply) -> FtpResult<T>,
    {
        match control.send_and_read_typed(cmd, parser).await {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.forces_disconnect() {
                    self.mark_disconnected();
                }
                Err(e)
            }
        }
    }

    fn require_success(cmd: &str, reply: &FtpReply) -> FtpResult<()> {
        if reply.is_success() {
            Ok(())
        } else {
            Err(FtpError::command_rejected(
                reply.code,
                format!("{} rejected: {}", cmd, reply.message),
            ))
        }
    }

    // ─── Liveness ────────────────────────────────────────────────

    /// Side-effecting: a failed probe drops the session to disconnected.
    pub async fn is_connected(&self) -> bool {
        let Some(control) = self.control() else {
            return false;
        };
        let alive = control.is_connected().await;
        if !alive {
            self.mark_disconnected();
        }
        alive
    }

    pub fn is_encrypted(&self) -> bool {
        self.control().map(|c| c.is_encrypted()).unwrap_or(false)
    }

    // ─── Login / logout ──────────────────────────────────────────

    /// Run the full login sequence. Any failure closes the session.
    pub async fn login(&self) -> FtpResult<()> {
        if self.is_connected().await {
            self.logout().await;
        }

        let result = self.login_inner().await;
        if result.is_err() {
            self.logout().await;
        }
        result
    }

    async fn login_inner(&self) -> FtpResult<()> {
        let established = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FtpError::cancelled()),
            r = connection::establish(&self.config) => r?,
        };
        let banner_text = established.banner.text();
        let control = Arc::new(ControlChannel::new(
            established,
            self.config.clone(),
            self.cancel.child_token(),
        ));
        {
            let mut state = self.state();
            state.control = Some(Arc::clone(&control));
            state.authenticated = false;
            state.server_banner = Some(banner_text);
            state.connected_at = Utc::now();
            state.features.clear();
            state.working_directory = "/".to_string();
        }
        log::info!(
            "connected to {} ({})",
            self.config.effective_host(),
            control.peer()
        );

        // USER, then PASS unless the server logged us straight in.
        let user = FtpCommand::with_arg("USER", self.config.effective_username());
        let reply = self.send(&control, &user).await?;
        match reply.code {
            code::LOGGED_IN => {}
            code::NEED_PASSWORD | code::NEED_ACCOUNT => {
                let pass = FtpCommand::with_arg("PASS", self.config.password.clone());
                let reply = self.send(&control, &pass).await?;
                if !matches!(reply.code, code::LOGGED_IN | code::COMMAND_SUPERFLUOUS) {
                    return Err(FtpError::auth_failed(format!(
                        "login failed: {}",
                        reply.message
                    ))
                    .with_code(reply.code));
                }
            }
            _ => {
                return Err(FtpError::auth_failed(format!(
                    "USER rejected: {}",
                    reply.message
                ))
                .with_code(reply.code));
            }
        }
        self.state().authenticated = true;

        // Data-channel protection, best effort (RFC 4217).
        if control.is_encrypted() {
            for (verb, arg) in [("PBSZ", "0"), ("PROT", "P")] {
                let reply = self
                    .send(&control, &FtpCommand::with_arg(verb, arg))
                    .await?;
                if !reply.is_success() {
                    log::warn!("{} {} refused: {} {}", verb, arg, reply.code, reply.message);
                }
            }
        }

        // FEAT. A server without it just leaves the feature set empty.
        let reply = self.send(&control, &FtpCommand::new("FEAT")).await?;
        let features: HashSet<String> = if reply.is_success() {
            protocol::parse_feats(&reply)
                .into_iter()
                .map(|f| f.to_ascii_uppercase())
                .collect()
        } else {
            HashSet::new()
        };
        let strategy = if features.contains("MLSD") {
            ListingStrategy::Mlsd
        } else {
            ListingStrategy::List
        };
        {
            let mut state = self.state();
            state.features = features;
            state.listing_strategy = strategy;
        }

        if self.has_feature("CLNT") {
            let clnt = FtpCommand::with_arg(
                "CLNT",
                format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            );
            let _ = self.send(&control, &clnt).await;
        }

        // One-way encoding upgrade.
        if control.encoding() == Encoding::Ascii && self.has_feature("UTF8") {
            control.enable_utf8();
            let opts = FtpCommand::with_arg("OPTS", "UTF8 ON");
            let reply = self.send(&control, &opts).await?;
            if !reply.is_completion() {
                log::warn!("OPTS UTF8 ON refused: {} {}", reply.code, reply.message);
            }
        }

        // TYPE must be accepted.
        let type_arg = match self.config.mode_second_type {
            Some(second) => format!("{} {}", self.config.transfer_mode.type_char(), second),
            None => self.config.transfer_mode.type_char().to_string(),
        };
        let reply = self
            .send(&control, &FtpCommand::with_arg("TYPE", type_arg))
            .await?;
        if reply.code != code::COMMAND_OK {
            return Err(FtpError::command_rejected(
                reply.code,
                format!("TYPE rejected: {}", reply.message),
            ));
        }

        // Root the session in the configured base directory.
        let base = self.config.normalized_base_directory();
        if base != "/" {
            self.create_directory(&base).await?;
        }
        self.change_directory(&base).await?;

        log::info!("logged in as {}", self.config.effective_username());
        Ok(())
    }

    /// Send QUIT best-effort and drop the connection. Idempotent.
    pub async fn logout(&self) {
        if let Some(control) = self.control() {
            if control.connected_flag() {
                let _ = control.send_and_read(&FtpCommand::new("QUIT")).await;
            }
            control.disconnect().await;
        }
        self.mark_disconnected();
    }

    // ─── Working directory ───────────────────────────────────────

    /// CWD then PWD; the cache is only ever set from a parsed 257 reply.
    pub async fn change_directory(&self, path: &str) -> FtpResult<String> {
        validate_path(path)?;
        let control = self.ensure_authenticated()?;

        let reply = self
            .send(&control, &FtpCommand::with_arg("CWD", path))
            .await?;
        if reply.code != code::FILE_ACTION_OK {
            return Err(FtpError::command_rejected(
                reply.code,
                format!("CWD {} rejected: {}", path, reply.message),
            ));
        }

        let mut wd = self
            .send_typed(&control, &FtpCommand::new("PWD"), |reply| {
                Self::require_success("PWD", reply)?;
                protocol::parse_pwd(reply)
            })
            .await?;
        if !wd.starts_with('/') {
            wd.insert(0, '/');
        }
        self.state().working_directory = wd.clone();
        Ok(wd)
    }

    // ─── Directory creation ──────────────────────────────────────

    /// Create `path` and every missing ancestor, probing each segment
    /// with CWD and creating on 550. The working directory is restored
    /// afterwards.
    pub async fn create_directory(&self, path: &str) -> FtpResult<()> {
        validate_path(path)?;
        let control = self.ensure_authenticated()?;
        let original = self.working_directory();

        let walk = self.walk_and_create(&control, path).await;

        // Best effort on the error path; the happy path must land back
        // where it started.
        let restore = self
            .send(&control, &FtpCommand::with_arg("CWD", original))
            .await;
        walk?;
        Self::require_success("CWD", &restore?)?;
        Ok(())
    }

    async fn walk_and_create(&self, control: &ControlChannel, path: &str) -> FtpResult<()> {
        if path.starts_with('/') {
            let reply = self.send(control, &FtpCommand::with_arg("CWD", "/")).await?;
            Self::require_success("CWD", &reply)?;
        }

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let reply = self
                .send(control, &FtpCommand::with_arg("CWD", segment))
                .await?;
            if reply.code == code::FILE_UNAVAILABLE {
                let reply = self
                    .send(control, &FtpCommand::with_arg("MKD", segment))
                    .await?;
                Self::require_success("MKD", &reply)?;
                let reply = self
                    .send(control, &FtpCommand::with_arg("CWD", segment))
                    .await?;
                Self::require_success("CWD", &reply)?;
            }
            // Any other code: keep walking.
        }
        Ok(())
    }

    // ─── Namespace operations ────────────────────────────────────

    pub async fn delete_file(&self, path: &str) -> FtpResult<()> {
        validate_path(path)?;
        let control = self.ensure_authenticated()?;
        let reply = self
            .send(&control, &FtpCommand::with_arg("DELE", path))
            .await?;
        Self::require_success("DELE", &reply)
    }

    /// RMD, falling back to a recursive delete when the server answers
    /// 550 for a non-empty directory.
    pub async fn remove_directory(&self, path: &str) -> FtpResult<()> {
        validate_path(path)?;
        self.ensure_authenticated()?;
        self.remove_directory_inner(path).await
    }

    async fn remove_directory_inner(&self, path: &str) -> FtpResult<()> {
        let control = self.ensure_authenticated()?;
        let reply = self
            .send(&control, &FtpCommand::with_arg("RMD", path))
            .await?;
        match reply.code {
            code::FILE_ACTION_OK | code::COMMAND_OK => return Ok(()),
            code::FILE_UNAVAILABLE => {}
            other => {
                return Err(FtpError::command_rejected(
                    other,
                    format!("RMD {} rejected: {}", path, reply.message),
                ))
            }
        }

        // Non-empty: descend, clear it out, come back up, remove.
        let reply = self
            .send(&control, &FtpCommand::with_arg("CWD", path))
            .await?;
        Self::require_success("CWD", &reply)?;

        let nodes = self.collect_nodes(None).await?;
        for node in nodes {
            match node.kind {
                crate::ftp::types::NodeKind::Directory => {
                    Box::pin(self.remove_directory_inner(&node.name)).await?;
                }
                _ => {
                    let reply = self
                        .send(&control, &FtpCommand::with_arg("DELE", node.name.clone()))
                        .await?;
                    Self::require_success("DELE", &reply)?;
                }
            }
        }

        let reply = self
            .send(&control, &FtpCommand::with_arg("CWD", ".."))
            .await?;
        Self::require_success("CWD", &reply)?;

        let reply = self
            .send(&control, &FtpCommand::with_arg("RMD", path))
            .await?;
        Self::require_success("RMD", &reply)
    }

    /// RNFR must yield 350, RNTO 250 or 226.
    pub async fn rename(&self, from: &str, to: &str) -> FtpResult<()> {
        validate_path(from)?;
        validate_path(to)?;
        let control = self.ensure_authenticated()?;

        let reply = self
            .send(&control, &FtpCommand::with_arg("RNFR", from))
            .await?;
        if reply.code != code::FILE_COMMAND_PENDING {
            return Err(FtpError::command_rejected(
                reply.code,
                format!("RNFR {} rejected: {}", from, reply.message),
            ));
        }

        let reply = self
            .send(&control, &FtpCommand::with_arg("RNTO", to))
            .await?;
        if !matches!(reply.code, code::FILE_ACTION_OK | code::CLOSING_DATA) {
            return Err(FtpError::command_rejected(
                reply.code,
                format!("RNTO {} rejected: {}", to, reply.message),
            ));
        }
        Ok(())
    }

    /// SIZE: a 213 reply whose message leads with the byte count.
    pub async fn size(&self, path: &str) -> FtpResult<u64> {
        validate_path(path)?;
        let control = self.ensure_authenticated()?;
        let reply = self
            .send(&control, &FtpCommand::with_arg("SIZE", path))
            .await?;
        if reply.code != code::FILE_STATUS {
            return Err(FtpError::command_rejected(
                reply.code,
                format!("SIZE {} rejected: {}", path, reply.message),
            ));
        }
        reply
            .message
            .split_whitespace()
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| {
                FtpError::protocol_parse(format!("cannot parse SIZE reply: {}", reply.message))
            })
    }

    /// MDTM: a 213 reply carrying an RFC 3659 timestamp.
    pub async fn modified_time(&self, path: &str) -> FtpResult<DateTime<Utc>> {
        validate_path(path)?;
        let control = self.ensure_authenticated()?;
        let reply = self
            .send(&control, &FtpCommand::with_arg("MDTM", path))
            .await?;
        if reply.code != code::FILE_STATUS {
            return Err(FtpError::command_rejected(
                reply.code,
                format!("MDTM {} rejected: {}", path, reply.message),
            ));
        }
        parser::parse_mlsd_time(reply.message.trim()).ok_or_else(|| {
            FtpError::protocol_parse(format!("cannot parse MDTM reply: {}", reply.message))
        })
    }

    /// Keep-alive.
    pub async fn noop(&self) -> FtpResult<()> {
        let control = self.ensure_authenticated()?;
        let reply = self.send(&control, &FtpCommand::new("NOOP")).await?;
        Self::require_success("NOOP", &reply)
    }

    // ─── Transfers ───────────────────────────────────────────────

    /// RETR: the returned transfer is read to EOF, then finished.
    pub async fn open_read(&self, path: &str) -> FtpResult<DataTransfer> {
        validate_path(path)?;
        self.open_transfer("RETR", Some(path)).await
    }

    /// STOR into `working_directory`-relative `name`, creating missing
    /// intermediate directories first.
    pub async fn open_write(&self, name: &str) -> FtpResult<DataTransfer> {
        validate_path(name)?;
        self.ensure_authenticated()?;

        let target = join_paths(&self.working_directory(), name);
        if let Some(pos) = target.rfind('/') {
            let parent = &target[..pos];
            if !parent.is_empty() && parent != "/" {
                self.create_directory(parent).await?;
            }
        }

        self.open_transfer("STOR", Some(&target)).await
    }

    /// Acquire the data-channel permit, get a passive endpoint, dial it,
    /// and issue the transfer command.
    pub(crate) async fn open_transfer(
        &self,
        verb: &str,
        arg: Option<&str>,
    ) -> FtpResult<DataTransfer> {
        let control = self.ensure_authenticated()?;

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FtpError::cancelled()),
            permit = Arc::clone(&self.data_guard).acquire_owned() => {
                permit.map_err(|_| FtpError::cancelled())?
            }
        };

        let addr = self.passive_endpoint(&control).await?;
        let stream = control.open_data_stream(addr).await?;

        let cmd = match arg {
            Some(arg) => FtpCommand::with_arg(verb, arg),
            None => FtpCommand::new(verb),
        };
        let reply = self.send(&control, &cmd).await?;
        if !matches!(
            reply.code,
            code::DATA_ALREADY_OPEN | code::OPENING_DATA | code::CLOSING_DATA
        ) {
            return Err(FtpError::command_rejected(
                reply.code,
                format!("{} rejected: {}", verb, reply.message),
            ));
        }

        Ok(DataTransfer::new(stream, control, permit))
    }

    /// EPSV first, PASV as the fallback; with both refused the session
    /// is closed and the transfer fails with `NoDataPort`.
    async fn passive_endpoint(&self, control: &Arc<ControlChannel>) -> FtpResult<SocketAddr> {
        let reply = self.send(control, &FtpCommand::new("EPSV")).await?;
        if reply.code == code::ENTERING_EXTENDED_PASSIVE {
            if let Ok(port) = protocol::parse_epsv(&reply) {
                return Ok(SocketAddr::new(control.peer().ip(), port));
            }
        }

        let reply = self.send(control, &FtpCommand::new("PASV")).await?;
        if reply.code == code::ENTERING_PASSIVE {
            if let Ok(addr) = protocol::parse_pasv(&reply) {
                return Ok(addr);
            }
        }

        log::error!("no passive data port: EPSV and PASV both failed");
        control.disconnect().await;
        self.mark_disconnected();
        Err(FtpError::no_data_port())
    }

    // ─── Snapshot ────────────────────────────────────────────────

    pub fn session_info(&self) -> FtpSessionInfo {
        let state = self.state();
        let control = state.control.clone();
        let mut features: Vec<String> = state.features.iter().cloned().collect();
        features.sort();

        FtpSessionInfo {
            id: self.id.clone(),
            host: self.config.effective_host().to_string(),
            port: self.config.effective_port(),
            username: self.config.effective_username().to_string(),
            security: self.config.security,
            connected: control
                .as_ref()
                .map(|c| c.connected_flag())
                .unwrap_or(false),
            authenticated: state.authenticated,
            encrypted: control.as_ref().map(|c| c.is_encrypted()).unwrap_or(false),
            working_directory: state.working_directory.clone(),
            server_banner: state.server_banner.clone(),
            features,
            encoding: control
                .as_ref()
                .map(|c| c.encoding())
                .unwrap_or(Encoding::Ascii),
            listing_strategy: state.listing_strategy,
            connected_at: state.connected_at,
            last_activity: control
                .as_ref()
                .map(|c| c.last_activity())
                .unwrap_or(state.connected_at),
            transfer_mode: self.config.transfer_mode,
            bytes_uploaded: state.bytes_uploaded,
            bytes_downloaded: state.bytes_downloaded,
        }
    }
}

impl Drop for FtpSession {
    fn drop(&mut self) {
        // Wake anything still parked on the token.
        self.cancel.cancel();
    }
}

// ─── Path helpers ────────────────────────────────────────────────────

fn validate_path(path: &str) -> FtpResult<()> {
    if path.is_empty() || path == "." {
        Err(FtpError::invalid_argument(format!(
            "invalid path: {:?}",
            path
        )))
    } else {
        Ok(())
    }
}

/// URI-style concatenation: right-trim `/` from the left side, left-trim
/// `/` from the right, join with a single `/`.
pub(crate) fn join_paths(left: &str, right: &str) -> String {
    format!(
        "{}/{}",
        left.trim_end_matches('/'),
        right.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_paths_uri_style() {
        assert_eq!(join_paths("/", "file.txt"), "/file.txt");
        assert_eq!(join_paths("/base/", "/sub/f"), "/base/sub/f");
        assert_eq!(join_paths("/base", "f"), "/base/f");
    }

    #[test]
    fn empty_and_dot_paths_are_rejected() {
        assert!(validate_path("").is_err());
        assert!(validate_path(".").is_err());
        assert!(validate_path("ok").is_ok());
    }

    #[test]
    fn session_requires_a_host() {
        assert!(FtpSession::new(FtpSessionConfig::default()).is_err());
    }

    #[tokio::test]
    async fn operations_require_login() {
        let session = FtpSession::new(FtpSessionConfig {
            host: "ftp.example.com".into(),
            ..Default::default()
        })
        .unwrap();
        let err = session.noop().await.unwrap_err();
        assert_eq!(err.kind, crate::ftp::error::FtpErrorKind::NotLoggedIn);
    }
}
