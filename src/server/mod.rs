//! SSH transport glue: the `russh::server::Handler` implementation that wires the VFS,
//! shell emulator, session recorder, throttle and SFTP subsystem together, plus the
//! bounded accept loop (SPEC_FULL §4.8, §4.9, §5).
//!
//! Grounded on the teacher's `src/lib.rs` `handle_forever`/`process_socket` split: a thin
//! "accept, hand off" loop here is kept separate from per-connection state, which now
//! lives in [`HoneypotHandler`] instead of the teacher's per-socket task trio. The accept
//! loop intentionally does not use `russh::server::run`, which spawns one unbounded task
//! per accepted connection -- that is exactly the per-connection-goroutine idiom SPEC_FULL
//! §4.8 asks us to replace with a fixed worker pool, so the loop is rebuilt on top of
//! [`pool::Pool`] and russh's lower-level per-stream entry point instead.

pub mod pool;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use russh::server::{self, Auth, Msg};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use whirlwind::ConcurrentHashMap;

use crate::archive::Index;
use crate::config::Config;
use crate::identity::Identities;
use crate::session::linedisc::LineEvent;
use crate::session::recorder::{LogFormat, Recorder};
use crate::session::throttle::Throttle;
use crate::session::{DelayParams, Session as ShellSession, User, WindowSize};
use crate::shell::Catalogue;
use crate::vfs::{OverlayVfs, Vfs};

/// Process-wide, read-mostly state built once at startup and handed to every connection
/// (SPEC_FULL §5 "no locking is required on the hot path").
pub struct Shared {
    pub config: Arc<Config>,
    pub index: Arc<Index>,
    pub identities: Arc<Identities>,
    pub catalogue: Arc<Catalogue>,
    /// Live-session registry, keyed by session id, so the admission bound and the
    /// connection count it describes can be inspected from outside the accept loop.
    sessions: ConcurrentHashMap<u64, SocketAddr>,
    next_session_id: AtomicU64,
}

impl Shared {
    pub fn new(config: Config, index: Index, identities: Identities, catalogue: Catalogue) -> Shared {
        Shared {
            config: Arc::new(config),
            index: Arc::new(index),
            identities: Arc::new(identities),
            catalogue: Arc::new(catalogue),
            sessions: ConcurrentHashMap::new(),
            next_session_id: AtomicU64::new(1),
        }
    }
}

#[derive(Debug)]
pub struct ServerError(russh::Error);

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ServerError {}

impl From<russh::Error> for ServerError {
    fn from(err: russh::Error) -> ServerError {
        ServerError(err)
    }
}

enum ChannelMode {
    Shell,
    Sftp(crate::sftp::Server),
}

/// Per-channel state: one `ChannelState` per opened session channel, never shared between
/// channels or connections (SPEC_FULL §5 "each session owns its state exclusively").
struct ChannelState {
    vfs: Arc<dyn Vfs>,
    shell: ShellSession,
    throttle: Arc<Throttle>,
    mode: ChannelMode,
    /// Accumulates partial SFTP wire frames across `data()` calls until a full
    /// length-prefixed packet is available.
    sftp_inbuf: Vec<u8>,
    /// The idle-timeout watchdog spawned alongside this channel (see
    /// [`spawn_idle_watchdog`]); aborted once the channel's state is dropped so it never
    /// outlives the session it watches.
    watchdog: tokio::task::JoinHandle<()>,
}

impl Drop for ChannelState {
    fn drop(&mut self) {
        self.watchdog.abort();
    }
}

/// Races a session's idle deadline against its own activity: wakes whenever the deadline
/// (pushed out by every `Throttle::touch()`) elapses, and if it is still expired once woken
/// -- i.e. nothing touched it in the meantime -- closes the channel and records
/// `idle-timeout` (SPEC_FULL §4.7, §7, scenario S6). Runs as a task alongside the channel's
/// own event-driven callbacks, since those only fire on incoming traffic and can't detect
/// its absence themselves.
fn spawn_idle_watchdog(
    handle: server::Handle,
    channel: ChannelId,
    throttle: Arc<Throttle>,
    recorder: Arc<Mutex<Recorder>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let deadline = throttle.deadline();
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
            if !throttle.is_expired() {
                continue;
            }
            recorder.lock().unwrap().record_disconnect("idle-timeout");
            warn!(?channel, "idle timeout, closing channel");
            let _ = handle.close(channel).await;
            break;
        }
    })
}

/// One `HoneypotHandler` per accepted TCP connection. Holds every channel opened on that
/// connection, keyed by `ChannelId` -- a connection may multiplex more than one channel,
/// though this honeypot only ever expects the attacker to open one.
pub struct HoneypotHandler {
    shared: Arc<Shared>,
    peer_addr: Option<SocketAddr>,
    session_id: u64,
    username: Option<String>,
    pending_password: Option<String>,
    auth_tries: u32,
    channels: HashMap<ChannelId, ChannelState>,
}

fn hash_addr(addr: SocketAddr) -> u32 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    addr.ip().hash(&mut hasher);
    hasher.finish() as u32
}

fn prompt(shell: &ShellSession) -> String {
    let marker = if shell.user.uid == 0 { '#' } else { '$' };
    let home_prefix = format!("{}/", shell.user.home);
    let display_cwd = if shell.cwd == shell.user.home {
        "~".to_string()
    } else if let Some(rest) = shell.cwd.strip_prefix(&home_prefix) {
        format!("~/{rest}")
    } else {
        shell.cwd.clone()
    };
    format!("{}@{}:{}{} ", shell.user.name, shell.hostname, display_cwd, marker)
}

/// Sends `bytes` to `channel` one throttle-granted slice at a time, mirroring each slice
/// into the session recorder before the channel write itself (SPEC_FULL §9 "coroutine-free
/// transcripts": the recorder write happens on the same synchronous path as the channel
/// write, so ordering needs no extra bookkeeping).
async fn send(state: &mut ChannelState, channel: ChannelId, session: &mut server::Session, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    let mut offset = 0;
    while offset < bytes.len() {
        let granted = state.throttle.throttle_write(bytes.len() - offset).await;
        if granted == 0 {
            continue;
        }
        let chunk = &bytes[offset..offset + granted];
        state.shell.recorder.lock().unwrap().record_output(chunk);
        let _ = session.data(channel, CryptoVec::from(chunk.to_vec()));
        offset += granted;
    }
}

/// Admits the whole of `data` through `throttle`, blocking across successive token grants
/// rather than dropping whatever didn't fit in the first grant (SPEC_FULL §4.7: "excess
/// reads/writes block until tokens are available"). Mirrors `send`'s loop on the write side.
async fn admit_read(throttle: &Throttle, data: &[u8]) -> Vec<u8> {
    let mut admitted = Vec::with_capacity(data.len());
    let mut offset = 0;
    while offset < data.len() {
        let granted = throttle.throttle_read(data.len() - offset).await;
        if granted == 0 {
            continue;
        }
        admitted.extend_from_slice(&data[offset..offset + granted]);
        offset += granted;
    }
    admitted
}

impl HoneypotHandler {
    fn session_save_dir(&self) -> PathBuf {
        let hash = self.peer_addr.map(hash_addr).unwrap_or(0);
        self.shared.config.save_dir.join(format!("{:016x}-{hash:08x}", self.session_id))
    }
}

#[async_trait]
impl server::Handler for HoneypotHandler {
    type Error = ServerError;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        self.auth_tries += 1;
        if self.shared.config.allow_random_user {
            info!(user, password, auth_method = "password", "authentication accepted");
            self.username = Some(user.to_string());
            self.pending_password = Some(password.to_string());
            return Ok(Auth::Accept);
        }
        warn!(user, auth_method = "password", attempt = self.auth_tries, "authentication rejected");
        if self.auth_tries >= self.shared.config.max_auth_tries {
            return Ok(Auth::Reject { proceed_with_methods: None });
        }
        Ok(Auth::Reject { proceed_with_methods: None })
    }

    async fn channel_open_session(&mut self, channel: Channel<Msg>, session: &mut server::Session) -> Result<bool, Self::Error> {
        let channel_id = channel.id();
        let username = self.username.clone().unwrap_or_else(|| "root".to_string());
        let user = User { name: username.clone(), uid: 0, gid: 0, home: "/root".to_string(), shell: "/bin/bash".to_string() };

        let save_dir = self.session_save_dir();
        let vfs: Arc<dyn Vfs> = Arc::new(OverlayVfs::new(self.shared.index.clone(), Some(save_dir)));

        let format = LogFormat::parse(&self.shared.config.session_log_format);
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        let log_path = PathBuf::from("logs/sessions").join(format!("{timestamp}-{:016x}.cast", self.session_id));
        let mut recorder = match Recorder::open(&log_path, format, 80, 24) {
            Ok(recorder) => recorder,
            Err(err) => {
                warn!(path = %log_path.display(), error = %err, "cannot open session transcript, recording disabled");
                Recorder::discard()
            }
        };
        if let Some(password) = self.pending_password.take() {
            recorder.record_login(&username, &password);
        }
        recorder.record_channel_open();
        let recorder = Arc::new(Mutex::new(recorder));

        let delay = if self.shared.config.process_delay_ms < 0 {
            DelayParams::disabled()
        } else {
            DelayParams { base_ms: self.shared.config.process_delay_ms, jitter_ms: (self.shared.config.process_delay_ms / 4).max(1) }
        };

        let local_channel_id = self.channels.len() as u32 + 1;
        let shell = ShellSession::new(local_channel_id, user, self.shared.config.hostname.clone(), recorder.clone(), delay);
        let throttle = Arc::new(Throttle::new(self.shared.config.speed, self.shared.config.idle_timeout()));

        let watchdog = spawn_idle_watchdog(session.handle(), channel_id, throttle.clone(), recorder);

        self.channels.insert(
            channel_id,
            ChannelState { vfs, shell, throttle, mode: ChannelMode::Shell, sftp_inbuf: Vec::new(), watchdog },
        );
        if let Some(addr) = self.peer_addr {
            self.shared.sessions.insert(self.session_id, addr).await;
        }
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut server::Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get_mut(&channel) {
            state.shell.window = WindowSize { rows: row_height as u16, cols: col_width as u16 };
            state.shell.recorder.lock().unwrap().record_resize(row_height as u16, col_width as u16);
        }
        session.channel_success(channel);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut server::Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get_mut(&channel) {
            state.shell.window = WindowSize { rows: row_height as u16, cols: col_width as u16 };
            state.shell.recorder.lock().unwrap().record_resize(row_height as u16, col_width as u16);
        }
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut server::Session) -> Result<(), Self::Error> {
        let Some(state) = self.channels.get_mut(&channel) else { return Ok(()) };
        state.mode = ChannelMode::Shell;
        let banner = b"Last login: Thu Jan  1 00:00:00 1970 from 127.0.0.1\r\n";
        send(state, channel, session, banner).await;
        let line = prompt(&state.shell);
        send(state, channel, session, line.as_bytes()).await;
        session.channel_success(channel);
        Ok(())
    }

    async fn exec_request(&mut self, channel: ChannelId, data: &[u8], session: &mut server::Session) -> Result<(), Self::Error> {
        let Some(state) = self.channels.get_mut(&channel) else { return Ok(()) };
        let line = String::from_utf8_lossy(data).into_owned();
        state.shell.recorder.lock().unwrap().record_command(&line);
        let outcome = crate::shell::execute(&line, &self.shared.catalogue, &mut state.shell, state.vfs.as_ref()).await;
        let (output, status) = match outcome {
            Ok(result) => (result.output, result.exit_status),
            Err(_) => (b"bash: syntax error\n".to_vec(), 2),
        };
        send(state, channel, session, &output).await;
        session.exit_status_request(channel, status as u32);
        session.close(channel);
        Ok(())
    }

    async fn subsystem_request(&mut self, channel: ChannelId, name: &str, session: &mut server::Session) -> Result<(), Self::Error> {
        if name != "sftp" {
            session.channel_failure(channel);
            return Ok(());
        }
        let save_dir = self.session_save_dir();
        if let Some(state) = self.channels.get_mut(&channel) {
            let cwd = state.shell.cwd.clone();
            state.mode = ChannelMode::Sftp(crate::sftp::Server::new(state.vfs.clone(), cwd, Some(save_dir)));
            session.channel_success(channel);
        } else {
            session.channel_failure(channel);
        }
        Ok(())
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], session: &mut server::Session) -> Result<(), Self::Error> {
        let Some(state) = self.channels.get_mut(&channel) else { return Ok(()) };
        state.throttle.touch();
        let data = admit_read(&state.throttle, data).await;
        let data = data.as_slice();

        if matches!(state.mode, ChannelMode::Sftp(_)) {
            state.sftp_inbuf.extend_from_slice(data);
            loop {
                if state.sftp_inbuf.len() < 4 {
                    break;
                }
                let len = u32::from_be_bytes(state.sftp_inbuf[0..4].try_into().unwrap()) as usize;
                if state.sftp_inbuf.len() < 4 + len {
                    break;
                }
                let payload: Vec<u8> = state.sftp_inbuf[4..4 + len].to_vec();
                state.sftp_inbuf.drain(0..4 + len);
                let Some(request) = crate::sftp::wire::decode(&payload) else { continue };
                let reply = match &mut state.mode {
                    ChannelMode::Sftp(sftp_server) => sftp_server.handle(request).await,
                    ChannelMode::Shell => break,
                };
                send(state, channel, session, &reply).await;
            }
            return Ok(());
        }

        for &byte in data {
            let (echo, event) = state.shell.linedisc.feed(byte);
            if !echo.is_empty() {
                send(state, channel, session, &echo).await;
            }
            match event {
                Some(LineEvent::Ready(line)) => {
                    if !line.trim().is_empty() {
                        state.shell.push_command_history(line.clone());
                        state.shell.recorder.lock().unwrap().record_command(&line);
                        let outcome = crate::shell::execute(&line, &self.shared.catalogue, &mut state.shell, state.vfs.as_ref()).await;
                        if let Ok(result) = outcome {
                            send(state, channel, session, &result.output).await;
                        }
                    }
                    if let Some(status) = state.shell.should_exit {
                        send(state, channel, session, b"logout\r\n").await;
                        session.exit_status_request(channel, status as u32);
                        session.close(channel);
                        return Ok(());
                    }
                    let line = prompt(&state.shell);
                    send(state, channel, session, line.as_bytes()).await;
                }
                Some(LineEvent::CtrlC) => {
                    let line = prompt(&state.shell);
                    send(state, channel, session, line.as_bytes()).await;
                }
                Some(LineEvent::EndOfSession) => {
                    send(state, channel, session, b"logout\r\n").await;
                    session.exit_status_request(channel, 0);
                    session.close(channel);
                    return Ok(());
                }
                None => {}
            }
        }
        Ok(())
    }
}

/// Owns the listener and the admission pool; `serve` is the accept loop's entry point.
pub struct Honeypot {
    shared: Arc<Shared>,
}

impl Honeypot {
    pub fn new(shared: Arc<Shared>) -> Arc<Honeypot> {
        Arc::new(Honeypot { shared })
    }

    fn new_handler(&self, peer_addr: Option<SocketAddr>) -> HoneypotHandler {
        let session_id = self.shared.next_session_id.fetch_add(1, Ordering::Relaxed);
        HoneypotHandler {
            shared: self.shared.clone(),
            peer_addr,
            session_id,
            username: None,
            pending_password: None,
            auth_tries: 0,
            channels: HashMap::new(),
        }
    }

    /// Binds `config.listen` and runs the accept loop: each accepted socket is admitted
    /// into a fixed pool of `config.max_connections` workers (SPEC_FULL §4.8). Accept
    /// errors are logged and the loop continues; they never abort the server.
    pub async fn serve(self: Arc<Honeypot>, russh_config: Arc<server::Config>) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.shared.config.listen).await?;
        info!(addr = %self.shared.config.listen, "listening for SSH connections");

        let admission: Arc<pool::Pool<(TcpStream, SocketAddr)>> = Arc::new(pool::Pool::new(self.shared.config.max_connections));
        let honeypot = self.clone();
        admission.spawn_workers(self.shared.config.max_connections, move |(stream, addr)| {
            let honeypot = honeypot.clone();
            let russh_config = russh_config.clone();
            async move {
                let handler = honeypot.new_handler(Some(addr));
                if let Err(err) = server::run_stream(russh_config, stream, handler).await {
                    warn!(%addr, error = %err, "session ended with an error");
                }
            }
        });

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err((stream, _)) = admission.admit((stream, addr)).await {
                        drop(stream);
                    }
                }
                Err(err) => {
                    warn!(error = %err, "accept failed, continuing");
                }
            }
        }
    }
}
