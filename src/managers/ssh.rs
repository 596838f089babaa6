use crate::constants::limits::MAX_CAPTURE_BYTES;
use crate::constants::network::{KEEPALIVE_INTERVAL_MS, TIMEOUT_SSH_CLOSE_GRACE_MS};
use crate::errors::{OpError, OpErrorKind};
use crate::services::inventory::{HostAuth, HostInventory, HostRecord};
use crate::services::logger::Logger;
use crate::services::remote::{CommandOutput, RemoteExecutor};
use crate::services::settings::Settings;
use crate::utils::paths::expand_home;
use crate::utils::remote_path;
use crate::utils::shell::RemoteCommand;
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use dashmap::DashMap;
use ssh2::{ErrorCode, Session};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// libssh2 session error codes (LIBSSH2_ERROR_*).
const LIBSSH2_ERROR_SOCKET_NONE: i32 = -1;
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_CHANNEL_CLOSED: i32 = -26;
const LIBSSH2_ERROR_SOCKET_TIMEOUT: i32 = -30;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

type PooledSession = Arc<Mutex<Session>>;

/// [`RemoteExecutor`] over SSH. One pooled session per host; a session that
/// reports a dead socket is dropped from the pool so the next call opens a
/// fresh one.
#[derive(Clone)]
pub struct SshExecutor {
    logger: Logger,
    inventory: Arc<dyn HostInventory>,
    pool: Arc<DashMap<String, PooledSession>>,
    exec_timeout_ms: u64,
    connect_timeout_ms: u64,
}

impl SshExecutor {
    pub fn new(logger: Logger, inventory: Arc<dyn HostInventory>, settings: &Settings) -> Self {
        Self {
            logger: logger.child("ssh"),
            inventory,
            pool: Arc::new(DashMap::new()),
            exec_timeout_ms: settings.exec_timeout_ms,
            connect_timeout_ms: settings.connect_timeout_ms,
        }
    }

    pub fn pooled_hosts(&self) -> usize {
        self.pool.len()
    }

    async fn session_for(&self, host: &str) -> Result<PooledSession, OpError> {
        if let Some(session) = self.pool.get(host) {
            return Ok(session.value().clone());
        }
        let record = self.inventory.host(host).await?;
        let timeout_ms = self.connect_timeout_ms;
        self.logger.info(
            "Opening SSH session",
            Some(&serde_json::json!({"host": host, "address": record.address})),
        );
        let session = tokio::task::spawn_blocking(move || connect_session(&record, timeout_ms))
            .await
            .map_err(|_| OpError::internal("SSH connect task failed"))??;
        let pooled = Arc::new(Mutex::new(session));
        self.pool.insert(host.to_string(), pooled.clone());
        Ok(pooled)
    }

    fn forget_if_dead(&self, host: &str, err: &OpError) {
        if err.kind == OpErrorKind::ChannelDead && self.pool.remove(host).is_some() {
            self.logger.error(
                "SSH channel lost, session dropped",
                Some(&serde_json::json!({"host": host, "error": err.message})),
            );
        }
    }

    async fn with_session<T, F>(&self, host: &str, work: F) -> Result<T, OpError>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T, OpError> + Send + 'static,
    {
        let pooled = self.session_for(host).await?;
        let result = tokio::task::spawn_blocking(move || {
            let session = pooled.lock().unwrap_or_else(|err| err.into_inner());
            work(&*session)
        })
        .await
        .map_err(|_| OpError::internal("SSH task failed"))?;
        if let Err(err) = &result {
            self.forget_if_dead(host, err);
        }
        result
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, command: &RemoteCommand) -> Result<CommandOutput, OpError> {
        let rendered = command.render();
        self.logger.debug(
            "exec",
            Some(&serde_json::json!({"host": host, "command": rendered})),
        );
        let timeout_ms = self.exec_timeout_ms;
        let started = Instant::now();
        let output = self
            .with_session(host, move |session| {
                exec_blocking(session, &rendered, timeout_ms)
            })
            .await?;
        self.logger.debug(
            "exec finished",
            Some(&serde_json::json!({
                "host": host,
                "exit_status": output.exit_status,
                "duration_ms": started.elapsed().as_millis() as u64,
            })),
        );
        Ok(output)
    }

    async fn upload(&self, host: &str, remote_path: &str, data: Bytes) -> Result<(), OpError> {
        let target = remote_path.to_string();
        let size = data.len();
        self.with_session(host, move |session| {
            let sftp = session.sftp().map_err(map_ssh_error)?;
            ensure_remote_dir(&sftp, &target)?;
            let mut file = sftp.create(Path::new(&target)).map_err(map_ssh_error)?;
            file.write_all(&data).map_err(OpError::from)?;
            Ok(())
        })
        .await?;
        self.logger.info(
            "Uploaded file",
            Some(&serde_json::json!({"host": host, "path": remote_path, "bytes": size})),
        );
        Ok(())
    }

    async fn download(&self, host: &str, remote_path: &str) -> Result<Bytes, OpError> {
        let source = remote_path.to_string();
        self.with_session(host, move |session| {
            let sftp = session.sftp().map_err(map_ssh_error)?;
            let mut file = sftp.open(Path::new(&source)).map_err(map_ssh_error)?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).map_err(OpError::from)?;
            Ok(Bytes::from(buf))
        })
        .await
    }
}

fn fingerprint_host_key_sha256(session: &Session) -> Option<String> {
    let hash = session.host_key_hash(ssh2::HashType::Sha256)?;
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    Some(format!("SHA256:{}", encoded))
}

fn connect_session(host: &HostRecord, timeout_ms: u64) -> Result<Session, OpError> {
    let addr = (host.address.as_str(), host.port)
        .to_socket_addrs()
        .map_err(|err| {
            OpError::channel_dead(format!("Cannot resolve {}: {}", host.address, err))
        })?
        .next()
        .ok_or_else(|| OpError::channel_dead(format!("No address for {}", host.address)))?;
    let tcp = TcpStream::connect_timeout(&addr, Duration::from_millis(timeout_ms)).map_err(
        |err| {
            OpError::channel_dead(format!("Failed to connect to {}: {}", host.display_name(), err))
                .with_hint("Check that the host is reachable and sshd is running.")
        },
    )?;
    tcp.set_read_timeout(Some(Duration::from_millis(timeout_ms))).ok();
    tcp.set_write_timeout(Some(Duration::from_millis(timeout_ms))).ok();

    let mut session =
        Session::new().map_err(|_| OpError::internal("Failed to create SSH session"))?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(map_ssh_error)?;

    if let Some(expected) = host.host_key_sha256.as_ref() {
        let observed = fingerprint_host_key_sha256(&session);
        if observed.as_ref() != Some(expected) {
            return Err(OpError::validation(format!(
                "SSH host key mismatch for {} (expected {}, got {})",
                host.id,
                expected,
                observed.unwrap_or_else(|| "unknown".to_string())
            )));
        }
    }

    match &host.auth {
        HostAuth::Password { password } => session
            .userauth_password(&host.username, password)
            .map_err(map_ssh_error)?,
        HostAuth::PrivateKey {
            key_path,
            passphrase,
        } => session
            .userauth_pubkey_file(
                &host.username,
                None,
                &expand_home(key_path),
                passphrase.as_deref(),
            )
            .map_err(map_ssh_error)?,
    }
    if !session.authenticated() {
        return Err(OpError::validation(format!(
            "SSH authentication failed for {}@{}",
            host.username, host.id
        )));
    }
    session.set_keepalive(true, (KEEPALIVE_INTERVAL_MS / 1000) as u32);
    Ok(session)
}

struct Capture {
    data: Vec<u8>,
    total: usize,
}

impl Capture {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            total: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len();
        let room = MAX_CAPTURE_BYTES.saturating_sub(self.data.len());
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

fn read_into(stream: &mut impl Read, buf: &mut [u8], out: &mut Capture) -> Result<bool, OpError> {
    match stream.read(buf) {
        Ok(n) if n > 0 => {
            out.push(&buf[..n]);
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
        Err(err) => Err(OpError::channel_dead(format!("SSH read failed: {}", err))),
    }
}

/// Measures how long a command has gone without producing output.
struct IdleClock {
    limit: Duration,
    last_output: Instant,
}

impl IdleClock {
    fn start(limit_ms: u64, now: Instant) -> Self {
        Self {
            limit: Duration::from_millis(limit_ms),
            last_output: now,
        }
    }

    fn record(&mut self, progressed: bool, now: Instant) {
        if progressed {
            self.last_output = now;
        }
    }

    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_output) > self.limit
    }
}

fn exec_blocking(session: &Session, command: &str, timeout_ms: u64) -> Result<CommandOutput, OpError> {
    session.set_blocking(true);
    let mut channel = session.channel_session().map_err(map_ssh_error)?;
    channel.exec(command).map_err(map_ssh_error)?;
    session.set_blocking(false);

    let mut stdout = Capture::new();
    let mut stderr = Capture::new();
    let mut stderr_stream = channel.stderr();
    let mut idle = IdleClock::start(timeout_ms, Instant::now());
    let mut buf = [0u8; 8192];
    let mut outcome = Ok(());

    loop {
        let mut progressed = false;
        match read_into(&mut channel, &mut buf, &mut stdout) {
            Ok(p) => progressed |= p,
            Err(err) => {
                outcome = Err(err);
                break;
            }
        }
        match read_into(&mut stderr_stream, &mut buf, &mut stderr) {
            Ok(p) => progressed |= p,
            Err(err) => {
                outcome = Err(err);
                break;
            }
        }
        if channel.eof() {
            break;
        }
        let now = Instant::now();
        idle.record(progressed, now);
        if idle.expired(now) {
            outcome = Err(OpError::timeout(format!(
                "Remote command produced no output for {} ms",
                timeout_ms
            )));
            break;
        }
        if !progressed {
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    if outcome.is_err() {
        let _ = channel.close();
        let deadline = Instant::now() + Duration::from_millis(TIMEOUT_SSH_CLOSE_GRACE_MS);
        while Instant::now() < deadline && !channel.eof() {
            std::thread::sleep(Duration::from_millis(20));
        }
        session.set_blocking(true);
        outcome?;
    }

    session.set_blocking(true);
    channel.wait_close().map_err(map_ssh_error)?;
    let exit_status = channel.exit_status().map_err(map_ssh_error)?;
    Ok(CommandOutput {
        stdout: stdout.data,
        stderr: stderr.data,
        exit_status,
    })
}

fn map_ssh_error(err: ssh2::Error) -> OpError {
    match err.code() {
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) | ErrorCode::Session(LIBSSH2_ERROR_SOCKET_TIMEOUT) => {
            OpError::timeout(format!("SSH operation timed out: {}", err.message()))
        }
        ErrorCode::Session(LIBSSH2_ERROR_SOCKET_NONE)
        | ErrorCode::Session(LIBSSH2_ERROR_SOCKET_SEND)
        | ErrorCode::Session(LIBSSH2_ERROR_SOCKET_DISCONNECT)
        | ErrorCode::Session(LIBSSH2_ERROR_CHANNEL_CLOSED)
        | ErrorCode::Session(LIBSSH2_ERROR_SOCKET_RECV) => {
            OpError::channel_dead(format!("SSH connection lost: {}", err.message()))
        }
        ErrorCode::SFTP(2) => OpError::not_found(format!("No such file: {}", err.message())),
        ErrorCode::SFTP(3) => OpError::validation(format!("Permission denied: {}", err.message())),
        _ => {
            let io_err: std::io::Error = err.into();
            OpError::from(io_err)
        }
    }
}

fn ensure_remote_dir(sftp: &ssh2::Sftp, remote_file: &str) -> Result<(), OpError> {
    let dir = remote_path::parent(remote_file);
    let mut current = String::new();
    for part in dir.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        if sftp.stat(Path::new(&current)).is_ok() {
            continue;
        }
        sftp.mkdir(Path::new(&current), 0o755).map_err(map_ssh_error)?;
    }
    Ok(())
}
