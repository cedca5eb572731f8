//! Password-authenticated remote command execution.
//!
//! `ssh2` is blocking, so every call runs on tokio's blocking pool.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Session;
use thiserror::Error;
use tracing::debug;

/// Errors from the remote shell.
#[derive(Error, Debug)]
pub enum ShellError {
    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH protocol failure.
    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    /// Host name resolved to nothing.
    #[error("Could not resolve {0}")]
    Resolve(String),

    /// Server did not accept the password.
    #[error("Authentication rejected for user {0}")]
    AuthRejected(String),

    /// Command ran but exited non-zero.
    #[error("Command exited with status {code}: {stderr}")]
    ExitStatus { code: i32, stderr: String },

    /// Blocking task panicked or was cancelled.
    #[error("SSH task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Session lock poisoned by an earlier panic.
    #[error("SSH session poisoned")]
    Poisoned,
}

/// Where and as whom to log in.
#[derive(Debug, Clone)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub connect_timeout: Duration,
}

/// Opens sessions on remote hosts.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Connect and authenticate with username and password.
    async fn open(&self, endpoint: &SshEndpoint) -> Result<Box<dyn ShellSession>, ShellError>;
}

/// An authenticated session that runs commands one at a time.
#[async_trait]
pub trait ShellSession: Send {
    /// Run `command`, returning its stdout. Non-zero exit is an error.
    async fn exec(&mut self, command: &str) -> Result<String, ShellError>;
}

/// [`RemoteShell`] backed by libssh2.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ssh2Shell;

#[async_trait]
impl RemoteShell for Ssh2Shell {
    async fn open(&self, endpoint: &SshEndpoint) -> Result<Box<dyn ShellSession>, ShellError> {
        let endpoint = endpoint.clone();
        let session = tokio::task::spawn_blocking(move || connect(&endpoint)).await??;
        Ok(Box::new(Ssh2Session {
            session: Arc::new(Mutex::new(session)),
        }))
    }
}

fn connect(endpoint: &SshEndpoint) -> Result<Session, ShellError> {
    let addr = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| ShellError::Resolve(endpoint.host.clone()))?;

    debug!(%addr, user = %endpoint.user, "Opening SSH session");
    let tcp = TcpStream::connect_timeout(&addr, endpoint.connect_timeout)?;

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(endpoint.connect_timeout.as_millis()).unwrap_or(u32::MAX));
    session.handshake()?;
    session.userauth_password(&endpoint.user, &endpoint.password)?;

    if !session.authenticated() {
        return Err(ShellError::AuthRejected(endpoint.user.clone()));
    }
    Ok(session)
}

struct Ssh2Session {
    session: Arc<Mutex<Session>>,
}

#[async_trait]
impl ShellSession for Ssh2Session {
    async fn exec(&mut self, command: &str) -> Result<String, ShellError> {
        let session = Arc::clone(&self.session);
        let command = command.to_string();

        tokio::task::spawn_blocking(move || {
            let session = session.lock().map_err(|_| ShellError::Poisoned)?;
            run(&session, &command)
        })
        .await?
    }
}

fn run(session: &Session, command: &str) -> Result<String, ShellError> {
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout)?;
    let mut stderr = String::new();
    channel.stderr().read_to_string(&mut stderr)?;

    channel.wait_close()?;
    let code = channel.exit_status()?;
    debug!(code, stdout = %stdout.trim(), "Remote command finished");

    if code == 0 {
        Ok(stdout)
    } else {
        Err(ShellError::ExitStatus { code, stderr })
    }
}
