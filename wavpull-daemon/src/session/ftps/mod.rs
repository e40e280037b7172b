//! Explicit FTP over TLS (RFC 4217)
//!
//! Session setup follows the explicit-protection sequence:
//!
//! 1. TCP connect, `220` greeting
//! 2. `AUTH TLS`, then TLS handshake on the control connection
//! 3. `USER` / `PASS`
//! 4. `PBSZ 0` and `PROT P` so that data connections are encrypted too
//! 5. `TYPE I` (binary, so `SIZE` reports byte counts)
//!
//! Without step 4 the control channel is encrypted but file contents travel
//! in the clear, so every data operation refuses to run until it has
//! succeeded.
//!
//! ## Module Structure
//!
//! - `reply` - control channel reply codec
//! - `data` - passive data connections
//! - `tls` - TLS connector and certificate fingerprints

mod data;
mod reply;
mod tls;

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::debug;
use wavpull_common::ServerConfig;

use super::{SessionConnector, SessionError, TransferSession};
use crate::constants::{DEFAULT_CONTROL_TIMEOUT, DEFAULT_DATA_IDLE_TIMEOUT};

pub use data::{parse_name_list, parse_pasv_reply};
pub use reply::{Reply, read_reply};

use data::{copy_data, passive_address};
use reply::{loggable, write_command};
use tls::{TLS_CONNECTOR, certificate_fingerprint, server_name_for};

/// Control connection after the TLS upgrade
type ControlStream = BufReader<TlsStream<TcpStream>>;

/// Network timeouts for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Connect, TLS handshakes, and each command/reply exchange
    pub control: Duration,
    /// Longest gap between two reads on a data connection
    pub data_idle: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            control: DEFAULT_CONTROL_TIMEOUT,
            data_idle: DEFAULT_DATA_IDLE_TIMEOUT,
        }
    }
}

/// Send a command and wait for its reply, bounded by `limit`
async fn exchange<S>(
    stream: &mut S,
    command: &str,
    limit: Duration,
    op: &'static str,
) -> Result<Reply, SessionError>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    timeout(limit, async {
        write_command(stream, command).await?;
        read_reply(stream).await
    })
    .await
    .map_err(|_| SessionError::Timeout(op))?
}

/// Map a negative reply to an error, treating 450/550 as "no such file"
fn refusal(reply: &Reply, subject: &str) -> SessionError {
    match reply.code {
        450 | 550 => SessionError::NotFound(format!("{} ({})", subject, reply.summary())),
        _ => SessionError::Transport(reply.summary()),
    }
}

// =============================================================================
// Session
// =============================================================================

/// An open FTPS session
pub struct FtpsSession {
    control: ControlStream,
    host: String,
    /// Address of the control connection's peer, used for data connections
    peer: IpAddr,
    server_name: ServerName<'static>,
    timeouts: SessionTimeouts,
    data_protected: bool,
}

impl FtpsSession {
    /// Connect and upgrade the control channel to TLS
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connection`] if the server is unreachable,
    /// does not greet with `220`, refuses `AUTH TLS`, or the handshake fails.
    pub async fn connect(
        host: &str,
        port: u16,
        timeouts: SessionTimeouts,
    ) -> Result<Self, SessionError> {
        let tcp = timeout(timeouts.control, TcpStream::connect((host, port)))
            .await
            .map_err(|_| SessionError::Timeout("connect"))?
            .map_err(|e| SessionError::Connection(format!("{}:{}: {}", host, port, e)))?;
        let peer = tcp
            .peer_addr()
            .map_err(|e| SessionError::Connection(e.to_string()))?
            .ip();

        let mut plain = BufReader::new(tcp);
        let greeting = timeout(timeouts.control, read_reply(&mut plain))
            .await
            .map_err(|_| SessionError::Timeout("greeting"))??;
        debug!(host, reply = %greeting.summary(), "ftp <");
        if greeting.code != 220 {
            return Err(SessionError::Connection(format!(
                "unexpected greeting: {}",
                greeting.summary()
            )));
        }

        let auth = exchange(&mut plain, "AUTH TLS", timeouts.control, "AUTH").await?;
        debug!(host, reply = %auth.summary(), "ftp <");
        if auth.code != 234 {
            return Err(SessionError::Connection(format!(
                "server refused AUTH TLS: {}",
                auth.summary()
            )));
        }

        let server_name = server_name_for(host);
        let tls = timeout(
            timeouts.control,
            TLS_CONNECTOR.connect(server_name.clone(), plain.into_inner()),
        )
        .await
        .map_err(|_| SessionError::Timeout("TLS handshake"))?
        .map_err(|e| SessionError::Connection(format!("TLS handshake failed: {}", e)))?;

        if let Some(fingerprint) = certificate_fingerprint(&tls) {
            debug!(host, %fingerprint, "server certificate");
        }

        Ok(Self {
            control: BufReader::new(tls),
            host: host.to_string(),
            peer,
            server_name,
            timeouts,
            data_protected: false,
        })
    }

    /// Log in with username and password
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Auth`] if the server rejects either step.
    pub async fn authenticate(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        let reply = self.command(&format!("USER {}", username), "USER").await?;
        if reply.is_success() {
            return Ok(());
        }
        if !reply.is_intermediate() {
            return Err(SessionError::Auth(reply.summary()));
        }

        let reply = self.command(&format!("PASS {}", password), "PASS").await?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(SessionError::Auth(reply.summary()))
        }
    }

    /// Protect the data channel and switch to binary transfers
    ///
    /// Must run after [`authenticate`](Self::authenticate) and before any
    /// listing, transfer, or delete.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] if the server refuses `PBSZ`,
    /// `PROT P`, or `TYPE I`.
    pub async fn enable_encrypted_data_channel(&mut self) -> Result<(), SessionError> {
        self.expect_success("PBSZ 0", "PBSZ").await?;
        self.expect_success("PROT P", "PROT").await?;
        self.data_protected = true;
        self.expect_success("TYPE I", "TYPE").await?;
        Ok(())
    }

    async fn command(&mut self, command: &str, op: &'static str) -> Result<Reply, SessionError> {
        debug!(host = %self.host, command = loggable(command), "ftp >");
        let reply = exchange(&mut self.control, command, self.timeouts.control, op).await?;
        debug!(host = %self.host, reply = %reply.summary(), "ftp <");
        Ok(reply)
    }

    async fn expect_success(
        &mut self,
        command: &str,
        op: &'static str,
    ) -> Result<Reply, SessionError> {
        let reply = self.command(command, op).await?;
        if reply.is_success() {
            Ok(reply)
        } else {
            Err(SessionError::Transport(reply.summary()))
        }
    }

    /// Read a reply that follows an earlier preliminary one
    async fn read_completion(&mut self, op: &'static str) -> Result<Reply, SessionError> {
        let reply = timeout(self.timeouts.control, read_reply(&mut self.control))
            .await
            .map_err(|_| SessionError::Timeout(op))??;
        debug!(host = %self.host, reply = %reply.summary(), "ftp <");
        Ok(reply)
    }

    fn require_protected(&self) -> Result<(), SessionError> {
        if self.data_protected {
            Ok(())
        } else {
            Err(SessionError::Transport(
                "data channel protection (PROT P) not enabled".to_string(),
            ))
        }
    }

    /// Enter passive mode and open the data connection
    async fn open_passive(&mut self) -> Result<TcpStream, SessionError> {
        let reply = self.command("PASV", "PASV").await?;
        if reply.code != 227 {
            return Err(SessionError::Transport(reply.summary()));
        }
        let (_, port) = parse_pasv_reply(reply.message()).ok_or_else(|| {
            SessionError::Protocol(format!("unparsable PASV reply: {}", reply.summary()))
        })?;

        let addr = passive_address(self.peer, port);
        timeout(self.timeouts.control, TcpStream::connect(addr))
            .await
            .map_err(|_| SessionError::Transport(format!("data connection to {} timed out", addr)))?
            .map_err(|e| SessionError::Transport(format!("data connection to {}: {}", addr, e)))
    }

    /// TLS-wrap a data connection and drain it into `sink`
    async fn receive_data(
        &self,
        data: TcpStream,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, SessionError> {
        let mut tls = timeout(
            self.timeouts.control,
            TLS_CONNECTOR.connect(self.server_name.clone(), data),
        )
        .await
        .map_err(|_| SessionError::Transport("data channel TLS handshake timed out".to_string()))?
        .map_err(|e| SessionError::Transport(format!("data channel TLS handshake failed: {}", e)))?;

        copy_data(&mut tls, sink, self.timeouts.data_idle).await
    }

    /// Run a command that sends data from the server, e.g. `RETR` or `NLST`
    async fn transfer(
        &mut self,
        command: &str,
        op: &'static str,
        subject: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, SessionError> {
        self.require_protected()?;
        let data = self.open_passive().await?;

        let reply = self.command(command, op).await?;
        if reply.is_success() {
            // Nothing to send; some servers answer an empty NLST this way
            return Ok(0);
        }
        if !reply.is_preliminary() {
            return Err(refusal(&reply, subject));
        }

        // Always collect the completion reply so the control channel stays
        // in step, even when the data connection failed.
        let received = self.receive_data(data, sink).await;
        let completion = self.read_completion(op).await;
        match (received, completion) {
            (_, Err(e)) => Err(e),
            (Err(e), Ok(_)) => Err(e),
            (Ok(_), Ok(done)) if !done.is_success() => Err(SessionError::Transport(done.summary())),
            (Ok(copied), Ok(_)) => Ok(copied),
        }
    }
}

#[async_trait]
impl TransferSession for FtpsSession {
    async fn change_directory(&mut self, path: &str) -> Result<(), SessionError> {
        let reply = self.command(&format!("CWD {}", path), "CWD").await?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(refusal(&reply, path))
        }
    }

    async fn list_names(&mut self) -> Result<Vec<String>, SessionError> {
        let mut listing: Vec<u8> = Vec::new();
        match self.transfer("NLST", "NLST", "directory listing", &mut listing).await {
            Ok(_) => Ok(parse_name_list(&listing)),
            // Many servers report an empty directory as 450/550
            Err(SessionError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn fetch_size(&mut self, name: &str) -> Result<u64, SessionError> {
        let reply = self.command(&format!("SIZE {}", name), "SIZE").await?;
        if reply.code != 213 {
            return Err(refusal(&reply, name));
        }
        reply
            .message()
            .trim()
            .parse()
            .map_err(|_| {
                SessionError::Transport(format!("invalid SIZE reply: {}", reply.summary()))
            })
    }

    async fn download_to(
        &mut self,
        name: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, SessionError> {
        self.transfer(&format!("RETR {}", name), "RETR", name, sink)
            .await
    }

    async fn delete_remote(&mut self, name: &str) -> Result<(), SessionError> {
        self.require_protected()?;
        let reply = self.command(&format!("DELE {}", name), "DELE").await?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(refusal(&reply, name))
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.command("QUIT", "QUIT").await {
            debug!(host = %self.host, error = %e, "QUIT failed");
        }
        let _ = timeout(self.timeouts.control, self.control.get_mut().shutdown()).await;
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens authenticated FTPS sessions with a protected data channel
#[derive(Debug, Clone, Copy, Default)]
pub struct FtpsConnector {
    timeouts: SessionTimeouts,
}

impl FtpsConnector {
    pub fn new(timeouts: SessionTimeouts) -> Self {
        Self { timeouts }
    }
}

#[async_trait]
impl SessionConnector for FtpsConnector {
    async fn open(&self, server: &ServerConfig) -> Result<Box<dyn TransferSession>, SessionError> {
        let mut session = FtpsSession::connect(&server.host, server.port, self.timeouts).await?;

        let setup = async {
            session
                .authenticate(&server.username, &server.password)
                .await?;
            session.enable_encrypted_data_channel().await
        }
        .await;

        if let Err(e) = setup {
            session.close().await;
            return Err(e);
        }
        Ok(Box::new(session))
    }
}
