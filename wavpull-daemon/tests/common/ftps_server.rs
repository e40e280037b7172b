//! Minimal in-process FTPS server
//!
//! Speaks just enough explicit FTPS for the daemon: `AUTH TLS`, login,
//! `PBSZ`/`PROT`/`TYPE`, `CWD`, `PASV`, `NLST`, `RETR`, `SIZE`, `DELE`,
//! `QUIT`. Certificates are generated per server with rcgen.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig as TlsServerConfig;
use tokio_rustls::rustls::pki_types::CertificateDer;

/// Server contents and behavior switches
#[derive(Debug)]
pub struct FtpsState {
    pub username: String,
    pub password: String,
    pub remote_dir: String,
    /// Files in listing order
    pub files: Vec<(String, Vec<u8>)>,
    /// Every command received after the TLS upgrade, PASS included
    pub commands: Vec<String>,
    /// Accept RETR but never send any data
    pub stall_downloads: bool,
    /// When false, a known USER is logged in straight away with 230
    pub password_required: bool,
}

impl FtpsState {
    pub fn new(files: &[(&str, Vec<u8>)]) -> Self {
        Self {
            username: "capture".to_string(),
            password: "secret".to_string(),
            remote_dir: "/records".to_string(),
            files: files
                .iter()
                .map(|(name, data)| (name.to_string(), data.clone()))
                .collect(),
            commands: Vec::new(),
            stall_downloads: false,
            password_required: true,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.files.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Index of the first command starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.commands.iter().position(|c| c.starts_with(prefix))
    }

    fn data(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.clone())
    }
}

pub type SharedState = Arc<Mutex<FtpsState>>;

pub struct FtpsTestServer {
    pub port: u16,
    pub state: SharedState,
    task: JoinHandle<()>,
}

impl FtpsTestServer {
    /// Listen on an ephemeral localhost port
    pub async fn start(state: FtpsState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let acceptor = test_acceptor();
        let state = Arc::new(Mutex::new(state));

        let shared = state.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let state = shared.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(socket, acceptor, state).await;
                });
            }
        });

        Self { port, state, task }
    }
}

impl Drop for FtpsTestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// TLS acceptor with a fresh self-signed certificate for `localhost`
fn test_acceptor() -> TlsAcceptor {
    use rcgen::{CertificateParams, KeyPair};

    let key_pair = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "wavpull test server");
    let cert = params.self_signed(&key_pair).unwrap();

    let cert_pem = cert.pem();
    let key_pem = key_pair.serialize_pem();
    let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let private_key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .unwrap()
        .unwrap();

    let config = TlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, private_key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

async fn reply<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(format!("{}\r\n", line).as_bytes()).await?;
    writer.flush().await
}

async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end().to_string()))
}

async fn handle_connection(
    socket: TcpStream,
    acceptor: TlsAcceptor,
    state: SharedState,
) -> io::Result<()> {
    let mut plain = BufReader::new(socket);
    reply(&mut plain, "220 wavpull test server").await?;

    loop {
        let Some(command) = read_command(&mut plain).await? else {
            return Ok(());
        };
        if command.eq_ignore_ascii_case("AUTH TLS") {
            reply(&mut plain, "234 Proceed with negotiation").await?;
            break;
        }
        reply(&mut plain, "530 Please use AUTH TLS").await?;
    }

    let tls = acceptor.accept(plain.into_inner()).await?;
    serve(BufReader::new(tls), acceptor, state).await
}

async fn serve<S>(
    mut control: BufReader<S>,
    acceptor: TlsAcceptor,
    state: SharedState,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut logged_in = false;
    let mut protected = false;
    let mut passive: Option<TcpListener> = None;

    while let Some(line) = read_command(&mut control).await? {
        state.lock().unwrap().commands.push(line.clone());
        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };

        if !logged_in && !matches!(verb.as_str(), "USER" | "PASS" | "QUIT") {
            reply(&mut control, "530 Not logged in").await?;
            continue;
        }

        match verb.as_str() {
            "USER" => {
                let (known, password_required) = {
                    let st = state.lock().unwrap();
                    (st.username == arg, st.password_required)
                };
                if password_required {
                    reply(&mut control, "331 Password required").await?;
                } else if known {
                    logged_in = true;
                    reply(&mut control, "230 Logged in").await?;
                } else {
                    reply(&mut control, "530 Unknown user").await?;
                }
            }
            "PASS" => {
                let ok = {
                    let st = state.lock().unwrap();
                    let user = format!("USER {}", st.username);
                    st.password == arg && st.commands.contains(&user)
                };
                if ok {
                    logged_in = true;
                    reply(&mut control, "230 Logged in").await?;
                } else {
                    reply(&mut control, "530 Login incorrect").await?;
                }
            }
            "PBSZ" => reply(&mut control, "200 PBSZ=0").await?,
            "PROT" if arg == "P" => {
                protected = true;
                reply(&mut control, "200 Protection level set to P").await?;
            }
            "TYPE" => reply(&mut control, "200 Type set").await?,
            "CWD" => {
                let known = state.lock().unwrap().remote_dir == arg;
                if known {
                    reply(&mut control, "250 Directory changed").await?;
                } else {
                    reply(&mut control, "550 No such directory").await?;
                }
            }
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await?;
                let port = listener.local_addr()?.port();
                passive = Some(listener);
                // Advertise a bogus address; clients must use the control peer
                reply(
                    &mut control,
                    &format!(
                        "227 Entering Passive Mode (10,255,255,1,{},{})",
                        port >> 8,
                        port & 0xff
                    ),
                )
                .await?;
            }
            "NLST" | "RETR" => {
                let Some(listener) = passive.take() else {
                    reply(&mut control, "425 Use PASV first").await?;
                    continue;
                };
                if !protected {
                    reply(&mut control, "521 Data connections must be protected").await?;
                    continue;
                }

                let (payload, stall) = {
                    let st = state.lock().unwrap();
                    if verb == "NLST" {
                        (Some(st.names().join("\r\n").into_bytes()), false)
                    } else {
                        (st.data(&arg), st.stall_downloads)
                    }
                };
                let Some(payload) = payload else {
                    reply(&mut control, "550 No such file").await?;
                    continue;
                };

                reply(&mut control, "150 Opening data connection").await?;
                let (socket, _) = listener.accept().await?;
                let mut data = acceptor.accept(socket).await?;
                if stall {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
                data.write_all(&payload).await?;
                data.shutdown().await?;
                reply(&mut control, "226 Transfer complete").await?;
            }
            "SIZE" => {
                let size = state.lock().unwrap().data(&arg).map(|data| data.len());
                match size {
                    Some(size) => reply(&mut control, &format!("213 {}", size)).await?,
                    None => reply(&mut control, "550 No such file").await?,
                }
            }
            "DELE" => {
                let removed = {
                    let mut st = state.lock().unwrap();
                    let before = st.files.len();
                    st.files.retain(|(name, _)| *name != arg);
                    st.files.len() != before
                };
                if removed {
                    reply(&mut control, "250 Deleted").await?;
                } else {
                    reply(&mut control, "550 No such file").await?;
                }
            }
            "QUIT" => {
                reply(&mut control, "221 Goodbye").await?;
                return Ok(());
            }
            _ => reply(&mut control, "502 Command not implemented").await?,
        }
    }
    Ok(())
}
