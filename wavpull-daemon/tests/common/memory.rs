//! In-memory transfer session
//!
//! Each fake server is a [`RemoteDir`] behind a shared lock so that tests can
//! inspect it after the daemon code has dropped its session.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use wavpull_common::ServerConfig;
use wavpull_daemon::session::{SessionConnector, SessionError, TransferSession};

/// A session call, recorded in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Cwd(String),
    List,
    Size(String),
    Retr(String),
    Dele(String),
    Close,
}

/// Contents and failure injection for one fake server
#[derive(Debug, Default)]
pub struct RemoteDir {
    pub remote_dir: String,
    /// Files in listing order
    pub files: Vec<(String, Vec<u8>)>,
    /// Reported by SIZE instead of the real length
    pub size_overrides: HashMap<String, u64>,
    pub fail_list: Option<SessionError>,
    pub fail_download: HashMap<String, SessionError>,
    pub fail_size: HashMap<String, SessionError>,
    pub fail_delete: HashMap<String, SessionError>,
    pub ops: Vec<Op>,
}

pub type SharedDir = Arc<Mutex<RemoteDir>>;

impl RemoteDir {
    pub fn with_files(files: &[(&str, Vec<u8>)]) -> SharedDir {
        Arc::new(Mutex::new(RemoteDir {
            remote_dir: "/records".to_string(),
            files: files
                .iter()
                .map(|(name, data)| (name.to_string(), data.clone()))
                .collect(),
            ..Default::default()
        }))
    }

    pub fn names(&self) -> Vec<String> {
        self.files.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.files.iter().any(|(n, _)| n == name)
    }

    fn data(&self, name: &str) -> Option<&Vec<u8>> {
        self.files.iter().find(|(n, _)| n == name).map(|(_, data)| data)
    }

    /// Recorded operations that touched `name`
    pub fn ops_on(&self, name: &str) -> Vec<Op> {
        self.ops
            .iter()
            .filter(|op| match op {
                Op::Size(n) | Op::Retr(n) | Op::Dele(n) => n == name,
                _ => false,
            })
            .cloned()
            .collect()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Dele(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

pub struct MemorySession {
    dir: SharedDir,
}

impl MemorySession {
    pub fn new(dir: SharedDir) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl TransferSession for MemorySession {
    async fn change_directory(&mut self, path: &str) -> Result<(), SessionError> {
        let mut dir = self.dir.lock().unwrap();
        dir.ops.push(Op::Cwd(path.to_string()));
        if dir.remote_dir == path {
            Ok(())
        } else {
            Err(SessionError::NotFound(path.to_string()))
        }
    }

    async fn list_names(&mut self) -> Result<Vec<String>, SessionError> {
        let mut dir = self.dir.lock().unwrap();
        dir.ops.push(Op::List);
        match dir.fail_list.clone() {
            Some(e) => Err(e),
            None => Ok(dir.names()),
        }
    }

    async fn fetch_size(&mut self, name: &str) -> Result<u64, SessionError> {
        let mut dir = self.dir.lock().unwrap();
        dir.ops.push(Op::Size(name.to_string()));
        if let Some(e) = dir.fail_size.get(name) {
            return Err(e.clone());
        }
        if let Some(size) = dir.size_overrides.get(name) {
            return Ok(*size);
        }
        dir.data(name)
            .map(|data| data.len() as u64)
            .ok_or_else(|| SessionError::NotFound(name.to_string()))
    }

    async fn download_to(
        &mut self,
        name: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, SessionError> {
        let data = {
            let mut dir = self.dir.lock().unwrap();
            dir.ops.push(Op::Retr(name.to_string()));
            if let Some(e) = dir.fail_download.get(name) {
                return Err(e.clone());
            }
            dir.data(name)
                .cloned()
                .ok_or_else(|| SessionError::NotFound(name.to_string()))?
        };

        sink.write_all(&data)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        sink.flush()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        Ok(data.len() as u64)
    }

    async fn delete_remote(&mut self, name: &str) -> Result<(), SessionError> {
        let mut dir = self.dir.lock().unwrap();
        dir.ops.push(Op::Dele(name.to_string()));
        if let Some(e) = dir.fail_delete.get(name) {
            return Err(e.clone());
        }
        let before = dir.files.len();
        dir.files.retain(|(n, _)| n != name);
        if dir.files.len() == before {
            Err(SessionError::NotFound(name.to_string()))
        } else {
            Ok(())
        }
    }

    async fn close(&mut self) {
        self.dir.lock().unwrap().ops.push(Op::Close);
    }
}

/// Hands out [`MemorySession`]s by host
#[derive(Default)]
pub struct MemoryConnector {
    servers: HashMap<String, SharedDir>,
    refused: HashSet<String>,
    /// Hosts passed to `open`, in order
    pub opened: Arc<Mutex<Vec<String>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, host: &str, dir: SharedDir) -> Self {
        self.servers.insert(host.to_string(), dir);
        self
    }

    /// `open` fails for this host with a connection error
    pub fn refusing(mut self, host: &str) -> Self {
        self.refused.insert(host.to_string());
        self
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionConnector for MemoryConnector {
    async fn open(&self, server: &ServerConfig) -> Result<Box<dyn TransferSession>, SessionError> {
        self.opened.lock().unwrap().push(server.host.clone());
        if self.refused.contains(&server.host) {
            return Err(SessionError::Connection(format!(
                "{}: connection refused",
                server.endpoint()
            )));
        }
        match self.servers.get(&server.host) {
            Some(dir) => Ok(Box::new(MemorySession::new(dir.clone()))),
            None => Err(SessionError::Connection(format!("unknown host {}", server.host))),
        }
    }
}
