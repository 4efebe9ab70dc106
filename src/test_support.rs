//! In-memory stand-ins for SSH sessions used by unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::ToolError;
use crate::ssh::{CommandOutput, Connector, RemoteSession, SshConfig};

pub fn config(host: &str) -> SshConfig {
    SshConfig {
        host: host.to_string(),
        port: 22,
        username: "u".to_string(),
        password: "p".to_string(),
    }
}

#[derive(Default)]
struct Shared {
    connects: AtomicUsize,
    closed: AtomicUsize,
    connect_error: Mutex<Option<String>>,
    close_error: Mutex<Option<String>>,
    /// Remote filesystem shared by every session of this connector.
    files: Mutex<HashMap<String, Vec<u8>>>,
}

/// Connector whose sessions run scripted commands against an in-memory filesystem.
///
/// Known commands: `echo <text>`, `fail <code> <stderr>`, `silent-fail <code>`.
/// Anything else exits 127 with "command not found" on stderr.
#[derive(Default, Clone)]
pub struct FakeConnector {
    shared: Arc<Shared>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connect(&self, message: &str) {
        *self.shared.connect_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_close(&self, message: &str) {
        *self.shared.close_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn remote_file(&self, path: &str) -> Option<Vec<u8>> {
        self.shared.files.lock().unwrap().get(path).cloned()
    }

    pub fn put_remote_file(&self, path: &str, data: &[u8]) {
        self.shared
            .files
            .lock()
            .unwrap()
            .insert(path.to_string(), data.to_vec());
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _config: &SshConfig) -> Result<Arc<dyn RemoteSession>, ToolError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.shared.connect_error.lock().unwrap().clone() {
            return Err(ToolError::Connect(message));
        }
        Ok(Arc::new(FakeSession {
            shared: self.shared.clone(),
        }))
    }
}

struct FakeSession {
    shared: Arc<Shared>,
}

fn run_script(command: &str) -> CommandOutput {
    let (program, rest) = command.split_once(' ').unwrap_or((command, ""));
    match program {
        "echo" => CommandOutput {
            stdout: format!("{}\n", rest).into_bytes(),
            stderr: Vec::new(),
            exit_code: Some(0),
        },
        "fail" => {
            let (code, stderr) = rest.split_once(' ').unwrap_or((rest, ""));
            CommandOutput {
                stdout: Vec::new(),
                stderr: stderr.as_bytes().to_vec(),
                exit_code: code.parse().ok(),
            }
        }
        "silent-fail" => CommandOutput {
            stdout: b"partial".to_vec(),
            stderr: Vec::new(),
            exit_code: rest.parse().ok(),
        },
        _ => CommandOutput {
            stdout: Vec::new(),
            stderr: format!("{}: command not found", program).into_bytes(),
            exit_code: Some(127),
        },
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn exec(&self, command: &str) -> Result<String, ToolError> {
        // Stands in for a command like `tail -f` that never exits
        if command == "hang" {
            std::future::pending::<()>().await;
        }
        Ok(run_script(command).render())
    }

    async fn upload(&self, local_path: &str, remote_path: &str) -> Result<(), ToolError> {
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| ToolError::Upload(format!("{}: {}", local_path, e)))?;
        self.shared
            .files
            .lock()
            .unwrap()
            .insert(remote_path.to_string(), data);
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &str) -> Result<(), ToolError> {
        let data = self
            .shared
            .files
            .lock()
            .unwrap()
            .get(remote_path)
            .cloned()
            .ok_or_else(|| ToolError::Download(format!("{}: No such file", remote_path)))?;
        tokio::fs::write(local_path, data)
            .await
            .map_err(|e| ToolError::Download(format!("{}: {}", local_path, e)))
    }

    async fn close(&self) -> Result<(), ToolError> {
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
        match self.shared.close_error.lock().unwrap().clone() {
            Some(message) => Err(ToolError::Disconnect(message)),
            None => Ok(()),
        }
    }
}
