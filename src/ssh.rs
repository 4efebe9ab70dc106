//! Remote session handles: one authenticated SSH connection plus its SFTP channel.
//!
//! The registry never talks to russh directly. It goes through [`Connector`]
//! to open sessions and [`RemoteSession`] to use them, so a session is only
//! ever handed out once both the command channel and the file-transfer
//! channel are ready.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::error::ToolError;

/// Upper bound on the whole two-phase connect (SSH handshake, auth, SFTP).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// SSH extended-data stream number for stderr.
const STDERR_EXT: u32 = 1;

#[derive(Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Operations available on an established session.
///
/// Calls against one session are not serialized: every `exec` opens its own
/// channel, so concurrent calls may interleave on the wire.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run one command to completion and render its output as text.
    async fn exec(&self, command: &str) -> Result<String, ToolError>;

    async fn upload(&self, local_path: &str, remote_path: &str) -> Result<(), ToolError>;

    async fn download(&self, remote_path: &str, local_path: &str) -> Result<(), ToolError>;

    /// Close the file-transfer channel, then the command channel.
    async fn close(&self) -> Result<(), ToolError>;
}

/// Opens fully connected sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &SshConfig) -> Result<Arc<dyn RemoteSession>, ToolError>;
}

/// Output collected from one remote command.
#[derive(Debug, Default, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the server never reported an exit status (e.g. killed by a signal).
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    /// Render the output the way tool callers see it.
    ///
    /// Only a non-zero exit code together with non-empty stderr produces the
    /// composite report; otherwise the caller gets stdout alone.
    pub fn render(&self) -> String {
        let stdout = String::from_utf8_lossy(&self.stdout);
        let stderr = String::from_utf8_lossy(&self.stderr);
        let failed = self.exit_code != Some(0);

        if failed && !stderr.is_empty() {
            let code = self
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            format!(
                "Exit code: {}\n\nError output:\n{}\n\nStandard output:\n{}",
                code, stderr, stdout
            )
        } else {
            stdout.into_owned()
        }
    }
}

struct Client;

impl client::Handler for Client {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> impl std::future::Future<Output = Result<bool, Self::Error>> + Send {
        // Host keys are not verified
        async { Ok(true) }
    }
}

/// A connected SSH session with its SFTP subsystem channel.
pub struct SshSession {
    handle: Handle<Client>,
    sftp: SftpSession,
}

impl SshSession {
    /// Connect, authenticate with a password, then open the SFTP channel on the
    /// same connection. If SFTP fails the SSH connection is closed before the
    /// error is returned.
    pub async fn connect(config: &SshConfig) -> Result<Self> {
        let client_config = client::Config {
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            ..<_>::default()
        };

        let client_config = Arc::new(client_config);
        let mut handle = client::connect(
            client_config,
            (config.host.as_str(), config.port),
            Client,
        )
        .await
        .context("Failed to connect to SSH server")?;

        let auth_result = handle
            .authenticate_password(config.username.clone(), config.password.clone())
            .await
            .context("Failed to authenticate with password")?;

        if !auth_result.success() {
            bail!("Authentication failed for user {}", config.username);
        }

        let sftp = match open_sftp(&handle).await {
            Ok(sftp) => sftp,
            Err(e) => {
                if let Err(close_err) = handle
                    .disconnect(Disconnect::ByApplication, "", "English")
                    .await
                {
                    tracing::warn!("Failed to close SSH connection after SFTP error: {}", close_err);
                }
                return Err(e);
            }
        };

        Ok(Self { handle, sftp })
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, ToolError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ToolError::Exec(format!("Failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| ToolError::Exec(format!("Failed to execute command: {}", e)))?;

        let mut output = CommandOutput::default();

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    output.stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == STDERR_EXT {
                        output.stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    output.exit_code = Some(exit_status);
                }
                Some(ChannelMsg::Eof) => {
                    // The exit status may still follow EOF
                    if output.exit_code.is_some() {
                        break;
                    }
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }

        let _ = channel.close().await;
        Ok(output)
    }
}

async fn open_sftp(handle: &Handle<Client>) -> Result<SftpSession> {
    let channel = handle
        .channel_open_session()
        .await
        .context("Failed to open SFTP channel")?;

    channel
        .request_subsystem(true, "sftp")
        .await
        .context("Failed to request SFTP subsystem")?;

    SftpSession::new(channel.into_stream())
        .await
        .context("Failed to start SFTP session")
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&self, command: &str) -> Result<String, ToolError> {
        let output = self.run_command(command).await?;
        tracing::debug!(
            "Command finished with {:?} ({} bytes stdout, {} bytes stderr)",
            output.exit_code,
            output.stdout.len(),
            output.stderr.len()
        );
        Ok(output.render())
    }

    async fn upload(&self, local_path: &str, remote_path: &str) -> Result<(), ToolError> {
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| ToolError::Upload(format!("{}: {}", local_path, e)))?;

        let mut file = self
            .sftp
            .create(remote_path)
            .await
            .map_err(|e| ToolError::Upload(format!("{}: {}", remote_path, e)))?;

        file.write_all(&data)
            .await
            .map_err(|e| ToolError::Upload(format!("{}: {}", remote_path, e)))?;
        file.shutdown()
            .await
            .map_err(|e| ToolError::Upload(format!("{}: {}", remote_path, e)))?;

        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &str) -> Result<(), ToolError> {
        let mut remote = self
            .sftp
            .open(remote_path)
            .await
            .map_err(|e| ToolError::Download(format!("{}: {}", remote_path, e)))?;

        let mut local = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| ToolError::Download(format!("{}: {}", local_path, e)))?;

        tokio::io::copy(&mut remote, &mut local)
            .await
            .map_err(|e| ToolError::Download(format!("{}: {}", remote_path, e)))?;
        local
            .flush()
            .await
            .map_err(|e| ToolError::Download(format!("{}: {}", local_path, e)))?;

        Ok(())
    }

    async fn close(&self) -> Result<(), ToolError> {
        let sftp_result = self.sftp.close().await;
        let ssh_result = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;

        if let Err(e) = sftp_result {
            return Err(ToolError::Disconnect(format!("SFTP: {}", e)));
        }
        ssh_result.map_err(|e| ToolError::Disconnect(format!("SSH: {}", e)))
    }
}

/// Connector that opens real SSH sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, config: &SshConfig) -> Result<Arc<dyn RemoteSession>, ToolError> {
        tracing::info!(
            "Connecting to {}@{}:{}",
            config.username,
            config.host,
            config.port
        );

        match tokio::time::timeout(CONNECT_TIMEOUT, SshSession::connect(config)).await {
            Ok(Ok(session)) => Ok(Arc::new(session)),
            Ok(Err(e)) => Err(ToolError::Connect(format!("{:#}", e))),
            Err(_) => Err(ToolError::Connect(format!(
                "Timed out after {:?} waiting for {}:{}",
                CONNECT_TIMEOUT, config.host, config.port
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(stdout: &str, stderr: &str, exit_code: Option<u32>) -> CommandOutput {
        CommandOutput {
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
            exit_code,
        }
    }

    #[test]
    fn test_successful_command_returns_stdout_only() {
        assert_eq!(output("hi\n", "", Some(0)).render(), "hi\n");
    }

    #[test]
    fn test_failure_with_stderr_is_composite() {
        let text = output("partial", "boom", Some(1)).render();
        assert_eq!(
            text,
            "Exit code: 1\n\nError output:\nboom\n\nStandard output:\npartial"
        );

        let code = text.find("Exit code: 1").unwrap();
        let err = text.find("boom").unwrap();
        let out = text.find("partial").unwrap();
        assert!(code < err && err < out);
    }

    #[test]
    fn test_failure_without_stderr_returns_stdout() {
        assert_eq!(output("out", "", Some(2)).render(), "out");
    }

    #[test]
    fn test_stderr_on_success_is_ignored() {
        assert_eq!(output("ok\n", "warning", Some(0)).render(), "ok\n");
    }

    #[test]
    fn test_missing_exit_status_counts_as_failure() {
        let text = output("", "killed", None).render();
        assert!(text.starts_with("Exit code: unknown"));
        assert!(text.contains("killed"));
    }

    #[test]
    fn test_empty_stdout_section_still_present() {
        let text = output("", "boom", Some(1)).render();
        assert!(text.ends_with("Standard output:\n"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = SshConfig {
            host: "h".into(),
            port: 22,
            username: "u".into(),
            password: "hunter2".into(),
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
