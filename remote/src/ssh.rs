//! SSH transport: starts scp peers on a remote host through an openssh master connection.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tracing::instrument;

use crate::channel::{CommandChannel, CommandSession, RemoteCommand};
use crate::error::{Error, Result};

/// Remote host as written on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SshSession {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl SshSession {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            user: None,
            host: host.into(),
            port: None,
        }
    }

    /// `ssh://` destination understood by openssh.
    pub fn destination(&self) -> String {
        let host = self.host.as_str();
        match (self.user.as_deref(), self.port) {
            (Some(user), Some(port)) => format!("ssh://{user}@{host}:{port}"),
            (None, Some(port)) => format!("ssh://{host}:{port}"),
            (Some(user), None) => format!("ssh://{user}@{host}"),
            (None, None) => format!("ssh://{host}"),
        }
    }
}

impl std::fmt::Display for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// Connection defaults and the per-host session cache.
///
/// Authentication is left to ssh: the master connection prompts for a password or key
/// passphrase once per host, later commands to the same host reuse it.
#[derive(Debug, Default)]
pub struct CredentialContext {
    pub default_user: Option<String>,
    pub default_port: Option<u16>,
    pub identity: Option<std::path::PathBuf>,
    pub connect_timeout: Option<std::time::Duration>,
    sessions: tokio::sync::Mutex<HashMap<SshSession, Arc<openssh::Session>>>,
}

impl CredentialContext {
    pub fn new(
        default_user: Option<String>,
        default_port: Option<u16>,
        identity: Option<std::path::PathBuf>,
        connect_timeout: Option<std::time::Duration>,
    ) -> Self {
        Self {
            default_user,
            default_port,
            identity,
            connect_timeout,
            sessions: Default::default(),
        }
    }

    /// Fills in user and port from the defaults when the location did not name them.
    pub fn resolve(&self, target: &SshSession) -> SshSession {
        SshSession {
            user: target.user.clone().or_else(|| self.default_user.clone()),
            host: target.host.clone(),
            port: target.port.or(self.default_port),
        }
    }

    #[instrument(skip(self))]
    pub async fn session(&self, target: &SshSession) -> Result<Arc<openssh::Session>> {
        let target = self.resolve(target);
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&target) {
            tracing::debug!("Reusing SSH session to {}", target);
            return Ok(session.clone());
        }
        let mut builder = openssh::SessionBuilder::default();
        builder.known_hosts_check(openssh::KnownHosts::Add);
        if let Some(user) = &target.user {
            builder.user(user.clone());
        }
        if let Some(port) = target.port {
            builder.port(port);
        }
        if let Some(identity) = &self.identity {
            builder.keyfile(identity);
        }
        if let Some(timeout) = self.connect_timeout {
            builder.connect_timeout(timeout);
        }
        tracing::debug!("Connecting to SSH destination: {}", target.destination());
        let session = Arc::new(
            builder
                .connect(&target.host)
                .await
                .with_context(|| format!("Failed to establish SSH connection to {target}"))
                .map_err(Error::transport)?,
        );
        sessions.insert(target, session.clone());
        Ok(session)
    }
}

/// Runs scp peers on remote hosts, one fresh remote process per command.
#[derive(Debug, Clone)]
pub struct SshChannel {
    credentials: Arc<CredentialContext>,
}

impl SshChannel {
    pub fn new(credentials: Arc<CredentialContext>) -> Self {
        Self { credentials }
    }
}

async fn wait_for_exit(
    command: String,
    child: openssh::Child<Arc<openssh::Session>>,
    mut stderr: openssh::ChildStderr,
) -> Result<()> {
    let stderr_fut = async {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        buf
    };
    let (stderr_data, status) = tokio::join!(stderr_fut, child.wait());
    let status = status
        .with_context(|| format!("Failed to wait for '{command}' completion"))
        .map_err(Error::transport)?;
    let stderr = String::from_utf8_lossy(&stderr_data);
    if !status.success() {
        return Err(Error::transport(anyhow::anyhow!(
            "'{}' failed on remote host, status code: {:?}, stderr: {}",
            command,
            status.code(),
            stderr.trim_end()
        )));
    }
    if !stderr.is_empty() {
        tracing::debug!("'{}' stderr: {}", command, stderr.trim_end());
    }
    Ok(())
}

impl CommandChannel for SshChannel {
    #[instrument(skip(self))]
    async fn start(&self, target: &SshSession, command: RemoteCommand) -> Result<CommandSession> {
        let session = self.credentials.session(target).await?;
        tracing::info!("Starting '{}' on {}", command, target);
        let mut cmd = session.arc_command(command.program());
        cmd.args(command.args())
            .stdin(openssh::Stdio::piped())
            .stdout(openssh::Stdio::piped())
            .stderr(openssh::Stdio::piped());
        let mut child = cmd
            .spawn()
            .await
            .with_context(|| format!("Failed to spawn '{command}'"))
            .map_err(Error::transport)?;
        let input = child
            .stdin()
            .take()
            .context("failed to get stdin for remote command")
            .map_err(Error::transport)?;
        let output = child
            .stdout()
            .take()
            .context("failed to get stdout for remote command")
            .map_err(Error::transport)?;
        let stderr = child
            .stderr()
            .take()
            .context("failed to get stderr for remote command")
            .map_err(Error::transport)?;
        Ok(CommandSession {
            input: Box::new(input),
            output: Box::new(output),
            completion: Box::pin(wait_for_exit(command.to_string(), child, stderr)),
        })
    }
}
