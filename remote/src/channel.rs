//! Command channels: the seam between the transfer engines and whatever runs the peer.
//!
//! A [`CommandChannel`] starts one [`RemoteCommand`] and hands back a [`CommandSession`]:
//! the command's input (where we write), its output (where we read) and a completion future
//! that resolves once the command exits.

use crate::error::Result;
use crate::ssh::SshSession;

pub type BoxedWrite = Box<dyn tokio::io::AsyncWrite + Send + Unpin>;
pub type BoxedRead = Box<dyn tokio::io::AsyncRead + Send + Unpin>;

/// The commands an scp peer understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// `scp -t <path>`: the peer receives a file and stores it at `path`.
    Sink { path: String },
    /// `scp -f <path>`: the peer sends the file found at `path`.
    Source { path: String },
    /// `ls -al <path>`: long listing of a remote directory.
    List { path: String },
}

impl RemoteCommand {
    pub fn program(&self) -> &'static str {
        match self {
            RemoteCommand::Sink { .. } | RemoteCommand::Source { .. } => "scp",
            RemoteCommand::List { .. } => "ls",
        }
    }

    pub fn args(&self) -> [&str; 2] {
        match self {
            RemoteCommand::Sink { path } => ["-t", path],
            RemoteCommand::Source { path } => ["-f", path],
            RemoteCommand::List { path } => ["-al", path],
        }
    }

    pub fn path(&self) -> &str {
        match self {
            RemoteCommand::Sink { path }
            | RemoteCommand::Source { path }
            | RemoteCommand::List { path } => path,
        }
    }
}

impl std::fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [flag, path] = self.args();
        write!(f, "{} {} {}", self.program(), flag, path)
    }
}

/// A started remote command.
///
/// `completion` resolves with `Ok(())` when the command exits successfully and with a
/// transport error otherwise. Dropping it abandons the wait.
pub struct CommandSession {
    pub input: BoxedWrite,
    pub output: BoxedRead,
    pub completion: futures::future::BoxFuture<'static, Result<()>>,
}

impl std::fmt::Debug for CommandSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSession").finish_non_exhaustive()
    }
}

/// Something able to start scp peers.
///
/// The underlying connection belongs to the channel; each call only opens a new command with
/// its own pipes.
pub trait CommandChannel: Send + Sync {
    fn start(
        &self,
        target: &SshSession,
        command: RemoteCommand,
    ) -> impl std::future::Future<Output = Result<CommandSession>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_lines() {
        let sink = RemoteCommand::Sink {
            path: "/tmp/out.bin".to_string(),
        };
        assert_eq!(sink.to_string(), "scp -t /tmp/out.bin");
        let source = RemoteCommand::Source {
            path: "data/in.bin".to_string(),
        };
        assert_eq!(source.to_string(), "scp -f data/in.bin");
        let list = RemoteCommand::List {
            path: "/var/log".to_string(),
        };
        assert_eq!(list.program(), "ls");
        assert_eq!(list.to_string(), "ls -al /var/log");
        assert_eq!(list.path(), "/var/log");
    }
}
