//! Per-file orchestration: one remote command per file, files strictly one after another.

use std::path::PathBuf;

use remote::{
    BoxedRead, BoxedWrite, CommandChannel, CommandSession, Error, RemoteCommand, Result,
    SshSession,
};
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::pull::PullEngine;
use crate::push::PushEngine;

// how long a failed remote command gets to let the exchange report a more precise error
const EXIT_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Upload, local to remote.
    Push,
    /// Download, remote to local.
    Pull,
}

/// One file to move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSpec {
    pub direction: Direction,
    pub local_path: PathBuf,
    pub remote: SshSession,
    pub remote_path: String,
    /// Bytes per second, 0 = unlimited.
    pub rate_limit: u64,
}

impl std::fmt::Display for TransferSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.direction {
            Direction::Push => write!(
                f,
                "{} -> {}:{}",
                self.local_path.display(),
                self.remote,
                self.remote_path
            ),
            Direction::Pull => write!(
                f,
                "{}:{} -> {}",
                self.remote,
                self.remote_path,
                self.local_path.display()
            ),
        }
    }
}

/// Totals over all files of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Summary {
    pub files: usize,
    pub bytes: u64,
    pub elapsed: std::time::Duration,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "files: {}, {}",
            self.files,
            common::Report::new(self.bytes, self.elapsed)
        )
    }
}

fn join_failure(error: tokio::task::JoinError) -> Error {
    Error::transport(anyhow::Error::new(error).context("transfer task failed"))
}

/// Runs `exchange` over the session's pipes in a background task while waiting for the
/// remote command to exit.
///
/// Both must succeed. When the exchange fails first the wait is abandoned; when the remote
/// command fails first, a protocol error from the exchange is preferred since it carries the
/// peer's own message.
async fn run_session<T, F, Fut>(session: CommandSession, exchange: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(BoxedWrite, BoxedRead) -> Fut,
    Fut: std::future::Future<Output = Result<T>> + Send + 'static,
{
    let CommandSession {
        input,
        output,
        mut completion,
    } = session;
    let mut exchange = tokio::spawn(exchange(input, output));
    tokio::select! {
        joined = &mut exchange => {
            match joined.map_err(join_failure)? {
                Ok(value) => {
                    completion.await?;
                    Ok(value)
                }
                Err(error @ Error::Transport(_)) => {
                    // a broken pipe usually means the remote exited, its status says why
                    match tokio::time::timeout(EXIT_GRACE, completion).await {
                        Ok(Err(exit_error)) => Err(exit_error),
                        _ => Err(error),
                    }
                }
                Err(error) => Err(error),
            }
        }
        exited = &mut completion => {
            match exited {
                Ok(()) => exchange.await.map_err(join_failure)?,
                Err(exit_error) => match tokio::time::timeout(EXIT_GRACE, &mut exchange).await {
                    Ok(Ok(Err(error))) if error.is_protocol() => Err(error),
                    Ok(_) => Err(exit_error),
                    Err(_) => {
                        exchange.abort();
                        Err(exit_error)
                    }
                },
            }
        }
    }
}

/// Moves files between the local host and remote scp peers started through `channel`.
#[derive(Debug)]
pub struct TransferEngine<C> {
    channel: C,
    config: common::TransferConfig,
}

impl<C: CommandChannel> TransferEngine<C> {
    pub fn new(channel: C, config: common::TransferConfig) -> Self {
        Self { channel, config }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Transfers a single file.
    #[instrument(skip(self, spec), fields(transfer = %spec))]
    pub async fn transfer(&self, spec: &TransferSpec) -> Result<common::Report> {
        match spec.direction {
            Direction::Push => {
                let prepared = PushEngine::prepare(&spec.local_path).await?;
                let session = self
                    .channel
                    .start(
                        &spec.remote,
                        RemoteCommand::Sink {
                            path: spec.remote_path.clone(),
                        },
                    )
                    .await?;
                let engine = PushEngine::new(self.config);
                let rate_limit = spec.rate_limit;
                run_session(session, move |input, output| {
                    engine.exchange(prepared, rate_limit, input, output)
                })
                .await
            }
            Direction::Pull => {
                let session = self
                    .channel
                    .start(
                        &spec.remote,
                        RemoteCommand::Source {
                            path: spec.remote_path.clone(),
                        },
                    )
                    .await?;
                let engine = PullEngine::new(self.config);
                let local_path = spec.local_path.clone();
                let rate_limit = spec.rate_limit;
                run_session(session, move |input, output| {
                    engine.exchange(local_path, rate_limit, input, output)
                })
                .await
            }
        }
    }

    /// Transfers the files in order; the first failure aborts the rest.
    #[instrument(skip(self, specs), fields(files = specs.len()))]
    pub async fn run(&self, specs: &[TransferSpec]) -> Result<Summary> {
        let start = std::time::Instant::now();
        let mut summary = Summary::default();
        for spec in specs {
            tracing::info!("Transferring {}", spec);
            if spec.rate_limit > 0 {
                tracing::info!("Speed limited to {} bytes/sec", spec.rate_limit);
            }
            let report = self.transfer(spec).await.inspect_err(|error| {
                tracing::debug!("{} failed: {}", spec, error);
            })?;
            tracing::info!("{}: {}", spec, report);
            summary.files += 1;
            summary.bytes += report.total_bytes;
        }
        summary.elapsed = start.elapsed();
        Ok(summary)
    }

    /// Runs `ls -al path` on the remote host and copies its output to `out`.
    #[instrument(skip(self, out))]
    pub async fn list<W>(&self, target: &SshSession, path: &str, out: &mut W) -> Result<()>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        let session = self
            .channel
            .start(
                target,
                RemoteCommand::List {
                    path: path.to_string(),
                },
            )
            .await?;
        let buffer_size = self.config.buffer_size;
        let listing = run_session(session, move |mut input, output| async move {
            input
                .shutdown()
                .await
                .map_err(|error| Error::pipe("failed closing remote input", error))?;
            let mut output = tokio::io::BufReader::with_capacity(buffer_size, output);
            let mut listing = Vec::new();
            tokio::io::copy_buf(&mut output, &mut listing)
                .await
                .map_err(|error| Error::pipe("failed reading listing", error))?;
            Ok::<_, Error>(listing)
        })
        .await?;
        out.write_all(&listing)
            .await
            .map_err(|error| Error::local_io("<stdout>", error))?;
        out.flush()
            .await
            .map_err(|error| Error::local_io("<stdout>", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn session(output: &'static [u8], exit: Result<()>) -> CommandSession {
        CommandSession {
            input: Box::new(tokio::io::sink()),
            output: Box::new(output),
            completion: Box::pin(async move { exit }),
        }
    }

    #[tokio::test]
    async fn exit_failure_after_clean_exchange() {
        let result = run_session(
            session(b"", Err(Error::transport(anyhow::anyhow!("status 1")))),
            |_, _| async { Ok::<_, Error>(()) },
        )
        .await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn protocol_error_preferred_over_exit_status() {
        let result: Result<()> = run_session(
            session(b"", Err(Error::transport(anyhow::anyhow!("status 1")))),
            |_, _| async { Err::<(), _>(Error::protocol("remote reported: no space left")) },
        )
        .await;
        let error = result.unwrap_err();
        assert!(error.is_protocol());
    }

    #[tokio::test]
    async fn exit_status_explains_broken_pipe() {
        let result: Result<()> = run_session(
            session(b"", Err(Error::transport(anyhow::anyhow!("scp: exit status 1")))),
            |_, _| async {
                Err::<(), _>(Error::pipe(
                    "failed streaming file data",
                    std::io::Error::from(std::io::ErrorKind::BrokenPipe),
                ))
            },
        )
        .await;
        assert!(result.unwrap_err().to_string().contains("exit status 1"));
    }

    #[tokio::test]
    #[traced_test]
    async fn run_logs_limit_and_keeps_failures_below_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = TransferEngine::new(
            crate::LoopbackChannel::new(dir.path()),
            common::TransferConfig::default(),
        );
        let spec = TransferSpec {
            direction: Direction::Push,
            local_path: dir.path().join("missing.bin"),
            remote: SshSession::new("loopback"),
            remote_path: "/".to_string(),
            rate_limit: 4096,
        };
        let error = engine.run(&[spec]).await.unwrap_err();
        assert!(matches!(error, Error::LocalIo { .. }));
        assert!(logs_contain("Transferring"));
        assert!(logs_contain("Speed limited to 4096 bytes/sec"));
        assert!(logs_contain("failed"));
        assert!(!logs_contain("ERROR"));
        Ok(())
    }

    #[test]
    fn spec_display() {
        let spec = TransferSpec {
            direction: Direction::Pull,
            local_path: PathBuf::from("/tmp/a"),
            remote: SshSession::new("host"),
            remote_path: "/srv/a".to_string(),
            rate_limit: 0,
        };
        assert_eq!(spec.to_string(), "host:/srv/a -> /tmp/a");
    }
}
