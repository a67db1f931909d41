//! In-process scp peer.
//!
//! [`LoopbackChannel`] answers `scp -t`, `scp -f` and `ls -al` from a background task talking
//! over in-memory pipes, serving files below a local root directory. Useful for exercising the
//! engines without an SSH server.

use std::path::PathBuf;

use anyhow::{Context, anyhow, bail};
use remote::protocol::{Ack, ControlRecord, NUL};
use remote::{CommandChannel, CommandSession, Error, RemoteCommand, Result, SshSession};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct LoopbackChannel {
    root: PathBuf,
}

impl LoopbackChannel {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Remote paths, absolute or not, are taken relative to the root.
    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl CommandChannel for LoopbackChannel {
    async fn start(&self, target: &SshSession, command: RemoteCommand) -> Result<CommandSession> {
        tracing::debug!("loopback '{}' for {}", command, target);
        let (local, peer) = tokio::io::duplex(PIPE_CAPACITY);
        let (output, input) = tokio::io::split(local);
        let (peer_input, peer_output) = tokio::io::split(peer);
        let path = self.resolve(command.path());
        let command_line = command.to_string();
        let peer = tokio::spawn(async move {
            match command {
                RemoteCommand::Sink { .. } => sink(path, peer_input, peer_output).await,
                RemoteCommand::Source { .. } => source(path, peer_input, peer_output).await,
                RemoteCommand::List { .. } => list(path, peer_output).await,
            }
        });
        let completion = async move {
            peer.await
                .map_err(|error| {
                    Error::transport(anyhow::Error::new(error).context("loopback peer panicked"))
                })?
                .map_err(|error| Error::transport(error.context(format!("'{command_line}' failed"))))
        };
        Ok(CommandSession {
            input: Box::new(input),
            output: Box::new(output),
            completion: Box::pin(completion),
        })
    }
}

async fn reply<W: AsyncWrite + Unpin>(output: &mut W, ack: Ack) -> anyhow::Result<()> {
    output.write_all(&ack.encode()).await?;
    output.flush().await?;
    Ok(())
}

async fn expect_ok<R: AsyncRead + Unpin>(input: &mut BufReader<R>) -> anyhow::Result<()> {
    match Ack::read(input).await? {
        Ack::Ok => Ok(()),
        other => Err(anyhow!("peer replied {other:?}")),
    }
}

/// `scp -t`: receives any number of files into `target`.
async fn sink<R, W>(target: PathBuf, input: R, mut output: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut input = BufReader::new(input);
    reply(&mut output, Ack::Ok).await?;
    loop {
        let mut line = Vec::new();
        if input.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        let record = match ControlRecord::decode(&line) {
            Ok(record) => record,
            Err(error) => {
                reply(&mut output, Ack::Fatal(format!("scp: {error}"))).await?;
                bail!(error);
            }
        };
        let is_dir = tokio::fs::metadata(&target)
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false);
        let destination = if is_dir {
            target.join(&record.name)
        } else {
            target.clone()
        };
        let mut file = match tokio::fs::File::create(&destination).await {
            Ok(file) => file,
            Err(error) => {
                let message = format!("scp: {}: {}", destination.display(), error);
                reply(&mut output, Ack::Fatal(message.clone())).await?;
                bail!(message);
            }
        };
        reply(&mut output, Ack::Ok).await?;
        let copied = tokio::io::copy(&mut (&mut input).take(record.size), &mut file).await?;
        if copied != record.size {
            bail!("expected {} bytes, got {}", record.size, copied);
        }
        file.flush().await?;
        expect_ok(&mut input)
            .await
            .context("missing payload terminator")?;
        reply(&mut output, Ack::Ok).await?;
    }
}

/// `scp -f`: sends the single file at `path`.
async fn source<R, W>(path: PathBuf, input: R, mut output: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut input = BufReader::new(input);
    expect_ok(&mut input).await.context("missing readiness signal")?;
    let opened = match tokio::fs::File::open(&path).await {
        Ok(file) => file.metadata().await.map(|metadata| (file, metadata)),
        Err(error) => Err(error),
    };
    let (mut file, metadata) = match opened {
        Ok((file, metadata)) if metadata.is_file() => (file, metadata),
        Ok(_) => {
            let message = format!("scp: {}: not a regular file", path.display());
            reply(&mut output, Ack::Warning(message.clone())).await?;
            bail!(message);
        }
        Err(error) => {
            let message = format!("scp: {}: {}", path.display(), error);
            reply(&mut output, Ack::Warning(message.clone())).await?;
            bail!(message);
        }
    };
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .context("source path has no file name")?;
    output
        .write_all(&ControlRecord::new(name, metadata.len()).encode()?)
        .await?;
    output.flush().await?;
    expect_ok(&mut input).await.context("control record rejected")?;
    tokio::io::copy(&mut file, &mut output).await?;
    reply(&mut output, Ack::Ok).await?;
    expect_ok(&mut input).await.context("payload rejected")?;
    Ok(())
}

/// `ls -al`: one line per directory entry, sorted by name.
async fn list<W: AsyncWrite + Unpin>(path: PathBuf, mut output: W) -> anyhow::Result<()> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(&path)
        .await
        .with_context(|| format!("ls: cannot access {}", path.display()))?;
    while let Some(entry) = dir.next_entry().await? {
        let metadata = entry.metadata().await?;
        let kind = if metadata.is_dir() { 'd' } else { '-' };
        entries.push((
            entry.file_name().to_string_lossy().to_string(),
            kind,
            metadata.len(),
        ));
    }
    entries.sort();
    output
        .write_all(format!("total {}\n", entries.len()).as_bytes())
        .await?;
    for (name, kind, size) in entries {
        output
            .write_all(format!("{kind} {size:>12} {name}\n").as_bytes())
            .await?;
    }
    output.shutdown().await?;
    Ok(())
}
