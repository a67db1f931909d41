//! Download: `scp -f` peer to local file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use remote::protocol::{Ack, Announcement, NUL, read_announcement};
use remote::{BoxedRead, BoxedWrite, Error, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

#[derive(Debug, Clone, Copy)]
pub struct PullEngine {
    config: common::TransferConfig,
}

async fn send_byte(input: &mut BoxedWrite, byte: u8, context: &str) -> Result<()> {
    input
        .write_all(&[byte])
        .await
        .map_err(|error| Error::pipe(context, error))?;
    input
        .flush()
        .await
        .map_err(|error| Error::pipe(context, error))
}

impl PullEngine {
    pub fn new(config: common::TransferConfig) -> Self {
        Self { config }
    }

    /// Receives one file from a source peer into `local_path`.
    ///
    /// The local file is created right after the readiness byte went out and is left in place
    /// (possibly partial) when the transfer fails.
    #[instrument(skip(self, input, output))]
    pub async fn exchange(
        self,
        local_path: PathBuf,
        rate_limit: u64,
        mut input: BoxedWrite,
        output: BoxedRead,
    ) -> Result<common::Report> {
        let mut output = tokio::io::BufReader::with_capacity(self.config.buffer_size, output);
        send_byte(&mut input, NUL, "failed sending readiness signal").await?;
        let mut file = tokio::fs::File::create(&local_path)
            .await
            .map_err(|error| Error::local_io(&local_path, error))?;
        let mut last_warning = None;
        let record = loop {
            match read_announcement(&mut output).await? {
                Some(Announcement::Record(record)) => break record,
                Some(Announcement::Warning(message)) => {
                    tracing::warn!("remote: {}", message);
                    last_warning = Some(message);
                }
                Some(Announcement::Fatal(message)) => {
                    return Err(Error::protocol(format!("remote reported: {message}")));
                }
                // scp answers a missing file with a warning and closes the stream
                None => {
                    return Err(Error::protocol(match last_warning {
                        Some(message) => format!("remote reported: {message}"),
                        None => "stream ended before a control record was received".to_string(),
                    }));
                }
            }
        };
        tracing::debug!("received control record {}", record);
        let tracker = Arc::new(common::ProgressTracker::new(
            record.name.clone(),
            record.size,
            self.config.progress,
        ));
        let received = self
            .receive(
                &local_path,
                &mut file,
                record.size,
                rate_limit,
                &mut input,
                &mut output,
                &tracker,
            )
            .await;
        match received {
            Ok(()) => Ok(tracker.finish()),
            Err(error) => {
                tracker.abandon();
                Err(error)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn receive(
        &self,
        local_path: &Path,
        file: &mut tokio::fs::File,
        size: u64,
        rate_limit: u64,
        input: &mut BoxedWrite,
        output: &mut tokio::io::BufReader<BoxedRead>,
        tracker: &Arc<common::ProgressTracker>,
    ) -> Result<()> {
        send_byte(input, NUL, "failed acknowledging control record").await?;
        {
            let mut source = common::Observed::new(
                throttle::Throttled::new(
                    (&mut *output).take(size),
                    throttle::RateLimiter::new(rate_limit),
                ),
                tracker.clone(),
            );
            let mut buffer = vec![0u8; self.config.buffer_size];
            let mut remaining = size;
            while remaining > 0 {
                let read = source
                    .read(&mut buffer)
                    .await
                    .map_err(|error| Error::pipe("failed receiving file data", error))?;
                if read == 0 {
                    let message = format!(
                        "stream ended after {} of {} bytes",
                        size - remaining,
                        size
                    );
                    // the peer may already be gone, the error below is what matters
                    if let Err(error) = input.write_all(&Ack::Fatal(message.clone()).encode()).await
                    {
                        tracing::debug!("failed sending fatal acknowledgement: {}", error);
                    }
                    return Err(Error::protocol(message));
                }
                file.write_all(&buffer[..read])
                    .await
                    .map_err(|error| Error::local_io(local_path, error))?;
                remaining -= read as u64;
            }
        }
        file.flush()
            .await
            .map_err(|error| Error::local_io(local_path, error))?;
        match Ack::read(output).await? {
            Ack::Ok => {}
            Ack::Warning(message) => tracing::warn!("remote: {}", message),
            Ack::Fatal(message) => {
                return Err(Error::protocol(format!("remote reported: {message}")));
            }
        }
        send_byte(input, NUL, "failed sending final acknowledgement").await?;
        input
            .shutdown()
            .await
            .map_err(|error| Error::pipe("failed closing remote input", error))?;
        tracing::debug!("received {} bytes and terminator", size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn engine() -> PullEngine {
        PullEngine::new(common::TransferConfig::default())
    }

    #[tokio::test]
    async fn receives_payload() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.txt");
        let output: BoxedRead = Box::new(&b"C0644 5 hello.txt\nhello\x00"[..]);
        let report = engine()
            .exchange(path.clone(), 0, Box::new(tokio::io::sink()), output)
            .await?;
        assert_eq!(report.total_bytes, 5);
        assert_eq!(tokio::fs::read(&path).await?, b"hello");
        Ok(())
    }

    #[tokio::test]
    async fn warning_instead_of_record() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output: BoxedRead = Box::new(&b"\x01scp: missing.txt: No such file or directory\n"[..]);
        let error = engine()
            .exchange(dir.path().join("x"), 0, Box::new(tokio::io::sink()), output)
            .await
            .unwrap_err();
        assert!(error.is_protocol());
        assert!(error.to_string().contains("No such file"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_terminator() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output: BoxedRead = Box::new(&b"C0644 2 ab\nab"[..]);
        let error = engine()
            .exchange(dir.path().join("ab"), 0, Box::new(tokio::io::sink()), output)
            .await
            .unwrap_err();
        assert!(error.is_protocol());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn warning_before_record_is_logged() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("hello.txt");
        let output: BoxedRead = Box::new(&b"\x01note: something\nC0644 5 hello.txt\nhello\x00"[..]);
        let report = engine()
            .exchange(path.clone(), 0, Box::new(tokio::io::sink()), output)
            .await?;
        assert_eq!(report.total_bytes, 5);
        assert_eq!(tokio::fs::read(&path).await?, b"hello");
        assert!(logs_contain("note: something"));
        Ok(())
    }

    #[tokio::test]
    async fn fatal_instead_of_record() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output: BoxedRead = Box::new(&b"\x01note\n\x02scp: a.txt: Permission denied\n"[..]);
        let error = engine()
            .exchange(dir.path().join("a.txt"), 0, Box::new(tokio::io::sink()), output)
            .await
            .unwrap_err();
        assert!(error.is_protocol());
        assert!(error.to_string().contains("Permission denied"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_stream_instead_of_record() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output: BoxedRead = Box::new(&b""[..]);
        let error = engine()
            .exchange(dir.path().join("x"), 0, Box::new(tokio::io::sink()), output)
            .await
            .unwrap_err();
        assert!(error.is_protocol());
        assert!(error.to_string().contains("before a control record"));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn warning_terminator_is_logged() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ab");
        let output: BoxedRead = Box::new(&b"C0644 2 ab\nab\x01clock skew detected\n"[..]);
        let report = engine()
            .exchange(path.clone(), 0, Box::new(tokio::io::sink()), output)
            .await?;
        assert_eq!(report.total_bytes, 2);
        assert_eq!(tokio::fs::read(&path).await?, b"ab");
        assert!(logs_contain("clock skew detected"));
        Ok(())
    }

    #[tokio::test]
    async fn fatal_terminator() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output: BoxedRead = Box::new(&b"C0644 2 ab\nab\x02read error on source\n"[..]);
        let error = engine()
            .exchange(dir.path().join("ab"), 0, Box::new(tokio::io::sink()), output)
            .await
            .unwrap_err();
        assert!(error.is_protocol());
        assert!(error.to_string().contains("read error on source"));
        Ok(())
    }

    #[tokio::test]
    async fn terminator_message_cut_short() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output: BoxedRead = Box::new(&b"C0644 2 ab\nab\x01clock sk"[..]);
        let error = engine()
            .exchange(dir.path().join("ab"), 0, Box::new(tokio::io::sink()), output)
            .await
            .unwrap_err();
        assert!(error.is_protocol());
        Ok(())
    }
}
