//! Upload: local file to `scp -t` peer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use remote::protocol::{Ack, ControlRecord, NUL};
use remote::{BoxedRead, BoxedWrite, Error, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

/// A local file opened and announced, ready to be streamed.
#[derive(Debug)]
pub struct PreparedPush {
    path: PathBuf,
    file: tokio::fs::File,
    record: ControlRecord,
}

impl PreparedPush {
    pub fn record(&self) -> &ControlRecord {
        &self.record
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PushEngine {
    config: common::TransferConfig,
}

impl PushEngine {
    pub fn new(config: common::TransferConfig) -> Self {
        Self { config }
    }

    /// Opens and stats the local file and builds its control record.
    ///
    /// Runs before any remote command is started so a missing file never reaches the peer.
    #[instrument]
    pub async fn prepare(local_path: &Path) -> Result<PreparedPush> {
        let file = tokio::fs::File::open(local_path)
            .await
            .map_err(|error| Error::local_io(local_path, error))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|error| Error::local_io(local_path, error))?;
        if !metadata.is_file() {
            return Err(Error::local_io(
                local_path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        let name = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::encoding(format!("{local_path:?} has no UTF-8 file name to announce"))
            })?;
        let record = ControlRecord::new(name, metadata.len());
        // fail here rather than after the remote command started
        record.encode()?;
        Ok(PreparedPush {
            path: local_path.to_path_buf(),
            file,
            record,
        })
    }

    /// Sends the record, the payload and the terminator while draining the peer's replies.
    ///
    /// The peer's exit status is checked by the caller; a fatal reply seen here takes
    /// precedence because it carries the peer's own message.
    #[instrument(skip(self, prepared, input, output), fields(path = ?prepared.path))]
    pub async fn exchange(
        self,
        prepared: PreparedPush,
        rate_limit: u64,
        mut input: BoxedWrite,
        output: BoxedRead,
    ) -> Result<common::Report> {
        let tracker = Arc::new(common::ProgressTracker::new(
            prepared.record.name.clone(),
            prepared.record.size,
            self.config.progress,
        ));
        let send = self.send(prepared, rate_limit, &mut input, &tracker);
        let (sent, drained) = tokio::join!(send, drain_acks(output));
        let outcome = match (sent, drained) {
            (_, Err(error)) if error.is_protocol() => Err(error),
            (Err(error), _) => Err(error),
            (Ok(()), Err(error)) => Err(error),
            (Ok(()), Ok(())) => Ok(()),
        };
        match outcome {
            Ok(()) => Ok(tracker.finish()),
            Err(error) => {
                tracker.abandon();
                Err(error)
            }
        }
    }

    async fn send(
        &self,
        prepared: PreparedPush,
        rate_limit: u64,
        input: &mut BoxedWrite,
        tracker: &Arc<common::ProgressTracker>,
    ) -> Result<()> {
        let PreparedPush {
            path,
            mut file,
            record,
        } = prepared;
        input
            .write_all(&record.encode()?)
            .await
            .map_err(|error| Error::pipe("failed writing control record", error))?;
        tracing::debug!("sent control record {}", record);
        if record.size > 0 {
            let mut sink = common::Observed::new(
                throttle::Throttled::new(&mut *input, throttle::RateLimiter::new(rate_limit)),
                tracker.clone(),
            );
            let mut buffer = vec![0u8; self.config.buffer_size];
            let mut remaining = record.size;
            while remaining > 0 {
                let want = buffer
                    .len()
                    .min(usize::try_from(remaining).unwrap_or(usize::MAX));
                let read = file
                    .read(&mut buffer[..want])
                    .await
                    .map_err(|error| Error::local_io(&path, error))?;
                if read == 0 {
                    return Err(Error::local_io(
                        &path,
                        std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!(
                                "file shrank during transfer, {remaining} of {} bytes missing",
                                record.size
                            ),
                        ),
                    ));
                }
                sink.write_all(&buffer[..read])
                    .await
                    .map_err(|error| Error::pipe("failed streaming file data", error))?;
                remaining -= read as u64;
            }
            // waits out the last throttling delay
            sink.flush()
                .await
                .map_err(|error| Error::pipe("failed streaming file data", error))?;
        }
        input
            .write_all(&[NUL])
            .await
            .map_err(|error| Error::pipe("failed writing payload terminator", error))?;
        input
            .shutdown()
            .await
            .map_err(|error| Error::pipe("failed closing remote input", error))?;
        tracing::debug!("sent {} bytes and terminator", record.size);
        Ok(())
    }
}

/// Reads the sink peer's acknowledgements until it closes its output.
async fn drain_acks(output: BoxedRead) -> Result<()> {
    let mut output = tokio::io::BufReader::new(output);
    while let Some(ack) = Ack::read_next(&mut output).await? {
        match ack {
            Ack::Ok => tracing::trace!("peer acknowledged"),
            Ack::Warning(message) => tracing::warn!("remote: {}", message),
            Ack::Fatal(message) => {
                return Err(Error::protocol(format!("remote reported: {message}")));
            }
        }
    }
    Ok(())
}
