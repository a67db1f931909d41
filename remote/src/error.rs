/// Failure of a single file transfer.
///
/// Every variant is fatal: the current file is aborted and so is the rest of the queue.
///
/// # Logging Convention
/// The Display implementation includes the source chain, log with `{}` or `{:#}`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session establishment failure, broken pipe or unexpected remote command exit.
    #[error("transport error: {0:#}")]
    Transport(anyhow::Error),
    /// Opening, creating, reading or writing the local file failed.
    #[error("local I/O error on {path:?}: {source}")]
    LocalIo {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The peer sent something the protocol does not allow at this point.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A control record could not be serialized; nothing was transmitted.
    #[error("encoding error: {0}")]
    Encoding(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn transport(error: impl Into<anyhow::Error>) -> Self {
        Error::Transport(error.into())
    }

    pub fn local_io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Error::LocalIo {
            path: path.into(),
            source,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Error::Encoding(message.into())
    }

    /// Maps an I/O failure on the command pipes, end-of-stream included.
    pub fn pipe(context: &str, source: std::io::Error) -> Self {
        Error::Transport(anyhow::Error::new(source).context(context.to_string()))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}
