//! Remote side of the RSCP tools
//!
//! - [`protocol`]: the legacy remote-copy wire format (control records and acknowledgements)
//! - [`channel`]: the [`CommandChannel`] abstraction over "start a command, get its pipes"
//! - [`ssh`]: [`SshChannel`], running the peer through an openssh master connection
//! - [`error`]: the [`Error`] returned by every transfer operation

pub mod channel;
pub mod error;
pub mod protocol;
pub mod ssh;

pub use channel::{BoxedRead, BoxedWrite, CommandChannel, CommandSession, RemoteCommand};
pub use error::{Error, Result};
pub use ssh::{CredentialContext, SshChannel, SshSession};
