//! Rate-limited file copy over the legacy scp protocol - `rscp`
//!
//! `rscp` moves single files between the local host and a remote host by running the stock
//! `scp` program on the remote side in its sink (`scp -t`) or source (`scp -f`) mode and
//! speaking the remote-copy control protocol over the command's pipes. No helper daemon is
//! deployed; anything with `scp` installed is a valid peer.
//!
//! # Usage
//!
//! ```bash
//! # Upload, throttled to 1 MiB/s
//! rscp --limit 1MiB ./backup.tar user@host:/srv/backups/
//!
//! # Download into the current directory with a progress bar
//! rscp --progress host:/var/log/syslog .
//!
//! # Several files, one after another
//! rscp a.txt b.txt host:/tmp/
//!
//! # Remote directory listing
//! rscp --ls host:/srv/backups
//! ```
//!
//! # Transfer Model
//!
//! Each file gets its own remote command on a cached SSH connection. The byte exchange runs
//! in a background task while the caller waits for the remote command to exit; both must
//! succeed for the file to count as transferred. The first failure aborts the remaining files.
//!
//! ## Push
//!
//! 1. stat the local file and announce it with `C0644 <size> <name>\n`
//! 2. stream exactly `size` bytes through the rate limiter
//! 3. send the `0x00` terminator and wait for the remote to exit
//!
//! ## Pull
//!
//! 1. send the `0x00` readiness byte and create the local file
//! 2. read the control record and acknowledge it
//! 3. read exactly `size` bytes, the terminator, and send the final acknowledgement
//!
//! A stream that ends before `size` bytes arrived is answered with a fatal acknowledgement.
//!
//! # Modules
//!
//! - [`engine`]: [`TransferEngine`], the per-file session handling and sequential queue
//! - [`push`] / [`pull`]: the two protocol state machines
//! - [`path`]: command line location parsing and validation
//! - [`loopback`]: in-process scp peer used in place of SSH

pub mod engine;
pub mod loopback;
pub mod path;
pub mod pull;
pub mod push;

pub use engine::{Direction, Summary, TransferEngine, TransferSpec};
pub use loopback::LoopbackChannel;
pub use pull::PullEngine;
pub use push::PushEngine;
