//! Byte rate limiting for transfer streams
//!
//! This crate paces the bytes flowing through a single transfer to a configured ceiling. It
//! never drops or reorders data, it only inserts delay.
//!
//! # Overview
//!
//! - [`RateLimiter`] keeps a window of bytes accounted since the window started and computes how
//!   long the caller has to wait to stay within `bytes_per_sec`.
//! - [`Throttled`] wraps any [`tokio::io::AsyncWrite`] (byte sink) or [`tokio::io::AsyncRead`]
//!   (byte source) and applies a [`RateLimiter`] to every chunk that passes through it.
//!
//! A limit of `0` disables throttling entirely and [`Throttled`] becomes a pass-through.
//!
//! # Pacing
//!
//! After each chunk of `n` bytes the limiter compares:
//!
//! ```text
//! required = window_bytes / bytes_per_sec
//! elapsed  = now - window_start
//! ```
//!
//! and schedules a sleep of `required - elapsed` when positive. The sleep is awaited before the
//! next chunk is accepted and before a flush or shutdown completes, so the last chunk of a
//! transfer is paced as well. Single operations are capped at [`RateLimiter::chunk_limit`] so
//! that pacing stays smooth for small limits.
//!
//! # Example
//!
//! ```rust,no_run
//! use tokio::io::AsyncWriteExt;
//!
//! # async fn example() -> std::io::Result<()> {
//! let mut sink = throttle::Throttled::new(tokio::io::sink(), throttle::RateLimiter::new(64 * 1024));
//! sink.write_all(&[0u8; 256 * 1024]).await?; // takes ~4 seconds
//! sink.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod limiter;
mod stream;

pub use limiter::RateLimiter;
pub use stream::Throttled;
