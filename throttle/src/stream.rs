use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::RateLimiter;

/// Rate limited byte sink / byte source.
///
/// Wraps a writer or a reader and paces the bytes passing through it with a [`RateLimiter`].
#[derive(Debug)]
pub struct Throttled<T> {
    inner: T,
    limiter: RateLimiter,
    delay: Option<Pin<Box<tokio::time::Sleep>>>,
}

impl<T> Throttled<T> {
    pub fn new(inner: T, limiter: RateLimiter) -> Self {
        Self {
            inner,
            limiter,
            delay: None,
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn poll_delay(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if let Some(delay) = self.delay.as_mut() {
            ready!(delay.as_mut().poll(cx));
            self.delay = None;
        }
        Poll::Ready(())
    }

    fn account(&mut self, bytes: usize) {
        if let Some(wait) = self.limiter.record(bytes) {
            tracing::trace!("throttling for {:?} after {} bytes", wait, bytes);
            self.delay = Some(Box::pin(tokio::time::sleep(wait)));
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for Throttled<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_delay(cx));
        let len = buf.len().min(this.limiter.chunk_limit());
        let written = ready!(Pin::new(&mut this.inner).poll_write(cx, &buf[..len]))?;
        this.account(written);
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_delay(cx));
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_delay(cx));
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for Throttled<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_delay(cx));
        let len = this.limiter.chunk_limit();
        let filled = if buf.remaining() <= len {
            let before = buf.filled().len();
            ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
            buf.filled().len() - before
        } else {
            let filled = {
                let mut limited = ReadBuf::new(buf.initialize_unfilled_to(len));
                ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;
                limited.filled().len()
            };
            buf.advance(filled);
            filled
        };
        this.account(filled);
        Poll::Ready(Ok(()))
    }
}
