use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::instrument;

use crate::config::ProgressSettings;

/// Final throughput numbers of one completed transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    pub total_bytes: u64,
    pub elapsed_seconds: f64,
    pub average_kbps: f64,
}

impl Report {
    pub fn new(total_bytes: u64, elapsed: std::time::Duration) -> Self {
        let elapsed_seconds = elapsed.as_secs_f64();
        // below a millisecond the rate is meaningless
        let average_kbps = if elapsed.as_millis() == 0 {
            0.0
        } else {
            (total_bytes as f64 / 1024.0) / elapsed_seconds
        };
        Self {
            total_bytes,
            elapsed_seconds,
            average_kbps,
        }
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} transferred in {:.2}s, average rate of {:.2} kB/s",
            bytesize::ByteSize(self.total_bytes),
            self.elapsed_seconds,
            self.average_kbps
        )
    }
}

/// Byte accounting for a single file transfer.
///
/// Counters are only ever advanced by [`Observed`] wrappers; the engine reads them once the
/// transfer is over to produce a [`Report`].
#[derive(Debug)]
pub struct ProgressTracker {
    name: String,
    transferred_bytes: AtomicU64,
    start_time: std::time::Instant,
    bar: indicatif::ProgressBar,
    settings: ProgressSettings,
}

impl ProgressTracker {
    pub fn new(name: impl Into<String>, total_bytes: u64, settings: ProgressSettings) -> Self {
        let name = name.into();
        let bar = if settings.show_bar {
            let bar = indicatif::ProgressBar::with_draw_target(
                Some(total_bytes),
                indicatif::ProgressDrawTarget::stderr(),
            );
            bar.set_style(
                indicatif::ProgressStyle::with_template(
                    "{msg} [{bar:40}] {bytes}/{total_bytes} {bytes_per_sec} eta {eta}",
                )
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
                .progress_chars("=> "),
            );
            bar.set_message(name.clone());
            bar
        } else {
            indicatif::ProgressBar::hidden()
        };
        Self {
            name,
            transferred_bytes: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
            bar,
            settings,
        }
    }

    pub fn observe(&self, bytes: u64) {
        self.transferred_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.bar.inc(bytes);
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Closes the progress display and emits the rate summary line.
    #[instrument(skip(self), fields(name = %self.name))]
    pub fn finish(&self) -> Report {
        let report = Report::new(self.transferred_bytes(), self.elapsed());
        self.bar.finish_and_clear();
        tracing::info!("{}: {}", self.name, report);
        if self.settings.print_summary {
            println!("{}: {}", self.name, report);
        }
        report
    }

    /// Closes the progress display of a failed transfer, no summary is emitted.
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// Byte sink / byte source wrapper feeding a [`ProgressTracker`].
#[derive(Debug)]
pub struct Observed<T> {
    inner: T,
    tracker: Arc<ProgressTracker>,
}

impl<T> Observed<T> {
    pub fn new(inner: T, tracker: Arc<ProgressTracker>) -> Self {
        Self { inner, tracker }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for Observed<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let written = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        this.tracker.observe(written as u64);
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for Observed<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.tracker
            .observe((buf.filled().len() - before) as u64);
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn tracker(total: u64) -> Arc<ProgressTracker> {
        Arc::new(ProgressTracker::new("test", total, ProgressSettings::default()))
    }

    #[tokio::test]
    async fn observes_writes() -> Result<()> {
        let tracker = tracker(3000);
        let mut sink = Observed::new(Vec::new(), tracker.clone());
        sink.write_all(&[0u8; 1000]).await?;
        sink.write_all(&[0u8; 2000]).await?;
        assert_eq!(tracker.transferred_bytes(), 3000);
        assert_eq!(sink.into_inner().len(), 3000);
        Ok(())
    }

    #[tokio::test]
    async fn observes_reads() -> Result<()> {
        let tracker = tracker(0);
        let data = vec![5u8; 4321];
        let mut source = Observed::new(&data[..], tracker.clone());
        let mut out = Vec::new();
        source.read_to_end(&mut out).await?;
        assert_eq!(tracker.transferred_bytes(), 4321);
        Ok(())
    }

    #[test]
    fn zero_elapsed_reports_zero_rate() {
        let report = Report::new(1024 * 1024, std::time::Duration::ZERO);
        assert_eq!(report.average_kbps, 0.0);
        let report = Report::new(1024 * 1024, std::time::Duration::from_micros(300));
        assert_eq!(report.average_kbps, 0.0);
    }

    #[test]
    fn average_rate_in_kilobytes() {
        let report = Report::new(10 * 1024, std::time::Duration::from_secs(2));
        assert_eq!(report.total_bytes, 10 * 1024);
        assert!((report.average_kbps - 5.0).abs() < f64::EPSILON);
        assert!(report.to_string().contains("5.00 kB/s"));
    }

    #[test]
    fn finish_with_nothing_transferred() {
        let tracker = tracker(0);
        let report = tracker.finish();
        assert_eq!(report.total_bytes, 0);
    }
}
