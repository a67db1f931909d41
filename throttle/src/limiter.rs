use tokio::time::{Duration, Instant};

// accounting restarts once a full window has passed and the budget is satisfied
const WINDOW: Duration = Duration::from_secs(1);
// smooth pacing: at most this many operations worth of bytes per second
const CHUNKS_PER_SEC: u64 = 10;
const MAX_CHUNK: u64 = 64 * 1024;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    bytes_per_sec: u64,
    window_start: Instant,
    window_bytes: u64,
}

impl RateLimiter {
    /// Creates a limiter for `bytes_per_sec`, `0` means unlimited.
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec,
            window_start: Instant::now(),
            window_bytes: 0,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.bytes_per_sec > 0
    }

    /// Largest number of bytes a single read or write should move.
    pub fn chunk_limit(&self) -> usize {
        if !self.is_enabled() {
            return usize::MAX;
        }
        let chunk = (self.bytes_per_sec / CHUNKS_PER_SEC).clamp(1, MAX_CHUNK);
        usize::try_from(chunk).unwrap_or(usize::MAX)
    }

    fn required(&self) -> Duration {
        Duration::from_secs_f64(self.window_bytes as f64 / self.bytes_per_sec as f64)
    }

    /// Accounts `bytes` that were just moved and returns how long to wait before moving more.
    pub fn record(&mut self, bytes: usize) -> Option<Duration> {
        if !self.is_enabled() || bytes == 0 {
            return None;
        }
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= WINDOW && self.required() <= elapsed {
            tracing::trace!(
                "rate window reset after {:?} with {} bytes",
                elapsed,
                self.window_bytes
            );
            self.window_start = now;
            self.window_bytes = 0;
        }
        self.window_bytes += bytes as u64;
        let elapsed = now.saturating_duration_since(self.window_start);
        let required = self.required();
        if required > elapsed {
            Some(required - elapsed)
        } else {
            None
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}
