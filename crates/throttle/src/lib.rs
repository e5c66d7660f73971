//! Transfer-rate ceiling and adaptive worker count.
//!
//! The [`Throttle`] hands out one [`ThrottleToken`] per chunk. Tokens are
//! logged with their issue time, and at most `rate × window ÷ chunk` of them
//! may fall inside any trailing window, which bounds the bytes granted per
//! window by `rate × window` (plus one chunk when the rate is below one
//! chunk per window). One designated path may stream through a separate
//! allowance so interactive playback isn't starved by batch downloads.
//!
//! The same token log measures bandwidth, which feeds the
//! [`ConcurrencySearch`] after every completed download. Its decision is
//! published on a [`watch`] channel for the worker pool to follow.

mod search;

pub use crate::search::{ConcurrencySearch, SearchSettings, Step};

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSettings {
    /// Global ceiling in bytes/second. `None` is unbounded.
    pub rate: Option<u64>,
    /// Ceiling for the designated streaming path. `None` is unbounded.
    pub stream_rate: Option<u64>,
    /// Trailing window over which rates are enforced and measured.
    #[serde(with = "lectern_model::millis")]
    pub window: Duration,
    #[serde(flatten)]
    pub search: SearchSettings,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self { rate: None, stream_rate: None, window: Duration::from_secs(3), search: SearchSettings::default() }
    }
}

/// Permission to transfer up to `bytes` now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleToken {
    pub bytes: usize,
    pub issued_at: Instant,
}

#[derive(Debug, Default)]
struct TokenLog {
    issued: VecDeque<Instant>,
}

impl TokenLog {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.issued.front() {
            if now.duration_since(*oldest) >= window {
                self.issued.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug)]
pub struct Throttle {
    chunk: usize,
    window: Duration,
    rate: Option<u64>,
    stream_rate: Option<u64>,
    batch: Mutex<TokenLog>,
    stream: Mutex<TokenLog>,
    streaming: RwLock<Option<PathBuf>>,
    search: Mutex<ConcurrencySearch>,
    workers: watch::Sender<usize>,
}

impl Throttle {
    pub fn new(settings: &ThrottleSettings, chunk: usize, max_workers: usize) -> Self {
        Self::with_search(settings, chunk, ConcurrencySearch::new(max_workers, settings.search))
    }

    pub fn with_search(settings: &ThrottleSettings, chunk: usize, search: ConcurrencySearch) -> Self {
        let (workers, _) = watch::channel(search.current());
        Self {
            chunk: chunk.max(1),
            window: settings.window,
            rate: settings.rate,
            stream_rate: settings.stream_rate,
            batch: Mutex::default(),
            stream: Mutex::default(),
            streaming: RwLock::default(),
            search: Mutex::new(search),
            workers,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk
    }

    /// Tokens allowed inside one window, or `None` when unbounded.
    fn capacity(&self, rate: Option<u64>) -> Option<usize> {
        let rate = rate?;
        let per_window = rate as f64 * self.window.as_secs_f64() / self.chunk as f64;
        Some((per_window.floor() as usize).max(1))
    }

    /// Wait for permission to transfer one chunk for `path`.
    ///
    /// Cancel safe: a token is only logged once it is handed out.
    pub async fn acquire(&self, path: &Path) -> ThrottleToken {
        let is_stream = self.streaming.read().await.as_deref() == Some(path);
        let (log, capacity) = if is_stream {
            (&self.stream, self.capacity(self.stream_rate))
        } else {
            (&self.batch, self.capacity(self.rate))
        };
        loop {
            let mut log = log.lock().await;
            let now = Instant::now();
            log.prune(now, self.window);
            let full = capacity.is_some_and(|capacity| log.issued.len() >= capacity);
            match log.issued.front().copied() {
                Some(oldest) if full => {
                    drop(log);
                    let wait = (oldest + self.window).saturating_duration_since(now);
                    trace!(target: "throttle", path = %path.display(), ?wait, "rate exhausted, waiting");
                    tokio::time::sleep(wait).await;
                },
                _ => {
                    log.issued.push_back(now);
                    return ThrottleToken { bytes: self.chunk, issued_at: now };
                },
            }
        }
    }

    /// Route `path` through the streaming allowance until [`Self::end_stream`].
    pub async fn start_stream(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!(target: "throttle", path = %path.display(), "streaming started");
        *self.streaming.write().await = Some(path);
    }

    pub async fn end_stream(&self) {
        if let Some(path) = self.streaming.write().await.take() {
            debug!(target: "throttle", path = %path.display(), "streaming ended");
        }
    }

    /// Path currently routed through the streaming allowance.
    pub async fn streaming(&self) -> Option<PathBuf> {
        self.streaming.read().await.clone()
    }

    /// Bytes/second granted over the trailing window, across both allowances.
    pub async fn bandwidth(&self) -> f64 {
        let now = Instant::now();
        let mut tokens = 0;
        for log in [&self.batch, &self.stream] {
            let mut log = log.lock().await;
            log.prune(now, self.window);
            tokens += log.issued.len();
        }
        let seconds = self.window.as_secs_f64();
        if seconds <= 0.0 { 0.0 } else { (tokens * self.chunk) as f64 / seconds }
    }

    /// Feed the current bandwidth to the concurrency search after a
    /// download finished, and publish the resulting worker count.
    pub async fn record_completion(&self) -> usize {
        let bandwidth = self.bandwidth().await;
        let workers = self.search.lock().await.observe(bandwidth);
        self.workers.send_if_modified(|current| {
            let changed = *current != workers;
            *current = workers;
            changed
        });
        workers
    }

    /// Follow the target worker count.
    pub fn workers(&self) -> watch::Receiver<usize> {
        self.workers.subscribe()
    }

    pub fn current_workers(&self) -> usize {
        *self.workers.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const CHUNK: usize = 1024;

    fn throttle(rate: Option<u64>, stream_rate: Option<u64>) -> Throttle {
        let settings = ThrottleSettings { rate, stream_rate, window: Duration::from_secs(1), ..Default::default() };
        Throttle::with_search(&settings, CHUNK, ConcurrencySearch::seeded(4, settings.search, 3))
    }

    /// Largest number of bytes granted inside any window of length `window`.
    fn peak(issued: &[Instant], window: Duration) -> usize {
        issued
            .iter()
            .map(|start| issued.iter().filter(|t| **t >= *start && t.duration_since(*start) < window).count())
            .max()
            .unwrap_or(0)
            * CHUNK
    }

    #[rstest]
    #[case(4 * CHUNK as u64)]
    #[case(10 * CHUNK as u64)]
    #[case(CHUNK as u64 / 2)]
    #[tokio::test(start_paused = true)]
    async fn test_rate_is_not_violated(#[case] rate: u64) {
        let throttle = throttle(Some(rate), None);
        let path = Path::new("/lectern/a.pdf");
        let mut issued = Vec::new();
        for _ in 0..40 {
            issued.push(throttle.acquire(path).await.issued_at);
        }
        let allowance = (rate as usize).max(CHUNK);
        assert!(peak(&issued, Duration::from_secs(1)) <= allowance);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_oldest_token_to_expire() {
        let throttle = throttle(Some(2 * CHUNK as u64), None);
        let path = Path::new("/lectern/a.pdf");
        let start = Instant::now();
        throttle.acquire(path).await;
        throttle.acquire(path).await;
        assert_eq!(Instant::now(), start);
        let third = throttle.acquire(path).await;
        assert!(third.issued_at.duration_since(start) >= Duration::from_secs(1));
        assert_eq!(third.bytes, CHUNK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_never_waits() {
        let throttle = throttle(None, None);
        let start = Instant::now();
        for _ in 0..1000 {
            throttle.acquire(Path::new("/lectern/a.pdf")).await;
        }
        assert_eq!(Instant::now(), start);
        assert_eq!(throttle.bandwidth().await, 1000.0 * CHUNK as f64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_has_its_own_allowance() {
        let throttle = throttle(Some(CHUNK as u64), Some(8 * CHUNK as u64));
        let batch = Path::new("/lectern/a.pdf");
        let stream = Path::new("/lectern/Videos/lecture.mp4");
        throttle.start_stream(stream).await;
        assert_eq!(throttle.streaming().await.as_deref(), Some(stream));
        let start = Instant::now();
        throttle.acquire(batch).await;
        for _ in 0..8 {
            throttle.acquire(stream).await;
        }
        assert_eq!(Instant::now(), start, "batch exhaustion must not block the stream");

        throttle.end_stream().await;
        assert_eq!(throttle.streaming().await, None);
        let token = throttle.acquire(stream).await;
        assert!(token.issued_at.duration_since(start) >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bandwidth_forgets_old_tokens() {
        let throttle = throttle(None, None);
        for _ in 0..4 {
            throttle.acquire(Path::new("/lectern/a.pdf")).await;
        }
        assert_eq!(throttle.bandwidth().await, 4.0 * CHUNK as f64);
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(throttle.bandwidth().await, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_completion_publishes_workers() {
        let throttle = throttle(None, None);
        let mut workers = throttle.workers();
        assert_eq!(*workers.borrow_and_update(), 2);
        for _ in 0..100 {
            throttle.acquire(Path::new("/lectern/a.pdf")).await;
            let target = throttle.record_completion().await;
            assert!((1..=4).contains(&target));
            assert_eq!(throttle.current_workers(), target);
        }
    }

    #[test]
    fn test_settings_deserialize_window_in_millis() {
        let settings: ThrottleSettings =
            serde_json::from_str(r#"{"rate": 2048, "window": 1500, "alpha": 0.5}"#).unwrap();
        assert_eq!(settings.rate, Some(2048));
        assert_eq!(settings.window, Duration::from_millis(1500));
        assert_eq!(settings.search.alpha, 0.5);
        assert_eq!(settings.search.hold_weight, 1.0);
    }
}
