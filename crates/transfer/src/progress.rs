use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

/// Progress of one transfer, reported after every chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferProgress {
    pub transferred: u64,
    pub total: u64,
    /// `floor(transferred * 100 / total)`; 100 for an empty file.
    pub percent: u8,
    pub bytes_per_second: f64,
}

/// Whole percentage of `done` out of `total`, rounded down.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = done.min(total) as u128;
    (done * 100 / total as u128) as u8
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    samples: VecDeque<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: max_samples.unwrap_or(100),
            window_size: window_size.unwrap_or(Duration::from_secs(5)),
        }
    }

    /// Records a sample of `bytes` transferred at the current instant.
    pub fn add_sample(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push_back(SpeedSample {
            bytes,
            timestamp: now,
        });

        while let Some(first) = self.samples.front() {
            if now.duration_since(first.timestamp) > self.window_size {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Average speed in bytes/second within the window.
    ///
    /// Returns 0.0 if fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        if self.samples.len() < 2 {
            return 0.0;
        }
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }
        let total: u64 = self.samples.iter().map(|s| s.bytes).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

/// Feeds progress to an optional observer without ever blocking.
pub(crate) struct ProgressReporter {
    tx: Option<mpsc::Sender<TransferProgress>>,
    speed: SpeedCalculator,
    total: u64,
}

impl ProgressReporter {
    pub(crate) fn new(tx: Option<mpsc::Sender<TransferProgress>>, total: u64) -> Self {
        Self {
            tx,
            speed: SpeedCalculator::new(None, None),
            total,
        }
    }

    /// Records `chunk` more bytes, `transferred` in total.
    pub(crate) fn report(&mut self, transferred: u64, chunk: usize) {
        let Some(tx) = &self.tx else {
            return;
        };
        self.speed.add_sample(chunk as u64);
        let progress = TransferProgress {
            transferred,
            total: self.total,
            percent: percent(transferred, self.total),
            bytes_per_second: self.speed.bytes_per_second(),
        };
        match tx.try_send(progress) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!(transferred, "progress observer lagging"),
            Err(TrySendError::Closed(_)) => self.tx = None,
        }
    }
}
