//! Byte-level progress for plain-copy transfers.
//!
//! The resumable tool prints its own progress; copies streamed over the SSH
//! session are wrapped in a [`ProgressReader`] that logs speed and ETA.

use std::io::{self, Read};
use std::time::{Duration, Instant};
use tracing::info;

/// Snapshot of a single file transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub bytes_per_second: u64,
    pub eta_seconds: u64,
    pub percent_complete: f64,
}

impl TransferProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            bytes_per_second: 0,
            eta_seconds: 0,
            percent_complete: 0.0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.transferred_bytes >= self.total_bytes
    }
}

/// Progress tracker with time-based speed calculation.
pub struct ProgressTracker {
    start_time: Instant,
    last_update_time: Instant,
    last_bytes: u64,
    progress: TransferProgress,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64) -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_update_time: now,
            last_bytes: 0,
            progress: TransferProgress::new(total_bytes),
        }
    }

    /// Record the running byte total and recompute speed, ETA and percentage.
    pub fn update(&mut self, transferred_bytes: u64) -> &TransferProgress {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update_time).as_secs_f64();

        if elapsed > 0.0 {
            let bytes_diff = transferred_bytes.saturating_sub(self.last_bytes);
            self.progress.bytes_per_second = (bytes_diff as f64 / elapsed) as u64;
        }

        if self.progress.bytes_per_second > 0 {
            let remaining = self.progress.total_bytes.saturating_sub(transferred_bytes);
            self.progress.eta_seconds = remaining / self.progress.bytes_per_second;
        }

        self.progress.transferred_bytes = transferred_bytes;
        self.progress.percent_complete = if self.progress.total_bytes > 0 {
            ((transferred_bytes as f64 / self.progress.total_bytes as f64) * 100.0).min(100.0)
        } else {
            100.0
        };

        self.last_update_time = now;
        self.last_bytes = transferred_bytes;
        &self.progress
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.progress.transferred_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

/// Reader wrapper that logs progress at most once per `interval`.
pub struct ProgressReader<R> {
    inner: R,
    label: String,
    transferred: u64,
    tracker: ProgressTracker,
    last_report: Instant,
    interval: Duration,
}

impl<R: Read> ProgressReader<R> {
    pub fn new(inner: R, label: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            inner,
            label: label.into(),
            transferred: 0,
            tracker: ProgressTracker::new(total_bytes),
            last_report: Instant::now(),
            interval: Duration::from_secs(2),
        }
    }

    /// Log the final line and return the tracker's view.
    pub fn finish(mut self) -> TransferProgress {
        let progress = self.tracker.update(self.transferred).clone();
        info!(
            "{}: {} in {} (avg {})",
            self.label,
            format_bytes(self.transferred),
            format_duration(self.tracker.elapsed().as_secs()),
            format_speed(self.tracker.average_speed())
        );
        progress
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.transferred += n as u64;

        if self.last_report.elapsed() >= self.interval {
            let p = self.tracker.update(self.transferred);
            info!(
                "{}: {:.1}% ({} / {}, {}, ETA {})",
                self.label,
                p.percent_complete,
                format_bytes(p.transferred_bytes),
                format_bytes(p.total_bytes),
                format_speed(p.bytes_per_second),
                format_duration(p.eta_seconds)
            );
            self.last_report = Instant::now();
        }
        Ok(n)
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
