//! Progress accounting and the published progress snapshot.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::types::TaskState;
use crate::entry::format_size;

/// Window over which the "current" speed is measured.
const SPEED_WINDOW: Duration = Duration::from_secs(2);

/// Point-in-time view of a task, safe to read from any thread.
#[derive(Debug, Clone, Default)]
pub struct TaskProgress {
    pub state: TaskState,
    /// Total bytes to process, `0` until known
    pub total_size: u64,
    /// `false` while sizing or when sizing timed out
    pub total_known: bool,
    /// Bytes processed so far (copied, or accounted for by skips, links, deletes)
    pub progress: u64,
    pub percent: u8,
    /// Bytes per second over the last couple of seconds
    pub current_speed: u64,
    /// Bytes per second since the task started
    pub average_speed: u64,
    pub elapsed: Duration,
    pub remaining: Option<Duration>,
    pub current_file: Option<PathBuf>,
    pub items_done: usize,
    pub err_count: usize,
    pub aborted: bool,
    pub display_progress: String,
    pub display_speed: String,
    pub display_elapsed: String,
    pub display_remaining: String,
}

/// Running counters behind [`TaskProgress`]. Progress never decreases and never exceeds a known
/// total.
#[derive(Debug)]
pub(super) struct ProgressTracker {
    started: Option<Instant>,
    total: u64,
    total_known: bool,
    done: u64,
    items_done: usize,
    window_start: Option<Instant>,
    window_bytes: u64,
    current_speed: u64,
}

impl ProgressTracker {
    pub(super) fn new() -> Self {
        Self {
            started: None,
            total: 0,
            total_known: false,
            done: 0,
            items_done: 0,
            window_start: None,
            window_bytes: 0,
            current_speed: 0,
        }
    }

    pub(super) fn start(&mut self) {
        let now = Instant::now();
        self.started = Some(now);
        self.window_start = Some(now);
    }

    pub(super) fn set_total(&mut self, total: u64) {
        self.total = total.max(self.done);
        self.total_known = true;
    }

    pub(super) fn total(&self) -> Option<u64> {
        self.total_known.then_some(self.total)
    }

    pub(super) fn add(&mut self, bytes: u64) {
        let mut next = self.done.saturating_add(bytes);
        if self.total_known {
            next = next.min(self.total);
        }
        let delta = next - self.done;
        self.done = next;
        self.window_bytes += delta;

        let now = Instant::now();
        if let Some(window_start) = self.window_start {
            let span = now.duration_since(window_start);
            if span >= SPEED_WINDOW {
                self.current_speed = per_second(self.window_bytes, span);
                self.window_start = Some(now);
                self.window_bytes = 0;
            }
        }
    }

    pub(super) fn item_done(&mut self) {
        self.items_done += 1;
    }

    /// Marks every remaining byte as processed.
    pub(super) fn complete(&mut self) {
        if self.total_known {
            self.done = self.total;
        }
    }

    pub(super) fn snapshot(&self, state: TaskState) -> TaskProgress {
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        let average_speed = per_second(self.done, elapsed);
        // Before the first full window, the average is the best current estimate
        let current_speed = if self.current_speed == 0 { average_speed } else { self.current_speed };

        let percent = match self.total_known {
            true if self.total > 0 => ((self.done as u128 * 100) / self.total as u128) as u8,
            true => 100,
            false => 0,
        };
        let remaining = (self.total_known && current_speed > 0)
            .then(|| Duration::from_secs((self.total - self.done) / current_speed));

        let display_progress = if self.total_known {
            format!("{} / {}", format_size(self.done), format_size(self.total))
        } else {
            format_size(self.done)
        };

        TaskProgress {
            state,
            total_size: self.total,
            total_known: self.total_known,
            progress: self.done,
            percent,
            current_speed,
            average_speed,
            elapsed,
            remaining,
            current_file: None,
            items_done: self.items_done,
            err_count: 0,
            aborted: false,
            display_progress,
            display_speed: format!("{}/s", format_size(current_speed)),
            display_elapsed: format_duration(Some(elapsed)),
            display_remaining: format_duration(remaining),
        }
    }
}

fn per_second(bytes: u64, span: Duration) -> u64 {
    let millis = span.as_millis();
    if millis == 0 {
        return 0;
    }
    (bytes as u128 * 1000 / millis) as u64
}

/// `mm:ss`, or `h:mm:ss` past an hour; `--:--` when unknown.
pub fn format_duration(duration: Option<Duration>) -> String {
    let Some(duration) = duration else {
        return "--:--".to_string();
    };
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}
