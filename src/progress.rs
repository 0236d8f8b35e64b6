// src/progress.rs

//! Run progress reporting
//!
//! Interactive runs get an indicatif bar over the package queue; piped or
//! scripted runs fall back to periodic log lines so journals stay
//! readable.

use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Receives queue progress during a drain
pub trait ProgressTracker: Send + Sync {
    fn begin(&self, total: u64);
    fn advance(&self, name: &str);
    fn finish(&self);
}

/// No output at all
pub struct SilentProgress;

impl ProgressTracker for SilentProgress {
    fn begin(&self, _total: u64) {}
    fn advance(&self, _name: &str) {}
    fn finish(&self) {}
}

/// Log line every N completions
pub struct LogProgress {
    total: AtomicU64,
    done: AtomicU64,
}

impl LogProgress {
    const LOG_EVERY: u64 = 100;

    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            done: AtomicU64::new(0),
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker for LogProgress {
    fn begin(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn advance(&self, _name: &str) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.total.load(Ordering::Relaxed);
        if done % Self::LOG_EVERY == 0 || done == total {
            info!("Progress: {}/{} packages", done, total);
        }
    }

    fn finish(&self) {}
}

/// Terminal progress bar
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::hidden();
        bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker for BarProgress {
    fn begin(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    }

    fn advance(&self, name: &str) {
        self.bar.set_message(name.to_string());
        self.bar.inc(1);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Bar on a terminal, log lines otherwise
pub fn for_terminal() -> Box<dyn ProgressTracker> {
    if std::io::stderr().is_terminal() {
        Box::new(BarProgress::new())
    } else {
        Box::new(LogProgress::new())
    }
}
