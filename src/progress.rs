//! Progress reporting boundary and the terminal display.
//!
//! Workers emit events through [`ProgressReporter`]; nothing on the download
//! path ever reads them back.

use crate::speedometer::Speedometer;
use indicatif::{HumanBytes, HumanDuration, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Observer of worker activity
pub trait ProgressReporter: Send + Sync {
    /// A claim starting at `offset` began receiving data.
    fn on_claim_start(&self, worker: usize, offset: u64);
    /// `delta` more bytes were written.
    fn on_progress(&self, worker: usize, delta: u64);
    /// Short human-readable state such as "sending request" or "standby".
    fn on_status(&self, worker: usize, text: &str);
    /// The worker reached a retry boundary or a terminal state.
    fn on_finalize(&self, worker: usize);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_claim_start(&self, _worker: usize, _offset: u64) {}
    fn on_progress(&self, _worker: usize, _delta: u64) {}
    fn on_status(&self, _worker: usize, _text: &str) {}
    fn on_finalize(&self, _worker: usize) {}
}

/// Window used for the "current speed" figures
const SPEED_WINDOW_MS: u64 = 1973;

struct WorkerLine {
    bar: ProgressBar,
    meter: Speedometer,
    downloaded: u64,
    status: String,
}

/// Multi-line terminal display: one summary line plus one line per worker.
pub struct ConsoleReporter {
    multi: MultiProgress,
    header: ProgressBar,
    lines: Mutex<BTreeMap<usize, WorkerLine>>,
    total_size: u64,
    downloaded: AtomicU64,
    started: Instant,
    precision_ms: u64,
    done: AtomicBool,
}

impl ConsoleReporter {
    pub fn new(total_size: u64, precision_ms: u64) -> Arc<Self> {
        let multi = MultiProgress::new();
        multi.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));

        let header = multi.add(ProgressBar::new(total_size));
        header.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40.cyan/blue}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );

        Arc::new(Self {
            multi,
            header,
            lines: Mutex::new(BTreeMap::new()),
            total_size,
            downloaded: AtomicU64::new(0),
            started: Instant::now(),
            precision_ms,
            done: AtomicBool::new(false),
        })
    }

    /// Redraw the summary and worker lines every 500ms until [`finish`](Self::finish).
    pub fn spawn_refresher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while !this.done.load(Ordering::Relaxed) {
                this.refresh();
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        })
    }

    pub fn finish(&self) {
        self.done.store(true, Ordering::Relaxed);
        self.refresh();
        if let Ok(lines) = self.lines.lock() {
            for line in lines.values() {
                line.bar.finish();
            }
        }
        self.header.finish();
    }

    fn lines(&self) -> std::sync::MutexGuard<'_, BTreeMap<usize, WorkerLine>> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_line<F: FnOnce(&mut WorkerLine)>(&self, worker: usize, f: F) {
        let mut lines = self.lines();
        let line = lines.entry(worker).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new_spinner());
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {prefix:>4} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.set_prefix(format!("#{}", worker));
            let mut meter = Speedometer::new(self.precision_ms);
            // runs only while the worker holds a claim
            let _ = meter.pause();
            WorkerLine {
                bar,
                meter,
                downloaded: 0,
                status: String::new(),
            }
        });
        f(line);
    }

    fn refresh(&self) {
        let mut current = 0.0;
        for line in self.lines().values() {
            let speed = line.meter.cur_speed(SPEED_WINDOW_MS).unwrap_or(0.0) * 1000.0;
            current += speed;
            line.bar.set_message(format!(
                "{:>12}/s {:>12} {}",
                HumanBytes(speed as u64),
                HumanBytes(line.downloaded),
                line.status
            ));
            line.bar.tick();
        }

        let downloaded = self.downloaded.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed();
        let average = if elapsed.as_secs_f64() > 0.0 {
            downloaded as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let percent = if self.total_size > 0 {
            downloaded as f64 / self.total_size as f64 * 100.0
        } else {
            100.0
        };
        let left = if current > 0.0 {
            let secs = self.total_size.saturating_sub(downloaded) as f64 / current;
            HumanDuration(Duration::from_secs_f64(secs)).to_string()
        } else {
            "-".to_string()
        };
        self.header.set_position(downloaded);
        self.header.set_message(format!(
            "{} / {} ({:.2}%) | now {}/s | avg {}/s | {} elapsed | {} left",
            HumanBytes(downloaded),
            HumanBytes(self.total_size),
            percent,
            HumanBytes(current as u64),
            HumanBytes(average as u64),
            HumanDuration(elapsed),
            left
        ));
    }
}

impl ProgressReporter for ConsoleReporter {
    fn on_claim_start(&self, worker: usize, offset: u64) {
        self.with_line(worker, |line| {
            let _ = line.meter.start();
            line.bar.set_prefix(format!("#{}@{}", worker, offset));
        });
    }

    fn on_progress(&self, worker: usize, delta: u64) {
        self.downloaded.fetch_add(delta, Ordering::Relaxed);
        self.with_line(worker, |line| {
            line.downloaded += delta;
            if let Err(e) = line.meter.submit(delta, None, false) {
                debug!(worker, error = %e, "speed sample dropped");
            }
        });
    }

    fn on_status(&self, worker: usize, text: &str) {
        self.with_line(worker, |line| line.status = text.to_string());
    }

    fn on_finalize(&self, worker: usize) {
        self.with_line(worker, |line| {
            let _ = line.meter.pause();
        });
    }
}
