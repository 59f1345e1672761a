//! # hsdl
//!
//! Segmented HTTP downloader. A fixed pool of workers shares one interval
//! ledger; whenever a worker finishes its range it claims a new one, either
//! resuming behind a stopped range or splitting a slow one in half, so no
//! worker idles while bytes remain.
//!
//! Throughput is measured with [`Speedometer`], a bucketed cumulative series
//! over a pause-aware [`Stopwatch`].

pub mod config;
pub mod debris;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod probe;
pub mod progress;
pub mod speedometer;
pub mod stopwatch;
pub mod utils;
pub mod worker;

pub use config::DownloadConfig;
pub use dispatcher::{Dispatcher, DownloadSummary};
pub use error::{Error, Result};
pub use ledger::{Claim, Interval, IntervalLedger};
pub use probe::ResourceInfo;
pub use progress::{ConsoleReporter, NoopReporter, ProgressReporter};
pub use speedometer::{Speedometer, TimeKey};
pub use stopwatch::{Stopwatch, StopwatchStatus};
