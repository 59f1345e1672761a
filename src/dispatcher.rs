use crate::config::DownloadConfig;
use crate::debris::DebrisStore;
use crate::error::{Error, Result};
use crate::ledger::IntervalLedger;
use crate::probe::{build_headers, probe, ResourceInfo};
use crate::progress::ProgressReporter;
use crate::utils::debris_dir_name;
use crate::worker::{Worker, WorkerContext, WorkerReport};
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DownloadSummary {
    pub total_bytes: u64,
    pub workers: usize,
    pub reports: Vec<WorkerReport>,
    /// Final non-empty byte ranges in start order
    pub ranges: Vec<Range<u64>>,
    pub elapsed: Duration,
}

pub struct Dispatcher {
    config: DownloadConfig,
    client: Client,
    headers: HeaderMap,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let timeout = config.request_timeout()?;
        let headers = build_headers(&config.headers)?;
        let client = Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            config,
            client,
            headers,
            timeout,
        })
    }

    /// Ask the server for the size and range support of `url`.
    pub async fn probe(&self, url: &str) -> Result<ResourceInfo> {
        probe(&self.client, url, &self.headers, self.timeout).await
    }

    /// Download `url` into `dest` using a resource description from [`probe`](Self::probe).
    pub async fn dispatch(
        &self,
        url: &str,
        dest: &Path,
        info: ResourceInfo,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<DownloadSummary> {
        let started = Instant::now();
        let size = info.total_size;
        let threads = self.config.effective_thread_count(size, info.range_supported);
        if !info.range_supported {
            info!(%url, "server does not accept ranges, using a single worker");
        }

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        if size == 0 {
            fs::File::create(dest).await?;
            return Ok(DownloadSummary {
                total_bytes: 0,
                workers: 0,
                reports: Vec::new(),
                ranges: Vec::new(),
                elapsed: started.elapsed(),
            });
        }

        let debris = Arc::new(DebrisStore::prepare(&self.config.temp_dir, &debris_dir_name(dest)).await?);
        let ledger = Arc::new(IntervalLedger::new(size, self.config.min_insertion_interval));
        let ctx = Arc::new(WorkerContext {
            client: self.client.clone(),
            url: url.to_string(),
            headers: self.headers.clone(),
            ledger: Arc::clone(&ledger),
            debris: Arc::clone(&debris),
            reporter,
            written: Arc::new(AtomicU64::new(0)),
            chunk_size: self.config.chunk_size,
            timeout: self.timeout,
            retry_delay: self.config.retry_delay,
            standby_delay: self.config.standby_delay,
        });

        // Every initial claim is registered before any worker reads, so none can
        // run past a neighbour that has not started yet.
        let step = size / threads as u64;
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let interval = ledger.claim_at(step * i as u64);
            debug!(worker = i, offset = interval.start, "initial claim");
            let worker = Worker::new(i, Arc::clone(&ctx));
            handles.push(tokio::spawn(worker.run(Some(interval))));
        }
        info!(%url, size, threads, "download started");

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            ticker.tick().await;
            if handles.iter().all(|h| h.is_finished()) {
                break;
            }
        }

        let mut reports = Vec::with_capacity(threads);
        for handle in handles {
            let report = handle.await.map_err(|e| Error::Worker(e.to_string()))??;
            reports.push(report);
        }

        let intervals = ledger.snapshot();
        let written = ctx.written.load(Ordering::Relaxed);
        let total_bytes = debris.assemble(&intervals, dest).await?;
        if total_bytes != size {
            return Err(Error::SizeMismatch {
                expected: size,
                actual: total_bytes,
            });
        }
        debris.cleanup().await?;

        let ranges = intervals
            .iter()
            .filter(|i| !i.is_empty())
            .map(|i| i.start..i.end)
            .collect();
        let elapsed = started.elapsed();
        info!(%url, total_bytes, written, ?elapsed, "download finished");
        Ok(DownloadSummary {
            total_bytes,
            workers: threads,
            reports,
            ranges,
            elapsed,
        })
    }

    /// Probe `url`, then download it into `dest`.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<DownloadSummary> {
        let info = self.probe(url).await?;
        self.dispatch(url, dest, info, reporter).await
    }
}
