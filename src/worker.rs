//! The claim/stream loop run by every worker.
//!
//! A worker repeatedly claims a start offset from the shared ledger, streams
//! `bytes=<offset>-` into a private debris file and stops as soon as it runs
//! into the next claimed interval. Network trouble is never fatal here: the
//! interval is released, the worker backs off and claims again.

use crate::debris::DebrisStore;
use crate::error::{Error, Result};
use crate::ledger::{Assignment, Interval, IntervalLedger};
use crate::progress::ProgressReporter;
use futures::StreamExt;
use reqwest::header::{HeaderMap, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Everything a worker needs, shared by all workers of one download
pub struct WorkerContext {
    pub client: Client,
    pub url: String,
    pub headers: HeaderMap,
    pub ledger: Arc<IntervalLedger>,
    pub debris: Arc<DebrisStore>,
    pub reporter: Arc<dyn ProgressReporter>,
    /// Bytes written by all workers together
    pub written: Arc<AtomicU64>,
    pub chunk_size: usize,
    /// Applies to opening the request and to each body read
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub standby_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Claiming,
    Streaming(Interval),
    Stopping { interval: Interval, backoff: bool },
    Standby,
    Finished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub id: usize,
    pub bytes: u64,
    /// Claims that received at least one response
    pub ranges: usize,
    pub retries: usize,
}

enum StreamEnd {
    ReachedNext,
    Interrupted(Error),
}

pub struct Worker {
    id: usize,
    ctx: Arc<WorkerContext>,
    state: WorkerState,
    report: WorkerReport,
}

impl Worker {
    pub fn new(id: usize, ctx: Arc<WorkerContext>) -> Self {
        Self {
            id,
            ctx,
            state: WorkerState::Idle,
            report: WorkerReport {
                id,
                ..Default::default()
            },
        }
    }

    /// Run until the ledger has no gaps left.
    ///
    /// `initial` is a claim the dispatcher already registered for this worker.
    /// Only local I/O failures end the loop early.
    pub async fn run(mut self, initial: Option<Interval>) -> Result<WorkerReport> {
        let mut pending = initial;
        loop {
            let state = self.state;
            self.state = match state {
                WorkerState::Idle => match pending.take() {
                    Some(interval) => WorkerState::Streaming(interval),
                    None => WorkerState::Claiming,
                },
                WorkerState::Claiming => match self.ctx.ledger.claim() {
                    Assignment::Range(interval) => {
                        debug!(worker = self.id, offset = interval.start, "claimed");
                        WorkerState::Streaming(interval)
                    }
                    Assignment::Standby => WorkerState::Standby,
                    Assignment::Finished => WorkerState::Finished,
                },
                WorkerState::Streaming(interval) => match self.stream(interval).await {
                    Ok(StreamEnd::ReachedNext) => WorkerState::Stopping {
                        interval,
                        backoff: false,
                    },
                    Ok(StreamEnd::Interrupted(e)) => {
                        warn!(worker = self.id, offset = interval.start, error = %e, "range interrupted");
                        self.report.retries += 1;
                        WorkerState::Stopping {
                            interval,
                            backoff: true,
                        }
                    }
                    Err(e) => {
                        error!(worker = self.id, offset = interval.start, error = %e, "worker aborted");
                        if let Err(release_err) = self.ctx.ledger.release(interval.id) {
                            warn!(worker = self.id, offset = interval.start, error = %release_err, "could not release range");
                        }
                        self.ctx.reporter.on_status(self.id, "failed");
                        self.ctx.reporter.on_finalize(self.id);
                        return Err(e);
                    }
                },
                WorkerState::Stopping { interval, backoff } => {
                    let done = self.ctx.ledger.release(interval.id)?;
                    debug!(worker = self.id, start = done.start, end = done.end, "range stopped");
                    self.ctx.reporter.on_finalize(self.id);
                    if backoff {
                        sleep(self.ctx.retry_delay).await;
                    }
                    WorkerState::Claiming
                }
                WorkerState::Standby => {
                    self.ctx.reporter.on_status(self.id, "standby");
                    self.ctx.reporter.on_finalize(self.id);
                    sleep(self.ctx.standby_delay).await;
                    WorkerState::Claiming
                }
                WorkerState::Finished => {
                    self.ctx.reporter.on_status(self.id, "finished");
                    self.ctx.reporter.on_finalize(self.id);
                    info!(worker = self.id, bytes = self.report.bytes, "worker finished");
                    return Ok(self.report);
                }
            };
        }
    }

    async fn open(&self, offset: u64) -> Result<Response> {
        let request = self
            .ctx
            .client
            .get(&self.ctx.url)
            .headers(self.ctx.headers.clone())
            .header(RANGE, format!("bytes={}-", offset));
        let response = timeout(self.ctx.timeout, request.send())
            .await
            .map_err(|_| Error::Network("timed out waiting for response".into()))??;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(Error::Network(format!("invalid response code = {}", status)));
        }
        // A plain 200 here would restart the body at byte 0.
        if offset > 0 && status != StatusCode::PARTIAL_CONTENT {
            return Err(Error::Network(format!(
                "server ignored range request (status {})",
                status
            )));
        }
        Ok(response)
    }

    async fn stream(&mut self, interval: Interval) -> Result<StreamEnd> {
        let ctx = Arc::clone(&self.ctx);
        ctx.reporter.on_status(self.id, "sending request");
        debug!(worker = self.id, offset = interval.start, "sending request");

        let response = match self.open(interval.start).await {
            Ok(response) => response,
            Err(e) => {
                ctx.reporter.on_status(self.id, "get response failed");
                return Ok(StreamEnd::Interrupted(e));
            }
        };
        debug!(worker = self.id, status = %response.status(), "request success");
        self.report.ranges += 1;
        ctx.reporter.on_status(self.id, "retrieving");
        ctx.reporter.on_claim_start(self.id, interval.start);

        let mut sink = ctx.debris.create(interval.start).await?;
        let mut body = response.bytes_stream();
        loop {
            let item = match timeout(ctx.timeout, body.next()).await {
                Ok(Some(Ok(bytes))) => bytes,
                Ok(Some(Err(e))) => {
                    sink.finish().await?;
                    ctx.reporter.on_status(self.id, "get data failed");
                    return Ok(StreamEnd::Interrupted(e.into()));
                }
                Ok(None) => {
                    sink.finish().await?;
                    ctx.reporter.on_status(self.id, "get data failed");
                    return Ok(StreamEnd::Interrupted(Error::Network(
                        "response ended before reaching the next range".into(),
                    )));
                }
                Err(_) => {
                    sink.finish().await?;
                    ctx.reporter.on_status(self.id, "get data failed");
                    return Ok(StreamEnd::Interrupted(Error::Network(
                        "timed out reading response body".into(),
                    )));
                }
            };

            for piece in item.chunks(ctx.chunk_size) {
                let step = ctx.ledger.advance(interval.id, piece.len() as u64)?;
                // accepted <= piece.len()
                let kept = &piece[..step.accepted as usize];
                if !kept.is_empty() {
                    sink.write(kept).await?;
                    self.report.bytes += kept.len() as u64;
                    ctx.written.fetch_add(kept.len() as u64, Ordering::Relaxed);
                    ctx.reporter.on_progress(self.id, kept.len() as u64);
                }
                if step.reached_next {
                    let written = sink.finish().await?;
                    debug!(worker = self.id, offset = interval.start, written, "reached next range");
                    return Ok(StreamEnd::ReachedNext);
                }
            }
        }
    }
}
