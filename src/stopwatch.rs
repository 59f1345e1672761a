//! Pause-aware elapsed time ledger.
//!
//! All times are milliseconds. Every start/pause transition is recorded with
//! the active time accrued before it, so the active duration between any two
//! past instants is two binary searches away.

use crate::error::{Error, Result};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopwatchStatus {
    Started,
    Paused,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    timestamp_ms: u64,
    status: StopwatchStatus,
    /// Active time accrued before this entry
    lapsed_ms: u64,
}

impl Entry {
    fn active_at(&self, t: u64) -> u64 {
        match self.status {
            StopwatchStatus::Started => self.lapsed_ms + t.saturating_sub(self.timestamp_ms),
            StopwatchStatus::Paused => self.lapsed_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stopwatch<C: Clock = SystemClock> {
    clock: C,
    entries: Vec<Entry>,
}

impl Stopwatch<SystemClock> {
    /// Wall-clock stopwatch, optionally started immediately.
    pub fn new(start_now: bool) -> Self {
        Self::with_clock(SystemClock, start_now)
    }
}

impl<C: Clock> Stopwatch<C> {
    pub fn with_clock(clock: C, start_now: bool) -> Self {
        let mut sw = Self {
            clock,
            entries: Vec::new(),
        };
        if start_now {
            sw.push(StopwatchStatus::Started, 0);
        }
        sw
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Current status; a stopwatch that was never started counts as paused.
    pub fn status(&self) -> StopwatchStatus {
        self.entries
            .last()
            .map(|e| e.status)
            .unwrap_or(StopwatchStatus::Paused)
    }

    // Timestamps never go backwards even if the clock does.
    fn push(&mut self, status: StopwatchStatus, lapsed_ms: u64) -> u64 {
        let floor = self.entries.last().map(|e| e.timestamp_ms).unwrap_or(0);
        let timestamp_ms = self.clock.now_ms().max(floor);
        self.entries.push(Entry {
            timestamp_ms,
            status,
            lapsed_ms,
        });
        timestamp_ms
    }

    pub fn start(&mut self) -> Result<()> {
        if self.status() == StopwatchStatus::Started {
            return Err(Error::InvalidState("stopwatch already started".into()));
        }
        let lapsed = self.entries.last().map(|e| e.lapsed_ms).unwrap_or(0);
        self.push(StopwatchStatus::Started, lapsed);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        let last = match self.entries.last() {
            Some(e) if e.status == StopwatchStatus::Started => *e,
            _ => return Err(Error::InvalidState("stopwatch already paused".into())),
        };
        let now = self.clock.now_ms().max(last.timestamp_ms);
        self.push(StopwatchStatus::Paused, last.active_at(now));
        Ok(())
    }

    /// Timestamp of the very first start.
    pub fn initial_start_time(&self) -> Result<u64> {
        self.entries
            .first()
            .map(|e| e.timestamp_ms)
            .ok_or_else(|| Error::InvalidState("stopwatch has never been started".into()))
    }

    // Last entry at or before `t`. Callers guarantee `t >= initial_start_time()`.
    fn entry_at(&self, t: u64) -> Option<&Entry> {
        let i = self.entries.partition_point(|e| e.timestamp_ms <= t);
        i.checked_sub(1).map(|i| &self.entries[i])
    }

    /// Active time between `low` and `high`.
    ///
    /// With `strict`, a future `high`, a `low` before the first start or
    /// `low > high` is an error; otherwise the bounds are clamped.
    pub fn lapsed_between(&self, low: u64, high: u64, strict: bool) -> Result<u64> {
        let first = self.initial_start_time()?;
        let now = self.clock.now_ms();
        let (mut low, mut high) = (low, high);
        if strict {
            if high > now {
                return Err(Error::InvalidRange(format!(
                    "upper bound {} is in the future (now {})",
                    high, now
                )));
            }
            if low < first {
                return Err(Error::InvalidRange(format!(
                    "lower bound {} is before the initial start {}",
                    low, first
                )));
            }
            if low > high {
                return Err(Error::InvalidRange(format!(
                    "lower bound {} is greater than upper bound {}",
                    low, high
                )));
            }
        } else {
            high = high.min(now);
            low = low.max(first);
            high = high.max(low);
        }
        let active = |t: u64| self.entry_at(t).map(|e| e.active_at(t)).unwrap_or(0);
        Ok(active(high) - active(low))
    }

    /// Status in effect at `t`.
    pub fn status_at(&self, t: u64) -> Result<StopwatchStatus> {
        self.entry_at(t)
            .map(|e| e.status)
            .ok_or_else(|| Error::InvalidRange(format!("{} is before the initial start", t)))
    }

    pub fn is_started_at(&self, t: u64) -> bool {
        matches!(self.status_at(t), Ok(StopwatchStatus::Started))
    }

    /// Active time from the first start until now.
    pub fn total_lapsed(&self) -> Result<u64> {
        let first = self.initial_start_time()?;
        self.lapsed_between(first, self.clock.now_ms().max(first), false)
    }
}

#[cfg(test)]
/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub(crate) struct ManualClock(std::sync::Arc<std::sync::atomic::AtomicU64>);

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new(start_ms: u64) -> Self {
        Self(std::sync::Arc::new(std::sync::atomic::AtomicU64::new(start_ms)))
    }

    pub(crate) fn set(&self, ms: u64) {
        self.0.store(ms, std::sync::atomic::Ordering::SeqCst);
    }

    pub(crate) fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // |---started---|~~paused~~|---|~~~~~|---|~~~~~~~|-----|
    // 10           80         100 120   180 200     290   400
    fn scripted() -> (ManualClock, Stopwatch<ManualClock>) {
        let clock = ManualClock::new(10);
        let mut sw = Stopwatch::with_clock(clock.clone(), true);
        for (t, start) in [(80, false), (100, true), (120, false), (180, true), (200, false), (290, true), (400, false)] {
            clock.set(t);
            if start {
                sw.start().unwrap();
            } else {
                sw.pause().unwrap();
            }
        }
        clock.set(500);
        (clock, sw)
    }

    #[test]
    fn test_lapsed_between_spans_pauses() {
        let (_clock, sw) = scripted();
        assert_eq!(sw.lapsed_between(10, 400, true).unwrap(), 220);
        assert_eq!(sw.lapsed_between(50, 110, true).unwrap(), 40);
        assert_eq!(sw.lapsed_between(85, 95, true).unwrap(), 0);
        assert_eq!(sw.lapsed_between(190, 300, true).unwrap(), 20);
        assert_eq!(sw.total_lapsed().unwrap(), 220);
    }

    #[test]
    fn test_zero_width_is_zero() {
        let (_clock, sw) = scripted();
        for t in [10, 80, 99, 150, 400, 500] {
            assert_eq!(sw.lapsed_between(t, t, true).unwrap(), 0);
        }
    }

    #[test]
    fn test_strict_rejects_bad_bounds() {
        let (_clock, sw) = scripted();
        assert!(matches!(sw.lapsed_between(10, 501, true), Err(Error::InvalidRange(_))));
        assert!(matches!(sw.lapsed_between(5, 100, true), Err(Error::InvalidRange(_))));
        assert!(matches!(sw.lapsed_between(200, 100, true), Err(Error::InvalidRange(_))));
    }

    #[test]
    fn test_lenient_clamps_bounds() {
        let (_clock, sw) = scripted();
        assert_eq!(sw.lapsed_between(0, 10_000, false).unwrap(), 220);
        assert_eq!(sw.lapsed_between(200, 100, false).unwrap(), 0);
    }

    #[test]
    fn test_double_start_and_pause_fail() {
        let clock = ManualClock::new(0);
        let mut sw = Stopwatch::with_clock(clock.clone(), false);
        assert!(matches!(sw.pause(), Err(Error::InvalidState(_))));
        assert!(matches!(sw.total_lapsed(), Err(Error::InvalidState(_))));
        sw.start().unwrap();
        assert!(matches!(sw.start(), Err(Error::InvalidState(_))));
        clock.set(5);
        sw.pause().unwrap();
        assert!(matches!(sw.pause(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_total_lapsed_grows_only_while_started() {
        let clock = ManualClock::new(1_000);
        let mut sw = Stopwatch::with_clock(clock.clone(), true);
        clock.advance(30);
        assert_eq!(sw.total_lapsed().unwrap(), 30);
        clock.advance(20);
        assert_eq!(sw.total_lapsed().unwrap(), 50);
        sw.pause().unwrap();
        clock.advance(500);
        assert_eq!(sw.total_lapsed().unwrap(), 50);
        sw.start().unwrap();
        clock.advance(10);
        assert_eq!(sw.total_lapsed().unwrap(), 60);
    }

    #[test]
    fn test_status_at() {
        let (_clock, sw) = scripted();
        assert!(sw.status_at(5).is_err());
        assert_eq!(sw.status_at(10).unwrap(), StopwatchStatus::Started);
        assert_eq!(sw.status_at(80).unwrap(), StopwatchStatus::Paused);
        assert_eq!(sw.status_at(150).unwrap(), StopwatchStatus::Paused);
        assert!(sw.is_started_at(300));
        assert_eq!(sw.status(), StopwatchStatus::Paused);
    }

    #[test]
    fn test_system_clock_runs() {
        let sw = Stopwatch::new(true);
        assert_eq!(sw.status(), StopwatchStatus::Started);
        assert!(sw.total_lapsed().is_ok());
    }
}
