//! Throughput measurement on top of [`Stopwatch`].
//!
//! Submissions are bucketed into [`TimeKey`]s and stored as a cumulative
//! series, so the amount transferred between two instants is the difference
//! of two lookups. Rates divide by the stopwatch's active time, which keeps
//! paused periods out of the average.

use crate::error::{Error, Result};
use crate::stopwatch::{Clock, Stopwatch, SystemClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeKey(u64);

impl TimeKey {
    pub fn new(timestamp_ms: u64, precision_ms: u64) -> Self {
        Self(timestamp_ms / precision_ms * precision_ms)
    }

    pub fn as_ms(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Speedometer<C: Clock = SystemClock> {
    precision_ms: u64,
    /// Sorted by key; values are cumulative
    series: Vec<(TimeKey, u64)>,
    stopwatch: Stopwatch<C>,
}

impl Speedometer<SystemClock> {
    pub fn new(precision_ms: u64) -> Self {
        Self::with_clock(SystemClock, precision_ms, true)
    }
}

impl<C: Clock> Speedometer<C> {
    pub fn with_clock(clock: C, precision_ms: u64, start_now: bool) -> Self {
        Self {
            precision_ms: precision_ms.max(1),
            series: Vec::new(),
            stopwatch: Stopwatch::with_clock(clock, start_now),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.stopwatch.start()
    }

    pub fn pause(&mut self) -> Result<()> {
        self.stopwatch.pause()
    }

    /// Record `value` at `timestamp` (now when `None`).
    ///
    /// Non-cumulative values are deltas on top of the previous bucket; cumulative
    /// values are absolute running totals. A delta landing before the latest
    /// bucket is carried into every later bucket. Returns whether an existing
    /// bucket was updated rather than a new one created.
    pub fn submit(&mut self, value: u64, timestamp: Option<u64>, cumulative: bool) -> Result<bool> {
        let ts = timestamp.unwrap_or_else(|| self.stopwatch.now_ms());
        if !self.stopwatch.is_started_at(ts) {
            return Err(Error::InvalidState(
                "submitting value while the speedometer is paused".into(),
            ));
        }
        let key = TimeKey::new(ts, self.precision_ms);

        // Fast path: appending at or after the newest bucket.
        match self.series.last().copied() {
            None => {
                self.series.push((key, value));
                return Ok(false);
            }
            Some((last_key, last_value)) if last_key == key => {
                let merged = if cumulative { value } else { last_value + value };
                if let Some(last) = self.series.last_mut() {
                    last.1 = merged;
                }
                return Ok(true);
            }
            Some((last_key, last_value)) if last_key < key => {
                self.series.push((key, if cumulative { value } else { last_value + value }));
                return Ok(false);
            }
            Some(_) => {}
        }

        // Historical submission.
        let i = self.series.partition_point(|(k, _)| *k < key);
        let overwritten = self.series[i].0 == key;
        if cumulative {
            if overwritten {
                self.series[i].1 = value;
            } else {
                self.series.insert(i, (key, value));
            }
            // Later buckets are absolute totals already.
            return Ok(overwritten);
        }
        let later = if overwritten {
            self.series[i].1 += value;
            i + 1
        } else {
            let prev = i.checked_sub(1).map(|p| self.series[p].1).unwrap_or(0);
            self.series.insert(i, (key, prev + value));
            i + 1
        };
        for (_, v) in &mut self.series[later..] {
            *v += value;
        }
        Ok(overwritten)
    }

    /// Latest cumulative value at or before `t`, zero if none.
    pub fn value_at(&self, t: u64) -> u64 {
        let key = TimeKey::new(t, self.precision_ms);
        let i = self.series.partition_point(|(k, _)| *k <= key);
        i.checked_sub(1).map(|i| self.series[i].1).unwrap_or(0)
    }

    fn value_between(&self, low: u64, high: u64) -> u64 {
        self.value_at(high).saturating_sub(self.value_at(low))
    }

    /// Rate over the last `window_ms`, in value units per millisecond.
    pub fn cur_speed(&self, window_ms: u64) -> Result<f64> {
        let now = self.stopwatch.now_ms();
        let low = now.saturating_sub(window_ms);
        let delta = self.value_between(low, now);
        let lapsed = self.stopwatch.lapsed_between(low, now, false)?;
        Ok(rate(delta, lapsed))
    }

    /// Rate since the first start, in value units per millisecond.
    pub fn overall_speed(&self) -> Result<f64> {
        let now = self.stopwatch.now_ms();
        let lapsed = self.stopwatch.total_lapsed()?;
        Ok(rate(self.value_at(now), lapsed))
    }

    /// The cumulative series as `(bucket_ms, value)` pairs.
    pub fn series(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.series.iter().map(|(k, v)| (k.as_ms(), *v))
    }
}

fn rate(delta: u64, lapsed_ms: u64) -> f64 {
    if lapsed_ms == 0 {
        0.0
    } else {
        delta as f64 / lapsed_ms as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stopwatch::ManualClock;

    fn meter(start_ms: u64) -> (ManualClock, Speedometer<ManualClock>) {
        let clock = ManualClock::new(start_ms);
        let meter = Speedometer::with_clock(clock.clone(), 50, true);
        (clock, meter)
    }

    #[test]
    fn test_time_key_quantizes() {
        assert_eq!(TimeKey::new(1049, 50), TimeKey::new(1000, 50));
        assert_ne!(TimeKey::new(1050, 50), TimeKey::new(1000, 50));
        assert_eq!(TimeKey::new(1049, 50).as_ms(), 1000);
    }

    #[test]
    fn test_out_of_order_deltas_propagate() {
        let (clock, mut meter) = meter(0);
        clock.set(3_000);
        for (v, ts) in [(3, 1000), (9, 1050), (8, 900), (8, 1900), (3, 2050), (9, 2300)] {
            assert!(!meter.submit(v, Some(ts), false).unwrap());
        }
        let series: Vec<_> = meter.series().collect();
        assert_eq!(
            series,
            vec![(900, 8), (1000, 11), (1050, 20), (1900, 28), (2050, 31), (2300, 40)]
        );
    }

    #[test]
    fn test_historical_insert_in_middle() {
        let (clock, mut meter) = meter(0);
        clock.set(3_000);
        for (v, ts) in [(3, 1000), (9, 1050), (3, 2050), (9, 2300), (8, 1900), (8, 900)] {
            meter.submit(v, Some(ts), false).unwrap();
        }
        let series: Vec<_> = meter.series().collect();
        assert_eq!(
            series,
            vec![(900, 8), (1000, 11), (1050, 20), (1900, 28), (2050, 31), (2300, 40)]
        );
    }

    #[test]
    fn test_same_bucket_merges() {
        let (clock, mut meter) = meter(0);
        clock.set(1_000);
        assert!(!meter.submit(5, Some(1_010), false).unwrap());
        assert!(meter.submit(5, Some(1_020), false).unwrap());
        assert!(!meter.submit(1, Some(1_100), false).unwrap());
        assert!(meter.submit(2, Some(1_030), false).unwrap());
        let series: Vec<_> = meter.series().collect();
        assert_eq!(series, vec![(1000, 12), (1100, 13)]);
    }

    #[test]
    fn test_cumulative_values_stored_as_is() {
        let (clock, mut meter) = meter(0);
        clock.set(1_000);
        meter.submit(100, None, true).unwrap();
        clock.set(1_200);
        meter.submit(250, None, true).unwrap();
        meter.submit(180, Some(1_100), true).unwrap();
        let series: Vec<_> = meter.series().collect();
        assert_eq!(series, vec![(1000, 100), (1100, 180), (1200, 250)]);
    }

    #[test]
    fn test_submit_while_paused_fails() {
        let (clock, mut meter) = meter(0);
        clock.set(100);
        meter.pause().unwrap();
        clock.set(200);
        assert!(matches!(meter.submit(1, None, false), Err(Error::InvalidState(_))));
        assert!(matches!(meter.submit(1, Some(150), false), Err(Error::InvalidState(_))));
        assert!(meter.submit(1, Some(50), false).is_ok());
    }

    #[test]
    fn test_cur_speed_inside_started_span() {
        let (clock, mut meter) = meter(0);
        clock.set(3_000);
        meter.submit(100, Some(1_000), false).unwrap();
        meter.submit(300, Some(1_800), false).unwrap();
        clock.set(2_000);
        // window [1000, 2000]: 300 units over 1000 ms
        assert!((meter.cur_speed(1_000).unwrap() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_cur_speed_excludes_paused_time() {
        let (clock, mut meter) = meter(0);
        clock.set(500);
        meter.submit(100, None, false).unwrap();
        meter.pause().unwrap();
        clock.set(1_000);
        meter.start().unwrap();
        clock.set(1_500);
        meter.submit(100, None, false).unwrap();
        // [0, 1500] holds 1000 ms of active time
        assert!((meter.cur_speed(1_500).unwrap() - 0.2).abs() < 1e-9);
        assert!((meter.overall_speed().unwrap() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_speed_with_no_data_is_zero() {
        let (clock, meter) = meter(0);
        assert_eq!(meter.cur_speed(1_000).unwrap(), 0.0);
        clock.set(100);
        assert_eq!(meter.cur_speed(1_000).unwrap(), 0.0);
        assert_eq!(meter.overall_speed().unwrap(), 0.0);
    }
}
