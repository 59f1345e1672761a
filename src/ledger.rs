//! Shared interval ledger and claim selection.
//!
//! The ledger holds every byte range that has been claimed, sorted by start
//! offset, between two sentinels `(0, 0)` and `(size, size)`. An interval is
//! `[start, end)` where `end` only grows while `ongoing` is set. Workers ask the
//! ledger where to start next and how far they may extend before running into
//! the following claim.

use crate::error::{Error, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalId(u64);

/// A claimed byte range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub id: IntervalId,
    pub start: u64,
    pub end: u64,
    /// Set while a worker may still extend `end`
    pub ongoing: bool,
}

impl Interval {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Answer to "where should I read next?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Gaps remain but none can be taken right now
    Standby,
    Finished,
    Offset(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    Standby,
    Finished,
    /// Freshly registered ongoing interval, owned by the caller
    Range(Interval),
}

/// Outcome of extending an interval by one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    /// Bytes of the chunk that may be kept
    pub accepted: u64,
    /// The interval now touches the next one and must stop
    pub reached_next: bool,
}

/// Sorted interval list. Not synchronized; see [`IntervalLedger`].
#[derive(Debug, Clone)]
pub struct Intervals {
    items: Vec<Interval>,
    next_id: u64,
    min_insertion_interval: u64,
}

impl Intervals {
    /// Empty list with the two sentinels for a resource of `size` bytes.
    pub fn new(size: u64, min_insertion_interval: u64) -> Self {
        let mut list = Self {
            items: Vec::new(),
            next_id: 0,
            min_insertion_interval,
        };
        list.push_new(size, size, false);
        list.push_new(0, 0, false);
        list
    }

    fn push_new(&mut self, start: u64, end: u64, ongoing: bool) -> Interval {
        let interval = Interval {
            id: IntervalId(self.next_id),
            start,
            end,
            ongoing,
        };
        self.next_id += 1;
        self.insert(interval);
        interval
    }

    /// Insert keeping the list sorted by start; equal starts go after existing ones.
    pub fn insert(&mut self, interval: Interval) {
        let at = self.items.partition_point(|i| i.start <= interval.start);
        self.items.insert(at, interval);
    }

    fn position(&self, id: IntervalId) -> Result<usize> {
        self.items
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| Error::NotFound(format!("interval {:?}", id)))
    }

    pub fn get(&self, id: IntervalId) -> Result<Interval> {
        Ok(self.items[self.position(id)?])
    }

    /// The interval right after `id` in start order.
    pub fn next_of(&self, id: IntervalId) -> Result<Interval> {
        let at = self.position(id)?;
        self.items
            .get(at + 1)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("no interval after {:?}", id)))
    }

    /// Pick a start offset.
    ///
    /// A stopped interval followed by a gap is resumed at its end. An ongoing
    /// interval whose gap exceeds the minimum insertion interval is split at the
    /// midpoint so a second worker can race it. Candidates are chosen at random so
    /// workers spread out instead of piling onto the first gap.
    pub fn select_claim<R: Rng + ?Sized>(&self, rng: &mut R) -> Claim {
        let mut uncovered = false;
        let mut candidates = Vec::new();
        for pair in self.items.windows(2) {
            let (cur, next) = (&pair[0], &pair[1]);
            let gap = next.start.saturating_sub(cur.end);
            if gap == 0 {
                continue;
            }
            uncovered = true;
            if cur.ongoing {
                if gap > self.min_insertion_interval {
                    candidates.push(cur.end + gap / 2);
                }
            } else {
                candidates.push(cur.end);
            }
        }
        match candidates.choose(rng) {
            Some(&offset) => Claim::Offset(offset),
            None if uncovered => Claim::Standby,
            None => Claim::Finished,
        }
    }

    pub fn open_at(&mut self, offset: u64) -> Interval {
        self.push_new(offset, offset, true)
    }

    /// Extend `id` by up to `len` bytes without crossing into the next interval.
    pub fn advance(&mut self, id: IntervalId, len: u64) -> Result<Advance> {
        let at = self.position(id)?;
        let limit = self
            .items
            .get(at + 1)
            .map(|n| n.start)
            .ok_or_else(|| Error::NotFound(format!("no interval after {:?}", id)))?;
        let interval = &mut self.items[at];
        let allowed = limit.saturating_sub(interval.end);
        if allowed <= len {
            interval.end = limit;
            Ok(Advance {
                accepted: allowed,
                reached_next: true,
            })
        } else {
            interval.end += len;
            Ok(Advance {
                accepted: len,
                reached_next: false,
            })
        }
    }

    /// Stop extending `id`; drop it if nothing was written. Returns the final interval.
    pub fn release(&mut self, id: IntervalId) -> Result<Interval> {
        let at = self.position(id)?;
        self.items[at].ongoing = false;
        let interval = self.items[at];
        if interval.is_empty() {
            self.items.remove(at);
        }
        Ok(interval)
    }

    pub fn as_slice(&self) -> &[Interval] {
        &self.items
    }

    pub fn covered(&self) -> u64 {
        self.items.iter().map(Interval::len).sum()
    }
}

/// Thread-safe ledger shared by all workers of one download
#[derive(Debug)]
pub struct IntervalLedger {
    inner: Mutex<Intervals>,
}

impl IntervalLedger {
    pub fn new(size: u64, min_insertion_interval: u64) -> Self {
        Self {
            inner: Mutex::new(Intervals::new(size, min_insertion_interval)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Intervals> {
        // A worker panicking mid-update leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Select a start offset and register it as ongoing in one critical section.
    pub fn claim(&self) -> Assignment {
        self.claim_with(&mut rand::thread_rng())
    }

    pub fn claim_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Assignment {
        let mut list = self.lock();
        match list.select_claim(rng) {
            Claim::Offset(offset) => Assignment::Range(list.open_at(offset)),
            Claim::Standby => Assignment::Standby,
            Claim::Finished => Assignment::Finished,
        }
    }

    /// Register an ongoing interval at a fixed offset (initial dispatch).
    pub fn claim_at(&self, offset: u64) -> Interval {
        self.lock().open_at(offset)
    }

    pub fn advance(&self, id: IntervalId, len: u64) -> Result<Advance> {
        self.lock().advance(id, len)
    }

    pub fn release(&self, id: IntervalId) -> Result<Interval> {
        self.lock().release(id)
    }

    pub fn get(&self, id: IntervalId) -> Result<Interval> {
        self.lock().get(id)
    }

    pub fn select_claim(&self) -> Claim {
        self.lock().select_claim(&mut rand::thread_rng())
    }

    /// Copy of the current interval list, sentinels included.
    pub fn snapshot(&self) -> Vec<Interval> {
        self.lock().as_slice().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn assert_sorted_disjoint(list: &Intervals) {
        for pair in list.as_slice().windows(2) {
            assert!(pair[0].start <= pair[1].start, "unsorted: {:?}", pair);
            assert!(pair[0].end <= pair[1].start, "overlap: {:?}", pair);
        }
    }

    #[test]
    fn test_sentinels_and_first_claim() {
        let list = Intervals::new(100, 10);
        let items = list.as_slice();
        assert_eq!(items.len(), 2);
        assert_eq!((items[0].start, items[0].end), (0, 0));
        assert_eq!((items[1].start, items[1].end), (100, 100));
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(list.select_claim(&mut rng), Claim::Offset(0));
    }

    #[test]
    fn test_insert_after_equal_start() {
        let mut list = Intervals::new(100, 10);
        let claimed = list.open_at(0);
        assert_eq!(list.as_slice()[1].id, claimed.id);
        assert_eq!(list.next_of(claimed.id).unwrap().start, 100);
    }

    #[test]
    fn test_next_of_last_is_not_found() {
        let list = Intervals::new(100, 10);
        let last = list.as_slice()[1].id;
        assert!(matches!(list.next_of(last), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_empty_resource_is_finished() {
        let list = Intervals::new(0, 10);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(list.select_claim(&mut rng), Claim::Finished);
    }

    #[test]
    fn test_split_lies_strictly_inside_gap() {
        let mut list = Intervals::new(1000, 100);
        let a = list.open_at(0);
        list.advance(a.id, 200).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        match list.select_claim(&mut rng) {
            Claim::Offset(o) => {
                assert!(o > 200 && o < 1000, "offset {}", o);
                assert_eq!(o, 600);
            }
            other => panic!("expected split, got {:?}", other),
        }
    }

    #[test]
    fn test_small_gap_behind_ongoing_is_standby() {
        let mut list = Intervals::new(1000, 100);
        let a = list.open_at(0);
        list.advance(a.id, 950).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(list.select_claim(&mut rng), Claim::Standby);
    }

    #[test]
    fn test_stopped_interval_resumes_at_end() {
        let mut list = Intervals::new(1000, 100);
        let a = list.open_at(0);
        list.advance(a.id, 990).unwrap();
        list.release(a.id).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(list.select_claim(&mut rng), Claim::Offset(990));
    }

    #[test]
    fn test_advance_truncates_at_next_start() {
        let mut list = Intervals::new(1000, 100);
        let a = list.open_at(0);
        let b = list.open_at(500);
        let step = list.advance(a.id, 400).unwrap();
        assert_eq!(step, Advance { accepted: 400, reached_next: false });
        let step = list.advance(a.id, 400).unwrap();
        assert_eq!(step, Advance { accepted: 100, reached_next: true });
        assert_eq!(list.get(a.id).unwrap().end, list.get(b.id).unwrap().start);
        assert_sorted_disjoint(&list);
    }

    #[test]
    fn test_exact_fit_stops() {
        let mut list = Intervals::new(100, 10);
        let a = list.open_at(0);
        let step = list.advance(a.id, 100).unwrap();
        assert_eq!(step, Advance { accepted: 100, reached_next: true });
    }

    #[test]
    fn test_release_removes_empty_interval() {
        let mut list = Intervals::new(100, 10);
        let a = list.open_at(40);
        let released = list.release(a.id).unwrap();
        assert!(released.is_empty());
        assert_eq!(list.as_slice().len(), 2);
        assert!(list.get(a.id).is_err());
    }

    #[test]
    fn test_finished_iff_no_gap() {
        let mut list = Intervals::new(100, 10);
        let a = list.open_at(0);
        let b = list.open_at(50);
        list.advance(a.id, 50).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert_ne!(list.select_claim(&mut rng), Claim::Finished);
        list.advance(b.id, 50).unwrap();
        // still ongoing, but nothing uncovered
        assert_eq!(list.select_claim(&mut rng), Claim::Finished);
        list.release(a.id).unwrap();
        list.release(b.id).unwrap();
        assert_eq!(list.select_claim(&mut rng), Claim::Finished);
        assert_eq!(list.covered(), 100);
    }

    #[test]
    fn test_random_claims_keep_ledger_consistent() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut list = Intervals::new(10_000, 500);
        let mut live: Vec<IntervalId> = Vec::new();
        for step in 0..2_000u32 {
            if live.len() < 4 {
                if let Claim::Offset(o) = list.select_claim(&mut rng) {
                    live.push(list.open_at(o).id);
                }
            }
            if live.is_empty() {
                break;
            }
            let pick = rng.gen_range(0..live.len());
            let id = live[pick];
            let stop = if step % 7 == 0 {
                true
            } else {
                list.advance(id, rng.gen_range(1..300)).unwrap().reached_next
            };
            if stop {
                list.release(id).unwrap();
                live.swap_remove(pick);
            }
            assert_sorted_disjoint(&list);
        }
        for id in live {
            list.release(id).unwrap();
        }
        assert_sorted_disjoint(&list);
    }

    #[test]
    fn test_shared_claim_registers_interval() {
        let ledger = IntervalLedger::new(100, 10);
        let interval = match ledger.claim() {
            Assignment::Range(interval) => interval,
            other => panic!("expected a range, got {:?}", other),
        };
        assert_eq!(interval.start, 0);
        assert!(ledger.get(interval.id).unwrap().ongoing);
        assert_eq!(ledger.select_claim(), Claim::Offset(50));
    }
}
