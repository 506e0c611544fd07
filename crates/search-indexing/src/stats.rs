//! Indexing counters: commit bookkeeping and hourly rates.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Completed hours kept besides the current one.
const HISTORY_HOURS: usize = 24;

pub const RATE_INDEXED: &str = "indexed";
pub const RATE_DELETED: &str = "deleted";
pub const RATE_FAILED: &str = "failed";
pub const RATE_COMMITS: &str = "commits";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourlyRate {
    pub hour: DateTime<Utc>,
    pub counts: BTreeMap<String, u64>,
}

impl HourlyRate {
    fn new(hour: DateTime<Utc>) -> Self {
        Self {
            hour,
            counts: BTreeMap::new(),
        }
    }
}

/// Per-category event counts bucketed by hour.
#[derive(Debug)]
pub struct RateAccumulator {
    current: HourlyRate,
    history: VecDeque<HourlyRate>,
}

impl RateAccumulator {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            current: HourlyRate::new(start_of_hour(now)),
            history: VecDeque::with_capacity(HISTORY_HOURS),
        }
    }

    pub fn record(&mut self, category: &str, count: u64, now: DateTime<Utc>) {
        self.roll(now);
        *self.current.counts.entry(category.to_string()).or_default() += count;
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        let hour = start_of_hour(now);
        if hour <= self.current.hour {
            return;
        }
        let finished = std::mem::replace(&mut self.current, HourlyRate::new(hour));
        self.history.push_back(finished);
        while self.history.len() > HISTORY_HOURS {
            self.history.pop_front();
        }
    }

    /// Completed hours oldest first, then the current hour.
    pub fn buckets(&self) -> Vec<HourlyRate> {
        self.history
            .iter()
            .cloned()
            .chain(std::iter::once(self.current.clone()))
            .collect()
    }

    /// Sum of `category` over every retained bucket.
    pub fn total(&self, category: &str) -> u64 {
        self.history
            .iter()
            .chain(std::iter::once(&self.current))
            .filter_map(|b| b.counts.get(category))
            .sum()
    }
}

fn start_of_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).unwrap_or(t)
}

/// Everything guarded by the service's commit lock.
#[derive(Debug)]
pub(crate) struct CommitState {
    pub(crate) since_commit: u64,
    pub(crate) last_indexed: Option<Instant>,
    pub(crate) commits: u64,
    pub(crate) last_commit: Option<DateTime<Utc>>,
    pub(crate) total_indexed: u64,
    pub(crate) total_failed: u64,
    pub(crate) rates: RateAccumulator,
}

impl CommitState {
    pub(crate) fn new() -> Self {
        Self {
            since_commit: 0,
            last_indexed: None,
            commits: 0,
            last_commit: None,
            total_indexed: 0,
            total_failed: 0,
            rates: RateAccumulator::new(Utc::now()),
        }
    }

    /// A document was written to or removed from the index.
    pub(crate) fn record_change(&mut self, category: &str) {
        self.since_commit += 1;
        self.last_indexed = Some(Instant::now());
        if category == RATE_INDEXED {
            self.total_indexed += 1;
        }
        self.rates.record(category, 1, Utc::now());
    }

    pub(crate) fn record_failure(&mut self) {
        self.total_failed += 1;
        self.rates.record(RATE_FAILED, 1, Utc::now());
    }

    pub(crate) fn record_commit(&mut self) {
        self.since_commit = 0;
        self.commits += 1;
        self.last_commit = Some(Utc::now());
        self.rates.record(RATE_COMMITS, 1, Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_buckets_roll_hourly() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        let mut rates = RateAccumulator::new(t0);
        rates.record(RATE_INDEXED, 2, t0);
        rates.record(RATE_INDEXED, 1, t0 + Duration::minutes(30));
        rates.record(RATE_INDEXED, 5, t0 + Duration::hours(1));

        let buckets = rates.buckets();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].hour, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(buckets[0].counts[RATE_INDEXED], 3);
        assert_eq!(buckets[1].counts[RATE_INDEXED], 5);
        assert_eq!(rates.total(RATE_INDEXED), 8);
    }

    #[test]
    fn test_history_is_bounded() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut rates = RateAccumulator::new(t0);
        for h in 0..30 {
            rates.record(RATE_DELETED, 1, t0 + Duration::hours(h));
        }
        assert_eq!(rates.buckets().len(), HISTORY_HOURS + 1);
        assert_eq!(rates.total(RATE_DELETED), (HISTORY_HOURS + 1) as u64);
    }

    #[test]
    fn test_commit_state_counters() {
        let mut state = CommitState::new();
        state.record_change(RATE_INDEXED);
        state.record_change(RATE_DELETED);
        state.record_failure();
        assert_eq!(state.since_commit, 2);
        assert_eq!(state.total_indexed, 1);
        assert_eq!(state.total_failed, 1);

        state.record_commit();
        assert_eq!(state.since_commit, 0);
        assert_eq!(state.commits, 1);
        assert!(state.last_commit.is_some());
    }
}
