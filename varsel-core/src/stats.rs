//! Indicator hit statistics shared between the consume loop and the metrics
//! surface.
//!
//! The tracker is the only cross-task mutable state in a worker process: the
//! consume loop writes on every positive match, the metrics surface reads on
//! demand. All access goes through one mutex; `snapshot` copies entries out
//! so callers never alias internal storage.
//!
//! Entries are never evicted. Growth is bounded only by the number of
//! distinct indicator values seen over the process lifetime, which operators
//! accept for this workload.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Occurrence record for one indicator value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchStat {
    /// Indicator value this entry tracks (address or extracted string).
    #[serde(rename = "domain")]
    pub indicator: String,
    pub count: u64,
    /// Empty until the second occurrence, then updated on every repeat.
    #[serde(rename = "lastseen")]
    pub last_seen: String,
    /// Set once when the entry is created.
    #[serde(rename = "firstseen")]
    pub first_seen: String,
}

type ClockFn = fn() -> DateTime<Utc>;

/// Process-wide table of indicator occurrence counters.
///
/// Cheap to clone; clones share the same underlying table.
#[derive(Clone)]
pub struct StatsTracker {
    table: Arc<Mutex<HashMap<String, MatchStat>>>,
    clock: ClockFn,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    /// Constructs a tracker with an injected clock, for deterministic tests.
    pub fn with_clock(clock: ClockFn) -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Records one occurrence of an indicator value.
    ///
    /// First occurrence inserts `count=1` with `first_seen` set and
    /// `last_seen` empty; repeats increment the count and refresh
    /// `last_seen` only.
    pub fn record(&self, indicator: &str) {
        let now = (self.clock)().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut table = self.table.lock();
        match table.get_mut(indicator) {
            Some(entry) => {
                entry.count += 1;
                entry.last_seen = now;
            }
            None => {
                table.insert(
                    indicator.to_string(),
                    MatchStat {
                        indicator: indicator.to_string(),
                        count: 1,
                        last_seen: String::new(),
                        first_seen: now,
                    },
                );
            }
        }
    }

    /// Point-in-time copy of all tracked entries, ordered by indicator value
    /// for stable external output.
    pub fn snapshot(&self) -> Vec<MatchStat> {
        let mut entries: Vec<MatchStat> = self.table.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.indicator.cmp(&b.indicator));
        entries
    }

    /// Number of distinct indicator values tracked so far.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn first_occurrence_sets_first_seen_only() {
        let tracker = StatsTracker::with_clock(fixed_clock);
        tracker.record("1.2.3.4");

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].indicator, "1.2.3.4");
        assert_eq!(snapshot[0].count, 1);
        assert_eq!(snapshot[0].first_seen, "2024-01-02T03:04:05Z");
        assert_eq!(snapshot[0].last_seen, "");
    }

    #[test]
    fn repeat_occurrence_updates_last_seen_not_first_seen() {
        let tracker = StatsTracker::with_clock(fixed_clock);
        tracker.record("1.2.3.4");
        tracker.record("1.2.3.4");

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot[0].count, 2);
        assert_eq!(snapshot[0].first_seen, "2024-01-02T03:04:05Z");
        assert_eq!(snapshot[0].last_seen, "2024-01-02T03:04:05Z");
    }

    #[test]
    fn snapshot_is_idempotent_between_writes() {
        let tracker = StatsTracker::new();
        tracker.record("a");
        tracker.record("b");
        assert_eq!(tracker.snapshot(), tracker.snapshot());
    }

    #[test]
    fn snapshot_does_not_alias_internal_storage() {
        let tracker = StatsTracker::new();
        tracker.record("a");
        let mut snapshot = tracker.snapshot();
        snapshot[0].count = 999;
        assert_eq!(tracker.snapshot()[0].count, 1);
    }

    #[test]
    fn serializes_with_historical_field_names() {
        let tracker = StatsTracker::with_clock(fixed_clock);
        tracker.record("evil.example");
        let json = serde_json::to_value(tracker.snapshot()).unwrap();
        assert_eq!(json[0]["domain"], "evil.example");
        assert_eq!(json[0]["firstseen"], "2024-01-02T03:04:05Z");
        assert_eq!(json[0]["lastseen"], "");
    }

    #[test]
    fn concurrent_snapshots_during_sustained_records() {
        let tracker = StatsTracker::new();
        let writer = {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                for i in 0..10_000u32 {
                    tracker.record(&format!("10.0.{}.{}", i / 256, i % 256));
                }
            })
        };
        let reader = {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let snapshot = tracker.snapshot();
                    assert!(snapshot.iter().all(|s| s.count >= 1));
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(tracker.len(), 10_000);
    }
}
