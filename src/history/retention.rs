//! Retention boundaries, cleanup and eviction
//!
//! The same day-boundary computation backs both the retention cleanup and the
//! time-window filter, so "what is kept" and "what is searchable" agree.

use super::HistoryEntry;
use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};

/// Which end of a calendar day a boundary snaps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayEdge {
    /// 00:00:00.000
    Start,
    /// 23:59:59.999
    End,
}

/// Computes day boundaries relative to a fixed instant
#[derive(Debug, Clone, Copy)]
pub struct DayBoundaries {
    now: DateTime<Utc>,
    offset: Option<FixedOffset>,
}

impl DayBoundaries {
    /// `offset` pins the timezone; `None` uses the host timezone
    pub fn new(now: DateTime<Utc>, offset: Option<FixedOffset>) -> Self {
        Self { now, offset }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Epoch milliseconds of the start or end of the day `days` days ago
    pub fn boundary(&self, days: u32, edge: DayEdge) -> i64 {
        retention_boundary(self.now, days, edge, self.offset)
    }
}

/// Snap `now - days` to the first or last millisecond of that calendar day
pub fn retention_boundary(
    now: DateTime<Utc>,
    days: u32,
    edge: DayEdge,
    offset: Option<FixedOffset>,
) -> i64 {
    match offset {
        Some(offset) => snap_to_day(&now.with_timezone(&offset), days, edge),
        None => snap_to_day(&now.with_timezone(&Local), days, edge),
    }
}

fn snap_to_day<Tz: TimeZone>(now: &DateTime<Tz>, days: u32, edge: DayEdge) -> i64 {
    let day = now.date_naive() - Duration::days(i64::from(days));
    let start = day.and_time(NaiveTime::MIN);
    let tz = now.timezone();
    let fallback = now.offset().fix();

    match edge {
        DayEdge::Start => local_millis(&tz, start, fallback),
        DayEdge::End => local_millis(&tz, start + Duration::days(1), fallback) - 1,
    }
}

fn local_millis<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime, fallback: FixedOffset) -> i64 {
    match tz.from_local_datetime(&local).earliest() {
        Some(instant) => instant.timestamp_millis(),
        // Local midnight skipped by a DST jump
        None => (local - Duration::seconds(i64::from(fallback.local_minus_utc())))
            .and_utc()
            .timestamp_millis(),
    }
}

/// Whether an entry survives a retention boundary
pub fn is_retained(entry: &HistoryEntry, boundary: i64) -> bool {
    entry.starred || entry.last_activity() > boundary
}

/// Drop unstarred entries whose last activity is at or before `boundary`.
///
/// Returns the number of dropped entries.
pub fn apply_retention(entries: &mut Vec<HistoryEntry>, boundary: i64) -> usize {
    let before = entries.len();
    entries.retain(|entry| is_retained(entry, boundary));
    before - entries.len()
}

/// Evict the oldest unstarred entries until at most `max_items` remain.
///
/// `entries` is newest first; the scan runs from the tail toward the head, so
/// the head is only evicted when everything behind it is starred. Starred
/// entries are never evicted, so an all-starred list may stay above the cap.
/// Returns the number of evicted entries.
pub fn evict_to_capacity(entries: &mut Vec<HistoryEntry>, max_items: usize) -> usize {
    if entries.len() <= max_items {
        return 0;
    }

    let excess = entries.len() - max_items;
    let mut evict = vec![false; entries.len()];
    let mut evicted = 0;

    for index in (0..entries.len()).rev() {
        if evicted == excess {
            break;
        }
        if !entries[index].starred {
            evict[index] = true;
            evicted += 1;
        }
    }

    let mut flags = evict.into_iter();
    entries.retain(|_| !flags.next().unwrap_or(false));
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn utc() -> Option<FixedOffset> {
        FixedOffset::east_opt(0)
    }

    fn entry(created_at: i64, starred: bool) -> HistoryEntry {
        HistoryEntry {
            id: created_at.to_string(),
            created_at,
            last_executed_at: None,
            datasource_uid: String::new(),
            datasource_name: "ds".to_string(),
            starred,
            comment: String::new(),
            queries: Vec::new(),
        }
    }

    #[test]
    fn test_boundary_snaps_to_day_edges() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 15, 30, 0).unwrap();

        let start = retention_boundary(now, 2, DayEdge::Start, utc());
        let expected_start = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap();
        assert_eq!(start, expected_start.timestamp_millis());

        let end = retention_boundary(now, 2, DayEdge::End, utc());
        let expected_end = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
        assert_eq!(end, expected_end.timestamp_millis() - 1);

        let today_end = retention_boundary(now, 0, DayEdge::End, utc());
        assert!(today_end > now.timestamp_millis());
    }

    #[test]
    fn test_boundary_respects_offset() {
        // 23:30 UTC is already the next day at UTC+2
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).unwrap();
        let plus_two = FixedOffset::east_opt(2 * 3600);

        let start = retention_boundary(now, 0, DayEdge::Start, plus_two);
        let expected = Utc.with_ymd_and_hms(2024, 3, 10, 22, 0, 0).unwrap();
        assert_eq!(start, expected.timestamp_millis());
    }

    #[test]
    fn test_day_boundaries_helper() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 15, 30, 0).unwrap();
        let days = DayBoundaries::new(now, utc());
        assert_eq!(days.now(), now);
        assert_eq!(
            days.boundary(7, DayEdge::Start),
            retention_boundary(now, 7, DayEdge::Start, utc())
        );
    }

    #[test]
    fn test_apply_retention_keeps_starred_and_recent() {
        let mut entries = vec![entry(500, false), entry(100, true), entry(100, false)];
        let mut refreshed = entry(50, false);
        refreshed.last_executed_at = Some(600);
        entries.push(refreshed);

        let dropped = apply_retention(&mut entries, 200);
        assert_eq!(dropped, 1);
        let kept: Vec<i64> = entries.iter().map(|e| e.created_at).collect();
        assert_eq!(kept, vec![500, 100, 50]);
        assert!(entries[1].starred);
    }

    #[test]
    fn test_evict_removes_oldest_unstarred() {
        // newest first
        let mut entries = vec![
            entry(10, false),
            entry(9, true),
            entry(8, false),
            entry(7, false),
            entry(6, true),
            entry(5, false),
        ];

        let evicted = evict_to_capacity(&mut entries, 4);
        assert_eq!(evicted, 2);
        let kept: Vec<i64> = entries.iter().map(|e| e.created_at).collect();
        assert_eq!(kept, vec![10, 9, 8, 6]);
    }

    #[test]
    fn test_evict_takes_unstarred_head_when_rest_is_starred() {
        let mut entries = vec![entry(4, false), entry(3, true), entry(2, true)];
        let evicted = evict_to_capacity(&mut entries, 2);
        assert_eq!(evicted, 1);
        let kept: Vec<i64> = entries.iter().map(|e| e.created_at).collect();
        assert_eq!(kept, vec![3, 2]);
    }

    #[test]
    fn test_evict_never_removes_starred() {
        let mut entries = vec![entry(4, true), entry(3, true), entry(2, true), entry(1, true)];
        let evicted = evict_to_capacity(&mut entries, 2);
        assert_eq!(evicted, 0);
        assert_eq!(entries.len(), 4);
    }

    #[test]
    fn test_evict_below_cap_is_noop() {
        let mut entries = vec![entry(2, false), entry(1, false)];
        assert_eq!(evict_to_capacity(&mut entries, 2), 0);
        assert_eq!(entries.len(), 2);
    }

    proptest! {
        #[test]
        fn property_eviction_respects_cap_and_stars(
            starred in prop::collection::vec(any::<bool>(), 1..200),
            max_items in 1usize..100,
        ) {
            let total = starred.len() as i64;
            let mut entries: Vec<HistoryEntry> = starred
                .iter()
                .enumerate()
                .map(|(i, s)| entry(total - i as i64, *s))
                .collect();
            let original = entries.clone();
            let starred_before = entries.iter().filter(|e| e.starred).count();

            let evicted = evict_to_capacity(&mut entries, max_items);

            prop_assert_eq!(entries.len() + evicted, original.len());
            prop_assert_eq!(entries.iter().filter(|e| e.starred).count(), starred_before);
            prop_assert!(entries.len() <= max_items || entries.iter().all(|e| e.starred));

            // Survivors keep their relative order
            let kept: Vec<&HistoryEntry> = original
                .iter()
                .filter(|e| entries.iter().any(|k| k.created_at == e.created_at))
                .collect();
            prop_assert_eq!(kept, entries.iter().collect::<Vec<_>>());

            // Removed entries are exactly the oldest unstarred ones
            let mut removed: Vec<i64> = original
                .iter()
                .filter(|e| !entries.iter().any(|k| k.created_at == e.created_at))
                .map(|e| e.created_at)
                .collect();
            let mut expected: Vec<i64> = original
                .iter()
                .rev()
                .filter(|e| !e.starred)
                .take(evicted)
                .map(|e| e.created_at)
                .collect();
            removed.sort_unstable();
            expected.sort_unstable();
            prop_assert_eq!(removed, expected);
        }

        #[test]
        fn property_retention_survivors_are_starred_or_recent(
            items in prop::collection::vec((0i64..1000, any::<bool>(), proptest::option::of(0i64..1000)), 0..100),
            boundary in 0i64..1000,
        ) {
            let mut entries: Vec<HistoryEntry> = items
                .iter()
                .map(|(ts, s, last)| {
                    let mut e = entry(*ts, *s);
                    e.last_executed_at = *last;
                    e
                })
                .collect();

            apply_retention(&mut entries, boundary);

            for e in &entries {
                prop_assert!(e.starred || e.last_activity() > boundary);
            }
        }
    }
}
