use crate::models::MetricSeries;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

/// When two source timestamps count as the same master timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchTolerance {
    /// Same UTC calendar date.
    #[default]
    CalendarDay,
    /// Within `Duration` of the earliest member of the slot.
    Window(Duration),
    /// Identical instants only.
    Exact,
}

impl MatchTolerance {
    /// Whether `ts` belongs to the slot anchored at `anchor` (`anchor <= ts`).
    pub fn same_slot(self, anchor: DateTime<Utc>, ts: DateTime<Utc>) -> bool {
        match self {
            MatchTolerance::CalendarDay => anchor.date_naive() == ts.date_naive(),
            MatchTolerance::Window(width) => ts - anchor < width,
            MatchTolerance::Exact => anchor == ts,
        }
    }
}

/// Sorted, de-duplicated master timestamps. Each anchor is the earliest source
/// timestamp of its slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    anchors: Vec<DateTime<Utc>>,
    tolerance: MatchTolerance,
}

impl Timeline {
    /// Collect every timestamp of every series, visible or not, and fold
    /// neighbours into slots according to `tolerance`.
    pub fn build<'a>(
        series: impl IntoIterator<Item = &'a MetricSeries>,
        tolerance: MatchTolerance,
    ) -> Self {
        let all: BTreeSet<DateTime<Utc>> = series
            .into_iter()
            .flat_map(|s| s.points.keys().copied())
            .collect();

        let mut anchors: Vec<DateTime<Utc>> = Vec::new();
        for ts in all {
            match anchors.last() {
                Some(&anchor) if tolerance.same_slot(anchor, ts) => {}
                _ => anchors.push(ts),
            }
        }

        Self { anchors, tolerance }
    }

    pub fn anchors(&self) -> &[DateTime<Utc>] {
        &self.anchors
    }

    pub fn tolerance(&self) -> MatchTolerance {
        self.tolerance
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Index of the slot `ts` falls into, if any.
    pub fn slot_of(&self, ts: DateTime<Utc>) -> Option<usize> {
        let idx = self.anchors.partition_point(|a| *a <= ts);
        let slot = idx.checked_sub(1)?;
        self.tolerance
            .same_slot(self.anchors[slot], ts)
            .then_some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AxisKind, MetricFamily};
    use chrono::TimeZone;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap()
    }

    fn series(key: &str, stamps: &[DateTime<Utc>]) -> MetricSeries {
        let mut s = MetricSeries::new(key.into(), key, "#000", MetricFamily::Price, AxisKind::Currency);
        for &t in stamps {
            s.insert(t, Some(1.0));
        }
        s
    }

    #[test]
    fn test_same_day_samples_share_one_anchor() {
        let a = series("amazon_price", &[at(1, 8)]);
        let b = series("buybox_price", &[at(1, 20)]);
        let tl = Timeline::build([&a, &b], MatchTolerance::CalendarDay);
        assert_eq!(tl.anchors(), &[at(1, 8)]);
        assert_eq!(tl.slot_of(at(1, 20)), Some(0));
    }

    #[test]
    fn test_anchors_sorted_and_unique() {
        let a = series("amazon_price", &[at(3, 0), at(1, 0)]);
        let b = series("buybox_price", &[at(1, 0), at(2, 5)]);
        let tl = Timeline::build([&a, &b], MatchTolerance::CalendarDay);
        assert_eq!(tl.anchors(), &[at(1, 0), at(2, 5), at(3, 0)]);
    }

    #[test]
    fn test_calendar_day_splits_at_midnight_window_does_not() {
        let a = series("amazon_price", &[at(1, 20), at(2, 4)]);
        let day = Timeline::build([&a], MatchTolerance::CalendarDay);
        assert_eq!(day.len(), 2);

        let window = Timeline::build([&a], MatchTolerance::Window(Duration::hours(24)));
        assert_eq!(window.anchors(), &[at(1, 20)]);
        assert_eq!(window.slot_of(at(2, 4)), Some(0));
        assert_eq!(window.slot_of(at(2, 21)), None);
    }

    #[test]
    fn test_exact_keeps_every_instant() {
        let a = series("amazon_price", &[at(1, 8), at(1, 20)]);
        let tl = Timeline::build([&a], MatchTolerance::Exact);
        assert_eq!(tl.len(), 2);
        assert_eq!(tl.slot_of(at(1, 9)), None);
    }

    #[test]
    fn test_no_series_empty_timeline() {
        let tl = Timeline::build(std::iter::empty(), MatchTolerance::default());
        assert!(tl.is_empty());
        assert_eq!(tl.slot_of(at(1, 0)), None);
    }
}
