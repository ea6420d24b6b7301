use super::timeline::{MatchTolerance, Timeline};
use crate::models::{MergedRow, MetricSeries};
use tracing::debug;

/// Build the merged table for `series`.
///
/// Every known key appears in every row. Rows in which all keys are `None`
/// are dropped. Output is ascending by timestamp.
pub fn merge_series(series: &[MetricSeries], tolerance: MatchTolerance) -> Vec<MergedRow> {
    let timeline = Timeline::build(series, tolerance);
    merge_on(&timeline, series)
}

/// Fill one row per anchor of `timeline`.
///
/// Per slot and series the exact match wins, then the nearest non-null
/// observation in the same slot (earlier wins a tie).
pub fn merge_on(timeline: &Timeline, series: &[MetricSeries]) -> Vec<MergedRow> {
    let anchors = timeline.anchors();

    let mut rows: Vec<MergedRow> = anchors
        .iter()
        .map(|&t| {
            let mut row = MergedRow::new(t);
            for s in series {
                row.values.insert(s.key.clone(), None);
            }
            row
        })
        .collect();

    for s in series {
        let mut best: Vec<Option<(i64, f64)>> = vec![None; anchors.len()];

        for point in s.points.values() {
            let Some(value) = point.value else { continue };
            let Some(slot) = timeline.slot_of(point.timestamp) else {
                continue;
            };
            let distance = (point.timestamp - anchors[slot]).num_milliseconds().abs();
            match best[slot] {
                Some((d, _)) if d <= distance => {}
                _ => best[slot] = Some((distance, value)),
            }
        }

        for (slot, hit) in best.into_iter().enumerate() {
            if let Some((_, value)) = hit {
                rows[slot].values.insert(s.key.clone(), Some(value));
            }
        }
    }

    let before = rows.len();
    rows.retain(MergedRow::has_data);
    debug!(
        "merged {} series into {} rows ({} all-null dropped)",
        series.len(),
        rows.len(),
        before - rows.len()
    );
    rows
}
