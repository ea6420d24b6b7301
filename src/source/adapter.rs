//! Normalises one raw history payload into [`MetricSeries`].
//!
//! Payload shape (per family):
//!
//! ```json
//! { "data": { "amazon": { "data": { "2024-01-01T00:00:00Z": { "price": 19.99 } } } } }
//! ```
//!
//! Sub-keys are decoded one at a time so a malformed channel never takes the
//! rest of the payload down with it.

use crate::models::{AxisKind, MetricFamily, MetricKey, MetricSeries};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

// ── Wire DTOs ─────────────────────────────────────────────────────────────────

/// Top-level body of every history endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHistoryPayload {
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    #[serde(default)]
    data: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPoint {
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    rank: Option<f64>,
    #[serde(default)]
    value: Option<f64>,
}

impl RawPoint {
    fn value_for(&self, family: MetricFamily) -> Option<f64> {
        match family {
            MetricFamily::Price => self.price,
            MetricFamily::SalesRank => self.rank,
            MetricFamily::Rating => self.value,
        }
    }
}

// ── Schema ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct ChannelSpec {
    pub sub_key: &'static str,
    pub key: &'static str,
    pub label: &'static str,
    pub color: &'static str,
    pub axis: AxisKind,
}

/// Which sub-keys of a payload are series.
#[derive(Debug, Clone, Copy)]
pub struct FamilySchema {
    pub family: MetricFamily,
    pub channels: &'static [ChannelSpec],
    /// Accept sub-keys outside `channels` (sales-rank categories).
    pub dynamic: bool,
}

const PRICE_CHANNELS: &[ChannelSpec] = &[
    ChannelSpec { sub_key: "amazon", key: "amazon_price", label: "Amazon", color: "#ff9900", axis: AxisKind::Currency },
    ChannelSpec { sub_key: "buybox", key: "buybox_price", label: "Buy Box", color: "#ff00b4", axis: AxisKind::Currency },
    ChannelSpec { sub_key: "new", key: "new_price", label: "New", color: "#8888dd", axis: AxisKind::Currency },
    ChannelSpec { sub_key: "used", key: "used_price", label: "Used", color: "#444444", axis: AxisKind::Currency },
    ChannelSpec { sub_key: "fba", key: "fba_price", label: "New, FBA", color: "#ff5722", axis: AxisKind::Currency },
    ChannelSpec { sub_key: "fbm", key: "fbm_price", label: "New, FBM", color: "#039be5", axis: AxisKind::Currency },
    ChannelSpec { sub_key: "list_price", key: "list_price", label: "List Price", color: "#9e9e9e", axis: AxisKind::Currency },
];

const RANK_CHANNELS: &[ChannelSpec] = &[
    ChannelSpec { sub_key: "main_bsr", key: "main_bsr", label: "Sales Rank", color: "#5c6bc0", axis: AxisKind::Rank },
];

const RATING_CHANNELS: &[ChannelSpec] = &[
    ChannelSpec { sub_key: "rating", key: "rating", label: "Rating", color: "#2e7d32", axis: AxisKind::Rating },
    ChannelSpec { sub_key: "rating_count", key: "rating_count", label: "Rating Count", color: "#00897b", axis: AxisKind::Count },
    ChannelSpec { sub_key: "review_count", key: "review_count", label: "Review Count", color: "#6d4c41", axis: AxisKind::Count },
    ChannelSpec { sub_key: "new_offer_count", key: "new_offer_count", label: "New Offers", color: "#8888dd", axis: AxisKind::Count },
    ChannelSpec { sub_key: "used_offer_count", key: "used_offer_count", label: "Used Offers", color: "#444444", axis: AxisKind::Count },
];

/// Colours handed out to sales-rank categories in order of appearance.
const CATEGORY_PALETTE: &[&str] = &[
    "#8e24aa", "#43a047", "#f4511e", "#00acc1", "#c0ca33", "#6d4c41", "#3949ab",
];

pub fn schema(family: MetricFamily) -> FamilySchema {
    match family {
        MetricFamily::Price => FamilySchema { family, channels: PRICE_CHANNELS, dynamic: false },
        MetricFamily::SalesRank => FamilySchema { family, channels: RANK_CHANNELS, dynamic: true },
        MetricFamily::Rating => FamilySchema { family, channels: RATING_CHANNELS, dynamic: false },
    }
}

// ── Adapter ───────────────────────────────────────────────────────────────────

/// Convert one payload into zero or more series.
///
/// A sub-key without a `data` field yields no series. A malformed sub-key is
/// skipped with a warning. A point without its value field becomes `None`.
pub fn adapt_payload(family: MetricFamily, payload: &RawHistoryPayload) -> Vec<MetricSeries> {
    let Some(data) = payload.data.as_ref() else {
        debug!("{}: payload has no data field", family);
        return vec![];
    };
    let Some(channels) = data.as_object() else {
        warn!("{}: payload data is not an object, ignoring", family);
        return vec![];
    };

    let schema = schema(family);
    let mut out = Vec::new();

    // Advertised channels first, in schema order.
    for spec in schema.channels {
        let Some(raw) = channels.get(spec.sub_key) else { continue };
        let key = MetricKey::new(spec.key);
        if let Some(series) = adapt_channel(family, spec.sub_key, raw, |_| {
            MetricSeries::new(key.clone(), spec.label, spec.color, family, spec.axis)
        }) {
            out.push(series);
        }
    }

    let mut palette = CATEGORY_PALETTE.iter().cycle();
    for (sub_key, raw) in channels {
        if schema.channels.iter().any(|c| c.sub_key == sub_key.as_str()) {
            continue;
        }
        if !schema.dynamic {
            debug!("{}: ignoring unknown sub-key '{}'", family, sub_key);
            continue;
        }

        let slug = slugify(sub_key);
        if slug.is_empty() {
            warn!("{}: sub-key '{}' has no usable name, skipping", family, sub_key);
            continue;
        }
        let key = MetricKey::new(format!("{}_bsr", slug));
        if out.iter().any(|s| s.key == key) {
            warn!("{}: sub-key '{}' collides with existing key {}, skipping", family, sub_key, key);
            continue;
        }
        let color = palette.next().copied().unwrap_or("#757575");
        if let Some(series) = adapt_channel(family, sub_key, raw, |name| {
            let label = name.unwrap_or(sub_key.as_str()).to_string();
            MetricSeries::new(key.clone(), label, color, family, AxisKind::Rank)
        }) {
            out.push(series);
        }
    }

    debug!("{}: {} series adapted", family, out.len());
    out
}

fn adapt_channel(
    family: MetricFamily,
    sub_key: &str,
    raw: &Value,
    make: impl FnOnce(Option<&str>) -> MetricSeries,
) -> Option<MetricSeries> {
    let channel: RawChannel = match serde_json::from_value(raw.clone()) {
        Ok(c) => c,
        Err(e) => {
            warn!("{}: malformed sub-key '{}': {}", family, sub_key, e);
            return None;
        }
    };

    let Some(points) = channel.data else {
        debug!("{}: sub-key '{}' has no data, no series", family, sub_key);
        return None;
    };

    let mut series = make(channel.name.as_deref());
    for (ts_raw, point_raw) in points {
        let Some(ts) = parse_timestamp(&ts_raw) else {
            warn!("{}/{}: unparseable timestamp '{}'", family, sub_key, ts_raw);
            continue;
        };
        let point: Option<RawPoint> = match serde_json::from_value(point_raw) {
            Ok(p) => p,
            Err(e) => {
                warn!("{}/{}: malformed point at {}: {}", family, sub_key, ts_raw, e);
                continue;
            }
        };
        let value = point.and_then(|p| p.value_for(family));
        series.insert(ts, value);
    }

    Some(series)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Parse a timestamp key: RFC 3339, naive ISO, plain dates, or epoch
/// seconds / milliseconds. Naive values are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if s.chars().all(|c| c.is_ascii_digit()) && s.len() >= 9 {
        let n: i64 = s.parse().ok()?;
        // 12+ digits cannot be seconds within this millennium.
        return if s.len() >= 12 {
            Utc.timestamp_millis_opt(n).single()
        } else {
            Utc.timestamp_opt(n, 0).single()
        };
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }

    None
}

/// "Home & Kitchen" → "home_kitchen"
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: Value) -> RawHistoryPayload {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_price_payload_keeps_zero_and_null() {
        let p = payload(json!({
            "data": {
                "amazon": { "data": {
                    "2024-01-01T00:00:00Z": { "price": 0.0 },
                    "2024-01-02T00:00:00Z": { "price": null },
                    "2024-01-03T00:00:00Z": {},
                    "2024-01-04T00:00:00Z": { "price": 12.5 }
                }}
            }
        }));
        let series = adapt_payload(MetricFamily::Price, &p);
        assert_eq!(series.len(), 1);
        let s = &series[0];
        assert_eq!(s.key.as_str(), "amazon_price");
        let values: Vec<Option<f64>> = s.points.values().map(|p| p.value).collect();
        assert_eq!(values, vec![Some(0.0), None, None, Some(12.5)]);
    }

    #[test]
    fn test_sub_key_without_data_yields_no_series() {
        let p = payload(json!({
            "data": {
                "amazon": { "name": "Amazon" },
                "buybox": { "data": { "2024-01-01": { "price": 10.0 } } }
            }
        }));
        let series = adapt_payload(MetricFamily::Price, &p);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].key.as_str(), "buybox_price");
    }

    #[test]
    fn test_malformed_sub_key_does_not_abort_payload() {
        let p = payload(json!({
            "data": {
                "amazon": { "data": "oops" },
                "new": 42,
                "used": { "data": { "2024-01-01": { "price": 7.0 } } }
            }
        }));
        let series = adapt_payload(MetricFamily::Price, &p);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].key.as_str(), "used_price");
    }

    #[test]
    fn test_malformed_point_is_skipped() {
        let p = payload(json!({
            "data": {
                "rating": { "data": {
                    "2024-01-01": { "value": "four" },
                    "2024-01-02": { "value": 4.5 },
                    "not-a-date": { "value": 4.0 }
                }}
            }
        }));
        let series = adapt_payload(MetricFamily::Rating, &p);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].len(), 1);
        assert_eq!(series[0].axis, AxisKind::Rating);
    }

    #[test]
    fn test_sales_rank_categories_are_dynamic() {
        let p = payload(json!({
            "data": {
                "main_bsr": { "data": { "2024-01-01": { "rank": 1200 } } },
                "Home & Kitchen": { "name": "Home & Kitchen", "data": { "2024-01-01": { "rank": 35 } } }
            }
        }));
        let series = adapt_payload(MetricFamily::SalesRank, &p);
        let keys: Vec<&str> = series.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["main_bsr", "home_kitchen_bsr"]);
        assert_eq!(series[1].label, "Home & Kitchen");
        assert!(series.iter().all(|s| s.axis == AxisKind::Rank));
    }

    #[test]
    fn test_unknown_price_sub_key_ignored() {
        let p = payload(json!({
            "data": { "warehouse": { "data": { "2024-01-01": { "price": 3.0 } } } }
        }));
        assert!(adapt_payload(MetricFamily::Price, &p).is_empty());
    }

    #[test]
    fn test_missing_or_non_object_data() {
        assert!(adapt_payload(MetricFamily::Price, &payload(json!({}))).is_empty());
        assert!(adapt_payload(MetricFamily::Price, &payload(json!({ "data": [1, 2] }))).is_empty());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-01T08:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T10:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T08:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 08:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T08:00"), Some(expected));
        assert_eq!(parse_timestamp("1704096000"), Some(expected));
        assert_eq!(parse_timestamp("1704096000000"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-01-01"),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Home & Kitchen"), "home_kitchen");
        assert_eq!(slugify("  Toys  "), "toys");
        assert_eq!(slugify("&&"), "");
    }
}
