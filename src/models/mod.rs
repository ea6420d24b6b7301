use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ── Metric identity ───────────────────────────────────────────────────────────

/// Stable identifier of one metric series, e.g. `amazon_price`, `main_bsr`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricKey(String);

impl MetricKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MetricKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The endpoint family a series was fetched from. Each family is fetched
/// independently and rendered as its own chart section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricFamily {
    Price,
    SalesRank,
    Rating,
}

impl MetricFamily {
    pub const ALL: [MetricFamily; 3] = [
        MetricFamily::Price,
        MetricFamily::SalesRank,
        MetricFamily::Rating,
    ];

    /// Field inside a raw point that carries the observation.
    pub fn value_field(self) -> &'static str {
        match self {
            MetricFamily::Price => "price",
            MetricFamily::SalesRank => "rank",
            MetricFamily::Rating => "value",
        }
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricFamily::Price => "price",
            MetricFamily::SalesRank => "sales_rank",
            MetricFamily::Rating => "rating",
        };
        f.write_str(s)
    }
}

/// How a metric is scaled and formatted on a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisKind {
    Currency,
    /// Lower is better; drawn on an inverted axis.
    Rank,
    Count,
    Rating,
}

impl AxisKind {
    pub fn is_inverted(self) -> bool {
        matches!(self, AxisKind::Rank)
    }
}

// ── Points and series ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    /// `None` = no observation at this instant. `Some(0.0)` is a real zero.
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSeries {
    pub key: MetricKey,
    pub label: String,
    pub color: String,
    pub family: MetricFamily,
    pub axis: AxisKind,
    pub points: BTreeMap<DateTime<Utc>, MetricPoint>,
}

impl MetricSeries {
    pub fn new(
        key: MetricKey,
        label: impl Into<String>,
        color: impl Into<String>,
        family: MetricFamily,
        axis: AxisKind,
    ) -> Self {
        Self {
            key,
            label: label.into(),
            color: color.into(),
            family,
            axis,
            points: BTreeMap::new(),
        }
    }

    /// Insert a point; a later point with the same timestamp replaces the earlier one.
    pub fn insert(&mut self, timestamp: DateTime<Utc>, value: Option<f64>) {
        self.points.insert(timestamp, MetricPoint { timestamp, value });
    }

    pub fn with_point(mut self, timestamp: DateTime<Utc>, value: Option<f64>) -> Self {
        self.insert(timestamp, value);
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// True when at least one point carries an observation.
    pub fn has_observations(&self) -> bool {
        self.points.values().any(|p| p.value.is_some())
    }
}

// ── Time range ────────────────────────────────────────────────────────────────

/// Backend fetch window. Each range is fetched independently; it is never a
/// client-side filter over another range's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum TimeRange {
    #[serde(rename = "7d")]
    Week,
    #[default]
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
    #[serde(rename = "1y")]
    Year,
    #[serde(rename = "all")]
    All,
    #[serde(rename = "current")]
    Current,
}

impl TimeRange {
    pub const ALL: [TimeRange; 6] = [
        TimeRange::Week,
        TimeRange::Month,
        TimeRange::Quarter,
        TimeRange::Year,
        TimeRange::All,
        TimeRange::Current,
    ];

    /// Value sent as the `period` query parameter.
    pub fn period(self) -> &'static str {
        match self {
            TimeRange::Week => "7d",
            TimeRange::Month => "30d",
            TimeRange::Quarter => "90d",
            TimeRange::Year => "1y",
            TimeRange::All => "all",
            TimeRange::Current => "current",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeRange::Week => "7 days",
            TimeRange::Month => "30 days",
            TimeRange::Quarter => "90 days",
            TimeRange::Year => "1 year",
            TimeRange::All => "All time",
            TimeRange::Current => "Current",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.period())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown time range '{0}' (expected one of 7d, 30d, 90d, 1y, all, current)")]
pub struct ParseTimeRangeError(pub String);

impl FromStr for TimeRange {
    type Err = ParseTimeRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        TimeRange::ALL
            .into_iter()
            .find(|r| r.period() == s)
            .ok_or(ParseTimeRangeError(s))
    }
}

// ── Bundle ────────────────────────────────────────────────────────────────────

/// Identity of one fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleKey {
    pub asin: String,
    pub marketplace_id: u32,
    pub range: TimeRange,
}

impl BundleKey {
    pub fn new(asin: impl Into<String>, marketplace_id: u32, range: TimeRange) -> Self {
        Self {
            asin: asin.into().trim().to_uppercase(),
            marketplace_id,
            range,
        }
    }

    pub fn with_range(&self, range: TimeRange) -> Self {
        Self {
            range,
            ..self.clone()
        }
    }
}

impl fmt::Display for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.asin, self.marketplace_id, self.range)
    }
}

/// Every series fetched in one cycle. Built once and replaced wholesale; never
/// patched in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductMetricsBundle {
    pub key: BundleKey,
    pub series: Vec<MetricSeries>,
    pub fetched_at: DateTime<Utc>,
}

impl ProductMetricsBundle {
    pub fn new(key: BundleKey, series: Vec<MetricSeries>) -> Self {
        Self {
            key,
            series,
            fetched_at: Utc::now(),
        }
    }

    /// Every metric key known to this bundle, in series order.
    pub fn keys(&self) -> Vec<MetricKey> {
        self.series.iter().map(|s| s.key.clone()).collect()
    }

    pub fn series(&self, key: &MetricKey) -> Option<&MetricSeries> {
        self.series.iter().find(|s| &s.key == key)
    }

    pub fn family_series(&self, family: MetricFamily) -> impl Iterator<Item = &MetricSeries> {
        self.series.iter().filter(move |s| s.family == family)
    }

    pub fn point_count(&self) -> usize {
        self.series.iter().map(MetricSeries::len).sum()
    }

    /// True when no series carries a single observation.
    pub fn is_empty(&self) -> bool {
        !self.series.iter().any(MetricSeries::has_observations)
    }
}

// ── Merged row ────────────────────────────────────────────────────────────────

/// One reconciled record per master timestamp. Absent metrics are `None`,
/// never `0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRow {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub values: BTreeMap<MetricKey, Option<f64>>,
}

impl MergedRow {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &MetricKey) -> Option<f64> {
        self.values.get(key).copied().flatten()
    }

    pub fn has_data(&self) -> bool {
        self.values.values().any(Option::is_some)
    }

    pub fn has_data_in<'a>(&self, keys: impl IntoIterator<Item = &'a MetricKey>) -> bool {
        keys.into_iter().any(|k| self.get(k).is_some())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
