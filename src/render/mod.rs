//! Chart-ready frames built from a [`SectionView`].
//!
//! The engine produces plain data; drawing is up to whatever consumes a
//! [`ChartFrame`] (the CLI prints it as a table).

use crate::models::{AxisKind, BundleKey, MetricFamily};
use crate::utils::{fmt_count, fmt_decimal};
use crate::view::SectionView;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Placeholder for a missing observation.
pub const NO_VALUE: &str = "–";

// ── Currency ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Currency {
    pub code: &'static str,
    pub symbol: &'static str,
    pub decimals: usize,
}

impl Currency {
    pub const USD: Currency = Currency { code: "USD", symbol: "$", decimals: 2 };

    /// Currency of an Amazon marketplace, by Keepa domain id. Unknown ids
    /// fall back to USD.
    pub fn for_marketplace(marketplace_id: u32) -> Self {
        let (code, symbol, decimals) = match marketplace_id {
            2 => ("GBP", "£", 2),
            3 | 4 | 8 | 9 => ("EUR", "€", 2),
            5 => ("JPY", "¥", 0),
            6 => ("CAD", "C$", 2),
            10 => ("INR", "₹", 2),
            11 => ("MXN", "MX$", 2),
            _ => return Self::USD,
        };
        Currency { code, symbol, decimals }
    }
}

/// Tooltip / axis label for one value.
pub fn format_value(axis: AxisKind, value: Option<f64>, currency: &Currency) -> String {
    let Some(v) = value.filter(|v| v.is_finite()) else {
        return NO_VALUE.to_string();
    };
    match axis {
        AxisKind::Currency => {
            let body = fmt_decimal(v.abs(), currency.decimals);
            if v < 0.0 {
                format!("-{}{}", currency.symbol, body)
            } else {
                format!("{}{}", currency.symbol, body)
            }
        }
        AxisKind::Rank => format!("#{}", fmt_count(v.round() as i64)),
        AxisKind::Count => fmt_count(v.round() as i64),
        AxisKind::Rating => format!("{:.1}", v),
    }
}

pub fn section_title(section: MetricFamily) -> &'static str {
    match section {
        MetricFamily::Price => "Price History",
        MetricFamily::SalesRank => "Sales Rank",
        MetricFamily::Rating => "Ratings & Offers",
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub key: String,
    pub label: String,
    pub color: String,
    pub axis: AxisKind,
    pub visible: bool,
    /// `(epoch_ms, value)`, one per section row. Gaps stay `None` so the
    /// line breaks instead of dropping to zero.
    pub points: Vec<(i64, Option<f64>)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisDomain {
    pub axis: AxisKind,
    pub min: f64,
    pub max: f64,
    /// Rank axes put the best (lowest) value at the top.
    pub inverted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartFrame {
    pub section: MetricFamily,
    pub title: String,
    pub subtitle: String,
    pub close_up: bool,
    pub currency: Currency,
    pub x_domain: Option<(i64, i64)>,
    pub y_domains: Vec<AxisDomain>,
    pub series: Vec<ChartSeries>,
}

/// Build the frame for one section of `key`'s bundle.
pub fn render_section(view: &SectionView, key: &BundleKey) -> ChartFrame {
    let currency = Currency::for_marketplace(key.marketplace_id);

    let series: Vec<ChartSeries> = view
        .metrics
        .iter()
        .map(|m| ChartSeries {
            key: m.key.to_string(),
            label: m.label.clone(),
            color: m.color.clone(),
            axis: m.axis,
            visible: m.visible,
            points: view
                .rows
                .iter()
                .map(|r| (r.timestamp.timestamp_millis(), r.get(&m.key)))
                .collect(),
        })
        .collect();

    let x_domain = match (view.rows.first(), view.rows.last()) {
        (Some(first), Some(last)) => Some((
            first.timestamp.timestamp_millis(),
            last.timestamp.timestamp_millis(),
        )),
        _ => None,
    };

    let mut subtitle = format!("{} · {}", key.asin, key.range.label());
    if view.close_up {
        subtitle.push_str(" · close-up");
    }

    ChartFrame {
        section: view.section,
        title: section_title(view.section).to_string(),
        subtitle,
        close_up: view.close_up,
        currency,
        x_domain,
        y_domains: y_domains(&series),
        series,
    }
}

/// One domain per axis kind, over visible series only, in first-seen order.
fn y_domains(series: &[ChartSeries]) -> Vec<AxisDomain> {
    let mut domains: Vec<AxisDomain> = Vec::new();

    for s in series.iter().filter(|s| s.visible) {
        let values = s.points.iter().filter_map(|(_, v)| *v);
        for v in values {
            match domains.iter_mut().find(|d| d.axis == s.axis) {
                Some(d) => {
                    d.min = d.min.min(v);
                    d.max = d.max.max(v);
                }
                None => domains.push(AxisDomain {
                    axis: s.axis,
                    min: v,
                    max: v,
                    inverted: s.axis.is_inverted(),
                }),
            }
        }
    }

    for d in &mut domains {
        let span = d.max - d.min;
        let pad = if span > 0.0 { span * 0.05 } else { (d.max.abs() * 0.05).max(1.0) };
        d.min = (d.min - pad).max(0.0);
        d.max += pad;
    }
    domains
}

impl ChartFrame {
    pub fn is_empty(&self) -> bool {
        self.x_domain.is_none()
    }

    pub fn visible_series(&self) -> impl Iterator<Item = &ChartSeries> {
        self.series.iter().filter(|s| s.visible)
    }

    fn row_count(&self) -> usize {
        self.series.first().map_or(0, |s| s.points.len())
    }

    /// Hover lines for row `index`: the date, then one line per visible series.
    pub fn tooltip(&self, index: usize) -> Option<Vec<String>> {
        let first = self.series.first()?;
        let (ms, _) = *first.points.get(index)?;
        let ts = DateTime::<Utc>::from_timestamp_millis(ms)?;

        let mut lines = vec![ts.format("%b %d, %Y %H:%M").to_string()];
        lines.extend(self.visible_series().map(|s| {
            let value = s.points.get(index).and_then(|(_, v)| *v);
            format!("{}: {}", s.label, format_value(s.axis, value, &self.currency))
        }));
        Some(lines)
    }

    /// Plain-text table of the visible series.
    pub fn to_table(&self) -> String {
        let visible: Vec<&ChartSeries> = self.visible_series().collect();

        let mut header = vec!["date".to_string()];
        header.extend(visible.iter().map(|s| s.label.clone()));

        let mut cells: Vec<Vec<String>> = vec![header];
        for i in 0..self.row_count() {
            let Some((ms, _)) = self.series.first().and_then(|s| s.points.get(i)).copied() else {
                continue;
            };
            let date = DateTime::<Utc>::from_timestamp_millis(ms)
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            let mut row = vec![date];
            row.extend(visible.iter().map(|s| {
                let value = s.points.get(i).and_then(|(_, v)| *v);
                format_value(s.axis, value, &self.currency)
            }));
            cells.push(row);
        }

        let columns = cells[0].len();
        let widths: Vec<usize> = (0..columns)
            .map(|c| cells.iter().map(|r| r[c].chars().count()).max().unwrap_or(0))
            .collect();

        let mut out = format!("{} ({})\n", self.title, self.subtitle);
        for row in &cells {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{:>width$}", cell, width = *w))
                .collect();
            out.push_str(line.join("  ").trim_end());
            out.push('\n');
        }
        out
    }
}
