//! User-adjustable chart state.
//!
//! [`ChartController`] owns the current bundle, its merged rows and the
//! [`ViewState`]. Changing the time range always starts a new fetch cycle;
//! visibility and close-up toggles only re-derive the visible rows.
//!
//! Fetch cycles are identified by a [`FetchTicket`]. Only the ticket of the
//! most recent dispatch is applied; results of superseded cycles are dropped
//! when they arrive.

pub mod session;

use crate::models::{
    AxisKind, BundleKey, MergedRow, MetricFamily, MetricKey, ProductMetricsBundle, TimeRange,
};
use crate::pipeline::{BundleStats, FetchError};
use crate::reconcile::{close_up, merge_series, MatchTolerance, DEFAULT_CLOSE_UP_FRACTION};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub use session::ChartSession;

/// A chart section. One per metric family.
pub type Section = MetricFamily;

#[derive(Debug, Clone, PartialEq)]
pub enum LoadStatus {
    Idle,
    /// First fetch for this product.
    Loading,
    /// A newer cycle is in flight after a range change or refresh.
    Refreshing { from: TimeRange },
    Ready,
    /// Valid response without a single observation.
    Empty,
    Failed {
        message: String,
        /// The previous bundle for the same range is still shown.
        stale_visible: bool,
    },
}

impl LoadStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadStatus::Loading | LoadStatus::Refreshing { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub time_range: TimeRange,
    pub visible_metrics: BTreeMap<MetricKey, bool>,
    pub close_up: BTreeMap<Section, bool>,
    pub status: LoadStatus,
}

impl ViewState {
    pub fn new(time_range: TimeRange) -> Self {
        Self {
            time_range,
            visible_metrics: BTreeMap::new(),
            close_up: BTreeMap::new(),
            status: LoadStatus::Idle,
        }
    }

    pub fn is_visible(&self, key: &MetricKey) -> bool {
        self.visible_metrics.get(key).copied().unwrap_or(true)
    }

    pub fn is_close_up(&self, section: Section) -> bool {
        self.close_up.get(&section).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub key: BundleKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    /// A newer cycle was dispatched; the result was dropped.
    Stale,
}

/// One metric as shown in a section.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionMetric {
    pub key: MetricKey,
    pub label: String,
    pub color: String,
    pub axis: AxisKind,
    pub visible: bool,
}

/// What a chart section renders: its metrics and the rows to plot.
///
/// Rows are those carrying data for a visible metric of the section. Hidden
/// metrics are masked to `None`; their values stay in the bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionView {
    pub section: Section,
    pub close_up: bool,
    pub metrics: Vec<SectionMetric>,
    pub rows: Vec<MergedRow>,
}

impl SectionView {
    pub fn visible_keys(&self) -> impl Iterator<Item = &MetricKey> {
        self.metrics.iter().filter(|m| m.visible).map(|m| &m.key)
    }
}

pub struct ChartController {
    asin: String,
    marketplace_id: u32,
    state: ViewState,
    bundle: Option<ProductMetricsBundle>,
    rows: Vec<MergedRow>,
    generation: u64,
    tolerance: MatchTolerance,
    close_up_fraction: f64,
}

impl ChartController {
    pub fn new(asin: impl Into<String>, marketplace_id: u32, range: TimeRange) -> Self {
        let key = BundleKey::new(asin, marketplace_id, range);
        Self {
            asin: key.asin,
            marketplace_id,
            state: ViewState::new(range),
            bundle: None,
            rows: Vec::new(),
            generation: 0,
            tolerance: MatchTolerance::default(),
            close_up_fraction: DEFAULT_CLOSE_UP_FRACTION,
        }
    }

    pub fn with_tolerance(mut self, tolerance: MatchTolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_close_up_fraction(mut self, fraction: f64) -> Self {
        self.close_up_fraction = fraction;
        self
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn bundle(&self) -> Option<&ProductMetricsBundle> {
        self.bundle.as_ref()
    }

    pub fn current_key(&self) -> BundleKey {
        BundleKey::new(self.asin.clone(), self.marketplace_id, self.state.time_range)
    }

    // ── Fetch cycle ──────────────────────────────────────────────────────────

    fn next_ticket(&mut self) -> FetchTicket {
        self.generation += 1;
        FetchTicket {
            generation: self.generation,
            key: self.current_key(),
        }
    }

    /// Start the first fetch for this product.
    pub fn load(&mut self) -> FetchTicket {
        if self.bundle.is_some() {
            return self.refresh();
        }
        self.state.status = LoadStatus::Loading;
        self.next_ticket()
    }

    /// Switch range. Always re-fetches; the previous range's rows are
    /// withdrawn immediately rather than trimmed.
    pub fn set_time_range(&mut self, range: TimeRange) -> FetchTicket {
        let from = self.state.time_range;
        if from == range {
            return self.refresh();
        }

        self.state.time_range = range;
        self.state.status = if self.bundle.is_some() {
            LoadStatus::Refreshing { from }
        } else {
            LoadStatus::Loading
        };
        self.bundle = None;
        self.rows.clear();

        let ticket = self.next_ticket();
        info!("range {} → {} (cycle {})", from, range, ticket.generation);
        ticket
    }

    /// Re-fetch the current range; the current rows stay visible meanwhile.
    pub fn refresh(&mut self) -> FetchTicket {
        self.state.status = if self.bundle.is_some() {
            LoadStatus::Refreshing {
                from: self.state.time_range,
            }
        } else {
            LoadStatus::Loading
        };
        self.next_ticket()
    }

    /// Apply the result of a fetch cycle. Last dispatch wins.
    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<ProductMetricsBundle, FetchError>,
    ) -> FetchOutcome {
        if ticket.generation != self.generation {
            debug!(
                "dropping stale cycle {} for {} (current {})",
                ticket.generation, ticket.key, self.generation
            );
            return FetchOutcome::Stale;
        }

        match result {
            Ok(bundle) if bundle.key != ticket.key => {
                warn!("bundle {} does not match request {}, dropping", bundle.key, ticket.key);
                self.state.status = LoadStatus::Failed {
                    message: format!("received {} while loading {}", bundle.key, ticket.key),
                    stale_visible: self.bundle.is_some(),
                };
            }
            Ok(bundle) => self.apply_bundle(bundle),
            Err(e) => {
                warn!("{}", e);
                self.state.status = LoadStatus::Failed {
                    message: e.to_string(),
                    stale_visible: self.bundle.is_some(),
                };
            }
        }
        FetchOutcome::Applied
    }

    fn apply_bundle(&mut self, bundle: ProductMetricsBundle) {
        let rows = merge_series(&bundle.series, self.tolerance);
        let stats = BundleStats::of(&bundle, &rows);
        info!(
            "{}: {} series, {} points → {} rows",
            bundle.key, stats.series, stats.points, stats.rows
        );

        // Keep toggles for metrics that survive, default new ones to visible.
        let keys = bundle.keys();
        self.state
            .visible_metrics
            .retain(|k, _| keys.contains(k));
        for key in keys {
            self.state.visible_metrics.entry(key).or_insert(true);
        }

        self.state.status = if rows.is_empty() {
            LoadStatus::Empty
        } else {
            LoadStatus::Ready
        };
        self.rows = rows;
        self.bundle = Some(bundle);
    }

    // ── Local toggles ─────────────────────────────────────────────────────────

    /// Flip a metric's visibility. Returns the new value.
    pub fn toggle_metric_visibility(&mut self, key: &MetricKey) -> bool {
        let visible = self.state.visible_metrics.entry(key.clone()).or_insert(true);
        *visible = !*visible;
        *visible
    }

    /// Flip close-up mode for one section. Returns the new value.
    pub fn toggle_close_up(&mut self, section: Section) -> bool {
        let on = self.state.close_up.entry(section).or_insert(false);
        *on = !*on;
        *on
    }

    // ── Derived data ──────────────────────────────────────────────────────────

    /// Whether merged rows may be shown for the current state.
    pub fn is_displayable(&self) -> bool {
        let matches_range = self
            .bundle
            .as_ref()
            .is_some_and(|b| b.key.range == self.state.time_range);
        match &self.state.status {
            LoadStatus::Ready => matches_range,
            LoadStatus::Refreshing { .. } => matches_range,
            LoadStatus::Failed { stale_visible, .. } => *stale_visible && matches_range,
            _ => false,
        }
    }

    /// Every merged row of the current bundle, or nothing while no bundle
    /// for the selected range is available.
    pub fn rows(&self) -> &[MergedRow] {
        if self.is_displayable() { &self.rows[..] } else { &[] }
    }

    pub fn section_view(&self, section: Section) -> Option<SectionView> {
        if !self.is_displayable() {
            return None;
        }
        let bundle = self.bundle.as_ref()?;

        let metrics: Vec<SectionMetric> = bundle
            .family_series(section)
            .map(|s| SectionMetric {
                key: s.key.clone(),
                label: s.label.clone(),
                color: s.color.clone(),
                axis: s.axis,
                visible: self.state.is_visible(&s.key),
            })
            .collect();

        let section_rows: Vec<&MergedRow> = self
            .rows
            .iter()
            .filter(|r| r.has_data_in(metrics.iter().filter(|m| m.visible).map(|m| &m.key)))
            .collect();

        let close_up_on = self.state.is_close_up(section);
        let window = if close_up_on {
            close_up(&section_rows, self.close_up_fraction)
        } else {
            &section_rows[..]
        };

        let rows = window
            .iter()
            .map(|row| {
                let mut projected = MergedRow::new(row.timestamp);
                for m in &metrics {
                    let value = if m.visible { row.get(&m.key) } else { None };
                    projected.values.insert(m.key.clone(), value);
                }
                projected
            })
            .collect();

        Some(SectionView {
            section,
            close_up: close_up_on,
            metrics,
            rows,
        })
    }
}
