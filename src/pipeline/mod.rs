//! Fetch cycle: one bundle per `(asin, marketplace, range)`.
//!
//! The three metric families are requested concurrently. The bundle is built
//! only once every request has resolved; if any of them failed the whole cycle
//! fails with one aggregated error and no partial bundle is produced.

use crate::models::{BundleKey, MergedRow, MetricFamily, ProductMetricsBundle};
use crate::source::{adapt_payload, MetricsSource, SourceError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug)]
pub struct FamilyFailure {
    pub family: MetricFamily,
    pub error: SourceError,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("could not load {key}: {}", summarize(.failures))]
    Failed {
        key: BundleKey,
        failures: Vec<FamilyFailure>,
    },

    /// The task running the cycle died before reporting back.
    #[error("loading {key} was aborted: {message}")]
    Aborted { key: BundleKey, message: String },
}

impl FetchError {
    pub fn failures(&self) -> &[FamilyFailure] {
        match self {
            FetchError::Failed { failures, .. } => failures,
            FetchError::Aborted { .. } => &[],
        }
    }
}

fn summarize(failures: &[FamilyFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.family, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Run one fetch cycle against `source`.
pub async fn fetch_bundle<S>(source: &S, key: &BundleKey) -> Result<ProductMetricsBundle, FetchError>
where
    S: MetricsSource + ?Sized,
{
    let (price, rank, rating) = tokio::join!(
        source.fetch_family(key, MetricFamily::Price),
        source.fetch_family(key, MetricFamily::SalesRank),
        source.fetch_family(key, MetricFamily::Rating),
    );

    let mut series = Vec::new();
    let mut failures = Vec::new();

    for (family, result) in [
        (MetricFamily::Price, price),
        (MetricFamily::SalesRank, rank),
        (MetricFamily::Rating, rating),
    ] {
        match result {
            Ok(payload) => series.extend(adapt_payload(family, &payload)),
            Err(error) => {
                warn!("{} {}: {}", key, family, error);
                failures.push(FamilyFailure { family, error });
            }
        }
    }

    if !failures.is_empty() {
        return Err(FetchError::Failed {
            key: key.clone(),
            failures,
        });
    }

    let bundle = ProductMetricsBundle::new(key.clone(), series);
    info!(
        "{}: {} series, {} points",
        key,
        bundle.series.len(),
        bundle.point_count()
    );
    Ok(bundle)
}

/// Summary of one completed cycle, for logs and the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleStats {
    pub series: usize,
    pub points: usize,
    pub rows: usize,
}

impl BundleStats {
    pub fn of(bundle: &ProductMetricsBundle, rows: &[MergedRow]) -> Self {
        Self {
            series: bundle.series.len(),
            points: bundle.point_count(),
            rows: rows.len(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory source shared by pipeline and view tests.

    use super::*;
    use crate::models::TimeRange;
    use crate::source::RawHistoryPayload;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    pub struct ScriptedSource {
        pub payloads: HashMap<(TimeRange, MetricFamily), Value>,
        pub failing: Vec<MetricFamily>,
        pub delays: HashMap<TimeRange, Duration>,
        pub calls: AtomicUsize,
    }

    impl ScriptedSource {
        /// Two amazon prices and one sales rank per range; prices track the
        /// range's day count so tests can tell bundles apart.
        pub fn per_range() -> Self {
            let mut source = Self::default();
            for (range, value) in [
                (TimeRange::Week, 7.0),
                (TimeRange::Month, 30.0),
                (TimeRange::Quarter, 90.0),
            ] {
                source.payloads.insert(
                    (range, MetricFamily::Price),
                    json!({ "data": { "amazon": { "data": {
                        "2024-01-01T00:00:00Z": { "price": value },
                        "2024-01-02T00:00:00Z": { "price": value + 1.0 }
                    }}}}),
                );
                source.payloads.insert(
                    (range, MetricFamily::SalesRank),
                    json!({ "data": { "main_bsr": { "data": {
                        "2024-01-01T06:00:00Z": { "rank": 1500 }
                    }}}}),
                );
            }
            source
        }
    }

    #[async_trait]
    impl MetricsSource for ScriptedSource {
        async fn fetch_family(
            &self,
            key: &BundleKey,
            family: MetricFamily,
        ) -> Result<RawHistoryPayload, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(&key.range) {
                tokio::time::sleep(*delay).await;
            }
            if self.failing.contains(&family) {
                return Err(SourceError::Http { status: 500, url: format!("{}", family) });
            }
            let body = self
                .payloads
                .get(&(key.range, family))
                .cloned()
                .unwrap_or_else(|| json!({ "data": {} }));
            serde_json::from_value(body).map_err(|e| SourceError::Decode {
                url: family.to_string(),
                message: e.to_string(),
            })
        }
    }
}
