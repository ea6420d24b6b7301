//! Offline source reading saved history payloads from disk.
//!
//! Layout, per product directory:
//!
//! ```text
//! <dir>/price.json          used for every range…
//! <dir>/30d/price.json      …unless a range-specific file exists
//! ```
//!
//! A missing family file is an empty payload; a missing directory is an error.

use crate::models::{BundleKey, MetricFamily};
use crate::source::{MetricsSource, RawHistoryPayload, SourceError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

pub fn family_file_name(family: MetricFamily) -> String {
    format!("{}.json", family)
}

pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Range-specific file if present, otherwise the shared one.
    pub fn resolve(&self, key: &BundleKey, family: MetricFamily) -> PathBuf {
        let name = family_file_name(family);
        let ranged = self.root.join(key.range.period()).join(&name);
        if ranged.is_file() { ranged } else { self.root.join(name) }
    }
}

#[async_trait]
impl MetricsSource for DirectorySource {
    async fn fetch_family(
        &self,
        key: &BundleKey,
        family: MetricFamily,
    ) -> Result<RawHistoryPayload, SourceError> {
        if !self.root.is_dir() {
            return Err(SourceError::Io {
                path: self.root.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            });
        }

        let path = self.resolve(key, family);
        if !path.exists() {
            debug!("{} {}: no {:?}, treating as empty", key, family, path);
            return Ok(RawHistoryPayload::default());
        }

        let body = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| SourceError::Io { path: path.clone(), source })?;
        debug!("{} {}: {} bytes from {:?}", key, family, body.len(), path);

        serde_json::from_str(&body).map_err(|e| SourceError::Decode {
            url: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeRange;
    use crate::pipeline::fetch_bundle;
    use std::fs;

    fn write(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn test_reads_family_files_into_bundle() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "price.json",
            r#"{"data":{"amazon":{"data":{"2024-01-01T00:00:00Z":{"price":19.99}}}}}"#,
        );
        write(
            dir.path(),
            "sales_rank.json",
            r#"{"data":{"main_bsr":{"data":{"2024-01-01T12:00:00Z":{"rank":4200}}}}}"#,
        );

        let source = DirectorySource::new(dir.path());
        let key = BundleKey::new("B000TEST01", 1, TimeRange::Month);
        let bundle = fetch_bundle(&source, &key).await.unwrap();

        assert_eq!(bundle.series.len(), 2);
        assert_eq!(bundle.point_count(), 2);
    }

    #[tokio::test]
    async fn test_range_specific_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "price.json", r#"{"data":{"amazon":{"data":{"2024-01-01":{"price":1}}}}}"#);
        write(dir.path(), "7d/price.json", r#"{"data":{"buybox":{"data":{"2024-01-01":{"price":2}}}}}"#);

        let source = DirectorySource::new(dir.path());
        let week = BundleKey::new("B000TEST01", 1, TimeRange::Week);
        let month = week.with_range(TimeRange::Month);

        assert!(source.resolve(&week, MetricFamily::Price).ends_with("7d/price.json"));
        let week_bundle = fetch_bundle(&source, &week).await.unwrap();
        let month_bundle = fetch_bundle(&source, &month).await.unwrap();
        assert_eq!(week_bundle.keys()[0].as_str(), "buybox_price");
        assert_eq!(month_bundle.keys()[0].as_str(), "amazon_price");
    }

    #[tokio::test]
    async fn test_missing_directory_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let key = BundleKey::new("B000TEST01", 1, TimeRange::Week);

        let missing = DirectorySource::new(dir.path().join("nope"));
        let err = missing.fetch_family(&key, MetricFamily::Price).await.unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));

        write(dir.path(), "rating.json", "{ not json");
        let source = DirectorySource::new(dir.path());
        let err = source.fetch_family(&key, MetricFamily::Rating).await.unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));

        let empty = source.fetch_family(&key, MetricFamily::Price).await.unwrap();
        assert!(crate::source::adapt_payload(MetricFamily::Price, &empty).is_empty());
    }
}
