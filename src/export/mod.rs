//! CSV export of merged rows.

use crate::models::{MergedRow, MetricKey};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Write `timestamp,<key>…` with one line per row. Missing values are empty
/// cells; a real zero is written as `0`.
pub fn write_rows_csv<W: Write>(rows: &[MergedRow], keys: &[MetricKey], writer: W) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = vec!["timestamp".to_string()];
    header.extend(keys.iter().map(MetricKey::to_string));
    wtr.write_record(&header)?;

    for row in rows {
        let mut record = Vec::with_capacity(keys.len() + 1);
        record.push(row.timestamp.to_rfc3339());
        for key in keys {
            record.push(row.get(key).map(|v| v.to_string()).unwrap_or_default());
        }
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(rows.len())
}

pub fn export_rows_to_file(rows: &[MergedRow], keys: &[MetricKey], path: &Path) -> Result<usize> {
    let file = std::fs::File::create(path).with_context(|| format!("Cannot create {:?}", path))?;
    let n = write_rows_csv(rows, keys, file)?;
    info!("{} rows written to {:?}", n, path);
    Ok(n)
}
