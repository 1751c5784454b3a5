//! Output formatting and persistence for metric tables and frontend inputs.
//!
//! Tables are written as CSV, lookups, shapes and aggregations as JSON.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::{self, File};
use std::path::Path;
use tracing::{debug, info};

use crate::metrics::MetricCalculation;

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

/// Serializes `value` as JSON to `path`, creating parent directories.
pub fn write_json(path: impl AsRef<Path>, value: &impl Serialize) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;

    let body = serde_json::to_vec(value)?;
    fs::write(path, &body).with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), bytes = body.len(), "JSON written");
    Ok(())
}

/// Writes `rows` as a CSV table with a header row, replacing any existing file.
///
/// Missing values are written as empty cells.
pub fn write_csv<T: Serialize>(path: impl AsRef<Path>, rows: &[T]) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;

    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    debug!(path = %path.display(), rows = rows.len(), "CSV written");
    Ok(())
}

/// Logs the size of each metric table.
pub fn print_summary(metrics: &MetricCalculation) {
    info!(
        stop_rows = metrics.stop_metrics.len(),
        tpbp_rows = metrics.tpbp_metrics.len(),
        route_rows = metrics.route_metrics.len(),
        "Metric tables"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::tests::records;
    use std::collections::BTreeMap;

    #[test]
    fn test_write_json_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lookup/nested/stop_names.json");

        let value = BTreeMap::from([("A", "Main St")]);
        write_json(&path, &value).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, r#"{"A":"Main St"}"#);
    }

    #[test]
    fn test_write_csv_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stop_metrics.csv");

        let metrics = MetricCalculation::prepare(&records());
        write_csv(&path, &metrics.stop_metrics).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        // 1 header + 3 stop pairs
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("pattern,route_id,direction_id,trip_id"));
        assert_eq!(lines.iter().filter(|l| l.contains("next_stop")).count(), 1);
    }

    #[test]
    fn test_write_csv_leaves_missing_values_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("route_metrics.csv");

        let metrics = MetricCalculation::prepare(&records());
        write_csv(&path, &metrics.route_metrics).unwrap();
        write_csv(&path, &metrics.route_metrics).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with(",,,,,,,,,,,"));
    }

    #[test]
    fn test_print_summary_does_not_panic() {
        print_summary(&MetricCalculation::default());
    }
}
