use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::models::report::ReportRecord;

/// CSV column order. Matches the serde field order of [`ReportRecord`].
pub const CSV_HEADER: [&str; 6] = [
    "Client",
    "Worker",
    "Task",
    "Actual Hours",
    "Budgeted Hours",
    "Estimate Actual Hours",
];

/// Write the record sequence to both artifacts. A local write failure is
/// fatal to the run and propagates.
pub fn write_reports(records: &[ReportRecord], csv_path: &Path, json_path: &Path) -> Result<()> {
    write_csv(records, csv_path)?;
    write_json(records, json_path)?;
    Ok(())
}

/// One row per record, header always present, even for an empty slice.
pub fn write_csv(records: &[ReportRecord], path: &Path) -> Result<()> {
    info!(path = %path.display(), "writing CSV report");

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;

    if records.is_empty() {
        // serialize() only emits the header alongside a first record, so
        // an empty set writes it explicitly to keep the file parseable.
        writer.write_record(CSV_HEADER)?;
    } else {
        for record in records {
            writer.serialize(record)?;
        }
    }

    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    info!(rows = records.len(), "CSV report written");
    Ok(())
}

/// The full record sequence as a pretty-printed JSON array.
pub fn write_json(records: &[ReportRecord], path: &Path) -> Result<()> {
    info!(path = %path.display(), "writing JSON report");

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), records)
        .with_context(|| format!("writing {}", path.display()))?;

    info!(rows = records.len(), "JSON report written");
    Ok(())
}
