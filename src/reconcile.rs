//! The reconciliation engine: joins time entries against the client,
//! worker, and estimate lookups and emits one report record per entry.
//!
//! Pure in-memory computation. Every lookup miss substitutes a sentinel
//! label; no time entry is ever dropped.

use std::collections::HashMap;

use tracing::debug;

use crate::models::karbon::{EstimateRow, Timesheet};
use crate::models::report::ReportRecord;

pub const UNKNOWN_CLIENT: &str = "Unknown Client";
pub const UNKNOWN_WORKER: &str = "Unknown Worker";
pub const UNKNOWN_TASK: &str = "Unknown Task";

/// Produce one [`ReportRecord`] per time entry, in timesheet-then-entry
/// encounter order.
///
/// `estimates` maps work-item key to that item's estimate rows; a key with
/// no entry (or an entry with no rows) reconciles to zero budgeted and
/// zero estimate-actual hours.
pub fn reconcile(
    timesheets: &[Timesheet],
    clients: &HashMap<String, String>,
    users: &HashMap<String, String>,
    estimates: &HashMap<String, Vec<EstimateRow>>,
) -> Vec<ReportRecord> {
    let mut records = Vec::new();

    for timesheet in timesheets {
        let worker = timesheet
            .user_key
            .as_ref()
            .and_then(|key| users.get(key))
            .cloned()
            .unwrap_or_else(|| UNKNOWN_WORKER.to_string());

        for entry in &timesheet.time_entries {
            // The two unknown-client cases are diagnostically distinct but
            // produce the same sentinel in the record.
            let client = match &entry.client_key {
                None => {
                    debug!("time entry carries no client key");
                    UNKNOWN_CLIENT.to_string()
                }
                Some(key) => match clients.get(key) {
                    Some(name) => name.clone(),
                    None => {
                        debug!(client_key = %key, "client key not found in lookup");
                        UNKNOWN_CLIENT.to_string()
                    }
                },
            };

            let task = entry
                .task_type_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_TASK.to_string());

            let actual_hours = entry.minutes.unwrap_or(0.0) / 60.0;

            let (budgeted_hours, estimate_actual_hours) = entry
                .work_item_key
                .as_ref()
                .and_then(|key| estimates.get(key))
                .map(|rows| sum_estimate_hours(rows))
                .unwrap_or((0.0, 0.0));

            records.push(ReportRecord {
                client,
                worker: worker.clone(),
                task,
                actual_hours,
                budgeted_hours,
                estimate_actual_hours,
            });
        }
    }

    records
}

/// Sum (budgeted, actual) hours over a work item's estimate rows, treating
/// each null minute field as 0.
fn sum_estimate_hours(rows: &[EstimateRow]) -> (f64, f64) {
    rows.iter().fold((0.0, 0.0), |(budgeted, actual), row| {
        (
            budgeted + row.estimate_minutes.unwrap_or(0.0) / 60.0,
            actual + row.actual_minutes.unwrap_or(0.0) / 60.0,
        )
    })
}
