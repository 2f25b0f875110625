use serde::{Deserialize, Serialize};

/// One output row per time entry: actual hours joined against the work
/// item's budget. Field order is the CSV column order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReportRecord {
    #[serde(rename = "Client")]
    pub client: String,
    #[serde(rename = "Worker")]
    pub worker: String,
    #[serde(rename = "Task")]
    pub task: String,
    #[serde(rename = "Actual Hours")]
    pub actual_hours: f64,
    #[serde(rename = "Budgeted Hours")]
    pub budgeted_hours: f64,
    #[serde(rename = "Estimate Actual Hours")]
    pub estimate_actual_hours: f64,
}
