use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::Config;
use crate::helpers::karbon::{
    KarbonClient, load_contacts, load_estimate_summary, load_timesheets, load_users,
};
use crate::helpers::output;
use crate::models::karbon::{EstimateRow, Timesheet};
use crate::reconcile;

/// What a run produced.
#[derive(Debug)]
pub enum RunOutcome {
    /// Both artifacts were written.
    Written {
        csv_path: PathBuf,
        json_path: PathBuf,
        records: usize,
    },
    /// Nothing to reconcile; no files were written.
    NothingToDo,
}

/// The reconciliation service: fetches every collection once, joins them
/// in memory, and writes the report artifacts.
pub struct ReconService {
    client: KarbonClient,
    config: Config,
}

impl ReconService {
    pub fn new(config: Config) -> Result<Self> {
        let client = KarbonClient::new(&config)?;
        Ok(Self { client, config })
    }

    /// Run the pipeline end to end.
    ///
    /// The timesheet fetch is the only hard dependency: its failure aborts
    /// the run. Contacts, users, and estimates degrade to empty lookups,
    /// which reconcile to sentinel labels and zero budgets.
    pub async fn run(&self) -> Result<RunOutcome> {
        let timesheets =
            load_timesheets(&self.client, self.config.start_date, self.config.end_date)
                .await
                .context("fetching timesheets")?;

        if timesheets.is_empty() {
            info!("no timesheets in the date range, nothing to reconcile");
            return Ok(RunOutcome::NothingToDo);
        }

        let clients = load_contacts(&self.client).await;
        let users = load_users(&self.client).await;
        let estimates = self.load_estimates(&timesheets).await;

        let records = reconcile::reconcile(&timesheets, &clients, &users, &estimates);
        if records.is_empty() {
            info!("timesheets carried no time entries, nothing to report");
            return Ok(RunOutcome::NothingToDo);
        }

        output::write_reports(&records, &self.config.csv_path, &self.config.json_path)
            .context("writing report artifacts")?;

        Ok(RunOutcome::Written {
            csv_path: self.config.csv_path.clone(),
            json_path: self.config.json_path.clone(),
            records: records.len(),
        })
    }

    /// Fetch the estimate summary for every distinct work-item key exactly
    /// once. Entries without a work-item key are skipped here; they
    /// reconcile to a zero budget anyway.
    async fn load_estimates(
        &self,
        timesheets: &[Timesheet],
    ) -> HashMap<String, Vec<EstimateRow>> {
        let mut estimates: HashMap<String, Vec<EstimateRow>> = HashMap::new();

        for timesheet in timesheets {
            for entry in &timesheet.time_entries {
                let Some(key) = entry.work_item_key.as_deref() else {
                    continue;
                };
                if estimates.contains_key(key) {
                    continue;
                }
                debug!(work_item_key = key, "fetching estimate summary");
                let rows = load_estimate_summary(&self.client, key).await;
                estimates.insert(key.to_string(), rows);
            }
        }

        info!(work_items = estimates.len(), "fetched estimate summaries");
        estimates
    }
}
