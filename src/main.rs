use anyhow::{Context, Result};
use tracing::info;

use karbon_recon::{Config, ReconService, RunOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env().context("loading configuration")?;
    info!(
        start = %config.start_date,
        end = %config.end_date,
        "starting budget reconciliation"
    );

    let service = ReconService::new(config)?;

    match service.run().await? {
        RunOutcome::Written {
            csv_path,
            json_path,
            records,
        } => {
            println!(
                "Wrote {} records to '{}' and '{}'.",
                records,
                csv_path.display(),
                json_path.display()
            );
        }
        RunOutcome::NothingToDo => {
            println!("No data to display.");
        }
    }

    Ok(())
}
