use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;

use crate::helpers::karbon::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://api.karbonhq.com";
pub const DEFAULT_CSV_PATH: &str = "output_data.csv";
pub const DEFAULT_JSON_PATH: &str = "output_data.json";

/// Everything a run needs, resolved up front. Credentials come from the
/// environment and are validated at construction; nothing reads ambient
/// state after this point.
#[derive(Clone, Debug)]
pub struct Config {
    pub access_key: String,
    pub bearer_token: String,
    /// Inclusive reconciliation window.
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Log every raw API response body at debug level.
    pub verbose: bool,
    pub base_url: String,
    pub csv_path: PathBuf,
    pub json_path: PathBuf,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl Config {
    /// Load from the environment:
    /// `KARBON_ACCESS_KEY`, `KARBON_BEARER_TOKEN`, `RECON_START_DATE`,
    /// `RECON_END_DATE` (YYYY-MM-DD, inclusive), optional `RECON_VERBOSE`.
    pub fn from_env() -> Result<Self> {
        let access_key = require_env("KARBON_ACCESS_KEY")?;
        let bearer_token = require_env("KARBON_BEARER_TOKEN")?;
        let start_date = date_env("RECON_START_DATE")?;
        let end_date = date_env("RECON_END_DATE")?;
        let verbose = env::var("RECON_VERBOSE")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self::new(access_key, bearer_token, start_date, end_date, verbose)
    }

    pub fn new(
        access_key: String,
        bearer_token: String,
        start_date: NaiveDate,
        end_date: NaiveDate,
        verbose: bool,
    ) -> Result<Self> {
        if access_key.trim().is_empty() {
            bail!("access key must not be blank");
        }
        if bearer_token.trim().is_empty() {
            bail!("bearer token must not be blank");
        }
        if end_date < start_date {
            bail!("end date {end_date} precedes start date {start_date}");
        }

        Ok(Self {
            access_key,
            bearer_token,
            start_date,
            end_date,
            verbose,
            base_url: DEFAULT_BASE_URL.to_string(),
            csv_path: PathBuf::from(DEFAULT_CSV_PATH),
            json_path: PathBuf::from(DEFAULT_JSON_PATH),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    let value = env::var(name).with_context(|| format!("{name} is not set"))?;
    if value.trim().is_empty() {
        bail!("{name} is set but blank");
    }
    Ok(value)
}

fn date_env(name: &str) -> Result<NaiveDate> {
    let value = env::var(name).with_context(|| format!("{name} is not set"))?;
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .with_context(|| format!("{name} must be a YYYY-MM-DD date, got {value:?}"))
}
