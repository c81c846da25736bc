//! Run configuration.
//!
//! Every tunable is a CLI flag with an environment fallback, so the same
//! binary works from a shell, a `.env` file, or a container environment.

use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::db::SqliteStore;
use crate::error::SetupError;
use crate::pacing::RetryPolicy;
use crate::source::JobSpyApiProvider;
use crate::store::{ListingStore, MemoryStore};
use crate::supabase::SupabaseStore;
use crate::writer::DEFAULT_BATCH_SIZE;

pub const DEFAULT_LOCATIONS: [&str; 7] = [
    "Bengaluru, IN",
    "Hyderabad, IN",
    "New Delhi, IN",
    "Gurgaon, IN",
    "Pune, IN",
    "Mumbai, IN",
    "Chennai, IN",
];

pub const DEFAULT_SITES: [&str; 2] = ["naukri", "linkedin"];

/// Everything the pipeline needs, resolved from flags and environment.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    pub locations: Vec<String>,
    pub sites: Vec<String>,
    pub search_term: String,
    pub results_per_location: usize,
    pub hours_old: u32,
    pub country_indeed: String,
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub partition_pause: Duration,
    pub fetch_retry: RetryPolicy,
    pub write_retry: RetryPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            locations: DEFAULT_LOCATIONS.iter().map(|s| s.to_string()).collect(),
            sites: DEFAULT_SITES.iter().map(|s| s.to_string()).collect(),
            search_term: "product manager".to_string(),
            results_per_location: 10,
            hours_old: 720,
            country_indeed: "india".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: Duration::from_secs(2),
            partition_pause: Duration::from_secs(10),
            fetch_retry: RetryPolicy::single_attempt(),
            write_retry: RetryPolicy::single_attempt(),
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.sites.iter().all(|s| s.trim().is_empty()) {
            return Err(SetupError::Config("at least one site is required".to_string()));
        }
        if self.search_term.trim().is_empty() {
            return Err(SetupError::Config("search term must not be empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(SetupError::Config("batch size must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Sqlite,
    Supabase,
    /// Keep rows in memory only (dry run)
    Memory,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Where listings are written
    #[arg(long, env = "JOBSWEEP_STORE", value_enum, default_value_t = StoreKind::Sqlite)]
    pub store: StoreKind,

    /// SQLite database path (defaults to the user data directory)
    #[arg(long, env = "JOBSWEEP_DB")]
    pub db: Option<PathBuf>,

    /// Supabase project URL
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Supabase API key
    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    pub supabase_key: Option<String>,

    /// Timeout for each store request, in seconds
    #[arg(long, env = "JOBSWEEP_STORE_TIMEOUT", default_value_t = 30)]
    pub store_timeout: u64,
}

impl StoreArgs {
    pub fn sqlite_path(&self) -> PathBuf {
        self.db.clone().unwrap_or_else(SqliteStore::default_path)
    }

    /// Builds the configured store. SQLite tables are created on first use.
    pub fn open(&self) -> Result<Box<dyn ListingStore>, SetupError> {
        match self.store {
            StoreKind::Sqlite => {
                let store = SqliteStore::open_at(&self.sqlite_path()).map_err(SetupError::Unreachable)?;
                store.init().map_err(SetupError::Unreachable)?;
                Ok(Box::new(store))
            }
            StoreKind::Supabase => {
                let url = self.supabase_url.as_deref().unwrap_or_default();
                let key = self.supabase_key.as_deref().unwrap_or_default();
                let store = SupabaseStore::new(url, key, Duration::from_secs(self.store_timeout))?;
                Ok(Box::new(store))
            }
            StoreKind::Memory => Ok(Box::new(MemoryStore::new())),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// Locations to search, in order (separate with ';')
    #[arg(
        long = "location",
        env = "JOBSWEEP_LOCATIONS",
        value_delimiter = ';',
        default_values_t = DEFAULT_LOCATIONS.map(String::from)
    )]
    pub locations: Vec<String>,

    /// Job sites to scrape (separate with ',')
    #[arg(
        long = "site",
        env = "JOBSWEEP_SITES",
        value_delimiter = ',',
        default_values_t = DEFAULT_SITES.map(String::from)
    )]
    pub sites: Vec<String>,

    /// Search term sent to every site
    #[arg(long, env = "JOBSWEEP_SEARCH_TERM", default_value = "product manager")]
    pub search_term: String,

    /// Maximum results per location
    #[arg(long, env = "JOBSWEEP_RESULTS_PER_LOCATION", default_value_t = 10)]
    pub results_per_location: usize,

    /// Only listings posted within this many hours
    #[arg(long, env = "JOBSWEEP_HOURS_OLD", default_value_t = 720)]
    pub hours_old: u32,

    /// Country hint for providers that need one
    #[arg(long, env = "JOBSWEEP_COUNTRY", default_value = "india")]
    pub country_indeed: String,

    /// Listings per upsert call
    #[arg(long, env = "JOBSWEEP_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Seconds to wait after each successful batch
    #[arg(long, env = "JOBSWEEP_BATCH_PAUSE", default_value_t = 2.0)]
    pub batch_pause: f64,

    /// Seconds to wait after each location
    #[arg(long, env = "JOBSWEEP_PARTITION_PAUSE", default_value_t = 10.0)]
    pub partition_pause: f64,

    /// Attempts per location fetch (1 = no retry)
    #[arg(long, env = "JOBSWEEP_FETCH_ATTEMPTS", default_value_t = 1)]
    pub fetch_attempts: u32,

    /// Attempts per batch upsert (1 = no retry)
    #[arg(long, env = "JOBSWEEP_WRITE_ATTEMPTS", default_value_t = 1)]
    pub write_attempts: u32,

    /// Base URL of the JobSpy-compatible scraping service
    #[arg(long, env = "JOBSPY_API_URL", default_value = "http://localhost:8000")]
    pub provider_url: String,

    /// API key for the scraping service
    #[arg(long, env = "JOBSPY_API_KEY", hide_env_values = true)]
    pub provider_key: Option<String>,

    /// Timeout for each scraping request, in seconds
    #[arg(long, env = "JOBSPY_API_TIMEOUT", default_value_t = 120)]
    pub provider_timeout: u64,
}

impl IngestArgs {
    pub fn to_config(&self) -> Result<IngestConfig, SetupError> {
        let config = IngestConfig {
            locations: clean_list(&self.locations),
            sites: clean_list(&self.sites),
            search_term: self.search_term.clone(),
            results_per_location: self.results_per_location,
            hours_old: self.hours_old,
            country_indeed: self.country_indeed.clone(),
            batch_size: self.batch_size,
            batch_pause: seconds(self.batch_pause, "batch pause")?,
            partition_pause: seconds(self.partition_pause, "partition pause")?,
            fetch_retry: RetryPolicy::with_attempts(self.fetch_attempts),
            write_retry: RetryPolicy::with_attempts(self.write_attempts),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn provider(&self) -> Result<JobSpyApiProvider, SetupError> {
        JobSpyApiProvider::new(
            &self.provider_url,
            self.provider_key.clone(),
            Duration::from_secs(self.provider_timeout),
        )
        .map_err(|e| SetupError::Config(format!("Failed to build scraping client: {}", e)))
    }
}

fn clean_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

fn seconds(value: f64, name: &str) -> Result<Duration, SetupError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| SetupError::Config(format!("{} must be a non-negative number of seconds", name)))
}
