//! Ingestion orchestrator.
//!
//! Walks the configured locations in order. Each location is fetched,
//! normalized and written on its own; whatever goes wrong inside one
//! location is logged and counted, and the run moves on to the next.
//! The only error a caller ever sees is a [`SetupError`] from
//! [`Ingestor::new`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::IngestConfig;
use crate::error::SetupError;
use crate::normalize::normalize_at;
use crate::pacing::{Clock, Pacer};
use crate::source::{FetchOutcome, PartitionFetcher, SourceProvider};
use crate::store::ListingStore;
use crate::writer::{BatchWriter, WriteReport};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Raw rows returned by providers, whether or not they were stored.
    pub total_records_processed: usize,
    pub partitions_attempted: usize,
    pub partitions_empty: usize,
    pub partitions_failed: usize,
    pub records_rejected: usize,
    #[serde(flatten)]
    pub writes: WriteReport,
    pub failed_locations: Vec<LocationFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A location whose fetch failed or panicked, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationFailure {
    pub location: String,
    pub reason: String,
}

impl RunSummary {
    fn started(at: DateTime<Utc>) -> Self {
        Self {
            total_records_processed: 0,
            partitions_attempted: 0,
            partitions_empty: 0,
            partitions_failed: 0,
            records_rejected: 0,
            writes: WriteReport::default(),
            failed_locations: Vec::new(),
            started_at: at,
            finished_at: at,
        }
    }
}

/// What one location contributed to the run.
#[derive(Debug, Default)]
struct PartitionReport {
    fetched: usize,
    empty: bool,
    failure: Option<String>,
    rejected: usize,
    writes: WriteReport,
}

pub struct Ingestor {
    config: IngestConfig,
    fetcher: PartitionFetcher,
    writer: BatchWriter,
    partition_pacer: Pacer,
    clock: Arc<dyn Clock>,
}

impl Ingestor {
    /// Validates the configuration and probes the store once.
    pub fn new(
        config: IngestConfig,
        provider: Box<dyn SourceProvider>,
        store: Box<dyn ListingStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SetupError> {
        config.validate()?;

        if let Err(e) = store.probe() {
            error!(store = %store.describe(), error = %e, "Store connection failed");
            return Err(SetupError::Unreachable(e));
        }
        info!(store = %store.describe(), "Store connection successful");

        let fetcher = PartitionFetcher::new(provider, config.fetch_retry.clone(), clock.clone())
            .with_search_window(config.hours_old, &config.country_indeed);
        let writer = BatchWriter::new(
            store,
            config.batch_size,
            Pacer::new(clock.clone(), config.batch_pause, "batch"),
            config.write_retry.clone(),
            clock.clone(),
        );
        let partition_pacer = Pacer::new(clock.clone(), config.partition_pause, "partition");

        Ok(Self {
            config,
            fetcher,
            writer,
            partition_pacer,
            clock,
        })
    }

    pub fn run(&self) -> RunSummary {
        let mut summary = RunSummary::started(self.clock.now());
        info!(
            locations = self.config.locations.len(),
            sites = ?self.config.sites,
            search_term = %self.config.search_term,
            "Starting job scraping"
        );

        for (index, location) in self.config.locations.iter().enumerate() {
            summary.partitions_attempted += 1;

            let result = panic::catch_unwind(AssertUnwindSafe(|| self.process_partition(location)));
            match result {
                Ok(report) => {
                    summary.total_records_processed += report.fetched;
                    summary.records_rejected += report.rejected;
                    summary.partitions_empty += report.empty as usize;
                    summary.writes.absorb(report.writes);
                    if let Some(reason) = report.failure {
                        summary.partitions_failed += 1;
                        summary.failed_locations.push(LocationFailure {
                            location: location.clone(),
                            reason,
                        });
                    }
                }
                Err(payload) => {
                    let reason = panic_message(payload.as_ref()).to_string();
                    error!(
                        location = %location,
                        partition = index,
                        error = %reason,
                        "Error processing location"
                    );
                    summary.partitions_failed += 1;
                    summary.failed_locations.push(LocationFailure {
                        location: location.clone(),
                        reason,
                    });
                }
            }

            self.partition_pacer.pause();
        }

        summary.finished_at = self.clock.now();
        info!(
            total = summary.total_records_processed,
            written = summary.writes.records_written,
            failed_locations = summary.partitions_failed,
            failed_batches = summary.writes.batches_failed,
            "Job scraping completed"
        );
        summary
    }

    fn process_partition(&self, location: &str) -> PartitionReport {
        let outcome = self.fetcher.fetch(
            &self.config.sites,
            &self.config.search_term,
            location,
            self.config.results_per_location,
        );

        let mut report = PartitionReport {
            empty: matches!(outcome, FetchOutcome::Empty),
            failure: outcome.failure_reason().map(String::from),
            ..PartitionReport::default()
        };

        let records = outcome.into_records();
        if records.is_empty() {
            return report;
        }
        report.fetched = records.len();

        let mut listings = Vec::with_capacity(records.len());
        for record in &records {
            match normalize_at(record, self.clock.now()) {
                Some(listing) => listings.push(listing),
                None => {
                    report.rejected += 1;
                    warn!(location, "Dropping job without an id");
                }
            }
        }

        report.writes = self.writer.write(&listings);
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, StoreError};
    use crate::models::{RawRecord, SearchRequest};
    use crate::pacing::{ManualClock, RetryPolicy};
    use crate::source::testing::{rows, ScriptedProvider};
    use crate::store::MemoryStore;
    use crate::writer::testing::FlakyStore;
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 18, 6, 0, 0).unwrap())
    }

    fn config(locations: &[&str]) -> IngestConfig {
        IngestConfig {
            locations: locations.iter().map(|l| l.to_string()).collect(),
            ..IngestConfig::default()
        }
    }

    fn ingestor(
        config: IngestConfig,
        provider: impl SourceProvider + 'static,
        store: impl ListingStore + 'static,
        clock: &ManualClock,
    ) -> Ingestor {
        Ingestor::new(config, Box::new(provider), Box::new(store), Arc::new(clock.clone())).unwrap()
    }

    struct DownStore;

    impl ListingStore for DownStore {
        fn probe(&self) -> Result<(), StoreError> {
            Err(StoreError::Rejected {
                status: 401,
                body: "invalid api key".into(),
            })
        }

        fn upsert(&self, _: &[crate::models::CanonicalJobListing], _: &str) -> Result<usize, StoreError> {
            unreachable!("never constructed")
        }

        fn describe(&self) -> String {
            "down".into()
        }
    }

    struct PanickingProvider;

    impl SourceProvider for PanickingProvider {
        fn fetch_listings(&self, request: &SearchRequest) -> Result<Vec<RawRecord>, FetchError> {
            if request.location == "Gurgaon, IN" {
                panic!("adapter blew up");
            }
            Ok(rows(&request.location, 1))
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    #[test]
    fn test_setup_fails_when_store_unreachable() {
        let result = Ingestor::new(
            IngestConfig::default(),
            Box::new(ScriptedProvider::new()),
            Box::new(DownStore),
            Arc::new(clock()),
        );
        assert!(matches!(result, Err(SetupError::Unreachable(_))));
    }

    #[test]
    fn test_setup_rejects_invalid_config() {
        let config = IngestConfig {
            sites: vec![],
            ..IngestConfig::default()
        };
        let result = Ingestor::new(config, Box::new(ScriptedProvider::new()), Box::new(MemoryStore::new()), Arc::new(clock()));
        assert!(matches!(result, Err(SetupError::Config(_))));
    }

    #[test]
    fn test_two_locations_one_empty() {
        let clock = clock();
        let store = MemoryStore::new();
        let provider = ScriptedProvider::new()
            .respond("A", Ok(rows("a", 5)))
            .respond("B", Ok(vec![]));

        let summary = ingestor(config(&["A", "B"]), provider.clone(), store.clone(), &clock).run();

        assert_eq!(summary.total_records_processed, 5);
        assert_eq!(store.upsert_sizes(), vec![5]);
        assert_eq!(summary.partitions_attempted, 2);
        assert_eq!(summary.partitions_empty, 1);
        assert_eq!(summary.partitions_failed, 0);
        assert_eq!(provider.called_locations(), vec!["A".to_string(), "B".to_string()]);
        // One batch pause, then one pause after each location
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(2), Duration::from_secs(10), Duration::from_secs(10)]
        );
    }

    #[test]
    fn test_failing_partition_does_not_stop_others() {
        let locations = crate::config::DEFAULT_LOCATIONS;
        let mut provider = ScriptedProvider::new();
        for (i, location) in locations.iter().enumerate() {
            provider = if i == 2 {
                provider.respond(location, Err("connection reset".into()))
            } else {
                provider.respond(location, Ok(rows(&format!("loc{}", i), 3)))
            };
        }
        let clock = clock();
        let store = MemoryStore::new();

        let summary = ingestor(IngestConfig::default(), provider.clone(), store.clone(), &clock).run();

        assert_eq!(provider.called_locations(), locations.map(String::from).to_vec());
        assert_eq!(summary.partitions_failed, 1);
        assert_eq!(summary.failed_locations.len(), 1);
        assert_eq!(summary.failed_locations[0].location, "New Delhi, IN");
        assert!(summary.failed_locations[0].reason.contains("connection reset"));
        assert_eq!(summary.total_records_processed, 18);
        assert_eq!(store.len(), 18);
        assert!(store.get("loc1-0").is_some());
        assert!(store.get("loc3-0").is_some());
        assert!(store.get("loc2-0").is_none());
    }

    #[test]
    fn test_run_completes_when_everything_fails() {
        let clock = clock();
        let provider = ScriptedProvider::new()
            .respond("A", Err("down".into()))
            .respond("B", Ok(rows("b", 4)));
        let store = FlakyStore::failing_on(&[0]);

        let summary = ingestor(config(&["A", "B"]), provider, store.clone(), &clock).run();

        assert_eq!(summary.partitions_failed, 1);
        assert_eq!(summary.writes.batches_failed, 1);
        assert_eq!(summary.writes.records_dropped, 4);
        // Records of a failed batch still count as processed
        assert_eq!(summary.total_records_processed, 4);
        assert_eq!(store.inner.len(), 0);
    }

    #[test]
    fn test_panicking_provider_is_contained() {
        let clock = clock();
        let store = MemoryStore::new();
        let summary = ingestor(
            config(&["Pune, IN", "Gurgaon, IN", "Chennai, IN"]),
            PanickingProvider,
            store.clone(),
            &clock,
        )
        .run();

        assert_eq!(summary.partitions_failed, 1);
        assert_eq!(summary.failed_locations[0].location, "Gurgaon, IN");
        assert_eq!(summary.failed_locations[0].reason, "adapter blew up");
        assert_eq!(store.len(), 2);
        // The pause after the panicking location still happens
        assert_eq!(clock.sleeps().iter().filter(|d| **d == Duration::from_secs(10)).count(), 3);
    }

    #[test]
    fn test_rows_without_id_are_rejected_but_counted() {
        let clock = clock();
        let mut records = rows("ok", 2);
        let mut anonymous = RawRecord::new();
        anonymous.insert("title".into(), json!("Ghost listing"));
        records.push(anonymous);

        let store = MemoryStore::new();
        let provider = ScriptedProvider::new().respond("A", Ok(records));
        let summary = ingestor(config(&["A"]), provider, store.clone(), &clock).run();

        assert_eq!(summary.total_records_processed, 3);
        assert_eq!(summary.records_rejected, 1);
        assert_eq!(store.upsert_sizes(), vec![2]);
    }

    #[test]
    fn test_scraped_at_comes_from_normalization_time() {
        let clock = clock();
        let start = clock.now();
        let store = MemoryStore::new();
        let provider = ScriptedProvider::new()
            .respond("A", Ok(rows("a", 1)))
            .respond("B", Ok(rows("b", 1)));

        ingestor(config(&["A", "B"]), provider, store.clone(), &clock).run();

        let a = store.get("a-0").unwrap().scraped_at;
        let b = store.get("b-0").unwrap().scraped_at;
        assert_eq!(a, start);
        // Location B was normalized after A's batch pause and partition pause
        assert_eq!(b - a, chrono::Duration::seconds(12));
    }

    #[test]
    fn test_rerun_converges_to_one_row_per_id() {
        let clock = clock();
        let store = MemoryStore::new();
        let provider = ScriptedProvider::new().respond("A", Ok(rows("a", 12)));
        let ingestor = ingestor(config(&["A"]), provider, store.clone(), &clock);

        let first = ingestor.run();
        let second = ingestor.run();

        assert_eq!(first.total_records_processed, 12);
        assert_eq!(second.total_records_processed, 12);
        assert_eq!(store.len(), 12);
        assert_eq!(store.upsert_sizes(), vec![10, 2, 10, 2]);
        assert!(store.get("a-0").unwrap().scraped_at > first.started_at);
    }

    #[test]
    fn test_fetch_retry_applies_per_location() {
        let clock = clock();
        let store = MemoryStore::new();
        let provider = ScriptedProvider::new()
            .respond("A", Err("429".into()))
            .respond("A", Ok(rows("a", 1)));
        let config = IngestConfig {
            fetch_retry: RetryPolicy::with_attempts(2),
            ..config(&["A"])
        };

        let summary = ingestor(config, provider.clone(), store.clone(), &clock).run();

        assert_eq!(provider.calls().len(), 2);
        assert_eq!(summary.partitions_failed, 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_summary_serializes_flat() {
        let clock = clock();
        let provider = ScriptedProvider::new().respond("A", Ok(rows("a", 3)));
        let summary = ingestor(config(&["A"]), provider, MemoryStore::new(), &clock).run();

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["total_records_processed"], 3);
        assert_eq!(value["records_written"], 3);
        assert_eq!(value["batches_written"], 1);
        assert_eq!(value["failed_locations"], json!([]));
        assert!(value["finished_at"].is_string());
    }
}
