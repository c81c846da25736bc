use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::WriteError;
use crate::models::{CanonicalJobListing, CONFLICT_KEY};
use crate::pacing::{Clock, Pacer, RetryPolicy};
use crate::store::ListingStore;

pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub batches_written: usize,
    pub batches_failed: usize,
    pub records_written: usize,
    pub records_dropped: usize,
}

impl WriteReport {
    pub fn absorb(&mut self, other: WriteReport) {
        self.batches_written += other.batches_written;
        self.batches_failed += other.batches_failed;
        self.records_written += other.records_written;
        self.records_dropped += other.records_dropped;
    }
}

/// Chunks listings into upserts, one failed chunk never stopping the rest.
pub struct BatchWriter {
    store: Box<dyn ListingStore>,
    batch_size: usize,
    pacer: Pacer,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl BatchWriter {
    pub fn new(
        store: Box<dyn ListingStore>,
        batch_size: usize,
        pacer: Pacer,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            pacer,
            retry,
            clock,
        }
    }

    pub fn write(&self, records: &[CanonicalJobListing]) -> WriteReport {
        let mut report = WriteReport::default();
        if records.is_empty() {
            info!("No jobs to insert");
            return report;
        }

        for (index, batch) in records.chunks(self.batch_size).enumerate() {
            match self.write_batch(index, batch) {
                Ok(written) => {
                    info!(batch = index, size = written, "Inserted/updated batch of jobs");
                    report.batches_written += 1;
                    report.records_written += written;
                    self.pacer.pause();
                }
                Err(e) => {
                    error!(batch = e.batch, size = e.size, error = %e.source, "Failed to insert batch");
                    report.batches_failed += 1;
                    report.records_dropped += batch.len();
                }
            }
        }

        report
    }

    fn write_batch(&self, index: usize, batch: &[CanonicalJobListing]) -> Result<usize, WriteError> {
        self.retry
            .retry(self.clock.as_ref(), "upsert", || {
                self.store.upsert(batch, CONFLICT_KEY)
            })
            .map_err(|source| WriteError {
                batch: index,
                size: batch.len(),
                source,
            })
    }
}
