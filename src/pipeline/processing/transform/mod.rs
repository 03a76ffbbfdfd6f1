//! Bronze to Silver to Gold tier transformation.
//!
//! The transformer owns every artifact it persists and a [`ProcessingContext`]
//! (a dedicated rayon pool) for its whole lifetime. The pool is released on
//! `close()` or on drop, whichever comes first.

pub mod gold;
pub mod silver;

use chrono::NaiveDate;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Span};

use crate::app::ports::TierStore;
use crate::config::Settings;
use crate::domain::{GoldAggregate, QuarantineRecord, Record, SilverRecord};
use crate::error::{PipelineError, Result, Stage};
use crate::logging::LogContext;
use crate::observability::metrics;
use crate::security::PiiProtector;

/// Worker pool backing the row-parallel stages.
pub struct ProcessingContext {
    name: String,
    pool: Option<rayon::ThreadPool>,
    span: Span,
}

impl ProcessingContext {
    /// Start a pool named `app_name`; `worker_threads == 0` lets rayon pick.
    pub fn acquire(app_name: &str, worker_threads: usize, log: &LogContext) -> Result<Self> {
        let thread_prefix = app_name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(move |i| format!("{}-{}", thread_prefix, i))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to start processing context: {}", e)))?;

        let span = log.component("processing_context");
        span.in_scope(|| {
            info!(app_name, threads = pool.current_num_threads(), "Processing context acquired")
        });
        Ok(Self {
            name: app_name.to_string(),
            pool: Some(pool),
            span,
        })
    }

    pub fn is_active(&self) -> bool {
        self.pool.is_some()
    }

    /// Run `op` inside the pool.
    pub fn install<OP, R>(&self, stage: Stage, op: OP) -> Result<R>
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        let pool = self.pool.as_ref().ok_or_else(|| {
            PipelineError::stage(stage, format!("processing context '{}' already released", self.name))
        })?;
        Ok(pool.install(op))
    }

    /// Idempotent.
    pub fn release(&mut self) {
        if let Some(pool) = self.pool.take() {
            drop(pool);
            self.span.in_scope(|| info!(app_name = %self.name, "Processing context released"));
        }
    }
}

impl Drop for ProcessingContext {
    fn drop(&mut self) {
        self.release();
    }
}

/// Result of the silver stage.
#[derive(Debug, Clone)]
pub struct SilverOutput {
    pub location: PathBuf,
    pub records: Vec<SilverRecord>,
}

/// Result of the gold stage.
#[derive(Debug, Clone)]
pub struct GoldOutput {
    pub aggregates: Vec<GoldAggregate>,
    /// One location per partition overwritten.
    pub partitions: Vec<PathBuf>,
}

pub struct TieredTransformer {
    store: Arc<dyn TierStore>,
    protector: Arc<PiiProtector>,
    context: ProcessingContext,
    span: Span,
}

impl TieredTransformer {
    pub fn new(
        store: Arc<dyn TierStore>,
        protector: Arc<PiiProtector>,
        context: ProcessingContext,
        log: &LogContext,
    ) -> Self {
        Self {
            store,
            protector,
            context,
            span: log.component("transformer"),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        store: Arc<dyn TierStore>,
        protector: Arc<PiiProtector>,
        log: &LogContext,
    ) -> Result<Self> {
        let context = ProcessingContext::acquire(
            &settings.processing.app_name,
            settings.processing.worker_threads,
            log,
        )?;
        Ok(Self::new(store, protector, context, log))
    }

    /// Persist rejected rows under `execution_date`. `None` when there were
    /// none to persist.
    pub fn archive_quarantine(
        &self,
        execution_date: NaiveDate,
        records: &[QuarantineRecord],
    ) -> Result<Option<PathBuf>> {
        let _enter = self.span.enter();
        if records.is_empty() {
            debug!(%execution_date, "Nothing to quarantine");
            return Ok(None);
        }

        let location = self
            .store
            .write_quarantine(execution_date, records)
            .map_err(|e| Self::stage_failed(Stage::Quarantine, e))?;
        metrics::transform::quarantine_written(records.len());
        Ok(Some(location))
    }

    /// Protect every valid record and persist the silver set for `batch_name`.
    ///
    /// All-or-nothing: one record failing protection fails the stage and
    /// nothing is written.
    pub fn to_silver(&self, batch_name: &str, records: &[Record]) -> Result<SilverOutput> {
        let _enter = self.span.enter();
        info!(batch = %batch_name, rows = records.len(), "Starting Bronze -> Silver");

        let protector = Arc::clone(&self.protector);
        let protected = self.context.install(Stage::Silver, || {
            records
                .par_iter()
                .map(|r| silver::protect_record(&protector, r))
                .collect::<Result<Vec<SilverRecord>>>()
        })?;
        let silver = protected.map_err(|e| Self::stage_failed(Stage::Silver, e))?;

        let location = self
            .store
            .write_silver(batch_name, &silver)
            .map_err(|e| Self::stage_failed(Stage::Silver, e))?;
        metrics::transform::silver_written(silver.len());
        info!(rows = silver.len(), location = %location.display(), "Silver tier written");

        Ok(SilverOutput {
            location,
            records: silver,
        })
    }

    /// Aggregate silver rows and overwrite every gold partition they touch.
    /// Partitions not present in the input are left alone.
    pub fn to_gold(&self, silver: &[SilverRecord]) -> Result<GoldOutput> {
        let _enter = self.span.enter();
        info!(rows = silver.len(), "Starting Silver -> Gold");

        let aggregates = gold::aggregate(silver).map_err(|e| Self::stage_failed(Stage::Gold, e))?;
        let partitions = gold::partition(aggregates.clone());

        let mut locations = Vec::with_capacity(partitions.len());
        for partition in &partitions {
            let location = self
                .store
                .overwrite_gold_partition(partition)
                .map_err(|e| Self::stage_failed(Stage::Gold, e))?;
            debug!(
                partition = %partition.key.relative_dir().display(),
                groups = partition.aggregates.len(),
                "Gold partition replaced"
            );
            locations.push(location);
        }
        metrics::transform::gold_partitions_written(locations.len());
        info!(
            aggregates = aggregates.len(),
            partitions = locations.len(),
            "Gold tier updated"
        );

        Ok(GoldOutput {
            aggregates,
            partitions: locations,
        })
    }

    /// Rerun Silver -> Gold from a persisted silver artifact.
    pub fn rebuild_gold(&self, silver_location: &Path) -> Result<GoldOutput> {
        let silver = {
            let _enter = self.span.enter();
            info!(location = %silver_location.display(), "Rebuilding gold from persisted silver");
            self.store.read_silver(silver_location).map_err(|e| {
                Self::stage_failed(
                    Stage::Gold,
                    PipelineError::stage(
                        Stage::Gold,
                        format!("cannot read silver artifact {}: {}", silver_location.display(), e),
                    ),
                )
            })?
        };
        if silver.is_empty() {
            self.span
                .in_scope(|| warn!(location = %silver_location.display(), "Silver artifact is empty; gold not updated"));
            return Ok(GoldOutput {
                aggregates: Vec::new(),
                partitions: Vec::new(),
            });
        }
        self.to_gold(&silver)
    }

    pub fn protector(&self) -> &PiiProtector {
        &self.protector
    }

    pub fn is_open(&self) -> bool {
        self.context.is_active()
    }

    /// Release the processing context. Later stage calls fail.
    pub fn close(&mut self) {
        self.context.release();
    }

    fn stage_failed(stage: Stage, err: PipelineError) -> PipelineError {
        error!(stage = %stage, error = %err, "Stage failed");
        metrics::transform::stage_failed(stage.as_str());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::quality_gate::RowRule;
    use crate::pipeline::storage::in_memory::InMemoryTierStore;
    use crate::security::EncryptionKey;

    fn transformer(store: Arc<InMemoryTierStore>) -> TieredTransformer {
        let log = LogContext::disabled();
        let protector = Arc::new(PiiProtector::with_key(&EncryptionKey::generate(), &log));
        let context = ProcessingContext::acquire("test-pipeline", 2, &log).unwrap();
        TieredTransformer::new(store, protector, context, &log)
    }

    fn record(id: &str, amount: f64, ts: &str) -> Record {
        Record {
            transaction_id: Some(id.to_string()),
            customer_id: Some("c1".to_string()),
            email: Some(format!("{id}@bank.com")),
            pan: Some("4111222233334444".to_string()),
            amount: Some(amount),
            currency: Some("USD".to_string()),
            timestamp: Some(ts.to_string()),
            amount_raw: None,
        }
    }

    #[test]
    fn test_silver_then_gold() {
        let store = Arc::new(InMemoryTierStore::new());
        let t = transformer(store.clone());
        let rows = vec![
            record("tx-1", 100.0, "2023-12-01T10:00:00.000000"),
            record("tx-2", 25.5, "2023-12-01T11:00:00.000000"),
            record("tx-3", 10.0, "2023-12-02T09:00:00.000000"),
        ];

        let silver = t.to_silver("batch.csv", &rows).unwrap();
        assert_eq!(silver.records.len(), 3);
        assert_eq!(silver.records[0].transaction_id, "tx-1");

        let gold = t.to_gold(&silver.records).unwrap();
        assert_eq!(gold.partitions.len(), 2);
        assert_eq!(gold.aggregates[0].total_amount, 125.5);
        assert_eq!(gold.aggregates[0].tx_count, 2);

        let rebuilt = t.rebuild_gold(&silver.location).unwrap();
        assert_eq!(rebuilt.aggregates, gold.aggregates);
        assert_eq!(store.gold_partitions().len(), 2);
    }

    #[test]
    fn test_one_bad_record_fails_whole_silver_stage() {
        let store = Arc::new(InMemoryTierStore::new());
        let t = transformer(store.clone());
        let mut bad = record("tx-2", 1.0, "2023-12-01T10:00:00.0");
        bad.pan = None;
        let rows = vec![record("tx-1", 1.0, "2023-12-01T10:00:00.0"), bad];

        let err = t.to_silver("batch.csv", &rows).unwrap_err();
        assert!(matches!(err, PipelineError::PiiProcessing { ref transaction_id, .. } if transaction_id == "tx-2"));
        assert!(store.read_silver(Path::new("memory://silver/batch_silver.csv")).is_err());
    }

    #[test]
    fn test_empty_quarantine_is_not_written() {
        let store = Arc::new(InMemoryTierStore::new());
        let t = transformer(store.clone());
        let date = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
        assert_eq!(t.archive_quarantine(date, &[]).unwrap(), None);

        let rejected = QuarantineRecord {
            record: Record::default(),
            failed_rules: vec![RowRule::TransactionIdPresent, RowRule::AmountPresent],
        };
        assert!(t.archive_quarantine(date, &[rejected]).unwrap().is_some());
        assert_eq!(store.quarantined(date).len(), 1);
    }

    #[test]
    fn test_unreadable_silver_fails_gold_stage() {
        let t = transformer(Arc::new(InMemoryTierStore::new()));
        let err = t
            .rebuild_gold(Path::new("memory://silver/missing_silver.csv"))
            .unwrap_err();
        assert_eq!(err.failed_stage(), Some(Stage::Gold));
        assert!(err.to_string().contains("missing_silver.csv"));
    }

    #[test]
    fn test_closed_transformer_refuses_work() {
        let mut t = transformer(Arc::new(InMemoryTierStore::new()));
        assert!(t.is_open());
        t.close();
        t.close();
        assert!(!t.is_open());
        let err = t
            .to_silver("batch.csv", &[record("tx-1", 1.0, "2023-12-01T10:00:00.0")])
            .unwrap_err();
        assert_eq!(err.failed_stage(), Some(Stage::Silver));
    }
}
