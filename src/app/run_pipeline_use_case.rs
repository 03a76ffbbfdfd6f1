use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::ports::TierStore;
use crate::config::{QualityMode, Settings};
use crate::domain::{Batch, QuarantineRecord, Record};
use crate::error::{PipelineError, Result};
use crate::logging::LogContext;
use crate::pipeline::processing::quality_gate::{DefaultQualityGate, QualityGate, QualityGateConfig};
use crate::pipeline::processing::transform::TieredTransformer;
use crate::security::PiiProtector;

/// Outcome of one successful batch run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub execution_date: NaiveDate,
    pub batch_name: String,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub quarantined_rows: usize,
    pub silver_rows: usize,
    pub gold_rows: usize,
    pub quarantine_location: Option<PathBuf>,
    pub silver_location: Option<PathBuf>,
    pub gold_locations: Vec<PathBuf>,
}

/// Use case sequencing the quality gate and the tier transformer for one batch
pub struct PipelineRunner {
    quality_gate: Box<dyn QualityGate>,
    transformer: TieredTransformer,
    mode: QualityMode,
    log: LogContext,
}

impl PipelineRunner {
    pub fn new(
        quality_gate: Box<dyn QualityGate>,
        transformer: TieredTransformer,
        mode: QualityMode,
        log: LogContext,
    ) -> Self {
        Self {
            quality_gate,
            transformer,
            mode,
            log,
        }
    }

    /// Runner with the default quality gate configured from `settings`.
    pub fn from_settings(
        settings: &Settings,
        store: Arc<dyn TierStore>,
        protector: Arc<PiiProtector>,
        log: LogContext,
    ) -> Result<Self> {
        let quality_gate = DefaultQualityGate::new(QualityGateConfig::from(&settings.quality), &log);
        let transformer = TieredTransformer::from_settings(settings, store, protector, &log)?;
        Ok(Self::new(
            Box::new(quality_gate),
            transformer,
            settings.quality.mode,
            log,
        ))
    }

    pub fn transformer(&self) -> &TieredTransformer {
        &self.transformer
    }

    /// Run one batch through every stage. The first failing stage aborts the
    /// run; artifacts already written by earlier stages stay in place.
    pub fn run(&self, batch: &Batch) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = self
            .log
            .for_batch(&batch.name, &batch.execution_date.to_string(), &run_id.to_string())
            .component("pipeline");
        let _enter = span.enter();
        info!(rows = batch.len(), mode = ?self.mode, "Pipeline run started");

        if !self.quality_gate.validate_schema(batch) {
            error!("Schema validation failed; aborting run");
            return Err(PipelineError::Structural {
                expected: self.quality_gate.expected_columns(),
                actual: batch.columns.clone(),
            });
        }

        let (valid, quarantine): (Vec<Record>, Vec<QuarantineRecord>) = match self.mode {
            QualityMode::Strict => {
                let report = self.quality_gate.run_full_validation(batch);
                if !report.success {
                    error!(columns = ?report.failures, "Batch rejected by full validation");
                    return Err(PipelineError::QualityRejected {
                        columns: report.failures,
                    });
                }
                (batch.records.clone(), Vec::new())
            }
            QualityMode::Quarantine => {
                let split = self.quality_gate.run_quarantine_split(batch);
                (split.valid, split.quarantine)
            }
        };

        let mut summary = RunSummary {
            run_id,
            execution_date: batch.execution_date,
            batch_name: batch.name.clone(),
            total_rows: batch.len(),
            valid_rows: valid.len(),
            quarantined_rows: quarantine.len(),
            silver_rows: 0,
            gold_rows: 0,
            quarantine_location: None,
            silver_location: None,
            gold_locations: Vec::new(),
        };

        summary.quarantine_location = self
            .transformer
            .archive_quarantine(batch.execution_date, &quarantine)?;

        if valid.is_empty() {
            warn!("No valid rows in batch; Gold tier not updated");
            return Ok(summary);
        }

        let silver = self.transformer.to_silver(&batch.name, &valid)?;
        summary.silver_rows = silver.records.len();
        summary.silver_location = Some(silver.location);

        let gold = self.transformer.to_gold(&silver.records)?;
        summary.gold_rows = gold.aggregates.len();
        summary.gold_locations = gold.partitions;

        info!(
            valid = summary.valid_rows,
            quarantined = summary.quarantined_rows,
            silver = summary.silver_rows,
            gold = summary.gold_rows,
            "Pipeline run completed"
        );
        Ok(summary)
    }

    /// Release the transformer's processing context.
    pub fn close(&mut self) {
        self.transformer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::transform::ProcessingContext;
    use crate::pipeline::storage::in_memory::InMemoryTierStore;
    use crate::security::EncryptionKey;

    fn runner(store: Arc<InMemoryTierStore>, mode: QualityMode) -> PipelineRunner {
        let log = LogContext::disabled();
        let protector = Arc::new(PiiProtector::with_key(&EncryptionKey::generate(), &log));
        let context = ProcessingContext::acquire("runner-test", 1, &log).unwrap();
        let transformer = TieredTransformer::new(store, protector, context, &log);
        let gate = DefaultQualityGate::new(QualityGateConfig::default(), &log);
        PipelineRunner::new(Box::new(gate), transformer, mode, log)
    }

    fn row(id: Option<&str>, amount: f64) -> Record {
        Record {
            transaction_id: id.map(str::to_string),
            customer_id: Some("c1".to_string()),
            email: Some("a@bank.com".to_string()),
            pan: Some("4111222233334444".to_string()),
            amount: Some(amount),
            currency: Some("USD".to_string()),
            timestamp: Some("2023-12-01T10:00:00.000000".to_string()),
            amount_raw: None,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 12, 1).unwrap()
    }

    #[test]
    fn test_all_rows_quarantined_skips_silver_and_gold() {
        let store = Arc::new(InMemoryTierStore::new());
        let r = runner(store.clone(), QualityMode::Quarantine);
        let batch = Batch::new("b.csv", date(), vec![row(None, 1.0), row(Some("tx"), -1.0)]);

        let summary = r.run(&batch).unwrap();
        assert_eq!(summary.valid_rows, 0);
        assert_eq!(summary.quarantined_rows, 2);
        assert!(summary.silver_location.is_none());
        assert!(store.gold_partitions().is_empty());
        assert_eq!(store.quarantined(date()).len(), 2);
    }

    #[test]
    fn test_strict_mode_passes_clean_batch_whole() {
        let store = Arc::new(InMemoryTierStore::new());
        let r = runner(store, QualityMode::Strict);
        let batch = Batch::new("b.csv", date(), vec![row(Some("tx-1"), 1.0), row(Some("tx-2"), 2.0)]);

        let summary = r.run(&batch).unwrap();
        assert_eq!(summary.silver_rows, 2);
        assert_eq!(summary.gold_rows, 1);
        assert!(summary.quarantine_location.is_none());
    }

    #[test]
    fn test_schema_mismatch_is_structural() {
        let r = runner(Arc::new(InMemoryTierStore::new()), QualityMode::Quarantine);
        let batch = Batch::new("b.csv", date(), vec![row(Some("tx-1"), 1.0)])
            .with_columns(vec!["transaction_id".to_string(), "amount".to_string()]);
        let err = r.run(&batch).unwrap_err();
        assert!(matches!(err, PipelineError::Structural { .. }));
    }
}
