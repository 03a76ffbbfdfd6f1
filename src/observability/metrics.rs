//! Metrics for the banking pipeline.
//!
//! Names follow Prometheus conventions. With no recorder installed every call
//! is a no-op, so library code and tests can record freely.

use std::fmt;
use std::path::Path;
use tracing::info;

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Quality gate
    QualityGateRowsValid,
    QualityGateRowsQuarantined,
    QualityGateRuleFailures,
    QualityGateSchemaFailures,
    QualityGateFullValidationFailures,
    QualityGateBatchSize,

    // PII protection
    PiiEncryptions,
    PiiFailures,
    KeyResolutions,

    // Tiered transformation
    TransformSilverRows,
    TransformGoldPartitions,
    TransformQuarantineRows,
    TransformStageFailures,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::QualityGateRowsValid => "banking_quality_gate_rows_valid_total",
            MetricName::QualityGateRowsQuarantined => "banking_quality_gate_rows_quarantined_total",
            MetricName::QualityGateRuleFailures => "banking_quality_gate_rule_failures_total",
            MetricName::QualityGateSchemaFailures => "banking_quality_gate_schema_failures_total",
            MetricName::QualityGateFullValidationFailures => {
                "banking_quality_gate_full_validation_failures_total"
            }
            MetricName::QualityGateBatchSize => "banking_quality_gate_batch_size",

            MetricName::PiiEncryptions => "banking_pii_encryptions_total",
            MetricName::PiiFailures => "banking_pii_failures_total",
            MetricName::KeyResolutions => "banking_key_resolutions_total",

            MetricName::TransformSilverRows => "banking_transform_silver_rows_total",
            MetricName::TransformGoldPartitions => "banking_transform_gold_partitions_total",
            MetricName::TransformQuarantineRows => "banking_transform_quarantine_rows_total",
            MetricName::TransformStageFailures => "banking_transform_stage_failures_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the Prometheus recorder. Returns the handle used to render the
/// exposition text.
pub fn init() -> Result<metrics_exporter_prometheus::PrometheusHandle, String> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    info!("Metrics system initialized");
    Ok(handle)
}

/// Write the current exposition text to `path`.
pub fn write_snapshot(
    handle: &metrics_exporter_prometheus::PrometheusHandle,
    path: &Path,
) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, handle.render())
}

pub mod quality_gate {
    use super::MetricName;

    pub fn batch_split(total: usize, valid: usize, quarantined: usize) {
        ::metrics::histogram!(MetricName::QualityGateBatchSize.as_str()).record(total as f64);
        ::metrics::counter!(MetricName::QualityGateRowsValid.as_str()).increment(valid as u64);
        ::metrics::counter!(MetricName::QualityGateRowsQuarantined.as_str())
            .increment(quarantined as u64);
    }

    pub fn rule_failed(rule: &'static str, count: usize) {
        ::metrics::counter!(MetricName::QualityGateRuleFailures.as_str(), "rule" => rule)
            .increment(count as u64);
    }

    pub fn schema_failed() {
        ::metrics::counter!(MetricName::QualityGateSchemaFailures.as_str()).increment(1);
    }

    pub fn full_validation_failed() {
        ::metrics::counter!(MetricName::QualityGateFullValidationFailures.as_str()).increment(1);
    }
}

pub mod pii {
    use super::MetricName;

    pub fn encrypted() {
        ::metrics::counter!(MetricName::PiiEncryptions.as_str()).increment(1);
    }

    pub fn failed(operation: &'static str) {
        ::metrics::counter!(MetricName::PiiFailures.as_str(), "operation" => operation).increment(1);
    }

    pub fn key_resolved(source: &'static str) {
        ::metrics::counter!(MetricName::KeyResolutions.as_str(), "source" => source).increment(1);
    }
}

pub mod transform {
    use super::MetricName;

    pub fn silver_written(rows: usize) {
        ::metrics::counter!(MetricName::TransformSilverRows.as_str()).increment(rows as u64);
    }

    pub fn gold_partitions_written(partitions: usize) {
        ::metrics::counter!(MetricName::TransformGoldPartitions.as_str())
            .increment(partitions as u64);
    }

    pub fn quarantine_written(rows: usize) {
        ::metrics::counter!(MetricName::TransformQuarantineRows.as_str()).increment(rows as u64);
    }

    pub fn stage_failed(stage: &'static str) {
        ::metrics::counter!(MetricName::TransformStageFailures.as_str(), "stage" => stage)
            .increment(1);
    }
}
