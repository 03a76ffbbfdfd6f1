use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, info, warn, Span};

use crate::config::QualityConfig;
use crate::domain::{Batch, QuarantineRecord, Record, AMOUNT, CURRENCY, PAN, TIMESTAMP, TRANSACTION_ID};
use crate::logging::LogContext;
use crate::observability::metrics;

/// Timestamp layout accepted by full validation: `YYYY-MM-DDTHH:MM:SS.ffffff`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Row predicates ANDed into the quarantine mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RowRule {
    TransactionIdPresent,
    AmountPresent,
    AmountAboveMinimum,
    CurrencyLength,
}

impl RowRule {
    pub const ALL: [RowRule; 4] = [
        RowRule::TransactionIdPresent,
        RowRule::AmountPresent,
        RowRule::AmountAboveMinimum,
        RowRule::CurrencyLength,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RowRule::TransactionIdPresent => "transaction_id_not_null",
            RowRule::AmountPresent => "amount_not_null",
            RowRule::AmountAboveMinimum => "amount_at_least_minimum",
            RowRule::CurrencyLength => "currency_length",
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            RowRule::TransactionIdPresent => TRANSACTION_ID,
            RowRule::AmountPresent | RowRule::AmountAboveMinimum => AMOUNT,
            RowRule::CurrencyLength => CURRENCY,
        }
    }
}

/// The rule battery of full (hard-fail) validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationRule {
    TransactionIdNotNull,
    PanPresent,
    AmountNonNegative,
    CurrencyLength,
    TimestampFormat,
}

impl ValidationRule {
    pub const ALL: [ValidationRule; 5] = [
        ValidationRule::TransactionIdNotNull,
        ValidationRule::PanPresent,
        ValidationRule::AmountNonNegative,
        ValidationRule::CurrencyLength,
        ValidationRule::TimestampFormat,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ValidationRule::TransactionIdNotNull => "transaction_id_not_null",
            ValidationRule::PanPresent => "pan_present",
            ValidationRule::AmountNonNegative => "amount_non_negative",
            ValidationRule::CurrencyLength => "currency_length",
            ValidationRule::TimestampFormat => "timestamp_format",
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            ValidationRule::TransactionIdNotNull => TRANSACTION_ID,
            ValidationRule::PanPresent => PAN,
            ValidationRule::AmountNonNegative => AMOUNT,
            ValidationRule::CurrencyLength => CURRENCY,
            ValidationRule::TimestampFormat => TIMESTAMP,
        }
    }
}

/// Result of one rule over the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub rule: String,
    pub column: String,
    pub passed: bool,
    pub failing_rows: usize,
}

/// Result of full validation: the conjunction of every rule on every row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub success: bool,
    /// Columns implicated by failed rules, in rule order, without repeats.
    pub failures: Vec<String>,
    pub outcomes: Vec<ValidationOutcome>,
}

/// The two partitions produced by the quarantine split.
#[derive(Debug, Clone, Default)]
pub struct QuarantineSplit {
    pub valid: Vec<Record>,
    pub quarantine: Vec<QuarantineRecord>,
}

impl QuarantineSplit {
    pub fn stats(&self) -> QualityGateBatchStats {
        let mut rule_failures = BTreeMap::new();
        for rejected in &self.quarantine {
            for rule in &rejected.failed_rules {
                *rule_failures.entry(rule.name()).or_insert(0) += 1;
            }
        }
        QualityGateBatchStats {
            total_records: self.valid.len() + self.quarantine.len(),
            valid_count: self.valid.len(),
            quarantined_count: self.quarantine.len(),
            rule_failures,
        }
    }
}

/// Statistics for one quarantine split
#[derive(Debug, Default, Clone, PartialEq)]
pub struct QualityGateBatchStats {
    pub total_records: usize,
    pub valid_count: usize,
    pub quarantined_count: usize,
    pub rule_failures: BTreeMap<&'static str, usize>,
}

impl QualityGateBatchStats {
    /// Calculate acceptance rate as percentage
    pub fn acceptance_rate(&self) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        self.valid_count as f64 / self.total_records as f64 * 100.0
    }

    /// Calculate quarantine rate as percentage
    pub fn quarantine_rate(&self) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        self.quarantined_count as f64 / self.total_records as f64 * 100.0
    }
}

/// Schema and row-level gate in front of the PII and aggregation tiers.
pub trait QualityGate: Send + Sync {
    /// Batch columns must equal the expected column set, each exactly once.
    fn validate_schema(&self, batch: &Batch) -> bool;

    /// Total split of the batch into valid rows and quarantined rows.
    fn run_quarantine_split(&self, batch: &Batch) -> QuarantineSplit;

    /// Hard-fail validation over the full rule battery.
    fn run_full_validation(&self, batch: &Batch) -> ValidationReport;

    fn expected_columns(&self) -> Vec<String>;
}

/// Configuration for Quality Gate rules
#[derive(Debug, Clone)]
pub struct QualityGateConfig {
    pub expected_columns: Vec<String>,
    pub min_amount: f64,
    pub currency_len: usize,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self::from(&QualityConfig::default())
    }
}

impl From<&QualityConfig> for QualityGateConfig {
    fn from(config: &QualityConfig) -> Self {
        Self {
            expected_columns: config.expected_columns.clone(),
            min_amount: config.min_amount,
            currency_len: config.currency_len,
        }
    }
}

pub struct DefaultQualityGate {
    pub config: QualityGateConfig,
    span: Span,
}

impl DefaultQualityGate {
    pub fn new(config: QualityGateConfig, log: &LogContext) -> Self {
        Self {
            config,
            span: log.component("quality_gate"),
        }
    }

    /// Row rules this record fails; empty means the row is valid.
    pub fn row_failures(&self, record: &Record) -> Vec<RowRule> {
        let mut failed = Vec::new();
        if record.transaction_id().is_none() {
            failed.push(RowRule::TransactionIdPresent);
        }
        match record.amount() {
            None => failed.push(RowRule::AmountPresent),
            Some(amount) if amount < self.config.min_amount => {
                failed.push(RowRule::AmountAboveMinimum)
            }
            Some(_) => {}
        }
        if !self.currency_length_ok(record) {
            failed.push(RowRule::CurrencyLength);
        }
        failed
    }

    /// Per-row boolean mask: `true` keeps the row in the valid partition.
    pub fn row_mask(&self, batch: &Batch) -> Vec<bool> {
        batch
            .records
            .iter()
            .map(|r| self.row_failures(r).is_empty())
            .collect()
    }

    fn currency_length_ok(&self, record: &Record) -> bool {
        record
            .currency()
            .map(|c| c.chars().count() == self.config.currency_len)
            .unwrap_or(false)
    }

    fn rule_holds(&self, rule: ValidationRule, record: &Record) -> bool {
        match rule {
            ValidationRule::TransactionIdNotNull => record.transaction_id().is_some(),
            ValidationRule::PanPresent => record.pan().is_some(),
            ValidationRule::AmountNonNegative => record.amount().map(|a| a >= 0.0).unwrap_or(false),
            ValidationRule::CurrencyLength => self.currency_length_ok(record),
            ValidationRule::TimestampFormat => record
                .timestamp()
                .and_then(parse_strict_timestamp)
                .is_some(),
        }
    }
}

impl QualityGate for DefaultQualityGate {
    fn validate_schema(&self, batch: &Batch) -> bool {
        let _enter = self.span.enter();
        let expected: BTreeSet<&str> = self.config.expected_columns.iter().map(String::as_str).collect();
        let actual: BTreeSet<&str> = batch.columns.iter().map(String::as_str).collect();
        let has_duplicates = actual.len() != batch.columns.len();

        if has_duplicates || expected != actual {
            let missing: Vec<&str> = expected.difference(&actual).copied().collect();
            let unexpected: Vec<&str> = actual.difference(&expected).copied().collect();
            error!(
                batch = %batch.name,
                expected = ?self.config.expected_columns,
                got = ?batch.columns,
                ?missing,
                ?unexpected,
                duplicated = has_duplicates,
                "Schema mismatch"
            );
            metrics::quality_gate::schema_failed();
            return false;
        }

        info!(batch = %batch.name, "Schema validation passed");
        true
    }

    fn run_quarantine_split(&self, batch: &Batch) -> QuarantineSplit {
        let _enter = self.span.enter();
        let mut split = QuarantineSplit::default();

        for record in &batch.records {
            let failed_rules = self.row_failures(record);
            if failed_rules.is_empty() {
                split.valid.push(record.clone());
            } else {
                split.quarantine.push(QuarantineRecord {
                    record: record.clone(),
                    failed_rules,
                });
            }
        }

        let stats = split.stats();
        for (rule, count) in &stats.rule_failures {
            metrics::quality_gate::rule_failed(*rule, *count);
        }
        metrics::quality_gate::batch_split(stats.total_records, stats.valid_count, stats.quarantined_count);

        if stats.quarantined_count > 0 {
            warn!(
                batch = %batch.name,
                valid = stats.valid_count,
                quarantined = stats.quarantined_count,
                rule_failures = ?stats.rule_failures,
                "Rows routed to quarantine"
            );
        } else {
            info!(batch = %batch.name, valid = stats.valid_count, "All rows passed the quarantine check");
        }

        split
    }

    fn run_full_validation(&self, batch: &Batch) -> ValidationReport {
        let _enter = self.span.enter();
        info!(batch = %batch.name, rows = batch.len(), "Starting full validation");

        let outcomes: Vec<ValidationOutcome> = ValidationRule::ALL
            .iter()
            .map(|rule| {
                let failing_rows = batch
                    .records
                    .iter()
                    .filter(|r| !self.rule_holds(*rule, r))
                    .count();
                ValidationOutcome {
                    rule: rule.name().to_string(),
                    column: rule.column().to_string(),
                    passed: failing_rows == 0,
                    failing_rows,
                }
            })
            .collect();

        let mut failures: Vec<String> = Vec::new();
        for outcome in outcomes.iter().filter(|o| !o.passed) {
            if !failures.contains(&outcome.column) {
                failures.push(outcome.column.clone());
            }
        }
        let success = failures.is_empty();

        if success {
            info!(batch = %batch.name, "All quality checks passed");
        } else {
            error!(batch = %batch.name, columns = ?failures, "Quality validation failed");
            metrics::quality_gate::full_validation_failed();
        }

        ValidationReport {
            success,
            failures,
            outcomes,
        }
    }

    fn expected_columns(&self) -> Vec<String> {
        self.config.expected_columns.clone()
    }
}

/// Parse `YYYY-MM-DDTHH:MM:SS.f` with a fraction of one to six digits.
pub fn parse_strict_timestamp(value: &str) -> Option<NaiveDateTime> {
    let (_, fraction) = value.rsplit_once('.')?;
    if fraction.is_empty() || fraction.len() > 6 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn gate() -> DefaultQualityGate {
        DefaultQualityGate::new(QualityGateConfig::default(), &LogContext::disabled())
    }

    fn record(id: Option<&str>, amount: Option<f64>, currency: &str) -> Record {
        Record {
            transaction_id: id.map(str::to_string),
            customer_id: Some("CUST-00001".to_string()),
            email: Some("a@b.com".to_string()),
            pan: Some("4111222233334444".to_string()),
            amount,
            currency: Some(currency.to_string()),
            timestamp: Some("2023-01-01T10:00:00.000000".to_string()),
            amount_raw: None,
        }
    }

    fn batch(records: Vec<Record>) -> Batch {
        Batch::new("test.csv", NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(), records)
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_schema_accepts_expected_columns_in_any_order() {
        let b = batch(vec![]).with_columns(columns(&[
            "timestamp", "currency", "amount", "pan", "email", "customer_id", "transaction_id",
        ]));
        assert!(gate().validate_schema(&b));
    }

    #[test]
    fn test_schema_rejects_missing_column() {
        let b = batch(vec![]).with_columns(columns(&["transaction_id", "amount"]));
        assert!(!gate().validate_schema(&b));

        let b = batch(vec![]).with_columns(columns(&[
            "transaction_id", "customer_id", "email", "pan", "amount", "currency",
        ]));
        assert!(!gate().validate_schema(&b));
    }

    #[test]
    fn test_schema_rejects_extra_and_duplicate_columns() {
        let mut cols = columns(&crate::domain::EXPECTED_COLUMNS);
        cols.push("merchant".to_string());
        assert!(!gate().validate_schema(&batch(vec![]).with_columns(cols)));

        let mut cols = columns(&crate::domain::EXPECTED_COLUMNS);
        cols.push("amount".to_string());
        assert!(!gate().validate_schema(&batch(vec![]).with_columns(cols)));
    }

    #[test]
    fn test_schema_ignores_duplicates_in_expected_list() {
        let mut config = QualityGateConfig::default();
        config.expected_columns.push("amount".to_string());
        let g = DefaultQualityGate::new(config, &LogContext::disabled());
        assert!(g.validate_schema(&batch(vec![])));
    }

    #[test]
    fn test_negative_amount_is_quarantined() {
        let split = gate().run_quarantine_split(&batch(vec![record(Some("id1"), Some(-50.0), "USD")]));
        assert!(split.valid.is_empty());
        assert_eq!(split.quarantine.len(), 1);
        assert_eq!(split.quarantine[0].failed_rules, vec![RowRule::AmountAboveMinimum]);
    }

    #[test]
    fn test_complete_row_is_valid() {
        let split = gate().run_quarantine_split(&batch(vec![record(Some("id1"), Some(100.0), "USD")]));
        assert_eq!(split.valid.len(), 1);
        assert!(split.quarantine.is_empty());
    }

    #[test]
    fn test_split_is_total_and_disjoint() {
        let records = vec![
            record(Some("a"), Some(1.0), "USD"),
            record(None, Some(1.0), "USD"),
            record(Some("c"), None, "USD"),
            record(Some("d"), Some(5.0), "US"),
            record(Some("e"), Some(0.0), "EUR"),
            record(Some("f"), Some(f64::NAN), "EURO"),
        ];
        let b = batch(records);
        let split = gate().run_quarantine_split(&b);

        assert_eq!(split.valid.len() + split.quarantine.len(), b.len());
        let valid_ids: Vec<_> = split.valid.iter().map(|r| r.label()).collect();
        assert_eq!(valid_ids, vec!["a", "e"]);
        for rejected in &split.quarantine {
            assert!(!split.valid.contains(&rejected.record));
        }
        assert_eq!(
            split.quarantine[3].failed_rules,
            vec![RowRule::AmountPresent, RowRule::CurrencyLength]
        );
        assert_eq!(gate().row_mask(&b), vec![true, false, false, false, true, false]);
    }

    #[test]
    fn test_minimum_amount_is_configurable() {
        let config = QualityGateConfig {
            min_amount: 10.0,
            ..QualityGateConfig::default()
        };
        let g = DefaultQualityGate::new(config, &LogContext::disabled());
        let split = g.run_quarantine_split(&batch(vec![
            record(Some("a"), Some(9.99), "USD"),
            record(Some("b"), Some(10.0), "USD"),
        ]));
        assert_eq!(split.valid.len(), 1);
        assert_eq!(split.valid[0].label(), "b");
    }

    #[test]
    fn test_split_stats() {
        let split = gate().run_quarantine_split(&batch(vec![
            record(Some("a"), Some(1.0), "USD"),
            record(Some("b"), Some(-1.0), "USD"),
            record(None, Some(-1.0), "USD"),
            record(Some("d"), Some(2.0), "USD"),
        ]));
        let stats = split.stats();
        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.acceptance_rate(), 50.0);
        assert_eq!(stats.quarantine_rate(), 50.0);
        assert_eq!(stats.rule_failures.get("amount_at_least_minimum"), Some(&2));
        assert_eq!(stats.rule_failures.get("transaction_id_not_null"), Some(&1));
    }

    #[test]
    fn test_full_validation_detects_invalid_values() {
        let report = gate().run_full_validation(&batch(vec![record(Some("id1"), Some(-50.0), "USD")]));
        assert!(!report.success);
        assert_eq!(report.failures, vec!["amount"]);
        let amount = report.outcomes.iter().find(|o| o.rule == "amount_non_negative").unwrap();
        assert_eq!(amount.failing_rows, 1);
    }

    #[test]
    fn test_full_validation_passes_clean_batch() {
        let report = gate().run_full_validation(&batch(vec![
            record(Some("id1"), Some(100.0), "USD"),
            record(Some("id2"), Some(0.0), "EUR"),
        ]));
        assert!(report.success);
        assert!(report.failures.is_empty());
        assert_eq!(report.outcomes.len(), 5);
    }

    #[test]
    fn test_full_validation_reports_pan_and_timestamp() {
        let mut r = record(Some("id1"), Some(1.0), "USD");
        r.pan = None;
        r.timestamp = Some("2023-01-01 10:00:00".to_string());
        let report = gate().run_full_validation(&batch(vec![r]));
        assert_eq!(report.failures, vec!["pan", "timestamp"]);
    }

    #[test]
    fn test_strict_timestamp_parsing() {
        assert!(parse_strict_timestamp("2023-01-01T10:00:00.000000").is_some());
        assert!(parse_strict_timestamp("2023-01-01T10:00:00.5").is_some());
        assert!(parse_strict_timestamp("2023-01-01T10:00:00").is_none());
        assert!(parse_strict_timestamp("2023-01-01T10:00:00.1234567").is_none());
        assert!(parse_strict_timestamp("2023-13-01T10:00:00.000000").is_none());
        assert!(parse_strict_timestamp("01/01/2023 10:00:00.000000").is_none());
    }
}
